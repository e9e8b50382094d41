//! Input provider seam. File formats live with the caller; the pipeline only
//! asks for rasters, vectors and incident records by id.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::geometry::VectorGeometry;
use crate::raster::RasterLayer;
use crate::sampling::Incident;

pub trait InputSource {
    fn raster(&self, id: &str) -> Result<RasterLayer>;
    fn vector(&self, id: &str) -> Result<VectorGeometry>;
    fn incidents(&self, id: &str) -> Result<Vec<Incident>>;
}

/// Inputs held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    rasters: HashMap<String, RasterLayer>,
    vectors: HashMap<String, VectorGeometry>,
    incidents: HashMap<String, Vec<Incident>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raster(mut self, id: &str, layer: RasterLayer) -> Self {
        self.rasters.insert(id.to_string(), layer);
        self
    }

    pub fn with_vector(mut self, id: &str, geometry: VectorGeometry) -> Self {
        self.vectors.insert(id.to_string(), geometry);
        self
    }

    pub fn with_incidents(mut self, id: &str, incidents: Vec<Incident>) -> Self {
        self.incidents.insert(id.to_string(), incidents);
        self
    }
}

fn lookup<T: Clone>(map: &HashMap<String, T>, id: &str) -> Result<T> {
    map.get(id).cloned().ok_or_else(|| Error::MissingInput(id.to_string()))
}

impl InputSource for MemorySource {
    fn raster(&self, id: &str) -> Result<RasterLayer> {
        lookup(&self.rasters, id)
    }

    fn vector(&self, id: &str) -> Result<VectorGeometry> {
        lookup(&self.vectors, id)
    }

    fn incidents(&self, id: &str) -> Result<Vec<Incident>> {
        lookup(&self.incidents, id)
    }
}
