//! Anchor-drag cable risk mapping.
//!
//! Aligns environmental rasters onto one grid, masks them to a cable
//! corridor, rebuilds the distance-to-cable field, samples presence and
//! background points, and fits a cross-validated presence/background
//! maximum-entropy model whose surfaces give relative drag risk.

pub mod align;
pub mod config;
pub mod crs;
pub mod distance;
pub mod error;
pub mod features;
pub mod geometry;
pub mod input;
pub mod mask;
pub mod maxent;
pub mod pipeline;
pub mod raster;
pub mod sampling;
pub mod terrain;

pub use config::{BackgroundPolicy, PipelineConfig, PredictorSource, PredictorSpec, StudyDomain};
pub use crs::Crs;
pub use error::{Error, Result, Stage};
pub use features::{TrainingRow, TrainingTable};
pub use geometry::{Domain, VectorGeometry};
pub use input::{InputSource, MemorySource};
pub use maxent::FoldStrategy;
pub use pipeline::{Pipeline, RunOutput, RunReport};
pub use raster::{GeoTransform, GridSpec, RasterLayer, RasterStack};
pub use sampling::{Incident, PointLabel, PointSet};
