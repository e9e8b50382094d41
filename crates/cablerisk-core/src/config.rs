//! Run configuration.
//!
//! One [`PipelineConfig`] describes one model instance. The two corridor
//! models and the region-wide model differ only in their configuration; the
//! presets [`PipelineConfig::corridor`] and [`PipelineConfig::region`] carry
//! the defaults for each.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::maxent::FoldStrategy;
use crate::sampling::MAX_BACKGROUND_COUNT;

/// Where a predictor layer comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictorSource {
    /// A raster input by id.
    Raster { id: String },
    /// Slope in degrees of another raster predictor (by predictor name).
    SlopeOf { layer: String },
    /// Distance to the cable, rebuilt on the masked grid.
    CableDistance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictorSpec {
    pub name: String,
    pub source: PredictorSource,
}

impl PredictorSpec {
    pub fn raster(name: &str) -> Self {
        Self { name: name.into(), source: PredictorSource::Raster { id: name.into() } }
    }

    pub fn slope_of(name: &str, layer: &str) -> Self {
        Self { name: name.into(), source: PredictorSource::SlopeOf { layer: layer.into() } }
    }

    pub fn cable_distance(name: &str) -> Self {
        Self { name: name.into(), source: PredictorSource::CableDistance }
    }
}

/// The area the stack is cropped and masked to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StudyDomain {
    /// A supplied corridor polygon, or else a buffer around the cable.
    Corridor {
        #[serde(default)]
        polygon: Option<String>,
        buffer_m: f64,
    },
    /// A region-wide area of interest polygon.
    Region { aoi: String },
}

/// Where background points are drawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackgroundPolicy {
    /// Distance ring `[inner_m, outer_m]` around the cable, optionally
    /// intersected with the study domain.
    Ring { inner_m: f64, outer_m: f64, clip_to_domain: bool },
    /// Uniformly over the study domain.
    Area,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run name, used in logs and error messages.
    pub name: String,
    pub target_crs: Crs,
    /// Predictor whose grid defines the reference grid.
    pub template_layer: String,
    /// Predictors in stack order.
    pub predictors: Vec<PredictorSpec>,
    /// Vector input id of the cable route.
    pub cable: String,
    /// Incident input id.
    pub incidents: String,
    pub domain: StudyDomain,
    pub background: BackgroundPolicy,
    pub background_count: usize,
    /// Regularisation multiplier β for cross-validation.
    pub regularization: f64,
    /// β for the full refit; `None` reuses `regularization`.
    pub refit_regularization: Option<f64>,
    pub folds: usize,
    pub fold_strategy: FoldStrategy,
    pub seed: u64,
    /// Output directory name; defaults to `name` when empty.
    pub output_id: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "corridor".into(),
            // WGS84 / UTM 34N (southern Baltic).
            target_crs: Crs::known(32634),
            template_layer: "bathymetry".into(),
            predictors: vec![
                PredictorSpec::cable_distance("distance"),
                PredictorSpec::slope_of("slope", "bathymetry"),
                PredictorSpec::raster("bathymetry"),
                PredictorSpec::raster("current_speed"),
            ],
            cable: "cable".into(),
            incidents: "incidents".into(),
            domain: StudyDomain::Corridor { polygon: None, buffer_m: 5500.0 },
            background: BackgroundPolicy::Ring { inner_m: 500.0, outer_m: 1500.0, clip_to_domain: true },
            background_count: 10_000,
            regularization: 1.0,
            refit_regularization: None,
            folds: 4,
            fold_strategy: FoldStrategy::Random,
            seed: 42,
            output_id: String::new(),
        }
    }
}

impl PipelineConfig {
    /// Corridor-specific model for the cable named `name`.
    pub fn corridor(name: &str) -> Self {
        Self {
            name: name.into(),
            cable: name.into(),
            output_id: name.into(),
            ..Self::default()
        }
    }

    /// Region-wide model: AOI domain, area background, larger sample.
    pub fn region(name: &str) -> Self {
        Self {
            name: name.into(),
            domain: StudyDomain::Region { aoi: "aoi".into() },
            background: BackgroundPolicy::Area,
            background_count: 20_000,
            output_id: name.into(),
            ..Self::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Input {
            id: "pipeline configuration".into(),
            reason: e.to_string(),
        })
    }

    pub fn output_id(&self) -> &str {
        if self.output_id.is_empty() {
            &self.name
        } else {
            &self.output_id
        }
    }

    pub fn refit_regularization(&self) -> f64 {
        self.refit_regularization.unwrap_or(self.regularization)
    }

    pub fn predictor_names(&self) -> Vec<String> {
        self.predictors.iter().map(|p| p.name.clone()).collect()
    }

    fn predictor(&self, name: &str) -> Option<&PredictorSpec> {
        self.predictors.iter().find(|p| p.name == name)
    }

    /// Check every field before any stage runs.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &'static str, reason: String| Err(Error::InvalidConfig { field, reason });

        if self.name.trim().is_empty() {
            return invalid("name", "must not be empty".into());
        }
        if self.folds < 2 {
            return invalid("folds", format!("{} folds; need at least 2", self.folds));
        }
        if self.background_count == 0 {
            return invalid("background_count", "must be positive".into());
        }
        if self.background_count > MAX_BACKGROUND_COUNT {
            return invalid(
                "background_count",
                format!("{} exceeds the limit of {MAX_BACKGROUND_COUNT}", self.background_count),
            );
        }
        // Radii and cell sizes are metres; a lon/lat working system would
        // read them as degrees.
        if self.target_crs.is_geographic() {
            return invalid(
                "target_crs",
                format!("{} is geographic; a projected CRS is required", self.target_crs),
            );
        }
        for (field, beta) in [
            ("regularization", Some(self.regularization)),
            ("refit_regularization", self.refit_regularization),
        ] {
            if let Some(beta) = beta {
                if !(beta > 0.0 && beta.is_finite()) {
                    return invalid(field, format!("{beta} must be positive and finite"));
                }
            }
        }
        if let BackgroundPolicy::Ring { inner_m, outer_m, .. } = self.background {
            if !(inner_m >= 0.0 && outer_m > inner_m && outer_m.is_finite()) {
                return invalid("background", format!("ring [{inner_m}, {outer_m}] m encloses no area"));
            }
        }
        if let StudyDomain::Corridor { buffer_m, .. } = self.domain {
            if !(buffer_m > 0.0 && buffer_m.is_finite()) {
                return invalid("domain", format!("buffer {buffer_m} m must be positive"));
            }
        }

        if self.predictors.is_empty() {
            return invalid("predictors", "at least one predictor is required".into());
        }
        let mut seen = HashSet::new();
        for p in &self.predictors {
            if !seen.insert(p.name.as_str()) {
                return invalid("predictors", format!("duplicate predictor `{}`", p.name));
            }
        }
        match self.predictor(&self.template_layer).map(|p| &p.source) {
            Some(PredictorSource::Raster { .. }) => {}
            _ => {
                return invalid(
                    "template_layer",
                    format!("`{}` is not a raster predictor", self.template_layer),
                )
            }
        }
        for p in &self.predictors {
            if let PredictorSource::SlopeOf { layer } = &p.source {
                if !matches!(self.predictor(layer).map(|s| &s.source), Some(PredictorSource::Raster { .. })) {
                    return invalid("predictors", format!("slope `{}` refers to non-raster `{layer}`", p.name));
                }
            }
        }
        let distances = self
            .predictors
            .iter()
            .filter(|p| p.source == PredictorSource::CableDistance)
            .count();
        if distances > 1 {
            return invalid("predictors", format!("{distances} cable-distance predictors; at most one"));
        }
        Ok(())
    }
}
