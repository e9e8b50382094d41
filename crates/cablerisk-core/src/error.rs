//! Error taxonomy shared by every pipeline stage.
//!
//! Stage functions return the bare variants; the orchestrator wraps them in
//! [`Error::Stage`] so a failure names the run and the stage it aborted.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crs::Crs;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    // ── Alignment ────────────────────────────────────────────────────────────
    #[error("unresolvable CRS identifier `{0}`")]
    UnknownCrs(String),

    #[error("cannot transform ({x}, {y}) from {from} to {to}: {reason}")]
    Transform {
        from: Crs,
        to: Crs,
        x: f64,
        y: f64,
        reason: String,
    },

    #[error("layer `{layer}` has no overlap with the reference grid")]
    NoOverlap { layer: String },

    #[error("geotransform of `{name}` is not invertible")]
    SingularTransform { name: String },

    #[error("layer `{layer}` does not share the stack grid")]
    GridMismatch { layer: String },

    #[error("layer `{layer}` holds {found} cells but its grid expects {expected}")]
    ShapeMismatch { layer: String, found: usize, expected: usize },

    #[error("duplicate layer name `{0}`")]
    DuplicateLayer(String),

    #[error("no layer named `{0}`")]
    MissingLayer(String),

    #[error("raster stack has no layers")]
    EmptyStack,

    // ── Geometry ─────────────────────────────────────────────────────────────
    #[error("geometry `{name}` is empty")]
    EmptyGeometry { name: String },

    #[error("geometry `{name}` is invalid: {reason}")]
    InvalidGeometry { name: String, reason: String },

    // ── Sampling ─────────────────────────────────────────────────────────────
    #[error("cannot draw {requested} points from domain `{domain}`: {reason}")]
    DegenerateDomain {
        domain: String,
        requested: usize,
        reason: String,
    },

    // ── Data sufficiency / model ─────────────────────────────────────────────
    #[error("insufficient data in {what}: found {found}, need at least {required}")]
    InsufficientData {
        what: String,
        found: usize,
        required: usize,
    },

    #[error("degenerate model: {0}")]
    DegenerateModel(String),

    // ── Configuration and inputs ─────────────────────────────────────────────
    #[error("invalid configuration field `{field}`: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("input `{0}` not found")]
    MissingInput(String),

    #[error("input `{id}` could not be read: {reason}")]
    Input { id: String, reason: String },

    #[error("run `{run}` failed during {stage}: {source}")]
    Stage {
        run: String,
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Configure,
    Align,
    Mask,
    Distance,
    Sample,
    Extract,
    CrossValidate,
    Refit,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Configure => "configuration",
            Stage::Align => "raster alignment",
            Stage::Mask => "corridor masking",
            Stage::Distance => "distance field rebuild",
            Stage::Sample => "point sampling",
            Stage::Extract => "feature extraction",
            Stage::CrossValidate => "cross-validated fit",
            Stage::Refit => "full-data refit",
        };
        f.write_str(s)
    }
}

impl Error {
    /// The stage a wrapped error was raised in, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost error beneath any stage wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Attach run and stage context to a stage result.
pub trait StageContext<T> {
    fn in_stage(self, run: &str, stage: Stage) -> Result<T>;
}

impl<T> StageContext<T> for Result<T> {
    fn in_stage(self, run: &str, stage: Stage) -> Result<T> {
        self.map_err(|source| Error::Stage {
            run: run.to_string(),
            stage,
            source: Box::new(source),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wrapper_names_run_stage_and_layer() {
        let err: Result<()> = Err(Error::NoOverlap { layer: "current_speed".into() });
        let err = err.in_stage("gulf-corridor", Stage::Align).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("gulf-corridor"), "{msg}");
        assert!(msg.contains("raster alignment"), "{msg}");
        assert!(msg.contains("current_speed"), "{msg}");
        assert_eq!(err.stage(), Some(Stage::Align));
        assert!(matches!(err.root(), Error::NoOverlap { .. }));
    }
}
