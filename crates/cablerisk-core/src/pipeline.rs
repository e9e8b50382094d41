//! Pipeline orchestrator: runs every stage of one model instance in order.
//!
//! Stage order:
//!   1. Configuration check
//!   2. Raster alignment (+ derived slope)
//!   3. Corridor masking
//!   4. Distance field rebuild on the masked grid
//!   5. Presence / background sampling
//!   6. Feature extraction
//!   7. Cross-validated fit
//!   8. Full-data refit
//!
//! Every failure is reported as [`Error::Stage`] naming the run and stage.

use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;

use crate::align::align_stack;
use crate::config::{BackgroundPolicy, PipelineConfig, PredictorSource, StudyDomain};
use crate::crs::Crs;
use crate::distance::distance_field;
use crate::error::{Error, Result, Stage, StageContext};
use crate::features::{build_training_table, ExtractionSummary, TrainingTable};
use crate::geometry::{Domain, VectorGeometry};
use crate::input::InputSource;
use crate::mask::{apply_mask, domain_mask, mask_stack};
use crate::maxent::{
    cross_validate, fit_full, CrossValidation, CvSettings, FoldReport, FullFit, ModelSettings,
    ModelWarning,
};
use crate::raster::{RasterLayer, RasterStack};
use crate::sampling::{background_points, presence_points, PointSet};
use crate::terrain;

/// Salt for the background sampling stream.
const BACKGROUND_SALT: u64 = 0xB4C6_0D00_5EED_7A11;

// ── Output ────────────────────────────────────────────────────────────────────

/// Everything one run produces.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub name: String,
    pub output_id: String,
    /// β used for every cross-validation fold.
    pub cv_regularization: f64,
    /// Masked, aligned predictor stack in predictor order.
    pub stack: RasterStack,
    pub presence: PointSet,
    pub background: PointSet,
    pub table: TrainingTable,
    pub extraction: ExtractionSummary,
    pub cross_validation: CrossValidation,
    pub full: FullFit,
}

#[derive(Debug, Clone, Serialize)]
pub struct GridSummary {
    pub crs: Crs,
    pub width: usize,
    pub height: usize,
    /// GDAL-ordered geotransform.
    pub transform: [f64; 6],
    /// Cells where every predictor is present.
    pub valid_cells: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunWarning {
    /// `fold <k>` or `refit`.
    pub origin: String,
    pub warning: ModelWarning,
}

/// Serializable summary of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub name: String,
    pub output_id: String,
    pub grid: GridSummary,
    pub feature_names: Vec<String>,
    pub extraction: ExtractionSummary,
    pub cv_regularization: f64,
    pub folds: Vec<FoldReport>,
    pub mean_cv_auc: Option<f64>,
    pub refit_regularization: f64,
    pub refit_coefficients: Vec<(String, f64)>,
    pub refit_training_auc: Option<f64>,
    /// `[min, max]` over valid cells of the fold-averaged surface.
    pub cv_surface_range: Option<[f32; 2]>,
    pub full_surface_range: Option<[f32; 2]>,
    pub warnings: Vec<RunWarning>,
}

impl RunOutput {
    pub fn report(&self) -> RunReport {
        let grid = *self.stack.grid();
        let valid_cells = (0..grid.height)
            .flat_map(|r| (0..grid.width).map(move |c| (r, c)))
            .filter(|&(r, c)| self.stack.values_at(r, c).is_some())
            .count();
        let model = &self.full.model;
        let mut warnings: Vec<RunWarning> = self
            .cross_validation
            .warnings()
            .map(|(fold, w)| RunWarning { origin: format!("fold {fold}"), warning: w.clone() })
            .collect();
        warnings.extend(
            model
                .warnings
                .iter()
                .map(|w| RunWarning { origin: "refit".into(), warning: w.clone() }),
        );
        RunReport {
            name: self.name.clone(),
            output_id: self.output_id.clone(),
            grid: GridSummary {
                crs: grid.crs,
                width: grid.width,
                height: grid.height,
                transform: grid.transform.to_gdal(),
                valid_cells,
            },
            feature_names: self.table.feature_names.clone(),
            extraction: self.extraction,
            cv_regularization: self.cv_regularization,
            folds: self.cross_validation.folds.clone(),
            mean_cv_auc: self.cross_validation.mean_auc,
            refit_regularization: model.regularization,
            refit_coefficients: model
                .feature_names
                .iter()
                .cloned()
                .zip(model.coefficients.iter().copied())
                .collect(),
            refit_training_auc: self.full.training_auc,
            cv_surface_range: value_range(&self.cross_validation.surface),
            full_surface_range: value_range(&self.full.surface),
            warnings,
        }
    }
}

fn value_range(layer: &RasterLayer) -> Option<[f32; 2]> {
    Some([layer.min_value()?, layer.max_value()?])
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run<S: InputSource + ?Sized>(&self, source: &S) -> Result<RunOutput> {
        let cfg = &self.config;
        let run = cfg.name.as_str();
        let target = cfg.target_crs;

        // ── 1. Configuration ────────────────────────────────────────────────
        cfg.validate().in_stage(run, Stage::Configure)?;
        info!("[{run}] starting: {} predictors, target {target}", cfg.predictors.len());

        // ── 2. Alignment ────────────────────────────────────────────────────
        let stack = self.aligned_stack(source).in_stage(run, Stage::Align)?;

        // ── 3. Masking ──────────────────────────────────────────────────────
        let cable = self.cable(source).in_stage(run, Stage::Mask)?;
        let domain = self.study_domain(source, cable.as_ref()).in_stage(run, Stage::Mask)?;
        let stack = mask_stack(&stack, &domain).in_stage(run, Stage::Mask)?;

        // ── 4. Distance field ───────────────────────────────────────────────
        let stack = self
            .with_distance(stack, cable.as_ref(), &domain)
            .in_stage(run, Stage::Distance)?;

        // ── 5. Sampling ─────────────────────────────────────────────────────
        let (presence, background) = self
            .sample(source, cable.as_ref(), &domain)
            .in_stage(run, Stage::Sample)?;

        // ── 6. Extraction ───────────────────────────────────────────────────
        let (table, extraction) =
            build_training_table(&presence, &background, &stack).in_stage(run, Stage::Extract)?;

        // ── 7. Cross-validation ─────────────────────────────────────────────
        let cv_settings = CvSettings { folds: cfg.folds, strategy: cfg.fold_strategy, seed: cfg.seed };
        let cross_validation = cross_validate(
            &table,
            &stack,
            &ModelSettings::with_regularization(cfg.regularization),
            &cv_settings,
        )
        .in_stage(run, Stage::CrossValidate)?;

        // ── 8. Full refit ───────────────────────────────────────────────────
        let full = fit_full(&table, &stack, &ModelSettings::with_regularization(cfg.refit_regularization()))
            .in_stage(run, Stage::Refit)?;

        info!("[{run}] done");
        Ok(RunOutput {
            name: cfg.name.clone(),
            output_id: cfg.output_id().to_string(),
            cv_regularization: cfg.regularization,
            stack,
            presence,
            background,
            table,
            extraction,
            cross_validation,
            full,
        })
    }

    /// Load raster predictors, align them onto the template grid and add the
    /// derived slope layers.
    fn aligned_stack<S: InputSource + ?Sized>(&self, source: &S) -> Result<RasterStack> {
        let cfg = &self.config;
        let mut layers = Vec::new();
        for spec in &cfg.predictors {
            if let PredictorSource::Raster { id } = &spec.source {
                layers.push(source.raster(id)?.renamed(spec.name.as_str()));
            }
        }
        let mut stack = align_stack(&layers, &cfg.template_layer, cfg.target_crs)?;
        for spec in &cfg.predictors {
            if let PredictorSource::SlopeOf { layer } = &spec.source {
                let dem = stack
                    .get(layer)
                    .ok_or_else(|| Error::MissingLayer(layer.clone()))?;
                let slope = terrain::slope(&spec.name, dem)?;
                stack = stack.with_layer(slope)?;
            }
        }
        Ok(stack)
    }

    fn needs_cable(&self) -> bool {
        let cfg = &self.config;
        cfg.predictors.iter().any(|p| p.source == PredictorSource::CableDistance)
            || matches!(cfg.background, BackgroundPolicy::Ring { .. })
            || matches!(cfg.domain, StudyDomain::Corridor { polygon: None, .. })
    }

    /// The cable route in the target CRS, when any stage uses it.
    fn cable<S: InputSource + ?Sized>(&self, source: &S) -> Result<Option<VectorGeometry>> {
        if !self.needs_cable() {
            return Ok(None);
        }
        Ok(Some(source.vector(&self.config.cable)?.reproject(self.config.target_crs)?))
    }

    fn study_domain<S: InputSource + ?Sized>(
        &self,
        source: &S,
        cable: Option<&VectorGeometry>,
    ) -> Result<Domain> {
        let target = self.config.target_crs;
        match &self.config.domain {
            StudyDomain::Corridor { polygon: Some(id), .. } | StudyDomain::Region { aoi: id } => {
                Domain::polygons(&source.vector(id)?.reproject(target)?)
            }
            StudyDomain::Corridor { polygon: None, buffer_m } => {
                Domain::buffer(required_cable(cable, &self.config.cable)?, *buffer_m)
            }
        }
    }

    /// Rebuild the cable-distance predictor on the masked grid, re-mask it,
    /// and restore predictor order.
    fn with_distance(
        &self,
        stack: RasterStack,
        cable: Option<&VectorGeometry>,
        domain: &Domain,
    ) -> Result<RasterStack> {
        let Some(spec) = self
            .config
            .predictors
            .iter()
            .find(|p| p.source == PredictorSource::CableDistance)
        else {
            return stack.select(&self.config.predictor_names());
        };
        let grid = *stack.grid();
        let field = distance_field(&spec.name, required_cable(cable, &self.config.cable)?, &grid)?;
        let masked = apply_mask(&field, &domain_mask(&grid, domain));
        stack.with_layer(masked)?.select(&self.config.predictor_names())
    }

    fn sample<S: InputSource + ?Sized>(
        &self,
        source: &S,
        cable: Option<&VectorGeometry>,
        domain: &Domain,
    ) -> Result<(PointSet, PointSet)> {
        let cfg = &self.config;
        let incidents = source.incidents(&cfg.incidents)?;
        let presence = presence_points(&cfg.incidents, &incidents, cfg.target_crs)?;

        let background_domain = match cfg.background {
            BackgroundPolicy::Ring { inner_m, outer_m, clip_to_domain } => Domain::ring(
                required_cable(cable, &cfg.cable)?,
                inner_m,
                outer_m,
                clip_to_domain.then(|| domain.clone()),
            )?,
            BackgroundPolicy::Area => domain.clone(),
        };
        let mut rng = StdRng::seed_from_u64(cfg.seed ^ BACKGROUND_SALT);
        let background = background_points(
            &format!("{}_background", cfg.name),
            &background_domain,
            cfg.background_count,
            cfg.target_crs,
            &mut rng,
        )?;
        Ok((presence, background))
    }
}

fn required_cable<'a>(cable: Option<&'a VectorGeometry>, id: &str) -> Result<&'a VectorGeometry> {
    cable.ok_or_else(|| Error::MissingInput(id.to_string()))
}
