//! Presence/background maximum-entropy density-ratio model.
//!
//! The fit is the infinitely-weighted logistic regression formulation of
//! Maxent (as in maxnet): presence rows carry weight 1, background rows
//! weight 100, features are linear and min–max scaled over the fitting
//! data, and every coefficient carries an L1 penalty proportional to the
//! presence spread of its feature. Predictions use the complementary
//! log-log output.

pub mod auc;
pub mod cv;
pub mod solver;

use log::{debug, info, warn};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::features::TrainingTable;
use crate::raster::{RasterLayer, RasterStack};

use self::solver::{Problem, SolverSettings};

pub use self::auc::auc;
pub use self::cv::{cross_validate, CrossValidation, CvSettings, FoldReport, FoldStrategy};

/// Prior weight of a background row.
pub const BACKGROUND_WEIGHT: f64 = 100.0;
/// Predicted probabilities are clamped into `[PROB_EPS, 1 − PROB_EPS]`.
pub const PROB_EPS: f64 = 1e-7;
/// Smallest presence spread used in the penalty.
const MIN_SPREAD: f64 = 0.001;

/// Regularisation multiplier knots for linear features, by presence count.
const LINEAR_KNOTS: [(f64, f64); 4] = [(0.0, 1.0), (10.0, 1.0), (30.0, 0.2), (100.0, 0.05)];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureClass {
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSettings {
    /// Regularisation multiplier β; must be positive and finite.
    pub regularization: f64,
    pub feature_class: FeatureClass,
    pub solver: SolverSettings,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            regularization: 1.0,
            feature_class: FeatureClass::Linear,
            solver: SolverSettings::default(),
        }
    }
}

impl ModelSettings {
    pub fn with_regularization(regularization: f64) -> Self {
        Self { regularization, ..Self::default() }
    }
}

/// Non-fatal conditions noted while fitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelWarning {
    /// The predictor is constant over the fitting rows and was left out.
    ZeroVariance { feature: String },
    /// The solver stopped at its iteration limit.
    NotConverged { iterations: usize },
}

/// A fitted model. Lives for the duration of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct MaxentModel {
    pub feature_names: Vec<String>,
    pub feature_class: FeatureClass,
    /// Fitting-data range per feature, used for scaling and clamping.
    pub min: Vec<f64>,
    pub max: Vec<f64>,
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    /// Normaliser: −log Σ_bg exp(link).
    pub alpha: f64,
    /// Entropy of the fitted distribution over the fitting background.
    pub entropy: f64,
    pub regularization: f64,
    pub warnings: Vec<ModelWarning>,
}

/// Piecewise-linear interpolation over `knots`, flat beyond the ends.
fn interpolate(knots: &[(f64, f64)], x: f64) -> f64 {
    let (first, last) = (knots[0], knots[knots.len() - 1]);
    if x <= first.0 {
        return first.1;
    }
    if x >= last.0 {
        return last.1;
    }
    for pair in knots.windows(2) {
        let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
        if x <= x1 {
            return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
        }
    }
    last.1
}

/// Sample standard deviation; 0 for fewer than two values.
fn sample_sd(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = values.clone().count();
    if n < 2 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    let ss: f64 = values.map(|v| (v - mean) * (v - mean)).sum();
    (ss / (n - 1) as f64).sqrt()
}

/// Numerically stable log Σ exp(v).
fn log_sum_exp(values: &[f64]) -> f64 {
    let m = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !m.is_finite() {
        return m;
    }
    m + values.iter().map(|v| (v - m).exp()).sum::<f64>().ln()
}

impl MaxentModel {
    /// Feature value scaled into [0, 1] with the fitting range, clamped.
    fn scale(&self, j: usize, v: f64) -> f64 {
        let range = self.max[j] - self.min[j];
        if range > 0.0 {
            ((v - self.min[j]) / range).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Linear predictor without the intercept.
    pub fn link(&self, values: &[f64]) -> f64 {
        values
            .iter()
            .enumerate()
            .map(|(j, &v)| self.coefficients[j] * self.scale(j, v))
            .sum()
    }

    /// Complementary log-log output in (0, 1).
    pub fn predict(&self, values: &[f64]) -> f64 {
        let cloglog = -(-(self.entropy + self.alpha + self.link(values)).exp()).exp_m1();
        cloglog.clamp(PROB_EPS, 1.0 - PROB_EPS)
    }

    pub fn nonzero_coefficients(&self) -> usize {
        self.coefficients.iter().filter(|&&b| b != 0.0).count()
    }

    /// Prediction surface over `stack` named `name`. Layers are matched to
    /// features by name; a cell with any missing predictor is NaN.
    pub fn predict_stack(&self, stack: &RasterStack, name: &str) -> Result<RasterLayer> {
        let ordered = stack.select(&self.feature_names)?;
        let grid = *ordered.grid();
        let mut out = RasterLayer::new(name, grid, f32::NAN);
        for row in 0..grid.height {
            for col in 0..grid.width {
                if let Some(values) = ordered.values_at(row, col) {
                    out.set(row, col, self.predict(&values) as f32);
                }
            }
        }
        Ok(out)
    }
}

/// Fit the model to every row of `table`.
pub fn fit(table: &TrainingTable, settings: &ModelSettings) -> Result<MaxentModel> {
    let beta = settings.regularization;
    if !(beta > 0.0 && beta.is_finite()) {
        return Err(Error::DegenerateModel(format!(
            "regularization multiplier {beta} must be positive and finite"
        )));
    }
    let n_p = table.presence_count();
    let n_b = table.background_count();
    if n_p == 0 || n_b == 0 {
        return Err(Error::InsufficientData {
            what: "model fit (presence and background rows)".into(),
            found: n_p.min(n_b),
            required: 1,
        });
    }

    let p = table.feature_names.len();
    let rows = &table.rows;
    let mut warnings = Vec::new();
    let mut min = vec![f64::INFINITY; p];
    let mut max = vec![f64::NEG_INFINITY; p];
    for row in rows {
        for (j, &v) in row.values.iter().enumerate() {
            min[j] = min[j].min(v);
            max[j] = max[j].max(v);
        }
    }

    let mut active = vec![true; p];
    for j in 0..p {
        if !(max[j] > min[j]) {
            warn!("feature `{}` has zero variance; excluded from fit", table.feature_names[j]);
            warnings.push(ModelWarning::ZeroVariance { feature: table.feature_names[j].clone() });
            active[j] = false;
        }
    }
    if !active.iter().any(|&a| a) {
        return Err(Error::DegenerateModel("no predictor varies over the fitting rows".into()));
    }

    let n = rows.len();
    let x = Array2::from_shape_fn((n, p), |(i, j)| {
        let range = max[j] - min[j];
        if range > 0.0 {
            (rows[i].values[j] - min[j]) / range
        } else {
            0.0
        }
    });
    let y: Array1<f64> = rows.iter().map(|r| f64::from(r.label)).collect();
    let weights: Array1<f64> = rows
        .iter()
        .map(|r| if r.is_presence() { 1.0 } else { BACKGROUND_WEIGHT })
        .collect();
    let total_weight = weights.sum();

    let presence: Vec<usize> = (0..n).filter(|&i| rows[i].is_presence()).collect();
    let t = interpolate(&LINEAR_KNOTS, n_p as f64);
    let lambda: Array1<f64> = x
        .columns()
        .into_iter()
        .map(|col| {
            let spread = sample_sd(presence.iter().map(|&i| col[i]));
            let r_j = spread.max(MIN_SPREAD) * t / (n_p as f64).sqrt();
            beta * r_j * n_p as f64 / total_weight
        })
        .collect();

    let problem = Problem {
        x: x.view(),
        y: y.view(),
        weights: weights.view(),
        lambda: lambda.view(),
        active: &active,
    };
    let solution = solver::solve(&problem, &settings.solver);
    if !solution.converged {
        warn!("solver stopped after {} iterations without converging", solution.iterations);
        warnings.push(ModelWarning::NotConverged { iterations: solution.iterations });
    }
    if solution.beta.iter().any(|b| !b.is_finite()) {
        return Err(Error::DegenerateModel("non-finite coefficients".into()));
    }

    // Normaliser and entropy over the fitting background.
    let eta = x.dot(&solution.beta);
    let links: Vec<f64> = (0..n).filter(|&i| !rows[i].is_presence()).map(|i| eta[i]).collect();
    let alpha = -log_sum_exp(&links);
    let entropy: f64 = -links
        .iter()
        .map(|l| {
            let log_raw = l + alpha;
            log_raw.exp() * log_raw
        })
        .sum::<f64>();
    if !(alpha.is_finite() && entropy.is_finite()) {
        return Err(Error::DegenerateModel(format!(
            "normaliser {alpha} / entropy {entropy} not finite"
        )));
    }

    debug!(
        "fit: {n_p} presence, {n_b} background, λ = {lambda:?}, β = {:?}",
        solution.beta
    );
    Ok(MaxentModel {
        feature_names: table.feature_names.clone(),
        feature_class: settings.feature_class,
        min,
        max,
        coefficients: solution.beta.to_vec(),
        intercept: solution.intercept,
        alpha,
        entropy,
        regularization: beta,
        warnings,
    })
}

/// Full-data refit and its prediction surface.
#[derive(Debug, Clone)]
pub struct FullFit {
    pub model: MaxentModel,
    pub surface: RasterLayer,
    /// AUC of the model on its own training rows.
    pub training_auc: Option<f64>,
}

/// Fit once on every row and predict over `stack`.
pub fn fit_full(table: &TrainingTable, stack: &RasterStack, settings: &ModelSettings) -> Result<FullFit> {
    let model = fit(table, settings)?;
    let surface = model.predict_stack(stack, "cloglog_full")?;
    let labels: Vec<u8> = table.rows.iter().map(|r| r.label).collect();
    let scores: Vec<f64> = table.rows.iter().map(|r| model.predict(&r.values)).collect();
    let training_auc = auc(&labels, &scores);
    info!(
        "full refit (β = {}): {} non-zero coefficients, training AUC {}",
        model.regularization,
        model.nonzero_coefficients(),
        training_auc.map_or("n/a".to_string(), |a| format!("{a:.3}"))
    );
    Ok(FullFit { model, surface, training_auc })
}
