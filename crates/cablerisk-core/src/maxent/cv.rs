//! k-fold cross-validation of the density model.
//!
//! Presence and background rows are split into folds independently. Each
//! fold's model is fit on the other folds, scored on its own rows (AUC) and
//! projected over the full stack; the reported surface is the cell-wise mean
//! of the fold surfaces.

use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

#[cfg(feature = "threading")]
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::features::TrainingTable;
use crate::raster::{RasterLayer, RasterStack};

use super::{auc, fit, ModelSettings, ModelWarning};

/// Salt separating the fold shuffle stream from other uses of the run seed.
const FOLD_SALT: u64 = 0x6F1D_C0FF_EE5E_ED42;
/// Lloyd iterations for spatial folds.
const KMEANS_ITERATIONS: usize = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldStrategy {
    /// Seeded shuffle, rows dealt round-robin.
    #[default]
    Random,
    /// Spatially contiguous folds from k-means on the row coordinates.
    Spatial,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CvSettings {
    pub folds: usize,
    pub strategy: FoldStrategy,
    pub seed: u64,
}

impl Default for CvSettings {
    fn default() -> Self {
        Self { folds: 4, strategy: FoldStrategy::Random, seed: 42 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldReport {
    pub fold: usize,
    pub train_presence: usize,
    pub train_background: usize,
    pub test_presence: usize,
    pub test_background: usize,
    /// Held-out AUC.
    pub test_auc: Option<f64>,
    pub nonzero_coefficients: usize,
    pub warnings: Vec<ModelWarning>,
}

#[derive(Debug, Clone)]
pub struct CrossValidation {
    /// Cell-wise mean of `fold_surfaces`.
    pub surface: RasterLayer,
    pub fold_surfaces: Vec<RasterLayer>,
    pub folds: Vec<FoldReport>,
    pub mean_auc: Option<f64>,
}

impl CrossValidation {
    pub fn warnings(&self) -> impl Iterator<Item = (usize, &ModelWarning)> {
        self.folds
            .iter()
            .flat_map(|f| f.warnings.iter().map(move |w| (f.fold, w)))
    }
}

// ── Fold assignment ──────────────────────────────────────────────────────────

/// Fold index for every row of `table`.
pub fn assign_folds(table: &TrainingTable, settings: &CvSettings) -> Result<Vec<usize>> {
    let k = settings.folds;
    let n_p = table.presence_count();
    if k < 2 || n_p < k {
        return Err(Error::InsufficientData {
            what: format!("{k}-fold cross-validation (presence rows)"),
            found: n_p,
            required: k.max(2),
        });
    }

    let presence: Vec<usize> = (0..table.len()).filter(|&i| table.rows[i].is_presence()).collect();
    let background: Vec<usize> = (0..table.len()).filter(|&i| !table.rows[i].is_presence()).collect();
    let mut folds = vec![0usize; table.len()];

    match settings.strategy {
        FoldStrategy::Random => {
            let mut rng = StdRng::seed_from_u64(settings.seed ^ FOLD_SALT);
            for mut group in [presence, background] {
                group.shuffle(&mut rng);
                for (pos, &i) in group.iter().enumerate() {
                    folds[i] = pos % k;
                }
            }
        }
        FoldStrategy::Spatial => {
            let coords = |group: &[usize]| -> Vec<[f64; 2]> {
                group.iter().map(|&i| [table.rows[i].x, table.rows[i].y]).collect()
            };
            let p_coords = coords(&presence);
            let centres = farthest_point_centres(&p_coords, k);
            let (p_labels, centres) = kmeans(&p_coords, centres);
            // Background clusters start from the presence centres so fold j
            // covers the same area in both groups.
            let (b_labels, _) = kmeans(&coords(&background), centres);
            for (&i, &f) in presence.iter().zip(&p_labels).chain(background.iter().zip(&b_labels)) {
                folds[i] = f;
            }
        }
    }

    for fold in 0..k {
        let count = |presence: bool, inside: bool| {
            table
                .rows
                .iter()
                .zip(&folds)
                .filter(|(r, f)| r.is_presence() == presence && (**f == fold) == inside)
                .count()
        };
        for (presence, inside, side) in [
            (true, true, "held-out presence"),
            (false, true, "held-out background"),
            (true, false, "training presence"),
            (false, false, "training background"),
        ] {
            let found = count(presence, inside);
            if found == 0 {
                return Err(Error::InsufficientData {
                    what: format!("fold {fold} {side} rows"),
                    found,
                    required: 1,
                });
            }
        }
    }
    Ok(folds)
}

/// k initial centres: the lowest (x, y) point, then repeatedly the point
/// farthest from every chosen centre. Ties go to the lower index.
fn farthest_point_centres(points: &[[f64; 2]], k: usize) -> Vec<[f64; 2]> {
    let mut centres: Vec<[f64; 2]> = Vec::with_capacity(k);
    let Some(first) = points
        .iter()
        .min_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])))
    else {
        return centres;
    };
    centres.push(*first);
    let mut nearest: Vec<f64> = points.iter().map(|p| dist2(p, first)).collect();
    while centres.len() < k {
        let mut best = 0;
        for (i, &d) in nearest.iter().enumerate() {
            if d > nearest[best] {
                best = i;
            }
        }
        let c = points[best];
        centres.push(c);
        for (n, p) in nearest.iter_mut().zip(points) {
            *n = n.min(dist2(p, &c));
        }
    }
    centres
}

#[inline]
fn dist2(a: &[f64; 2], b: &[f64; 2]) -> f64 {
    (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)
}

fn nearest_centre(p: &[f64; 2], centres: &[[f64; 2]]) -> usize {
    let mut best = 0;
    for (j, c) in centres.iter().enumerate() {
        if dist2(p, c) < dist2(p, &centres[best]) {
            best = j;
        }
    }
    best
}

/// Lloyd's algorithm from the given centres. An emptied cluster keeps its
/// previous centre.
fn kmeans(points: &[[f64; 2]], mut centres: Vec<[f64; 2]>) -> (Vec<usize>, Vec<[f64; 2]>) {
    let mut labels: Vec<usize> = points.iter().map(|p| nearest_centre(p, &centres)).collect();
    for _ in 0..KMEANS_ITERATIONS {
        let mut sums = vec![[0.0f64; 3]; centres.len()];
        for (p, &l) in points.iter().zip(&labels) {
            sums[l][0] += p[0];
            sums[l][1] += p[1];
            sums[l][2] += 1.0;
        }
        for (c, s) in centres.iter_mut().zip(&sums) {
            if s[2] > 0.0 {
                *c = [s[0] / s[2], s[1] / s[2]];
            }
        }
        let next: Vec<usize> = points.iter().map(|p| nearest_centre(p, &centres)).collect();
        if next == labels {
            break;
        }
        labels = next;
    }
    (labels, centres)
}

// ── Cross-validation ─────────────────────────────────────────────────────────

struct FoldOutcome {
    report: FoldReport,
    surface: RasterLayer,
}

fn run_fold(
    fold: usize,
    folds: &[usize],
    table: &TrainingTable,
    stack: &RasterStack,
    model: &ModelSettings,
) -> Result<FoldOutcome> {
    let (test_idx, train_idx): (Vec<usize>, Vec<usize>) = (0..table.len()).partition(|&i| folds[i] == fold);
    let train = table.subset(&train_idx);
    let test = table.subset(&test_idx);

    let fitted = fit(&train, model)?;
    let labels: Vec<u8> = test.rows.iter().map(|r| r.label).collect();
    let scores: Vec<f64> = test.rows.iter().map(|r| fitted.predict(&r.values)).collect();
    let surface = fitted.predict_stack(stack, &format!("cloglog_fold{fold}"))?;

    Ok(FoldOutcome {
        report: FoldReport {
            fold,
            train_presence: train.presence_count(),
            train_background: train.background_count(),
            test_presence: test.presence_count(),
            test_background: test.background_count(),
            test_auc: auc(&labels, &scores),
            nonzero_coefficients: fitted.nonzero_coefficients(),
            warnings: fitted.warnings,
        },
        surface,
    })
}

/// Cell-wise arithmetic mean; NaN wherever any input is NaN.
fn mean_surface(name: &str, surfaces: &[RasterLayer]) -> RasterLayer {
    let grid = surfaces[0].grid;
    let k = surfaces.len() as f64;
    let data = (0..grid.len())
        .map(|i| {
            let sum: f64 = surfaces.iter().map(|s| f64::from(s.data[i])).sum();
            (sum / k) as f32
        })
        .collect();
    RasterLayer { name: name.to_string(), grid, data, nodata: None }
}

/// Run k-fold cross-validation of `table` and average the fold surfaces
/// over `stack`.
pub fn cross_validate(
    table: &TrainingTable,
    stack: &RasterStack,
    model: &ModelSettings,
    cv: &CvSettings,
) -> Result<CrossValidation> {
    let folds = assign_folds(table, cv)?;
    info!("{}-fold cross-validation ({:?} folds, β = {})", cv.folds, cv.strategy, model.regularization);

    #[cfg(feature = "threading")]
    let outcomes: Vec<Result<FoldOutcome>> = (0..cv.folds)
        .into_par_iter()
        .map(|f| run_fold(f, &folds, table, stack, model))
        .collect();
    #[cfg(not(feature = "threading"))]
    let outcomes: Vec<Result<FoldOutcome>> = (0..cv.folds)
        .map(|f| run_fold(f, &folds, table, stack, model))
        .collect();
    let outcomes = outcomes.into_iter().collect::<Result<Vec<_>>>()?;

    let (reports, fold_surfaces): (Vec<FoldReport>, Vec<RasterLayer>) =
        outcomes.into_iter().map(|o| (o.report, o.surface)).unzip();
    for r in &reports {
        for w in &r.warnings {
            warn!("fold {}: {w:?}", r.fold);
        }
    }
    let aucs: Vec<f64> = reports.iter().filter_map(|r| r.test_auc).collect();
    let mean_auc = (!aucs.is_empty()).then(|| aucs.iter().sum::<f64>() / aucs.len() as f64);
    info!(
        "cross-validation done: mean held-out AUC {}",
        mean_auc.map_or("n/a".to_string(), |a| format!("{a:.3}"))
    );

    Ok(CrossValidation {
        surface: mean_surface("cloglog_cv", &fold_surfaces),
        fold_surfaces,
        folds: reports,
        mean_auc,
    })
}
