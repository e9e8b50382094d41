//! L1-penalised weighted logistic regression.
//!
//! Minimises
//!
//! ```text
//!   (1/W) Σᵢ wᵢ [log(1 + e^ηᵢ) − yᵢ ηᵢ]  +  Σⱼ λⱼ |βⱼ|,     ηᵢ = b₀ + xᵢ·β
//! ```
//!
//! by IRLS: each outer iteration forms the weighted quadratic approximation
//! at the current η and minimises it by cyclic coordinate descent with
//! soft-thresholding (intercept unpenalised). A candidate that raises the
//! penalised objective is step-halved back toward the current iterate.

use log::debug;
use ndarray::{Array1, ArrayView1, ArrayView2, Zip};

/// Fitted probabilities are kept this far from 0 and 1 in the working weights.
const MU_EPS: f64 = 1e-8;
/// Maximum step halvings per outer iteration.
const MAX_HALVINGS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    pub max_outer: usize,
    pub max_inner: usize,
    /// Relative change in the penalised objective that ends the outer loop.
    pub tolerance: f64,
    /// Largest weighted coefficient move that ends a coordinate-descent pass.
    pub inner_tolerance: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self { max_outer: 100, max_inner: 200, tolerance: 1e-7, inner_tolerance: 1e-13 }
    }
}

/// Design matrix (one row per observation), responses, prior weights and
/// per-column penalties. Columns with `active[j] == false` keep a zero
/// coefficient.
pub struct Problem<'a> {
    pub x: ArrayView2<'a, f64>,
    pub y: ArrayView1<'a, f64>,
    pub weights: ArrayView1<'a, f64>,
    pub lambda: ArrayView1<'a, f64>,
    pub active: &'a [bool],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub intercept: f64,
    pub beta: Array1<f64>,
    pub iterations: usize,
    pub converged: bool,
    pub objective: f64,
}

/// log(1 + e^η) without overflow.
#[inline]
fn log1p_exp(eta: f64) -> f64 {
    if eta > 0.0 {
        eta + (-eta).exp().ln_1p()
    } else {
        eta.exp().ln_1p()
    }
}

#[inline]
fn sigmoid(eta: f64) -> f64 {
    if eta >= 0.0 {
        1.0 / (1.0 + (-eta).exp())
    } else {
        let e = eta.exp();
        e / (1.0 + e)
    }
}

#[inline]
fn soft_threshold(z: f64, gamma: f64) -> f64 {
    if z > gamma {
        z - gamma
    } else if z < -gamma {
        z + gamma
    } else {
        0.0
    }
}

impl Problem<'_> {
    fn eta(&self, intercept: f64, beta: &Array1<f64>) -> Array1<f64> {
        self.x.dot(beta) + intercept
    }

    /// Penalised objective with prior weights normalised to sum to one.
    pub fn objective(&self, intercept: f64, beta: &Array1<f64>) -> f64 {
        let eta = self.eta(intercept, beta);
        let loss = Zip::from(&eta)
            .and(&self.y)
            .and(&self.weights)
            .fold(0.0, |acc, &e, &y, &w| acc + w * (log1p_exp(e) - y * e))
            / self.weights.sum();
        let penalty = self.lambda.dot(&beta.mapv(f64::abs));
        loss + penalty
    }
}

/// Solve `problem` from a zero-coefficient start.
pub fn solve(problem: &Problem<'_>, settings: &SolverSettings) -> Solution {
    let (n, p) = problem.x.dim();
    let wn = &problem.weights / problem.weights.sum();

    // Start at the weighted-mean intercept.
    let ybar = wn.dot(&problem.y).clamp(MU_EPS, 1.0 - MU_EPS);
    let mut intercept = (ybar / (1.0 - ybar)).ln();
    let mut beta = Array1::<f64>::zeros(p);
    let mut objective = problem.objective(intercept, &beta);

    let mut converged = false;
    let mut iterations = 0;
    let mut v = Array1::<f64>::zeros(n);
    let mut r = Array1::<f64>::zeros(n);

    for outer in 0..settings.max_outer {
        iterations = outer + 1;

        // Quadratic approximation at the current iterate: weights v, residual
        // of the working response r = z − η.
        let eta = problem.eta(intercept, &beta);
        Zip::from(&mut v)
            .and(&mut r)
            .and(&eta)
            .and(&wn)
            .and(&problem.y)
            .for_each(|v, r, &e, &w, &y| {
                let mu = sigmoid(e).clamp(MU_EPS, 1.0 - MU_EPS);
                let var = mu * (1.0 - mu);
                *v = w * var;
                *r = (y - mu) / var;
            });
        let xv = problem.x.mapv(|x| x * x).t().dot(&v);
        let v_sum = v.sum();

        let mut b0 = intercept;
        let mut b = beta.clone();
        for _ in 0..settings.max_inner {
            let mut max_change = 0.0f64;
            for j in 0..p {
                if !problem.active[j] || xv[j] <= 0.0 {
                    continue;
                }
                let col = problem.x.column(j);
                let grad = Zip::from(&col)
                    .and(&v)
                    .and(&r)
                    .fold(0.0, |acc, &x, &w, &ri| acc + w * x * ri);
                let old = b[j];
                let new = soft_threshold(grad + xv[j] * old, problem.lambda[j]) / xv[j];
                let delta = new - old;
                if delta != 0.0 {
                    r.scaled_add(-delta, &col);
                    b[j] = new;
                    max_change = max_change.max(xv[j] * delta * delta);
                }
            }
            if v_sum > 0.0 {
                let delta = v.dot(&r) / v_sum;
                r -= delta;
                b0 += delta;
                max_change = max_change.max(v_sum * delta * delta);
            }
            if max_change < settings.inner_tolerance {
                break;
            }
        }

        // Step-halve toward the current iterate until the objective does not
        // rise beyond rounding.
        let slack = 1e-12 * objective.abs().max(1.0);
        let descends = |t: f64| t.is_finite() && t <= objective + slack;
        let mut trial = problem.objective(b0, &b);
        let mut halvings = 0;
        while !descends(trial) && halvings < MAX_HALVINGS {
            b0 = intercept + 0.5 * (b0 - intercept);
            b.zip_mut_with(&beta, |bj, &cur| *bj = cur + 0.5 * (*bj - cur));
            trial = problem.objective(b0, &b);
            halvings += 1;
        }
        if !descends(trial) {
            debug!("irls {outer}: no descent after {halvings} halvings, stopping");
            break;
        }

        let change = objective - trial;
        debug!("irls {outer}: objective {trial:.10e} (Δ {change:.3e}, {halvings} halvings)");
        intercept = b0;
        beta = b;
        objective = trial;
        if change <= settings.tolerance * objective.abs().max(settings.tolerance) {
            converged = true;
            break;
        }
    }

    Solution { intercept, beta, iterations, converged, objective }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    /// Five x levels; at level k, k+1 of 6 rows are positive.
    fn overlapping() -> (Array2<f64>, Array1<f64>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for k in 0..5 {
            for i in 0..6 {
                x.push(k as f64 / 4.0);
                y.push(if i <= k { 1.0 } else { 0.0 });
            }
        }
        (Array2::from_shape_vec((30, 1), x).unwrap(), Array1::from(y))
    }

    fn gradient(problem: &Problem<'_>, s: &Solution, j: usize) -> f64 {
        let eta = problem.eta(s.intercept, &s.beta);
        Zip::from(&eta)
            .and(&problem.y)
            .and(&problem.weights)
            .and(problem.x.column(j))
            .fold(0.0, |acc, &e, &y, &w, &x| acc + w * (sigmoid(e) - y) * x)
            / problem.weights.sum()
    }

    #[test]
    fn heavy_penalty_leaves_intercept_only() {
        let (x, y) = overlapping();
        let w = Array1::<f64>::ones(y.len());
        let lambda = array![1e3];
        let problem = Problem { x: x.view(), y: y.view(), weights: w.view(), lambda: lambda.view(), active: &[true] };
        let s = solve(&problem, &SolverSettings::default());
        assert_eq!(s.beta, array![0.0]);
        let mean: f64 = 15.0 / 30.0;
        assert_relative_eq!(s.intercept, (mean / (1.0 - mean)).ln(), epsilon = 1e-6);
    }

    #[test]
    fn light_penalty_satisfies_stationarity() {
        let (x, y) = overlapping();
        let w = y.mapv(|yi| if yi == 1.0 { 1.0 } else { 100.0 });
        let lambda = array![1e-4];
        let problem = Problem { x: x.view(), y: y.view(), weights: w.view(), lambda: lambda.view(), active: &[true] };
        let s = solve(&problem, &SolverSettings::default());
        assert!(s.converged);
        assert!(s.beta[0] > 0.0);
        // Subgradient condition for a non-zero coefficient: ∂loss/∂β = −λ·sign(β).
        assert_relative_eq!(gradient(&problem, &s, 0), -lambda[0], epsilon = 1e-5);
        assert!(s.objective <= problem.objective(s.intercept, &array![0.0]));
    }

    #[test]
    fn inactive_column_stays_zero() {
        let (x0, y) = overlapping();
        let x = Array2::from_shape_fn((30, 2), |(i, j)| if j == 0 { x0[[i, 0]] } else { 1.0 - x0[[i, 0]] });
        let w = Array1::<f64>::ones(y.len());
        let lambda = array![1e-3, 1e-3];
        let problem = Problem {
            x: x.view(),
            y: y.view(),
            weights: w.view(),
            lambda: lambda.view(),
            active: &[true, false],
        };
        let s = solve(&problem, &SolverSettings::default());
        assert_eq!(s.beta[1], 0.0);
        assert!(s.beta[0] > 0.0);
    }

    #[test]
    fn separable_data_stays_finite() {
        let x = array![[0.0], [0.05], [0.1], [0.6], [0.8], [1.0]];
        let y = array![1.0, 1.0, 1.0, 0.0, 0.0, 0.0];
        let w = array![1.0, 1.0, 1.0, 100.0, 100.0, 100.0];
        let lambda = array![1e-4];
        let problem = Problem { x: x.view(), y: y.view(), weights: w.view(), lambda: lambda.view(), active: &[true] };
        let s = solve(&problem, &SolverSettings::default());
        assert!(s.beta[0].is_finite() && s.beta[0] < 0.0);
        assert!(s.intercept.is_finite());
        assert!(s.objective.is_finite());
    }
}
