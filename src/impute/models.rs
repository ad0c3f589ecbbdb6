//! Conditional-model fits used inside the chained-equations sweep.
//!
//! Three fitting routines, one per [`crate::config::ConditionalModelSpec`]
//! variant: a Bayesian-draw linear regression feeding predictive mean
//! matching, a binary logistic IRLS, and a baseline-category multinomial
//! logit built from pairwise logistic fits. All design matrices arrive with
//! an explicit intercept column; all failures surface as [`ModelError`] so
//! the engine can attach variable/iteration/replicate context.

use ndarray::{Array1, Array2};
use ndarray_linalg::cholesky::Cholesky;
use ndarray_linalg::UPLO;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{ChiSquared, Distribution, StandardNormal};
use thiserror::Error;

/// Relative ridge added to normal-equation diagonals, as chained-equation
/// implementations conventionally do to survive collinear predictor sets.
const RIDGE: f64 = 1e-5;
const MAX_IRLS_ITERATIONS: usize = 25;
const IRLS_TOLERANCE: f64 = 1e-8;
/// Coefficient magnitude beyond which a logistic fit is treated as separated.
const SEPARATION_BOUND: f64 = 50.0;
const PROBABILITY_FLOOR: f64 = 1e-10;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("cholesky factorization failed (degenerate predictor set)")]
    Factorization,
    #[error("non-finite coefficients during fit")]
    NonFinite,
    #[error("coefficients diverged (separation in the target)")]
    Separation,
    #[error("target has a single observed class")]
    SingleClass,
    #[error("categorical level {0} has no observed rows")]
    EmptyLevel(usize),
    #[error("not enough observed rows ({rows}) for {params} parameters")]
    TooFewRows { rows: usize, params: usize },
}

fn ridged(mut xtx: Array2<f64>) -> Array2<f64> {
    let scale = xtx
        .diag()
        .iter()
        .fold(0.0f64, |acc, &d| acc.max(d.abs()))
        .max(1.0);
    for i in 0..xtx.nrows() {
        xtx[[i, i]] += RIDGE * scale;
    }
    xtx
}

fn cholesky_lower(a: &Array2<f64>) -> Result<Array2<f64>, ModelError> {
    a.cholesky(UPLO::Lower).map_err(|_| ModelError::Factorization)
}

/// Solves L w = b by forward substitution.
fn solve_lower(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut w = Array1::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[[i, j]] * w[j];
        }
        w[i] = sum / l[[i, i]];
    }
    w
}

/// Solves L^T x = b by back substitution.
fn solve_lower_transpose(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= l[[j, i]] * x[j];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    solve_lower_transpose(l, &solve_lower(l, b))
}

fn check_finite(beta: &Array1<f64>) -> Result<(), ModelError> {
    if beta.iter().all(|b| b.is_finite()) {
        Ok(())
    } else {
        Err(ModelError::NonFinite)
    }
}

/// Bayesian linear regression draw followed by predictive mean matching.
///
/// The regression is fit on the observed rows; coefficients for predicting
/// the missing rows are drawn from the approximate posterior (scaled
/// inverse-chi-squared variance, Gaussian coefficients). Each missing row is
/// then matched to the `donors` observed rows with the closest fitted means
/// and inherits one donor's observed value, so imputations are always values
/// that actually occur in the data.
pub fn impute_pmm(
    x_obs: &Array2<f64>,
    y_obs: &Array1<f64>,
    x_mis: &Array2<f64>,
    donors: usize,
    rng: &mut StdRng,
) -> Result<Vec<f64>, ModelError> {
    let n = x_obs.nrows();
    let p = x_obs.ncols();
    if n <= p {
        return Err(ModelError::TooFewRows { rows: n, params: p });
    }

    let xtx = ridged(x_obs.t().dot(x_obs));
    let xty = x_obs.t().dot(y_obs);
    let l = cholesky_lower(&xtx)?;
    let beta_hat = cholesky_solve(&l, &xty);
    check_finite(&beta_hat)?;

    let residuals = y_obs - &x_obs.dot(&beta_hat);
    let rss = residuals.dot(&residuals);
    let df = (n - p) as f64;
    // Scaled inverse-chi-squared draw for the residual variance.
    let chi = ChiSquared::new(df).map_err(|_| ModelError::Factorization)?;
    let sigma2 = rss / chi.sample(rng).max(f64::MIN_POSITIVE);
    let sigma = sigma2.sqrt();

    let z = Array1::from_iter((0..p).map(|_| rng.sample::<f64, _>(StandardNormal)));
    let beta_draw = &beta_hat + &(solve_lower_transpose(&l, &z) * sigma);
    check_finite(&beta_draw)?;

    let fitted_obs = x_obs.dot(&beta_hat);
    let fitted_mis = x_mis.dot(&beta_draw);

    let pool = donors.max(1).min(n);
    let mut values = Vec::with_capacity(x_mis.nrows());
    for &target in fitted_mis.iter() {
        let mut ranked: Vec<(f64, usize)> = fitted_obs
            .iter()
            .enumerate()
            .map(|(i, &fit)| ((fit - target).abs(), i))
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        let donor = ranked[rng.gen_range(0..pool)].1;
        values.push(y_obs[donor]);
    }
    Ok(values)
}

/// Logistic regression coefficients via iteratively reweighted least squares.
fn fit_logistic(
    x: &Array2<f64>,
    y: &Array1<f64>,
    rows: usize,
) -> Result<Array1<f64>, ModelError> {
    let p = x.ncols();
    let ones = y.iter().filter(|&&v| v == 1.0).count();
    if ones == 0 || ones == rows {
        return Err(ModelError::SingleClass);
    }

    let mut beta: Array1<f64> = Array1::zeros(p);
    for _ in 0..MAX_IRLS_ITERATIONS {
        let eta = x.dot(&beta);
        let prob = eta.mapv(|e| {
            (1.0 / (1.0 + (-e).exp())).clamp(PROBABILITY_FLOOR, 1.0 - PROBABILITY_FLOOR)
        });
        let weight = prob.mapv(|pi| (pi * (1.0 - pi)).max(PROBABILITY_FLOOR));
        let working = &eta + &((y - &prob) / &weight);

        let mut xw = x.to_owned();
        for (i, mut row) in xw.outer_iter_mut().enumerate() {
            row.mapv_inplace(|v| v * weight[i]);
        }
        let xtwx = ridged(x.t().dot(&xw));
        let xtwz = xw.t().dot(&working);
        let l = cholesky_lower(&xtwx)?;
        let next = cholesky_solve(&l, &xtwz);
        check_finite(&next)?;

        let step = (&next - &beta).iter().fold(0.0f64, |acc, d| acc.max(d.abs()));
        beta = next;
        if step < IRLS_TOLERANCE {
            break;
        }
    }

    if beta.iter().any(|b| b.abs() > SEPARATION_BOUND) {
        return Err(ModelError::Separation);
    }
    Ok(beta)
}

/// Binary-logistic imputation: fit on observed rows, Bernoulli draw from the
/// fitted probability for each missing row.
pub fn impute_binary_logistic(
    x_obs: &Array2<f64>,
    y_obs: &Array1<f64>,
    x_mis: &Array2<f64>,
    rng: &mut StdRng,
) -> Result<Vec<f64>, ModelError> {
    let beta = fit_logistic(x_obs, y_obs, x_obs.nrows())?;
    let eta = x_mis.dot(&beta);
    Ok(eta
        .iter()
        .map(|&e| {
            let prob = 1.0 / (1.0 + (-e).exp());
            if rng.gen_range(0.0..1.0) < prob { 1.0 } else { 0.0 }
        })
        .collect())
}

/// Multinomial imputation via baseline-category logits.
///
/// One logistic fit per non-baseline level (level k vs level 0, restricted
/// to rows in either class), combined with softmax normalization; the draw
/// is categorical over the fitted probabilities.
pub fn impute_multinomial(
    x_obs: &Array2<f64>,
    y_obs: &Array1<f64>,
    x_mis: &Array2<f64>,
    levels: usize,
    rng: &mut StdRng,
) -> Result<Vec<f64>, ModelError> {
    let n = x_obs.nrows();
    for level in 0..levels {
        if !y_obs.iter().any(|&v| v == level as f64) {
            return Err(ModelError::EmptyLevel(level));
        }
    }

    let mut betas: Vec<Array1<f64>> = Vec::with_capacity(levels - 1);
    for level in 1..levels {
        let rows: Vec<usize> = (0..n)
            .filter(|&i| y_obs[i] == 0.0 || y_obs[i] == level as f64)
            .collect();
        let mut x_sub = Array2::zeros((rows.len(), x_obs.ncols()));
        let mut y_sub = Array1::zeros(rows.len());
        for (r, &i) in rows.iter().enumerate() {
            x_sub.row_mut(r).assign(&x_obs.row(i));
            y_sub[r] = if y_obs[i] == level as f64 { 1.0 } else { 0.0 };
        }
        betas.push(fit_logistic(&x_sub, &y_sub, rows.len())?);
    }

    let mut values = Vec::with_capacity(x_mis.nrows());
    for row in x_mis.outer_iter() {
        let mut logits = Vec::with_capacity(levels);
        logits.push(0.0);
        for beta in &betas {
            logits.push(row.dot(beta));
        }
        // Shift by the max logit so no exponential can overflow.
        let max = logits.iter().fold(f64::NEG_INFINITY, |acc, &l| acc.max(l));
        let weights: Vec<f64> = logits.iter().map(|&l| (l - max).exp()).collect();
        let total: f64 = weights.iter().sum();
        let mut draw = rng.gen_range(0.0..1.0) * total;
        let mut level = levels - 1;
        for (k, &w) in weights.iter().enumerate() {
            if draw < w {
                level = k;
                break;
            }
            draw -= w;
        }
        values.push(level as f64);
    }
    Ok(values)
}
