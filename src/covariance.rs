//! Covariance estimators for multivariate noise normalisation.
//!
//! Inputs are `[n_samples, n_features]` observation matrices; outputs are
//! `[n_features, n_features]`.  All estimators centre the data and use the
//! biased (`1/n`) normalisation.
//!
//! [`Shrinkage::Auto`] matches scikit-learn's LDA helper `_cov(X, 'auto')`:
//!   1. standardise every feature (zero-variance features keep unit scale),
//!   2. Ledoit–Wolf shrinkage on the standardised data,
//!   3. rescale back: `Σ = D · Σ_std · D` with `D = diag(std)`.
use ndarray::{Array1, Array2, ArrayView2, Axis};

use crate::config::Shrinkage;

/// Anything that maps observations to a channel × channel covariance matrix.
pub trait CovarianceEstimator {
    fn covariance(&self, x: ArrayView2<'_, f64>) -> Array2<f64>;
}

impl CovarianceEstimator for Shrinkage {
    fn covariance(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        match *self {
            Shrinkage::Auto => ledoit_wolf_standardized(x),
            Shrinkage::Fixed(alpha) => shrunk_covariance(&empirical_covariance(x), alpha),
            Shrinkage::None => empirical_covariance(x),
        }
    }
}

fn centered(x: ArrayView2<'_, f64>) -> Array2<f64> {
    let n_features = x.ncols();
    let mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(n_features));
    &x - &mean
}

/// Maximum-likelihood covariance, `Xcᵀ Xc / n`.
pub fn empirical_covariance(x: ArrayView2<'_, f64>) -> Array2<f64> {
    let n = x.nrows();
    if n == 0 {
        return Array2::zeros((x.ncols(), x.ncols()));
    }
    let xc = centered(x);
    xc.t().dot(&xc) / n as f64
}

/// `(1 − α)·S + α·(tr S / p)·I`
pub fn shrunk_covariance(emp: &Array2<f64>, alpha: f64) -> Array2<f64> {
    let p = emp.nrows();
    if p == 0 {
        return emp.clone();
    }
    let mu = emp.diag().sum() / p as f64;
    let mut out = emp * (1.0 - alpha);
    for i in 0..p {
        out[[i, i]] += alpha * mu;
    }
    out
}

/// Ledoit–Wolf optimal shrinkage intensity for `x` (centred internally).
///
/// Single-feature inputs need no shrinkage and return `0`.
pub fn ledoit_wolf_shrinkage(x: ArrayView2<'_, f64>) -> f64 {
    let (n, p) = x.dim();
    if p <= 1 || n == 0 {
        return 0.0;
    }
    let (nf, pf) = (n as f64, p as f64);
    let xc = centered(x);
    let x2 = xc.mapv(|v| v * v);

    let emp_cov_trace = x2.sum_axis(Axis(0)) / nf;
    let trace_sum = emp_cov_trace.sum();
    let mu = trace_sum / pf;

    let beta_ = x2.t().dot(&x2).sum();
    let delta_ = xc.t().dot(&xc).mapv(|v| v * v).sum() / (nf * nf);

    let beta = (beta_ / nf - delta_) / (pf * nf);
    let delta = (delta_ - 2.0 * mu * trace_sum + pf * mu * mu) / pf;
    let beta = beta.min(delta);
    if beta == 0.0 {
        0.0
    } else {
        beta / delta
    }
}

/// Ledoit–Wolf shrunk covariance of `x`.
pub fn ledoit_wolf(x: ArrayView2<'_, f64>) -> (Array2<f64>, f64) {
    if x.ncols() == 1 {
        return (empirical_covariance(x), 0.0);
    }
    let shrinkage = ledoit_wolf_shrinkage(x);
    (shrunk_covariance(&empirical_covariance(x), shrinkage), shrinkage)
}

fn ledoit_wolf_standardized(x: ArrayView2<'_, f64>) -> Array2<f64> {
    let xc = centered(x);
    let n = xc.nrows().max(1) as f64;
    let scale: Array1<f64> = xc
        .map_axis(Axis(0), |col| (col.iter().map(|v| v * v).sum::<f64>() / n).sqrt())
        .mapv(|s| if s == 0.0 { 1.0 } else { s });
    let standardized = &xc / &scale;

    let (s, shrinkage) = ledoit_wolf(standardized.view());
    tracing::trace!("ledoit-wolf shrinkage {shrinkage:.4}");

    let d_col = scale.view().insert_axis(Axis(1));
    let d_row = scale.view().insert_axis(Axis(0));
    &(&d_col * &s) * &d_row
}
