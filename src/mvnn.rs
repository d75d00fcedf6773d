//! Multivariate noise normalisation (MVNN).
//!
//! For one session:
//!
//! ```text
//! for partition in [test, training]:
//!     for condition in partition:
//!         Σ_cond = mean over time samples  (time mode)   of cov([reps, ch])
//!                  mean over repetitions   (epoch mode)  of cov([times, ch])
//!     Σ_part = mean over conditions of Σ_cond
//! Σ = (Σ_test + Σ_training) / 2
//! W = Σ^(-1/2)
//! epoch[c, r] ← Wᵀ · epoch[c, r]          for both partitions
//! ```
//!
//! One `W` per session, shared by every condition of both partitions, so
//! stimulus-driven covariance is averaged out and only the shared sensor
//! noise structure is removed.
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array2, Array4, Axis};

use crate::config::MvnnDim;
use crate::covariance::CovarianceEstimator;
use crate::error::{PipelineError, Result};

/// Eigenvalues at or below `max(λ) · RCOND` make Σ unusable for inversion.
const RCOND: f64 = 1e-12;

/// Mean channel covariance of one partition's [conditions, reps, ch, times] tensor.
pub fn partition_covariance<E: CovarianceEstimator + ?Sized>(
    data: &Array4<f64>,
    dim: MvnnDim,
    estimator: &E,
) -> Result<Array2<f64>> {
    let (n_cond, n_reps, n_ch, n_t) = data.dim();
    let n_obs = match dim {
        MvnnDim::Time => n_t,
        MvnnDim::Epochs => n_reps,
    };
    if n_cond == 0 || n_obs == 0 {
        return Err(PipelineError::NumericalInstability(format!(
            "no observations to estimate covariance from (tensor shape {:?})",
            data.shape()
        )));
    }

    let mut sigma = Array2::<f64>::zeros((n_ch, n_ch));
    for cond in data.axis_iter(Axis(0)) {
        // cond: [reps, ch, times]
        let mut sigma_cond = Array2::<f64>::zeros((n_ch, n_ch));
        match dim {
            MvnnDim::Time => {
                for t in 0..n_t {
                    sigma_cond += &estimator.covariance(cond.index_axis(Axis(2), t));
                }
            }
            MvnnDim::Epochs => {
                for epoch in cond.axis_iter(Axis(0)) {
                    sigma_cond += &estimator.covariance(epoch.t());
                }
            }
        }
        sigma += &(sigma_cond / n_obs as f64);
    }
    Ok(sigma / n_cond as f64)
}

/// Session covariance: the mean of the test and training partition covariances.
pub fn session_covariance<E: CovarianceEstimator + ?Sized>(
    test: &Array4<f64>,
    train: &Array4<f64>,
    dim: MvnnDim,
    estimator: &E,
) -> Result<Array2<f64>> {
    let (_, _, ch_a, t_a) = test.dim();
    let (_, _, ch_b, t_b) = train.dim();
    if ch_a != ch_b || t_a != t_b {
        return Err(PipelineError::ShapeMismatch(format!(
            "test epochs are {ch_a} ch × {t_a} samples, training epochs are {ch_b} ch × {t_b} samples"
        )));
    }
    let s_test = partition_covariance(test, dim, estimator)?;
    let s_train = partition_covariance(train, dim, estimator)?;
    Ok((s_test + s_train) / 2.0)
}

/// Inverse principal square root `Σ^(-1/2)` of a symmetric positive-definite matrix.
pub fn inverse_sqrt(sigma: &Array2<f64>) -> Result<Array2<f64>> {
    let (n, m) = sigma.dim();
    if n != m || n == 0 {
        return Err(PipelineError::ShapeMismatch(format!(
            "covariance must be square and non-empty, got {n}×{m}"
        )));
    }
    let mat = DMatrix::from_fn(n, n, |i, j| 0.5 * (sigma[[i, j]] + sigma[[j, i]]));
    let eig = SymmetricEigen::new(mat);

    let max = eig.eigenvalues.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if !eig.eigenvalues.iter().all(|l| l.is_finite()) || !(max > 0.0) {
        return Err(PipelineError::NumericalInstability(
            "covariance has no positive finite spectrum".into(),
        ));
    }
    let min = eig.eigenvalues.iter().cloned().fold(f64::INFINITY, f64::min);
    if min <= max * RCOND {
        return Err(PipelineError::NumericalInstability(format!(
            "covariance is singular (eigenvalues in [{min:.3e}, {max:.3e}])"
        )));
    }

    let inv_sqrt = eig.eigenvalues.map(|l| 1.0 / l.sqrt());
    let v = &eig.eigenvectors;
    let w = v * DMatrix::from_diagonal(&inv_sqrt) * v.transpose();
    Ok(Array2::from_shape_fn((n, n), |(i, j)| 0.5 * (w[(i, j)] + w[(j, i)])))
}

/// Apply `w` to the channel axis of every epoch: `epoch ← wᵀ · epoch`.
pub fn whiten(data: &Array4<f64>, w: &Array2<f64>) -> Array4<f64> {
    let mut out = Array4::<f64>::zeros(data.raw_dim());
    for (src_c, mut dst_c) in data.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
        for (src, mut dst) in src_c.axis_iter(Axis(0)).zip(dst_c.axis_iter_mut(Axis(0))) {
            dst.assign(&w.t().dot(&src));
        }
    }
    out
}

/// Whiten one session's test and training tensors with a single shared transform.
pub fn mvnn<E: CovarianceEstimator + ?Sized>(
    test: &Array4<f64>,
    train: &Array4<f64>,
    dim: MvnnDim,
    estimator: &E,
) -> Result<(Array4<f64>, Array4<f64>)> {
    let sigma = session_covariance(test, train, dim, estimator)?;
    let w = inverse_sqrt(&sigma)?;
    Ok((whiten(test, &w), whiten(train, &w)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Shrinkage;
    use ndarray::array;

    fn tensor(n_cond: usize, n_reps: usize, n_ch: usize, n_t: usize, seed: f64) -> Array4<f64> {
        Array4::from_shape_fn((n_cond, n_reps, n_ch, n_t), |(c, r, ch, t)| {
            let x = (c * 31 + r * 17 + t * 3) as f64 * seed;
            x.sin() * (ch + 1) as f64 + 0.5 * (x * 1.7 + ch as f64).cos()
        })
    }

    #[test]
    fn inverse_sqrt_squares_to_inverse() {
        let sigma = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let w = inverse_sqrt(&sigma).unwrap();
        let prod = w.dot(&w).dot(&sigma);
        for i in 0..3 {
            for j in 0..3 {
                approx::assert_abs_diff_eq!(w[[i, j]], w[[j, i]], epsilon = 1e-12);
                let eye = if i == j { 1.0 } else { 0.0 };
                approx::assert_abs_diff_eq!(prod[[i, j]], eye, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn inverse_sqrt_of_diagonal() {
        let w = inverse_sqrt(&array![[4.0, 0.0], [0.0, 0.25]]).unwrap();
        approx::assert_abs_diff_eq!(w[[0, 0]], 0.5, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(w[[1, 1]], 2.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(w[[0, 1]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn singular_covariance_is_unstable() {
        let err = inverse_sqrt(&array![[1.0, 1.0], [1.0, 1.0]]).unwrap_err();
        assert!(matches!(err, PipelineError::NumericalInstability(_)));
        let err = inverse_sqrt(&Array2::zeros((3, 3))).unwrap_err();
        assert!(matches!(err, PipelineError::NumericalInstability(_)));
    }

    #[test]
    fn whitening_preserves_shape() {
        let test = tensor(3, 5, 4, 12, 0.13);
        let train = tensor(6, 2, 4, 12, 0.29);
        for dim in [MvnnDim::Time, MvnnDim::Epochs] {
            let (wt, wr) = mvnn(&test, &train, dim, &Shrinkage::Auto).unwrap();
            assert_eq!(wt.shape(), test.shape());
            assert_eq!(wr.shape(), train.shape());
        }
    }

    #[test]
    fn identity_whitening_is_noop() {
        let data = tensor(2, 3, 4, 5, 0.7);
        let out = whiten(&data, &Array2::eye(4));
        assert_eq!(out, data);
    }

    #[test]
    fn whitening_mixes_channels_by_transpose() {
        // Single epoch, 2 channels × 1 sample: out = wᵀ · x.
        let data = Array4::from_shape_vec((1, 1, 2, 1), vec![1.0, 2.0]).unwrap();
        let w = array![[1.0, 3.0], [0.0, 1.0]];
        let out = whiten(&data, &w);
        assert_eq!(out[[0, 0, 0, 0]], 1.0);
        assert_eq!(out[[0, 0, 1, 0]], 5.0);
    }

    #[test]
    fn epoch_mode_whitened_covariance_is_near_identity() {
        // With no shrinkage and one condition, the pooled epoch-mode covariance
        // of the whitened data is exactly the identity.
        let test = tensor(1, 4, 3, 50, 0.21);
        let train = tensor(1, 4, 3, 50, 0.37);
        let est = Shrinkage::None;
        let (wt, wr) = mvnn(&test, &train, MvnnDim::Epochs, &est).unwrap();
        let s = session_covariance(&wt, &wr, MvnnDim::Epochs, &est).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let eye = if i == j { 1.0 } else { 0.0 };
                approx::assert_abs_diff_eq!(s[[i, j]], eye, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn mismatched_channels_rejected() {
        let test = tensor(1, 2, 3, 10, 0.1);
        let train = tensor(1, 2, 4, 10, 0.1);
        let err = mvnn(&test, &train, MvnnDim::Epochs, &Shrinkage::Auto).unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch(_)));
    }

    #[test]
    fn single_repetition_time_mode_is_unstable() {
        // One repetition per condition: every per-time covariance is zero.
        let test = tensor(2, 1, 3, 8, 0.3);
        let train = tensor(2, 1, 3, 8, 0.5);
        let err = mvnn(&test, &train, MvnnDim::Time, &Shrinkage::Auto).unwrap_err();
        assert!(matches!(err, PipelineError::NumericalInstability(_)));
    }
}
