//! Epoch baseline correction.
//!
//! Matches `mne.Epochs(..., baseline=(None, 0))`:
//!   for each epoch and channel: epoch[ch, :] -= mean(epoch[ch, baseline])
//! where `baseline` covers every sample from the epoch start up to and
//! including time 0.
use ndarray::{s, Array3, Axis};
use std::ops::Range;

/// Per-epoch, per-channel baseline correction over the sample `range`.
/// `epochs`: [E, C, T]
///
/// An empty range leaves the data untouched.
pub fn baseline_correct_inplace(epochs: &mut Array3<f64>, range: Range<usize>) {
    let n_t = epochs.len_of(Axis(2));
    let range = range.start.min(n_t)..range.end.min(n_t);
    if range.is_empty() {
        return;
    }
    for mut epoch in epochs.axis_iter_mut(Axis(0)) {
        for mut row in epoch.axis_iter_mut(Axis(0)) {
            let m = row.slice(s![range.clone()]).mean().unwrap_or(0.0);
            row.mapv_inplace(|v| v - m);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn baseline_interval_mean_is_zero() {
        let mut epochs = Array3::from_shape_fn((3, 4, 100), |(e, c, t)| {
            e as f64 * 10.0 + c as f64 * 5.0 + (t as f64 * 0.3).sin()
        });
        baseline_correct_inplace(&mut epochs, 0..21);
        for e in 0..3usize {
            for c in 0..4usize {
                let m = epochs.slice(s![e, c, 0..21]).mean().unwrap();
                approx::assert_abs_diff_eq!(m, 0.0, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn post_onset_offset_survives() {
        // Step from 1 to 5 at sample 10: baseline [0, 10) removes 1.
        let mut epochs = Array3::from_shape_fn((1, 1, 20), |(_, _, t)| if t < 10 { 1.0 } else { 5.0 });
        baseline_correct_inplace(&mut epochs, 0..10);
        approx::assert_abs_diff_eq!(epochs[[0, 0, 0]], 0.0, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(epochs[[0, 0, 15]], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn empty_range_is_noop() {
        let mut epochs = Array3::from_elem((2, 2, 8), 3.0);
        baseline_correct_inplace(&mut epochs, 4..4);
        assert!(epochs.iter().all(|&v| v == 3.0));
    }
}
