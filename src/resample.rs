//! FFT-based resampler matching MNE's `resample(..., npad='auto', window='boxcar')`.
//!
//! Algorithm (from `mne/cuda.py _fft_resample`):
//!   1. Pad with reflect-limited samples on each side (power-of-two total).
//!   2. rfft(padded)  →  complex half-spectrum.
//!   3. If downsampling: double the Nyquist bin (use_len = new_len).
//!      If upsampling:   halve  the Nyquist bin (use_len = old_len).
//!   4. Scale all bins by `new_len_padded / old_len_padded`.
//!   5. irfft(spectrum, n=new_len_padded)  — truncating the spectrum is the
//!      anti-aliasing low-pass when downsampling.
//!   6. Strip the resampled padding edges.
use ndarray::{Array3, ArrayView1, Axis};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::error::{PipelineError, Result};

/// Compute the auto npad as MNE does: pad to the next power of 2.
///
/// ```text
/// min_add = min(n // 8, 100) * 2
/// total   = 2^ceil(log2(n + min_add)) - n
/// npads   = [total // 2, total - total // 2]
/// ```
pub fn auto_npad(n: usize) -> (usize, usize) {
    let min_add = (n / 8).min(100) * 2;
    let sum = n + min_add;
    let next_pow2 = 1usize << ((sum as f64).log2().ceil() as u32);
    let total = next_pow2 - n;
    (total / 2, total - total / 2)
}

/// Output length for `n` samples: `round(n · dst / src)`.
pub fn final_length(n: usize, src_sfreq: f64, dst_sfreq: f64) -> usize {
    (n as f64 * dst_sfreq / src_sfreq).round() as usize
}

fn check_rates(src_sfreq: f64, dst_sfreq: f64) -> Result<()> {
    if !(src_sfreq > 0.0 && dst_sfreq > 0.0 && src_sfreq.is_finite() && dst_sfreq.is_finite()) {
        return Err(PipelineError::Configuration(format!(
            "cannot resample from {src_sfreq} Hz to {dst_sfreq} Hz"
        )));
    }
    Ok(())
}

/// Resample every epoch of `epochs` ([E, C, T]) along the time axis.
pub fn resample_epochs(epochs: &Array3<f64>, src_sfreq: f64, dst_sfreq: f64) -> Result<Array3<f64>> {
    check_rates(src_sfreq, dst_sfreq)?;
    if (src_sfreq - dst_sfreq).abs() < 1e-9 {
        return Ok(epochs.clone());
    }
    let (n_e, n_ch, n_t) = epochs.dim();
    let final_len = final_length(n_t, src_sfreq, dst_sfreq);
    if n_t > 0 && final_len == 0 {
        return Err(PipelineError::Configuration(format!(
            "{n_t} samples at {src_sfreq} Hz leave no samples at {dst_sfreq} Hz"
        )));
    }
    let ratio = dst_sfreq / src_sfreq;
    let (npad_l, npad_r) = auto_npad(n_t);

    let mut planner = FftPlanner::<f64>::new();
    let mut out = Array3::<f64>::zeros((n_e, n_ch, final_len));
    for (src, mut dst) in epochs.axis_iter(Axis(0)).zip(out.axis_iter_mut(Axis(0))) {
        for (row, mut dst_row) in src.rows().into_iter().zip(dst.rows_mut()) {
            let resampled = resample_1d_with(&mut planner, &row.to_vec(), ratio, npad_l, npad_r);
            dst_row.assign(&ArrayView1::from(&resampled));
        }
    }
    Ok(out)
}

fn resample_1d_with(
    planner: &mut FftPlanner<f64>,
    x: &[f64],
    ratio: f64,
    npad_l: usize,
    npad_r: usize,
) -> Vec<f64> {
    let n_in = x.len();
    if n_in == 0 {
        return vec![];
    }
    let final_len = (ratio * n_in as f64).round() as usize;

    // --- 1. Reflect-limited padding (matches MNE's _smart_pad) ----------
    // If npad > n_in-1, MNE zero-pads the extra. We clamp to n_in-1.
    let pad_l = npad_l.min(n_in - 1);
    let pad_r = npad_r.min(n_in - 1);
    let old_len = n_in + pad_l + pad_r;

    let mut x_ext = Vec::with_capacity(old_len);
    for i in (1..=pad_l).rev() {
        x_ext.push(2.0 * x[0] - x[i]);
    }
    x_ext.extend_from_slice(x);
    let last = x[n_in - 1];
    for i in 1..=pad_r {
        let idx = (n_in - 1).saturating_sub(i);
        x_ext.push(2.0 * last - x[idx]);
    }

    // --- 2. Padded output length -----------------------------------------
    let new_len_padded = (ratio * old_len as f64).round() as usize;
    let shorter = new_len_padded < old_len;
    let use_len = if shorter { new_len_padded } else { old_len };

    // --- 3. rfft via a full complex FFT ----------------------------------
    let fft = planner.plan_fft_forward(old_len);
    let mut buf: Vec<Complex<f64>> = x_ext.iter().map(|&v| Complex { re: v, im: 0.0 }).collect();
    fft.process(&mut buf);
    let rfft_len = old_len / 2 + 1;
    let mut x_fft: Vec<Complex<f64>> = buf[..rfft_len].to_vec();

    // --- 4. Nyquist bin ----------------------------------------------------
    if use_len % 2 == 0 {
        let nyq = use_len / 2;
        if nyq < x_fft.len() {
            x_fft[nyq] *= if shorter { 2.0 } else { 0.5 };
        }
    }

    // --- 5. Boxcar window scale ---------------------------------------------
    let scale = new_len_padded as f64 / old_len as f64;
    for v in &mut x_fft {
        *v *= scale;
    }

    // --- 6. irfft(x_fft, n=new_len_padded) ----------------------------------
    let new_rfft_len = new_len_padded / 2 + 1;
    let mut irfft_in = vec![Complex::<f64>::default(); new_len_padded];
    let n_copy = x_fft.len().min(new_rfft_len);
    irfft_in[..n_copy].copy_from_slice(&x_fft[..n_copy]);
    // Hermitian completion of the upper half.
    for i in 1..new_rfft_len {
        let idx = new_len_padded - i;
        if idx >= new_rfft_len {
            irfft_in[idx] = irfft_in[i].conj();
        }
    }
    let ifft = planner.plan_fft_inverse(new_len_padded);
    ifft.process(&mut irfft_in);
    let inv_scale = 1.0 / new_len_padded as f64;

    // --- 7. Strip padding ---------------------------------------------------
    let to_remove_l = (ratio * pad_l as f64).round() as usize;
    let strip_end = (to_remove_l + final_len).min(new_len_padded);
    let mut result: Vec<f64> = irfft_in[to_remove_l.min(strip_end)..strip_end]
        .iter()
        .map(|c| c.re * inv_scale)
        .collect();
    result.resize(final_len, 0.0);
    result
}
