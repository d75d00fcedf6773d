//! Consolidator: merge every session's whitened tensors into the final
//! per-subject records.
//!
//! Test data shares one condition set across sessions, so the sessions are
//! simply concatenated along the repetition axis.  Training conditions are
//! spread over sessions: every condition's repetitions are gathered (in
//! session order) from wherever they occur.  Either way the repetition axis
//! is shuffled once at the end so repetition order carries no session
//! identity.
use ndarray::{s, Array4, ArrayView4, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};
use crate::events::Condition;

/// Terminal artefact: one per subject and partition.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    /// [conditions, repetitions, channels, times]
    pub preprocessed_eeg_data: Array4<f64>,
    pub ch_names: Vec<String>,
    /// Seconds relative to onset.
    pub times: Vec<f64>,
}

/// Ensure every session has `ch_names.len()` channels and `times.len()` samples.
fn check_axes(sessions: &[ArrayView4<'_, f64>], ch_names: &[String], times: &[f64]) -> Result<()> {
    if sessions.is_empty() {
        return Err(PipelineError::Configuration("no sessions to merge".into()));
    }
    for (i, data) in sessions.iter().enumerate() {
        let (_, _, n_ch, n_t) = data.dim();
        if n_ch != ch_names.len() || n_t != times.len() {
            return Err(PipelineError::ShapeMismatch(format!(
                "session {} has {n_ch} channels × {n_t} samples, expected {} × {}",
                i + 1,
                ch_names.len(),
                times.len()
            )));
        }
    }
    Ok(())
}

fn shuffle_repetitions<R: Rng + ?Sized>(data: &Array4<f64>, rng: &mut R) -> Array4<f64> {
    let mut idx: Vec<usize> = (0..data.len_of(Axis(1))).collect();
    idx.shuffle(rng);
    data.select(Axis(1), &idx)
}

/// Concatenate test tensors along the repetition axis and shuffle repetitions.
pub fn merge_test<R: Rng + ?Sized>(
    sessions: &[Array4<f64>],
    ch_names: &[String],
    times: &[f64],
    rng: &mut R,
) -> Result<MergedRecord> {
    let views: Vec<ArrayView4<'_, f64>> = sessions.iter().map(|a| a.view()).collect();
    check_axes(&views, ch_names, times)?;
    let n_cond = views[0].len_of(Axis(0));
    if let Some(i) = views.iter().position(|v| v.len_of(Axis(0)) != n_cond) {
        return Err(PipelineError::ShapeMismatch(format!(
            "session {} has {} test conditions, session 1 has {n_cond}",
            i + 1,
            views[i].len_of(Axis(0))
        )));
    }

    let merged = ndarray::concatenate(Axis(1), &views)
        .map_err(|e| PipelineError::ShapeMismatch(e.to_string()))?;
    Ok(MergedRecord {
        preprocessed_eeg_data: shuffle_repetitions(&merged, rng),
        ch_names: ch_names.to_vec(),
        times: times.to_vec(),
    })
}

/// Gather training repetitions by condition across sessions and shuffle repetitions.
///
/// `sessions[s]` pairs a [conditions, reps, ch, times] tensor with the
/// condition of each of its rows.  Every condition must end up with the same
/// total number of repetitions; otherwise the merge fails with
/// [`PipelineError::ShapeMismatch`].
///
/// Returns the record and its (ascending) condition axis.
pub fn merge_training<R: Rng + ?Sized>(
    sessions: &[(Array4<f64>, Vec<Condition>)],
    ch_names: &[String],
    times: &[f64],
    rng: &mut R,
) -> Result<(MergedRecord, Vec<Condition>)> {
    let views: Vec<ArrayView4<'_, f64>> = sessions.iter().map(|(a, _)| a.view()).collect();
    check_axes(&views, ch_names, times)?;

    // condition → (session, row) in encounter order
    let mut rows: BTreeMap<Condition, Vec<(usize, usize)>> = BTreeMap::new();
    for (i, (data, labels)) in sessions.iter().enumerate() {
        if labels.len() != data.len_of(Axis(0)) {
            return Err(PipelineError::ShapeMismatch(format!(
                "session {} has {} condition labels for {} rows",
                i + 1,
                labels.len(),
                data.len_of(Axis(0))
            )));
        }
        for (row, &cond) in labels.iter().enumerate() {
            rows.entry(cond).or_default().push((i, row));
        }
    }

    let totals: Vec<usize> = rows
        .values()
        .map(|srcs| srcs.iter().map(|&(i, _)| views[i].len_of(Axis(1))).sum())
        .collect();
    let n_reps = totals.first().copied().unwrap_or(0);
    if let Some((cond, total)) = rows.keys().zip(&totals).find(|&(_, t)| *t != n_reps) {
        return Err(PipelineError::ShapeMismatch(format!(
            "condition {cond} has {total} training repetitions across sessions, \
             condition {} has {n_reps}",
            rows.keys().next().map(|c| c.to_string()).unwrap_or_default()
        )));
    }

    let mut merged = Array4::<f64>::zeros((rows.len(), n_reps, ch_names.len(), times.len()));
    for (mut dst, srcs) in merged.axis_iter_mut(Axis(0)).zip(rows.values()) {
        let mut r = 0;
        for &(i, row) in srcs {
            let src = views[i].index_axis(Axis(0), row);
            let n = src.len_of(Axis(0));
            dst.slice_mut(s![r..r + n, .., ..]).assign(&src);
            r += n;
        }
    }

    let conditions: Vec<Condition> = rows.into_keys().collect();
    let record = MergedRecord {
        preprocessed_eeg_data: shuffle_repetitions(&merged, rng),
        ch_names: ch_names.to_vec(),
        times: times.to_vec(),
    };
    Ok((record, conditions))
}
