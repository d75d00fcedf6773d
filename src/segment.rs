//! Segmenter: one session's continuous recording → labelled epoch tensor.
//!
//! ```text
//! RawRecording [C, T]
//!   ├─ find_events(stim)          onsets + markers
//!   ├─ pick_channels_regexp       occipito-parietal subset
//!   ├─ reject catch marker
//!   ├─ epoch_events               [-0.2, 0.8] s, baseline (None, 0)
//!   ├─ resample_epochs            only if native rate > target rate
//!   └─ group + subsample          [conditions, reps, channels, times]
//! ```
use ndarray::{Array3, Array4, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

use crate::config::{Partition, PipelineConfig};
use crate::epoch::{epoch_events, EpochWindow};
use crate::error::{PipelineError, Result};
use crate::events::{find_events, reject_marker, Condition, Event};
use crate::io::{load_raw, RawRecording};
use crate::picks::pick_channels_regexp;
use crate::resample::resample_epochs;

/// Output of the segmenter for one (session, partition).
#[derive(Debug, Clone)]
pub struct SegmentedSession {
    /// [conditions, repetitions, channels, times]
    pub data: Array4<f64>,
    /// Condition of every row of `data`, strictly ascending.
    pub conditions: Vec<Condition>,
    pub ch_names: Vec<String>,
    /// Seconds relative to onset, one per time sample.
    pub times: Vec<f64>,
}

impl SegmentedSession {
    pub fn n_reps(&self) -> usize {
        self.data.len_of(Axis(1))
    }
}

/// Load and segment the 1-based `session` of `partition`.
pub fn segment_session<R: Rng + ?Sized>(
    cfg: &PipelineConfig,
    session: usize,
    partition: Partition,
    rng: &mut R,
) -> Result<SegmentedSession> {
    let raw = load_raw(cfg, session, partition)?;
    segment_recording(&raw, cfg, session, partition, rng)
}

/// Segment an already loaded recording.
pub fn segment_recording<R: Rng + ?Sized>(
    raw: &RawRecording,
    cfg: &PipelineConfig,
    session: usize,
    partition: Partition,
    rng: &mut R,
) -> Result<SegmentedSession> {
    let fail = |reason: String| PipelineError::Segmentation {
        session,
        partition: partition.as_str(),
        reason,
    };

    let mut events = find_events(raw, &cfg.stim_channel)?;
    let picks = pick_channels_regexp(&raw.ch_names, &cfg.channel_pattern)?;
    let ch_names: Vec<String> = picks.iter().map(|&i| raw.ch_names[i].clone()).collect();

    let n_catch = reject_marker(&mut events, cfg.catch_marker);
    if events.is_empty() {
        return Err(fail(format!("no events found ({n_catch} catch trials rejected)")));
    }

    let window = EpochWindow::new(cfg.tmin, cfg.tmax, raw.sfreq);
    let (mut epochs, events) = {
        let picked = raw.data.select(Axis(0), &picks);
        epoch_events(&picked, &events, &window)
    };
    if events.is_empty() {
        return Err(fail("no event has a complete epoch window inside the recording".into()));
    }

    let mut times = window.times();
    if raw.sfreq > cfg.target_sfreq {
        epochs = resample_epochs(&epochs, raw.sfreq, cfg.target_sfreq)?;
        let t0 = times[0];
        times = (0..epochs.len_of(Axis(2)))
            .map(|i| t0 + i as f64 / cfg.target_sfreq)
            .collect();
    }

    tracing::info!(
        "session {session} ({partition}): {} epochs, {} channels, {} samples, {n_catch} catch trials rejected",
        events.len(),
        ch_names.len(),
        times.len(),
    );

    let (data, conditions) = sort_by_condition(&epochs, &events, cfg.max_reps(partition), rng);
    Ok(SegmentedSession { data, conditions, ch_names, times })
}

/// Group `epochs` ([E, C, T]) by condition and keep at most `max_reps`
/// randomly chosen repetitions of each.
///
/// The repetition axis has the length of the smallest group after capping,
/// so conditions with fewer repetitions than the cap shrink the whole tensor.
pub fn sort_by_condition<R: Rng + ?Sized>(
    epochs: &Array3<f64>,
    events: &[Event],
    max_reps: usize,
    rng: &mut R,
) -> (Array4<f64>, Vec<Condition>) {
    let mut groups: BTreeMap<Condition, Vec<usize>> = BTreeMap::new();
    for (i, ev) in events.iter().enumerate() {
        groups.entry(ev.condition).or_default().push(i);
    }
    for idx in groups.values_mut() {
        idx.shuffle(rng);
        idx.truncate(max_reps);
    }

    let n_reps = groups.values().map(Vec::len).min().unwrap_or(0);
    if n_reps < max_reps {
        let short = groups.values().filter(|g| g.len() < max_reps).count();
        let lost = discarded_epochs(&groups, n_reps);
        if lost > 0 {
            tracing::warn!(
                "{short} of {} conditions have fewer than {max_reps} repetitions; \
                 truncating all to {n_reps} discards {lost} valid epochs",
                groups.len()
            );
        } else {
            tracing::info!("all {} conditions have {n_reps} repetitions (cap {max_reps})", groups.len());
        }
    }

    let (_, n_ch, n_t) = epochs.dim();
    let mut out = Array4::<f64>::zeros((groups.len(), n_reps, n_ch, n_t));
    for (mut dst, idx) in out.axis_iter_mut(Axis(0)).zip(groups.values()) {
        for (r, &e) in idx.iter().take(n_reps).enumerate() {
            dst.index_axis_mut(Axis(0), r).assign(&epochs.index_axis(Axis(0), e));
        }
    }
    (out, groups.into_keys().collect())
}

/// Epochs that survive the cap but are dropped by truncating every group to
/// `n_reps`.
fn discarded_epochs(groups: &BTreeMap<Condition, Vec<usize>>, n_reps: usize) -> usize {
    groups.values().map(|g| g.len().saturating_sub(n_reps)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ChannelType;
    use ndarray::Array2;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    /// Four-channel recording at 1000 Hz with one event every 1.5 s.
    fn recording(markers: &[i64]) -> RawRecording {
        let n_t = 1000 + markers.len() * 1500;
        let mut data = Array2::from_shape_fn((4, n_t), |(c, t)| {
            if c == 3 { 0.0 } else { ((c + 1) as f64 * t as f64 * 0.01).sin() }
        });
        for (k, &m) in markers.iter().enumerate() {
            let onset = 1000 + k * 1500;
            for t in onset..onset + 5 {
                data[[3, t]] = m as f64;
            }
        }
        RawRecording {
            data,
            sfreq: 1000.0,
            ch_names: vec!["O1".into(), "Fz".into(), "P7".into(), "stim".into()],
            ch_types: vec![ChannelType::Eeg, ChannelType::Eeg, ChannelType::Eeg, ChannelType::Stim],
        }
    }

    fn rng() -> Xoshiro256PlusPlus {
        Xoshiro256PlusPlus::seed_from_u64(20200220)
    }

    #[test]
    fn conditions_sorted_and_channels_picked() {
        let raw = recording(&[5, 2, 9, 2, 5, 9, 99999, 2]);
        let cfg = PipelineConfig::default();
        let seg = segment_recording(&raw, &cfg, 1, Partition::Test, &mut rng()).unwrap();
        assert_eq!(seg.conditions, vec![Condition(2), Condition(5), Condition(9)]);
        assert_eq!(seg.ch_names, vec!["O1".to_string(), "P7".to_string()]);
        // Downsampled 1001 → 100 samples.
        assert_eq!(seg.data.shape(), &[3, 2, 2, 100]);
        assert_eq!(seg.times.len(), 100);
        approx::assert_abs_diff_eq!(seg.times[0], -0.2, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(seg.times[1], -0.19, epsilon = 1e-12);
    }

    #[test]
    fn repetitions_capped() {
        let raw = recording(&[1, 1, 1, 2, 2, 2, 1, 2]);
        let cfg = PipelineConfig::default();
        let seg = segment_recording(&raw, &cfg, 1, Partition::Training, &mut rng()).unwrap();
        assert_eq!(seg.n_reps(), 2);
    }

    #[test]
    fn no_resampling_at_target_rate() {
        let raw = recording(&[1, 2]);
        let cfg = PipelineConfig { target_sfreq: 1000.0, ..PipelineConfig::default() };
        let seg = segment_recording(&raw, &cfg, 1, Partition::Test, &mut rng()).unwrap();
        assert_eq!(seg.data.shape()[3], 1001);
    }

    #[test]
    fn only_catch_trials_is_segmentation_error() {
        let raw = recording(&[99999, 99999]);
        let err = segment_recording(&raw, &PipelineConfig::default(), 2, Partition::Test, &mut rng())
            .unwrap_err();
        assert!(matches!(err, PipelineError::Segmentation { session: 2, .. }));
    }

    #[test]
    fn unmatched_pattern_is_configuration_error() {
        let raw = recording(&[1]);
        let cfg = PipelineConfig { channel_pattern: "^T".into(), ..PipelineConfig::default() };
        let err = segment_recording(&raw, &cfg, 1, Partition::Test, &mut rng()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn subsampling_is_deterministic() {
        let epochs = Array3::from_shape_fn((30, 1, 2), |(e, _, _)| e as f64);
        let events: Vec<Event> = (0..30)
            .map(|i| Event { sample: i, condition: Condition((i % 3) as i64) })
            .collect();
        let (a, _) = sort_by_condition(&epochs, &events, 4, &mut rng());
        let (b, _) = sort_by_condition(&epochs, &events, 4, &mut rng());
        assert_eq!(a, b);
        // Every kept epoch belongs to its row's condition.
        for c in 0..3 {
            for r in 0..4 {
                assert_eq!(a[[c, r, 0, 0]] as usize % 3, c);
            }
        }
    }

    #[test]
    fn short_condition_shrinks_repetition_axis() {
        let epochs = Array3::zeros((5, 1, 2));
        let events: Vec<Event> = [1, 1, 1, 2, 2]
            .iter()
            .enumerate()
            .map(|(i, &m)| Event { sample: i, condition: Condition(m) })
            .collect();
        let (data, conds) = sort_by_condition(&epochs, &events, 20, &mut rng());
        assert_eq!(conds.len(), 2);
        assert_eq!(data.shape()[1], 2);
    }

    #[test]
    fn truncation_counts_discarded_epochs() {
        let mut groups = BTreeMap::new();
        groups.insert(Condition(1), vec![0, 1, 2, 3]);
        groups.insert(Condition(2), vec![4, 5]);
        groups.insert(Condition(3), vec![6, 7, 8]);
        assert_eq!(discarded_epochs(&groups, 2), 3);
        assert_eq!(discarded_epochs(&groups, 0), 9);
    }

    #[test]
    fn rate_leaving_no_samples_is_configuration_error() {
        let raw = recording(&[1, 2]);
        let cfg = PipelineConfig { target_sfreq: 0.1, ..PipelineConfig::default() };
        let err = segment_recording(&raw, &cfg, 1, Partition::Test, &mut rng()).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }
}
