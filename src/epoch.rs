//! Event-locked epoching.
//!
//! Cuts a window `[tmin, tmax]` (inclusive) around every event out of
//! continuous [C, T] data, producing [E, C, n_times], and applies baseline
//! correction over the pre-onset part of the window.  Events whose window
//! would run past either end of the recording are dropped.
use ndarray::{s, Array2, Array3, Axis};

use crate::events::Event;
use crate::normalize::baseline_correct_inplace;

/// Sample-domain epoch window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochWindow {
    /// Offset of the first sample relative to the event (`round(tmin·sfreq)`).
    pub first: isize,
    /// Offset of the last sample relative to the event (`round(tmax·sfreq)`).
    pub last: isize,
    /// Sampling rate the offsets refer to (Hz).
    pub sfreq: f64,
}

impl EpochWindow {
    pub fn new(tmin: f64, tmax: f64, sfreq: f64) -> Self {
        Self {
            first: (tmin * sfreq).round() as isize,
            last: (tmax * sfreq).round() as isize,
            sfreq,
        }
    }

    /// Samples per epoch.
    ///
    /// ```
    /// use eegprep::epoch::EpochWindow;
    /// assert_eq!(EpochWindow::new(-0.2, 0.8, 1000.0).n_times(), 1001);
    /// ```
    pub fn n_times(&self) -> usize {
        (self.last - self.first + 1).max(0) as usize
    }

    /// Time of every sample relative to onset, seconds.
    pub fn times(&self) -> Vec<f64> {
        (self.first..=self.last).map(|k| k as f64 / self.sfreq).collect()
    }

    /// Samples with time ≤ 0.
    pub fn baseline_range(&self) -> std::ops::Range<usize> {
        0..((1 - self.first).max(0) as usize).min(self.n_times())
    }

    /// Absolute sample range of the epoch around `onset`, if it fits in `n_total`.
    fn span(&self, onset: usize, n_total: usize) -> Option<std::ops::Range<usize>> {
        let start = onset as isize + self.first;
        let end = onset as isize + self.last + 1;
        (start >= 0 && end as usize <= n_total).then(|| start as usize..end as usize)
    }
}

/// Epoch `data` ([C, T]) around `events`.
///
/// Returns the [E, C, n_times] epochs (baseline-corrected) and the events
/// that produced them, in input order.
pub fn epoch_events(
    data: &Array2<f64>,
    events: &[Event],
    window: &EpochWindow,
) -> (Array3<f64>, Vec<Event>) {
    let (n_ch, n_total) = data.dim();
    let kept: Vec<(Event, std::ops::Range<usize>)> = events
        .iter()
        .filter_map(|ev| match window.span(ev.sample, n_total) {
            Some(r) => Some((*ev, r)),
            None => {
                tracing::debug!("dropping event at sample {} (window out of bounds)", ev.sample);
                None
            }
        })
        .collect();

    let mut out = Array3::<f64>::zeros((kept.len(), n_ch, window.n_times()));
    for (mut dst, (_, span)) in out.axis_iter_mut(Axis(0)).zip(&kept) {
        dst.assign(&data.slice(s![.., span.clone()]));
    }

    baseline_correct_inplace(&mut out, window.baseline_range());
    (out, kept.into_iter().map(|(ev, _)| ev).collect())
}
