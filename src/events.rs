//! Stimulus events and condition labels.
//!
//! `find_events` scans the trigger channel for onsets, matching
//! `mne.find_events(raw, stim_channel='stim')` with the default
//! `consecutive='increasing'`: an event is reported where the channel value
//! becomes non-zero, or steps up from one non-zero value to a larger one.
use std::fmt;

use crate::error::{PipelineError, Result};
use crate::io::RawRecording;

/// Experimental condition, identified by its trigger marker.
///
/// Ordered by marker value; the segmenter's condition axis follows this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Condition(pub i64);

impl Condition {
    pub fn marker(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One stimulus onset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    /// Sample offset into the continuous recording.
    pub sample: usize,
    pub condition: Condition,
}

/// Detect stimulus onsets on the channel named `stim_channel`.
pub fn find_events(raw: &RawRecording, stim_channel: &str) -> Result<Vec<Event>> {
    let idx = raw.channel_index(stim_channel).ok_or_else(|| {
        PipelineError::Configuration(format!("stim channel '{stim_channel}' not found"))
    })?;
    let stim: Vec<i64> = raw.data.row(idx).iter().map(|&v| v.round() as i64).collect();
    Ok(find_events_in(&stim))
}

/// Onset detection over an already-extracted trigger trace.
///
/// The first sample is never reported: an onset requires a transition.
pub fn find_events_in(stim: &[i64]) -> Vec<Event> {
    stim.windows(2)
        .enumerate()
        .filter_map(|(i, w)| {
            let (prev, cur) = (w[0], w[1]);
            let onset = cur != 0 && cur != prev && (prev == 0 || cur > prev);
            onset.then_some(Event { sample: i + 1, condition: Condition(cur) })
        })
        .collect()
}

/// Drop every event carrying `marker` (e.g. catch trials).
pub fn reject_marker(events: &mut Vec<Event>, marker: i64) -> usize {
    let before = events.len();
    events.retain(|e| e.condition.marker() != marker);
    before - events.len()
}
