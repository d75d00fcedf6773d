//! Channel selection by name pattern.
//!
//! Matches `mne.pick_channels_regexp`: a channel is kept when the pattern
//! matches at the start of its name.
use regex::Regex;

use crate::error::{PipelineError, Result};

/// Indices of the channels whose name matches `pattern`, in recording order.
///
/// Fails with [`PipelineError::Configuration`] when the pattern is invalid or
/// matches nothing.
pub fn pick_channels_regexp(ch_names: &[String], pattern: &str) -> Result<Vec<usize>> {
    let re = Regex::new(pattern).map_err(|e| {
        PipelineError::Configuration(format!("invalid channel pattern '{pattern}': {e}"))
    })?;
    // `re.match` semantics: anchored at the start of the name.
    let picks: Vec<usize> = ch_names
        .iter()
        .enumerate()
        .filter(|(_, name)| re.find(name).is_some_and(|m| m.start() == 0))
        .map(|(i, _)| i)
        .collect();
    if picks.is_empty() {
        return Err(PipelineError::Configuration(format!(
            "channel pattern '{pattern}' matched none of {} channels",
            ch_names.len()
        )));
    }
    Ok(picks)
}
