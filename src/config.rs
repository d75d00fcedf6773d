//! Pipeline configuration.
//!
//! [`PipelineConfig`] holds every tunable parameter of the segmentation,
//! noise-normalisation and merge stages.  All fields have defaults that
//! reproduce the published preprocessing of the dataset (100 Hz, 17
//! occipito-parietal channels, epoch-wise MVNN).
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{PipelineError, Result};

/// One of the two data partitions recorded in every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Test,
    Training,
}

impl Partition {
    /// Name used in file names and log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Partition::Test => "test",
            Partition::Training => "training",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis over which per-condition covariance matrices are computed and then averaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MvnnDim {
    /// One covariance per time sample (repetitions are the observations).
    Time,
    /// One covariance per repetition (time samples are the observations).
    Epochs,
}

impl FromStr for MvnnDim {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "time" => Ok(MvnnDim::Time),
            "epochs" | "epoch" => Ok(MvnnDim::Epochs),
            other => Err(PipelineError::Configuration(format!(
                "unknown MVNN dimension '{other}' (expected 'time' or 'epochs')"
            ))),
        }
    }
}

impl fmt::Display for MvnnDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MvnnDim::Time => "time",
            MvnnDim::Epochs => "epochs",
        })
    }
}

/// Covariance regularisation used by the noise normaliser.
///
/// In JSON: `"auto"`, `"none"` or `{"fixed": 0.1}`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shrinkage {
    /// Ledoit–Wolf shrinkage with automatically chosen intensity.
    Auto,
    /// Shrinkage towards the scaled identity with a fixed intensity in `[0, 1]`.
    Fixed(f64),
    /// Plain (biased) empirical covariance.
    None,
}

/// Configuration for one subject's preprocessing run.
///
/// All fields are `pub` so you can construct one with struct-update syntax:
///
/// ```
/// use eegprep::{MvnnDim, PipelineConfig};
///
/// let cfg = PipelineConfig {
///     subject: 3,
///     mvnn_dim: MvnnDim::Time,
///     ..PipelineConfig::default()
/// };
/// assert_eq!(cfg.n_sessions, 4);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Subject number, formatted as `sub-XX` in paths.
    ///
    /// Default: `10`.
    pub subject: u32,

    /// Number of recording sessions, processed as `ses-01 ..= ses-NN`.
    ///
    /// Default: `4`.
    pub n_sessions: usize,

    /// Target sampling rate in Hz.  Epochs are only resampled when the
    /// native rate is higher.
    ///
    /// Default: `100.0` Hz.
    pub target_sfreq: f64,

    /// MVNN averaging axis.
    ///
    /// Default: [`MvnnDim::Epochs`].
    pub mvnn_dim: MvnnDim,

    /// Directory containing `eeg_dataset/`.
    ///
    /// Default: `.`.
    pub project_dir: PathBuf,

    /// Epoch start relative to event onset, seconds.
    ///
    /// Default: `-0.2`.
    pub tmin: f64,

    /// Epoch end relative to event onset, seconds (inclusive).
    ///
    /// Default: `0.8`.
    pub tmax: f64,

    /// Regular expression selecting the kept channels.
    ///
    /// Default: `^O *|^P *` (occipital and parietal channels).
    pub channel_pattern: String,

    /// Name of the trigger channel scanned for events.
    ///
    /// Default: `"stim"`.
    pub stim_channel: String,

    /// Marker value of target (catch) trials, which are discarded.
    ///
    /// Default: `99999`.
    pub catch_marker: i64,

    /// Maximum repetitions kept per condition in the test partition.
    ///
    /// Default: `20`.
    pub test_max_reps: usize,

    /// Maximum repetitions kept per condition in the training partition.
    ///
    /// Default: `2`.
    pub train_max_reps: usize,

    /// Seed of the run's random generator (subsampling and shuffles).
    ///
    /// Default: `20200220`.
    pub seed: u64,

    /// Covariance estimator for MVNN.
    ///
    /// Default: [`Shrinkage::Auto`].
    pub shrinkage: Shrinkage,

    /// Retry a session in epoch mode when time-mode MVNN is numerically unstable.
    ///
    /// Default: `false`.
    pub mvnn_fallback: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            subject: 10,
            n_sessions: 4,
            target_sfreq: 100.0,
            mvnn_dim: MvnnDim::Epochs,
            project_dir: PathBuf::from("."),
            tmin: -0.2,
            tmax: 0.8,
            channel_pattern: "^O *|^P *".to_string(),
            stim_channel: "stim".to_string(),
            catch_marker: 99999,
            test_max_reps: 20,
            train_max_reps: 2,
            seed: 20200220,
            shrinkage: Shrinkage::Auto,
            mvnn_fallback: false,
        }
    }
}

impl PipelineConfig {
    /// Load overrides from a JSON file; missing keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::NotFound { path: path.to_path_buf() },
            _ => PipelineError::Io(e),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| PipelineError::Format {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Repetition cap for `partition`.
    ///
    /// ```
    /// use eegprep::{Partition, PipelineConfig};
    /// let cfg = PipelineConfig::default();
    /// assert_eq!(cfg.max_reps(Partition::Test), 20);
    /// assert_eq!(cfg.max_reps(Partition::Training), 2);
    /// ```
    pub fn max_reps(&self, partition: Partition) -> usize {
        match partition {
            Partition::Test => self.test_max_reps,
            Partition::Training => self.train_max_reps,
        }
    }

    /// Reject option combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PipelineError::Configuration(msg));
        if self.n_sessions == 0 {
            return fail("number of sessions must be at least 1".into());
        }
        if !(self.target_sfreq.is_finite() && self.target_sfreq > 0.0) {
            return fail(format!("target sampling rate must be positive, got {}", self.target_sfreq));
        }
        if !(self.tmin < self.tmax) {
            return fail(format!("empty epoch window [{}, {}]", self.tmin, self.tmax));
        }
        if ((self.tmax - self.tmin) * self.target_sfreq).round() < 1.0 {
            return fail(format!(
                "epoch window [{}, {}] holds no samples at {} Hz",
                self.tmin, self.tmax, self.target_sfreq
            ));
        }
        if self.tmin > 0.0 {
            return fail(format!("baseline interval [{}, 0] is empty", self.tmin));
        }
        if self.test_max_reps == 0 || self.train_max_reps == 0 {
            return fail("repetition caps must be at least 1".into());
        }
        if let Shrinkage::Fixed(a) = self.shrinkage {
            if !(0.0..=1.0).contains(&a) {
                return fail(format!("fixed shrinkage must lie in [0, 1], got {a}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_sessions_rejected() {
        let cfg = PipelineConfig { n_sessions: 0, ..PipelineConfig::default() };
        assert!(matches!(cfg.validate(), Err(PipelineError::Configuration(_))));
    }

    #[test]
    fn rate_too_low_for_window_rejected() {
        let cfg = PipelineConfig { target_sfreq: 0.1, ..PipelineConfig::default() };
        assert!(matches!(cfg.validate(), Err(PipelineError::Configuration(_))));
        let cfg = PipelineConfig { target_sfreq: 1.0, ..PipelineConfig::default() };
        cfg.validate().unwrap();
    }

    #[test]
    fn bad_fixed_shrinkage_rejected() {
        let cfg = PipelineConfig { shrinkage: Shrinkage::Fixed(1.5), ..PipelineConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn mvnn_dim_parses() {
        assert_eq!("time".parse::<MvnnDim>().unwrap(), MvnnDim::Time);
        assert_eq!("Epochs".parse::<MvnnDim>().unwrap(), MvnnDim::Epochs);
        assert!("channels".parse::<MvnnDim>().is_err());
    }

    #[test]
    fn json_overrides_keep_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{"subject": 2, "mvnn_dim": "time", "shrinkage": {"fixed": 0.2}}"#,
        ).unwrap();
        assert_eq!(cfg.subject, 2);
        assert_eq!(cfg.mvnn_dim, MvnnDim::Time);
        assert_eq!(cfg.shrinkage, Shrinkage::Fixed(0.2));
        assert_eq!(cfg.n_sessions, 4);
        assert_eq!(cfg.seed, 20200220);
    }
}
