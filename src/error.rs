//! Error taxonomy for the preprocessing pipeline.
//!
//! Every failure aborts the current subject's run; nothing is retried
//! internally except the optional MVNN epoch-mode fallback in
//! [`crate::preprocess_subject`].
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the segmentation, normalisation and merge stages.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid or missing option (unmatched channel pattern, empty session set, ...).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An expected input file is absent.
    #[error("input file not found: {}", path.display())]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// No usable events in a session.
    #[error("segmentation failed for session {session} ({partition}): {reason}")]
    Segmentation {
        /// 1-based session index.
        session: usize,
        /// `test` or `training`.
        partition: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// Covariance estimate cannot be inverted.
    #[error("numerically unstable covariance: {0}")]
    NumericalInstability(String),

    /// Inconsistent axis sizes across sessions at merge time.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Malformed input file contents.
    #[error("malformed file {}: {reason}", path.display())]
    Format {
        /// Offending file.
        path: PathBuf,
        /// Parse failure description.
        reason: String,
    },

    /// Underlying filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
