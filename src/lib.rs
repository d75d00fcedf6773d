//! # eegprep — stimulus-locked EEG preprocessing with MVNN
//!
//! `eegprep` turns continuously recorded EEG sessions into analysis-ready
//! tensors indexed by stimulus condition and repetition.  Every step follows
//! the MNE-Python / scikit-learn behaviour of the original dataset release.
//!
//! ## Pipeline overview
//!
//! ```text
//! raw_eeg_{test,training}.safetensors   (one pair per session)
//!   │
//!   ├─ segment::segment_recording()   events → picks → epochs → resample → sort
//!   │     └─→ [conditions, reps, channels, times]   (test ≤ 20 reps, training ≤ 2)
//!   ├─ mvnn::mvnn()                   Σ per condition → mean → Σ^(-1/2) → whiten
//!   └─ merge::merge_{test,training}()  concatenate sessions, shuffle repetitions
//!        │
//!        └─→ preprocessed_eeg_{test,training}.safetensors
//! ```
//!
//! Sessions are processed one after another with a single seeded generator,
//! so two runs over the same input produce identical subsampling and
//! shuffles.
//!
//! ## Quick start
//!
//! ```no_run
//! use eegprep::{run_subject, PipelineConfig};
//! use std::path::PathBuf;
//!
//! let cfg = PipelineConfig {
//!     subject: 1,
//!     project_dir: PathBuf::from("/data/things-eeg2"),
//!     ..PipelineConfig::default()
//! };
//! let out = run_subject(&cfg).unwrap();
//! println!("test tensor {:?}", out.test.preprocessed_eeg_data.shape());
//! ```

pub mod config;
pub mod covariance;
pub mod epoch;
pub mod error;
pub mod events;
pub mod io;
pub mod merge;
pub mod mvnn;
pub mod normalize;
pub mod picks;
pub mod resample;
pub mod segment;

use ndarray::Array4;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::path::PathBuf;

// ── Crate-root re-exports ─────────────────────────────────────────────────

pub use config::{MvnnDim, Partition, PipelineConfig, Shrinkage};
pub use covariance::{empirical_covariance, ledoit_wolf, shrunk_covariance, CovarianceEstimator};
pub use epoch::{epoch_events, EpochWindow};
pub use error::{PipelineError, Result};
pub use events::{find_events, reject_marker, Condition, Event};
pub use io::{load_raw, load_record, output_path, raw_path, save_record, ChannelType, RawRecording};
pub use merge::{merge_test, merge_training, MergedRecord};
pub use mvnn::{inverse_sqrt, mvnn, whiten};
pub use normalize::baseline_correct_inplace;
pub use picks::pick_channels_regexp;
pub use resample::resample_epochs;
pub use segment::{segment_recording, segment_session, SegmentedSession};

/// Both merged records of one subject.
#[derive(Debug, Clone)]
pub struct SubjectOutput {
    pub test: MergedRecord,
    pub training: MergedRecord,
    /// Condition axis of `test`.
    pub test_conditions: Vec<Condition>,
    /// Condition axis of `training`.
    pub training_conditions: Vec<Condition>,
}

/// Run the **full pipeline** for `cfg.subject`, reading raw sessions from
/// the dataset layout under `cfg.project_dir`, and write both records.
///
/// Nothing is written unless every session succeeds.  Both records are
/// staged next to their destination and only renamed into place once both
/// are on disk.
pub fn run_subject(cfg: &PipelineConfig) -> Result<SubjectOutput> {
    let out = preprocess_subject(cfg)?;
    let records = [(Partition::Test, &out.test), (Partition::Training, &out.training)];
    let staged: Vec<(PathBuf, PathBuf)> = records
        .iter()
        .map(|&(partition, _)| {
            let path = output_path(cfg, partition);
            (path.with_extension("safetensors.partial"), path)
        })
        .collect();

    let written = records
        .iter()
        .zip(&staged)
        .try_for_each(|((_, record), (partial, _))| save_record(partial, record));
    if let Err(e) = written {
        for (partial, _) in &staged {
            let _ = std::fs::remove_file(partial);
        }
        return Err(e);
    }

    for ((partition, record), (partial, path)) in records.iter().zip(&staged) {
        std::fs::rename(partial, path)?;
        tracing::info!(
            "saved {partition} data {:?} → {}",
            record.preprocessed_eeg_data.shape(),
            path.display()
        );
    }
    Ok(out)
}

/// Run the pipeline for `cfg.subject` without writing anything.
pub fn preprocess_subject(cfg: &PipelineConfig) -> Result<SubjectOutput> {
    cfg.validate()?;
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(cfg.seed);
    preprocess_sessions(cfg, |session, partition| load_raw(cfg, session, partition), &mut rng)
}

/// Pipeline driver over an arbitrary recording source.
///
/// `load(session, partition)` is called with 1-based sessions in order,
/// test before training.  Each recording is dropped as soon as it is
/// segmented, and each session's epochs as soon as they are whitened.
pub fn preprocess_sessions<F, R>(cfg: &PipelineConfig, mut load: F, rng: &mut R) -> Result<SubjectOutput>
where
    F: FnMut(usize, Partition) -> Result<RawRecording>,
    R: Rng + ?Sized,
{
    if cfg.n_sessions == 0 {
        return Err(PipelineError::Configuration("no sessions to process".into()));
    }

    let mut whitened_test: Vec<Array4<f64>> = Vec::with_capacity(cfg.n_sessions);
    let mut whitened_train: Vec<(Array4<f64>, Vec<Condition>)> = Vec::with_capacity(cfg.n_sessions);
    let mut reference: Option<(Vec<String>, Vec<f64>, Vec<Condition>)> = None;

    for session in 1..=cfg.n_sessions {
        let test = segment_recording(&load(session, Partition::Test)?, cfg, session, Partition::Test, rng)?;
        let train = segment_recording(&load(session, Partition::Training)?, cfg, session, Partition::Training, rng)?;

        if train.ch_names != test.ch_names {
            return Err(PipelineError::ShapeMismatch(format!(
                "session {session} training channels {:?} differ from test channels {:?}",
                train.ch_names, test.ch_names
            )));
        }
        if let Some((ch_names, _, conditions)) = &reference {
            if &test.ch_names != ch_names {
                return Err(PipelineError::ShapeMismatch(format!(
                    "session {session} channels differ from session 1"
                )));
            }
            if &test.conditions != conditions {
                return Err(PipelineError::ShapeMismatch(format!(
                    "session {session} test conditions differ from session 1"
                )));
            }
        } else {
            reference = Some((test.ch_names.clone(), test.times.clone(), test.conditions.clone()));
        }

        let (test_w, train_w) = whiten_session(cfg, session, &test, &train)?;
        whitened_test.push(test_w);
        whitened_train.push((train_w, train.conditions));
    }

    let (ch_names, times, test_conditions) = reference
        .ok_or_else(|| PipelineError::Configuration("no sessions to process".into()))?;

    let test = merge_test(&whitened_test, &ch_names, &times, rng)?;
    drop(whitened_test);
    let (training, training_conditions) = merge_training(&whitened_train, &ch_names, &times, rng)?;

    tracing::info!(
        "merged {} sessions: test {:?}, training {:?}",
        cfg.n_sessions,
        test.preprocessed_eeg_data.shape(),
        training.preprocessed_eeg_data.shape()
    );
    Ok(SubjectOutput { test, training, test_conditions, training_conditions })
}

/// MVNN for one session, retrying in epoch mode when configured to.
fn whiten_session(
    cfg: &PipelineConfig,
    session: usize,
    test: &SegmentedSession,
    train: &SegmentedSession,
) -> Result<(Array4<f64>, Array4<f64>)> {
    match mvnn(&test.data, &train.data, cfg.mvnn_dim, &cfg.shrinkage) {
        Err(PipelineError::NumericalInstability(reason))
            if cfg.mvnn_fallback && cfg.mvnn_dim == MvnnDim::Time =>
        {
            tracing::warn!("session {session}: time-mode MVNN failed ({reason}); retrying in epoch mode");
            mvnn(&test.data, &train.data, MvnnDim::Epochs, &cfg.shrinkage)
        }
        other => other,
    }
}
