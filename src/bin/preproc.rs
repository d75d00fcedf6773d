use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use eegprep::{run_subject, MvnnDim, PipelineConfig};

#[derive(Parser)]
#[command(name = "preproc", version, about = "Epoch, noise-normalise and merge one subject's EEG sessions")]
struct Args {
    /// JSON file with configuration overrides (flags below take precedence)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Subject number
    #[arg(long)]
    sub: Option<u32>,

    /// Number of recording sessions
    #[arg(long)]
    n_ses: Option<usize>,

    /// Target sampling rate in Hz
    #[arg(long)]
    sfreq: Option<f64>,

    /// MVNN averaging axis: 'time' or 'epochs'
    #[arg(long)]
    mvnn_dim: Option<String>,

    /// Directory containing eeg_dataset/
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Retry time-mode MVNN failures in epoch mode
    #[arg(long)]
    mvnn_fallback: bool,

    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(sub) = args.sub {
        cfg.subject = sub;
    }
    if let Some(n) = args.n_ses {
        cfg.n_sessions = n;
    }
    if let Some(sfreq) = args.sfreq {
        cfg.target_sfreq = sfreq;
    }
    if let Some(dim) = &args.mvnn_dim {
        cfg.mvnn_dim = dim.parse::<MvnnDim>()?;
    }
    if let Some(dir) = args.project_dir {
        cfg.project_dir = dir;
    }
    cfg.mvnn_fallback |= args.mvnn_fallback;

    info!(
        "sub-{:02}: {} sessions, {} Hz, MVNN over {}",
        cfg.subject, cfg.n_sessions, cfg.target_sfreq, cfg.mvnn_dim
    );

    let out = run_subject(&cfg).with_context(|| format!("preprocessing sub-{:02}", cfg.subject))?;
    println!(
        "test {:?} ({} conditions), training {:?} ({} conditions)",
        out.test.preprocessed_eeg_data.shape(),
        out.test_conditions.len(),
        out.training.preprocessed_eeg_data.shape(),
        out.training_conditions.len(),
    );
    Ok(())
}
