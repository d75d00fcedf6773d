/// pipeline_steps: run segmentation and MVNN on a single session and write
/// every intermediate array to a safetensors file for inspection.
///
/// Output keys:
///   epoched_test       [C, 20, Ch, T]  f64  sorted test epochs
///   epoched_training   [C', 2, Ch, T]  f64  sorted training epochs
///   sigma              [Ch, Ch]        f64  session covariance
///   whitening          [Ch, Ch]        f64  Σ^(-1/2)
///   whitened_test      [C, 20, Ch, T]  f64
///   whitened_training  [C', 2, Ch, T]  f64
///   times              [T]             f64
///   ch_names           U8              newline-joined
use anyhow::{Context, Result};
use clap::Parser;
use ndarray::Array4;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::path::PathBuf;

use eegprep::{
    io::StWriter,
    mvnn::{inverse_sqrt, session_covariance, whiten},
    segment::segment_session,
    MvnnDim, Partition, PipelineConfig,
};

#[derive(Parser, Debug)]
#[command(name = "pipeline_steps")]
struct Args {
    /// Directory containing eeg_dataset/
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Subject number
    #[arg(long, default_value_t = 10)]
    sub: u32,

    /// 1-based session index
    #[arg(long, default_value_t = 1)]
    session: usize,

    /// Target sampling rate (Hz)
    #[arg(long, default_value_t = 100.0)]
    sfreq: f64,

    /// MVNN averaging axis: 'time' or 'epochs'
    #[arg(long, default_value = "epochs")]
    mvnn_dim: String,

    /// Output safetensors path
    #[arg(long)]
    output: PathBuf,
}

fn add_tensor(w: &mut StWriter, name: &str, data: &Array4<f64>) {
    let flat: Vec<f64> = data.iter().copied().collect();
    w.add_f64(name, &flat, data.shape());
}

fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = PipelineConfig {
        subject: args.sub,
        target_sfreq: args.sfreq,
        mvnn_dim: args.mvnn_dim.parse::<MvnnDim>()?,
        project_dir: args.project_dir.clone(),
        ..PipelineConfig::default()
    };
    cfg.validate()?;
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(cfg.seed);

    // ── 1. Segment ─────────────────────────────────────────────────────────
    let t_seg = now();
    let test = segment_session(&cfg, args.session, Partition::Test, &mut rng)
        .context("segmenting test partition")?;
    let train = segment_session(&cfg, args.session, Partition::Training, &mut rng)
        .context("segmenting training partition")?;
    let ms_seg = t_seg.elapsed().as_secs_f64() * 1000.0;

    // ── 2. Covariance ──────────────────────────────────────────────────────
    let t_cov = now();
    let sigma = session_covariance(&test.data, &train.data, cfg.mvnn_dim, &cfg.shrinkage)?;
    let ms_cov = t_cov.elapsed().as_secs_f64() * 1000.0;

    // ── 3. Whitening ───────────────────────────────────────────────────────
    let t_w = now();
    let w = inverse_sqrt(&sigma)?;
    let whitened_test = whiten(&test.data, &w);
    let whitened_train = whiten(&train.data, &w);
    let ms_w = t_w.elapsed().as_secs_f64() * 1000.0;

    eprintln!("TIMING segment={ms_seg:.4}ms covariance={ms_cov:.4}ms whiten={ms_w:.4}ms");
    eprintln!(
        "  test {:?}  training {:?}",
        test.data.shape(),
        train.data.shape()
    );

    // ── 4. Write output ────────────────────────────────────────────────────
    eprintln!("Writing → {}", args.output.display());
    let mut out = StWriter::new();
    add_tensor(&mut out, "epoched_test", &test.data);
    add_tensor(&mut out, "epoched_training", &train.data);
    out.add_f64("sigma", &sigma.iter().copied().collect::<Vec<_>>(), sigma.shape());
    out.add_f64("whitening", &w.iter().copied().collect::<Vec<_>>(), w.shape());
    add_tensor(&mut out, "whitened_test", &whitened_test);
    add_tensor(&mut out, "whitened_training", &whitened_train);
    out.add_f64("times", &test.times, &[test.times.len()]);
    out.add_lines("ch_names", &test.ch_names);
    out.write(&args.output)?;

    eprintln!("Done.");
    Ok(())
}

#[inline(always)]
fn now() -> std::time::Instant { std::time::Instant::now() }
