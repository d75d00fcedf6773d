/// Shared helpers: synthetic raw recordings and on-disk datasets.
use eegprep::{raw_path, ChannelType, Partition, PipelineConfig, RawRecording};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::path::Path;

#[allow(unused)]
pub const SFREQ: f64 = 250.0;

/// Samples between consecutive stimulus onsets (1.2 s).
const SPACING: usize = 300;

#[allow(unused)]
pub const CHANNELS: [&str; 9] = ["Fp1", "Cz", "P7", "P8", "PO3", "O1", "Oz", "O2", "stim"];

/// Channels kept by the default occipito-parietal pattern.
#[allow(unused)]
pub const PICKED: [&str; 6] = ["P7", "P8", "PO3", "O1", "Oz", "O2"];

/// `reps` repetitions of every condition, interleaved, with catch trials
/// (`99999`) inserted every fifth stimulus.
#[allow(unused)]
pub fn markers(conditions: &[i64], reps: usize, with_catch: bool) -> Vec<i64> {
    let mut out = Vec::new();
    for _ in 0..reps {
        for &c in conditions {
            out.push(c);
            if with_catch && out.len() % 5 == 4 {
                out.push(99999);
            }
        }
    }
    out
}

/// Nine-channel recording at [`SFREQ`] with one stimulus per marker.
///
/// EEG channels carry independent noise, a shared component (so the sensor
/// covariance is not diagonal) and a condition-dependent evoked response.
#[allow(unused)]
pub fn synthetic_recording(markers: &[i64], seed: u64) -> RawRecording {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let n_t = SPACING * (markers.len() + 2);
    let n_ch = CHANNELS.len();
    let stim = n_ch - 1;

    let mut data = Array2::<f64>::zeros((n_ch, n_t));
    for t in 0..n_t {
        let shared: f64 = rng.gen_range(-1.0..1.0);
        for c in 0..stim {
            data[[c, t]] = rng.gen_range(-1.0..1.0) + 0.8 * shared * (c + 1) as f64 / stim as f64;
        }
    }
    for (k, &m) in markers.iter().enumerate() {
        let onset = SPACING * (k + 1);
        for t in onset..onset + 10 {
            data[[stim, t]] = m as f64;
        }
        let amp = (m % 7) as f64 * 0.5;
        for t in 0..100 {
            let v = amp * (std::f64::consts::PI * t as f64 / 100.0).sin();
            for c in 2..stim {
                data[[c, onset + 25 + t]] += v;
            }
        }
    }

    let ch_types = CHANNELS
        .iter()
        .map(|&n| if n == "stim" { ChannelType::Stim } else { ChannelType::Eeg })
        .collect();
    RawRecording {
        data,
        sfreq: SFREQ,
        ch_names: CHANNELS.iter().map(|s| s.to_string()).collect(),
        ch_types,
    }
}

/// Write one raw file per (session, partition) under `cfg.project_dir`.
///
/// `sessions[s] = (test markers, training markers)` for session `s + 1`.
#[allow(unused)]
pub fn write_dataset(cfg: &PipelineConfig, sessions: &[(Vec<i64>, Vec<i64>)]) {
    for (s, (test, train)) in sessions.iter().enumerate() {
        let session = s + 1;
        synthetic_recording(test, 100 + session as u64)
            .save(&raw_path(cfg, session, Partition::Test))
            .unwrap();
        synthetic_recording(train, 200 + session as u64)
            .save(&raw_path(cfg, session, Partition::Training))
            .unwrap();
    }
}

#[allow(unused)]
pub fn config_for(root: &Path, n_sessions: usize) -> PipelineConfig {
    PipelineConfig {
        subject: 1,
        n_sessions,
        project_dir: root.to_path_buf(),
        ..PipelineConfig::default()
    }
}
