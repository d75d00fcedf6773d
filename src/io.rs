//! Safetensors I/O and dataset layout.
//!
//! Reader: raw recordings `raw_eeg_{test,training}.safetensors`.
//! Writer: merged records `preprocessed_eeg_{test,training}.safetensors`.
//!
//! String lists (`ch_names`, `ch_types`) are stored as newline-joined `U8`
//! tensors.
use ndarray::{Array2, Array4};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::{Partition, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::merge::MergedRecord;

// ── Low-level safetensors parser ──────────────────────────────────────────────

fn format_err(path: &Path, reason: impl Into<String>) -> PipelineError {
    PipelineError::Format { path: path.to_path_buf(), reason: reason.into() }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::NotFound { path: path.to_path_buf() },
        _ => PipelineError::Io(e),
    })
}

/// One tensor entry of a safetensors header.
#[derive(Debug, Clone)]
struct Entry {
    dtype: String,
    shape: Vec<usize>,
    start: usize,
    end: usize,
}

/// In-memory safetensors file with a parsed header.
pub struct StReader {
    path: PathBuf,
    bytes: Vec<u8>,
    data_start: usize,
    entries: HashMap<String, Entry>,
}

impl StReader {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = read_file(path)?;
        if bytes.len() < 8 {
            return Err(format_err(path, "safetensors file too small"));
        }
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[..8]);
        let n = u64::from_le_bytes(len);
        let data_start = usize::try_from(n)
            .ok()
            .and_then(|n| n.checked_add(8))
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| format_err(path, format!("header length {n} exceeds file size")))?;
        let header: HashMap<String, serde_json::Value> = serde_json::from_slice(&bytes[8..data_start])
            .map_err(|e| format_err(path, format!("failed to parse header: {e}")))?;

        let mut entries = HashMap::new();
        for (name, val) in header {
            if name == "__metadata__" {
                continue;
            }
            let entry = parse_entry(&val)
                .ok_or_else(|| format_err(path, format!("malformed header entry '{name}'")))?;
            let in_bounds = data_start
                .checked_add(entry.end)
                .is_some_and(|end| end <= bytes.len());
            if !in_bounds || entry.start > entry.end {
                return Err(format_err(path, format!("tensor '{name}' out of bounds")));
            }
            entries.insert(name, entry);
        }
        Ok(Self { path: path.to_path_buf(), bytes, data_start, entries })
    }

    fn entry(&self, name: &str) -> Result<&Entry> {
        self.entries
            .get(name)
            .ok_or_else(|| format_err(&self.path, format!("missing '{name}' key")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Shape of tensor `name`.
    pub fn shape(&self, name: &str) -> Result<Vec<usize>> {
        Ok(self.entry(name)?.shape.clone())
    }

    /// Numeric tensor converted to `f64`.  Handles F32, F64, I32, I64.
    pub fn f64_values(&self, name: &str) -> Result<Vec<f64>> {
        let e = self.entry(name)?;
        let raw = &self.bytes[self.data_start + e.start..self.data_start + e.end];
        let vals: Vec<f64> = match e.dtype.as_str() {
            "F32" => raw.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
                .collect(),
            "F64" => raw.chunks_exact(8)
                .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect(),
            "I32" => raw.chunks_exact(4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64)
                .collect(),
            "I64" => raw.chunks_exact(8)
                .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f64)
                .collect(),
            other => {
                return Err(format_err(&self.path, format!("tensor '{name}' has non-numeric dtype {other}")))
            }
        };
        let expected: usize = e.shape.iter().product();
        if vals.len() != expected {
            return Err(format_err(
                &self.path,
                format!("tensor '{name}': {} values for shape {:?}", vals.len(), e.shape),
            ));
        }
        Ok(vals)
    }

    /// Newline-separated UTF-8 string list stored as a `U8` tensor.
    pub fn lines(&self, name: &str) -> Result<Vec<String>> {
        let e = self.entry(name)?;
        let raw = &self.bytes[self.data_start + e.start..self.data_start + e.end];
        let s = std::str::from_utf8(raw)
            .map_err(|err| format_err(&self.path, format!("'{name}' is not UTF-8: {err}")))?;
        Ok(s.split('\n').filter(|s| !s.is_empty()).map(String::from).collect())
    }
}

fn parse_entry(val: &serde_json::Value) -> Option<Entry> {
    let dtype = val.get("dtype")?.as_str()?.to_string();
    let shape = val
        .get("shape")?
        .as_array()?
        .iter()
        .map(|v| v.as_u64().map(|x| x as usize))
        .collect::<Option<Vec<_>>>()?;
    let offsets = val.get("data_offsets")?.as_array()?;
    let start = offsets.first()?.as_u64()? as usize;
    let end = offsets.get(1)?.as_u64()? as usize;
    Some(Entry { dtype, shape, start, end })
}

// ── Generic safetensors builder ───────────────────────────────────────────────

/// Simple safetensors file writer for F64 and U8 tensors.
///
/// ```rust,no_run
/// use eegprep::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_f64("times", &[-0.2, -0.19, -0.18], &[3]);
/// w.add_lines("ch_names", &["O1".to_string(), "Oz".to_string()]);
/// w.write(Path::new("/tmp/out.safetensors")).unwrap();
/// ```
#[derive(Default)]
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, &'static str, Vec<usize>)>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn add_f32(&mut self, name: &str, data: &[f32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F32", shape.to_vec()));
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F64", shape.to_vec()));
    }

    /// Store a string list as a newline-joined `U8` tensor.
    pub fn add_lines(&mut self, name: &str, lines: &[String]) {
        let bytes = lines.join("\n").into_bytes();
        let len = bytes.len();
        self.entries.push((name.to_string(), bytes, "U8", vec![len]));
    }

    /// Write the file, creating parent directories and overwriting any existing file.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut header_map = serde_json::Map::new();
        let mut offset: usize = 0;
        for (name, data, dtype, shape) in &self.entries {
            header_map.insert(name.clone(), serde_json::json!({
                "dtype": dtype,
                "shape": shape,
                "data_offsets": [offset, offset + data.len()],
            }));
            offset += data.len();
        }
        let hdr_bytes = serde_json::to_vec(&header_map)
            .map_err(|e| format_err(path, format!("failed to encode header: {e}")))?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;
        let padded: Vec<u8> = hdr_bytes.into_iter()
            .chain(std::iter::repeat(b' ').take(pad))
            .collect();
        let mut f = std::io::BufWriter::new(std::fs::File::create(path)?);
        f.write_all(&(padded.len() as u64).to_le_bytes())?;
        f.write_all(&padded)?;
        for (_, data, _, _) in &self.entries {
            f.write_all(data)?;
        }
        f.flush()?;
        Ok(())
    }
}

// ── Raw recordings ────────────────────────────────────────────────────────────

/// Channel kind as declared in the recording metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelType {
    Eeg,
    Stim,
    Misc,
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s.trim().to_lowercase().as_str() {
            "eeg" => Ok(ChannelType::Eeg),
            "stim" => Ok(ChannelType::Stim),
            "misc" => Ok(ChannelType::Misc),
            other => Err(format!("unknown channel type '{other}'")),
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChannelType::Eeg => "eeg",
            ChannelType::Stim => "stim",
            ChannelType::Misc => "misc",
        })
    }
}

/// Continuous multichannel recording of one session and partition.
#[derive(Debug, Clone)]
pub struct RawRecording {
    /// [C, T] signal, native sampling rate.
    pub data: Array2<f64>,
    /// Native sampling rate (Hz).
    pub sfreq: f64,
    /// One name per row of `data`.
    pub ch_names: Vec<String>,
    /// One type per row of `data`.
    pub ch_types: Vec<ChannelType>,
}

impl RawRecording {
    /// Read a raw recording written by [`RawRecording::save`] (or the
    /// dataset's conversion script).
    ///
    /// Keys: `raw_eeg_data` [C, T], `sfreq` [1], `ch_names`, `ch_types`.
    pub fn load(path: &Path) -> Result<Self> {
        let st = StReader::open(path)?;

        let shape = st.shape("raw_eeg_data")?;
        if shape.len() != 2 {
            return Err(format_err(path, format!("raw_eeg_data must be 2-D, got {shape:?}")));
        }
        let data = Array2::from_shape_vec((shape[0], shape[1]), st.f64_values("raw_eeg_data")?)
            .map_err(|e| format_err(path, e.to_string()))?;

        let sfreq = *st
            .f64_values("sfreq")?
            .first()
            .ok_or_else(|| format_err(path, "empty 'sfreq'"))?;

        let ch_names = st.lines("ch_names")?;
        if ch_names.len() != data.nrows() {
            return Err(format_err(
                path,
                format!("{} channel names for {} rows", ch_names.len(), data.nrows()),
            ));
        }

        // Channel types are optional: absent means every channel is EEG
        // except one named "stim".
        let ch_types = if st.contains("ch_types") {
            st.lines("ch_types")?
                .iter()
                .map(|t| t.parse::<ChannelType>().map_err(|e| format_err(path, e)))
                .collect::<Result<Vec<_>>>()?
        } else {
            ch_names
                .iter()
                .map(|n| if n == "stim" { ChannelType::Stim } else { ChannelType::Eeg })
                .collect()
        };
        if ch_types.len() != ch_names.len() {
            return Err(format_err(path, "ch_types and ch_names differ in length"));
        }

        Ok(RawRecording { data, sfreq, ch_names, ch_types })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut w = StWriter::new();
        let flat: Vec<f64> = self.data.iter().copied().collect();
        w.add_f64("raw_eeg_data", &flat, &[self.data.nrows(), self.data.ncols()]);
        w.add_f64("sfreq", &[self.sfreq], &[1]);
        w.add_lines("ch_names", &self.ch_names);
        let types: Vec<String> = self.ch_types.iter().map(|t| t.to_string()).collect();
        w.add_lines("ch_types", &types);
        w.write(path)
    }

    /// Row index of the channel called `name`.
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.ch_names.iter().position(|n| n == name)
    }
}

// ── Dataset layout ────────────────────────────────────────────────────────────

fn subject_dir(cfg: &PipelineConfig, kind: &str) -> PathBuf {
    cfg.project_dir
        .join("eeg_dataset")
        .join(kind)
        .join(format!("sub-{:02}", cfg.subject))
}

/// `<project>/eeg_dataset/raw_data/sub-XX/ses-YY/raw_eeg_<partition>.safetensors`
/// for the 1-based `session`.
pub fn raw_path(cfg: &PipelineConfig, session: usize, partition: Partition) -> PathBuf {
    subject_dir(cfg, "raw_data")
        .join(format!("ses-{session:02}"))
        .join(format!("raw_eeg_{partition}.safetensors"))
}

/// `<project>/eeg_dataset/preprocessed_data/sub-XX/preprocessed_eeg_<partition>.safetensors`
pub fn output_path(cfg: &PipelineConfig, partition: Partition) -> PathBuf {
    subject_dir(cfg, "preprocessed_data")
        .join(format!("preprocessed_eeg_{partition}.safetensors"))
}

/// Load the raw recording of one (1-based) session and partition.
pub fn load_raw(cfg: &PipelineConfig, session: usize, partition: Partition) -> Result<RawRecording> {
    let path = raw_path(cfg, session, partition);
    tracing::debug!("loading {}", path.display());
    RawRecording::load(&path)
}

// ── Merged records ────────────────────────────────────────────────────────────

/// Persist a merged record: `preprocessed_eeg_data` [C, R, Ch, T] F64,
/// `times` [T] F64, `ch_names` U8.
pub fn save_record(path: &Path, record: &MergedRecord) -> Result<()> {
    let data = &record.preprocessed_eeg_data;
    let flat: Vec<f64> = data.iter().copied().collect();
    let mut w = StWriter::new();
    w.add_f64("preprocessed_eeg_data", &flat, data.shape());
    w.add_f64("times", &record.times, &[record.times.len()]);
    w.add_lines("ch_names", &record.ch_names);
    w.write(path)
}

/// Read back a record written by [`save_record`].
pub fn load_record(path: &Path) -> Result<MergedRecord> {
    let st = StReader::open(path)?;
    let shape = st.shape("preprocessed_eeg_data")?;
    if shape.len() != 4 {
        return Err(format_err(path, format!("preprocessed_eeg_data must be 4-D, got {shape:?}")));
    }
    let preprocessed_eeg_data = Array4::from_shape_vec(
        (shape[0], shape[1], shape[2], shape[3]),
        st.f64_values("preprocessed_eeg_data")?,
    )
    .map_err(|e| format_err(path, e.to_string()))?;
    Ok(MergedRecord {
        preprocessed_eeg_data,
        ch_names: st.lines("ch_names")?,
        times: st.f64_values("times")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_paths_are_zero_padded() {
        let cfg = PipelineConfig {
            subject: 3,
            project_dir: PathBuf::from("/data"),
            ..PipelineConfig::default()
        };
        assert_eq!(
            raw_path(&cfg, 1, Partition::Training),
            PathBuf::from("/data/eeg_dataset/raw_data/sub-03/ses-01/raw_eeg_training.safetensors")
        );
        assert_eq!(
            output_path(&cfg, Partition::Test),
            PathBuf::from("/data/eeg_dataset/preprocessed_data/sub-03/preprocessed_eeg_test.safetensors")
        );
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = RawRecording::load(Path::new("/nonexistent/raw_eeg_test.safetensors")).unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
    }

    #[test]
    fn f32_tensors_are_widened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.safetensors");
        let mut w = StWriter::new();
        w.add_f32("raw_eeg_data", &[1.5, -2.0, 0.25, 4.0], &[2, 2]);
        w.add_f32("sfreq", &[1000.0], &[1]);
        w.add_lines("ch_names", &["O1".to_string(), "stim".to_string()]);
        w.write(&path).unwrap();

        let raw = RawRecording::load(&path).unwrap();
        assert_eq!(raw.data.dim(), (2, 2));
        assert_eq!(raw.data[[1, 1]], 4.0);
        assert_eq!(raw.sfreq, 1000.0);
        assert_eq!(raw.ch_types, vec![ChannelType::Eeg, ChannelType::Stim]);
    }

    #[test]
    fn truncated_file_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.safetensors");
        std::fs::write(&path, [1u8, 0, 0]).unwrap();
        assert!(matches!(StReader::open(&path), Err(PipelineError::Format { .. })));
    }

    #[test]
    fn huge_header_length_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.safetensors");
        let mut bytes = (u64::MAX - 4).to_le_bytes().to_vec();
        bytes.extend_from_slice(b"{}      ");
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(StReader::open(&path), Err(PipelineError::Format { .. })));
    }

    #[test]
    fn huge_data_offset_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.safetensors");
        let header = format!(
            r#"{{"x":{{"dtype":"F64","shape":[1],"data_offsets":[0,{}]}}}}"#,
            u64::MAX - 4
        );
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header.as_bytes());
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(StReader::open(&path), Err(PipelineError::Format { .. })));
    }
}
