//! Recording of measurement series as tab-separated `time<TAB>value` files.

use crate::signal::TimeSeries;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use std::path::{Path, PathBuf};

/// Destination for the series of a finished or aborted cycle.
pub trait RecordSink {
    /// Store `samples` under `name`; sample times are `index / fs`.
    fn record_series(&mut self, name: &str, fs: f64, samples: &[f64]) -> Result<()>;
}

/// `YYYY-MM-DD_HH-MM-SS_<series>.dat`
pub fn timestamped_name(at: DateTime<Local>, series: &str) -> String {
    format!("{}_{}.dat", at.format("%Y-%m-%d_%H-%M-%S"), series)
}

/// Writes each series to its own `.dat` file in a directory.
#[derive(Debug, Clone)]
pub struct DatRecorder {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl DatRecorder {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            written: Vec::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Files written so far, oldest first.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl RecordSink for DatRecorder {
    fn record_series(&mut self, name: &str, fs: f64, samples: &[f64]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let path = self.dir.join(name);
        write_dat(&path, fs, samples)?;
        self.written.push(path);
        Ok(())
    }
}

/// Write one `time<TAB>value` line per sample.
pub fn write_dat(path: &Path, fs: f64, samples: &[f64]) -> Result<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for (i, value) in samples.iter().enumerate() {
        let t = i as f64 / fs;
        writer
            .write_record(&[t.to_string(), value.to_string()])
            .with_context(|| format!("writing {}", path.display()))?;
    }
    writer.flush().with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

/// Read a `time<TAB>value` file; the sampling rate comes from the first time step.
pub fn read_dat(path: &Path) -> Result<TimeSeries> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    let mut times = Vec::with_capacity(2);
    let mut data = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading {} row {}", path.display(), row + 1))?;
        let (time_str, value_str) = match (record.get(0), record.get(1)) {
            (Some(t), Some(v)) => (t, v),
            _ => anyhow::bail!("{} row {} needs time and value columns", path.display(), row + 1),
        };
        if times.len() < 2 {
            let t: f64 = time_str
                .parse()
                .with_context(|| format!("parsing time {}", time_str))?;
            times.push(t);
        }
        let value: f64 = value_str
            .parse()
            .with_context(|| format!("parsing value {}", value_str))?;
        data.push(value);
    }
    if data.is_empty() {
        anyhow::bail!("no samples in {}", path.display());
    }
    let fs = match times.as_slice() {
        [t0, t1] if t1 > t0 => 1.0 / (t1 - t0),
        _ => anyhow::bail!("{} needs two increasing timestamps to infer the sampling rate", path.display()),
    };
    Ok(TimeSeries { fs, data })
}
