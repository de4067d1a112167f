//! # Result Sinks
//!
//! Downstream consumers receive finished [`RunRecord`]s through
//! [`ResultSink`]. [`JsonLinesSink`] appends one JSON object per run.

use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufWriter;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use tracing::info;

use super::record::RunRecord;
use crate::error::Result;

pub trait ResultSink {
  fn write(&mut self, record: &RunRecord) -> Result<()>;
}

/// Appends records to a `.jsonl` file.
#[derive(Debug)]
pub struct JsonLinesSink {
  path: PathBuf,
  writer: BufWriter<File>,
}

impl JsonLinesSink {
  /// Open `path` for appending, creating it when missing.
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref().to_path_buf();
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(Self {
      path,
      writer: BufWriter::new(file),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl ResultSink for JsonLinesSink {
  fn write(&mut self, record: &RunRecord) -> Result<()> {
    serde_json::to_writer(&mut self.writer, record)?;
    self.writer.write_all(b"\n")?;
    self.writer.flush()?;
    info!(path = %self.path.display(), assets = record.universe.len(), "run record written");
    Ok(())
  }
}
