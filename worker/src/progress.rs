//! Per step progress records.

use std::{
    fmt,
    fs::{self, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Serialize;

const SUMMARIES_FILE: &str = "summaries.jsonl";

/// The outcome of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressRecord {
    pub step: u64,
    pub loss: f32,
    #[serde(rename = "duration_secs", serialize_with = "as_secs")]
    pub duration: Duration,
}

fn as_secs<S: serde::Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}

impl fmt::Display for ProgressRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step {} - loss = {:.3}, ({:.3} sec/step)",
            self.step,
            self.loss,
            self.duration.as_secs_f64()
        )
    }
}

/// Appends progress records to `<logdir>/summaries.jsonl`, one JSON object per line.
#[derive(Debug, Clone)]
pub struct SummaryWriter {
    path: PathBuf,
}

impl SummaryWriter {
    /// Creates a new `SummaryWriter`, nothing is written until the first record.
    pub fn new(logdir: &Path) -> Self {
        Self {
            path: logdir.join(SUMMARIES_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `record`, creating the logdir if needed.
    pub fn write(&self, record: &ProgressRecord) -> io::Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}
