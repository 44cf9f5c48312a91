use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use anyhow::{Result, Context};
use chrono::Utc;
use serde_json::json;

/// JSONL transcript of everything written to and read from a shell
pub struct TranscriptLogger {
    label: String,
    path: PathBuf,
    file: File,
    bytes_in: u64,
    bytes_out: u64,
}

impl TranscriptLogger {
    /// Create a transcript file under `dir`
    pub fn create(dir: &Path, label: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .context("Failed to create transcript directory")?;

        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let path = dir.join(format!(
            "transcript-{}-{}-{}.jsonl",
            label,
            timestamp,
            std::process::id()
        ));

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to create transcript file")?;

        Ok(Self {
            label: label.to_string(),
            path,
            file,
            bytes_in: 0,
            bytes_out: 0,
        })
    }

    /// Log bytes sent to the shell
    pub fn log_input(&mut self, data: &[u8]) -> Result<()> {
        self.bytes_in += data.len() as u64;
        self.log_chunk("in", data)
    }

    /// Log bytes received from the shell
    pub fn log_output(&mut self, data: &[u8]) -> Result<()> {
        self.bytes_out += data.len() as u64;
        self.log_chunk("out", data)
    }

    fn log_chunk(&mut self, direction: &str, data: &[u8]) -> Result<()> {
        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "session": self.label,
            "direction": direction,
            "data": String::from_utf8_lossy(data),
        });
        self.write_entry(&entry)
    }

    /// Log a connection lifecycle event
    pub fn log_event(&mut self, event: &str, detail: &str) -> Result<()> {
        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "session": self.label,
            "event": event,
            "detail": detail,
            "bytes_in": self.bytes_in,
            "bytes_out": self.bytes_out,
        });
        self.write_entry(&entry)
    }

    fn write_entry(&mut self, entry: &serde_json::Value) -> Result<()> {
        writeln!(self.file, "{}", entry)
            .context("Failed to write to transcript file")?;
        self.file.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
