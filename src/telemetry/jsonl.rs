use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use serde::Serialize;

use super::TelemetrySink;

pub const TELEMETRY_FILE: &str = "telemetry.jsonl";

#[derive(Debug, Serialize)]
struct ScalarEntry<'a> {
    experiment: &'a str,
    name: &'a str,
    value: f64,
    step: u64,
}

/// Appends one JSON object per scalar to a file.
pub struct JsonlTelemetry {
    file: File,
    experiment: String,
    failed: bool,
}

impl JsonlTelemetry {
    pub fn create(path: &Path, experiment: &str) -> io::Result<JsonlTelemetry> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(JsonlTelemetry { file, experiment: experiment.to_string(), failed: false })
    }

    fn write_entry(&mut self, name: &str, value: f64, step: u64) -> io::Result<()> {
        let entry = ScalarEntry { experiment: &self.experiment, name, value, step };
        serde_json::to_writer(&mut self.file, &entry)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        self.file.write_all(b"\n")?;
        self.file.flush()
    }
}

impl TelemetrySink for JsonlTelemetry {
    fn add_scalar(&mut self, name: &str, value: f64, step: u64) {
        if let Err(e) = self.write_entry(name, value, step) {
            // Warn once; later failures are dropped silently.
            if !self.failed {
                tracing::warn!("telemetry write failed: {e}");
                self.failed = true;
            }
        }
    }
}
