//! Error types for the training controller.
//!
//! Every variant except telemetry problems is fatal: the binary logs it and
//! exits.  Telemetry sinks swallow their own failures.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    /// Missing or invalid hyperparameter / path, raised before the loop starts.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The minibatch provider could not produce a batch.
    #[error("Data starvation: {0}")]
    DataStarvation(String),

    #[error("Failed to load image at '{path}': {message}")]
    Image { path: PathBuf, message: String },

    #[error("Detector error: {0}")]
    Detector(String),

    #[error("Checkpoint error at '{path}': {message}")]
    Checkpoint { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrainError>;

/// Attaches a short description to foreign errors.
pub trait ResultExt<T> {
    fn context(self, msg: &str) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| TrainError::Config(format!("{}: {}", msg, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_class() {
        let err = TrainError::DataStarvation("roidb is empty".to_string());
        assert_eq!(err.to_string(), "Data starvation: roidb is empty");
    }

    #[test]
    fn context_prefixes_foreign_errors() {
        let parsed: std::result::Result<u32, _> = "ten".parse::<u32>();
        let err = parsed.context("display_interval").unwrap_err();
        assert!(matches!(&err, TrainError::Config(m) if m.starts_with("display_interval: ")));
    }
}
