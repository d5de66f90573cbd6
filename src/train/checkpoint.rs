//! When to persist, and how checkpoints and the loss log are written.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};

use crate::detector::StateDict;
use crate::error::{Result, TrainError};

/// File name of the append-only loss log inside the output directory.
pub const TRAIN_LOSS_LOG: &str = "train_loss.log";

/// True on positive multiples of `interval`.
pub fn is_interval_step(step: u64, interval: u64) -> bool {
    step > 0 && interval > 0 && step % interval == 0
}

/// `{output_dir}/{prefix}_{step}.{ext}`
pub fn checkpoint_path(output_dir: &Path, prefix: &str, step: u64, ext: &str) -> PathBuf {
    output_dir.join(format!("{}_{}.{}", prefix, step, ext))
}

/// Trainable state at a given step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub step: u64,
    pub learning_rate: f64,
    pub params: StateDict,
}

impl Checkpoint {
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| TrainError::Checkpoint {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Checkpoint> {
        let file = File::open(path).map_err(|e| TrainError::Checkpoint {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_reader(BufReader::new(file)).map_err(|e| TrainError::Checkpoint {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// `train_loss.log`, opened in append mode.
pub struct TrainLossLog {
    file: File,
}

impl TrainLossLog {
    pub fn open(output_dir: &Path) -> Result<TrainLossLog> {
        let path = output_dir.join(TRAIN_LOSS_LOG);
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(TrainLossLog { file })
    }

    /// Appends `"{step}: {avg_loss:.5}\n"` and flushes.
    pub fn append(&mut self, step: u64, avg_loss: f64) -> Result<()> {
        writeln!(self.file, "{}", format_loss_line(step, avg_loss))?;
        self.file.flush()?;
        Ok(())
    }
}

pub fn format_loss_line(step: u64, avg_loss: f64) -> String {
    format!("{}: {:.5}", step, avg_loss)
}
