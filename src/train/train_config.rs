use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};

use crate::error::{Result, ResultExt, TrainError};

/// Immutable hyperparameters of one training run.
///
/// Loaded once from a JSON file (missing keys take the defaults below) and
/// handed to the `Trainer` by value; nothing reads hyperparameters from
/// anywhere else.
///
/// # Fields
/// - `display_interval`   — steps between console progress lines; the
///                          interval metrics reset after each line
/// - `telemetry_interval` — steps between telemetry pushes
/// - `snapshot_interval`  — steps between checkpoints / `train_loss.log` lines
/// - `lr_decay_steps`     — steps at which the rate is multiplied by `lr_decay`
/// - `frozen_param_count` — leading parameters excluded from the optimizer
/// - `debug`              — collect and report accuracy counters and the
///                          per-stage loss breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub learning_rate: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub display_interval: u64,
    pub telemetry_interval: u64,
    pub snapshot_interval: u64,
    pub start_step: u64,
    pub end_step: u64,
    pub lr_decay_steps: Vec<u64>,
    pub lr_decay: f64,
    pub clip_norm: f64,
    pub frozen_param_count: usize,
    pub rand_seed: Option<u64>,
    pub debug: bool,
    pub output_dir: PathBuf,
    pub model_prefix: String,
    pub checkpoint_ext: String,
    pub data: DataConfig,
    pub detector: DetectorConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            learning_rate: 0.001,
            momentum: 0.9,
            weight_decay: 0.0005,
            display_interval: 10,
            telemetry_interval: 100,
            snapshot_interval: 4000,
            start_step: 0,
            end_step: 120_000,
            lr_decay_steps: vec![60_000, 80_000, 11_000],
            lr_decay: 0.1,
            clip_norm: 10.0,
            frozen_param_count: 0,
            rand_seed: Some(1024),
            debug: true,
            output_dir: PathBuf::from("models/faster_rcnn"),
            model_prefix: "faster_rcnn".to_string(),
            checkpoint_ext: "json".to_string(),
            data: DataConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl TrainConfig {
    pub fn load_json(path: &Path) -> Result<TrainConfig> {
        let file = std::fs::File::open(path)
            .context(&format!("cannot open config '{}'", path.display()))?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .context(&format!("invalid config '{}'", path.display()))
    }

    /// Rejects configurations the loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(TrainError::Config(msg));

        if self.display_interval == 0 {
            return fail("display_interval must be at least 1".into());
        }
        if self.telemetry_interval == 0 {
            return fail("telemetry_interval must be at least 1".into());
        }
        if self.snapshot_interval == 0 {
            return fail("snapshot_interval must be at least 1".into());
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return fail(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if !(self.lr_decay > 0.0 && self.lr_decay <= 1.0) {
            return fail(format!("lr_decay must be in (0, 1], got {}", self.lr_decay));
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return fail(format!("momentum must be in [0, 1), got {}", self.momentum));
        }
        if !(self.weight_decay >= 0.0) {
            return fail(format!("weight_decay must be non-negative, got {}", self.weight_decay));
        }
        if !(self.clip_norm.is_finite() && self.clip_norm > 0.0) {
            return fail(format!("clip_norm must be positive, got {}", self.clip_norm));
        }
        if self.start_step > self.end_step {
            return fail(format!(
                "start_step {} is after end_step {}", self.start_step, self.end_step
            ));
        }
        if self.model_prefix.is_empty() {
            return fail("model_prefix must not be empty".into());
        }
        if self.detector.num_classes < 2 {
            return fail("detector.num_classes must include background and at least one class".into());
        }
        Ok(())
    }
}

/// Image preprocessing for `RoiDataLayer`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Target length of the shorter image side.
    pub scale: u32,
    /// Upper bound on the longer image side.
    pub max_size: u32,
    /// BGR means subtracted from every pixel.
    pub pixel_means: [f64; 3],
    pub use_flipped: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            scale: 600,
            max_size: 1000,
            pixel_means: [102.9801, 115.9465, 122.7717],
            use_flipped: true,
        }
    }
}

/// Sampling sizes and overlap thresholds of the reference detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Including background.
    pub num_classes: usize,
    pub hidden_size: usize,
    pub init_std: f64,
    pub anchor_grid: usize,
    pub anchor_scales: Vec<f64>,
    pub rpn_batch_size: usize,
    pub rpn_fg_fraction: f64,
    pub rpn_positive_overlap: f64,
    pub rpn_negative_overlap: f64,
    /// Anchors covered by a don't-care area beyond this fraction are ignored.
    pub dontcare_overlap: f64,
    pub nms_threshold: f64,
    pub post_nms_top_n: usize,
    pub rcnn_batch_size: usize,
    pub rcnn_fg_fraction: f64,
    pub fg_threshold: f64,
    pub bg_threshold_lo: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            num_classes: 21,
            hidden_size: 32,
            init_std: 0.01,
            anchor_grid: 4,
            anchor_scales: vec![0.25, 0.5, 0.75],
            rpn_batch_size: 64,
            rpn_fg_fraction: 0.5,
            rpn_positive_overlap: 0.7,
            rpn_negative_overlap: 0.3,
            dontcare_overlap: 0.5,
            nms_threshold: 0.7,
            post_nms_top_n: 16,
            rcnn_batch_size: 32,
            rcnn_fg_fraction: 0.25,
            fg_threshold: 0.5,
            bg_threshold_lo: 0.0,
        }
    }
}
