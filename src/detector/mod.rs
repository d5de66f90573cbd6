//! The detector contract consumed by the training controller, plus a small
//! reference two-stage detector.

pub mod anchors;
pub mod boxes;
pub mod pooling;
pub mod two_stage;

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};

use crate::data::Batch;
use crate::error::{Result, TrainError};
use crate::math::matrix::Matrix;

pub use two_stage::TwoStageDetector;

/// Named parameter tensors; the on-disk layout of checkpoints and
/// pretrained weight files.
pub type StateDict = BTreeMap<String, Matrix>;

/// Mutable view of one trainable parameter and its gradient.
pub struct ParamMut<'a> {
    pub name: String,
    pub value: &'a mut Matrix,
    pub grad: &'a mut Matrix,
}

/// Per-stage loss values of one forward pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub rpn_cls: f64,
    pub rpn_box: f64,
    pub rcnn_cls: f64,
    pub rcnn_box: f64,
}

impl LossBreakdown {
    pub fn rpn(&self) -> f64 {
        self.rpn_cls + self.rpn_box
    }

    pub fn rcnn(&self) -> f64 {
        self.rcnn_cls + self.rcnn_box
    }

    pub fn total(&self) -> f64 {
        self.rpn() + self.rcnn()
    }

    /// `(name, value)` pairs in telemetry order.
    pub fn named(&self) -> [(&'static str, f64); 4] {
        [
            ("rpn_cls", self.rpn_cls),
            ("rpn_box", self.rpn_box),
            ("rcnn_cls", self.rcnn_cls),
            ("rcnn_box", self.rcnn_box),
        ]
    }
}

/// Classification debug counters of one forward pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugCounters {
    /// Foreground regions classified with their ground-truth class.
    pub true_positive: f64,
    /// Background regions classified as background.
    pub true_negative: f64,
    pub foreground: f64,
    pub background: f64,
}

/// Result of one forward pass.  `loss` is the composite loss that
/// `Detector::backward` propagates.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DetectorOutput {
    pub loss: f64,
    pub breakdown: LossBreakdown,
    pub counters: DebugCounters,
}

impl DetectorOutput {
    pub fn new(breakdown: LossBreakdown, counters: DebugCounters) -> Self {
        DetectorOutput { loss: breakdown.total(), breakdown, counters }
    }
}

/// A stateful trainable detector.
///
/// The controller calls `forward`, then `zero_grad`, then `backward`; after
/// `backward` every parameter exposed by `params_mut` carries the gradient of
/// the composite loss of the last forward pass.
pub trait Detector {
    fn forward(&mut self, batch: &Batch) -> Result<DetectorOutput>;

    /// Propagates the composite loss of the last `forward` into the gradients.
    fn backward(&mut self) -> Result<()>;

    /// All trainable parameters in a stable order.
    fn params_mut(&mut self) -> Vec<ParamMut<'_>>;

    fn zero_grad(&mut self) {
        for p in self.params_mut() {
            p.grad.fill(0.0);
        }
    }

    fn state_dict(&self) -> StateDict;

    /// Copies matching tensors into the detector and returns how many were
    /// copied.  `strict` requires every parameter to be present.  A shape
    /// mismatch is always an error.
    fn load_state_dict(&mut self, state: &StateDict, strict: bool) -> Result<usize> {
        let mut loaded = 0;
        for p in self.params_mut() {
            match state.get(&p.name) {
                Some(src) if src.same_shape(p.value) => {
                    *p.value = src.clone();
                    loaded += 1;
                }
                Some(src) => {
                    return Err(TrainError::Config(format!(
                        "parameter '{}' has shape {}x{}, weights file has {}x{}",
                        p.name, p.value.rows, p.value.cols, src.rows, src.cols
                    )));
                }
                None if strict => {
                    return Err(TrainError::Config(format!("parameter '{}' missing", p.name)));
                }
                None => {}
            }
        }
        Ok(loaded)
    }
}

/// Loads a JSON `StateDict` (pretrained weights) from disk.
pub fn load_state_dict_json(path: &std::path::Path) -> Result<StateDict> {
    let file = std::fs::File::open(path).map_err(|e| TrainError::Config(format!(
        "cannot open weights file '{}': {}", path.display(), e
    )))?;
    let reader = std::io::BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_loss_is_sum_of_stages() {
        let b = LossBreakdown { rpn_cls: 0.5, rpn_box: 0.25, rcnn_cls: 1.0, rcnn_box: 0.125 };
        let out = DetectorOutput::new(b, DebugCounters::default());
        assert!((out.loss - 1.875).abs() < 1e-12);
        assert!((b.rpn() - 0.75).abs() < 1e-12);
    }
}
