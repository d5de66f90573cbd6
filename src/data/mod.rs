//! Minibatch retrieval: the provider contract and the batch layout.

pub mod data_layer;
pub mod roidb;
pub mod synthetic;

use crate::detector::boxes::BBox;
use crate::error::Result;

pub use data_layer::RoiDataLayer;
pub use roidb::{Roidb, RoiRecord};
pub use synthetic::SyntheticProvider;

/// Image tensor in CHW layout with pixel means already subtracted.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBlob {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub data: Vec<f32>,
}

/// One ground-truth object.  Class 0 is background and never appears here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GtBox {
    pub bbox: BBox,
    pub class: usize,
}

/// One training minibatch (a single image and its annotations).
#[derive(Debug, Clone)]
pub struct Batch {
    pub image: ImageBlob,
    /// `[height, width, scale]` of the blob after resizing.
    pub im_info: [f64; 3],
    pub gt_boxes: Vec<GtBox>,
    /// Parallel to `gt_boxes`.
    pub gt_ishard: Vec<bool>,
    /// Regions excluded from the loss.
    pub dontcare_areas: Vec<BBox>,
    /// Identifier shown in progress logs.
    pub im_name: String,
}

impl Batch {
    pub fn is_hard(&self, i: usize) -> bool {
        self.gt_ishard.get(i).copied().unwrap_or(false)
    }
}

/// Yields one minibatch per call.
///
/// Failing to produce a batch is fatal for the run; implementations must not
/// silently skip.
pub trait MinibatchProvider {
    fn next_batch(&mut self) -> Result<Batch>;
}

impl<P: MinibatchProvider + ?Sized> MinibatchProvider for Box<P> {
    fn next_batch(&mut self) -> Result<Batch> {
        (**self).next_batch()
    }
}
