pub mod clip;
pub mod sgd;

pub use clip::clip_gradient;
pub use sgd::{Sgd, SgdConfig};
