pub mod bce;
pub mod cross_entropy;
pub mod smooth_l1;

pub use bce::BceLoss;
pub use cross_entropy::CrossEntropyLoss;
pub use smooth_l1::SmoothL1Loss;
