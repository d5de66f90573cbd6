pub mod math;
pub mod activation;
pub mod layers;
pub mod loss;
pub mod optim;
pub mod detector;
pub mod data;
pub mod telemetry;
pub mod train;
pub mod error;
pub mod logging;

// Convenience re-exports
pub use math::matrix::Matrix;
pub use activation::activation::ActivationFunction;
pub use layers::dense::Layer;
pub use optim::sgd::{Sgd, SgdConfig};
pub use detector::{Detector, DetectorOutput, TwoStageDetector};
pub use data::{Batch, MinibatchProvider};
pub use telemetry::{NoopTelemetry, TelemetrySink};
pub use train::{TrainConfig, TrainReport, Trainer};
pub use error::{Result, TrainError};
