pub mod checkpoint;
pub mod log_record;
pub mod metrics;
pub mod schedule;
pub mod train_config;
pub mod trainer;

pub use checkpoint::{Checkpoint, TrainLossLog};
pub use log_record::{AccuracyBreakdown, LogRecord};
pub use metrics::{IntervalAverages, MetricsAggregator};
pub use schedule::LrSchedule;
pub use train_config::{DataConfig, DetectorConfig, TrainConfig};
pub use trainer::{TrainReport, Trainer};
