use std::path::PathBuf;
use std::sync::mpsc::Sender;

use tracing::{debug, info};

use crate::data::MinibatchProvider;
use crate::detector::{DebugCounters, Detector, DetectorOutput, StateDict};
use crate::error::Result;
use crate::optim::{clip_gradient, Sgd, SgdConfig};
use crate::telemetry::{NoopTelemetry, TelemetrySink};
use crate::train::checkpoint::{checkpoint_path, is_interval_step, Checkpoint, TrainLossLog};
use crate::train::log_record::{AccuracyBreakdown, LogRecord};
use crate::train::metrics::MetricsAggregator;
use crate::train::schedule::LrSchedule;
use crate::train::train_config::TrainConfig;

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub last_step: u64,
    pub final_learning_rate: f64,
    /// Times the optimizer was rebuilt after a decay step.
    pub optimizer_rebuilds: u64,
    /// Checkpoint files written, in step order.
    pub checkpoints: Vec<PathBuf>,
    /// Display-interval records emitted.
    pub log_records: usize,
}

/// Drives `start_step..=end_step` over a provider and a detector.
///
/// Owns every piece of mutable training state.  Each step runs, in order:
/// fetch batch, forward, accumulate counters, zero-grad / backward / clip /
/// optimizer step, display, telemetry, persistence, decay, reset.  The
/// periodic actions are independent checks and several may fire on one step.
pub struct Trainer<P, D> {
    config: TrainConfig,
    provider: P,
    detector: D,
    optimizer: Sgd,
    schedule: LrSchedule,
    metrics: MetricsAggregator,
    telemetry: Box<dyn TelemetrySink>,
    progress_tx: Option<Sender<LogRecord>>,
    rebuilds: u64,
}

impl<P: MinibatchProvider, D: Detector> Trainer<P, D> {
    /// Validates `config`; telemetry starts disabled.
    pub fn new(config: TrainConfig, provider: P, detector: D) -> Result<Self> {
        config.validate()?;
        let schedule = LrSchedule::new(
            config.learning_rate,
            config.lr_decay_steps.iter().copied(),
            config.lr_decay,
        );
        let optimizer = Sgd::new(sgd_config(&config, config.learning_rate), 0);
        Ok(Trainer {
            config,
            provider,
            detector,
            optimizer,
            schedule,
            metrics: MetricsAggregator::new(),
            telemetry: Box::new(NoopTelemetry),
            progress_tx: None,
            rebuilds: 0,
        })
    }

    pub fn with_telemetry(mut self, telemetry: Box<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Every display record is also sent here.  A dropped receiver is ignored.
    pub fn with_progress(mut self, tx: Sender<LogRecord>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    /// Copies `state` into the detector; returns the number of tensors loaded.
    pub fn load_weights(&mut self, state: &StateDict, strict: bool) -> Result<usize> {
        self.detector.load_state_dict(state, strict)
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn optimizer(&self) -> &Sgd {
        &self.optimizer
    }

    pub fn metrics(&self) -> &MetricsAggregator {
        &self.metrics
    }

    pub fn learning_rate(&self) -> f64 {
        self.schedule.current()
    }

    /// Runs every step up to `end_step`.  Any provider, detector or I/O
    /// error stops the run and is returned as is.
    pub fn run(&mut self) -> Result<TrainReport> {
        std::fs::create_dir_all(&self.config.output_dir)?;
        let mut loss_log = TrainLossLog::open(&self.config.output_dir)?;

        let mut report = TrainReport {
            last_step: self.config.start_step,
            final_learning_rate: self.schedule.current(),
            optimizer_rebuilds: 0,
            checkpoints: Vec::new(),
            log_records: 0,
        };

        info!(
            "training steps {}..={} at lr {}, output in {}",
            self.config.start_step,
            self.config.end_step,
            self.schedule.current(),
            self.config.output_dir.display()
        );

        self.metrics.reset();
        for step in self.config.start_step..=self.config.end_step {
            self.train_step(step, &mut loss_log, &mut report)?;
            report.last_step = step;
        }

        report.final_learning_rate = self.schedule.current();
        report.optimizer_rebuilds = self.rebuilds;
        info!("training finished at step {}", report.last_step);
        Ok(report)
    }

    fn train_step(&mut self, step: u64, loss_log: &mut TrainLossLog, report: &mut TrainReport) -> Result<()> {
        let batch = self.provider.next_batch()?;
        let output = self.detector.forward(&batch)?;

        let counters = if self.config.debug { output.counters } else { DebugCounters::default() };
        self.metrics.accumulate(output.loss, &counters);

        self.detector.zero_grad();
        self.detector.backward()?;
        let grad_norm = {
            let mut params = self.detector.params_mut();
            let norm = clip_gradient(&mut params, self.config.clip_norm);
            self.optimizer.step(&mut params);
            norm
        };
        debug!(step, loss = output.loss, grad_norm, "step done");

        let mut pending_reset = false;

        if is_interval_step(step, self.config.display_interval) {
            let record = self.log_record(step, batch.im_name.clone(), &output);
            info!("{}", record.summary_line());
            if let Some((rates, losses)) = record.accuracy_lines() {
                info!("{}", rates);
                info!("{}", losses);
            }
            if let Some(tx) = &self.progress_tx {
                if tx.send(record).is_err() {
                    debug!("progress receiver dropped");
                }
            }
            report.log_records += 1;
            pending_reset = true;
        }

        if self.telemetry.is_enabled() && step % self.config.telemetry_interval == 0 {
            self.push_telemetry(step, &output);
        }

        if is_interval_step(step, self.config.snapshot_interval) {
            let path = checkpoint_path(
                &self.config.output_dir,
                &self.config.model_prefix,
                step,
                &self.config.checkpoint_ext,
            );
            let checkpoint = Checkpoint {
                step,
                learning_rate: self.schedule.current(),
                params: self.detector.state_dict(),
            };
            checkpoint.save(&path)?;
            info!("save model: {}", path.display());
            // Normalized by the global step, not by the interval length.
            loss_log.append(step, self.metrics.loss_sum() / step as f64)?;
            report.checkpoints.push(path);
        }

        if let Some(lr) = self.schedule.on_step(step) {
            self.rebuild_optimizer(lr);
            info!("step {}: learning rate decayed to {}", step, lr);
        }

        if pending_reset {
            self.metrics.reset();
        }
        Ok(())
    }

    fn log_record(&self, step: u64, image: String, output: &DetectorOutput) -> LogRecord {
        let avg = self.metrics.interval_averages();
        let accuracy = self.config.debug.then(|| AccuracyBreakdown {
            true_positive_pct: avg.tp_rate.map(|r| r * 100.0),
            true_negative_pct: avg.tn_rate.map(|r| r * 100.0),
            fg_per_step: avg.fg_per_step,
            bg_per_step: avg.bg_per_step,
            losses: output.breakdown,
        });
        LogRecord {
            step,
            image,
            mean_loss: avg.mean_loss,
            throughput: avg.throughput,
            learning_rate: self.schedule.current(),
            accuracy,
        }
    }

    fn push_telemetry(&mut self, step: u64, output: &DetectorOutput) {
        self.telemetry.add_scalar("train_loss", self.metrics.mean_loss(), step);
        self.telemetry.add_scalar("learning_rate", self.schedule.current(), step);
        if self.config.debug {
            let avg = self.metrics.interval_averages();
            if let Some(tp) = avg.tp_rate {
                self.telemetry.add_scalar("true_positive", tp * 100.0, step);
            }
            if let Some(tn) = avg.tn_rate {
                self.telemetry.add_scalar("true_negative", tn * 100.0, step);
            }
            self.telemetry.add_scalars(&output.breakdown.named(), step);
        }
    }

    /// Fresh optimizer at `learning_rate`; momentum state is dropped.
    fn rebuild_optimizer(&mut self, learning_rate: f64) {
        let generation = self.optimizer.generation() + 1;
        self.optimizer = Sgd::new(sgd_config(&self.config, learning_rate), generation);
        self.rebuilds += 1;
    }
}

fn sgd_config(config: &TrainConfig, learning_rate: f64) -> SgdConfig {
    SgdConfig {
        learning_rate,
        momentum: config.momentum,
        weight_decay: config.weight_decay,
        skip: config.frozen_param_count,
    }
}
