use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use ferrite_rcnn::data::{Batch, GtBox, ImageBlob, MinibatchProvider};
use ferrite_rcnn::detector::{DebugCounters, Detector, DetectorOutput, LossBreakdown, ParamMut, StateDict};
use ferrite_rcnn::telemetry::TelemetrySink;
use ferrite_rcnn::train::checkpoint::{Checkpoint, TRAIN_LOSS_LOG};
use ferrite_rcnn::train::{LogRecord, TrainConfig, Trainer};
use ferrite_rcnn::{Matrix, Result, TrainError};

// ---------------------------------------------------------------------------
// Scripted doubles
// ---------------------------------------------------------------------------

struct ScriptedProvider {
    produced: usize,
    fail_at: Option<usize>,
}

impl ScriptedProvider {
    fn new() -> Self {
        ScriptedProvider { produced: 0, fail_at: None }
    }

    fn failing_at(call: usize) -> Self {
        ScriptedProvider { produced: 0, fail_at: Some(call) }
    }
}

impl MinibatchProvider for ScriptedProvider {
    fn next_batch(&mut self) -> Result<Batch> {
        if self.fail_at == Some(self.produced) {
            return Err(TrainError::DataStarvation("scripted provider ran dry".into()));
        }
        let name = format!("img_{:03}", self.produced);
        self.produced += 1;
        Ok(Batch {
            image: ImageBlob { channels: 3, height: 4, width: 4, data: vec![0.0; 48] },
            im_info: [4.0, 4.0, 1.0],
            gt_boxes: vec![GtBox { bbox: [0.0, 0.0, 2.0, 2.0], class: 1 }],
            gt_ishard: vec![false],
            dontcare_areas: Vec::new(),
            im_name: name,
        })
    }
}

/// One-weight detector returning a constant loss and fixed counters; the
/// gradient is always 1 so every optimizer step is visible in the weight.
struct ScriptedDetector {
    frozen: Matrix,
    frozen_grad: Matrix,
    weight: Matrix,
    grad: Matrix,
    loss: f64,
    counters: DebugCounters,
    forwarded: bool,
}

impl ScriptedDetector {
    fn new(loss: f64, counters: DebugCounters) -> Self {
        ScriptedDetector {
            frozen: Matrix::row(vec![1.0]),
            frozen_grad: Matrix::row(vec![0.0]),
            weight: Matrix::row(vec![0.0]),
            grad: Matrix::row(vec![0.0]),
            loss,
            counters,
            forwarded: false,
        }
    }
}

impl Detector for ScriptedDetector {
    fn forward(&mut self, _batch: &Batch) -> Result<DetectorOutput> {
        self.forwarded = true;
        let breakdown = LossBreakdown { rpn_cls: self.loss, ..LossBreakdown::default() };
        Ok(DetectorOutput::new(breakdown, self.counters))
    }

    fn backward(&mut self) -> Result<()> {
        if !self.forwarded {
            return Err(TrainError::Detector("backward without forward".into()));
        }
        self.forwarded = false;
        self.frozen_grad.data[0][0] += 1.0;
        self.grad.data[0][0] += 1.0;
        Ok(())
    }

    fn params_mut(&mut self) -> Vec<ParamMut<'_>> {
        vec![
            ParamMut { name: "frozen".into(), value: &mut self.frozen, grad: &mut self.frozen_grad },
            ParamMut { name: "weight".into(), value: &mut self.weight, grad: &mut self.grad },
        ]
    }

    fn state_dict(&self) -> StateDict {
        let mut state = StateDict::new();
        state.insert("frozen".into(), self.frozen.clone());
        state.insert("weight".into(), self.weight.clone());
        state
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    points: Arc<Mutex<Vec<(String, f64, u64)>>>,
}

impl TelemetrySink for RecordingSink {
    fn add_scalar(&mut self, name: &str, value: f64, step: u64) {
        self.points.lock().unwrap().push((name.to_string(), value, step));
    }
}

fn counters(tp: f64, tn: f64, fg: f64, bg: f64) -> DebugCounters {
    DebugCounters { true_positive: tp, true_negative: tn, foreground: fg, background: bg }
}

fn config(dir: &std::path::Path) -> TrainConfig {
    TrainConfig {
        learning_rate: 0.01,
        momentum: 0.0,
        weight_decay: 0.0,
        display_interval: 5,
        telemetry_interval: 100,
        snapshot_interval: 5,
        start_step: 0,
        end_step: 10,
        lr_decay_steps: Vec::new(),
        output_dir: dir.to_path_buf(),
        ..TrainConfig::default()
    }
}

fn collect(rx: mpsc::Receiver<LogRecord>) -> Vec<LogRecord> {
    rx.try_iter().collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn ten_steps_log_and_persist_at_five_and_ten() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = mpsc::channel();
    let detector = ScriptedDetector::new(1.0, counters(1.0, 1.0, 2.0, 2.0));
    let mut trainer = Trainer::new(config(dir.path()), ScriptedProvider::new(), detector)
        .unwrap()
        .with_progress(tx);

    let report = trainer.run().unwrap();

    let steps: Vec<u64> = collect(rx).iter().map(|r| r.step).collect();
    assert_eq!(steps, vec![5, 10]);
    assert_eq!(report.log_records, 2);
    assert_eq!(report.last_step, 10);
    assert_eq!(
        report.checkpoints,
        vec![dir.path().join("faster_rcnn_5.json"), dir.path().join("faster_rcnn_10.json")]
    );
    for path in &report.checkpoints {
        assert!(path.exists());
    }
    assert!(!dir.path().join("faster_rcnn_0.json").exists());

    let log = std::fs::read_to_string(dir.path().join(TRAIN_LOSS_LOG)).unwrap();
    assert_eq!(log.lines().count(), 2);
    assert!(log.starts_with("5: "));
}

#[test]
fn decay_step_rebuilds_optimizer_once() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig { lr_decay_steps: vec![3], lr_decay: 0.1, end_step: 6, ..config(dir.path()) };
    let (tx, rx) = mpsc::channel();
    let detector = ScriptedDetector::new(1.0, DebugCounters::default());
    let mut trainer = Trainer::new(cfg, ScriptedProvider::new(), detector).unwrap().with_progress(tx);
    assert_eq!(trainer.optimizer().generation(), 0);

    let report = trainer.run().unwrap();

    assert_eq!(report.optimizer_rebuilds, 1);
    assert_eq!(trainer.optimizer().generation(), 1);
    assert!((report.final_learning_rate - 0.001).abs() < 1e-15);
    assert!((trainer.optimizer().learning_rate() - 0.001).abs() < 1e-15);
    assert!((trainer.learning_rate() - 0.001).abs() < 1e-15);

    let records = collect(rx);
    assert_eq!(records.len(), 1);
    assert!((records[0].learning_rate - 0.001).abs() < 1e-15);
}

#[test]
fn rate_steps_before_and_after_decay() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig {
        lr_decay_steps: vec![1],
        lr_decay: 0.5,
        learning_rate: 1.0,
        start_step: 0,
        end_step: 2,
        frozen_param_count: 1,
        clip_norm: 100.0,
        ..config(dir.path())
    };
    let detector = ScriptedDetector::new(1.0, DebugCounters::default());
    let mut trainer = Trainer::new(cfg, ScriptedProvider::new(), detector).unwrap();
    trainer.run().unwrap();

    // Steps 0 and 1 at lr 1.0, step 2 at 0.5, each with unit gradient.
    let d = trainer.detector();
    assert!((d.weight.data[0][0] + 2.5).abs() < 1e-12);
    assert_eq!(d.frozen.data[0][0], 1.0);
}

#[test]
fn zero_foreground_reports_undefined_rate() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig { end_step: 5, ..config(dir.path()) };
    let (tx, rx) = mpsc::channel();
    let detector = ScriptedDetector::new(1.0, counters(0.0, 3.0, 0.0, 4.0));
    let mut trainer = Trainer::new(cfg, ScriptedProvider::new(), detector).unwrap().with_progress(tx);
    trainer.run().unwrap();

    let records = collect(rx);
    let acc = records[0].accuracy.expect("debug run collects accuracy");
    assert_eq!(acc.true_positive_pct, None);
    assert_eq!(acc.true_negative_pct, Some(75.0));
    assert_eq!(acc.fg_per_step, 0.0);
    let (rates, _) = records[0].accuracy_lines().unwrap();
    assert!(rates.contains("TP: n/a"));
}

#[test]
fn counters_are_not_collected_outside_debug() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig { end_step: 5, debug: false, ..config(dir.path()) };
    let (tx, rx) = mpsc::channel();
    let detector = ScriptedDetector::new(1.0, counters(1.0, 1.0, 1.0, 1.0));
    let mut trainer = Trainer::new(cfg, ScriptedProvider::new(), detector).unwrap().with_progress(tx);
    trainer.run().unwrap();

    assert!(collect(rx)[0].accuracy.is_none());
    assert_eq!(trainer.metrics().counters(), DebugCounters::default());
}

#[test]
fn metrics_reset_after_each_display() {
    let dir = tempfile::tempdir().unwrap();
    let detector = ScriptedDetector::new(2.0, counters(1.0, 1.0, 1.0, 1.0));
    let cfg = TrainConfig { end_step: 5, ..config(dir.path()) };
    let mut trainer = Trainer::new(cfg, ScriptedProvider::new(), detector).unwrap();
    trainer.run().unwrap();
    assert_eq!(trainer.metrics().steps_since_reset(), 0);
    assert_eq!(trainer.metrics().loss_sum(), 0.0);
    assert_eq!(trainer.metrics().counters(), DebugCounters::default());

    let dir = tempfile::tempdir().unwrap();
    let detector = ScriptedDetector::new(2.0, counters(1.0, 1.0, 1.0, 1.0));
    let cfg = TrainConfig { end_step: 7, ..config(dir.path()) };
    let mut trainer = Trainer::new(cfg, ScriptedProvider::new(), detector).unwrap();
    trainer.run().unwrap();
    assert_eq!(trainer.metrics().steps_since_reset(), 2);
    assert!((trainer.metrics().loss_sum() - 4.0).abs() < 1e-12);
}

#[test]
fn persisted_average_uses_global_step() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig { snapshot_interval: 10, ..config(dir.path()) };
    let (tx, rx) = mpsc::channel();
    let detector = ScriptedDetector::new(2.0, DebugCounters::default());
    let mut trainer = Trainer::new(cfg, ScriptedProvider::new(), detector).unwrap().with_progress(tx);
    trainer.run().unwrap();

    let records = collect(rx);
    assert!((records[1].mean_loss - 2.0).abs() < 1e-12);
    // Steps 6..=10 accumulate 10.0, divided by step 10.
    let log = std::fs::read_to_string(dir.path().join(TRAIN_LOSS_LOG)).unwrap();
    assert_eq!(log, "10: 1.00000\n");
}

#[test]
fn telemetry_receives_series_on_its_own_interval() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig { telemetry_interval: 4, end_step: 8, ..config(dir.path()) };
    let sink = RecordingSink::default();
    let points = Arc::clone(&sink.points);
    let detector = ScriptedDetector::new(1.0, counters(0.0, 1.0, 0.0, 2.0));
    let mut trainer = Trainer::new(cfg, ScriptedProvider::new(), detector)
        .unwrap()
        .with_telemetry(Box::new(sink));
    trainer.run().unwrap();

    let points = points.lock().unwrap();
    let loss_steps: Vec<u64> = points.iter().filter(|p| p.0 == "train_loss").map(|p| p.2).collect();
    assert_eq!(loss_steps, vec![0, 4, 8]);
    assert_eq!(points.iter().filter(|p| p.0 == "learning_rate").count(), 3);
    assert_eq!(points.iter().filter(|p| p.0 == "rpn_cls").count(), 3);
    // No foreground seen: the rate is skipped, the defined one is sent.
    assert!(points.iter().all(|p| p.0 != "true_positive"));
    assert!(points.iter().any(|p| p.0 == "true_negative" && (p.1 - 50.0).abs() < 1e-12));
}

#[test]
fn provider_failure_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let detector = ScriptedDetector::new(1.0, DebugCounters::default());
    let mut trainer = Trainer::new(config(dir.path()), ScriptedProvider::failing_at(7), detector).unwrap();

    let err = trainer.run().unwrap_err();
    assert!(matches!(err, TrainError::DataStarvation(_)));
    assert!(dir.path().join("faster_rcnn_5.json").exists());
    assert!(!dir.path().join("faster_rcnn_10.json").exists());
}

#[test]
fn invalid_config_is_rejected_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig { snapshot_interval: 0, ..config(dir.path()) };
    let detector = ScriptedDetector::new(1.0, DebugCounters::default());
    let result = Trainer::new(cfg, ScriptedProvider::new(), detector);
    assert!(matches!(result, Err(TrainError::Config(_))));
}

#[test]
fn checkpoint_holds_state_and_rate() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig { end_step: 5, ..config(dir.path()) };
    let detector = ScriptedDetector::new(1.0, DebugCounters::default());
    let mut trainer = Trainer::new(cfg, ScriptedProvider::new(), detector).unwrap();
    let report = trainer.run().unwrap();

    let ckpt = Checkpoint::load(&report.checkpoints[0]).unwrap();
    assert_eq!(ckpt.step, 5);
    assert_eq!(ckpt.learning_rate, 0.01);
    assert_eq!(ckpt.params, trainer.detector().state_dict());
}

#[test]
fn gradients_are_clipped_before_the_update() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig { learning_rate: 1.0, clip_norm: 0.5, end_step: 0, ..config(dir.path()) };
    let detector = ScriptedDetector::new(1.0, DebugCounters::default());
    let mut trainer = Trainer::new(cfg, ScriptedProvider::new(), detector).unwrap();
    trainer.run().unwrap();

    // Two unit gradients have norm sqrt(2); each is scaled to 0.5 / sqrt(2).
    let expected = -0.5 / 2f64.sqrt();
    let d = trainer.detector();
    assert!((d.weight.data[0][0] - expected).abs() < 1e-12);
    assert!((d.frozen.data[0][0] - (1.0 + expected)).abs() < 1e-12);
}

#[test]
fn checkpoint_write_failure_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("faster_rcnn_5.json")).unwrap();
    let (tx, rx) = mpsc::channel();
    let detector = ScriptedDetector::new(1.0, DebugCounters::default());
    let mut trainer = Trainer::new(config(dir.path()), ScriptedProvider::new(), detector)
        .unwrap()
        .with_progress(tx);

    let err = trainer.run().unwrap_err();
    assert!(matches!(err, TrainError::Checkpoint { .. }));
    // Display at step 5 ran; nothing after it did.
    assert_eq!(collect(rx).iter().map(|r| r.step).collect::<Vec<_>>(), vec![5]);
    assert!(std::fs::read_to_string(dir.path().join(TRAIN_LOSS_LOG)).unwrap().is_empty());
}
