use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use ferrite_rcnn::data::{MinibatchProvider, RoiDataLayer, Roidb, SyntheticProvider};
use ferrite_rcnn::detector::{load_state_dict_json, TwoStageDetector};
use ferrite_rcnn::logging::{self, LogConfig};
use ferrite_rcnn::telemetry::{self, TelemetryMode};
use ferrite_rcnn::train::{Checkpoint, TrainConfig, Trainer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TelemetryKind {
    None,
    Jsonl,
    Http,
}

/// Train the two-stage detector.
#[derive(Parser, Debug)]
#[command(name = "ferrite-rcnn", version)]
struct TrainArgs {
    /// JSON hyperparameter file; missing keys take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Region-of-interest database (JSON).
    #[arg(long, conflicts_with = "synthetic")]
    roidb: Option<PathBuf>,

    /// Train on generated rectangles instead of a roidb.
    #[arg(long)]
    synthetic: bool,

    /// Pretrained weights (JSON state dict), loaded non-strictly.
    #[arg(long)]
    pretrained: Option<PathBuf>,

    /// Checkpoint to resume from; training continues at its step + 1.
    #[arg(long, conflicts_with = "start_step")]
    resume: Option<PathBuf>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    start_step: Option<u64>,

    #[arg(long)]
    end_step: Option<u64>,

    #[arg(long)]
    lr: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_enum, default_value_t = TelemetryKind::None)]
    telemetry: TelemetryKind,

    #[arg(long, default_value = "127.0.0.1:6006")]
    telemetry_addr: String,

    /// Experiment name attached to telemetry; defaults to prefix + local time.
    #[arg(long)]
    exp_name: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = TrainArgs::parse();

    let level = logging::parse_level(&args.log_level).unwrap_or(tracing::Level::INFO);
    logging::init(&LogConfig { level, ..LogConfig::default() });

    match run_train(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => TrainConfig::load_json(path)?,
        None => TrainConfig::default(),
    };
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(step) = args.start_step {
        config.start_step = step;
    }
    if let Some(step) = args.end_step {
        config.end_step = step;
    }
    if let Some(seed) = args.seed {
        config.rand_seed = Some(seed);
    }

    let resume = match &args.resume {
        Some(path) => Some(Checkpoint::load(path)?),
        None => None,
    };
    if let Some(ckpt) = &resume {
        config.start_step = ckpt.step + 1;
        config.learning_rate = ckpt.learning_rate;
    }
    if let Some(lr) = args.lr {
        config.learning_rate = lr;
    }

    let seed = config.rand_seed.unwrap_or_else(rand::random);

    let provider: Box<dyn MinibatchProvider> = match (&args.roidb, args.synthetic) {
        (Some(path), _) => {
            let mut roidb = Roidb::load_json(path)
                .with_context(|| format!("loading roidb {}", path.display()))?;
            if config.data.use_flipped {
                roidb.append_flipped();
            }
            config.detector.num_classes = roidb.num_classes();
            Box::new(RoiDataLayer::new(roidb, config.data.clone(), seed)?)
        }
        (None, true) => Box::new(SyntheticProvider::new(160, 120, config.detector.num_classes, seed)),
        (None, false) => anyhow::bail!("either --roidb or --synthetic is required"),
    };

    let experiment = args.exp_name.clone().unwrap_or_else(|| {
        format!("{}_{}", config.model_prefix, chrono::Local::now().format("%m-%d_%H-%M"))
    });
    let mode = match args.telemetry {
        TelemetryKind::None => TelemetryMode::Off,
        TelemetryKind::Jsonl => TelemetryMode::Jsonl,
        TelemetryKind::Http => TelemetryMode::Http(args.telemetry_addr.clone()),
    };

    let detector = TwoStageDetector::new(config.detector.clone(), seed);
    config.validate()?;
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating {}", config.output_dir.display()))?;
    let sink = telemetry::build_sink(&mode, &config.output_dir, &experiment);

    let mut trainer = Trainer::new(config, provider, detector)?.with_telemetry(sink);

    if let Some(path) = &args.pretrained {
        let state = load_state_dict_json(path)
            .with_context(|| format!("loading pretrained weights {}", path.display()))?;
        let loaded = trainer.load_weights(&state, false)?;
        tracing::info!("loaded {} pretrained tensors from {}", loaded, path.display());
    }
    if let Some(ckpt) = &resume {
        trainer.load_weights(&ckpt.params, true)?;
        tracing::info!("resumed from step {} at lr {}", ckpt.step, ckpt.learning_rate);
    }

    let report = trainer.run()?;
    tracing::info!(
        "done: last step {}, lr {}, {} checkpoints, {} optimizer rebuilds",
        report.last_step,
        report.final_learning_rate,
        report.checkpoints.len(),
        report.optimizer_rebuilds
    );
    Ok(())
}
