//! `train` binary — entry point for the link-adaptation training pipeline.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin train -- --data-dir captures/
//! cargo run --bin train -- --config config.json --evaluate 500 1000
//! cargo run --bin train -- --dry-run --export frozen.json --quantize
//! ```

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use linkadapt::config::LinkAdaptConfig;
use linkadapt::dataset::{DirLinkDataset, LinkDataset, SyntheticLinkDataset};
use linkadapt::eval::Evaluator;
use linkadapt::export::FrozenArtifact;
use linkadapt::trainer::Trainer;

/// Command-line arguments for the training binary.
#[derive(Parser, Debug)]
#[command(
    name = "train",
    version,
    about = "Backscatter link-adaptation training pipeline",
    long_about = None
)]
struct Args {
    /// Path to the JSON configuration file.
    ///
    /// If not provided, the default `LinkAdaptConfig` is used.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory of capture records (one 118-field record per file).
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Override the snapshot directory from the config.
    #[arg(long, value_name = "DIR")]
    model_dir: Option<PathBuf>,

    /// Override the network variant (1–7) from the config.
    #[arg(long, value_name = "N")]
    variant: Option<u8>,

    /// Override the epoch count from the config.
    #[arg(long, value_name = "N")]
    epochs: Option<usize>,

    /// Enable CUDA training (overrides config `use_gpu`).
    #[arg(long, default_value_t = false)]
    cuda: bool,

    /// Use the deterministic synthetic dataset instead of real captures.
    ///
    /// This is intended for pipeline smoke-tests only, not production
    /// training.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Number of synthetic samples when `--dry-run` is active.
    #[arg(long, default_value_t = 64)]
    dry_run_samples: usize,

    /// Skip training and evaluate the snapshots of the given epochs on the
    /// holdout split instead.
    #[arg(long, value_name = "EPOCH", num_args = 1..)]
    evaluate: Option<Vec<usize>>,

    /// After training, freeze the final model to this JSON artifact.
    #[arg(long, value_name = "FILE")]
    export: Option<PathBuf>,

    /// Also write an int8-quantized artifact next to `--export`.
    #[arg(long, default_value_t = false)]
    quantize: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    // Initialise tracing subscriber.
    let log_level_filter = args
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);

    tracing_subscriber::fmt()
        .with_max_level(log_level_filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    info!("Link-adaptation training pipeline v{}", linkadapt::VERSION);

    // Load or construct the configuration.
    let mut config = match args.config.as_deref() {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            match LinkAdaptConfig::from_json(path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    error!("Failed to load configuration: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            info!("No configuration file provided — using defaults");
            LinkAdaptConfig::default()
        }
    };

    // Apply CLI overrides.
    if let Some(dir) = args.model_dir {
        config.model_dir = dir;
    }
    if let Some(variant) = args.variant {
        config.network_variant = variant;
    }
    if let Some(epochs) = args.epochs {
        config.max_epochs = epochs;
    }
    if args.cuda {
        config.use_gpu = true;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {e}");
        std::process::exit(1);
    }

    info!("Configuration validated successfully");
    info!("  variant      : v{}", config.network_variant);
    info!("  batch size   : {}", config.batch_size);
    info!("  learning rate: {}", config.learning_rate);
    info!("  epochs       : {}", config.max_epochs);
    info!("  snapshots    : {} (every {} epochs)", config.model_dir.display(), config.save_interval);
    info!("  device       : {}", if config.use_gpu { "GPU" } else { "CPU" });

    // Build the datasets.
    let (train_ds, holdout_ds): (Box<dyn LinkDataset>, Box<dyn LinkDataset>) = if args.dry_run {
        info!("DRY RUN — using synthetic dataset ({} samples)", args.dry_run_samples);
        (
            Box::new(SyntheticLinkDataset::new(args.dry_run_samples)),
            Box::new(SyntheticLinkDataset::new(args.dry_run_samples / 8)),
        )
    } else {
        let data_dir = args.data_dir.unwrap_or_else(|| PathBuf::from("data"));
        info!("Scanning capture records in {}", data_dir.display());
        let full = match DirLinkDataset::discover(&data_dir) {
            Ok(ds) => ds,
            Err(e) => {
                error!("Failed to load dataset: {e}");
                std::process::exit(1);
            }
        };
        if full.is_empty() {
            error!("No usable records in {}", data_dir.display());
            std::process::exit(1);
        }
        let (train, holdout) = full.split(config.train_fraction);
        info!("Split: {} train / {} holdout samples", train.len(), holdout.len());
        (Box::new(train), Box::new(holdout))
    };

    // Evaluation-only mode.
    if let Some(epochs) = args.evaluate {
        let evaluator = match Evaluator::new(&config) {
            Ok(e) => e,
            Err(e) => {
                error!("Cannot build evaluator: {e}");
                std::process::exit(1);
            }
        };
        match evaluator.evaluate(holdout_ds.as_ref(), &epochs) {
            Ok(reports) => {
                for r in reports {
                    info!(
                        "epoch {}: amp error {:.2}%, es accuracy {:.2}%",
                        r.epoch, r.amp_mean_error_pct, r.es_accuracy_pct
                    );
                }
            }
            Err(e) => {
                error!("Evaluation failed: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    // Offline training run.
    let mut trainer = match Trainer::offline(&config) {
        Ok(t) => t,
        Err(e) => {
            error!("Cannot build trainer: {e}");
            std::process::exit(1);
        }
    };
    info!("Dataset: {} ({} samples)", train_ds.name(), train_ds.len());

    if let Err(e) = trainer.train_offline(train_ds.as_ref()) {
        error!("Training failed: {e}");
        std::process::exit(1);
    }
    info!(
        "Training complete: {} epochs, final mean loss {:.4}",
        trainer.state().epoch,
        trainer.state().loss_history.last().copied().unwrap_or(f32::NAN)
    );

    // Optional artifact export.
    if let Some(path) = args.export {
        let model = trainer.into_model();
        let artifact = match FrozenArtifact::from_model(&model) {
            Ok(a) => a,
            Err(e) => {
                error!("Export failed: {e}");
                std::process::exit(1);
            }
        };
        if let Err(e) = artifact.save(&path) {
            error!("Cannot write artifact: {e}");
            std::process::exit(1);
        }
        info!("Frozen artifact written to {}", path.display());

        if args.quantize {
            let int8_path = path.with_extension("int8.json");
            if let Err(e) = artifact.quantize().save(&int8_path) {
                error!("Cannot write quantized artifact: {e}");
                std::process::exit(1);
            }
            info!("Quantized artifact written to {}", int8_path.display());
        }
    }
}
