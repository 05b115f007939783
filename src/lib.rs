//! # linkadapt — trainable link adaptation for backscatter radio
//!
//! This crate provides the complete training pipeline for a backscatter
//! link-adaptation controller: from link observations (channel response,
//! RSSI, noise floor, power-up delay) and a throughput objective it learns
//! to predict a carrier amplitude scaling factor and a 4-class
//! modulation/encoding scheme. It includes configuration management,
//! dataset ingestion, the seven network variants, composite losses with
//! gradient-based monotonicity regularizers, the two-phase training
//! orchestrator, snapshot evaluation, and frozen/quantized artifact export.
//!
//! ## Architecture
//!
//! ```text
//! LinkAdaptConfig ──► Trainer ──► LinkAdaptModel (NetV1..NetV7)
//!       │               │
//!       │           DataLoader
//!       │               │
//!       │         LinkDataset (DirLinkDataset | SyntheticLinkDataset)
//!       │
//!       ├──► losses (offline / online, monotonicity penalties)
//!       ├──► eval (snapshot metrics, constrained rounding)
//!       └──► export (FrozenArtifact, QuantizedArtifact)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use linkadapt::config::LinkAdaptConfig;
//! use linkadapt::dataset::SyntheticLinkDataset;
//! use linkadapt::trainer::Trainer;
//!
//! let mut config = LinkAdaptConfig::default();
//! config.max_epochs = 10;
//! config.validate().expect("config is valid");
//!
//! let dataset = SyntheticLinkDataset::new(200);
//! let mut trainer = Trainer::offline(&config).expect("trainer");
//! trainer.train_offline(&dataset).expect("training run");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod dataset;
pub mod error;
pub mod eval;
pub mod export;
pub mod losses;
pub mod model;
pub mod trainer;

// Convenient re-exports at the crate root.
pub use config::LinkAdaptConfig;
pub use dataset::{
    DataLoader, DirLinkDataset, InMemoryLinkDataset, LinkDataset, LinkSample,
    SyntheticLinkDataset, FIELDS_PER_SAMPLE,
};
pub use error::{AdaptError, AdaptResult, ConfigError, DatasetError};
pub use eval::{constrained_round, EvalReport, Evaluator};
pub use export::{ArtifactInputs, ArtifactOutputs, FrozenArtifact, QuantizedArtifact};
pub use model::{BatchInputs, LinkAdaptModel, LinkNet, NetVariant, Prediction};
pub use trainer::{OnlineBatch, TrainMode, Trainer, TrainingState};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
