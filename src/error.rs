//! Error types for the link-adaptation training pipeline.
//!
//! This module is the single source of truth for all error types in the
//! crate. Every module that produces an error imports its error type from
//! here rather than defining it inline, keeping the error hierarchy
//! centralised and consistent.
//!
//! ## Hierarchy
//!
//! ```text
//! AdaptError (top-level)
//! ├── ConfigError    (config validation / file loading)
//! ├── DatasetError   (data directory scanning, indexing)
//! └── Checkpoint / Export / Tch leaves
//! ```
//!
//! Malformed dataset records are **not** errors: they are filtered at
//! ingestion with a `debug!` log and never surface here. Loading a missing
//! parameter snapshot, by contrast, is fatal and aborts the run.

use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// AdaptResult
// ---------------------------------------------------------------------------

/// Convenient `Result` alias used by orchestration-level functions.
pub type AdaptResult<T> = Result<T, AdaptError>;

// ---------------------------------------------------------------------------
// AdaptError — top-level aggregator
// ---------------------------------------------------------------------------

/// Top-level error type for the link-adaptation pipeline.
///
/// Orchestration-level functions (e.g. [`crate::trainer::Trainer`] methods)
/// return `AdaptResult<T>`. Lower-level functions in [`crate::config`] and
/// [`crate::dataset`] return their own module-specific error types which are
/// automatically coerced into `AdaptError` via [`From`].
#[derive(Debug, Error)]
pub enum AdaptError {
    /// A configuration validation or loading error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A dataset scanning or access error.
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An error raised by the tensor backend.
    #[error("Tensor backend error: {0}")]
    Tch(#[from] tch::TchError),

    /// The dataset is empty and no training can be performed.
    #[error("Dataset is empty")]
    EmptyDataset,

    /// A parameter snapshot could not be saved or loaded.
    ///
    /// Requesting a load of a nonexistent snapshot is fatal: the caller is
    /// expected to abort the run, not retry.
    #[error("Checkpoint error: {message} (path: {path:?})")]
    Checkpoint {
        /// Human-readable description.
        message: String,
        /// Path that was being accessed.
        path: PathBuf,
    },

    /// An exported artifact could not be produced or read back.
    #[error("Export error: {0}")]
    Export(String),

    /// An operation was invoked in the wrong training mode.
    #[error("Wrong training mode: {0}")]
    WrongMode(String),

    /// An online feedback batch has inconsistent per-sample vectors.
    #[error("Online batch mismatch: {0}")]
    BatchMismatch(String),

    /// The selected network variant does not support the operation.
    #[error("Variant mismatch: {0}")]
    VariantMismatch(String),
}

impl AdaptError {
    /// Construct an [`AdaptError::Checkpoint`].
    pub fn checkpoint<S: Into<String>>(msg: S, path: impl Into<PathBuf>) -> Self {
        AdaptError::Checkpoint { message: msg.into(), path: path.into() }
    }

    /// Construct an [`AdaptError::Export`].
    pub fn export<S: Into<String>>(msg: S) -> Self {
        AdaptError::Export(msg.into())
    }

    /// Construct an [`AdaptError::WrongMode`].
    pub fn wrong_mode<S: Into<String>>(msg: S) -> Self {
        AdaptError::WrongMode(msg.into())
    }

    /// Construct an [`AdaptError::VariantMismatch`].
    pub fn variant_mismatch<S: Into<String>>(msg: S) -> Self {
        AdaptError::VariantMismatch(msg.into())
    }

    /// Construct an [`AdaptError::BatchMismatch`].
    pub fn batch_mismatch<S: Into<String>>(msg: S) -> Self {
        AdaptError::BatchMismatch(msg.into())
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors produced when loading or validating a [`LinkAdaptConfig`].
///
/// [`LinkAdaptConfig`]: crate::config::LinkAdaptConfig
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value.
    #[error("Invalid value for `{field}`: {reason}")]
    InvalidValue {
        /// Name of the field.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },

    /// A configuration file could not be read from disk.
    #[error("Cannot read config file `{path}`: {source}")]
    FileRead {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Construct a [`ConfigError::InvalidValue`].
    pub fn invalid_value<S: Into<String>>(field: &'static str, reason: S) -> Self {
        ConfigError::InvalidValue { field, reason: reason.into() }
    }
}

// ---------------------------------------------------------------------------
// DatasetError
// ---------------------------------------------------------------------------

/// Errors produced while scanning or accessing dataset samples.
///
/// A *malformed record* is not represented here: records with the wrong
/// field count are dropped silently at ingestion. Only structural problems
/// (missing directory, I/O failure, out-of-range index) are errors.
#[derive(Debug, Error)]
pub enum DatasetError {
    /// A sample index is out of bounds.
    #[error("Index {idx} out of bounds (dataset has {len} samples)")]
    IndexOutOfBounds {
        /// The requested index.
        idx: usize,
        /// Total length of the dataset.
        len: usize,
    },

    /// The data directory does not exist.
    #[error("Directory not found: {path}")]
    DirectoryNotFound {
        /// The path that was not found.
        path: String,
    },

    /// A low-level I/O error while scanning the data directory.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
