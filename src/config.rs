//! Training configuration for the link-adaptation controller.
//!
//! [`LinkAdaptConfig`] is the single source of truth for all
//! hyper-parameters, model selection, and infrastructure settings used
//! throughout the pipeline. It is serializable via [`serde`] so it can be
//! stored to / restored from JSON files.
//!
//! The configuration is constructed once at startup, validated, and then
//! passed by reference into the orchestrator; there is no process-wide
//! mutable state.
//!
//! # Example
//!
//! ```rust
//! use linkadapt::config::LinkAdaptConfig;
//!
//! let cfg = LinkAdaptConfig::default();
//! cfg.validate().expect("default config is valid");
//!
//! assert_eq!(cfg.network_variant, 7);
//! assert_eq!(cfg.batch_size, 2);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// LinkAdaptConfig
// ---------------------------------------------------------------------------

/// Complete configuration for a link-adaptation training run.
///
/// All fields have documented defaults that match the reference operating
/// point. Use [`LinkAdaptConfig::default()`] as a starting point, then
/// override individual fields as needed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkAdaptConfig {
    // -----------------------------------------------------------------------
    // Model
    // -----------------------------------------------------------------------
    /// Network architecture variant, 1–7. Fixed for the lifetime of a run.
    ///
    /// Variants 1–3 predict power only; 4–6 add the encoding head; 7 adds
    /// the probabilistic power head needed for online fine-tuning.
    /// Default: **7**.
    pub network_variant: u8,

    // -----------------------------------------------------------------------
    // Optimisation
    // -----------------------------------------------------------------------
    /// Mini-batch size. Batches are fixed-size; the epoch remainder is
    /// dropped. Default: **2**.
    pub batch_size: usize,

    /// Step size for the offline Adam optimizer. Default: **6e-4**.
    pub learning_rate: f64,

    /// Step size for the online plain-gradient-descent optimizer.
    ///
    /// Deliberately smaller than the offline rate: live fine-tuning makes
    /// small, stable corrections around an already-working operating point.
    /// Default: **1e-4**.
    pub online_learning_rate: f64,

    /// Total number of offline training epochs. Default: **500**.
    pub max_epochs: usize,

    // -----------------------------------------------------------------------
    // Checkpointing
    // -----------------------------------------------------------------------
    /// A parameter snapshot is written when `epoch % save_interval == 0`.
    /// Default: **500**.
    pub save_interval: usize,

    /// Directory where snapshots are written as `model.ckpt-<epoch>`.
    /// Created if absent. Default: **`model_v1`**.
    pub model_dir: PathBuf,

    // -----------------------------------------------------------------------
    // Data
    // -----------------------------------------------------------------------
    /// Fraction of scanned samples assigned to the training split; the rest
    /// form the holdout split. Default: **0.999**.
    pub train_fraction: f64,

    // -----------------------------------------------------------------------
    // Device / reproducibility
    // -----------------------------------------------------------------------
    /// Use a CUDA GPU when available. Default: **false**.
    pub use_gpu: bool,

    /// Seed for the dataset shuffler and the tensor backend RNG (parameter
    /// init, stochastic power sampling). Default: **42**.
    pub seed: u64,
}

impl Default for LinkAdaptConfig {
    fn default() -> Self {
        LinkAdaptConfig {
            network_variant: 7,
            batch_size: 2,
            learning_rate: 6e-4,
            online_learning_rate: 1e-4,
            max_epochs: 500,
            save_interval: 500,
            model_dir: PathBuf::from("model_v1"),
            train_fraction: 0.999,
            use_gpu: false,
            seed: 42,
        }
    }
}

impl LinkAdaptConfig {
    /// Load a [`LinkAdaptConfig`] from a JSON file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the file cannot be opened and
    /// [`ConfigError::InvalidValue`] if the JSON is malformed or the loaded
    /// values fail [`LinkAdaptConfig::validate`].
    pub fn from_json(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: LinkAdaptConfig = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::invalid_value("(file)", e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Serialize this configuration to pretty-printed JSON and write it to
    /// `path`, creating parent directories if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileRead`] if the directory cannot be created
    /// or the file cannot be written.
    pub fn to_json(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::FileRead {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::invalid_value("(serialization)", e.to_string()))?;
        std::fs::write(path, json).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// The device training and inference run on.
    pub fn device(&self) -> tch::Device {
        if self.use_gpu {
            tch::Device::cuda_if_available()
        } else {
            tch::Device::Cpu
        }
    }

    /// Path of the snapshot for `epoch`: `<model_dir>/model.ckpt-<epoch>`.
    pub fn snapshot_path(&self, epoch: usize) -> PathBuf {
        self.model_dir.join(format!("model.ckpt-{epoch}"))
    }

    /// Validate all fields and return an error describing the first problem
    /// found, or `Ok(())` if the configuration is coherent.
    ///
    /// # Validated invariants
    ///
    /// - `network_variant` must be in `[1, 7]`.
    /// - `batch_size`, `max_epochs`, `save_interval` must be at least 1.
    /// - `learning_rate` and `online_learning_rate` must be strictly
    ///   positive.
    /// - `train_fraction` must be in `(0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network_variant == 0 || self.network_variant > 7 {
            return Err(ConfigError::invalid_value(
                "network_variant",
                "must be in [1, 7]",
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid_value("batch_size", "must be > 0"));
        }
        if self.learning_rate <= 0.0 {
            return Err(ConfigError::invalid_value("learning_rate", "must be > 0.0"));
        }
        if self.online_learning_rate <= 0.0 {
            return Err(ConfigError::invalid_value(
                "online_learning_rate",
                "must be > 0.0",
            ));
        }
        if self.max_epochs == 0 {
            return Err(ConfigError::invalid_value("max_epochs", "must be > 0"));
        }
        if self.save_interval == 0 {
            return Err(ConfigError::invalid_value("save_interval", "must be > 0"));
        }
        if self.train_fraction <= 0.0 || self.train_fraction > 1.0 {
            return Err(ConfigError::invalid_value(
                "train_fraction",
                "must be in (0.0, 1.0]",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        let cfg = LinkAdaptConfig::default();
        cfg.validate().expect("default config should be valid");
    }

    #[test]
    fn json_round_trip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("config.json");

        let original = LinkAdaptConfig::default();
        original.to_json(&path).expect("serialization should succeed");

        let loaded = LinkAdaptConfig::from_json(&path).expect("deserialization should succeed");
        assert_eq!(loaded.network_variant, original.network_variant);
        assert_eq!(loaded.batch_size, original.batch_size);
        assert_eq!(loaded.seed, original.seed);
        assert_eq!(loaded.model_dir, original.model_dir);
    }

    #[test]
    fn zero_variant_is_invalid() {
        let mut cfg = LinkAdaptConfig::default();
        cfg.network_variant = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn variant_eight_is_invalid() {
        let mut cfg = LinkAdaptConfig::default();
        cfg.network_variant = 8;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn negative_learning_rate_is_invalid() {
        let mut cfg = LinkAdaptConfig::default();
        cfg.learning_rate = -6e-4;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_batch_size_is_invalid() {
        let mut cfg = LinkAdaptConfig::default();
        cfg.batch_size = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn train_fraction_above_one_is_invalid() {
        let mut cfg = LinkAdaptConfig::default();
        cfg.train_fraction = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn snapshot_path_uses_epoch_suffix() {
        let cfg = LinkAdaptConfig::default();
        assert_eq!(
            cfg.snapshot_path(500),
            PathBuf::from("model_v1").join("model.ckpt-500")
        );
    }

    #[test]
    fn config_fields_have_expected_defaults() {
        let cfg = LinkAdaptConfig::default();
        assert_eq!(cfg.network_variant, 7);
        assert_eq!(cfg.batch_size, 2);
        assert!((cfg.learning_rate - 6e-4).abs() < 1e-12);
        assert!((cfg.online_learning_rate - 1e-4).abs() < 1e-12);
        assert_eq!(cfg.max_epochs, 500);
        assert_eq!(cfg.save_interval, 500);
        assert!((cfg.train_fraction - 0.999).abs() < 1e-12);
        assert_eq!(cfg.seed, 42);
    }
}
