//! Holdout evaluation over saved parameter snapshots.
//!
//! The [`Evaluator`] replays a dataset through one or more snapshots and
//! reports two percentage metrics per snapshot:
//!
//! - `amp_mean_error_pct` — mean relative amplitude error,
//!   `100 · mean(|pred − label| / label)`;
//! - `es_accuracy_pct` — encoding-class argmax accuracy,
//!   `100 · matches / N`.
//!
//! Inference is per-sample (unbatched) so the numbers are independent of
//! any batching policy. [`constrained_round`] snaps a continuous amplitude
//! onto the 0.5-step grid the radio hardware actually accepts.

use tracing::info;

use crate::config::LinkAdaptConfig;
use crate::dataset::LinkDataset;
use crate::error::{AdaptError, AdaptResult};
use crate::model::{BatchInputs, LinkAdaptModel, NetVariant};

// ---------------------------------------------------------------------------
// constrained_round
// ---------------------------------------------------------------------------

/// Snap an amplitude to the hardware's 0.5-step grid.
///
/// Within each unit interval `[n, n+1)`: values below `n + 0.25` round down
/// to `n`, values up to and including `n + 0.75` go to `n + 0.5`, and the
/// rest round up to `n + 1`.
pub fn constrained_round(x: f32) -> f32 {
    let n = x.floor();
    let frac = x - n;
    if frac < 0.25 {
        n
    } else if frac <= 0.75 {
        n + 0.5
    } else {
        n + 1.0
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Metrics for one evaluated snapshot.
#[derive(Debug, Clone)]
pub struct EvalReport {
    /// Epoch the snapshot was written at.
    pub epoch: usize,
    /// Mean relative amplitude error, in percent.
    pub amp_mean_error_pct: f32,
    /// Encoding argmax accuracy, in percent.
    pub es_accuracy_pct: f32,
    /// Number of samples evaluated.
    pub num_samples: usize,
}

/// Replays datasets through saved snapshots.
pub struct Evaluator {
    config: LinkAdaptConfig,
    variant: NetVariant,
}

impl Evaluator {
    /// Create an evaluator for the configured variant and snapshot layout.
    ///
    /// # Errors
    ///
    /// Returns a config error for an unknown variant index.
    pub fn new(config: &LinkAdaptConfig) -> AdaptResult<Self> {
        let variant = NetVariant::from_index(config.network_variant).ok_or_else(|| {
            crate::error::ConfigError::invalid_value("network_variant", "must be in [1, 7]")
        })?;
        Ok(Evaluator { config: config.clone(), variant })
    }

    /// Evaluate `dataset` against the snapshot of every epoch in `epochs`.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptError::EmptyDataset`] for an empty dataset and
    /// [`AdaptError::Checkpoint`] when any requested snapshot is missing —
    /// a missing snapshot aborts the whole evaluation rather than being
    /// skipped.
    pub fn evaluate(
        &self,
        dataset: &dyn LinkDataset,
        epochs: &[usize],
    ) -> AdaptResult<Vec<EvalReport>> {
        if dataset.is_empty() {
            return Err(AdaptError::EmptyDataset);
        }
        let mut reports = Vec::with_capacity(epochs.len());
        for &epoch in epochs {
            let path = self.config.snapshot_path(epoch);
            let model = LinkAdaptModel::load(&path, self.variant, self.config.device())?;
            let report = self.evaluate_model(&model, dataset, epoch)?;
            info!(
                "epoch {epoch}: amp error {:.2}%, es accuracy {:.2}% over {} samples",
                report.amp_mean_error_pct, report.es_accuracy_pct, report.num_samples
            );
            reports.push(report);
        }
        Ok(reports)
    }

    /// Evaluate an in-memory model (no snapshot round-trip).
    pub fn evaluate_model(
        &self,
        model: &LinkAdaptModel,
        dataset: &dyn LinkDataset,
        epoch: usize,
    ) -> AdaptResult<EvalReport> {
        let device = self.config.device();
        let mut rel_error_sum = 0.0f64;
        let mut matches = 0usize;
        let n = dataset.len();

        for idx in 0..n {
            let sample = dataset.get(idx)?;
            let inputs = BatchInputs::from_samples(std::slice::from_ref(&sample), device);
            let pred = model.forward_inference(&inputs);

            let amp = pred.amp.double_value(&[0, 0]);
            let label = sample.amplitude_label as f64;
            rel_error_sum += (amp - label).abs() / label;

            let predicted_class = pred.es_scores.argmax(-1, false).int64_value(&[0]);
            if predicted_class == sample.encoding_label as i64 {
                matches += 1;
            }
        }

        Ok(EvalReport {
            epoch,
            amp_mean_error_pct: (100.0 * rel_error_sum / n as f64) as f32,
            es_accuracy_pct: (100.0 * matches as f64 / n as f64) as f32,
            num_samples: n,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SyntheticLinkDataset;
    use approx::assert_abs_diff_eq;
    use tch::Device;

    #[test]
    fn constrained_round_grid() {
        let fixtures = [
            (2.0f32, 2.0f32),
            (2.2, 2.0),
            (2.3, 2.5),
            (2.75, 2.5),
            (2.9, 3.0),
        ];
        for (input, expected) in fixtures {
            assert_abs_diff_eq!(constrained_round(input), expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn constrained_round_boundaries() {
        assert_abs_diff_eq!(constrained_round(2.25), 2.5, epsilon = 1e-6);
        assert_abs_diff_eq!(constrained_round(2.76), 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(constrained_round(0.0), 0.0, epsilon = 1e-6);
    }

    fn eval_config(model_dir: &std::path::Path) -> LinkAdaptConfig {
        let mut cfg = LinkAdaptConfig::default();
        cfg.network_variant = 4;
        cfg.model_dir = model_dir.to_path_buf();
        cfg
    }

    #[test]
    fn missing_snapshot_aborts_evaluation() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = eval_config(tmp.path());
        let evaluator = Evaluator::new(&cfg).unwrap();
        let ds = SyntheticLinkDataset::new(4);
        assert!(matches!(
            evaluator.evaluate(&ds, &[500]),
            Err(AdaptError::Checkpoint { .. })
        ));
    }

    #[test]
    fn empty_dataset_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = eval_config(tmp.path());
        let evaluator = Evaluator::new(&cfg).unwrap();
        let ds = SyntheticLinkDataset::new(0);
        assert!(matches!(
            evaluator.evaluate(&ds, &[500]),
            Err(AdaptError::EmptyDataset)
        ));
    }

    #[test]
    fn evaluate_reports_sane_metrics() {
        tch::manual_seed(0);
        let tmp = tempfile::tempdir().unwrap();
        let cfg = eval_config(tmp.path());

        // Write an untrained snapshot, then evaluate it.
        let model = crate::model::LinkAdaptModel::new(NetVariant::V4, Device::Cpu);
        std::fs::create_dir_all(&cfg.model_dir).unwrap();
        model.save(&cfg.snapshot_path(5)).unwrap();

        let evaluator = Evaluator::new(&cfg).unwrap();
        let ds = SyntheticLinkDataset::new(8);
        let reports = evaluator.evaluate(&ds, &[5]).unwrap();

        assert_eq!(reports.len(), 1);
        let r = &reports[0];
        assert_eq!(r.epoch, 5);
        assert_eq!(r.num_samples, 8);
        assert!(r.amp_mean_error_pct.is_finite());
        assert!((0.0..=100.0).contains(&r.es_accuracy_pct));
    }
}
