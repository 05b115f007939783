//! Training orchestration for both phases.
//!
//! A [`Trainer`] owns the model, the optimizer, and the run state. Its mode
//! is fixed at construction:
//!
//! - [`Trainer::offline`] builds a fresh model and an Adam optimizer and
//!   drives whole epochs over a labelled dataset via
//!   [`Trainer::train_offline`].
//! - [`Trainer::online`] restores a parameter snapshot and builds a plain
//!   gradient-descent optimizer; the caller feeds it live batches one at a
//!   time through [`Trainer::apply_online_step`]. Invocation cadence is the
//!   external pipeline's policy, not the trainer's.
//!
//! Calling the other mode's operation is a [`AdaptError::WrongMode`] error.
//! Training is strictly sequential: one optimizer step per batch, one batch
//! at a time. There is no mid-epoch resumability; restarts begin from the
//! last written snapshot.

use std::time::Instant;
use tch::{nn, nn::OptimizerConfig, Tensor};
use tracing::{debug, info};

use crate::config::LinkAdaptConfig;
use crate::dataset::{DataLoader, LinkDataset, LinkSample};
use crate::error::{AdaptError, AdaptResult, ConfigError};
use crate::losses::{LinkLoss, OnlineLossComponents};
use crate::model::{BatchInputs, LinkAdaptModel, NetVariant};

// ---------------------------------------------------------------------------
// TrainMode / TrainingState / OnlineBatch
// ---------------------------------------------------------------------------

/// The phase a [`Trainer`] was constructed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainMode {
    /// Batch training over a labelled capture set.
    Offline,
    /// Live fine-tuning from measured feedback.
    Online,
}

/// Mutable run state, owned and updated only by the [`Trainer`].
#[derive(Debug)]
pub struct TrainingState {
    /// Last completed offline epoch (1-based; 0 before training).
    pub epoch: usize,
    /// Mean offline loss per completed epoch.
    pub loss_history: Vec<f32>,
    /// Number of online steps applied.
    pub online_steps: usize,
    /// When the run started.
    pub started_at: Option<Instant>,
}

impl TrainingState {
    fn new() -> Self {
        TrainingState { epoch: 0, loss_history: Vec::new(), online_steps: 0, started_at: None }
    }
}

/// One batch of live feedback for an online step.
///
/// Each sample pairs the observed link features with the objective the
/// controller was asked to hit and the throughput actually measured after
/// applying its setting.
pub struct OnlineBatch {
    /// Observed link samples.
    pub samples: Vec<LinkSample>,
    /// Objective throughput requested for each sample.
    pub objectives: Vec<f32>,
    /// Throughput measured after applying the predicted setting.
    pub achieved: Vec<f32>,
}

impl OnlineBatch {
    /// Bundle samples with their objectives and measurements.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptError::BatchMismatch`] when the three vectors disagree
    /// in length.
    pub fn new(
        samples: Vec<LinkSample>,
        objectives: Vec<f32>,
        achieved: Vec<f32>,
    ) -> AdaptResult<Self> {
        if samples.len() != objectives.len() || samples.len() != achieved.len() {
            return Err(AdaptError::batch_mismatch(format!(
                "{} samples, {} objectives, {} measurements",
                samples.len(),
                objectives.len(),
                achieved.len()
            )));
        }
        Ok(OnlineBatch { samples, objectives, achieved })
    }

    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns `true` when the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Trainer
// ---------------------------------------------------------------------------

/// Orchestrates one training run in a fixed [`TrainMode`].
pub struct Trainer {
    model: LinkAdaptModel,
    opt: nn::Optimizer,
    loss: LinkLoss,
    mode: TrainMode,
    config: LinkAdaptConfig,
    state: TrainingState,
}

impl Trainer {
    /// Build an offline trainer with a freshly-initialised model and an
    /// Adam optimizer at `config.learning_rate`.
    ///
    /// # Errors
    ///
    /// Returns a config error for an unknown variant index and a tensor
    /// backend error if the optimizer cannot be built.
    pub fn offline(config: &LinkAdaptConfig) -> AdaptResult<Self> {
        let variant = parse_variant(config)?;
        tch::manual_seed(config.seed as i64);
        let model = LinkAdaptModel::new(variant, config.device());
        let opt = nn::Adam::default().build(model.var_store(), config.learning_rate)?;
        info!(
            "Offline trainer: variant={variant}, {} parameters, lr={}",
            model.num_parameters(),
            config.learning_rate
        );
        Ok(Trainer {
            model,
            opt,
            loss: LinkLoss::new(),
            mode: TrainMode::Offline,
            config: config.clone(),
            state: TrainingState::new(),
        })
    }

    /// Build an online trainer from the snapshot written at `epoch`, with a
    /// plain gradient-descent optimizer at `config.online_learning_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptError::VariantMismatch`] unless the configured variant
    /// has a probabilistic power head, and [`AdaptError::Checkpoint`] when
    /// the snapshot is missing or unreadable (fatal, no fallback).
    pub fn online(config: &LinkAdaptConfig, epoch: usize) -> AdaptResult<Self> {
        let variant = parse_variant(config)?;
        if !variant.is_probabilistic() {
            return Err(AdaptError::variant_mismatch(format!(
                "online fine-tuning requires the probabilistic power head (v7), got {variant}"
            )));
        }
        tch::manual_seed(config.seed as i64);
        let path = config.snapshot_path(epoch);
        let model = LinkAdaptModel::load(&path, variant, config.device())?;
        let opt = nn::Sgd::default().build(model.var_store(), config.online_learning_rate)?;
        info!(
            "Online trainer: variant={variant} restored from {}, lr={}",
            path.display(),
            config.online_learning_rate
        );
        Ok(Trainer {
            model,
            opt,
            loss: LinkLoss::new(),
            mode: TrainMode::Online,
            config: config.clone(),
            state: TrainingState::new(),
        })
    }

    /// The mode this trainer was constructed for.
    pub fn mode(&self) -> TrainMode {
        self.mode
    }

    /// The model being trained.
    pub fn model(&self) -> &LinkAdaptModel {
        &self.model
    }

    /// Run state accumulated so far.
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Consume the trainer, keeping the trained model.
    pub fn into_model(self) -> LinkAdaptModel {
        self.model
    }

    /// Run the full offline schedule over `dataset`.
    ///
    /// Per epoch: a fresh seeded permutation, fixed-size batches with the
    /// remainder dropped, one optimizer step per batch. The mean epoch loss
    /// is appended to the state and a snapshot `model.ckpt-<epoch>` is
    /// written every `save_interval` epochs.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptError::WrongMode`] on an online trainer,
    /// [`AdaptError::EmptyDataset`] when no full batch can be formed, and
    /// [`AdaptError::Checkpoint`] when a snapshot cannot be written.
    pub fn train_offline(&mut self, dataset: &dyn LinkDataset) -> AdaptResult<()> {
        if self.mode != TrainMode::Offline {
            return Err(AdaptError::wrong_mode(
                "train_offline called on an online trainer",
            ));
        }
        if dataset.len() < self.config.batch_size {
            return Err(AdaptError::EmptyDataset);
        }
        std::fs::create_dir_all(&self.config.model_dir).map_err(|e| {
            AdaptError::checkpoint(
                format!("cannot create model dir: {e}"),
                self.config.model_dir.clone(),
            )
        })?;

        let device = self.config.device();
        self.state.started_at.get_or_insert_with(Instant::now);

        for epoch in 1..=self.config.max_epochs {
            let epoch_start = Instant::now();
            // A different shuffle every epoch, still fully reproducible.
            let loader = DataLoader::new(
                dataset,
                self.config.batch_size,
                true,
                self.config.seed.wrapping_add(epoch as u64),
            );

            let mut loss_sum = 0.0f64;
            let mut batches = 0usize;
            for batch in loader.iter() {
                let inputs = BatchInputs::from_samples(&batch, device);
                let (amp_labels, es_labels) = label_tensors(&batch, device);
                let pred = self.model.forward_train(&inputs);
                let (total, components) = self.loss.offline(&pred, &amp_labels, &es_labels);
                self.opt.backward_step(&total);

                debug!(
                    "epoch {epoch} batch {batches}: total={:.4} amp_l1={:.4} ce={:.4}",
                    components.total, components.amp_l1, components.es_cross_entropy
                );
                loss_sum += components.total as f64;
                batches += 1;
            }

            let mean_loss = (loss_sum / batches.max(1) as f64) as f32;
            self.state.epoch = epoch;
            self.state.loss_history.push(mean_loss);
            info!(
                "epoch {epoch}/{}: mean loss {:.4} ({} batches, {:.2?})",
                self.config.max_epochs,
                mean_loss,
                batches,
                epoch_start.elapsed()
            );

            if epoch % self.config.save_interval == 0 {
                let path = self.config.snapshot_path(epoch);
                self.model.save(&path)?;
                info!("snapshot written: {}", path.display());
            }
        }
        Ok(())
    }

    /// Apply exactly one online fine-tuning step from measured feedback.
    ///
    /// Returns the detached loss components for the caller's telemetry.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptError::WrongMode`] on an offline trainer and
    /// [`AdaptError::EmptyDataset`] for an empty batch.
    pub fn apply_online_step(&mut self, batch: &OnlineBatch) -> AdaptResult<OnlineLossComponents> {
        if self.mode != TrainMode::Online {
            return Err(AdaptError::wrong_mode(
                "apply_online_step called on an offline trainer",
            ));
        }
        if batch.is_empty() {
            return Err(AdaptError::EmptyDataset);
        }

        let device = self.config.device();
        let b = batch.len() as i64;
        let mut inputs =
            BatchInputs::from_samples(&batch.samples, device).tracking_input_gradients();
        // The live objective replaces the recorded throughput field.
        inputs.objective_throughput = Tensor::from_slice(&batch.objectives)
            .reshape([b, 1])
            .to_device(device)
            .set_requires_grad(true);
        let achieved = Tensor::from_slice(&batch.achieved).reshape([b, 1]).to_device(device);

        let pred = self.model.forward_train(&inputs);
        let (total, components) = self.loss.online(&pred, &inputs, &achieved)?;
        self.opt.backward_step(&total);

        self.state.online_steps += 1;
        debug!(
            "online step {}: total={:.4} tracking={:.4} eff={:.4} tp_pen={:.4} pud_pen={:.4}",
            self.state.online_steps,
            components.total,
            components.tracking_error,
            components.efficiency_ratio,
            components.tp_penalty,
            components.pud_penalty
        );
        Ok(components)
    }
}

/// Resolve the configured variant index.
fn parse_variant(config: &LinkAdaptConfig) -> Result<NetVariant, AdaptError> {
    NetVariant::from_index(config.network_variant)
        .ok_or_else(|| ConfigError::invalid_value("network_variant", "must be in [1, 7]").into())
}

/// Build the `[B, 1]` amplitude and `Int64` encoding label tensors.
fn label_tensors(samples: &[LinkSample], device: tch::Device) -> (Tensor, Tensor) {
    let b = samples.len() as i64;
    let amp: Vec<f32> = samples.iter().map(|s| s.amplitude_label).collect();
    let es: Vec<i64> = samples.iter().map(|s| s.encoding_label as i64).collect();
    (
        Tensor::from_slice(&amp).reshape([b, 1]).to_device(device),
        Tensor::from_slice(&es).reshape([b, 1]).to_device(device),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{LinkDataset, SyntheticLinkDataset};

    fn tiny_config(model_dir: &std::path::Path) -> LinkAdaptConfig {
        let mut cfg = LinkAdaptConfig::default();
        cfg.network_variant = 4;
        cfg.batch_size = 4;
        cfg.max_epochs = 3;
        cfg.save_interval = 2;
        cfg.model_dir = model_dir.to_path_buf();
        cfg
    }

    #[test]
    fn offline_trainer_rejects_online_step() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = tiny_config(tmp.path());
        let mut trainer = Trainer::offline(&cfg).unwrap();

        let ds = SyntheticLinkDataset::new(2);
        let batch = OnlineBatch::new(
            vec![ds.get(0).unwrap(), ds.get(1).unwrap()],
            vec![2.0, 3.0],
            vec![1.8, 3.1],
        )
        .unwrap();
        assert!(matches!(
            trainer.apply_online_step(&batch),
            Err(AdaptError::WrongMode(_))
        ));
    }

    #[test]
    fn online_batch_rejects_mismatched_lengths() {
        let ds = SyntheticLinkDataset::new(2);
        let result = OnlineBatch::new(
            vec![ds.get(0).unwrap(), ds.get(1).unwrap()],
            vec![2.0],
            vec![1.8, 3.1],
        );
        assert!(matches!(result, Err(AdaptError::BatchMismatch(_))));
    }

    #[test]
    fn online_trainer_requires_probabilistic_variant() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = tiny_config(tmp.path());
        cfg.network_variant = 5;
        assert!(matches!(
            Trainer::online(&cfg, 500),
            Err(AdaptError::VariantMismatch(_))
        ));
    }

    #[test]
    fn online_trainer_missing_snapshot_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = tiny_config(tmp.path());
        cfg.network_variant = 7;
        assert!(matches!(
            Trainer::online(&cfg, 500),
            Err(AdaptError::Checkpoint { .. })
        ));
    }

    #[test]
    fn offline_run_reduces_loss_and_writes_snapshots() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = tiny_config(tmp.path());
        let ds = SyntheticLinkDataset::new(16);

        let mut trainer = Trainer::offline(&cfg).unwrap();
        trainer.train_offline(&ds).unwrap();

        let state = trainer.state();
        assert_eq!(state.epoch, 3);
        assert_eq!(state.loss_history.len(), 3);
        let first = state.loss_history[0];
        let last = *state.loss_history.last().unwrap();
        assert!(
            last < first,
            "loss should decrease over the run: first={first}, last={last}"
        );

        // save_interval = 2 → snapshot at epoch 2 only.
        assert!(cfg.snapshot_path(2).exists());
        assert!(!cfg.snapshot_path(3).exists());
    }

    #[test]
    fn offline_run_rejects_undersized_dataset() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = tiny_config(tmp.path());
        let ds = SyntheticLinkDataset::new(2); // smaller than one batch

        let mut trainer = Trainer::offline(&cfg).unwrap();
        assert!(matches!(trainer.train_offline(&ds), Err(AdaptError::EmptyDataset)));
    }

    #[test]
    fn online_step_updates_counters() {
        let tmp = tempfile::tempdir().unwrap();
        let mut cfg = tiny_config(tmp.path());
        cfg.network_variant = 7;
        cfg.max_epochs = 1;
        cfg.save_interval = 1;

        // Produce a snapshot to restore from.
        let ds = SyntheticLinkDataset::new(8);
        let mut offline = Trainer::offline(&cfg).unwrap();
        offline.train_offline(&ds).unwrap();

        let mut online = Trainer::online(&cfg, 1).unwrap();
        let batch = OnlineBatch::new(
            vec![ds.get(0).unwrap(), ds.get(1).unwrap()],
            vec![2.0, 3.0],
            vec![1.7, 3.4],
        )
        .unwrap();
        let components = online.apply_online_step(&batch).unwrap();
        assert!(components.total.is_finite());
        assert_eq!(online.state().online_steps, 1);
    }
}
