//! Loss functions for link-adaptation training.
//!
//! Two composite losses are implemented:
//!
//! - **Offline loss**: supervised regression + classification against the
//!   labelled capture set,
//!
//!   ```text
//!   L_off = 1000 · mean(|amp − amp_label|) + CE(es_scores, es_label)
//!   ```
//!
//! - **Online loss**: likelihood-weighted tracking error plus an efficiency
//!   regulariser and two one-sided monotonicity penalties,
//!
//!   ```text
//!   L_on = 1000 · Σ_b log_lik_b · mean(err) + mean(amp / (es · bits))
//!          + 10 · (10 · P_tp + P_pud)
//!   ```
//!
//!   where `P_x = relu(mean(−∂Σamp/∂x))` hinges on the sign of the input
//!   sensitivity: raising the throughput objective (or observing a longer
//!   power-up delay) must never lower the commanded power.
//!
//! The penalties use standard back-propagation through the live graph
//! (`Tensor::run_backward` with `create_graph = true`) so they are
//! themselves differentiable and steer the weights, not just report.

use tch::{Kind, Tensor};

use crate::error::{AdaptError, AdaptResult};
use crate::model::{BatchInputs, Prediction};

/// Payload bits per symbol for each encoding class, densest first.
pub const BITS_PER_SYMBOL: [f32; 4] = [8.0, 4.0, 2.0, 1.0];

/// Weight applied to the amplitude L1 term of the offline loss.
const AMP_L1_WEIGHT: f64 = 1000.0;

/// Weight applied to the expected-error term of the online loss.
const EXPECTED_ERROR_WEIGHT: f64 = 1000.0;

/// Outer weight of the combined monotonicity penalties.
const PENALTY_WEIGHT: f64 = 10.0;

/// Extra inner weight of the throughput penalty relative to the power-up
/// delay penalty.
const TP_PENALTY_WEIGHT: f64 = 10.0;

// ─────────────────────────────────────────────────────────────────────────────
// Logging components
// ─────────────────────────────────────────────────────────────────────────────

/// Scalar components of one offline loss evaluation, detached for logging.
#[derive(Debug, Clone)]
pub struct OfflineLossComponents {
    /// Total weighted loss.
    pub total: f32,
    /// Unweighted mean absolute amplitude error.
    pub amp_l1: f32,
    /// Cross-entropy of the encoding distribution.
    pub es_cross_entropy: f32,
}

/// Scalar components of one online loss evaluation, detached for logging.
#[derive(Debug, Clone)]
pub struct OnlineLossComponents {
    /// Total weighted loss.
    pub total: f32,
    /// Unweighted likelihood-weighted tracking error.
    pub expected_error: f32,
    /// Mean measured squared tracking error (not back-propagated).
    pub tracking_error: f32,
    /// Mean amplitude-per-bit efficiency ratio.
    pub efficiency_ratio: f32,
    /// Throughput monotonicity penalty.
    pub tp_penalty: f32,
    /// Power-up-delay monotonicity penalty.
    pub pud_penalty: f32,
}

// ─────────────────────────────────────────────────────────────────────────────
// LinkLoss
// ─────────────────────────────────────────────────────────────────────────────

/// Composite loss engine for both training phases.
///
/// Stateless apart from the constant weights; one instance is shared across
/// all batches of a run.
pub struct LinkLoss;

impl LinkLoss {
    /// Create the loss engine.
    pub fn new() -> Self {
        LinkLoss
    }

    /// Offline supervised loss.
    ///
    /// # Shapes
    /// - `pred.amp`: `[B, 1]`
    /// - `amp_labels`: `[B, 1]`
    /// - `es_labels`: `[B, 1]`, `Int64` class indices in `[0, 4)`
    ///
    /// Returns `(total_loss, components)`; the tensor is the differentiable
    /// scalar for back-propagation.
    pub fn offline(
        &self,
        pred: &Prediction,
        amp_labels: &Tensor,
        es_labels: &Tensor,
    ) -> (Tensor, OfflineLossComponents) {
        let amp_l1 = (&pred.amp - amp_labels).abs().mean(Kind::Float);
        let ce = cross_entropy_on_probs(&pred.es_scores, es_labels);

        let total = &amp_l1 * AMP_L1_WEIGHT + &ce;
        let components = OfflineLossComponents {
            total: total.double_value(&[]) as f32,
            amp_l1: amp_l1.double_value(&[]) as f32,
            es_cross_entropy: ce.double_value(&[]) as f32,
        };
        (total, components)
    }

    /// Online fine-tuning loss.
    ///
    /// `inputs` must have been built with
    /// [`BatchInputs::tracking_input_gradients`] so the monotonicity
    /// penalties can differentiate the prediction with respect to the
    /// objective-throughput and power-up-delay inputs. `pred` must come from
    /// the probabilistic head (mu/sigma present).
    ///
    /// # Shapes
    /// - `achieved`: `[B, 1]` measured throughput for each applied setting.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptError::VariantMismatch`] when `pred` carries no
    /// mu/sigma pair, i.e. comes from a point-estimate power head.
    pub fn online(
        &self,
        pred: &Prediction,
        inputs: &BatchInputs,
        achieved: &Tensor,
    ) -> AdaptResult<(Tensor, OnlineLossComponents)> {
        let (mu, sigma) = match (pred.mu.as_ref(), pred.sigma.as_ref()) {
            (Some(mu), Some(sigma)) => (mu, sigma),
            _ => {
                return Err(AdaptError::variant_mismatch(
                    "online loss requires a probabilistic power head",
                ))
            }
        };

        // Measured tracking error, reduced to its scalar batch mean before
        // the likelihood weighting so the same error scales every sample's
        // likelihood. Both operands are data, not predictions; detach the
        // objective so the penalty graph below is the only consumer of its
        // gradient.
        let err = (achieved - inputs.objective_throughput.detach())
            .pow_tensor_scalar(2)
            .mean(Kind::Float);

        // Joint log-likelihood of the emitted setting: the chosen encoding
        // class plus the Gaussian density of the sampled amplitude.
        let (es_max, _) = pred.es_scores.max_dim(-1, true); // [B, 1]
        let log_lik = es_max.log() + gaussian_log_density(&pred.amp, mu, sigma);

        let expected_error = (&log_lik * &err).sum(Kind::Float);

        let efficiency_ratio = efficiency_ratio(&pred.amp, &pred.es_scores);

        let tp_penalty = monotonicity_penalty(&pred.amp, &inputs.objective_throughput);
        let pud_penalty = monotonicity_penalty(&pred.amp, &inputs.power_up_delay);

        let total = &expected_error * EXPECTED_ERROR_WEIGHT
            + &efficiency_ratio
            + (&tp_penalty * TP_PENALTY_WEIGHT + &pud_penalty) * PENALTY_WEIGHT;

        let components = OnlineLossComponents {
            total: total.double_value(&[]) as f32,
            expected_error: expected_error.double_value(&[]) as f32,
            tracking_error: err.double_value(&[]) as f32,
            efficiency_ratio: efficiency_ratio.double_value(&[]) as f32,
            tp_penalty: tp_penalty.double_value(&[]) as f32,
            pud_penalty: pud_penalty.double_value(&[]) as f32,
        };
        Ok((total, components))
    }
}

impl Default for LinkLoss {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Component functions
// ─────────────────────────────────────────────────────────────────────────────

/// Categorical cross-entropy on an already-normalised distribution.
///
/// `probs` is `[B, 4]` on the probability simplex (the networks emit
/// softmaxed scores, not logits); `labels` is `[B, 1]` `Int64`.
pub fn cross_entropy_on_probs(probs: &Tensor, labels: &Tensor) -> Tensor {
    let picked = probs.log().gather(1, labels, false); // [B, 1]
    -picked.mean(Kind::Float)
}

/// One-sided monotonicity hinge on the input sensitivity of `amp`.
///
/// Computes `relu(mean(−∂Σamp/∂wrt))`: zero whenever the mean sensitivity
/// is non-negative, and growing linearly with the violation otherwise.
/// `wrt` must be a leaf tensor with `requires_grad` set.
///
/// The backward pass keeps and extends the graph (`create_graph = true`),
/// so the returned penalty participates in the optimizer step.
pub fn monotonicity_penalty(amp: &Tensor, wrt: &Tensor) -> Tensor {
    let grads = Tensor::run_backward(&[amp.sum(Kind::Float)], &[wrt], true, true);
    (-grads[0].mean(Kind::Float)).relu()
}

/// Log-density of `x` under `N(mu, |sigma|²)`.
///
/// The spread head is unconstrained, so the density is evaluated at the
/// absolute spread.
pub fn gaussian_log_density(x: &Tensor, mu: &Tensor, sigma: &Tensor) -> Tensor {
    let sigma = sigma.abs();
    let half_ln_2pi = 0.5 * (2.0 * std::f64::consts::PI).ln();
    let norm = (x - mu) / &sigma;
    -sigma.log() - norm.pow_tensor_scalar(2) * 0.5 - half_ln_2pi
}

/// Mean amplitude spent per expected payload bit: `mean(amp / (es · bits))`.
///
/// A denser expected encoding makes the same amplitude cheaper per bit, so
/// minimising this term rewards confident dense-encoding predictions.
pub fn efficiency_ratio(amp: &Tensor, es_scores: &Tensor) -> Tensor {
    let bits = Tensor::from_slice(&BITS_PER_SYMBOL)
        .reshape([BITS_PER_SYMBOL.len() as i64, 1])
        .to_device(es_scores.device());
    let expected_bits = es_scores.matmul(&bits); // [B, 1]
    (amp / expected_bits).mean(Kind::Float)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
