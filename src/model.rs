//! Link-adaptation networks using tch-rs (PyTorch Rust bindings).
//!
//! # Architecture
//!
//! ```text
//! channel response [B,1,4,28] + scalars (pud, rssi, noise, objective)
//!       │
//!       ▼
//! ┌──────────────────┐
//! │  FeatureEncoder  │  dense or conv, per variant
//! └──────────────────┘
//!       │
//!   ┌───┴────┐
//!   │        │
//!   ▼        ▼
//! ┌──────┐ ┌──────────┐
//! │ Power│ │ Encoding │
//! │ Head │ │ Head     │
//! └──────┘ └──────────┘
//!  amp [B,1]  es_scores [B,4]
//! ```
//!
//! Seven variants ([`NetVariant`]) share the [`LinkNet`] interface and are
//! selected once at configuration time. Variants 1–3 are power-only
//! prototypes; 4–6 add the encoding head; 7 replaces the point-estimate
//! power head with a probabilistic (mu, sigma) head so the online
//! fine-tuning loss has a likelihood to weight.
//!
//! All parameters are registered in explicit layer containers created once
//! in each variant's constructor, under a named `nn::Path` inside a single
//! serialisable `VarStore`. Sharing a layer means sharing its container;
//! there is no name-based lookup at forward time.

use std::path::Path;
use tch::{nn, nn::Module, Device, Kind, Tensor};

use crate::dataset::{LinkSample, CHANNEL_COLS, CHANNEL_FIELDS, CHANNEL_ROWS, NUM_ENCODINGS};
use crate::error::{AdaptError, AdaptResult};

// ---------------------------------------------------------------------------
// NetVariant
// ---------------------------------------------------------------------------

/// Network architecture variant, fixed for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetVariant {
    /// Dense 40-40-40 baseline, power only.
    V1,
    /// Channel branch 60-40-20 with scalar merge, power only.
    V2,
    /// Channel branch 20-20-20 with late objective injection, power only.
    V3,
    /// Single joint dense trunk, five-unit output (4 encoding + 1 power).
    V4,
    /// Conv feature encoder with sequential power → encoding heads.
    V5,
    /// Deeper conv stack with a self-gated feature embedding.
    V6,
    /// Gated conv features, standardised, with a probabilistic power head.
    V7,
}

impl NetVariant {
    /// Parse a 1-based variant index from configuration.
    pub fn from_index(idx: u8) -> Option<Self> {
        match idx {
            1 => Some(NetVariant::V1),
            2 => Some(NetVariant::V2),
            3 => Some(NetVariant::V3),
            4 => Some(NetVariant::V4),
            5 => Some(NetVariant::V5),
            6 => Some(NetVariant::V6),
            7 => Some(NetVariant::V7),
            _ => None,
        }
    }

    /// 1-based index of this variant.
    pub fn index(&self) -> u8 {
        match self {
            NetVariant::V1 => 1,
            NetVariant::V2 => 2,
            NetVariant::V3 => 3,
            NetVariant::V4 => 4,
            NetVariant::V5 => 5,
            NetVariant::V6 => 6,
            NetVariant::V7 => 7,
        }
    }

    /// Whether this variant has a learned encoding head. Variants without
    /// one emit a constant uniform distribution.
    pub fn has_encoding_head(&self) -> bool {
        self.index() >= 4
    }

    /// Whether the power head is probabilistic (mu, sigma).
    pub fn is_probabilistic(&self) -> bool {
        matches!(self, NetVariant::V7)
    }
}

impl std::fmt::Display for NetVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.index())
    }
}

// ---------------------------------------------------------------------------
// BatchInputs / Prediction
// ---------------------------------------------------------------------------

/// The five named model inputs for a batch of B samples.
///
/// The channel response is carried NCHW inside the graph (`[B, 1, 4, 28]`);
/// the scalar inputs are each `[B, 1]`.
pub struct BatchInputs {
    /// Channel response, `[B, 1, 4, 28]`.
    pub channel_response: Tensor,
    /// Power-up delay, `[B, 1]`.
    pub power_up_delay: Tensor,
    /// RSSI, `[B, 1]`.
    pub rssi: Tensor,
    /// Noise floor, `[B, 1]`.
    pub noise_floor: Tensor,
    /// Objective throughput, `[B, 1]`.
    pub objective_throughput: Tensor,
}

impl BatchInputs {
    /// Build batch tensors from decoded samples.
    ///
    /// The samples' `throughput` field feeds the objective-throughput input,
    /// which is the offline-training convention. Online callers overwrite
    /// `objective_throughput` with the live target.
    pub fn from_samples(samples: &[LinkSample], device: Device) -> Self {
        let b = samples.len();
        let mut channel = Vec::with_capacity(b * CHANNEL_FIELDS);
        let mut pud = Vec::with_capacity(b);
        let mut rssi = Vec::with_capacity(b);
        let mut noise = Vec::with_capacity(b);
        let mut obj = Vec::with_capacity(b);
        for s in samples {
            channel.extend(s.channel_response.iter().copied());
            pud.push(s.power_up_delay);
            rssi.push(s.rssi);
            noise.push(s.noise_floor);
            obj.push(s.throughput);
        }
        let b = b as i64;
        BatchInputs {
            channel_response: Tensor::from_slice(&channel)
                .reshape([b, 1, CHANNEL_ROWS as i64, CHANNEL_COLS as i64])
                .to_device(device),
            power_up_delay: Tensor::from_slice(&pud).reshape([b, 1]).to_device(device),
            rssi: Tensor::from_slice(&rssi).reshape([b, 1]).to_device(device),
            noise_floor: Tensor::from_slice(&noise).reshape([b, 1]).to_device(device),
            objective_throughput: Tensor::from_slice(&obj).reshape([b, 1]).to_device(device),
        }
    }

    /// Enable input-gradient tracking on the objective-throughput and
    /// power-up-delay tensors so monotonicity penalties can differentiate
    /// the prediction with respect to them.
    pub fn tracking_input_gradients(mut self) -> Self {
        self.objective_throughput = self.objective_throughput.set_requires_grad(true);
        self.power_up_delay = self.power_up_delay.set_requires_grad(true);
        self
    }

    /// Batch size.
    pub fn batch_size(&self) -> i64 {
        self.channel_response.size()[0]
    }

    /// Flatten the channel response to `[B, 112]` for dense trunks.
    fn flat_channel(&self) -> Tensor {
        self.channel_response.reshape([self.batch_size(), CHANNEL_FIELDS as i64])
    }
}

/// Outputs produced by a single forward pass.
pub struct Prediction {
    /// Predicted amplitude scaling factor, `[B, 1]`.
    pub amp: Tensor,
    /// Encoding-scheme probability distribution, `[B, 4]`. Always a valid
    /// simplex: variants without a learned head emit a uniform 0.25 each.
    pub es_scores: Tensor,
    /// Power-head mean, `[B, 1]`. Probabilistic variants only.
    pub mu: Option<Tensor>,
    /// Power-head spread (unconstrained), `[B, 1]`. Probabilistic variants
    /// only.
    pub sigma: Option<Tensor>,
}

// ---------------------------------------------------------------------------
// LinkNet trait
// ---------------------------------------------------------------------------

/// Forward interface shared by all network variants.
///
/// Forward is a pure function of parameters and inputs; it has no failure
/// states. `train` switches stochastic behaviour (the V7 power sample) on.
pub trait LinkNet: Send {
    /// Run the network on a batch.
    fn forward(&self, x: &BatchInputs, train: bool) -> Prediction;
}

// ---------------------------------------------------------------------------
// Activation / padding helpers
// ---------------------------------------------------------------------------

/// Piecewise-linear sigmoid: `clamp(0.2·x + 0.5, 0, 1)`.
fn hard_sigmoid(x: &Tensor) -> Tensor {
    (x * 0.2 + 0.5).clamp(0.0, 1.0)
}

/// Uniform encoding distribution for variants without a learned head.
fn uniform_es(batch: i64, device: Device) -> Tensor {
    Tensor::ones([batch, NUM_ENCODINGS as i64], (Kind::Float, device))
        * (1.0 / NUM_ENCODINGS as f64)
}

/// Asymmetric zero padding reproducing SAME semantics for the 2×3 kernel:
/// top 0 / bottom 1, left 1 / right 1. The exported artifact applies the
/// identical padding so both paths agree bit-for-bit.
fn same_pad_2x3(x: &Tensor) -> Tensor {
    x.pad([1, 1, 0, 1], "constant", 0.0)
}

// ---------------------------------------------------------------------------
// Conv2 — small conv layer with explicit (possibly non-square) kernels
// ---------------------------------------------------------------------------

/// A conv layer with an explicitly-shaped weight variable.
///
/// `nn::conv2d` only supports square kernels, so the 2×3 channel-response
/// kernel is held as a raw variable and applied via `Tensor::conv2d`.
struct Conv2 {
    weight: Tensor,
    bias: Tensor,
}

impl Conv2 {
    fn new(path: &nn::Path, in_ch: i64, out_ch: i64, kh: i64, kw: i64) -> Self {
        Conv2 {
            weight: path.var("weight", &[out_ch, in_ch, kh, kw], nn::init::DEFAULT_KAIMING_UNIFORM),
            bias: path.var("bias", &[out_ch], nn::Init::Const(0.0)),
        }
    }

    fn forward(&self, x: &Tensor) -> Tensor {
        x.conv2d(&self.weight, Some(&self.bias), [1, 1], [0, 0], [1, 1], 1)
    }
}

/// Conv feature encoder shared by variants 5–7: a SAME-padded 2×3 conv
/// followed by 1×1 convs, globally average-pooled and concatenated with the
/// three passive scalars into a `[B, 2 + 3]` feature vector.
fn pooled_conv_features(convs: &[Conv2], x: &BatchInputs) -> Tensor {
    // Only the first conv uses the 2×3 kernel; the rest are 1×1 and need no
    // padding.
    let mut h = same_pad_2x3(&x.channel_response);
    for conv in convs {
        h = conv.forward(&h).relu();
    }
    // Global average pool over the spatial dims → [B, C].
    let pooled = h.mean_dim([-2i64, -1].as_slice(), false, Kind::Float);
    Tensor::cat(&[&pooled, &x.power_up_delay, &x.rssi, &x.noise_floor], 1)
}

// ---------------------------------------------------------------------------
// NetV1 — dense 40-40-40 baseline
// ---------------------------------------------------------------------------

/// Dense baseline over the raw 116-dim input. Power only; output mapped to
/// `15 + 5.5·hard_sigmoid`.
pub struct NetV1 {
    fc1: nn::Linear,
    fc2: nn::Linear,
    fc3: nn::Linear,
    out: nn::Linear,
}

impl NetV1 {
    /// Register parameters under `path`.
    pub fn new(path: &nn::Path) -> Self {
        NetV1 {
            fc1: nn::linear(path / "fc1", 116, 40, Default::default()),
            fc2: nn::linear(path / "fc2", 40, 40, Default::default()),
            fc3: nn::linear(path / "fc3", 40, 40, Default::default()),
            out: nn::linear(path / "out", 40, 1, Default::default()),
        }
    }
}

impl LinkNet for NetV1 {
    fn forward(&self, x: &BatchInputs, _train: bool) -> Prediction {
        let input = Tensor::cat(
            &[
                &x.flat_channel(),
                &x.power_up_delay,
                &x.rssi,
                &x.noise_floor,
                &x.objective_throughput,
            ],
            1,
        );
        let h = self.fc1.forward(&input).relu();
        let h = self.fc2.forward(&h).relu();
        let h = self.fc3.forward(&h).relu();
        let z = self.out.forward(&h).relu();
        let amp = hard_sigmoid(&z) * 5.5 + 15.0;
        Prediction {
            es_scores: uniform_es(x.batch_size(), amp.device()),
            amp,
            mu: None,
            sigma: None,
        }
    }
}

// ---------------------------------------------------------------------------
// NetV2 — channel branch with scalar merge
// ---------------------------------------------------------------------------

/// Separate channel-response branch (60-40-20) merged with the four scalars
/// through 30-30. Power only; output mapped to `7 + 7·hard_sigmoid`.
pub struct NetV2 {
    b1: nn::Linear,
    b2: nn::Linear,
    b3: nn::Linear,
    m1: nn::Linear,
    m2: nn::Linear,
    out: nn::Linear,
}

impl NetV2 {
    /// Register parameters under `path`.
    pub fn new(path: &nn::Path) -> Self {
        NetV2 {
            b1: nn::linear(path / "b1", CHANNEL_FIELDS as i64, 60, Default::default()),
            b2: nn::linear(path / "b2", 60, 40, Default::default()),
            b3: nn::linear(path / "b3", 40, 20, Default::default()),
            m1: nn::linear(path / "m1", 24, 30, Default::default()),
            m2: nn::linear(path / "m2", 30, 30, Default::default()),
            out: nn::linear(path / "out", 30, 1, Default::default()),
        }
    }
}

impl LinkNet for NetV2 {
    fn forward(&self, x: &BatchInputs, _train: bool) -> Prediction {
        let ch = self.b1.forward(&x.flat_channel()).relu();
        let ch = self.b2.forward(&ch).relu();
        let ch = self.b3.forward(&ch).relu();
        let merged = Tensor::cat(
            &[&ch, &x.power_up_delay, &x.rssi, &x.noise_floor, &x.objective_throughput],
            1,
        );
        let h = self.m1.forward(&merged).relu();
        let h = self.m2.forward(&h).relu();
        let z = self.out.forward(&h);
        let amp = hard_sigmoid(&z) * 7.0 + 7.0;
        Prediction {
            es_scores: uniform_es(x.batch_size(), amp.device()),
            amp,
            mu: None,
            sigma: None,
        }
    }
}

// ---------------------------------------------------------------------------
// NetV3 — late objective injection
// ---------------------------------------------------------------------------

/// Like [`NetV2`] but the objective throughput is injected late, after the
/// passive link features are already fused. Power only.
pub struct NetV3 {
    b1: nn::Linear,
    b2: nn::Linear,
    b3: nn::Linear,
    m1: nn::Linear,
    m2: nn::Linear,
    m3: nn::Linear,
    out: nn::Linear,
}

impl NetV3 {
    /// Register parameters under `path`.
    pub fn new(path: &nn::Path) -> Self {
        NetV3 {
            b1: nn::linear(path / "b1", CHANNEL_FIELDS as i64, 20, Default::default()),
            b2: nn::linear(path / "b2", 20, 20, Default::default()),
            b3: nn::linear(path / "b3", 20, 20, Default::default()),
            m1: nn::linear(path / "m1", 23, 20, Default::default()),
            m2: nn::linear(path / "m2", 20, 20, Default::default()),
            m3: nn::linear(path / "m3", 21, 20, Default::default()),
            out: nn::linear(path / "out", 20, 1, Default::default()),
        }
    }
}

impl LinkNet for NetV3 {
    fn forward(&self, x: &BatchInputs, _train: bool) -> Prediction {
        let ch = self.b1.forward(&x.flat_channel()).relu();
        let ch = self.b2.forward(&ch).relu();
        let ch = self.b3.forward(&ch).relu();
        let passive = Tensor::cat(&[&ch, &x.power_up_delay, &x.rssi, &x.noise_floor], 1);
        let h = self.m1.forward(&passive).relu();
        let h = self.m2.forward(&h).relu();
        let h = Tensor::cat(&[&h, &x.objective_throughput], 1);
        let h = self.m3.forward(&h).relu();
        let z = self.out.forward(&h);
        let amp = hard_sigmoid(&z) * 7.0 + 7.0;
        Prediction {
            es_scores: uniform_es(x.batch_size(), amp.device()),
            amp,
            mu: None,
            sigma: None,
        }
    }
}

// ---------------------------------------------------------------------------
// NetV4 — joint five-unit output
// ---------------------------------------------------------------------------

/// First joint variant: a single dense trunk emits five units, softmaxed
/// into the four encoding scores plus a sigmoid power unit.
pub struct NetV4 {
    fc1: nn::Linear,
    fc2: nn::Linear,
    fc3: nn::Linear,
    fc4: nn::Linear,
    out: nn::Linear,
}

impl NetV4 {
    /// Register parameters under `path`.
    pub fn new(path: &nn::Path) -> Self {
        NetV4 {
            fc1: nn::linear(path / "fc1", 116, 20, Default::default()),
            fc2: nn::linear(path / "fc2", 20, 20, Default::default()),
            fc3: nn::linear(path / "fc3", 20, 20, Default::default()),
            fc4: nn::linear(path / "fc4", 20, 20, Default::default()),
            out: nn::linear(path / "out", 20, 5, Default::default()),
        }
    }
}

impl LinkNet for NetV4 {
    fn forward(&self, x: &BatchInputs, _train: bool) -> Prediction {
        let input = Tensor::cat(
            &[
                &x.flat_channel(),
                &x.power_up_delay,
                &x.rssi,
                &x.noise_floor,
                &x.objective_throughput,
            ],
            1,
        );
        let h = self.fc1.forward(&input).relu();
        let h = self.fc2.forward(&h).relu();
        let h = self.fc3.forward(&h).relu();
        let h = self.fc4.forward(&h).relu();
        let z = self.out.forward(&h);
        let es_scores = z.narrow(1, 0, NUM_ENCODINGS as i64).softmax(-1, Kind::Float);
        let amp = z.narrow(1, NUM_ENCODINGS as i64, 1).sigmoid();
        Prediction { amp, es_scores, mu: None, sigma: None }
    }
}

// ---------------------------------------------------------------------------
// NetV5 — conv encoder, sequential heads
// ---------------------------------------------------------------------------

/// Conv feature encoder with a power head conditioned on the objective and
/// an encoding head conditioned on the predicted power (sequential head
/// dependency).
pub struct NetV5 {
    convs: Vec<Conv2>,
    p1: nn::Linear,
    p2: nn::Linear,
    p3: nn::Linear,
    p_out: nn::Linear,
    e1: nn::Linear,
    e2: nn::Linear,
    e_out: nn::Linear,
}

impl NetV5 {
    /// Register parameters under `path`.
    pub fn new(path: &nn::Path) -> Self {
        NetV5 {
            convs: vec![
                Conv2::new(&(path / "conv1"), 1, 1, 2, 3),
                Conv2::new(&(path / "conv2"), 1, 2, 1, 1),
            ],
            p1: nn::linear(path / "p1", 6, 20, Default::default()),
            p2: nn::linear(path / "p2", 20, 20, Default::default()),
            p3: nn::linear(path / "p3", 20, 20, Default::default()),
            p_out: nn::linear(path / "p_out", 20, 1, Default::default()),
            e1: nn::linear(path / "e1", 6, 10, Default::default()),
            e2: nn::linear(path / "e2", 10, 10, Default::default()),
            e_out: nn::linear(path / "e_out", 10, NUM_ENCODINGS as i64, Default::default()),
        }
    }
}

impl LinkNet for NetV5 {
    fn forward(&self, x: &BatchInputs, _train: bool) -> Prediction {
        let features = pooled_conv_features(&self.convs, x); // [B, 5]

        let p_in = Tensor::cat(&[&features, &x.objective_throughput], 1);
        let h = self.p1.forward(&p_in).leaky_relu();
        let h = self.p2.forward(&h).leaky_relu();
        let h = self.p3.forward(&h).leaky_relu();
        let amp = self.p_out.forward(&h).sigmoid();

        let e_in = Tensor::cat(&[&features, &amp], 1);
        let h = self.e1.forward(&e_in).relu();
        let h = self.e2.forward(&h).relu();
        let es_scores = self.e_out.forward(&h).softmax(-1, Kind::Float);

        Prediction { amp, es_scores, mu: None, sigma: None }
    }
}

// ---------------------------------------------------------------------------
// NetV6 — self-gated embedding, deep heads
// ---------------------------------------------------------------------------

/// Deeper conv stack whose pooled features are embedded and self-gated
/// (`softmax(h) ⊙ h`) before feeding two six-layer heads.
pub struct NetV6 {
    convs: Vec<Conv2>,
    embed: nn::Linear,
    p_layers: Vec<nn::Linear>,
    p_out: nn::Linear,
    e_layers: Vec<nn::Linear>,
    e_out: nn::Linear,
}

impl NetV6 {
    /// Register parameters under `path`.
    pub fn new(path: &nn::Path) -> Self {
        let head = |prefix: &str, in_dim: i64| -> Vec<nn::Linear> {
            (0..6)
                .map(|i| {
                    let d_in = if i == 0 { in_dim } else { 10 };
                    nn::linear(path / format!("{prefix}{}", i + 1), d_in, 10, Default::default())
                })
                .collect()
        };
        NetV6 {
            convs: vec![
                Conv2::new(&(path / "conv1"), 1, 1, 2, 3),
                Conv2::new(&(path / "conv2"), 1, 2, 1, 1),
                Conv2::new(&(path / "conv3"), 2, 2, 1, 1),
                Conv2::new(&(path / "conv4"), 2, 2, 1, 1),
            ],
            embed: nn::linear(path / "embed", 5, 8, Default::default()),
            p_layers: head("p", 9),
            p_out: nn::linear(path / "p_out", 10, 1, Default::default()),
            e_layers: head("e", 9),
            e_out: nn::linear(path / "e_out", 10, NUM_ENCODINGS as i64, Default::default()),
        }
    }
}

impl LinkNet for NetV6 {
    fn forward(&self, x: &BatchInputs, _train: bool) -> Prediction {
        let features = pooled_conv_features(&self.convs, x); // [B, 5]
        let h = self.embed.forward(&features);
        let gated = h.softmax(-1, Kind::Float) * &h; // [B, 8]

        let mut p = Tensor::cat(&[&gated, &x.objective_throughput], 1);
        for layer in &self.p_layers {
            p = layer.forward(&p).relu();
        }
        let amp = self.p_out.forward(&p).sigmoid();

        let mut e = Tensor::cat(&[&gated, &amp], 1);
        for layer in &self.e_layers {
            e = layer.forward(&e).relu();
        }
        let es_scores = self.e_out.forward(&e).softmax(-1, Kind::Float);

        Prediction { amp, es_scores, mu: None, sigma: None }
    }
}

// ---------------------------------------------------------------------------
// NetV7 — probabilistic power head
// ---------------------------------------------------------------------------

/// The production variant. Gated conv features are standardised per sample,
/// the power head emits a (mu, sigma) pair, and the training-mode amplitude
/// is a reparameterised sample `mu + sigma·z`. The encoding head is
/// conditioned on the distribution parameters rather than the sample.
///
/// The per-sample standardisation deliberately has no epsilon guard: a
/// constant gated feature vector produces a zero std and a non-finite
/// output, matching the capture-pipeline behaviour this model reproduces.
pub struct NetV7 {
    convs: Vec<Conv2>,
    proj: nn::Linear,
    embed: nn::Linear,
    p1: nn::Linear,
    p2: nn::Linear,
    p3: nn::Linear,
    p_out: nn::Linear,
    e1: nn::Linear,
    e2: nn::Linear,
    e3: nn::Linear,
    e_out: nn::Linear,
}

impl NetV7 {
    /// Register parameters under `path`.
    pub fn new(path: &nn::Path) -> Self {
        NetV7 {
            convs: vec![
                Conv2::new(&(path / "conv1"), 1, 1, 2, 3),
                Conv2::new(&(path / "conv2"), 1, 2, 1, 1),
            ],
            proj: nn::linear(path / "proj", 5, 8, Default::default()),
            embed: nn::linear(path / "embed", 8, 8, Default::default()),
            p1: nn::linear(path / "p1", 9, 10, Default::default()),
            p2: nn::linear(path / "p2", 10, 10, Default::default()),
            p3: nn::linear(path / "p3", 10, 10, Default::default()),
            p_out: nn::linear(path / "p_out", 10, 2, Default::default()),
            e1: nn::linear(path / "e1", 10, 10, Default::default()),
            e2: nn::linear(path / "e2", 10, 10, Default::default()),
            e3: nn::linear(path / "e3", 10, 10, Default::default()),
            e_out: nn::linear(path / "e_out", 10, NUM_ENCODINGS as i64, Default::default()),
        }
    }
}

impl LinkNet for NetV7 {
    fn forward(&self, x: &BatchInputs, train: bool) -> Prediction {
        let features = pooled_conv_features(&self.convs, x); // [B, 5]
        let proj = self.proj.forward(&features); // [B, 8]
        let h = self.embed.forward(&proj);
        let gated = h.softmax(-1, Kind::Float) * &proj;

        // Per-sample standardisation, no epsilon guard.
        let mean = gated.mean_dim([-1i64].as_slice(), true, Kind::Float);
        let std = gated.std_dim([-1i64].as_slice(), false, true);
        let g = (gated - mean) / std; // [B, 8]

        let p_in = Tensor::cat(&[&g, &x.objective_throughput], 1);
        let p = self.p1.forward(&p_in).relu();
        let p = self.p2.forward(&p).relu();
        let p = self.p3.forward(&p).relu();
        let z = self.p_out.forward(&p); // [B, 2]
        let mu = z.narrow(1, 0, 1).sigmoid();
        let sigma = z.narrow(1, 1, 1);

        // Reparameterised sample in training; the mean at inference time.
        let amp = if train {
            &mu + &sigma * mu.randn_like()
        } else {
            mu.shallow_clone()
        };

        let e_in = Tensor::cat(&[&g, &mu, &sigma], 1); // [B, 10]
        let e = self.e1.forward(&e_in).relu();
        let e = self.e2.forward(&e).relu();
        let e = self.e3.forward(&e).relu();
        let es_scores = self.e_out.forward(&e).softmax(-1, Kind::Float);

        Prediction { amp, es_scores, mu: Some(mu), sigma: Some(sigma) }
    }
}

// ---------------------------------------------------------------------------
// LinkAdaptModel — VarStore owner and variant dispatcher
// ---------------------------------------------------------------------------

/// Complete link-adaptation model: one [`NetVariant`] instantiated inside a
/// single serialisable `VarStore`.
pub struct LinkAdaptModel {
    vs: nn::VarStore,
    net: Box<dyn LinkNet>,
    variant: NetVariant,
}

impl LinkAdaptModel {
    /// Create a new model of `variant` on `device`. All parameters are
    /// registered eagerly, so the model is immediately loadable.
    pub fn new(variant: NetVariant, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let net = build_net(variant, &(vs.root() / "net"));
        LinkAdaptModel { vs, net, variant }
    }

    /// The architecture variant this model was built as.
    pub fn variant(&self) -> NetVariant {
        self.variant
    }

    /// Forward pass with gradient tracking (training mode).
    pub fn forward_train(&self, inputs: &BatchInputs) -> Prediction {
        self.net.forward(inputs, true)
    }

    /// Forward pass without gradient tracking (inference mode). The V7
    /// power sample is folded to its mean.
    pub fn forward_inference(&self, inputs: &BatchInputs) -> Prediction {
        tch::no_grad(|| self.net.forward(inputs, false))
    }

    /// Save model weights to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptError::Checkpoint`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> AdaptResult<()> {
        self.vs
            .save(path)
            .map_err(|e| AdaptError::checkpoint(format!("cannot write snapshot: {e}"), path))
    }

    /// Load model weights from `path` into a freshly-built `variant` model.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptError::Checkpoint`] if the file is missing, unreadable,
    /// or incompatible with the variant's parameter shapes. A missing
    /// snapshot is fatal; there is no fallback to fresh weights.
    pub fn load(path: &Path, variant: NetVariant, device: Device) -> AdaptResult<Self> {
        let mut model = Self::new(variant, device);
        model
            .vs
            .load(path)
            .map_err(|e| AdaptError::checkpoint(format!("cannot load snapshot: {e}"), path))?;
        Ok(model)
    }

    /// Return all trainable variable tensors.
    pub fn trainable_variables(&self) -> Vec<Tensor> {
        self.vs
            .trainable_variables()
            .into_iter()
            .map(|t| t.shallow_clone())
            .collect()
    }

    /// Count total trainable parameters.
    pub fn num_parameters(&self) -> usize {
        self.vs
            .trainable_variables()
            .iter()
            .map(|t| t.numel())
            .sum()
    }

    /// Access the internal `VarStore` (e.g. to create an optimizer).
    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    /// Mutable access to the internal `VarStore`.
    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }
}

/// Instantiate the concrete network for `variant` under `path`.
fn build_net(variant: NetVariant, path: &nn::Path) -> Box<dyn LinkNet> {
    match variant {
        NetVariant::V1 => Box::new(NetV1::new(path)),
        NetVariant::V2 => Box::new(NetV2::new(path)),
        NetVariant::V3 => Box::new(NetV3::new(path)),
        NetVariant::V4 => Box::new(NetV4::new(path)),
        NetVariant::V5 => Box::new(NetV5::new(path)),
        NetVariant::V6 => Box::new(NetV6::new(path)),
        NetVariant::V7 => Box::new(NetV7::new(path)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{LinkDataset, SyntheticLinkDataset};
    use approx::assert_abs_diff_eq;

    fn batch(n: usize) -> BatchInputs {
        let ds = SyntheticLinkDataset::new(n);
        let samples: Vec<_> = (0..n).map(|i| ds.get(i).unwrap()).collect();
        BatchInputs::from_samples(&samples, Device::Cpu)
    }

    fn all_variants() -> Vec<NetVariant> {
        (1..=7).map(|i| NetVariant::from_index(i).unwrap()).collect()
    }

    #[test]
    fn variant_index_round_trip() {
        for idx in 1..=7u8 {
            assert_eq!(NetVariant::from_index(idx).unwrap().index(), idx);
        }
        assert!(NetVariant::from_index(0).is_none());
        assert!(NetVariant::from_index(8).is_none());
    }

    #[test]
    fn forward_output_shapes_all_variants() {
        tch::manual_seed(0);
        let inputs = batch(3);
        for variant in all_variants() {
            let model = LinkAdaptModel::new(variant, Device::Cpu);
            let pred = model.forward_inference(&inputs);
            assert_eq!(pred.amp.size(), &[3, 1], "amp shape for {variant}");
            assert_eq!(pred.es_scores.size(), &[3, 4], "es shape for {variant}");
        }
    }

    #[test]
    fn es_scores_are_a_simplex() {
        tch::manual_seed(0);
        let inputs = batch(4);
        for variant in all_variants() {
            let model = LinkAdaptModel::new(variant, Device::Cpu);
            let pred = model.forward_inference(&inputs);
            let sums: Vec<f32> = Vec::try_from(pred.es_scores.sum_dim_intlist(
                [-1i64].as_slice(),
                false,
                Kind::Float,
            ))
            .unwrap();
            for s in sums {
                assert_abs_diff_eq!(s, 1.0, epsilon = 1e-5);
            }
            let min: f64 = pred.es_scores.min().double_value(&[]);
            let max: f64 = pred.es_scores.max().double_value(&[]);
            assert!(min >= 0.0, "negative score in {variant}");
            assert!(max <= 1.0 + 1e-6, "score above 1 in {variant}");
        }
    }

    #[test]
    fn power_only_variants_emit_uniform_scores() {
        tch::manual_seed(0);
        let inputs = batch(2);
        for idx in 1..=3u8 {
            let model = LinkAdaptModel::new(NetVariant::from_index(idx).unwrap(), Device::Cpu);
            let pred = model.forward_inference(&inputs);
            let vals: Vec<f32> = Vec::try_from(pred.es_scores.flatten(0, -1)).unwrap();
            for v in vals {
                assert_abs_diff_eq!(v, 0.25, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn v1_amp_in_declared_range() {
        tch::manual_seed(0);
        let model = LinkAdaptModel::new(NetVariant::V1, Device::Cpu);
        let pred = model.forward_inference(&batch(4));
        let min: f64 = pred.amp.min().double_value(&[]);
        let max: f64 = pred.amp.max().double_value(&[]);
        assert!(min >= 15.0 - 1e-5, "amp below range: {min}");
        assert!(max <= 20.5 + 1e-5, "amp above range: {max}");
    }

    #[test]
    fn v7_inference_amp_equals_mu() {
        tch::manual_seed(0);
        let model = LinkAdaptModel::new(NetVariant::V7, Device::Cpu);
        let pred = model.forward_inference(&batch(3));
        let mu = pred.mu.expect("v7 exposes mu");
        let diff: f64 = (&pred.amp - &mu).abs().max().double_value(&[]);
        assert!(diff < 1e-7, "inference amp should be the mean, diff={diff}");
        assert!(pred.sigma.is_some(), "v7 exposes sigma");
    }

    #[test]
    fn point_estimate_variants_have_no_distribution() {
        tch::manual_seed(0);
        let inputs = batch(2);
        for idx in 1..=6u8 {
            let model = LinkAdaptModel::new(NetVariant::from_index(idx).unwrap(), Device::Cpu);
            let pred = model.forward_inference(&inputs);
            assert!(pred.mu.is_none());
            assert!(pred.sigma.is_none());
        }
    }

    #[test]
    fn model_has_nonzero_parameters() {
        for variant in all_variants() {
            let model = LinkAdaptModel::new(variant, Device::Cpu);
            assert!(model.num_parameters() > 0, "no parameters in {variant}");
        }
    }

    #[test]
    fn save_load_round_trip_preserves_outputs() {
        tch::manual_seed(7);
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("model.ckpt-0");
        let inputs = batch(2);

        let model = LinkAdaptModel::new(NetVariant::V7, Device::Cpu);
        let before = model.forward_inference(&inputs);
        model.save(&path).unwrap();

        tch::manual_seed(99); // fresh weights would differ
        let reloaded = LinkAdaptModel::load(&path, NetVariant::V7, Device::Cpu).unwrap();
        let after = reloaded.forward_inference(&inputs);

        let diff: f64 = (&before.amp - &after.amp).abs().max().double_value(&[]);
        assert!(diff < 1e-7, "reloaded amp diverged by {diff}");
        let diff: f64 = (&before.es_scores - &after.es_scores).abs().max().double_value(&[]);
        assert!(diff < 1e-7, "reloaded es_scores diverged by {diff}");
    }

    #[test]
    fn load_missing_snapshot_is_fatal() {
        let result = LinkAdaptModel::load(
            Path::new("/nonexistent/model.ckpt-500"),
            NetVariant::V7,
            Device::Cpu,
        );
        assert!(matches!(result, Err(AdaptError::Checkpoint { .. })));
    }

    #[test]
    fn hard_sigmoid_closed_form() {
        let x = Tensor::from_slice(&[-10.0f32, -2.5, 0.0, 2.5, 10.0]);
        let y: Vec<f32> = Vec::try_from(hard_sigmoid(&x)).unwrap();
        let expected = [0.0f32, 0.0, 0.5, 1.0, 1.0];
        for (a, b) in y.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn same_pad_preserves_spatial_size_after_conv() {
        tch::manual_seed(0);
        let x = Tensor::ones([2, 1, 4, 28], (Kind::Float, Device::Cpu));
        let padded = same_pad_2x3(&x);
        assert_eq!(padded.size(), &[2, 1, 5, 30]);
        // A 2×3 kernel over the padded map returns to 4×28.
        let vs = nn::VarStore::new(Device::Cpu);
        let conv = Conv2::new(&(vs.root() / "c"), 1, 1, 2, 3);
        assert_eq!(conv.forward(&padded).size(), &[2, 1, 4, 28]);
    }
}
