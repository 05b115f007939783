//! Frozen artifact export for deployment.
//!
//! [`FrozenArtifact`] folds a trained model's parameters into a
//! self-contained, serde-serialisable bundle with five named inputs and two
//! named outputs, plus a pure-`ndarray` single-sample forward path that
//! reimplements every variant without the training runtime. The stochastic
//! V7 power sample is folded to its mean so the artifact is deterministic;
//! that divergence from the training graph is declared in the artifact
//! metadata.
//!
//! [`QuantizedArtifact`] derives an int8 companion with symmetric
//! per-tensor weight quantization (`scale = max|w| / 127`) for embedded
//! deployment. Its outputs diverge from the float artifact only by the
//! declared quantization error.
//!
//! Both artifacts round-trip through JSON on disk.

use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::dataset::{LinkSample, CHANNEL_COLS, CHANNEL_ROWS, NUM_ENCODINGS};
use crate::error::{AdaptError, AdaptResult};
use crate::model::{LinkAdaptModel, NetVariant};

/// Named model inputs, in the order external callers bind them.
pub const INPUT_NAMES: [&str; 5] =
    ["CHANNEL_RESPONSE", "POWER_UP_DELAY", "RSSI", "NOISEI", "OBJ_THROUGHPUT"];

/// Named model outputs.
pub const OUTPUT_NAMES: [&str; 2] = ["amp", "es_scores"];

// ---------------------------------------------------------------------------
// Artifact types
// ---------------------------------------------------------------------------

/// Shape declaration for one named input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    /// Input name.
    pub name: String,
    /// Expected shape (single-sample, batch dimension included).
    pub shape: Vec<usize>,
}

/// One frozen parameter tensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrozenTensor {
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub data: Vec<f32>,
}

/// One int8-quantized parameter tensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizedTensor {
    /// Tensor shape.
    pub shape: Vec<usize>,
    /// Symmetric per-tensor scale; `value ≈ data · scale`.
    pub scale: f32,
    /// Quantized values in `[-127, 127]`.
    pub data: Vec<i8>,
}

/// Self-contained float inference artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrozenArtifact {
    /// 1-based architecture variant.
    pub variant: u8,
    /// Always `true`: stochastic heads are folded to their mean.
    pub deterministic: bool,
    /// Declared inputs.
    pub inputs: Vec<InputSpec>,
    /// Declared outputs.
    pub outputs: Vec<String>,
    weights: BTreeMap<String, FrozenTensor>,
}

/// Int8 companion of a [`FrozenArtifact`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizedArtifact {
    /// 1-based architecture variant.
    pub variant: u8,
    /// Declared inputs.
    pub inputs: Vec<InputSpec>,
    /// Declared outputs.
    pub outputs: Vec<String>,
    weights: BTreeMap<String, QuantizedTensor>,
}

/// Single-sample inputs for the frozen forward path.
#[derive(Debug, Clone)]
pub struct ArtifactInputs {
    /// Channel response, `[4, 28]`.
    pub channel_response: ndarray::Array2<f32>,
    /// Power-up delay.
    pub power_up_delay: f32,
    /// RSSI.
    pub rssi: f32,
    /// Noise floor.
    pub noise_floor: f32,
    /// Objective throughput.
    pub objective_throughput: f32,
}

impl ArtifactInputs {
    /// Build the inputs from a decoded sample, the throughput field serving
    /// as the objective.
    pub fn from_sample(sample: &LinkSample) -> Self {
        ArtifactInputs {
            channel_response: sample.channel_response.clone(),
            power_up_delay: sample.power_up_delay,
            rssi: sample.rssi,
            noise_floor: sample.noise_floor,
            objective_throughput: sample.throughput,
        }
    }
}

/// The two named outputs of the frozen forward path.
#[derive(Debug, Clone)]
pub struct ArtifactOutputs {
    /// Predicted amplitude scaling factor.
    pub amp: f32,
    /// Encoding-scheme probability distribution.
    pub es_scores: [f32; NUM_ENCODINGS],
}

// ---------------------------------------------------------------------------
// FrozenArtifact
// ---------------------------------------------------------------------------

fn input_specs() -> Vec<InputSpec> {
    vec![
        InputSpec { name: INPUT_NAMES[0].into(), shape: vec![1, CHANNEL_ROWS, CHANNEL_COLS, 1] },
        InputSpec { name: INPUT_NAMES[1].into(), shape: vec![1, 1] },
        InputSpec { name: INPUT_NAMES[2].into(), shape: vec![1, 1] },
        InputSpec { name: INPUT_NAMES[3].into(), shape: vec![1, 1] },
        InputSpec { name: INPUT_NAMES[4].into(), shape: vec![1, 1] },
    ]
}

impl FrozenArtifact {
    /// Freeze every parameter of `model` into an artifact.
    ///
    /// # Errors
    ///
    /// Returns a tensor backend error if a parameter cannot be read out.
    pub fn from_model(model: &LinkAdaptModel) -> AdaptResult<Self> {
        let mut weights = BTreeMap::new();
        for (name, tensor) in model.var_store().variables() {
            let shape: Vec<usize> = tensor.size().iter().map(|&d| d as usize).collect();
            let data = Vec::<f32>::try_from(tensor.flatten(0, -1))?;
            weights.insert(name, FrozenTensor { shape, data });
        }
        Ok(FrozenArtifact {
            variant: model.variant().index(),
            deterministic: true,
            inputs: input_specs(),
            outputs: OUTPUT_NAMES.iter().map(|s| s.to_string()).collect(),
            weights,
        })
    }

    /// Serialize to pretty JSON at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptError::Export`] on any I/O or serialisation failure.
    pub fn save(&self, path: &Path) -> AdaptResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| AdaptError::export(format!("cannot write {}: {e}", path.display())))
    }

    /// Load a previously-saved artifact.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptError::Export`] when the file cannot be read and a
    /// JSON error when it cannot be parsed.
    pub fn load(path: &Path) -> AdaptResult<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| AdaptError::export(format!("cannot read {}: {e}", path.display())))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Derive the int8 companion artifact.
    pub fn quantize(&self) -> QuantizedArtifact {
        let weights = self
            .weights
            .iter()
            .map(|(name, t)| {
                let max_abs = t.data.iter().fold(0.0f32, |m, v| m.max(v.abs()));
                let scale = if max_abs > 0.0 { max_abs / 127.0 } else { 1.0 };
                let data = t
                    .data
                    .iter()
                    .map(|v| (v / scale).round().clamp(-127.0, 127.0) as i8)
                    .collect();
                (name.clone(), QuantizedTensor { shape: t.shape.clone(), scale, data })
            })
            .collect();
        QuantizedArtifact {
            variant: self.variant,
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            weights,
        }
    }

    /// Run the frozen single-sample forward path.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptError::Export`] when the artifact is missing a tensor
    /// its variant requires (a corrupt or truncated artifact).
    pub fn forward(&self, x: &ArtifactInputs) -> AdaptResult<ArtifactOutputs> {
        let variant = NetVariant::from_index(self.variant)
            .ok_or_else(|| AdaptError::export(format!("unknown variant {}", self.variant)))?;
        match variant {
            NetVariant::V1 => self.forward_v1(x),
            NetVariant::V2 => self.forward_v2(x),
            NetVariant::V3 => self.forward_v3(x),
            NetVariant::V4 => self.forward_v4(x),
            NetVariant::V5 => self.forward_v5(x),
            NetVariant::V6 => self.forward_v6(x),
            NetVariant::V7 => self.forward_v7(x),
        }
    }

    // ── Weight access ────────────────────────────────────────────────────────

    fn tensor(&self, name: &str) -> AdaptResult<&FrozenTensor> {
        self.weights
            .get(name)
            .ok_or_else(|| AdaptError::export(format!("missing tensor `{name}`")))
    }

    /// Apply the dense layer stored at `net.<name>`: `y = W·x + b`.
    fn dense(&self, name: &str, x: &[f32]) -> AdaptResult<Vec<f32>> {
        let w = self.tensor(&format!("net.{name}.weight"))?;
        let b = self.tensor(&format!("net.{name}.bias"))?;
        let (out_dim, in_dim) = (w.shape[0], w.shape[1]);
        if x.len() != in_dim {
            return Err(AdaptError::export(format!(
                "layer `{name}` expects {in_dim} inputs, got {}",
                x.len()
            )));
        }
        let mut y = Vec::with_capacity(out_dim);
        for o in 0..out_dim {
            let row = &w.data[o * in_dim..(o + 1) * in_dim];
            let dot: f32 = row.iter().zip(x.iter()).map(|(a, b)| a * b).sum();
            y.push(dot + b.data[o]);
        }
        Ok(y)
    }

    /// Apply the conv layer stored at `net.<name>` (valid padding).
    fn conv(&self, name: &str, x: &Array3<f32>) -> AdaptResult<Array3<f32>> {
        let w = self.tensor(&format!("net.{name}.weight"))?;
        let b = self.tensor(&format!("net.{name}.bias"))?;
        let (out_ch, in_ch, kh, kw) = (w.shape[0], w.shape[1], w.shape[2], w.shape[3]);
        let (c, h, wd) = x.dim();
        if c != in_ch {
            return Err(AdaptError::export(format!(
                "conv `{name}` expects {in_ch} channels, got {c}"
            )));
        }
        let (oh, ow) = (h - kh + 1, wd - kw + 1);
        let out = Array3::from_shape_fn((out_ch, oh, ow), |(oc, y, xc)| {
            let mut acc = b.data[oc];
            for ic in 0..in_ch {
                for i in 0..kh {
                    for j in 0..kw {
                        let widx = ((oc * in_ch + ic) * kh + i) * kw + j;
                        acc += w.data[widx] * x[[ic, y + i, xc + j]];
                    }
                }
            }
            acc
        });
        Ok(out)
    }

    /// Conv feature encoder shared by variants 5–7: SAME-padded 2×3 conv,
    /// 1×1 convs, global average pool, concat with the passive scalars.
    fn pooled_conv_features(&self, conv_names: &[&str], x: &ArtifactInputs) -> AdaptResult<Vec<f32>> {
        let mut h = same_pad_2x3(&x.channel_response);
        for name in conv_names {
            h = self.conv(name, &h)?;
            h.mapv_inplace(|v| v.max(0.0));
        }
        let (c, ht, wd) = h.dim();
        let denom = (ht * wd) as f32;
        let mut features: Vec<f32> = (0..c)
            .map(|ch| h.index_axis(ndarray::Axis(0), ch).sum() / denom)
            .collect();
        features.extend_from_slice(&[x.power_up_delay, x.rssi, x.noise_floor]);
        Ok(features)
    }

    // ── Variant forwards (mirror the training graph) ─────────────────────────

    fn forward_v1(&self, x: &ArtifactInputs) -> AdaptResult<ArtifactOutputs> {
        let input = dense_input(x);
        let h = relu(self.dense("fc1", &input)?);
        let h = relu(self.dense("fc2", &h)?);
        let h = relu(self.dense("fc3", &h)?);
        let z = relu(self.dense("out", &h)?);
        Ok(ArtifactOutputs {
            amp: 15.0 + 5.5 * hard_sigmoid(z[0]),
            es_scores: [0.25; NUM_ENCODINGS],
        })
    }

    fn forward_v2(&self, x: &ArtifactInputs) -> AdaptResult<ArtifactOutputs> {
        let flat: Vec<f32> = x.channel_response.iter().copied().collect();
        let ch = relu(self.dense("b1", &flat)?);
        let ch = relu(self.dense("b2", &ch)?);
        let mut merged = relu(self.dense("b3", &ch)?);
        merged.extend_from_slice(&[
            x.power_up_delay,
            x.rssi,
            x.noise_floor,
            x.objective_throughput,
        ]);
        let h = relu(self.dense("m1", &merged)?);
        let h = relu(self.dense("m2", &h)?);
        let z = self.dense("out", &h)?;
        Ok(ArtifactOutputs {
            amp: 7.0 + 7.0 * hard_sigmoid(z[0]),
            es_scores: [0.25; NUM_ENCODINGS],
        })
    }

    fn forward_v3(&self, x: &ArtifactInputs) -> AdaptResult<ArtifactOutputs> {
        let flat: Vec<f32> = x.channel_response.iter().copied().collect();
        let ch = relu(self.dense("b1", &flat)?);
        let ch = relu(self.dense("b2", &ch)?);
        let mut passive = relu(self.dense("b3", &ch)?);
        passive.extend_from_slice(&[x.power_up_delay, x.rssi, x.noise_floor]);
        let h = relu(self.dense("m1", &passive)?);
        let mut h = relu(self.dense("m2", &h)?);
        h.push(x.objective_throughput);
        let h = relu(self.dense("m3", &h)?);
        let z = self.dense("out", &h)?;
        Ok(ArtifactOutputs {
            amp: 7.0 + 7.0 * hard_sigmoid(z[0]),
            es_scores: [0.25; NUM_ENCODINGS],
        })
    }

    fn forward_v4(&self, x: &ArtifactInputs) -> AdaptResult<ArtifactOutputs> {
        let input = dense_input(x);
        let h = relu(self.dense("fc1", &input)?);
        let h = relu(self.dense("fc2", &h)?);
        let h = relu(self.dense("fc3", &h)?);
        let h = relu(self.dense("fc4", &h)?);
        let z = self.dense("out", &h)?;
        Ok(ArtifactOutputs {
            amp: sigmoid(z[NUM_ENCODINGS]),
            es_scores: softmax4(&z[..NUM_ENCODINGS]),
        })
    }

    fn forward_v5(&self, x: &ArtifactInputs) -> AdaptResult<ArtifactOutputs> {
        let features = self.pooled_conv_features(&["conv1", "conv2"], x)?;

        let mut p_in = features.clone();
        p_in.push(x.objective_throughput);
        let h = leaky_relu(self.dense("p1", &p_in)?);
        let h = leaky_relu(self.dense("p2", &h)?);
        let h = leaky_relu(self.dense("p3", &h)?);
        let amp = sigmoid(self.dense("p_out", &h)?[0]);

        let mut e_in = features;
        e_in.push(amp);
        let h = relu(self.dense("e1", &e_in)?);
        let h = relu(self.dense("e2", &h)?);
        let z = self.dense("e_out", &h)?;
        Ok(ArtifactOutputs { amp, es_scores: softmax4(&z) })
    }

    fn forward_v6(&self, x: &ArtifactInputs) -> AdaptResult<ArtifactOutputs> {
        let features =
            self.pooled_conv_features(&["conv1", "conv2", "conv3", "conv4"], x)?;
        let h = self.dense("embed", &features)?;
        let gate = softmax(&h);
        let gated: Vec<f32> = gate.iter().zip(h.iter()).map(|(g, v)| g * v).collect();

        let mut p = gated.clone();
        p.push(x.objective_throughput);
        for i in 1..=6 {
            p = relu(self.dense(&format!("p{i}"), &p)?);
        }
        let amp = sigmoid(self.dense("p_out", &p)?[0]);

        let mut e = gated;
        e.push(amp);
        for i in 1..=6 {
            e = relu(self.dense(&format!("e{i}"), &e)?);
        }
        let z = self.dense("e_out", &e)?;
        Ok(ArtifactOutputs { amp, es_scores: softmax4(&z) })
    }

    fn forward_v7(&self, x: &ArtifactInputs) -> AdaptResult<ArtifactOutputs> {
        let features = self.pooled_conv_features(&["conv1", "conv2"], x)?;
        let proj = self.dense("proj", &features)?;
        let h = self.dense("embed", &proj)?;
        let gate = softmax(&h);
        let gated: Vec<f32> = gate.iter().zip(proj.iter()).map(|(g, v)| g * v).collect();

        // Per-sample standardisation, population std, no epsilon guard.
        let n = gated.len() as f32;
        let mean: f32 = gated.iter().sum::<f32>() / n;
        let var: f32 = gated.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        let std = var.sqrt();
        let g: Vec<f32> = gated.iter().map(|v| (v - mean) / std).collect();

        let mut p_in = g.clone();
        p_in.push(x.objective_throughput);
        let p = relu(self.dense("p1", &p_in)?);
        let p = relu(self.dense("p2", &p)?);
        let p = relu(self.dense("p3", &p)?);
        let z = self.dense("p_out", &p)?;
        let mu = sigmoid(z[0]);
        let sigma = z[1];

        let mut e_in = g;
        e_in.push(mu);
        e_in.push(sigma);
        let e = relu(self.dense("e1", &e_in)?);
        let e = relu(self.dense("e2", &e)?);
        let e = relu(self.dense("e3", &e)?);
        let z = self.dense("e_out", &e)?;

        // The sample is folded to its mean; the artifact is deterministic.
        Ok(ArtifactOutputs { amp: mu, es_scores: softmax4(&z) })
    }
}

// ---------------------------------------------------------------------------
// QuantizedArtifact
// ---------------------------------------------------------------------------

impl QuantizedArtifact {
    /// Serialize to pretty JSON at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptError::Export`] on any I/O or serialisation failure.
    pub fn save(&self, path: &Path) -> AdaptResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| AdaptError::export(format!("cannot write {}: {e}", path.display())))
    }

    /// Load a previously-saved quantized artifact.
    ///
    /// # Errors
    ///
    /// Returns [`AdaptError::Export`] when the file cannot be read and a
    /// JSON error when it cannot be parsed.
    pub fn load(path: &Path) -> AdaptResult<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| AdaptError::export(format!("cannot read {}: {e}", path.display())))?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Expand back to a float artifact (`value = data · scale`) for
    /// inference. Divergence from the original float artifact is bounded by
    /// half a scale step per weight.
    pub fn dequantize(&self) -> FrozenArtifact {
        let weights = self
            .weights
            .iter()
            .map(|(name, t)| {
                let data = t.data.iter().map(|&q| q as f32 * t.scale).collect();
                (name.clone(), FrozenTensor { shape: t.shape.clone(), data })
            })
            .collect();
        FrozenArtifact {
            variant: self.variant,
            deterministic: true,
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            weights,
        }
    }
}

// ---------------------------------------------------------------------------
// Scalar math helpers
// ---------------------------------------------------------------------------

/// Assemble the 116-dim dense input: flat channel response then the four
/// scalars in wire order.
fn dense_input(x: &ArtifactInputs) -> Vec<f32> {
    let mut input: Vec<f32> = x.channel_response.iter().copied().collect();
    input.extend_from_slice(&[
        x.power_up_delay,
        x.rssi,
        x.noise_floor,
        x.objective_throughput,
    ]);
    input
}

/// SAME padding for the 2×3 kernel: top 0 / bottom 1, left 1 / right 1,
/// identical to the training graph.
fn same_pad_2x3(channel: &ndarray::Array2<f32>) -> Array3<f32> {
    let (h, w) = channel.dim();
    let mut padded = Array3::zeros((1, h + 1, w + 2));
    for i in 0..h {
        for j in 0..w {
            padded[[0, i, j + 1]] = channel[[i, j]];
        }
    }
    padded
}

fn relu(mut v: Vec<f32>) -> Vec<f32> {
    for x in &mut v {
        *x = x.max(0.0);
    }
    v
}

fn leaky_relu(mut v: Vec<f32>) -> Vec<f32> {
    for x in &mut v {
        if *x < 0.0 {
            *x *= 0.01;
        }
    }
    v
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn hard_sigmoid(x: f32) -> f32 {
    (0.2 * x + 0.5).clamp(0.0, 1.0)
}

fn softmax(v: &[f32]) -> Vec<f32> {
    let max = v.iter().fold(f32::NEG_INFINITY, |m, &x| m.max(x));
    let exps: Vec<f32> = v.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

fn softmax4(v: &[f32]) -> [f32; NUM_ENCODINGS] {
    let s = softmax(v);
    [s[0], s[1], s[2], s[3]]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
