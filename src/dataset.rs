//! Dataset abstractions and concrete implementations for link-adaptation
//! training.
//!
//! This module defines the [`LinkDataset`] trait plus two concrete
//! implementations:
//!
//! - [`DirLinkDataset`]: reads whitespace-separated numeric record files from
//!   a directory, one record per file.
//! - [`SyntheticLinkDataset`]: generates fully-deterministic samples from the
//!   sample index; useful for unit tests, integration tests, and dry-run
//!   sanity checks. **Never uses random data.**
//!
//! A [`DataLoader`] wraps any [`LinkDataset`] and provides batched iteration
//! with optional deterministic shuffle (seeded). Batches are fixed-size; the
//! epoch remainder is dropped so every optimizer step sees the same shapes.
//!
//! # Record layout
//!
//! Each record is exactly [`FIELDS_PER_SAMPLE`] (118) scalar fields:
//!
//! ```text
//! [  0, 112)  flattened 4×28 channel response (row-major)
//! [112]       RSSI
//! [113]       noise floor
//! [114]       power-up delay
//! [115]       encoding-scheme label (integer 0–3)
//! [116]       amplitude-scalar label
//! [117]       throughput
//! ```
//!
//! Records with the wrong field count, non-finite values, or an out-of-range
//! encoding label are dropped at ingestion with a `debug!` log. They never
//! surface as errors.
//!
//! # Example – synthetic dataset
//!
//! ```rust
//! use linkadapt::dataset::{SyntheticLinkDataset, LinkDataset};
//!
//! let ds = SyntheticLinkDataset::new(64);
//!
//! assert_eq!(ds.len(), 64);
//! let sample = ds.get(0).unwrap();
//! assert_eq!(sample.channel_response.shape(), &[4, 28]);
//! ```

use ndarray::Array2;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::DatasetError;

/// Total scalar fields in one record.
pub const FIELDS_PER_SAMPLE: usize = 118;

/// Fields occupied by the flattened channel response.
pub const CHANNEL_FIELDS: usize = 112;

/// Channel-response row count (frequency bins).
pub const CHANNEL_ROWS: usize = 4;

/// Channel-response column count (time taps).
pub const CHANNEL_COLS: usize = 28;

/// Number of discrete modulation/encoding classes.
pub const NUM_ENCODINGS: usize = 4;

// ---------------------------------------------------------------------------
// LinkSample
// ---------------------------------------------------------------------------

/// A single decoded link observation paired with its ground-truth labels.
///
/// The channel response is stored row-major as a 4×28 matrix; all remaining
/// fields are scalars in the units of the capture pipeline.
#[derive(Debug, Clone)]
pub struct LinkSample {
    /// Channel response magnitude matrix. Shape: `[4, 28]`.
    pub channel_response: Array2<f32>,

    /// Received signal strength indicator (dBm).
    pub rssi: f32,

    /// Noise floor (dBm).
    pub noise_floor: f32,

    /// Tag power-up delay (ms).
    pub power_up_delay: f32,

    /// Ground-truth encoding-scheme class, in `[0, 4)`.
    pub encoding_label: u8,

    /// Ground-truth amplitude scaling factor.
    pub amplitude_label: f32,

    /// Throughput field. During offline training this doubles as the
    /// objective-throughput input; online batches carry a separately
    /// measured achieved value alongside.
    pub throughput: f32,
}

impl LinkSample {
    /// Decode a sample from its flat 118-field representation.
    ///
    /// Returns `None` (rather than an error) when the record is malformed:
    /// wrong field count, non-finite values, or an encoding label outside
    /// `[0, 4)`. Callers log and drop such records.
    pub fn from_fields(fields: &[f32]) -> Option<Self> {
        if fields.len() != FIELDS_PER_SAMPLE {
            return None;
        }
        if fields.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let label = fields[115];
        if label < 0.0 || label >= NUM_ENCODINGS as f32 || label.fract() != 0.0 {
            return None;
        }

        let channel_response = Array2::from_shape_vec(
            (CHANNEL_ROWS, CHANNEL_COLS),
            fields[..CHANNEL_FIELDS].to_vec(),
        )
        .ok()?;

        Some(LinkSample {
            channel_response,
            rssi: fields[112],
            noise_floor: fields[113],
            power_up_delay: fields[114],
            encoding_label: label as u8,
            amplitude_label: fields[116],
            throughput: fields[117],
        })
    }

    /// Encode this sample back to its flat 118-field representation.
    pub fn to_fields(&self) -> Vec<f32> {
        let mut fields = Vec::with_capacity(FIELDS_PER_SAMPLE);
        fields.extend(self.channel_response.iter().copied());
        fields.push(self.rssi);
        fields.push(self.noise_floor);
        fields.push(self.power_up_delay);
        fields.push(self.encoding_label as f32);
        fields.push(self.amplitude_label);
        fields.push(self.throughput);
        fields
    }
}

// ---------------------------------------------------------------------------
// LinkDataset trait
// ---------------------------------------------------------------------------

/// Common interface for all link-adaptation datasets.
///
/// Implementations must be `Send + Sync` so they can be shared across
/// data-loading threads without additional synchronisation.
pub trait LinkDataset: Send + Sync {
    /// Total number of samples in this dataset.
    fn len(&self) -> usize;

    /// Load the sample at position `idx`.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::IndexOutOfBounds`] when `idx >= self.len()`.
    fn get(&self, idx: usize) -> Result<LinkSample, DatasetError>;

    /// Returns `true` when the dataset contains no samples.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Human-readable name for logging and progress display.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// DataLoader
// ---------------------------------------------------------------------------

/// Batched, optionally-shuffled iterator over a [`LinkDataset`].
///
/// The shuffle order is fully deterministic: given the same `seed` and
/// dataset length the iteration order is always identical.
///
/// Batches are always exactly `batch_size` samples; a trailing remainder
/// shorter than `batch_size` is dropped. The optimizer contract requires
/// fixed batch shapes.
pub struct DataLoader<'a> {
    dataset: &'a dyn LinkDataset,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
}

impl<'a> DataLoader<'a> {
    /// Create a new `DataLoader`.
    ///
    /// # Parameters
    ///
    /// - `dataset`    – the underlying dataset.
    /// - `batch_size` – number of samples per batch. Must be > 0.
    /// - `shuffle`    – if `true`, samples are shuffled deterministically
    ///   using `seed` at the start of each iteration.
    /// - `seed`       – fixed seed for the shuffle RNG.
    pub fn new(dataset: &'a dyn LinkDataset, batch_size: usize, shuffle: bool, seed: u64) -> Self {
        assert!(batch_size > 0, "batch_size must be > 0");
        DataLoader { dataset, batch_size, shuffle, seed }
    }

    /// Number of full batches yielded per epoch (remainder excluded).
    pub fn num_batches(&self) -> usize {
        self.dataset.len() / self.batch_size
    }

    /// Return an iterator that yields `Vec<LinkSample>` batches of exactly
    /// `batch_size` samples.
    ///
    /// A batch where any individual sample load fails is skipped with a
    /// `warn!` log rather than aborting the iterator.
    pub fn iter(&self) -> DataLoaderIter<'_> {
        // Build the index permutation once per epoch using a seeded Xorshift64.
        let n = self.dataset.len();
        let mut indices: Vec<usize> = (0..n).collect();
        if self.shuffle {
            xorshift_shuffle(&mut indices, self.seed);
        }
        // Drop the remainder up front so iteration only sees full batches.
        indices.truncate((n / self.batch_size) * self.batch_size);
        DataLoaderIter {
            dataset: self.dataset,
            indices,
            batch_size: self.batch_size,
            cursor: 0,
        }
    }
}

/// Iterator returned by [`DataLoader::iter`].
pub struct DataLoaderIter<'a> {
    dataset: &'a dyn LinkDataset,
    indices: Vec<usize>,
    batch_size: usize,
    cursor: usize,
}

impl<'a> Iterator for DataLoaderIter<'a> {
    type Item = Vec<LinkSample>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.cursor < self.indices.len() {
            let end = self.cursor + self.batch_size;
            let batch_indices = &self.indices[self.cursor..end];
            self.cursor = end;

            let mut batch = Vec::with_capacity(self.batch_size);
            for &idx in batch_indices {
                match self.dataset.get(idx) {
                    Ok(sample) => batch.push(sample),
                    Err(e) => {
                        warn!("Skipping sample {idx}: {e}");
                    }
                }
            }
            if batch.len() == self.batch_size {
                return Some(batch);
            }
            warn!("Dropping short batch ({} of {} samples)", batch.len(), self.batch_size);
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Xorshift shuffle (deterministic, no external RNG state)
// ---------------------------------------------------------------------------

/// In-place Fisher-Yates shuffle using a 64-bit Xorshift PRNG seeded with
/// `seed`. Reproducible across platforms and requires no external crate in
/// production paths.
fn xorshift_shuffle(indices: &mut [usize], seed: u64) {
    let n = indices.len();
    if n <= 1 {
        return;
    }
    let mut state = if seed == 0 { 0x853c49e6748fea9b } else { seed };
    for i in (1..n).rev() {
        // Xorshift64
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let j = (state as usize) % (i + 1);
        indices.swap(i, j);
    }
}

// ---------------------------------------------------------------------------
// InMemoryLinkDataset
// ---------------------------------------------------------------------------

/// A dataset backed by a plain `Vec` of decoded samples.
///
/// Produced by [`DirLinkDataset::split`] and used directly by tests.
pub struct InMemoryLinkDataset {
    samples: Vec<LinkSample>,
    name: String,
}

impl InMemoryLinkDataset {
    /// Wrap already-decoded samples.
    pub fn new(samples: Vec<LinkSample>, name: impl Into<String>) -> Self {
        InMemoryLinkDataset { samples, name: name.into() }
    }
}

impl LinkDataset for InMemoryLinkDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, idx: usize) -> Result<LinkSample, DatasetError> {
        self.samples
            .get(idx)
            .cloned()
            .ok_or(DatasetError::IndexOutOfBounds { idx, len: self.samples.len() })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// DirLinkDataset
// ---------------------------------------------------------------------------

/// Dataset adapter for capture records stored as numeric text files.
///
/// The scan at construction reads every regular file directly under `root`
/// (sorted by file name for a stable order), parses it as whitespace-
/// separated floats, and decodes it via [`LinkSample::from_fields`].
/// Malformed records are dropped with a `debug!` log; only structural
/// problems (missing directory, I/O failure) are errors.
pub struct DirLinkDataset {
    samples: Vec<LinkSample>,
    root: PathBuf,
}

impl DirLinkDataset {
    /// Scan `root` and decode every well-formed record into memory.
    ///
    /// # Errors
    ///
    /// Returns [`DatasetError::DirectoryNotFound`] if `root` does not exist,
    /// or [`DatasetError::Io`] for any filesystem access failure.
    pub fn discover(root: &Path) -> Result<Self, DatasetError> {
        if !root.exists() {
            return Err(DatasetError::DirectoryNotFound {
                path: root.display().to_string(),
            });
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(root)?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.path())
            .collect();
        paths.sort();

        let mut samples = Vec::with_capacity(paths.len());
        let mut dropped = 0usize;
        for path in &paths {
            let contents = std::fs::read_to_string(path)?;
            let fields: Vec<f32> = contents
                .split_whitespace()
                .filter_map(|tok| tok.parse::<f32>().ok())
                .collect();
            match LinkSample::from_fields(&fields) {
                Some(sample) => samples.push(sample),
                None => {
                    debug!(
                        "Dropping malformed record {} ({} fields)",
                        path.display(),
                        fields.len()
                    );
                    dropped += 1;
                }
            }
        }

        info!(
            "DirLinkDataset: {} samples decoded, {} dropped (root={})",
            samples.len(),
            dropped,
            root.display()
        );

        Ok(DirLinkDataset { samples, root: root.to_path_buf() })
    }

    /// The directory this dataset was scanned from.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Split into `(train, holdout)` at `fraction`, preserving scan order.
    ///
    /// The train split takes `floor(len × fraction)` samples; the holdout
    /// takes the rest. With the default fraction of 0.999 this reproduces
    /// the 999-in-1000 split of the capture pipeline.
    pub fn split(&self, fraction: f64) -> (InMemoryLinkDataset, InMemoryLinkDataset) {
        let n_train = ((self.samples.len() as f64) * fraction).floor() as usize;
        let n_train = n_train.min(self.samples.len());
        let train = self.samples[..n_train].to_vec();
        let holdout = self.samples[n_train..].to_vec();
        (
            InMemoryLinkDataset::new(train, "train"),
            InMemoryLinkDataset::new(holdout, "holdout"),
        )
    }
}

impl LinkDataset for DirLinkDataset {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn get(&self, idx: usize) -> Result<LinkSample, DatasetError> {
        self.samples
            .get(idx)
            .cloned()
            .ok_or(DatasetError::IndexOutOfBounds { idx, len: self.samples.len() })
    }

    fn name(&self) -> &str {
        "DirLinkDataset"
    }
}

// ---------------------------------------------------------------------------
// SyntheticLinkDataset
// ---------------------------------------------------------------------------

/// Fully-deterministic dataset generated analytically from the sample index.
///
/// No random number generator is used. Every sample at index `idx` is
/// computed from `idx` alone, making the dataset perfectly reproducible and
/// portable across platforms.
///
/// ## Label model
///
/// The amplitude label is a monotone increasing linear function of the
/// throughput and power-up-delay inputs:
///
/// ```text
/// amp = 15 + 0.25 × throughput + 2 × power_up_delay
/// ```
///
/// so a trained predictor should exhibit a non-negative input sensitivity
/// for both, and the regularizers have a learnable target. The encoding
/// label cycles `idx mod 4`.
pub struct SyntheticLinkDataset {
    num_samples: usize,
}

impl SyntheticLinkDataset {
    /// Create a new synthetic dataset with `num_samples` entries.
    pub fn new(num_samples: usize) -> Self {
        SyntheticLinkDataset { num_samples }
    }

    #[inline]
    fn channel_value(idx: usize, row: usize, col: usize) -> f32 {
        let phase = 2.0 * std::f32::consts::PI
            * (idx as f32 * 0.01 + row as f32 * 0.1 + col as f32 * 0.03);
        0.5 + 0.3 * phase.sin()
    }
}

impl LinkDataset for SyntheticLinkDataset {
    fn len(&self) -> usize {
        self.num_samples
    }

    fn get(&self, idx: usize) -> Result<LinkSample, DatasetError> {
        if idx >= self.num_samples {
            return Err(DatasetError::IndexOutOfBounds { idx, len: self.num_samples });
        }

        let channel_response =
            Array2::from_shape_fn((CHANNEL_ROWS, CHANNEL_COLS), |(row, col)| {
                Self::channel_value(idx, row, col)
            });

        let throughput = 1.0 + (idx % 16) as f32 * 0.5;
        let power_up_delay = 0.1 + (idx % 8) as f32 * 0.05;
        let rssi = -40.0 - (idx % 32) as f32 * 0.5;
        let noise_floor = -90.0 + (idx % 4) as f32 * 0.25;
        let amplitude_label = 15.0 + 0.25 * throughput + 2.0 * power_up_delay;
        let encoding_label = (idx % NUM_ENCODINGS) as u8;

        Ok(LinkSample {
            channel_response,
            rssi,
            noise_floor,
            power_up_delay,
            encoding_label,
            amplitude_label,
            throughput,
        })
    }

    fn name(&self) -> &str {
        "SyntheticLinkDataset"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
