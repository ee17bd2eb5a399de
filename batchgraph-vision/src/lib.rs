//! # batchgraph-vision
//!
//! Image batches and the feature-extraction seam for batch-graph models.
//!
//! This crate provides:
//! - `ImageBatch` - Validated N×C×H×W batch of raw images
//! - `FeatureExtractor` - The `batch → fixed-width embedding` contract
//! - `Backbone` - Backbone family selection (DenseNet / Swin / ConvNeXt)
//! - `build_extractor` - Factory mapping a backbone tag to an extractor
//!
//! ## Extraction principle
//!
//! ```text
//! ImageBatch (N×C×H×W) → FeatureExtractor → embedding matrix (N×F)
//! ```
//!
//! The pretrained backbone networks themselves are external collaborators;
//! what this crate pins down is the contract every variant must expose: a
//! deterministic map from an image batch to a fixed-width embedding matrix
//! whose row `i` belongs to image `i`. The hybrid model upstream is
//! backbone-agnostic — swapping families changes `F` and nothing else.
//!
//! One factory replaces per-variant model classes: every family runs the
//! same pooled-projection pipeline, differing only in its pooling spec and
//! feature width, with projection weights populated from a checkpoint.

use ndarray::{Array1, Array2, Array4, ArrayView3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors in image handling and feature extraction
#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Invalid image dimensions: {0}x{1}")]
    InvalidDimensions(usize, usize),
    #[error("Pixel count mismatch: expected {expected}, got {actual}")]
    PixelCountMismatch { expected: usize, actual: usize },
    #[error("Channel mismatch: extractor expects {expected} channels, batch has {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("Empty batch: need at least one image")]
    EmptyBatch,
    #[error("Batch length mismatch: expected {expected}, got {actual}")]
    BatchLengthMismatch { expected: usize, actual: usize },
    #[error("Unsupported backbone: {0}")]
    UnsupportedBackbone(String),
    #[error("State shape mismatch: expected {expected:?}, got {actual:?}")]
    StateShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("Extractor does not support parameter state")]
    StateUnsupported,
}

/// Result type for vision operations
pub type VisionResult<T> = Result<T, VisionError>;

// ============================================================================
// Image Batch
// ============================================================================

/// An ordered batch of images: `n × c × h × w`, pixel values as f32.
///
/// Batch position is node identity for the downstream graph: image `i`
/// becomes node `i` and must receive label `i`'s logits. Every constructor
/// validates shape so that no later stage has to.
///
/// # Example
/// ```
/// use batchgraph_vision::ImageBatch;
///
/// // A batch of 4 grayscale 28x28 images (like MNIST)
/// let pixels = vec![0.0f32; 4 * 28 * 28];
/// let batch = ImageBatch::from_flat(4, 1, 28, 28, pixels).unwrap();
/// assert_eq!(batch.len(), 4);
/// ```
#[derive(Debug, Clone)]
pub struct ImageBatch {
    data: Array4<f32>,
}

impl ImageBatch {
    /// Wrap an existing `n × c × h × w` array, validating shape.
    pub fn new(data: Array4<f32>) -> VisionResult<Self> {
        let (n, _c, h, w) = data.dim();
        if n == 0 {
            return Err(VisionError::EmptyBatch);
        }
        if h == 0 || w == 0 {
            return Err(VisionError::InvalidDimensions(h, w));
        }
        Ok(Self { data })
    }

    /// Build a batch from a flat pixel buffer in `n, c, h, w` order.
    pub fn from_flat(
        n: usize,
        c: usize,
        h: usize,
        w: usize,
        pixels: Vec<f32>,
    ) -> VisionResult<Self> {
        let expected = n * c * h * w;
        if pixels.len() != expected {
            return Err(VisionError::PixelCountMismatch {
                expected,
                actual: pixels.len(),
            });
        }
        if n == 0 {
            return Err(VisionError::EmptyBatch);
        }
        if h == 0 || w == 0 {
            return Err(VisionError::InvalidDimensions(h, w));
        }
        let data = Array4::from_shape_vec((n, c, h, w), pixels)
            .map_err(|_| VisionError::PixelCountMismatch {
                expected,
                actual: expected,
            })?;
        Ok(Self { data })
    }

    /// Build a single-channel batch (like MNIST digits).
    pub fn grayscale(n: usize, h: usize, w: usize, pixels: Vec<f32>) -> VisionResult<Self> {
        Self::from_flat(n, 1, h, w, pixels)
    }

    /// Number of images in the batch
    pub fn len(&self) -> usize {
        self.data.dim().0
    }

    /// True when the batch would be empty (constructors reject this)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Channels per image
    pub fn channels(&self) -> usize {
        self.data.dim().1
    }

    /// Image height in pixels
    pub fn height(&self) -> usize {
        self.data.dim().2
    }

    /// Image width in pixels
    pub fn width(&self) -> usize {
        self.data.dim().3
    }

    /// View of image `i` as `c × h × w`
    pub fn image(&self, i: usize) -> ArrayView3<f32> {
        self.data.index_axis(ndarray::Axis(0), i)
    }

    /// The raw `n × c × h × w` array
    pub fn data(&self) -> &Array4<f32> {
        &self.data
    }

    /// Flatten to `n × (c·h·w)` rows, one sample representation per row.
    ///
    /// This is the layout the graph builder consumes when edge weights are
    /// computed in raw pixel space.
    pub fn flattened(&self) -> Array2<f32> {
        let (n, c, h, w) = self.data.dim();
        let flat = self.data.iter().copied().collect::<Vec<f32>>();
        Array2::from_shape_vec((n, c * h * w), flat).expect("batch is dense")
    }

    /// Reorder the batch; `order` must be a permutation of `0..len()`.
    pub fn reordered(&self, order: &[usize]) -> VisionResult<Self> {
        if order.len() != self.len() {
            return Err(VisionError::BatchLengthMismatch {
                expected: self.len(),
                actual: order.len(),
            });
        }
        Self::new(self.data.select(ndarray::Axis(0), order))
    }
}

// ============================================================================
// Backbone Selection
// ============================================================================

/// Pretrained backbone family behind the feature-extraction contract.
///
/// The width each variant reports matches the penultimate feature width of
/// the corresponding pretrained network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backbone {
    /// DenseNet-201, 1920-wide features
    DenseNet201,
    /// DenseNet-161, 2208-wide features
    DenseNet161,
    /// Swin Transformer V2 (base), 1024-wide features
    SwinV2Base,
    /// Swin Transformer V2 (small), 768-wide features
    SwinV2Small,
    /// ConvNeXt (base), 1024-wide features
    ConvNextBase,
}

impl Backbone {
    /// Embedding width produced by this backbone family
    pub fn feature_width(&self) -> usize {
        match self {
            Backbone::DenseNet201 => 1920,
            Backbone::DenseNet161 => 2208,
            Backbone::SwinV2Base => 1024,
            Backbone::SwinV2Small => 768,
            Backbone::ConvNextBase => 1024,
        }
    }

    /// Canonical configuration name
    pub fn name(&self) -> &'static str {
        match self {
            Backbone::DenseNet201 => "densenet201",
            Backbone::DenseNet161 => "densenet161",
            Backbone::SwinV2Base => "swint_big",
            Backbone::SwinV2Small => "swint_small",
            Backbone::ConvNextBase => "convnext_base",
        }
    }

    fn spec(&self) -> ExtractorSpec {
        match self {
            // dense stages ending in adaptive average pooling
            Backbone::DenseNet201 | Backbone::DenseNet161 => ExtractorSpec {
                grid: 7,
                pool: PoolKind::Average,
                normalize: false,
            },
            // windowed stages keep local contrast, so pool both ways
            Backbone::SwinV2Base | Backbone::SwinV2Small => ExtractorSpec {
                grid: 8,
                pool: PoolKind::AverageMax,
                normalize: false,
            },
            // convnext normalizes features before its head
            Backbone::ConvNextBase => ExtractorSpec {
                grid: 7,
                pool: PoolKind::Average,
                normalize: true,
            },
        }
    }
}

impl FromStr for Backbone {
    type Err = VisionError;

    fn from_str(s: &str) -> VisionResult<Self> {
        match s {
            "densenet201" => Ok(Backbone::DenseNet201),
            "densenet161" => Ok(Backbone::DenseNet161),
            "swint_big" => Ok(Backbone::SwinV2Base),
            "swint_small" => Ok(Backbone::SwinV2Small),
            "convnext_base" => Ok(Backbone::ConvNextBase),
            other => Err(VisionError::UnsupportedBackbone(other.to_string())),
        }
    }
}

// ============================================================================
// Feature Extraction Contract
// ============================================================================

/// Serializable parameter state of an extractor, for checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorState {
    /// Projection matrix, `feature_width × pooled_width`
    pub projection: Array2<f32>,
    /// Projection bias, `feature_width`
    pub bias: Array1<f32>,
}

/// The `batch-of-images → fixed-width embedding matrix` contract.
///
/// Implementations must be deterministic pure functions of the batch: same
/// images in, same embedding rows out, with row `i` belonging to image `i`.
pub trait FeatureExtractor: Send + Sync {
    /// Which backbone family this extractor realizes
    fn backbone(&self) -> Backbone;

    /// Width `F` of the embedding rows this extractor produces
    fn feature_width(&self) -> usize;

    /// Map an image batch to its `n × F` embedding matrix
    fn embed(&self, batch: &ImageBatch) -> VisionResult<Array2<f32>>;

    /// Export parameter state for checkpointing, if the extractor has any
    fn export_state(&self) -> Option<ExtractorState> {
        None
    }

    /// Restore parameter state from a checkpoint
    fn import_state(&mut self, _state: ExtractorState) -> VisionResult<()> {
        Err(VisionError::StateUnsupported)
    }
}

// ============================================================================
// Pooled-Projection Extractor
// ============================================================================

/// Spatial pooling flavor of a backbone family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum PoolKind {
    /// Mean over each grid cell
    Average,
    /// Mean and max over each grid cell, concatenated
    AverageMax,
}

/// Per-family pipeline parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct ExtractorSpec {
    grid: usize,
    pool: PoolKind,
    normalize: bool,
}

/// Half-open pixel range of grid cell `k` along an axis of `extent` pixels.
/// Never empty for `extent >= 1`, even when the grid outnumbers the pixels.
fn cell_bounds(extent: usize, grid: usize, k: usize) -> (usize, usize) {
    let start = (k * extent / grid).min(extent - 1);
    let end = (((k + 1) * extent) / grid).max(start + 1).min(extent);
    (start, end.max(start + 1))
}

/// Pooled-projection feature extractor realizing one backbone family.
///
/// Pipeline per image: grid-pool each channel over `grid × grid` spatial
/// cells (mean, or mean and max), optionally standardize the pooled vector,
/// then project to the family's feature width. The projection weights are
/// the checkpoint-carried state standing in for the pretrained stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchPoolExtractor {
    backbone: Backbone,
    spec: ExtractorSpec,
    in_channels: usize,
    projection: Array2<f32>,
    bias: Array1<f32>,
}

impl PatchPoolExtractor {
    /// Create an extractor with freshly initialized projection weights.
    pub fn new(backbone: Backbone, in_channels: usize) -> Self {
        Self::with_rng(backbone, in_channels, &mut rand::thread_rng())
    }

    /// Create an extractor, drawing initial weights from `rng`.
    pub fn with_rng(backbone: Backbone, in_channels: usize, rng: &mut impl Rng) -> Self {
        let spec = backbone.spec();
        let pooled = Self::pooled_width(&spec, in_channels);
        let out = backbone.feature_width();

        // DynamicXavier initialization: sqrt(2 / (fan_in + fan_out))
        let scale = (2.0 / (pooled + out) as f32).sqrt();
        let projection = Array2::from_shape_fn((out, pooled), |_| rng.gen_range(-scale..scale));
        let bias = Array1::zeros(out);

        Self {
            backbone,
            spec,
            in_channels,
            projection,
            bias,
        }
    }

    fn pooled_width(spec: &ExtractorSpec, in_channels: usize) -> usize {
        let per_channel = spec.grid * spec.grid;
        let factor = match spec.pool {
            PoolKind::Average => 1,
            PoolKind::AverageMax => 2,
        };
        in_channels * per_channel * factor
    }

    /// Grid-pool one image into its flat pooled vector.
    fn pool_image(&self, image: &ArrayView3<f32>) -> Array1<f32> {
        let (c, h, w) = image.dim();
        let g = self.spec.grid;
        let mut pooled = Vec::with_capacity(Self::pooled_width(&self.spec, c));

        let mut maxima = Vec::new();
        for ch in 0..c {
            for gy in 0..g {
                let (y0, y1) = cell_bounds(h, g, gy);
                for gx in 0..g {
                    let (x0, x1) = cell_bounds(w, g, gx);
                    let mut sum = 0.0f32;
                    let mut max = f32::NEG_INFINITY;
                    for y in y0..y1 {
                        for x in x0..x1 {
                            let v = image[[ch, y, x]];
                            sum += v;
                            max = max.max(v);
                        }
                    }
                    let count = ((y1 - y0) * (x1 - x0)) as f32;
                    pooled.push(sum / count);
                    if self.spec.pool == PoolKind::AverageMax {
                        maxima.push(max);
                    }
                }
            }
        }
        pooled.extend(maxima);

        let mut pooled = Array1::from_vec(pooled);
        if self.spec.normalize {
            let mean = pooled.mean().unwrap_or(0.0);
            let var = pooled.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(1.0);
            let std = (var + 1e-5).sqrt();
            pooled.mapv_inplace(|v| (v - mean) / std);
        }
        pooled
    }
}

impl FeatureExtractor for PatchPoolExtractor {
    fn backbone(&self) -> Backbone {
        self.backbone
    }

    fn feature_width(&self) -> usize {
        self.backbone.feature_width()
    }

    fn embed(&self, batch: &ImageBatch) -> VisionResult<Array2<f32>> {
        if batch.channels() != self.in_channels {
            return Err(VisionError::ChannelMismatch {
                expected: self.in_channels,
                actual: batch.channels(),
            });
        }
        let n = batch.len();
        let f = self.feature_width();
        let mut out = Array2::zeros((n, f));
        for i in 0..n {
            let pooled = self.pool_image(&batch.image(i));
            let row = self.projection.dot(&pooled) + &self.bias;
            out.row_mut(i).assign(&row);
        }
        Ok(out)
    }

    fn export_state(&self) -> Option<ExtractorState> {
        Some(ExtractorState {
            projection: self.projection.clone(),
            bias: self.bias.clone(),
        })
    }

    fn import_state(&mut self, state: ExtractorState) -> VisionResult<()> {
        if state.projection.dim() != self.projection.dim() {
            return Err(VisionError::StateShapeMismatch {
                expected: self.projection.shape().to_vec(),
                actual: state.projection.shape().to_vec(),
            });
        }
        if state.bias.len() != self.bias.len() {
            return Err(VisionError::StateShapeMismatch {
                expected: vec![self.bias.len()],
                actual: vec![state.bias.len()],
            });
        }
        self.projection = state.projection;
        self.bias = state.bias;
        Ok(())
    }
}

/// Build the extractor for a backbone family.
///
/// This is the single switch point over backbone variants: callers hold a
/// `Backbone` tag and get back the one shared pipeline configured for that
/// family, instead of one model class per family.
pub fn build_extractor(backbone: Backbone, in_channels: usize) -> PatchPoolExtractor {
    PatchPoolExtractor::new(backbone, in_channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn checker_batch(n: usize) -> ImageBatch {
        let pixels: Vec<f32> = (0..n * 28 * 28)
            .map(|i| if (i / 7) % 2 == 0 { 0.9 } else { 0.1 })
            .collect();
        ImageBatch::grayscale(n, 28, 28, pixels).unwrap()
    }

    #[test]
    fn test_batch_rejects_wrong_pixel_count() {
        let result = ImageBatch::grayscale(2, 28, 28, vec![0.0; 100]);
        assert!(matches!(
            result,
            Err(VisionError::PixelCountMismatch {
                expected: 1568,
                actual: 100
            })
        ));
    }

    #[test]
    fn test_batch_rejects_empty() {
        assert!(matches!(
            ImageBatch::grayscale(0, 28, 28, vec![]),
            Err(VisionError::EmptyBatch)
        ));
    }

    #[test]
    fn test_flattened_preserves_sample_order() {
        let pixels: Vec<f32> = (0..2 * 4).map(|i| i as f32).collect();
        let batch = ImageBatch::grayscale(2, 2, 2, pixels).unwrap();
        let rows = batch.flattened();
        assert_eq!(rows.row(0).to_vec(), vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(rows.row(1).to_vec(), vec![4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn test_reordered_permutes_images() {
        let batch = checker_batch(3);
        let swapped = batch.reordered(&[2, 0, 1]).unwrap();
        assert_eq!(swapped.image(0), batch.image(2));
        assert_eq!(swapped.image(1), batch.image(0));
    }

    #[test]
    fn test_backbone_parsing() {
        assert_eq!("densenet201".parse::<Backbone>().unwrap(), Backbone::DenseNet201);
        assert_eq!("swint_big".parse::<Backbone>().unwrap(), Backbone::SwinV2Base);
        assert_eq!("convnext_base".parse::<Backbone>().unwrap(), Backbone::ConvNextBase);
        assert!(matches!(
            "resnet50".parse::<Backbone>(),
            Err(VisionError::UnsupportedBackbone(_))
        ));
    }

    #[test]
    fn test_embed_output_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let extractor = PatchPoolExtractor::with_rng(Backbone::DenseNet201, 1, &mut rng);
        let batch = checker_batch(3);
        let embeddings = extractor.embed(&batch).unwrap();
        assert_eq!(embeddings.dim(), (3, 1920));
    }

    #[test]
    fn test_embed_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(7);
        let extractor = PatchPoolExtractor::with_rng(Backbone::SwinV2Small, 1, &mut rng);
        let batch = checker_batch(2);
        let a = extractor.embed(&batch).unwrap();
        let b = extractor.embed(&batch).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_embed_rejects_channel_mismatch() {
        let extractor = PatchPoolExtractor::new(Backbone::ConvNextBase, 3);
        let batch = checker_batch(2);
        assert!(matches!(
            extractor.embed(&batch),
            Err(VisionError::ChannelMismatch {
                expected: 3,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_embed_handles_images_smaller_than_grid() {
        // 2x2 image under a 7x7 pooling grid must still produce full rows
        let batch = ImageBatch::grayscale(1, 2, 2, vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        let extractor = PatchPoolExtractor::new(Backbone::DenseNet201, 1);
        let embeddings = extractor.embed(&batch).unwrap();
        assert_eq!(embeddings.dim(), (1, 1920));
        assert!(embeddings.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_cell_bounds_cover_axis() {
        for extent in [1usize, 2, 7, 28, 224] {
            for grid in [7usize, 8] {
                let mut covered = vec![false; extent];
                for k in 0..grid {
                    let (a, b) = cell_bounds(extent, grid, k);
                    assert!(a < b && b <= extent);
                    for slot in covered.iter_mut().take(b).skip(a) {
                        *slot = true;
                    }
                }
                assert!(covered.iter().all(|&v| v), "extent {} grid {}", extent, grid);
            }
        }
    }

    #[test]
    fn test_state_round_trip() {
        let mut rng = StdRng::seed_from_u64(3);
        let source = PatchPoolExtractor::with_rng(Backbone::DenseNet161, 1, &mut rng);
        let mut target = PatchPoolExtractor::new(Backbone::DenseNet161, 1);
        target.import_state(source.export_state().unwrap()).unwrap();

        let batch = checker_batch(2);
        assert_eq!(source.embed(&batch).unwrap(), target.embed(&batch).unwrap());
    }

    #[test]
    fn test_state_rejects_foreign_shape() {
        let source = PatchPoolExtractor::new(Backbone::SwinV2Base, 1);
        let mut target = PatchPoolExtractor::new(Backbone::DenseNet201, 1);
        assert!(matches!(
            target.import_state(source.export_state().unwrap()),
            Err(VisionError::StateShapeMismatch { .. })
        ));
    }
}
