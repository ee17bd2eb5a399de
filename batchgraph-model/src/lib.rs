//! # batchgraph-model
//!
//! The hybrid backbone+GNN image classifier over batch graphs.
//!
//! This crate provides:
//! - `ModelConfig` - Construction-time configuration for one model
//! - `HybridModel` - Extractor → batch graph → classifier composition
//! - `checkpoint` - Parameter persistence with format validation
//! - `eval` - Top-1 accuracy evaluation over batch sources
//! - `loader` - Dataset glue producing (image batch, label batch) pairs
//!
//! ## Forward contract
//!
//! ```text
//! images (N×C×H×W)
//!   → FeatureExtractor            → embeddings (N×F)
//!   → build_edge_index(N)         → topology (2×N²)
//!   → build_edge_weights(embeds)  → weights (N²×1)
//!   → GnnClassifier               → logits (N×num_classes)
//! ```
//!
//! Edge weights come from the extractor's output embeddings, not the raw
//! pixels: feature-space dissimilarity encodes learned semantic distance,
//! so the classifier attends to batch neighbors with related content
//! rather than similar pixels. The weights are a frozen structural
//! snapshot of the embeddings for the current call — plain numeric work,
//! never part of any learnable path.
//!
//! One `HybridModel` parameterized by an injected extractor replaces one
//! near-identical model class per backbone family.

pub mod checkpoint;
pub mod eval;
pub mod loader;

use batchgraph_core::{build_edge_index, build_edge_weights, Device, GraphError};
use batchgraph_gnn::{GnnClassifier, GnnConfig, GnnError};
use batchgraph_vision::{build_extractor, Backbone, FeatureExtractor, ImageBatch, VisionError};
use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use checkpoint::Checkpoint;
pub use eval::{evaluate, BatchSource, EvalReport};

// ============================================================================
// Error Types
// ============================================================================

/// Errors across model construction, forward passes, and persistence
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Graph construction error: {0}")]
    Graph(#[from] GraphError),
    #[error("Feature extraction error: {0}")]
    Vision(#[from] VisionError),
    #[error("Graph classification error: {0}")]
    Gnn(#[from] GnnError),
    #[error("Embedding width mismatch: extractor produces {extractor}, model is configured for {configured}")]
    EmbeddingWidthMismatch { extractor: usize, configured: usize },
    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),
    #[error("Checkpoint version mismatch: expected {expected}, found {found}")]
    CheckpointVersion { expected: u8, found: u8 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for model operations
pub type ModelResult<T> = Result<T, ModelError>;

// ============================================================================
// Model Configuration
// ============================================================================

/// Construction-time configuration of one hybrid model.
///
/// Immutable after construction; `embedding_size` must equal the feature
/// width of the chosen backbone, which is checked before any tensor work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Number of output classes
    pub num_classes: usize,
    /// Node embedding width; must equal the extractor's feature width
    pub embedding_size: usize,
    /// Attention layers in the classifier; 0 is valid
    pub n_layers: usize,
    /// Attention heads per layer
    pub n_heads: usize,
    /// Backbone family for feature extraction
    pub backbone: Backbone,
    /// Classifier dropout rate (inert at inference)
    pub dropout_rate: f32,
    /// Edge attribute width (1 for scalar dissimilarity)
    pub edge_dim: usize,
    /// Input image channels the extractor expects
    pub in_channels: usize,
    /// Compute configuration for the pairwise edge-weight pass
    pub device: Device,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            num_classes: 120,
            embedding_size: Backbone::DenseNet201.feature_width(),
            n_layers: 0,
            n_heads: 3,
            backbone: Backbone::DenseNet201,
            dropout_rate: 0.0,
            edge_dim: 1,
            in_channels: 3,
            device: Device::default(),
        }
    }
}

impl ModelConfig {
    /// The classifier sizing this model configuration implies
    pub fn gnn_config(&self) -> GnnConfig {
        GnnConfig {
            feature_size: self.embedding_size,
            embedding_size: self.embedding_size,
            n_layers: self.n_layers,
            n_heads: self.n_heads,
            dropout_rate: self.dropout_rate,
            edge_dim: self.edge_dim,
            num_classes: self.num_classes,
        }
    }
}

// ============================================================================
// Hybrid Model
// ============================================================================

/// The composed classifier: feature extractor, batch graph builder, GNN.
///
/// Stateless per forward call beyond its fixed configuration and weights:
/// graphs are rebuilt from scratch every call, and calling `forward` twice
/// on the same batch yields identical logits.
pub struct HybridModel {
    config: ModelConfig,
    extractor: Box<dyn FeatureExtractor>,
    gnn: GnnClassifier,
}

impl HybridModel {
    /// Build a model for the configured backbone with fresh weights.
    pub fn new(config: ModelConfig) -> ModelResult<Self> {
        Self::with_rng(config, &mut rand::thread_rng())
    }

    /// Build a model, drawing all initial weights from `rng`.
    pub fn with_rng(config: ModelConfig, rng: &mut impl Rng) -> ModelResult<Self> {
        let extractor = Box::new(batchgraph_vision::PatchPoolExtractor::with_rng(
            config.backbone,
            config.in_channels,
            rng,
        ));
        let gnn = GnnClassifier::with_rng(config.gnn_config(), rng)?;
        Self::from_parts(config, extractor, gnn)
    }

    /// Build a model around an injected extractor (the seam used to swap
    /// backbone families or substitute extractors in tests).
    pub fn with_extractor(
        config: ModelConfig,
        extractor: Box<dyn FeatureExtractor>,
    ) -> ModelResult<Self> {
        let gnn = GnnClassifier::new(config.gnn_config())?;
        Self::from_parts(config, extractor, gnn)
    }

    /// Assemble a model from already-built parts, validating widths.
    pub fn from_parts(
        config: ModelConfig,
        extractor: Box<dyn FeatureExtractor>,
        gnn: GnnClassifier,
    ) -> ModelResult<Self> {
        if extractor.feature_width() != config.embedding_size {
            return Err(ModelError::EmbeddingWidthMismatch {
                extractor: extractor.feature_width(),
                configured: config.embedding_size,
            });
        }
        if gnn.config().feature_size != config.embedding_size {
            return Err(ModelError::EmbeddingWidthMismatch {
                extractor: config.embedding_size,
                configured: gnn.config().feature_size,
            });
        }
        Ok(Self {
            config,
            extractor,
            gnn,
        })
    }

    /// Classify one batch of images.
    ///
    /// Returns `n × num_classes` logits with row `i` belonging to image `i`.
    pub fn forward(&self, images: &ImageBatch) -> ModelResult<Array2<f32>> {
        let embeddings = self.extractor.embed(images)?;
        let edge_index = build_edge_index(images.len())?;
        // Frozen structural snapshot of this call's embeddings; the
        // classifier consumes the weights as constants.
        let edge_attr = build_edge_weights(&embeddings.view(), self.config.device)?;
        let logits = self
            .gnn
            .classify(&embeddings.view(), &edge_index.view(), &edge_attr.view())?;
        Ok(logits)
    }

    /// The configuration this model was built with
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// The feature extractor in use
    pub fn extractor(&self) -> &dyn FeatureExtractor {
        self.extractor.as_ref()
    }

    /// The graph classifier in use
    pub fn classifier(&self) -> &GnnClassifier {
        &self.gnn
    }

    /// Number of classifier parameters (the extractor's projection state
    /// is counted separately as backbone-family state)
    pub fn param_count(&self) -> usize {
        self.gnn.param_count()
    }

    /// Persist configuration and all parameter state to `path`.
    pub fn save(&self, path: &std::path::Path) -> ModelResult<()> {
        Checkpoint::capture(self).save(path)
    }

    /// Rebuild a model from a checkpoint written by [`HybridModel::save`].
    pub fn load(path: &std::path::Path) -> ModelResult<Self> {
        Checkpoint::load(path)?.into_model()
    }
}

/// Build a hybrid model for a backbone chosen by configuration name.
///
/// This is the construction entry point mirroring the original per-variant
/// model classes: an unknown name fails fast with an unsupported-variant
/// error before any graph or tensor work begins.
pub fn build_model(backbone_name: &str, mut config: ModelConfig) -> ModelResult<HybridModel> {
    let backbone: Backbone = backbone_name.parse().map_err(ModelError::Vision)?;
    config.backbone = backbone;
    config.embedding_size = backbone.feature_width();
    let extractor = Box::new(build_extractor(backbone, config.in_channels));
    HybridModel::with_extractor(config, extractor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_model_rejects_unknown_backbone() {
        let result = build_model("resnet50", ModelConfig::default());
        assert!(matches!(
            result,
            Err(ModelError::Vision(VisionError::UnsupportedBackbone(_)))
        ));
    }

    #[test]
    fn test_build_model_sizes_to_backbone() {
        let config = ModelConfig {
            in_channels: 1,
            num_classes: 10,
            ..ModelConfig::default()
        };
        let model = build_model("swint_small", config).unwrap();
        assert_eq!(model.config().embedding_size, 768);
        assert_eq!(model.extractor().feature_width(), 768);
    }

    #[test]
    fn test_gnn_config_mirrors_model_config() {
        let config = ModelConfig {
            num_classes: 7,
            n_layers: 2,
            n_heads: 4,
            embedding_size: 1024,
            backbone: Backbone::ConvNextBase,
            ..ModelConfig::default()
        };
        let gnn = config.gnn_config();
        assert_eq!(gnn.feature_size, 1024);
        assert_eq!(gnn.num_classes, 7);
        assert_eq!(gnn.n_layers, 2);
        assert_eq!(gnn.n_heads, 4);
    }
}
