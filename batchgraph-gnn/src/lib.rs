//! # batchgraph-gnn
//!
//! Graph classifier for batch graphs: edge-weighted multi-head attention.
//!
//! This crate provides:
//! - `GnnConfig` - Classifier sizing, immutable after construction
//! - `EdgeAttentionLayer` - Transformer-conv style message passing where
//!   edge attributes shift keys and values
//! - `GnnClassifier` - Input projection, `n_layers` attention layers, and
//!   a linear head producing per-node class logits
//!
//! ## Contract
//!
//! ```text
//! classify(node_features N×F, edge_index 2×N², edge_attr N²×edge_dim)
//!     → logits N×num_classes
//! ```
//!
//! Row `i` of the logits belongs to node `i`, which belongs to batch item
//! `i`; nothing in this crate reorders rows. `n_layers = 0` is a valid
//! degenerate configuration: features go through the input projection
//! straight into the head and the graph arguments only get shape-checked.
//!
//! The classifier is forward-only. Edge attributes arrive as plain numbers
//! with no gradient history; they modulate attention and are never treated
//! as learnable inputs.

use ndarray::{Array1, Array2, ArrayView2};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// LeakyReLU negative slope used after every attention layer
pub const LEAKY_RELU_ALPHA: f32 = 0.01;

// ============================================================================
// Error Types
// ============================================================================

/// Errors in graph classification
#[derive(Error, Debug)]
pub enum GnnError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Feature width mismatch: classifier expects {expected}, got {actual}")]
    FeatureWidthMismatch { expected: usize, actual: usize },
    #[error("Edge shape mismatch: {0}")]
    EdgeShapeMismatch(String),
    #[error("Edge attribute width mismatch: expected {expected}, got {actual}")]
    EdgeDimMismatch { expected: usize, actual: usize },
    #[error("Edge references node {index} but the graph has {nodes} nodes")]
    NodeIndexOutOfRange { index: usize, nodes: usize },
    #[error("Empty graph: need at least one node")]
    EmptyGraph,
}

/// Result type for classifier operations
pub type GnnResult<T> = Result<T, GnnError>;

// ============================================================================
// Configuration
// ============================================================================

/// Classifier sizing. Fixed at construction; checkpoints carry it whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GnnConfig {
    /// Width F of incoming node features (must match the extractor)
    pub feature_size: usize,
    /// Internal embedding width after input projection
    pub embedding_size: usize,
    /// Number of attention layers; 0 is a valid degenerate classifier
    pub n_layers: usize,
    /// Attention heads per layer
    pub n_heads: usize,
    /// Dropout rate; carried for checkpoint compatibility, inert at inference
    pub dropout_rate: f32,
    /// Width of edge attributes (1 for scalar dissimilarity weights)
    pub edge_dim: usize,
    /// Number of output classes
    pub num_classes: usize,
}

impl Default for GnnConfig {
    fn default() -> Self {
        Self {
            feature_size: 1920,
            embedding_size: 1920,
            n_layers: 0,
            n_heads: 3,
            dropout_rate: 0.0,
            edge_dim: 1,
            num_classes: 120,
        }
    }
}

impl GnnConfig {
    /// Check internal consistency before any weights are allocated.
    pub fn validate(&self) -> GnnResult<()> {
        if self.feature_size == 0 {
            return Err(GnnError::InvalidConfig("feature_size must be > 0".into()));
        }
        if self.embedding_size == 0 {
            return Err(GnnError::InvalidConfig("embedding_size must be > 0".into()));
        }
        if self.num_classes == 0 {
            return Err(GnnError::InvalidConfig("num_classes must be > 0".into()));
        }
        if self.edge_dim == 0 {
            return Err(GnnError::InvalidConfig("edge_dim must be > 0".into()));
        }
        if self.n_heads == 0 {
            return Err(GnnError::InvalidConfig("n_heads must be > 0".into()));
        }
        if self.n_layers > 0 && self.embedding_size % self.n_heads != 0 {
            return Err(GnnError::InvalidConfig(format!(
                "embedding_size {} not divisible by n_heads {}",
                self.embedding_size, self.n_heads
            )));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(GnnError::InvalidConfig(format!(
                "dropout_rate {} outside [0, 1)",
                self.dropout_rate
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Linear Layer
// ============================================================================

/// Dense linear layer: `y = x Wᵀ + b`, applied row-wise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Linear {
    /// Weight matrix, `out_dim × in_dim`
    pub weight: Array2<f32>,
    /// Bias vector, `out_dim`
    pub bias: Array1<f32>,
}

impl Linear {
    /// Create a layer with DynamicXavier initialization: sqrt(2 / (fan_in + fan_out))
    pub fn with_rng(in_dim: usize, out_dim: usize, rng: &mut impl Rng) -> Self {
        let scale = (2.0 / (in_dim + out_dim) as f32).sqrt();
        let weight = Array2::from_shape_fn((out_dim, in_dim), |_| rng.gen_range(-scale..scale));
        let bias = Array1::zeros(out_dim);
        Self { weight, bias }
    }

    /// Forward pass over a batch of rows
    pub fn forward(&self, x: &ArrayView2<f32>) -> Array2<f32> {
        x.dot(&self.weight.t()) + &self.bias
    }

    /// Number of trainable parameters
    pub fn param_count(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

/// Numerically stable softmax over `scores`, written into a fresh vector.
fn softmax(scores: &[f32]) -> Vec<f32> {
    let max = scores.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exps: Vec<f32> = scores.iter().map(|&s| (s - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

// ============================================================================
// Edge-Weighted Attention Layer
// ============================================================================

/// One multi-head attention layer over an explicit edge list.
///
/// Transformer-conv shape: queries come from the target node, keys and
/// values from the source node, and a learned projection of the edge
/// attribute shifts both key and value. Attention is softmax-normalized
/// over each node's incoming edges, per head. The layer ends with an
/// output projection, a residual connection, layer normalization, and
/// LeakyReLU.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeAttentionLayer {
    n_heads: usize,
    head_dim: usize,
    w_query: Linear,
    w_key: Linear,
    w_value: Linear,
    w_edge: Linear,
    w_out: Linear,
    /// Layer normalization scale
    ln_scale: Array1<f32>,
    /// Layer normalization bias
    ln_bias: Array1<f32>,
}

impl EdgeAttentionLayer {
    /// Create a layer over `embed_dim`-wide node states.
    pub fn with_rng(embed_dim: usize, n_heads: usize, edge_dim: usize, rng: &mut impl Rng) -> Self {
        debug_assert_eq!(embed_dim % n_heads, 0);
        Self {
            n_heads,
            head_dim: embed_dim / n_heads,
            w_query: Linear::with_rng(embed_dim, embed_dim, rng),
            w_key: Linear::with_rng(embed_dim, embed_dim, rng),
            w_value: Linear::with_rng(embed_dim, embed_dim, rng),
            w_edge: Linear::with_rng(edge_dim, embed_dim, rng),
            w_out: Linear::with_rng(embed_dim, embed_dim, rng),
            ln_scale: Array1::ones(embed_dim),
            ln_bias: Array1::zeros(embed_dim),
        }
    }

    /// Forward pass: `x` is `n × embed_dim`, `edge_index` is `2 × m`,
    /// `edge_attr` is `m × edge_dim`.
    pub fn forward(
        &self,
        x: &ArrayView2<f32>,
        edge_index: &ArrayView2<usize>,
        edge_attr: &ArrayView2<f32>,
    ) -> Array2<f32> {
        let (n, d) = x.dim();
        let m = edge_index.ncols();
        let scale = 1.0 / (self.head_dim as f32).sqrt();

        let q = self.w_query.forward(x);
        let k = self.w_key.forward(x);
        let v = self.w_value.forward(x);
        let e = self.w_edge.forward(edge_attr);

        // Incoming edge lists per target node
        let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); n];
        for idx in 0..m {
            incoming[edge_index[[1, idx]]].push(idx);
        }

        let mut aggregated = Array2::zeros((n, d));
        for t in 0..n {
            let edges = &incoming[t];
            if edges.is_empty() {
                continue;
            }
            for h in 0..self.n_heads {
                let lo = h * self.head_dim;
                let hi = lo + self.head_dim;
                let q_t = q.row(t);

                let scores: Vec<f32> = edges
                    .iter()
                    .map(|&idx| {
                        let s = edge_index[[0, idx]];
                        let mut dot = 0.0f32;
                        for j in lo..hi {
                            dot += q_t[j] * (k[[s, j]] + e[[idx, j]]);
                        }
                        dot * scale
                    })
                    .collect();
                let alphas = softmax(&scores);

                for (&idx, &alpha) in edges.iter().zip(alphas.iter()) {
                    let s = edge_index[[0, idx]];
                    for j in lo..hi {
                        aggregated[[t, j]] += alpha * (v[[s, j]] + e[[idx, j]]);
                    }
                }
            }
        }

        // Output projection, residual, layer norm, LeakyReLU
        let projected = self.w_out.forward(&aggregated.view());
        let mut out = projected + x;
        for mut row in out.rows_mut() {
            let mean = row.mean().unwrap_or(0.0);
            let var = row.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(1.0);
            let std = (var + 1e-5).sqrt();
            for (j, value) in row.iter_mut().enumerate() {
                let normalized = (*value - mean) / std * self.ln_scale[j] + self.ln_bias[j];
                *value = if normalized > 0.0 {
                    normalized
                } else {
                    LEAKY_RELU_ALPHA * normalized
                };
            }
        }
        out
    }

    /// Number of trainable parameters
    pub fn param_count(&self) -> usize {
        self.w_query.param_count()
            + self.w_key.param_count()
            + self.w_value.param_count()
            + self.w_edge.param_count()
            + self.w_out.param_count()
            + self.ln_scale.len()
            + self.ln_bias.len()
    }
}

// ============================================================================
// Graph Classifier
// ============================================================================

/// The full graph classifier: projection, attention stack, linear head.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GnnClassifier {
    config: GnnConfig,
    input_proj: Linear,
    layers: Vec<EdgeAttentionLayer>,
    head: Linear,
}

impl GnnClassifier {
    /// Build a classifier with freshly initialized weights.
    pub fn new(config: GnnConfig) -> GnnResult<Self> {
        Self::with_rng(config, &mut rand::thread_rng())
    }

    /// Build a classifier, drawing initial weights from `rng`.
    pub fn with_rng(config: GnnConfig, rng: &mut impl Rng) -> GnnResult<Self> {
        config.validate()?;
        let input_proj = Linear::with_rng(config.feature_size, config.embedding_size, rng);
        let layers = (0..config.n_layers)
            .map(|_| {
                EdgeAttentionLayer::with_rng(
                    config.embedding_size,
                    config.n_heads,
                    config.edge_dim,
                    rng,
                )
            })
            .collect();
        let head = Linear::with_rng(config.embedding_size, config.num_classes, rng);
        Ok(Self {
            config,
            input_proj,
            layers,
            head,
        })
    }

    /// The sizing this classifier was built with
    pub fn config(&self) -> &GnnConfig {
        &self.config
    }

    /// Number of trainable parameters across all layers
    pub fn param_count(&self) -> usize {
        self.input_proj.param_count()
            + self.layers.iter().map(|l| l.param_count()).sum::<usize>()
            + self.head.param_count()
    }

    fn validate_inputs(
        &self,
        node_features: &ArrayView2<f32>,
        edge_index: &ArrayView2<usize>,
        edge_attr: &ArrayView2<f32>,
    ) -> GnnResult<()> {
        let (n, f) = node_features.dim();
        if n == 0 {
            return Err(GnnError::EmptyGraph);
        }
        if f != self.config.feature_size {
            return Err(GnnError::FeatureWidthMismatch {
                expected: self.config.feature_size,
                actual: f,
            });
        }
        if edge_index.nrows() != 2 {
            return Err(GnnError::EdgeShapeMismatch(format!(
                "edge_index must have 2 rows, got {}",
                edge_index.nrows()
            )));
        }
        if edge_index.ncols() != edge_attr.nrows() {
            return Err(GnnError::EdgeShapeMismatch(format!(
                "{} edges but {} attribute rows",
                edge_index.ncols(),
                edge_attr.nrows()
            )));
        }
        if edge_attr.ncols() != self.config.edge_dim {
            return Err(GnnError::EdgeDimMismatch {
                expected: self.config.edge_dim,
                actual: edge_attr.ncols(),
            });
        }
        for &index in edge_index.iter() {
            if index >= n {
                return Err(GnnError::NodeIndexOutOfRange { index, nodes: n });
            }
        }
        Ok(())
    }

    /// Classify every node of one batch graph.
    ///
    /// Returns `n × num_classes` logits with row `i` belonging to node `i`.
    pub fn classify(
        &self,
        node_features: &ArrayView2<f32>,
        edge_index: &ArrayView2<usize>,
        edge_attr: &ArrayView2<f32>,
    ) -> GnnResult<Array2<f32>> {
        self.validate_inputs(node_features, edge_index, edge_attr)?;

        let mut state = self.input_proj.forward(node_features);
        for layer in &self.layers {
            state = layer.forward(&state.view(), edge_index, edge_attr);
        }
        Ok(self.head.forward(&state.view()))
    }
}
