//! # batchgraph-core
//!
//! Batch-to-graph construction for mini-batch graph neural networks.
//!
//! This crate provides:
//! - `build_edge_index` - Complete directed graph topology over a batch
//! - `build_edge_weights` - Pairwise dissimilarity edge attributes
//! - `BatchGraph` - Edge index and edge attributes bundled per forward call
//! - `Device` - Explicit compute configuration (no process-wide globals)
//!
//! ## Batch-as-graph principle
//!
//! ```text
//! Batch of N samples → N nodes → N² directed edges (self-loops included)
//!                               → weight(s, t) = mean(|sample_t - sample_s|)
//! ```
//!
//! Every sample in a mini-batch becomes a graph node; every ordered pair of
//! samples becomes an edge whose weight is the mean absolute elementwise
//! difference between the two representations. A weight of zero means the
//! two samples are identical, so self-loops always carry weight zero.
//!
//! Graphs are rebuilt from scratch on every call and never cached: node
//! identity is batch position, which only has meaning within a single
//! forward pass.

use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors in batch graph construction
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Empty batch: a graph needs at least one node")]
    EmptyBatch,
    #[error("Empty feature dimension: samples have no elements to compare")]
    EmptyFeatures,
    #[error("Edge count mismatch: expected {expected}, got {actual}")]
    EdgeCountMismatch { expected: usize, actual: usize },
}

/// Result type for graph construction
pub type GraphResult<T> = Result<T, GraphError>;

// ============================================================================
// Device Configuration
// ============================================================================

/// Explicit compute configuration, threaded through model construction.
///
/// There is no process-wide "use accelerator if available" state anywhere in
/// this workspace; every component that does pairwise work receives its
/// `Device` at construction time. Defaulting happens only at the CLI entry
/// point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Device {
    /// Single-threaded CPU execution
    Cpu,
    /// CPU execution with the O(N²) pairwise passes spread over rayon
    #[default]
    CpuParallel,
}

impl Device {
    /// Whether pairwise passes fan out over the rayon pool
    pub fn is_parallel(&self) -> bool {
        matches!(self, Device::CpuParallel)
    }
}

// ============================================================================
// Edge Index
// ============================================================================

/// Build the complete directed graph over `n` nodes, self-loops included.
///
/// Returns a `2 × n²` array: row 0 holds sources, row 1 holds targets, in
/// row-major (source-major) order — for source `s` in `0..n`, for target
/// `t` in `0..n`, column `s * n + t` is the edge `(s, t)`. Edge weights
/// produced by [`build_edge_weights`] follow this exact order, so the two
/// must always be built for the same `n`.
///
/// Pure function of `n`; sample values never enter into the topology.
///
/// # Example
/// ```
/// use batchgraph_core::build_edge_index;
///
/// let index = build_edge_index(2).unwrap();
/// assert_eq!(index.shape(), &[2, 4]);
/// // (0,0), (0,1), (1,0), (1,1)
/// assert_eq!(index.column(1).to_vec(), vec![0, 1]);
/// ```
pub fn build_edge_index(n: usize) -> GraphResult<Array2<usize>> {
    if n == 0 {
        return Err(GraphError::EmptyBatch);
    }
    let mut index = Array2::zeros((2, n * n));
    for s in 0..n {
        for t in 0..n {
            let k = s * n + t;
            index[[0, k]] = s;
            index[[1, k]] = t;
        }
    }
    Ok(index)
}

// ============================================================================
// Edge Weights
// ============================================================================

/// One source row of the pairwise dissimilarity pass: weights from sample
/// `s` to every sample in the batch, in target order.
fn weight_row(items: &ArrayView2<f32>, s: usize) -> Array1<f32> {
    let (n, f) = items.dim();
    let src = items.row(s);
    let mut out = Array1::zeros(n);
    for t in 0..n {
        let sum: f32 = src
            .iter()
            .zip(items.row(t).iter())
            .map(|(x, y)| (y - x).abs())
            .sum();
        out[t] = sum / f as f32;
    }
    out
}

/// Build edge weights for the complete directed graph over `items`.
///
/// `items` is an `n × f` matrix, one sample representation per row. For
/// every ordered pair `(s, t)` in the row-major order of
/// [`build_edge_index`], the weight is `mean(|items[t] - items[s]|)` over
/// all `f` elements. This is a dissimilarity, not a similarity:
///
/// - zero when the two rows are identical (so self-loops are always zero)
/// - symmetric, since `|y - x| = |x - y|`
/// - unbounded above
///
/// Output is an `n² × 1` column, aligned positionally with the edge index.
///
/// The pass is O(n²·f); with [`Device::CpuParallel`] the outer source loop
/// runs on the rayon pool.
pub fn build_edge_weights(items: &ArrayView2<f32>, device: Device) -> GraphResult<Array2<f32>> {
    let (n, f) = items.dim();
    if n == 0 {
        return Err(GraphError::EmptyBatch);
    }
    if f == 0 {
        return Err(GraphError::EmptyFeatures);
    }

    let rows: Vec<Array1<f32>> = if device.is_parallel() {
        (0..n).into_par_iter().map(|s| weight_row(items, s)).collect()
    } else {
        (0..n).map(|s| weight_row(items, s)).collect()
    };

    let mut weights = Array2::zeros((n * n, 1));
    for (s, row) in rows.iter().enumerate() {
        for t in 0..n {
            weights[[s * n + t, 0]] = row[t];
        }
    }
    Ok(weights)
}

// ============================================================================
// Batch Graph
// ============================================================================

/// The complete directed graph derived from one batch: topology plus
/// positionally aligned edge attributes.
///
/// Built fresh per forward call and discarded with it. `edge_index` is
/// `2 × n²`, `edge_attr` is `n² × 1`, both in the row-major order of
/// [`build_edge_index`].
#[derive(Debug, Clone)]
pub struct BatchGraph {
    /// `2 × n²` sources-then-targets topology
    pub edge_index: Array2<usize>,
    /// `n² × 1` dissimilarity weights, aligned with `edge_index` columns
    pub edge_attr: Array2<f32>,
}

impl BatchGraph {
    /// Build topology and weights together from one batch of sample rows.
    pub fn build(items: &ArrayView2<f32>, device: Device) -> GraphResult<Self> {
        let edge_index = build_edge_index(items.nrows())?;
        let edge_attr = build_edge_weights(items, device)?;
        debug_assert_eq!(edge_index.ncols(), edge_attr.nrows());
        Ok(Self {
            edge_index,
            edge_attr,
        })
    }

    /// Number of nodes in the batch graph
    pub fn num_nodes(&self) -> usize {
        (self.edge_index.ncols() as f64).sqrt() as usize
    }

    /// Number of directed edges (always `num_nodes²`)
    pub fn num_edges(&self) -> usize {
        self.edge_index.ncols()
    }

    /// The `(source, target)` pair at edge position `k`
    pub fn pair(&self, k: usize) -> (usize, usize) {
        (self.edge_index[[0, k]], self.edge_index[[1, k]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_edge_index_row_major_order() {
        let index = build_edge_index(3).unwrap();
        assert_eq!(index.shape(), &[2, 9]);
        let pairs: Vec<(usize, usize)> =
            (0..9).map(|k| (index[[0, k]], index[[1, k]])).collect();
        let expected: Vec<(usize, usize)> = (0..3)
            .flat_map(|s| (0..3).map(move |t| (s, t)))
            .collect();
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_edge_index_counts_for_all_small_n() {
        for n in 1..=8 {
            let index = build_edge_index(n).unwrap();
            assert_eq!(index.ncols(), n * n);
            // every ordered pair appears exactly once
            let mut seen = vec![false; n * n];
            for k in 0..n * n {
                let (s, t) = (index[[0, k]], index[[1, k]]);
                assert!(s < n && t < n);
                assert!(!seen[s * n + t], "pair ({}, {}) repeated", s, t);
                seen[s * n + t] = true;
            }
            assert!(seen.iter().all(|&v| v));
        }
    }

    #[test]
    fn test_edge_index_rejects_empty_batch() {
        assert!(matches!(build_edge_index(0), Err(GraphError::EmptyBatch)));
    }

    #[test]
    fn test_single_node_graph_is_one_zero_self_loop() {
        let items = array![[0.3f32, 0.7, 0.1]];
        let graph = BatchGraph::build(&items.view(), Device::Cpu).unwrap();
        assert_eq!(graph.num_edges(), 1);
        assert_eq!(graph.pair(0), (0, 0));
        assert_eq!(graph.edge_attr[[0, 0]], 0.0);
    }

    #[test]
    fn test_self_loops_are_exactly_zero() {
        let items = array![[1.0f32, 2.0], [3.0, 4.0], [-1.0, 0.5]];
        let weights = build_edge_weights(&items.view(), Device::Cpu).unwrap();
        let n = 3;
        for i in 0..n {
            assert_eq!(weights[[i * n + i, 0]], 0.0);
        }
    }

    #[test]
    fn test_weights_are_symmetric() {
        let items = array![
            [0.1f32, 0.9, 0.3, 0.4],
            [0.5, 0.5, 0.5, 0.5],
            [0.0, 1.0, 0.0, 1.0],
            [0.2, 0.2, 0.8, 0.8]
        ];
        let weights = build_edge_weights(&items.view(), Device::Cpu).unwrap();
        let n = 4;
        for s in 0..n {
            for t in 0..n {
                let forward = weights[[s * n + t, 0]];
                let backward = weights[[t * n + s, 0]];
                assert!((forward - backward).abs() < 1e-7);
            }
        }
    }

    #[test]
    fn test_weight_is_mean_absolute_difference() {
        let items = array![[0.0f32, 0.0], [1.0, 3.0]];
        let weights = build_edge_weights(&items.view(), Device::Cpu).unwrap();
        // mean(|[1, 3] - [0, 0]|) = 2.0
        assert!((weights[[1, 0]] - 2.0).abs() < 1e-6);
        assert!((weights[[2, 0]] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_identical_rows_give_all_zero_weights() {
        let row = vec![0.25f32; 16];
        let items = Array2::from_shape_vec((4, 16), row.repeat(4)).unwrap();
        let weights = build_edge_weights(&items.view(), Device::Cpu).unwrap();
        assert_eq!(weights.nrows(), 16);
        assert!(weights.iter().all(|&w| w == 0.0));
    }

    #[test]
    fn test_parallel_and_serial_devices_agree() {
        let items = Array2::from_shape_fn((7, 33), |(i, j)| ((i * 31 + j * 7) % 13) as f32 / 13.0);
        let serial = build_edge_weights(&items.view(), Device::Cpu).unwrap();
        let parallel = build_edge_weights(&items.view(), Device::CpuParallel).unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn test_empty_feature_dimension_rejected() {
        let items = Array2::<f32>::zeros((3, 0));
        assert!(matches!(
            build_edge_weights(&items.view(), Device::Cpu),
            Err(GraphError::EmptyFeatures)
        ));
    }

    #[test]
    fn test_weight_column_layout() {
        let items = array![[0.0f32], [1.0], [2.0]];
        let weights = build_edge_weights(&items.view(), Device::Cpu).unwrap();
        assert_eq!(weights.shape(), &[9, 1]);
    }

    #[test]
    fn test_batch_graph_node_count() {
        let items = Array2::from_shape_fn((5, 8), |(i, j)| (i + j) as f32);
        let graph = BatchGraph::build(&items.view(), Device::Cpu).unwrap();
        assert_eq!(graph.num_nodes(), 5);
        assert_eq!(graph.num_edges(), 25);
    }
}
