//! Top-1 accuracy evaluation over batch sources.
//!
//! The model exposes `forward(images) -> logits`; evaluation is the thin
//! glue around it: walk the batches of a source, argmax each logits row,
//! compare against labels. Batch position is node identity end-to-end, so
//! row `i` of the logits is scored against label `i` of the same batch.

use crate::{HybridModel, ModelResult};
use batchgraph_vision::ImageBatch;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;

/// A source of `(image batch, label batch)` pairs, indexed by batch.
///
/// Labels are class indices aligned with batch positions: `labels[i]` is
/// the ground truth for image `i` of the same batch.
pub trait BatchSource {
    /// Number of batches available
    fn num_batches(&self) -> usize;

    /// Produce batch `i` with its labels
    fn batch(&self, i: usize) -> ModelResult<(ImageBatch, Vec<usize>)>;
}

/// Outcome of one evaluation pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalReport {
    /// Correct top-1 predictions
    pub correct: usize,
    /// Samples evaluated
    pub total: usize,
}

impl EvalReport {
    /// Accuracy as a percentage
    pub fn accuracy(&self) -> f32 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.correct as f32 / self.total as f32
    }
}

/// Predicted class per logits row
pub fn argmax_rows(logits: &Array2<f32>) -> Vec<usize> {
    logits
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(idx, _)| idx)
                .unwrap_or(0)
        })
        .collect()
}

fn progress_bar(len: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("##-"));
    }
    pb
}

/// Run the model over every batch of `source`, scoring top-1 accuracy.
pub fn evaluate(
    model: &HybridModel,
    source: &dyn BatchSource,
    show_progress: bool,
) -> ModelResult<EvalReport> {
    let pb = progress_bar(source.num_batches(), show_progress);

    let mut correct = 0;
    let mut total = 0;
    for i in 0..source.num_batches() {
        let (images, labels) = source.batch(i)?;
        let logits = model.forward(&images)?;
        let predicted = argmax_rows(&logits);

        correct += predicted
            .iter()
            .zip(labels.iter())
            .filter(|(p, l)| p == l)
            .count();
        total += labels.len();
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(EvalReport { correct, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_argmax_rows() {
        let logits = array![[0.1f32, 0.9, 0.0], [2.0, -1.0, 1.5], [0.0, 0.0, 0.3]];
        assert_eq!(argmax_rows(&logits), vec![1, 0, 2]);
    }

    #[test]
    fn test_report_accuracy() {
        let report = EvalReport {
            correct: 3,
            total: 4,
        };
        assert!((report.accuracy() - 75.0).abs() < 1e-6);

        let empty = EvalReport {
            correct: 0,
            total: 0,
        };
        assert_eq!(empty.accuracy(), 0.0);
    }
}
