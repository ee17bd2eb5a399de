//! Dataset glue: batch sources backed by MNIST or in-memory data.
//!
//! The core model only ever sees `(ImageBatch, labels)` pairs; which
//! dataset produced them is a loader concern. `MnistSource` is the
//! concrete on-disk loader (the dataset downloads on first use);
//! `InMemorySource` holds prepared batches for tests and demos.

use crate::eval::BatchSource;
use crate::ModelResult;
use batchgraph_vision::ImageBatch;
use mnist::{Mnist, MnistBuilder};
use std::path::Path;

/// MNIST image side length
pub const MNIST_SIDE: usize = 28;
/// Pixels per MNIST image
pub const MNIST_PIXELS: usize = MNIST_SIDE * MNIST_SIDE;

/// Normalize pixel values from u8 [0, 255] to f32 [0.0, 1.0]
pub fn normalize_pixels(pixels: &[u8]) -> Vec<f32> {
    pixels.iter().map(|&p| p as f32 / 255.0).collect()
}

/// Batches over the MNIST test split, single-channel 28×28.
pub struct MnistSource {
    images: Vec<f32>,
    labels: Vec<u8>,
    batch_size: usize,
}

impl MnistSource {
    /// Load the test split from `data_dir`, downloading it if missing.
    ///
    /// `limit` caps the number of test samples; 0 means all 10 000.
    pub fn test_split(data_dir: &Path, batch_size: usize, limit: usize) -> ModelResult<Self> {
        std::fs::create_dir_all(data_dir)?;

        let test_len = if limit == 0 { 10_000 } else { limit.min(10_000) };
        let mnist: Mnist = MnistBuilder::new()
            .base_path(data_dir.to_str().unwrap_or("./data/mnist"))
            .label_format_digit()
            .training_set_length(0)
            .test_set_length(test_len as u32)
            .download_and_extract()
            .finalize();

        Ok(Self {
            images: normalize_pixels(&mnist.tst_img),
            labels: mnist.tst_lbl,
            batch_size: batch_size.max(1),
        })
    }

    /// Total samples in the split
    pub fn num_samples(&self) -> usize {
        self.labels.len()
    }
}

impl BatchSource for MnistSource {
    fn num_batches(&self) -> usize {
        (self.labels.len() + self.batch_size - 1) / self.batch_size
    }

    fn batch(&self, i: usize) -> ModelResult<(ImageBatch, Vec<usize>)> {
        let start = i * self.batch_size;
        let end = (start + self.batch_size).min(self.labels.len());
        let n = end - start;

        let pixels = self.images[start * MNIST_PIXELS..end * MNIST_PIXELS].to_vec();
        let images = ImageBatch::grayscale(n, MNIST_SIDE, MNIST_SIDE, pixels)?;
        let labels = self.labels[start..end].iter().map(|&l| l as usize).collect();
        Ok((images, labels))
    }
}

/// Prepared batches held in memory.
pub struct InMemorySource {
    batches: Vec<(ImageBatch, Vec<usize>)>,
}

impl InMemorySource {
    /// Wrap already-batched data
    pub fn new(batches: Vec<(ImageBatch, Vec<usize>)>) -> Self {
        Self { batches }
    }
}

impl BatchSource for InMemorySource {
    fn num_batches(&self) -> usize {
        self.batches.len()
    }

    fn batch(&self, i: usize) -> ModelResult<(ImageBatch, Vec<usize>)> {
        let (images, labels) = &self.batches[i];
        Ok((images.clone(), labels.clone()))
    }
}
