//! MNIST evaluation for the batch-graph hybrid model.
//!
//! Loads (or freshly initializes) a hybrid model, walks the MNIST test
//! split in batches, and reports top-1 accuracy. Every mini-batch becomes
//! a complete directed graph whose edge weights are feature-space
//! dissimilarities, so accuracy here also exercises the full
//! batch-to-graph path.
//!
//! Usage:
//!   cargo run --bin eval_mnist -- --data-dir ./data/mnist --batch-size 16
//!
//! The MNIST dataset will be automatically downloaded if not present.

use anyhow::{Context, Result};
use batchgraph_core::Device;
use batchgraph_model::loader::MnistSource;
use batchgraph_model::{build_model, evaluate, HybridModel, ModelConfig};
use clap::Parser;
use std::path::PathBuf;

/// MNIST Evaluation CLI
#[derive(Parser, Debug)]
#[command(name = "eval_mnist")]
#[command(about = "Evaluate the batch-graph hybrid classifier on MNIST")]
struct Args {
    /// Directory to store/load MNIST data
    #[arg(short, long, default_value = "./data/mnist")]
    data_dir: PathBuf,

    /// Checkpoint to load; omit to evaluate a freshly initialized model
    #[arg(short, long)]
    checkpoint: Option<PathBuf>,

    /// Batch size (one graph per batch)
    #[arg(short, long, default_value_t = 16)]
    batch_size: usize,

    /// Backbone family (densenet201, densenet161, swint_big, swint_small, convnext_base)
    #[arg(long, default_value = "densenet201")]
    backbone: String,

    /// Number of output classes
    #[arg(long, default_value_t = 10)]
    num_classes: usize,

    /// Attention layers in the classifier (0 = linear head only)
    #[arg(long, default_value_t = 0)]
    n_layers: usize,

    /// Attention heads per layer
    #[arg(long, default_value_t = 3)]
    n_heads: usize,

    /// Number of test samples (0 = all)
    #[arg(long, default_value_t = 0)]
    test_samples: usize,

    /// Disable the parallel pairwise edge-weight pass
    #[arg(long)]
    serial: bool,
}

fn build_fresh_model(args: &Args) -> Result<HybridModel> {
    let config = ModelConfig {
        num_classes: args.num_classes,
        n_layers: args.n_layers,
        n_heads: args.n_heads,
        in_channels: 1,
        device: if args.serial {
            Device::Cpu
        } else {
            Device::CpuParallel
        },
        ..ModelConfig::default()
    };
    build_model(&args.backbone, config)
        .with_context(|| format!("failed to build model for backbone {:?}", args.backbone))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let model = match &args.checkpoint {
        Some(path) => HybridModel::load(path)
            .with_context(|| format!("failed to load checkpoint {:?}", path))?,
        None => build_fresh_model(&args)?,
    };

    println!("Backbone: {}", model.config().backbone.name());
    println!("Embedding size: {}", model.config().embedding_size);
    println!("Classifier parameters: {}", model.param_count());

    let source = MnistSource::test_split(&args.data_dir, args.batch_size, args.test_samples)
        .context("failed to load MNIST test split")?;
    println!(
        "Evaluating {} samples in batches of {}...",
        source.num_samples(),
        args.batch_size
    );

    let report = evaluate(&model, &source, true)?;
    println!(" Accuracy on the test images: {:.4} %", report.accuracy());
    Ok(())
}
