//! Contract tests across all backbone families.
//!
//! Every family must expose the same `batch → N×F embedding` behavior so
//! that the hybrid model upstream stays backbone-agnostic:
//! - reported feature width matches the produced row width
//! - row i belongs to image i
//! - identical images produce identical embedding rows

use batchgraph_vision::{
    build_extractor, Backbone, FeatureExtractor, ImageBatch,
};

const ALL_BACKBONES: [Backbone; 5] = [
    Backbone::DenseNet201,
    Backbone::DenseNet161,
    Backbone::SwinV2Base,
    Backbone::SwinV2Small,
    Backbone::ConvNextBase,
];

fn gradient_batch(n: usize) -> ImageBatch {
    let pixels: Vec<f32> = (0..n)
        .flat_map(|i| (0..28 * 28).map(move |p| ((i + 1) * p % 97) as f32 / 97.0))
        .collect();
    ImageBatch::grayscale(n, 28, 28, pixels).unwrap()
}

#[test]
fn every_backbone_honors_the_width_contract() {
    let batch = gradient_batch(3);
    for backbone in ALL_BACKBONES {
        let extractor = build_extractor(backbone, 1);
        assert_eq!(extractor.backbone(), backbone);
        assert_eq!(extractor.feature_width(), backbone.feature_width());

        let embeddings = extractor.embed(&batch).unwrap();
        assert_eq!(
            embeddings.dim(),
            (3, backbone.feature_width()),
            "{} produced the wrong shape",
            backbone.name()
        );
        assert!(embeddings.iter().all(|v| v.is_finite()));
    }
}

#[test]
fn identical_images_embed_identically() {
    let one = gradient_batch(1);
    let pixels: Vec<f32> = (0..4)
        .flat_map(|_| one.image(0).iter().copied().collect::<Vec<f32>>())
        .collect();
    let four = ImageBatch::grayscale(4, 28, 28, pixels).unwrap();

    for backbone in ALL_BACKBONES {
        let extractor = build_extractor(backbone, 1);
        let embeddings = extractor.embed(&four).unwrap();
        let first = embeddings.row(0);
        for i in 1..4 {
            assert_eq!(
                embeddings.row(i),
                first,
                "{} rows diverged for identical inputs",
                backbone.name()
            );
        }
    }
}

#[test]
fn embedding_rows_follow_batch_order() {
    let batch = gradient_batch(4);
    let reversed = batch.reordered(&[3, 2, 1, 0]).unwrap();

    let extractor = build_extractor(Backbone::SwinV2Base, 1);
    let forward = extractor.embed(&batch).unwrap();
    let backward = extractor.embed(&reversed).unwrap();

    for i in 0..4 {
        assert_eq!(forward.row(i), backward.row(3 - i));
    }
}
