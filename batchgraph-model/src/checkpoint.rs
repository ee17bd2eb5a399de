//! Checkpoint persistence for hybrid models.
//!
//! A checkpoint carries the model configuration plus every parameter
//! array: the extractor's projection state and the whole classifier. The
//! on-disk format is JSON with a magic tag and a format version validated
//! on load, so a foreign or stale file fails with a clear error instead of
//! a deserialization panic deep inside ndarray.

use crate::{HybridModel, ModelConfig, ModelError, ModelResult};
use batchgraph_gnn::GnnClassifier;
use batchgraph_vision::{build_extractor, ExtractorState, FeatureExtractor};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Magic tag identifying batch-graph checkpoints
pub const CHECKPOINT_MAGIC: &str = "BGPH";
/// Current checkpoint format version
pub const CHECKPOINT_VERSION: u8 = 1;

/// Serialized model state: configuration plus all parameter arrays.
#[derive(Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Format identification, always [`CHECKPOINT_MAGIC`]
    pub magic: String,
    /// Format version, always [`CHECKPOINT_VERSION`] when written
    pub version: u8,
    /// The model configuration at save time
    pub config: ModelConfig,
    /// Extractor projection state; `None` for stateless extractors
    pub extractor: Option<ExtractorState>,
    /// The full classifier with its weights
    pub gnn: GnnClassifier,
}

impl Checkpoint {
    /// Snapshot a model's configuration and parameters.
    pub fn capture(model: &HybridModel) -> Self {
        Self {
            magic: CHECKPOINT_MAGIC.to_string(),
            version: CHECKPOINT_VERSION,
            config: model.config().clone(),
            extractor: model.extractor().export_state(),
            gnn: model.classifier().clone(),
        }
    }

    /// Write the checkpoint as JSON to `path`.
    pub fn save(&self, path: &Path) -> ModelResult<()> {
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    /// Read and validate a checkpoint from `path`.
    pub fn load(path: &Path) -> ModelResult<Self> {
        let file = File::open(path)?;
        let checkpoint: Checkpoint = serde_json::from_reader(BufReader::new(file))?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    /// Check magic and version without rebuilding the model.
    pub fn validate(&self) -> ModelResult<()> {
        if self.magic != CHECKPOINT_MAGIC {
            return Err(ModelError::InvalidCheckpoint(format!(
                "bad magic {:?}",
                self.magic
            )));
        }
        if self.version != CHECKPOINT_VERSION {
            return Err(ModelError::CheckpointVersion {
                expected: CHECKPOINT_VERSION,
                found: self.version,
            });
        }
        Ok(())
    }

    /// Rebuild the hybrid model this checkpoint describes.
    pub fn into_model(self) -> ModelResult<HybridModel> {
        let mut extractor = build_extractor(self.config.backbone, self.config.in_channels);
        if let Some(state) = self.extractor {
            extractor.import_state(state)?;
        }
        HybridModel::from_parts(self.config, Box::new(extractor), self.gnn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelConfig;
    use batchgraph_vision::Backbone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_model() -> HybridModel {
        let config = ModelConfig {
            num_classes: 5,
            embedding_size: Backbone::SwinV2Small.feature_width(),
            backbone: Backbone::SwinV2Small,
            n_layers: 1,
            n_heads: 2,
            in_channels: 1,
            ..ModelConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(99);
        HybridModel::with_rng(config, &mut rng).unwrap()
    }

    #[test]
    fn test_capture_carries_magic_and_version() {
        let checkpoint = Checkpoint::capture(&small_model());
        assert_eq!(checkpoint.magic, CHECKPOINT_MAGIC);
        assert_eq!(checkpoint.version, CHECKPOINT_VERSION);
        assert!(checkpoint.extractor.is_some());
    }

    #[test]
    fn test_validate_rejects_foreign_magic() {
        let mut checkpoint = Checkpoint::capture(&small_model());
        checkpoint.magic = "GRPH".to_string();
        assert!(matches!(
            checkpoint.validate(),
            Err(ModelError::InvalidCheckpoint(_))
        ));
    }

    #[test]
    fn test_validate_rejects_future_version() {
        let mut checkpoint = Checkpoint::capture(&small_model());
        checkpoint.version = 2;
        assert!(matches!(
            checkpoint.validate(),
            Err(ModelError::CheckpointVersion {
                expected: 1,
                found: 2
            })
        ));
    }

    #[test]
    fn test_save_load_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");

        let model = small_model();
        model.save(&path).unwrap();
        let restored = HybridModel::load(&path).unwrap();

        assert_eq!(restored.config(), model.config());
        assert_eq!(restored.param_count(), model.param_count());
    }

    #[test]
    fn test_load_rejects_garbage_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_a_checkpoint.json");
        std::fs::write(&path, b"{\"weights\": []}").unwrap();
        assert!(matches!(
            Checkpoint::load(&path),
            Err(ModelError::Serialization(_))
        ));
    }
}
