// ============================================================
// Layer 5 — Evaluator
// ============================================================
// Rebuilds a trained network from an exported weights group
// (<stem>.mpk + <stem>.json) and scores it on a dataset.
// No autodiff backend: evaluation never needs gradients.

use std::path::Path;

use anyhow::{anyhow, bail, Result};
use burn::{config::Config, module::Module, tensor::backend::Backend};

use crate::data::dataset::ImageDataset;
use crate::domain::traits::ValidationMetrics;
use crate::ml::{
    model::{LaneCapsNet, LaneCapsNetConfig},
    trainer::{evaluate_dataset, Recorder32},
};

pub struct Evaluator<B: Backend> {
    config: LaneCapsNetConfig,
    model:  LaneCapsNet<B>,
    device: B::Device,
}

impl<B: Backend> Evaluator<B> {
    /// Load the architecture from `<stem>.json` and the weights from `<stem>.mpk`.
    pub fn from_weights(stem: &Path, device: B::Device) -> Result<Self> {
        let config = LaneCapsNetConfig::load(stem.with_extension("json"))
            .map_err(|e| anyhow!("Cannot read architecture '{}.json': {e:?}", stem.display()))?;
        let model = config
            .init::<B>(&device)?
            .load_file(stem.to_path_buf(), &Recorder32::new(), &device)
            .map_err(|e| anyhow!("Cannot read weights '{}.mpk': {e:?}", stem.display()))?;
        tracing::info!(
            "Loaded '{}' ({} lanes, {} classes)",
            stem.display(),
            config.num_lanes,
            config.num_classes
        );
        Ok(Self { config, model, device })
    }

    pub fn config(&self) -> &LaneCapsNetConfig {
        &self.config
    }

    /// Loss and accuracy over `dataset`. The images must match the
    /// shape and class count the network was trained for.
    pub fn evaluate(&self, dataset: &ImageDataset, batch_size: usize, lam_recon: f64) -> Result<ValidationMetrics> {
        let shape = dataset.shape();
        let expected = (self.config.channels, self.config.height, self.config.width);
        if (shape.channels, shape.height, shape.width) != expected {
            bail!(
                "dataset images are {}x{}x{}, the network expects {}x{}x{}",
                shape.channels, shape.height, shape.width,
                expected.0, expected.1, expected.2
            );
        }
        if dataset.num_classes() != self.config.num_classes {
            bail!(
                "dataset has {} classes, the network predicts {}",
                dataset.num_classes(),
                self.config.num_classes
            );
        }

        evaluate_dataset(&self.model, dataset, batch_size, lam_recon, &self.device)
            .ok_or_else(|| anyhow!("evaluation dataset is empty"))
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    use crate::data::{dataset::ImageShape, synthetic::SyntheticSpec};
    use crate::domain::traits::TrainableModel;
    use crate::ml::trainer::{LaneCapsTrainer, TrainerSettings};

    fn spec(classes: usize) -> SyntheticSpec {
        SyntheticSpec {
            shape:         ImageShape::new(1, 20, 20),
            num_classes:   classes,
            train_samples: 4,
            test_samples:  5,
            noise:         0.1,
        }
    }

    fn export(dir: &Path) -> std::path::PathBuf {
        let config = LaneCapsNetConfig::new(1, 20, 20, 3).with_num_lanes(2).with_lane_size(1);
        let settings = TrainerSettings { batch_size: 2, lr: 0.001, lr_decay: 1.0, lam_recon: 0.392, seed: 1 };
        let data = spec(3).generate(9);
        let trainer = LaneCapsTrainer::<Autodiff<NdArray<f32>>>::new(
            config, settings, data.train, None, Default::default(),
        )
        .unwrap();
        let stem = dir.join("trained_model");
        trainer.export_weights(&stem).unwrap();
        stem
    }

    #[test]
    fn test_evaluates_exported_weights() {
        let dir = tempfile::tempdir().unwrap();
        let stem = export(dir.path());

        let evaluator = Evaluator::<NdArray<f32>>::from_weights(&stem, Default::default()).unwrap();
        assert_eq!(evaluator.config().num_lanes, 2);

        let metrics = evaluator.evaluate(&spec(3).generate(2).test, 2, 0.392).unwrap();
        assert!(metrics.loss.is_finite());
        assert!((0.0..=1.0).contains(&metrics.accuracy));
    }

    #[test]
    fn test_rejects_mismatched_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let stem = export(dir.path());
        let evaluator = Evaluator::<NdArray<f32>>::from_weights(&stem, Default::default()).unwrap();

        assert!(evaluator.evaluate(&spec(4).generate(2).test, 2, 0.392).is_err());
    }

    #[test]
    fn test_missing_weights_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Evaluator::<NdArray<f32>>::from_weights(&dir.path().join("nope"), Default::default());
        assert!(result.is_err());
    }
}
