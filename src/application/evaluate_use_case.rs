// ============================================================
// Layer 2 — Evaluate Use Case
// ============================================================
// Scores trained weights on the test split:
//
//   Step 1: Read train_config.json from the save dir
//   Step 2: Fill unset options from it (dataset, data dir, seed)
//   Step 3: Load the test split
//   Step 4: Rebuild the network from <weights>.json + .mpk
//   Step 5: Report loss and accuracy

use std::path::{Path, PathBuf};

use anyhow::Result;
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, NdArray, Wgpu},
    tensor::backend::Backend,
};

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    dataset::{DatasetKind, ImageDataset},
    loader::load_dataset,
};
use crate::domain::traits::ValidationMetrics;
use crate::infra::checkpoint::CheckpointManager;
use crate::ml::evaluator::Evaluator;

#[derive(Debug, Clone)]
pub struct EvaluateConfig {
    pub save_dir:   PathBuf,
    /// Weights stem or `.mpk` file; defaults to the run's export.
    pub weights:    Option<PathBuf>,
    pub dataset:    Option<DatasetKind>,
    pub data_dir:   Option<PathBuf>,
    pub batch_size: usize,
    pub gpus:       usize,
}

/// Strip a trailing `.mpk`/`.json` so either file names the group.
fn weights_stem(path: &Path) -> PathBuf {
    match path.extension().and_then(|e| e.to_str()) {
        Some("mpk") | Some("json") => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

pub struct EvaluateUseCase {
    config: EvaluateConfig,
}

impl EvaluateUseCase {
    pub fn new(config: EvaluateConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<ValidationMetrics> {
        let cfg = &self.config;

        // ── Steps 1-2: Training settings ──────────────────────────────────────
        let ckpt = CheckpointManager::new(&cfg.save_dir)?;
        let train_cfg: TrainConfig = ckpt.load_config()?;
        let dataset = cfg.dataset.unwrap_or(train_cfg.dataset);
        let data_dir = cfg.data_dir.clone().unwrap_or_else(|| train_cfg.data_dir.clone());
        let stem = cfg
            .weights
            .as_deref()
            .map(weights_stem)
            .unwrap_or_else(|| ckpt.export_stem());

        // ── Step 3: Test split ────────────────────────────────────────────────
        let test = load_dataset(dataset, &data_dir, train_cfg.seed)?.test;
        tracing::info!("Evaluating '{}' on {} test samples", stem.display(), test.samples().len());

        // ── Steps 4-5: Model + metrics ────────────────────────────────────────
        if cfg.gpus == 0 {
            self.run_on::<NdArray>(&stem, &test, train_cfg.lam_recon, NdArrayDevice::default())
        } else {
            self.run_on::<Wgpu>(&stem, &test, train_cfg.lam_recon, WgpuDevice::default())
        }
    }

    fn run_on<B: Backend>(
        &self,
        stem:      &Path,
        test:      &ImageDataset,
        lam_recon: f64,
        device:    B::Device,
    ) -> Result<ValidationMetrics> {
        let evaluator = Evaluator::<B>::from_weights(stem, device)?;
        let metrics = evaluator.evaluate(test, self.config.batch_size, lam_recon)?;
        tracing::info!(
            "Test loss {:.6}, accuracy {:.4}",
            metrics.loss,
            metrics.accuracy
        );
        Ok(metrics)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_stem_accepts_any_group_member() {
        assert_eq!(weights_stem(Path::new("out/trained_model.mpk")), PathBuf::from("out/trained_model"));
        assert_eq!(weights_stem(Path::new("out/trained_model.json")), PathBuf::from("out/trained_model"));
        assert_eq!(weights_stem(Path::new("out/trained_model")), PathBuf::from("out/trained_model"));
    }

    #[test]
    fn test_missing_train_config_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EvaluateConfig {
            save_dir:   dir.path().to_path_buf(),
            weights:    None,
            dataset:    Some(DatasetKind::Synthetic),
            data_dir:   None,
            batch_size: 8,
            gpus:       0,
        };
        let err = EvaluateUseCase::new(cfg).execute().unwrap_err();
        assert!(err.to_string().contains("train_config.json"));
    }
}
