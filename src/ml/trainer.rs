// ============================================================
// Layer 5 — Lane CapsNet Trainer
// ============================================================
// Adapts the Burn model + Adam to the TrainableModel seam the
// training loop drives. One call = one optimisation step:
//
//   epoch order (seeded shuffle of this worker's shard)
//     → slice [batch · N, (batch+1) · N)
//     → ImageBatcher → forward (masked by the true class)
//     → margin + lam_recon · MSE → backward → Adam step
//
// Learning rate follows  lr_e = lr · lr_decay^e.
//
// Full state on disk (stem = model-epoch-NN-node-ID):
//   <stem>.mpk        model record
//   <stem>-optim.mpk  Adam moments + step counts
//   <stem>.json       LaneCapsNetConfig
// NamedMpkFileRecorder<FullPrecisionSettings> keeps f32 values
// bit-exact, so a restored run continues the same trajectory.
//
// Key Burn insight:
//   - Training runs on B (Autodiff<..>) for gradients
//   - model.valid() returns the model on B::InnerBackend
//   - Validation batcher must also use B::InnerBackend
//
// Reference: Burn Book §5, Kingma & Ba (2015) Adam

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    optim::{adaptor::OptimizerAdaptor, Adam, AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};

use crate::data::{
    batcher::ImageBatcher,
    dataset::{ImageDataset, ImageSample},
    sharding::epoch_order,
};
use crate::domain::{
    error::CheckpointError,
    traits::{StepOutput, TrainableModel, ValidationMetrics},
};
use crate::ml::{
    loss::{correct_predictions, total_loss},
    model::{LaneCapsNet, LaneCapsNetConfig},
};

pub type AdamOptim<B> = OptimizerAdaptor<Adam, LaneCapsNet<B>, B>;
pub type Recorder32 = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Optimisation hyperparameters that are not part of the architecture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainerSettings {
    pub batch_size: usize,
    pub lr:         f64,
    pub lr_decay:   f64,
    pub lam_recon:  f64,
    pub seed:       u64,
}

impl TrainerSettings {
    pub fn learning_rate(&self, epoch: usize) -> f64 {
        self.lr * self.lr_decay.powi(epoch as i32)
    }
}

/// Path of the optimiser record belonging to `stem` (the recorder adds `.mpk`).
fn optim_path(stem: &Path) -> PathBuf {
    PathBuf::from(format!("{}-optim", stem.display()))
}

pub struct LaneCapsTrainer<B: AutodiffBackend> {
    config:   LaneCapsNetConfig,
    model:    LaneCapsNet<B>,
    optim:    AdamOptim<B>,
    settings: TrainerSettings,
    train:    ImageDataset,
    test:     Option<ImageDataset>,
    device:   B::Device,
    /// Shuffled visiting order of the current epoch.
    order:    Option<(usize, Vec<usize>)>,
}

impl<B: AutodiffBackend> LaneCapsTrainer<B> {
    pub fn new(
        config:   LaneCapsNetConfig,
        settings: TrainerSettings,
        train:    ImageDataset,
        test:     Option<ImageDataset>,
        device:   B::Device,
    ) -> Result<Self> {
        if settings.batch_size == 0 {
            anyhow::bail!("batch size must be positive");
        }
        let model = config.init::<B>(&device)?;
        tracing::info!(
            "Model ready: {} lanes of size {} (depth {}), {} routing iteration(s)",
            config.num_lanes,
            config.lane_size,
            config.lane_depth,
            config.routings
        );

        // m = β1*m + (1-β1)*g        (mean)
        // v = β2*v + (1-β2)*g²       (variance)
        // θ = θ - lr * m / (√v + ε)  (update)
        let optim: AdamOptim<B> = AdamConfig::new().with_epsilon(1e-7).init();

        Ok(Self { config, model, optim, settings, train, test, device, order: None })
    }

    fn ensure_order(&mut self, epoch: usize) {
        if self.order.as_ref().map(|(e, _)| *e) != Some(epoch) {
            let order = epoch_order(self.train.samples().len(), self.settings.seed, epoch);
            self.order = Some((epoch, order));
        }
    }
}

/// Loss and accuracy of `model` over `dataset`, without gradients.
pub fn evaluate_dataset<B: Backend>(
    model:      &LaneCapsNet<B>,
    dataset:    &ImageDataset,
    batch_size: usize,
    lam_recon:  f64,
    device:     &B::Device,
) -> Option<ValidationMetrics> {
    let batcher = ImageBatcher::<B>::new(device.clone(), dataset.shape(), dataset.num_classes());

    let mut loss_sum = 0.0f64;
    let mut correct = 0usize;
    let mut total = 0usize;

    for chunk in dataset.samples().chunks(batch_size.max(1)) {
        let batch = batcher.batch(chunk.to_vec());
        let output = model.forward(batch.images.clone(), None, false);

        correct += correct_predictions(output.lengths.clone(), batch.labels);
        let loss = total_loss(output.lengths, batch.targets, batch.images, output.reconstruction, lam_recon);
        loss_sum += loss.into_scalar().elem::<f64>() * chunk.len() as f64;
        total += chunk.len();
    }

    (total > 0).then(|| ValidationMetrics {
        loss:     loss_sum / total as f64,
        accuracy: correct as f64 / total as f64,
    })
}

impl<B: AutodiffBackend> TrainableModel for LaneCapsTrainer<B> {
    fn batches_per_epoch(&self, _epoch: usize) -> usize {
        self.train.samples().len().div_ceil(self.settings.batch_size)
    }

    fn train_batch(&mut self, epoch: usize, batch: usize) -> Result<StepOutput> {
        self.ensure_order(epoch);
        let items: Vec<ImageSample> = {
            let order = self.order.as_ref().map(|(_, o)| o.as_slice()).unwrap_or_default();
            let start = (batch * self.settings.batch_size).min(order.len());
            let end = (start + self.settings.batch_size).min(order.len());
            order[start..end].iter().map(|&i| self.train.samples()[i].clone()).collect()
        };
        if items.is_empty() {
            return Err(anyhow!("batch {batch} of epoch {epoch} is past the end of the shard"));
        }
        let n = items.len();

        let batcher = ImageBatcher::<B>::new(self.device.clone(), self.train.shape(), self.train.num_classes());
        let batch = batcher.batch(items);

        let output = self.model.forward(batch.images.clone(), Some(batch.targets.clone()), true);
        let correct = correct_predictions(output.lengths.clone(), batch.labels);
        let loss = total_loss(
            output.lengths,
            batch.targets,
            batch.images,
            output.reconstruction,
            self.settings.lam_recon,
        );
        let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();

        // Backward pass + Adam update
        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        let lr = self.settings.learning_rate(epoch);
        self.model = self.optim.step(lr, self.model.clone(), grads);

        Ok(StepOutput { loss: loss_val, accuracy: correct as f64 / n as f64, samples: n })
    }

    fn validate(&mut self) -> Result<Option<ValidationMetrics>> {
        let Some(test) = self.test.as_ref() else {
            return Ok(None);
        };
        // model.valid() → LaneCapsNet<B::InnerBackend>, no autodiff graph
        let model_valid = self.model.valid();
        Ok(evaluate_dataset(
            &model_valid,
            test,
            self.settings.batch_size,
            self.settings.lam_recon,
            &self.device,
        ))
    }

    fn save_state(&self, stem: &Path) -> Result<()> {
        let recorder = Recorder32::new();
        self.model
            .clone()
            .save_file(stem.to_path_buf(), &recorder)
            .map_err(|e| anyhow!("Cannot write model record '{}': {e:?}", stem.display()))?;
        Recorder::<B>::record(&recorder, self.optim.to_record(), optim_path(stem))
            .map_err(|e| anyhow!("Cannot write optimiser record '{}': {e:?}", stem.display()))?;
        self.config
            .save(stem.with_extension("json"))
            .with_context(|| format!("Cannot write architecture '{}.json'", stem.display()))?;
        Ok(())
    }

    fn load_state(&mut self, stem: &Path) -> Result<()> {
        let saved = LaneCapsNetConfig::load(stem.with_extension("json"))
            .map_err(|e| anyhow!("Cannot read architecture '{}.json': {e:?}", stem.display()))?;
        if !saved.same_architecture(&self.config) {
            return Err(CheckpointError::Architecture(stem.to_path_buf()).into());
        }

        let recorder = Recorder32::new();
        self.model = self
            .model
            .clone()
            .load_file(stem.to_path_buf(), &recorder, &self.device)
            .map_err(|e| anyhow!("Cannot read model record '{}': {e:?}", stem.display()))?;
        let record = Recorder::<B>::load(&recorder, optim_path(stem), &self.device)
            .map_err(|e| anyhow!("Cannot read optimiser record '{}': {e:?}", stem.display()))?;
        self.optim = self.optim.clone().load_record(record);
        self.order = None;
        Ok(())
    }

    fn export_weights(&self, stem: &Path) -> Result<()> {
        self.model
            .clone()
            .save_file(stem.to_path_buf(), &Recorder32::new())
            .map_err(|e| anyhow!("Cannot export weights '{}': {e:?}", stem.display()))?;
        self.config
            .save(stem.with_extension("json"))
            .with_context(|| format!("Cannot write architecture '{}.json'", stem.display()))?;
        tracing::info!("Exported trained weights to '{}.mpk'", stem.display());
        Ok(())
    }
}
