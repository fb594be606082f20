// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates one node's share of a distributed training run:
//
//   Step 1: Resolve the cluster descriptor      (Layer 3 - domain)
//   Step 2: Load the dataset, take this shard   (Layer 4 - data)
//   Step 3: Save train_config.json (leader)     (Layer 6 - infra)
//   Step 4: Pick the backend from --gpus        (Layer 5 - ml)
//   Step 5: Build the model, restore a resume   (Layer 5/6)
//   Step 6: Assemble the hooks                  (Layer 5 - training)
//   Step 7: Run the loop until done or stopped  (Layer 5 - training)
//   Step 8: Export trained weights (leader)     (Layer 5 - ml)
//
// Reference: Rust Book §13 (Iterators and Closures)
//            Burn Book §5 (Training)

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use burn::{
    backend::{ndarray::NdArrayDevice, wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::data::{
    dataset::DatasetKind,
    loader::{load_dataset, DataSplits},
    sharding::shard_for_worker,
};
use crate::domain::{
    cluster::ClusterConfig,
    convergence::timing_artifact_name,
    traits::{CoordinationStore, TrainableModel, Transport},
};
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{MetricsLogger, TimingLog},
    store::FsStore,
    transport::{RetryPolicy, ScpTransport, SharedFsTransport, TransportKind},
};
use crate::ml::{
    model::LaneCapsNetConfig,
    trainer::{LaneCapsTrainer, TrainerSettings},
};
use crate::training::{
    convergence::ConvergenceMonitor,
    coordinator::NodeCoordinator,
    hooks::{CheckpointHook, EpochLogHook, TrainingHooks},
    loop_runner::{RunOutcome, TrainingLoop},
    state::TrainingState,
    timing::DEFAULT_WINDOW,
};

// ─── Training Configuration ──────────────────────────────────────────────────
// All settings for one node's run. Serialisable so `evaluate`
// can rebuild the dataset and loss settings from train_config.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub epochs:              usize,
    pub batch_size:          usize,
    pub lr:                  f64,
    pub lr_decay:            f64,
    pub lam_recon:           f64,
    pub routings:            usize,
    pub dropout:             f64,
    pub num_lanes:           usize,
    pub lane_size:           usize,
    pub lane_depth:          usize,
    pub gpus:                usize,
    pub dataset:             DatasetKind,
    pub data_dir:            PathBuf,
    pub save_dir:            PathBuf,
    pub result_dir:          PathBuf,
    pub resume:              Option<PathBuf>,
    pub auto_resume:         bool,
    pub cluster_config:      Option<PathBuf>,
    pub standalone:          bool,
    pub transport:           TransportKind,
    pub remote_result_dir:   Option<PathBuf>,
    pub run_id:              Option<String>,
    pub timing_window:       usize,
    pub retry_attempts:      u32,
    pub retry_backoff_ms:    u64,
    pub retry_deadline_secs: u64,
    pub seed:                u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs:              2,
            batch_size:          32,
            lr:                  0.001,
            lr_decay:            0.9,
            lam_recon:           0.392,
            routings:            3,
            dropout:             0.0,
            num_lanes:           16,
            lane_size:           8,
            lane_depth:          1,
            gpus:                0,
            dataset:             DatasetKind::Mnist,
            data_dir:            PathBuf::from("data"),
            save_dir:            PathBuf::from("result"),
            result_dir:          PathBuf::from("result"),
            resume:              None,
            auto_resume:         false,
            cluster_config:      None,
            standalone:          false,
            transport:           TransportKind::SharedFs,
            remote_result_dir:   None,
            run_id:              None,
            timing_window:       DEFAULT_WINDOW,
            retry_attempts:      30,
            retry_backoff_ms:    2000,
            retry_deadline_secs: 300,
            seed:                42,
        }
    }
}

impl TrainConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts.max(1),
            backoff:      Duration::from_millis(self.retry_backoff_ms),
            deadline:     Duration::from_secs(self.retry_deadline_secs),
        }
    }

    pub fn settings(&self) -> TrainerSettings {
        TrainerSettings {
            batch_size: self.batch_size,
            lr:         self.lr,
            lr_decay:   self.lr_decay,
            lam_recon:  self.lam_recon,
            seed:       self.seed,
        }
    }

    /// Architecture for images of the given dataset.
    pub fn model_config(&self, data: &DataSplits) -> LaneCapsNetConfig {
        let shape = data.train.shape();
        LaneCapsNetConfig::new(shape.channels, shape.height, shape.width, data.train.num_classes())
            .with_num_lanes(self.num_lanes)
            .with_lane_size(self.lane_size)
            .with_lane_depth(self.lane_depth)
            .with_routings(self.routings)
            .with_dropout(self.dropout)
    }

    /// Directory on the leader host that followers deliver into.
    fn remote_result_dir(&self) -> &Path {
        self.remote_result_dir.as_deref().unwrap_or(&self.result_dir)
    }
}

/// What a finished node reports back to the CLI.
#[derive(Debug, Clone)]
pub struct TrainReport {
    pub node_id:  usize,
    pub outcome:  RunOutcome,
    /// Weights-only export, written by the leader.
    pub exported: Option<PathBuf>,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self) -> Result<TrainReport> {
        let cfg = &self.config;

        // ── Step 1: Cluster ───────────────────────────────────────────────────
        let cluster = ClusterConfig::resolve(cfg.cluster_config.as_deref(), cfg.standalone)?;
        tracing::info!(
            "Node {} of {} ({})",
            cluster.node_index(),
            cluster.num_workers(),
            if cluster.is_leader() { "leader" } else { "follower" }
        );

        // ── Step 2: Data ──────────────────────────────────────────────────────
        // Every node loads the same files with the same seed, then keeps
        // its own slice of the training split.
        let data = load_dataset(cfg.dataset, &cfg.data_dir, cfg.seed)?;
        let data = DataSplits {
            train: shard_for_worker(data.train, cluster.num_workers(), cluster.node_index()),
            test:  data.test,
        };
        if data.train.samples().is_empty() {
            anyhow::bail!("node {} received no training samples", cluster.node_index());
        }

        // ── Step 3: Run configuration ─────────────────────────────────────────
        let ckpt = CheckpointManager::new(&cfg.save_dir)?;
        if cluster.is_leader() {
            ckpt.save_config(cfg)?;
        }

        // ── Step 4: Backend ───────────────────────────────────────────────────
        if cfg.gpus == 0 {
            tracing::info!("Using NdArray (CPU) backend");
            self.run_on::<Autodiff<NdArray>>(cluster, data, ckpt, NdArrayDevice::default())
        } else {
            if cfg.gpus > 1 {
                tracing::warn!("{} GPUs requested; this node trains on a single device", cfg.gpus);
            }
            let device = WgpuDevice::default();
            tracing::info!("Using WGPU device: {:?}", device);
            self.run_on::<Autodiff<Wgpu>>(cluster, data, ckpt, device)
        }
    }

    fn run_on<B: AutodiffBackend>(
        &self,
        cluster: ClusterConfig,
        data:    DataSplits,
        ckpt:    CheckpointManager,
        device:  B::Device,
    ) -> Result<TrainReport> {
        let cfg = &self.config;
        let node_id = cluster.node_index();
        let is_leader = cluster.is_leader();

        // ── Step 5: Model + resume ────────────────────────────────────────────
        let model_cfg = cfg.model_config(&data);
        let test = (!data.test.samples().is_empty()).then_some(data.test);
        let mut trainer = LaneCapsTrainer::<B>::new(model_cfg, cfg.settings(), data.train, test, device)?;

        let resume_from = match (&cfg.resume, cfg.auto_resume) {
            (Some(path), _) => Some(path.clone()),
            (None, true) => {
                let latest = ckpt.latest_for_node(node_id)?;
                if latest.is_none() {
                    tracing::info!("No checkpoint of node {} found, starting fresh", node_id);
                }
                latest
            }
            (None, false) => None,
        };
        let initial_epoch = match resume_from {
            Some(path) => ckpt.resume(&path, node_id, &mut trainer)?,
            None => 0,
        };

        // ── Step 6: Hooks ─────────────────────────────────────────────────────
        let store = FsStore::new(&cfg.result_dir)?;
        let timing_log = TimingLog::new(cfg.result_dir.join(timing_artifact_name(node_id)))?;
        let monitor: Box<dyn TrainingHooks<LaneCapsTrainer<B>>> = match cfg.transport {
            TransportKind::SharedFs => {
                Box::new(self.monitor(cluster, store, SharedFsTransport).with_timing_log(timing_log))
            }
            TransportKind::Scp => {
                Box::new(self.monitor(cluster, store, ScpTransport::default()).with_timing_log(timing_log))
            }
        };
        let mut hooks: Vec<Box<dyn TrainingHooks<LaneCapsTrainer<B>>>> = vec![
            Box::new(EpochLogHook::new(MetricsLogger::new(&cfg.save_dir)?)),
            Box::new(CheckpointHook::new(ckpt.clone())),
            monitor,
        ];

        // ── Step 7: Train ─────────────────────────────────────────────────────
        let mut state = TrainingState::new(node_id, cfg.epochs, cfg.timing_window);
        let outcome = TrainingLoop::new()
            .starting_at(initial_epoch)
            .run(&mut trainer, &mut state, &mut hooks)
            .with_context(|| format!("Training failed on node {node_id}"))?;

        // ── Step 8: Export ────────────────────────────────────────────────────
        let exported = if is_leader {
            let stem = ckpt.export_stem();
            trainer.export_weights(&stem)?;
            Some(stem.with_extension("mpk"))
        } else {
            None
        };

        Ok(TrainReport { node_id, outcome, exported })
    }

    fn monitor<S: CoordinationStore, T: Transport>(
        &self,
        cluster:   ClusterConfig,
        store:     S,
        transport: T,
    ) -> ConvergenceMonitor<S, T> {
        let coordinator = NodeCoordinator::new(
            cluster,
            store,
            transport,
            self.config.retry_policy(),
            &self.config.result_dir,
            self.config.remote_result_dir(),
        )
        .with_run_id(self.config.run_id.clone());
        ConvergenceMonitor::new(coordinator)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    use crate::data::{dataset::ImageShape, synthetic::SyntheticSpec};

    #[test]
    fn test_default_config_matches_cli_defaults() {
        let cfg = TrainConfig::default();
        assert_eq!(cfg.epochs, 2);
        assert_eq!(cfg.batch_size, 32);
        assert_eq!(cfg.timing_window, 100);
        assert_eq!(cfg.transport, TransportKind::SharedFs);
    }

    #[test]
    fn test_retry_policy_from_flags() {
        let cfg = TrainConfig {
            retry_attempts: 0,
            retry_backoff_ms: 250,
            retry_deadline_secs: 9,
            ..TrainConfig::default()
        };
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.backoff, Duration::from_millis(250));
        assert_eq!(policy.deadline, Duration::from_secs(9));
    }

    #[test]
    fn test_remote_dir_defaults_to_result_dir() {
        let mut cfg = TrainConfig { result_dir: PathBuf::from("out"), ..TrainConfig::default() };
        assert_eq!(cfg.remote_result_dir(), Path::new("out"));
        cfg.remote_result_dir = Some(PathBuf::from("/shared/out"));
        assert_eq!(cfg.remote_result_dir(), Path::new("/shared/out"));
    }

    #[test]
    fn test_model_config_follows_dataset_shape() {
        let data = SyntheticSpec {
            shape:         ImageShape::new(3, 32, 32),
            num_classes:   10,
            train_samples: 2,
            test_samples:  0,
            noise:         0.0,
        }
        .generate(0);
        let cfg = TrainConfig { num_lanes: 4, lane_depth: 2, dropout: 0.25, ..TrainConfig::default() };

        let model = cfg.model_config(&data);
        assert_eq!((model.channels, model.height, model.width, model.num_classes), (3, 32, 32, 10));
        assert_eq!((model.num_lanes, model.lane_depth), (4, 2));
        assert!((model.dropout - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_train_config_round_trips_through_json() {
        let cfg = TrainConfig { dataset: DatasetKind::Cifar10, transport: TransportKind::Scp, ..TrainConfig::default() };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"cifar10\""));
        assert!(json.contains("\"scp\""));
        let back: TrainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.dataset, DatasetKind::Cifar10);
    }

    #[test]
    fn test_standalone_synthetic_run_trains_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            epochs:      1,
            batch_size:  64,
            num_lanes:   1,
            lane_size:   1,
            routings:    1,
            dataset:     DatasetKind::Synthetic,
            save_dir:    dir.path().join("save"),
            result_dir:  dir.path().join("result"),
            standalone:  true,
            ..TrainConfig::default()
        };

        let report = TrainUseCase::new(cfg).execute().unwrap();
        assert_eq!(report.node_id, 0);
        assert_eq!(report.outcome, RunOutcome::Completed { epochs: 1 });

        let save = dir.path().join("save");
        assert!(save.join("train_config.json").exists());
        assert!(save.join("log.csv").exists());
        assert!(save.join("model-epoch-01-node-0.mpk").exists());
        assert!(save.join("model-epoch-01-node-0-optim.mpk").exists());
        assert!(report.exported.unwrap().exists());
        assert!(dir.path().join("result").join("timing-0.csv").exists());
    }
}
