// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `evaluate`, and all
// their flags.
//
// clap's derive macros automatically generate:
//   - help text (--help)
//   - error messages for bad or missing args (exit code 2)
//   - type conversion (string → usize, f64, enums, paths)
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::application::{evaluate_use_case::EvaluateConfig, train_use_case::TrainConfig};
use crate::data::dataset::DatasetKind;
use crate::infra::transport::TransportKind;
use crate::training::timing::DEFAULT_WINDOW;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train this node's share of a (possibly distributed) run
    Train(TrainArgs),

    /// Score trained weights on the test split
    Evaluate(EvaluateArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(long, default_value_t = 2)]
    pub epochs: usize,

    /// Samples per batch on this node
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    /// Initial learning rate
    #[arg(long, default_value_t = 0.001)]
    pub lr: f64,

    /// Multiplied into the learning rate once per epoch
    #[arg(long, default_value_t = 0.9)]
    pub lr_decay: f64,

    /// Weight of the reconstruction loss
    #[arg(long, default_value_t = 0.392)]
    pub lam_recon: f64,

    /// Dynamic routing iterations (must be > 0)
    #[arg(short = 'r', long, default_value_t = 3)]
    pub routings: usize,

    /// Probability of dropping a whole lane per batch
    #[arg(long, default_value_t = 0.0)]
    pub dropout: f64,

    #[arg(long, default_value_t = 16)]
    pub num_lanes: usize,

    /// Width of each lane (conv filters = 16 × size)
    #[arg(long, default_value_t = 8)]
    pub lane_size: usize,

    /// Conv + primary capsule stages per lane
    #[arg(long, default_value_t = 1)]
    pub lane_depth: usize,

    /// 0 trains on the CPU; anything else uses one WGPU device
    #[arg(long, default_value_t = 0)]
    pub gpus: usize,

    #[arg(long, value_enum, default_value_t = DatasetKind::Mnist)]
    pub dataset: DatasetKind,

    /// Directory holding the dataset files
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Checkpoints, log.csv, train_config.json and the exported weights
    #[arg(long, default_value = "result")]
    pub save_dir: PathBuf,

    /// Shared convergence records and timing artifacts
    #[arg(long, default_value = "result")]
    pub result_dir: PathBuf,

    /// Resume from this checkpoint (any file of the group)
    #[arg(long, conflicts_with = "auto_resume")]
    pub resume: Option<PathBuf>,

    /// Resume from this node's newest checkpoint in --save-dir, if any
    #[arg(long)]
    pub auto_resume: bool,

    /// Cluster descriptor file (otherwise $TF_CONFIG)
    #[arg(long)]
    pub cluster_config: Option<PathBuf>,

    /// Run as a single-node cluster when no descriptor is found
    #[arg(long)]
    pub standalone: bool,

    #[arg(long, value_enum, default_value_t = TransportKind::SharedFs)]
    pub transport: TransportKind,

    /// Result directory on the leader host (defaults to --result-dir)
    #[arg(long)]
    pub remote_result_dir: Option<PathBuf>,

    /// Identifier shared by every node of this launch; records of
    /// other runs left in the result dir are then ignored
    #[arg(long)]
    pub run_id: Option<String>,

    /// Iteration timings kept for the stability statistics
    #[arg(long, default_value_t = DEFAULT_WINDOW)]
    pub timing_window: usize,

    /// Attempts per remote copy, including the first
    #[arg(long, default_value_t = 30)]
    pub retry_attempts: u32,

    #[arg(long, default_value_t = 2000)]
    pub retry_backoff_ms: u64,

    /// Give up on a remote copy after this long
    #[arg(long, default_value_t = 300)]
    pub retry_deadline_secs: u64,

    /// Seeds shuffling, synthetic data and nothing else
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            epochs:              a.epochs,
            batch_size:          a.batch_size,
            lr:                  a.lr,
            lr_decay:            a.lr_decay,
            lam_recon:           a.lam_recon,
            routings:            a.routings,
            dropout:             a.dropout,
            num_lanes:           a.num_lanes,
            lane_size:           a.lane_size,
            lane_depth:          a.lane_depth,
            gpus:                a.gpus,
            dataset:             a.dataset,
            data_dir:            a.data_dir,
            save_dir:            a.save_dir,
            result_dir:          a.result_dir,
            resume:              a.resume,
            auto_resume:         a.auto_resume,
            cluster_config:      a.cluster_config,
            standalone:          a.standalone,
            transport:           a.transport,
            remote_result_dir:   a.remote_result_dir,
            run_id:              a.run_id,
            timing_window:       a.timing_window,
            retry_attempts:      a.retry_attempts,
            retry_backoff_ms:    a.retry_backoff_ms,
            retry_deadline_secs: a.retry_deadline_secs,
            seed:                a.seed,
        }
    }
}

/// All arguments for the `evaluate` command
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Directory the training run saved into
    #[arg(long, default_value = "result")]
    pub save_dir: PathBuf,

    /// Weights to score (defaults to <save-dir>/trained_model.mpk)
    #[arg(short = 'w', long)]
    pub weights: Option<PathBuf>,

    /// Override the dataset recorded in train_config.json
    #[arg(long, value_enum)]
    pub dataset: Option<DatasetKind>,

    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 100)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 0)]
    pub gpus: usize,
}

impl From<EvaluateArgs> for EvaluateConfig {
    fn from(a: EvaluateArgs) -> Self {
        EvaluateConfig {
            save_dir:   a.save_dir,
            weights:    a.weights,
            dataset:    a.dataset,
            data_dir:   a.data_dir,
            batch_size: a.batch_size,
            gpus:       a.gpus,
        }
    }
}
