// ============================================================
// Layer 1 — CLI / Presentation Layer
// ============================================================
// The entry point for all user interaction. Uses `clap` to parse
// arguments; all work is delegated to Layer 2 (application).
//
// Two commands are supported:
//   1. `train`    — runs this node's share of a training job
//   2. `evaluate` — scores exported weights on the test split
//
// Reference: Rust Book §7 (Modules), §12 (CLI programs)

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, EvaluateArgs, TrainArgs};

use crate::training::loop_runner::RunOutcome;

#[derive(Parser, Debug)]
#[command(
    name = "lanecaps",
    version,
    about = "Train a multi-lane capsule network across worker nodes until iteration timing stabilises."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case. Only routes, never computes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)    => Self::run_train(args),
            Commands::Evaluate(args) => Self::run_evaluate(args),
        }
    }

    fn run_train(args: TrainArgs) -> Result<()> {
        use crate::application::train_use_case::TrainUseCase;

        tracing::info!("Training on {:?} from '{}'", args.dataset, args.data_dir.display());
        let report = TrainUseCase::new(args.into()).execute()?;

        match &report.outcome {
            RunOutcome::Completed { epochs } => {
                println!("Node {}: completed {} epoch(s).", report.node_id, epochs);
            }
            RunOutcome::Stopped { record: Some(r) } => {
                println!(
                    "Node {}: timing converged at epoch {}, iteration {} (mean {:.6}s, stddev {:.6}s).",
                    report.node_id, r.last_epoch, r.last_iteration, r.mean, r.stddev
                );
            }
            RunOutcome::Stopped { record: None } => {
                println!("Node {}: stopped early.", report.node_id);
            }
        }
        if let Some(path) = &report.exported {
            println!("Trained weights saved to {}", path.display());
        }
        Ok(())
    }

    fn run_evaluate(args: EvaluateArgs) -> Result<()> {
        use crate::application::evaluate_use_case::EvaluateUseCase;

        let metrics = EvaluateUseCase::new(args.into()).execute()?;
        println!("Test loss: {:.6}", metrics.loss);
        println!("Test accuracy: {:.4}", metrics.accuracy);
        Ok(())
    }
}
