// ============================================================
// Layer 3 — Error Taxonomy
// ============================================================
// Each fatal category has its own enum so `main` can map the
// root cause of a failed run to a distinct process exit code:
//
//   ConfigError        → 3  (malformed / missing cluster config)
//   CheckpointError    → 4  (resume path unusable or incompatible)
//   CoordinationError  → 5  (retries exhausted, store failure)
//
// Anything else (I/O during training, recorder failures, ...)
// exits with 1. clap already uses 2 for usage errors.
//
// Degenerate statistics (stddev == 0) are NOT errors — the
// stability detector simply reports "no signal".

use std::path::PathBuf;

use thiserror::Error;

/// Exit code for a malformed or missing cluster descriptor.
pub const EXIT_CONFIG: u8 = 3;
/// Exit code for an unusable checkpoint path.
pub const EXIT_CHECKPOINT: u8 = 4;
/// Exit code for a coordination failure.
pub const EXIT_COORDINATION: u8 = 5;

/// The cluster descriptor is absent, unreadable or inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no cluster configuration supplied (pass --cluster-config, set {0}, or use --standalone)")]
    Missing(String),
    #[error("failed to read cluster configuration {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse cluster configuration: {0}")]
    Parse(String),
    #[error("cluster configuration lists no workers")]
    NoWorkers,
    #[error("task index {index} is out of range for {workers} worker(s)")]
    IndexOutOfRange { index: usize, workers: usize },
    #[error("worker address '{0}' is not of the form host:port")]
    BadAddress(String),
}

/// A checkpoint could not be named, written or restored.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint path {0} does not contain an 'epoch-<NN>' token")]
    UnrecognisedName(PathBuf),
    #[error("checkpoint {0} names epoch 0; saved epochs start at 01")]
    EpochZero(PathBuf),
    #[error("checkpoint {0} was written for a different network architecture")]
    Architecture(PathBuf),
}

/// A remote copy attempt failed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to launch '{0}': {1}")]
    Spawn(String, std::io::Error),
    #[error("'{command}' exited with {status}: {stderr}")]
    Status {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("local copy {0} -> {1} failed: {2}")]
    Copy(PathBuf, PathBuf, std::io::Error),
    #[error("source {0} does not exist")]
    MissingSource(PathBuf),
}

/// Cross-node signalling failed for good.
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("{what} failed after {attempts} attempt(s) in {elapsed_secs:.1}s: {last_error}")]
    TransferExhausted {
        what: String,
        attempts: u32,
        elapsed_secs: f64,
        last_error: String,
    },
    #[error("result store {0}: {1}")]
    Store(PathBuf, std::io::Error),
    #[error("result store entry {0} is not a valid metrics record")]
    Record(String, #[source] RecordError),
}

/// A metrics document could not be encoded or decoded.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid metrics JSON")]
    Json(#[from] serde_json::Error),
    #[error("metrics document has an empty 'node' array")]
    EmptyNodeList,
}

/// An illegal convergence state-machine transition was requested.
#[derive(Debug, Error)]
#[error("illegal convergence transition {from:?} -> {to:?}")]
pub struct PhaseError {
    pub from: crate::domain::convergence::NodePhase,
    pub to: crate::domain::convergence::NodePhase,
}

/// Map the root cause of a failed run to a process exit code.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if cause.is::<ConfigError>() {
            return EXIT_CONFIG;
        }
        if cause.is::<CheckpointError>() {
            return EXIT_CHECKPOINT;
        }
        if cause.is::<CoordinationError>() {
            return EXIT_COORDINATION;
        }
    }
    1
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_code_follows_root_cause() {
        let err = anyhow::Error::new(ConfigError::NoWorkers);
        assert_eq!(exit_code_for(&err), EXIT_CONFIG);

        // Context layers on top must not hide the category
        let wrapped: anyhow::Result<()> =
            Err(CheckpointError::UnrecognisedName(PathBuf::from("weights.mpk")).into());
        let err = wrapped.context("resume failed").unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_CHECKPOINT);
    }

    #[test]
    fn test_record_error_keeps_json_source() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = CoordinationError::Record("metrics-1.json".to_string(), json_err.into());
        let source = std::error::Error::source(&err).unwrap();
        assert!(matches!(source.downcast_ref::<RecordError>(), Some(RecordError::Json(_))));
        assert_eq!(exit_code_for(&anyhow::Error::new(err)), EXIT_COORDINATION);
    }

    #[test]
    fn test_unknown_errors_exit_with_one() {
        let err = anyhow::anyhow!("disk on fire");
        assert_eq!(exit_code_for(&err), 1);
    }
}
