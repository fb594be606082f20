// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The coordination core only ever talks to these seams:
//
//   TrainableModel     — an opaque model that can run one batch
//                        and persist/restore its full state
//                        (LaneCapsTrainer in ml/, a fake in tests)
//   CoordinationStore  — put/has/get/remove of convergence records
//                        (FsStore over the shared result/ dir)
//   Transport          — one-way file copy to/from a peer host
//                        (ScpTransport, SharedFsTransport)
//
// Reference: Rust Book §10 (Traits: Defining Shared Behaviour)

use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::domain::{
    cluster::WorkerAddress,
    convergence::ConvergenceRecord,
    error::{CoordinationError, TransportError},
};

/// What one optimisation step reports back to the training loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    pub loss: f64,
    pub accuracy: f64,
    /// Samples processed in this batch (for throughput logging).
    pub samples: usize,
}

/// Held-out metrics computed at the end of an epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationMetrics {
    pub loss: f64,
    pub accuracy: f64,
}

// ─── TrainableModel ───────────────────────────────────────────────────────────
/// A model the training loop can drive without knowing what it is.
///
/// Full state (architecture, weights, optimiser) must be restorable
/// as a unit through `save_state`/`load_state`. `export_weights` is
/// the weights-only artifact written once training finishes.
pub trait TrainableModel {
    /// Number of batches this node runs in `epoch`.
    fn batches_per_epoch(&self, epoch: usize) -> usize;

    /// Run forward + backward + optimiser update for one batch.
    fn train_batch(&mut self, epoch: usize, batch: usize) -> Result<StepOutput>;

    /// Evaluate on held-out data, if the model has any.
    fn validate(&mut self) -> Result<Option<ValidationMetrics>> {
        Ok(None)
    }

    /// Persist the full training state under `stem` (extensions are
    /// chosen by the implementation).
    fn save_state(&self, stem: &Path) -> Result<()>;

    /// Restore the full training state previously written under `stem`.
    fn load_state(&mut self, stem: &Path) -> Result<()>;

    /// Write the weights-only artifact under `stem`.
    fn export_weights(&self, stem: &Path) -> Result<()>;
}

// ─── CoordinationStore ────────────────────────────────────────────────────────
/// Shared key → record store used as the only cross-node channel.
///
/// Each node writes only its own key, so no locking is needed.
pub trait CoordinationStore {
    fn put(&self, key: &str, record: &ConvergenceRecord) -> Result<(), CoordinationError>;

    fn has(&self, key: &str) -> bool;

    fn get(&self, key: &str) -> Result<Option<ConvergenceRecord>, CoordinationError>;

    /// Delete `key`; a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), CoordinationError>;

    /// Local file backing `key`, for stores that live on a filesystem
    /// and therefore need a `Transport` to reach other hosts.
    fn local_path(&self, _key: &str) -> Option<PathBuf> {
        None
    }
}

// ─── Transport ────────────────────────────────────────────────────────────────
/// One attempt at copying a file between this node and a peer.
/// Retrying is the caller's job (see `infra::transport::RetryPolicy`).
pub trait Transport {
    /// Copy a local file into `remote_dir` on `peer`.
    fn send(&self, local: &Path, peer: &WorkerAddress, remote_dir: &Path)
        -> Result<(), TransportError>;

    /// Copy `remote` from `peer` into the local directory `local_dir`.
    fn fetch(&self, peer: &WorkerAddress, remote: &Path, local_dir: &Path)
        -> Result<(), TransportError>;
}
