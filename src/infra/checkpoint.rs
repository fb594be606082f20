// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves the FULL training state at the end of every epoch and
// works out where a restarted run should pick up.
//
// File naming convention (one group per node and epoch):
//   checkpoints/
//     model-epoch-01-node-0.mpk        ← weights
//     model-epoch-01-node-0-optim.mpk  ← optimiser state
//     model-epoch-01-node-0.json       ← architecture
//     model-epoch-02-node-0.*
//     ...
//     train_config.json                ← run hyperparameters
//     trained_model.mpk                ← weights-only export
//
// The number in the name is 1-based (epoch index + 1). Resuming
// from `model-epoch-NN-...` starts the loop at epoch index NN - 1.
// Any member of a group may be passed as the resume path; the
// manager strips it back to the shared stem before loading.
//
// Checkpoints are never deleted by this program.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::domain::{error::CheckpointError, traits::TrainableModel};

/// Suffixes a checkpoint group member may carry after its stem.
const GROUP_SUFFIXES: [&str; 3] = ["-optim.mpk", ".mpk", ".json"];

/// Epoch and node encoded in a checkpoint file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointName {
    /// The 1-based number in `epoch-NN`.
    pub epoch_number: usize,
    pub node_id: Option<usize>,
}

impl CheckpointName {
    /// Parse `...epoch-<digits>...[node-<digits>]...` out of the file name.
    pub fn parse(path: &Path) -> Result<Self, CheckpointError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let epoch_number = digits_after(&name, "epoch-")
            .ok_or_else(|| CheckpointError::UnrecognisedName(path.to_path_buf()))?;
        if epoch_number == 0 {
            return Err(CheckpointError::EpochZero(path.to_path_buf()));
        }

        Ok(Self { epoch_number, node_id: digits_after(&name, "node-") })
    }

    /// Epoch index the training loop should start from.
    pub fn initial_epoch(&self) -> usize {
        self.epoch_number - 1
    }
}

/// Parse the run of ASCII digits directly following `token`.
fn digits_after(name: &str, token: &str) -> Option<usize> {
    let start = name.find(token)? + token.len();
    let digits: String = name[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Stem of the checkpoint written after 0-based `epoch` on `node_id`.
pub fn checkpoint_stem(epoch: usize, node_id: usize) -> String {
    format!("model-epoch-{:02}-node-{}", epoch + 1, node_id)
}

/// Strip a known group suffix so any member maps to the shared stem.
fn group_stem(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    for suffix in GROUP_SUFFIXES {
        if let Some(stem) = name.strip_suffix(suffix) {
            return path.with_file_name(stem);
        }
    }
    path.to_path_buf()
}

/// Manages checkpoint files in one directory.
#[derive(Clone, Debug)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create a manager, creating the directory (`mkdir -p`) if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create checkpoint dir '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stem path for (epoch, node).
    pub fn stem_path(&self, epoch: usize, node_id: usize) -> PathBuf {
        self.dir.join(checkpoint_stem(epoch, node_id))
    }

    /// Stem of the weights-only artifact written after training.
    pub fn export_stem(&self) -> PathBuf {
        self.dir.join("trained_model")
    }

    /// Persist the full state of `model` after 0-based `epoch`.
    /// Blocks until the files are written.
    pub fn save<M: TrainableModel>(&self, epoch: usize, node_id: usize, model: &M) -> Result<PathBuf> {
        let stem = self.stem_path(epoch, node_id);
        model
            .save_state(&stem)
            .with_context(|| format!("Failed to save checkpoint '{}'", stem.display()))?;
        tracing::debug!("Saved checkpoint {}", stem.display());
        Ok(stem)
    }

    /// Restore `model` from `path` and return the epoch index to resume at.
    pub fn resume<M: TrainableModel>(&self, path: &Path, node_id: usize, model: &mut M) -> Result<usize> {
        let name = CheckpointName::parse(path)?;
        if let Some(found) = name.node_id.filter(|&found| found != node_id) {
            tracing::warn!(
                "Resuming node {} from a checkpoint written by node {}",
                node_id,
                found
            );
        }

        let stem = group_stem(path);
        model
            .load_state(&stem)
            .with_context(|| format!("Cannot restore checkpoint '{}'", stem.display()))?;

        let initial_epoch = name.initial_epoch();
        tracing::info!(
            "Restored '{}', resuming at epoch index {}",
            stem.display(),
            initial_epoch
        );
        Ok(initial_epoch)
    }

    /// Newest checkpoint (by epoch number) written by `node_id`, as a stem path.
    pub fn latest_for_node(&self, node_id: usize) -> Result<Option<PathBuf>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Cannot list '{}'", self.dir.display()))?;

        let latest = entries
            .filter_map(std::result::Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().starts_with("model-epoch-"))
                    .unwrap_or(false)
            })
            .filter_map(|p| {
                let name = CheckpointName::parse(&p).ok()?;
                (name.node_id == Some(node_id)).then(|| (name.epoch_number, group_stem(&p)))
            })
            .max_by_key(|(epoch, _)| *epoch)
            .map(|(_, stem)| stem);

        Ok(latest)
    }

    /// Save the run configuration as JSON so `evaluate` can rebuild the model.
    pub fn save_config<T: Serialize>(&self, cfg: &T) -> Result<()> {
        let path = self.dir.join("train_config.json");
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }

    /// Load the run configuration written by `save_config`.
    pub fn load_config<T: DeserializeOwned>(&self) -> Result<T> {
        let path = self.dir.join("train_config.json");
        let json = fs::read_to_string(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. Make sure you have run 'train' first.",
                path.display()
            )
        })?;
        Ok(serde_json::from_str(&json)?)
    }
}
