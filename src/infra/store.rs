// ============================================================
// Layer 6 — Filesystem Result Store
// ============================================================
// Backs the CoordinationStore trait with a plain directory
// (result/ by default) that every node can see, either because
// it is on a shared filesystem or because peers copy files into
// it with a Transport.
//
//   result/
//     metrics-0.json   ← leader's convergence record
//     metrics-1.json   ← follower 1
//     timing-1.csv     ← follower 1 iteration timings
//     ...
//
// Writes go to a hidden temp file first and are renamed into
// place, so a polling reader never sees half a record.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::domain::{
    convergence::ConvergenceRecord,
    error::CoordinationError,
    traits::CoordinationStore,
};

/// Result store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    dir: PathBuf,
}

impl FsStore {
    /// Open (and create if needed) the store directory.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CoordinationError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CoordinationError::Store(dir.clone(), e))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CoordinationStore for FsStore {
    fn put(&self, key: &str, record: &ConvergenceRecord) -> Result<(), CoordinationError> {
        let path = self.dir.join(key);
        let tmp = self.dir.join(format!(".{key}.tmp"));

        let json = record
            .to_json()
            .map_err(|e| CoordinationError::Record(key.to_string(), e.into()))?;
        fs::write(&tmp, json).map_err(|e| CoordinationError::Store(tmp.clone(), e))?;
        fs::rename(&tmp, &path).map_err(|e| CoordinationError::Store(path.clone(), e))?;

        tracing::debug!("Wrote {}", path.display());
        Ok(())
    }

    fn has(&self, key: &str) -> bool {
        self.dir.join(key).is_file()
    }

    fn get(&self, key: &str) -> Result<Option<ConvergenceRecord>, CoordinationError> {
        let path = self.dir.join(key);
        if !path.is_file() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path).map_err(|e| CoordinationError::Store(path, e))?;
        ConvergenceRecord::from_json(&json)
            .map(Some)
            .map_err(|e| CoordinationError::Record(key.to_string(), e))
    }

    fn remove(&self, key: &str) -> Result<(), CoordinationError> {
        let path = self.dir.join(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoordinationError::Store(path, e)),
        }
    }

    fn local_path(&self, key: &str) -> Option<PathBuf> {
        Some(self.dir.join(key))
    }
}
