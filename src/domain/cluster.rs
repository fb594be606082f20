// ============================================================
// Layer 3 — Cluster Descriptor
// ============================================================
// Every worker process is started with the same ordered list of
// worker addresses plus its own position in that list:
//
//   {
//     "cluster": { "worker": ["10.0.0.1:2222", "10.0.0.2:2222"] },
//     "task":    { "index": 1 }
//   }
//
// Index 0 is always the leader. The descriptor is read once at
// startup and never changes afterwards.

use std::{fmt, path::Path};

use serde::Deserialize;

use crate::domain::error::ConfigError;

/// Environment variable consulted when no descriptor file is given.
pub const CLUSTER_ENV_VAR: &str = "TF_CONFIG";

/// A worker's `host:port` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAddress {
    pub host: String,
    pub port: u16,
}

impl WorkerAddress {
    /// Parse `host:port`. The port is split off the right so that
    /// bracketed IPv6 hosts keep their inner colons.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let bad = || ConfigError::BadAddress(raw.to_string());
        let (host, port) = raw.trim().rsplit_once(':').ok_or_else(bad)?;
        if host.is_empty() {
            return Err(bad());
        }
        let port = port.parse::<u16>().map_err(|_| bad())?;
        Ok(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
        })
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    cluster: RawCluster,
    task: RawTask,
}

#[derive(Debug, Deserialize)]
struct RawCluster {
    worker: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawTask {
    index: usize,
}

/// The validated cluster layout as seen from this process.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    workers: Vec<WorkerAddress>,
    node_index: usize,
}

impl ClusterConfig {
    /// A one-worker cluster; this node is the leader and has no peers.
    pub fn standalone() -> Self {
        Self {
            workers: vec![WorkerAddress { host: "localhost".to_string(), port: 0 }],
            node_index: 0,
        }
    }

    /// Parse and validate a JSON descriptor.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: RawDescriptor =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;

        if raw.cluster.worker.is_empty() {
            return Err(ConfigError::NoWorkers);
        }
        let workers = raw
            .cluster
            .worker
            .iter()
            .map(|w| WorkerAddress::parse(w))
            .collect::<Result<Vec<_>, _>>()?;

        if raw.task.index >= workers.len() {
            return Err(ConfigError::IndexOutOfRange {
                index: raw.task.index,
                workers: workers.len(),
            });
        }

        Ok(Self { workers, node_index: raw.task.index })
    }

    /// Read a descriptor file from disk.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        Self::from_json(&json)
    }

    /// Resolve the descriptor: explicit file first, then the
    /// environment variable, then `--standalone`. Nothing at all is fatal.
    pub fn resolve(file: Option<&Path>, standalone: bool) -> Result<Self, ConfigError> {
        if let Some(path) = file {
            return Self::from_file(path);
        }
        match std::env::var(CLUSTER_ENV_VAR) {
            Ok(json) if !json.trim().is_empty() => Self::from_json(&json),
            _ if standalone => Ok(Self::standalone()),
            _ => Err(ConfigError::Missing(CLUSTER_ENV_VAR.to_string())),
        }
    }

    pub fn node_index(&self) -> usize {
        self.node_index
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    pub fn is_leader(&self) -> bool {
        self.node_index == 0
    }

    pub fn leader(&self) -> &WorkerAddress {
        &self.workers[0]
    }

    pub fn worker(&self, index: usize) -> Option<&WorkerAddress> {
        self.workers.get(index)
    }

    /// Node ids of every worker except the leader.
    pub fn follower_ids(&self) -> impl Iterator<Item = usize> {
        1..self.workers.len()
    }
}
