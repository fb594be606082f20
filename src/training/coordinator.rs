// ============================================================
// Layer 5 — Node Coordinator
// ============================================================
// Cross-node shutdown protocol. The shared result store is the
// only channel; there is no RPC between workers.
//
// Records are scoped to a run. A follower record only counts when
// its run_id matches the leader's (both absent also matches).
// Before the first batch every node deletes its own record; the
// leader also deletes follower records of other runs.
//
// Follower (node id > 0), once stabilised:
//   1. put metrics-<id>.json into the local store
//   2. send that file to the leader's result dir (bounded retry)
//   3. Reported → Stopped, training ends
//
// Leader (node id 0), on every analysis tick after stabilising:
//   1. check the store for a current metrics-<id>.json of EVERY
//      follower (its own file does not count); if any is missing, keep
//      training and check again on the next tick
//   2. pull each follower's timing-<id>.csv from its host
//   3. put its own metrics-0.json
//   4. Stabilized → Stopped, training ends
//
// A follower that cannot reach the leader within the retry
// policy fails the run with CoordinationError::TransferExhausted.
// A timing artifact the leader cannot pull is only logged: by then
// every follower's record is already in the store.

use std::path::PathBuf;

use anyhow::Result;

use crate::domain::{
    cluster::ClusterConfig,
    convergence::{metrics_key, timing_artifact_name, ConvergenceRecord, NodePhase},
    error::CoordinationError,
    traits::{CoordinationStore, Transport},
};
use crate::infra::transport::RetryPolicy;
use crate::training::{convergence::ConvergenceSignal, hooks::HookAction};

pub struct NodeCoordinator<S, T> {
    cluster: ClusterConfig,
    store: S,
    transport: T,
    retry: RetryPolicy,
    /// This node's result directory.
    local_result_dir: PathBuf,
    /// Result directory path on the other hosts.
    remote_result_dir: PathBuf,
    run_id: Option<String>,
}

impl<S: CoordinationStore, T: Transport> NodeCoordinator<S, T> {
    pub fn new(
        cluster: ClusterConfig,
        store: S,
        transport: T,
        retry: RetryPolicy,
        local_result_dir: impl Into<PathBuf>,
        remote_result_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cluster,
            store,
            transport,
            retry,
            local_result_dir: local_result_dir.into(),
            remote_result_dir: remote_result_dir.into(),
            run_id: None,
        }
    }

    /// Only accept follower records stamped with `run_id`.
    pub fn with_run_id(mut self, run_id: Option<String>) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn node_id(&self) -> usize {
        self.cluster.node_index()
    }

    pub fn is_leader(&self) -> bool {
        self.cluster.is_leader()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Write this node's record into its store.
    pub fn publish(&self, record: &ConvergenceRecord) -> Result<(), CoordinationError> {
        self.store.put(&metrics_key(self.node_id()), record)?;
        tracing::info!("Node {} published its convergence record", self.node_id());
        Ok(())
    }

    /// Copy this node's published record into the leader's result dir.
    /// Stores that are not file-backed need no transfer.
    pub fn deliver_to_leader(&self) -> Result<(), CoordinationError> {
        let key = metrics_key(self.node_id());
        let Some(local) = self.store.local_path(&key) else {
            return Ok(());
        };
        let leader = self.cluster.leader();
        let what = format!("send {key} to leader {leader}");

        self.retry.run(&what, || {
            self.transport.send(&local, leader, &self.remote_result_dir)
        })?;
        tracing::info!("Node {} delivered {} to {}", self.node_id(), key, leader);
        Ok(())
    }

    /// Whether `key` holds a readable record of this run.
    fn is_current(&self, key: &str) -> bool {
        match self.store.get(key) {
            Ok(Some(record)) => record.belongs_to(self.run_id()),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!("Ignoring {key}: {e}");
                false
            }
        }
    }

    /// Delete records left behind by earlier runs. Runs before the
    /// first batch, so this node's own record is always stale.
    pub fn clear_stale(&self) -> Result<(), CoordinationError> {
        let own = metrics_key(self.node_id());
        if self.store.has(&own) {
            self.store.remove(&own)?;
            tracing::info!("Node {} removed its record from an earlier run", self.node_id());
        }
        if !self.is_leader() {
            return Ok(());
        }

        for id in self.cluster.follower_ids() {
            let key = metrics_key(id);
            if !self.store.has(&key) {
                continue;
            }
            if !self.is_current(&key) {
                self.store.remove(&key)?;
                tracing::info!("Removed {key} left by another run");
            } else if self.run_id.is_none() {
                tracing::warn!(
                    "{key} exists before training started and is taken as current; \
                     pass --run-id to tell runs apart"
                );
            }
        }
        Ok(())
    }

    /// Follower ids without a record of this run in the store.
    pub fn missing_peers(&self) -> Vec<usize> {
        self.cluster
            .follower_ids()
            .filter(|&id| !self.is_current(&metrics_key(id)))
            .collect()
    }

    /// True iff every follower's record is present.
    pub fn all_peers_published(&self) -> bool {
        self.missing_peers().is_empty()
    }

    /// Fetch each follower's timing artifact, replacing any local copy
    /// from an earlier run. Returns how many files were fetched.
    pub fn pull_all_results(&self) -> usize {
        let mut pulled = 0;
        for id in self.cluster.follower_ids() {
            let name = timing_artifact_name(id);
            let Some(peer) = self.cluster.worker(id) else {
                continue;
            };
            let remote = self.remote_result_dir.join(&name);
            let what = format!("fetch {name} from {peer}");

            match self.retry.run(&what, || {
                self.transport.fetch(peer, &remote, &self.local_result_dir)
            }) {
                Ok(()) => pulled += 1,
                Err(e) => tracing::warn!("Skipping artifact of node {id}: {e}"),
            }
        }
        pulled
    }

    /// Advance a stabilised node through the shutdown protocol.
    /// Returns `Stop` once this node is done.
    pub fn on_stabilized(&self, signal: &mut ConvergenceSignal) -> Result<HookAction> {
        let record = signal
            .record()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("stabilised node {} has no record", self.node_id()))?;

        if self.is_leader() {
            let missing = self.missing_peers();
            if !missing.is_empty() {
                tracing::debug!("Leader waiting for nodes {:?}", missing);
                return Ok(HookAction::Continue);
            }

            let pulled = self.pull_all_results();
            tracing::info!("Leader pulled {} follower artifact(s)", pulled);
            self.publish(&record)?;
            signal.advance(NodePhase::Stopped)?;
            tracing::info!(
                "All {} worker(s) converged; leader stopping the run",
                self.cluster.num_workers()
            );
        } else {
            self.publish(&record)?;
            self.deliver_to_leader()?;
            signal.advance(NodePhase::Reported)?;
            signal.advance(NodePhase::Stopped)?;
            tracing::info!("Node {} reported to the leader and is stopping", self.node_id());
        }
        Ok(HookAction::Stop)
    }
}
