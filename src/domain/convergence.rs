// ============================================================
// Layer 3 — Convergence Record
// ============================================================
// The snapshot a node writes once its per-iteration timing has
// stabilised. It is immutable after creation and travels through
// the result store as:
//
//   {"node": [{"id": 1, "last_iteration": 19, "last_epoch": 0,
//              "num_epoch": 5, "average": 0.11,
//              "standard_deviation": 0.0099, "run_id": "r7"}]}
//
// One file per node, named metrics-<id>.json. `run_id` is only
// written when the run was given one; documents without it parse.

use serde::{Deserialize, Serialize};

use crate::domain::error::RecordError;

/// Where a node is in the shutdown protocol.
///
///   Running → Stabilized → Reported → Stopped   (followers)
///   Running → Stabilized → Stopped              (leader)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePhase {
    Running,
    Stabilized,
    Reported,
    Stopped,
}

impl NodePhase {
    /// Whether `self → next` is an edge of the state machine.
    pub fn can_advance_to(self, next: NodePhase) -> bool {
        matches!(
            (self, next),
            (NodePhase::Running, NodePhase::Stabilized)
                | (NodePhase::Stabilized, NodePhase::Reported)
                | (NodePhase::Stabilized, NodePhase::Stopped)
                | (NodePhase::Reported, NodePhase::Stopped)
        )
    }
}

/// A node's view of the training-speed plateau.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceRecord {
    #[serde(rename = "id")]
    pub node_id: usize,
    pub last_iteration: usize,
    pub last_epoch: usize,
    #[serde(rename = "num_epoch")]
    pub total_epochs: usize,
    #[serde(rename = "average")]
    pub mean: f64,
    #[serde(rename = "standard_deviation")]
    pub stddev: f64,
    /// Identifier of the run that produced the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// On-disk wrapper: the record sits inside a one-element `node` array.
#[derive(Debug, Serialize, Deserialize)]
struct MetricsDocument {
    node: Vec<ConvergenceRecord>,
}

impl ConvergenceRecord {
    /// Serialise into the metrics file format.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&MetricsDocument { node: vec![self.clone()] })
    }

    /// Parse a metrics file. The first entry of `node` is the record.
    pub fn from_json(json: &str) -> Result<Self, RecordError> {
        let doc: MetricsDocument = serde_json::from_str(json)?;
        doc.node.into_iter().next().ok_or(RecordError::EmptyNodeList)
    }

    /// Whether the record was written by the run `run_id`.
    pub fn belongs_to(&self, run_id: Option<&str>) -> bool {
        self.run_id.as_deref() == run_id
    }
}

/// Store key for a node's convergence record.
pub fn metrics_key(node_id: usize) -> String {
    format!("metrics-{node_id}.json")
}

/// File name of a node's iteration-timing artifact.
pub fn timing_artifact_name(node_id: usize) -> String {
    format!("timing-{node_id}.csv")
}
