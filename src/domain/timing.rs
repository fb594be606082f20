use serde::{Deserialize, Serialize};

/// Wall-clock duration of one training iteration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationTiming {
    pub epoch: usize,
    /// Batch index within the epoch.
    pub batch_index: usize,
    /// Iteration index since this process started training.
    pub iteration: usize,
    pub duration_seconds: f64,
}
