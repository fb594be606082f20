// ============================================================
// Layer 5 — Training State
// ============================================================
// Everything the loop and its hooks share while a run is in
// progress. Hooks receive `&mut TrainingState` and may read or
// update it; the loop owns the counters.

use std::time::Duration;

use crate::domain::traits::{StepOutput, ValidationMetrics};
use crate::training::{convergence::ConvergenceSignal, timing::TimingRecorder};

#[derive(Debug, Clone)]
pub struct TrainingState {
    pub node_id: usize,
    pub total_epochs: usize,
    /// Current 0-based epoch index.
    pub epoch: usize,
    /// Current 0-based batch index within the epoch.
    pub batch: usize,
    /// 0-based iteration counter across the whole run. Not reset by
    /// epochs, and starts at 0 again on a resumed run.
    pub iteration: usize,
    /// Wall-clock time of the batch that just finished.
    pub batch_elapsed: Duration,
    /// Wall-clock time of the epoch that just finished.
    pub epoch_elapsed: Duration,
    pub timings: TimingRecorder,
    pub signal: ConvergenceSignal,
    pub last_step: Option<StepOutput>,
    pub last_validation: Option<ValidationMetrics>,
    pub totals: EpochTotals,
}

/// Running sums over the batches of the current epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochTotals {
    pub loss_sum: f64,
    pub accuracy_sum: f64,
    pub batches: usize,
    pub samples: usize,
}

impl EpochTotals {
    pub fn mean_loss(&self) -> f64 {
        if self.batches == 0 { 0.0 } else { self.loss_sum / self.batches as f64 }
    }

    pub fn mean_accuracy(&self) -> f64 {
        if self.batches == 0 { 0.0 } else { self.accuracy_sum / self.batches as f64 }
    }
}

impl TrainingState {
    pub fn new(node_id: usize, total_epochs: usize, timing_window: usize) -> Self {
        Self {
            node_id,
            total_epochs,
            epoch: 0,
            batch: 0,
            iteration: 0,
            batch_elapsed: Duration::ZERO,
            epoch_elapsed: Duration::ZERO,
            timings: TimingRecorder::new(timing_window),
            signal: ConvergenceSignal::default(),
            last_step: None,
            last_validation: None,
            totals: EpochTotals::default(),
        }
    }

    /// Reset per-epoch bookkeeping at the start of `epoch`.
    pub fn begin_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.batch = 0;
        self.epoch_elapsed = Duration::ZERO;
        self.last_validation = None;
        self.totals = EpochTotals::default();
    }

    pub fn record_step(&mut self, step: StepOutput) {
        self.totals.loss_sum += step.loss;
        self.totals.accuracy_sum += step.accuracy;
        self.totals.batches += 1;
        self.totals.samples += step.samples;
        self.last_step = Some(step);
    }
}
