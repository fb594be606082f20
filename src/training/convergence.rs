// ============================================================
// Layer 5 — Convergence Signal + Monitor Hook
// ============================================================
// ConvergenceSignal is the per-node state machine
//
//   Running → Stabilized → Reported → Stopped   (followers)
//   Running → Stabilized → Stopped              (leader)
//
// together with the ConvergenceRecord captured when the node
// stabilised. It lives inside TrainingState.
//
// ConvergenceMonitor is the hook that drives it: on every batch
// end it records the iteration duration (except the very first
// batch of the run, which includes warm-up), and on analysis
// ticks it runs the StabilityDetector and hands a stabilised
// node to the NodeCoordinator.

use anyhow::Result;

use crate::domain::{
    convergence::{ConvergenceRecord, NodePhase},
    error::PhaseError,
    timing::IterationTiming,
    traits::{CoordinationStore, TrainableModel, Transport},
};
use crate::infra::metrics::TimingLog;
use crate::training::{
    coordinator::NodeCoordinator,
    hooks::{HookAction, TrainingHooks},
    stability::{is_analysis_tick, StabilityDetector, StabilityWindow},
    state::TrainingState,
};

/// Fixed tag at the start of every per-iteration timing log line.
pub const TIMING_TAG: &str = "LANECAPS_TIMING";

// ─── ConvergenceSignal ────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct ConvergenceSignal {
    phase: NodePhase,
    record: Option<ConvergenceRecord>,
}

impl Default for ConvergenceSignal {
    fn default() -> Self {
        Self { phase: NodePhase::Running, record: None }
    }
}

impl ConvergenceSignal {
    pub fn phase(&self) -> NodePhase {
        self.phase
    }

    pub fn record(&self) -> Option<&ConvergenceRecord> {
        self.record.as_ref()
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == NodePhase::Stopped
    }

    /// Running → Stabilized, capturing the record. The record is never
    /// replaced afterwards.
    pub fn stabilize(&mut self, record: ConvergenceRecord) -> Result<(), PhaseError> {
        self.advance(NodePhase::Stabilized)?;
        self.record = Some(record);
        Ok(())
    }

    pub fn advance(&mut self, next: NodePhase) -> Result<(), PhaseError> {
        if !self.phase.can_advance_to(next) {
            return Err(PhaseError { from: self.phase, to: next });
        }
        tracing::debug!("Convergence phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
        Ok(())
    }
}

// ─── ConvergenceMonitor ───────────────────────────────────────────────────────
pub struct ConvergenceMonitor<S, T> {
    detector: StabilityDetector,
    coordinator: NodeCoordinator<S, T>,
    timing_log: Option<TimingLog>,
}

impl<S: CoordinationStore, T: Transport> ConvergenceMonitor<S, T> {
    pub fn new(coordinator: NodeCoordinator<S, T>) -> Self {
        Self { detector: StabilityDetector::new(), coordinator, timing_log: None }
    }

    /// Also append every recorded iteration to a CSV artifact.
    pub fn with_timing_log(mut self, log: TimingLog) -> Self {
        self.timing_log = Some(log);
        self
    }

    fn log_iteration(state: &TrainingState) {
        let seconds = state.batch_elapsed.as_secs_f64();
        let samples = state.last_step.map(|s| s.samples).unwrap_or(0);
        let throughput = if seconds > 0.0 { samples as f64 / seconds } else { 0.0 };
        tracing::info!(
            "{TIMING_TAG} node={} epoch={} batch={} iteration={} elapsed={:.6} samples_per_sec={:.1}",
            state.node_id,
            state.epoch,
            state.batch,
            state.iteration,
            seconds,
            throughput,
        );
    }

    /// Run the detector on an analysis tick, stabilising the node on a repeat.
    fn analyse(&mut self, state: &mut TrainingState) -> Result<()> {
        let Some(window) = StabilityWindow::measure(&state.timings) else {
            return Ok(());
        };
        tracing::debug!(
            "Node {} tick at iteration {}: mean={:.6}s stddev={:.6}s fingerprint={:?}",
            state.node_id,
            state.iteration,
            window.mean,
            window.stddev,
            window.fingerprint(),
        );

        if self.detector.observe(&window) {
            let record = ConvergenceRecord {
                node_id: state.node_id,
                last_iteration: state.iteration,
                last_epoch: state.epoch,
                total_epochs: state.total_epochs,
                mean: window.mean,
                stddev: window.stddev,
                run_id: self.coordinator.run_id().map(str::to_owned),
            };
            tracing::info!(
                "Node {} timing stabilised at epoch {} iteration {} (mean={:.6}s, stddev={:.6}s)",
                record.node_id,
                record.last_epoch,
                record.last_iteration,
                record.mean,
                record.stddev,
            );
            state.signal.stabilize(record)?;
        }
        Ok(())
    }
}

impl<M, S, T> TrainingHooks<M> for ConvergenceMonitor<S, T>
where
    M: TrainableModel,
    S: CoordinationStore,
    T: Transport,
{
    fn on_train_begin(&mut self, state: &mut TrainingState) -> Result<HookAction> {
        tracing::info!(
            "Node {} ({}) monitoring timing over a {}-sample window",
            state.node_id,
            if self.coordinator.is_leader() { "leader" } else { "follower" },
            state.timings.capacity(),
        );
        self.coordinator.clear_stale()?;
        Ok(HookAction::Continue)
    }

    fn on_batch_end(&mut self, state: &mut TrainingState, _model: &M) -> Result<HookAction> {
        Self::log_iteration(state);

        if state.iteration == 0 {
            tracing::debug!("First iteration of the run is not recorded");
        } else {
            let timing = IterationTiming {
                epoch: state.epoch,
                batch_index: state.batch,
                iteration: state.iteration,
                duration_seconds: state.batch_elapsed.as_secs_f64(),
            };
            state.timings.record(timing);
            if let Some(log) = &self.timing_log {
                log.append(&timing)?;
            }
        }

        if !is_analysis_tick(state.iteration) {
            return Ok(HookAction::Continue);
        }

        if state.signal.phase() == NodePhase::Running {
            self.analyse(state)?;
        }

        if state.signal.phase() == NodePhase::Stabilized {
            return self.coordinator.on_stabilized(&mut state.signal);
        }
        Ok(HookAction::Continue)
    }

    fn on_epoch_end(&mut self, state: &mut TrainingState, _model: &M) -> Result<HookAction> {
        let seconds = state.epoch_elapsed.as_secs_f64();
        state.timings.record_epoch(state.epoch, seconds);
        Ok(HookAction::Continue)
    }

    fn name(&self) -> &str {
        "convergence"
    }
}
