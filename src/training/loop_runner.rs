// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Drives a TrainableModel epoch by epoch and batch by batch,
// timing each unit with a Clock and firing the registered hooks.
//
//   for epoch in initial_epoch..total_epochs
//     epoch_begin
//     for batch in 0..batches_per_epoch(epoch)
//       batch_begin → train_batch → batch_end → iteration += 1
//     validate → epoch_end
//   train_end
//
// The loop never exits the process. A Stop from any hook ends the
// run after the current callback round and is reported through
// RunOutcome::Stopped so the caller decides what happens next.

use std::time::{Duration, Instant};

use anyhow::Result;

use crate::domain::{convergence::ConvergenceRecord, traits::TrainableModel};
use crate::training::{
    hooks::{HookAction, TrainingHooks},
    state::TrainingState,
};

/// Monotonic time source.
pub trait Clock {
    /// Time since an arbitrary fixed origin.
    fn elapsed(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for SystemClock {
    fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// All epochs ran; `epochs` is the number run by this invocation.
    Completed { epochs: usize },
    /// A hook stopped the run early. Carries the convergence record
    /// if the node had stabilised.
    Stopped { record: Option<ConvergenceRecord> },
}

pub struct TrainingLoop<C: Clock = SystemClock> {
    clock: C,
    initial_epoch: usize,
}

impl TrainingLoop<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock::default())
    }
}

impl Default for TrainingLoop<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fire one callback on every hook in order; Stop if any asked for it.
fn dispatch<M, F>(hooks: &mut [Box<dyn TrainingHooks<M>>], mut call: F) -> Result<HookAction>
where
    M: TrainableModel,
    F: FnMut(&mut dyn TrainingHooks<M>) -> Result<HookAction>,
{
    let mut action = HookAction::Continue;
    for hook in hooks.iter_mut() {
        if call(hook.as_mut())?.is_stop() {
            tracing::debug!("Hook '{}' requested stop", hook.name());
            action = HookAction::Stop;
        }
    }
    Ok(action)
}

impl<C: Clock> TrainingLoop<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { clock, initial_epoch: 0 }
    }

    /// Start at this epoch index instead of 0 (resumed runs).
    pub fn starting_at(mut self, initial_epoch: usize) -> Self {
        self.initial_epoch = initial_epoch;
        self
    }

    pub fn run<M: TrainableModel>(
        &self,
        model: &mut M,
        state: &mut TrainingState,
        hooks: &mut [Box<dyn TrainingHooks<M>>],
    ) -> Result<RunOutcome> {
        let total_epochs = state.total_epochs;
        tracing::info!(
            "Node {} training epochs {}..{} with {} hook(s)",
            state.node_id,
            self.initial_epoch,
            total_epochs,
            hooks.len()
        );

        let mut stopped = dispatch(hooks, |h| h.on_train_begin(state))?.is_stop();
        let mut epochs_run = 0;

        let mut epoch = self.initial_epoch;
        while !stopped && epoch < total_epochs {
            state.begin_epoch(epoch);
            let epoch_start = self.clock.elapsed();
            stopped = dispatch(hooks, |h| h.on_epoch_begin(state))?.is_stop();

            let batches = model.batches_per_epoch(epoch);
            let mut batch = 0;
            while !stopped && batch < batches {
                state.batch = batch;
                stopped = dispatch(hooks, |h| h.on_batch_begin(state))?.is_stop();
                if stopped {
                    break;
                }

                let batch_start = self.clock.elapsed();
                let step = model.train_batch(epoch, batch)?;
                state.batch_elapsed = self.clock.elapsed().saturating_sub(batch_start);
                state.record_step(step);

                let model_ref: &M = model;
                stopped = dispatch(hooks, |h| h.on_batch_end(state, model_ref))?.is_stop();
                state.iteration += 1;
                batch += 1;
            }

            if !stopped {
                state.last_validation = model.validate()?;
                state.epoch_elapsed = self.clock.elapsed().saturating_sub(epoch_start);
                let model_ref: &M = model;
                stopped = dispatch(hooks, |h| h.on_epoch_end(state, model_ref))?.is_stop();
                epochs_run += 1;
            }
            epoch += 1;
        }

        for hook in hooks.iter_mut() {
            hook.on_train_end(state, model)?;
        }

        if stopped {
            tracing::info!(
                "Node {} stopped early at epoch {} iteration {}",
                state.node_id,
                state.epoch,
                state.iteration
            );
            Ok(RunOutcome::Stopped { record: state.signal.record().cloned() })
        } else {
            tracing::info!("Node {} finished {} epoch(s)", state.node_id, epochs_run);
            Ok(RunOutcome::Completed { epochs: epochs_run })
        }
    }
}
