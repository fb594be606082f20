// ============================================================
// Layer 5 — Training Core
// ============================================================
// Model-agnostic training loop and the convergence machinery
// built on top of it:
//
//   timing.rs      — rolling window of iteration durations
//   stability.rs   — stddev fingerprints, analysis cadence
//   convergence.rs — per-node phase + the monitor hook
//   coordinator.rs — leader/follower shutdown protocol
//   hooks.rs       — hook trait, checkpoint and epoch-log hooks
//   state.rs       — state shared by the loop and its hooks
//   loop_runner.rs — the epoch/batch loop itself
//
// Nothing in here knows about Burn; models plug in through
// domain::traits::TrainableModel.

pub mod convergence;
pub mod coordinator;
pub mod hooks;
pub mod loop_runner;
pub mod stability;
pub mod state;
pub mod timing;

#[cfg(test)]
pub mod testing;
