// Test doubles for the training core: a model with a handful of
// scalar "weights" and a clock that only moves when told to.

use std::{
    cell::Cell,
    fs,
    path::Path,
    rc::Rc,
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::traits::{StepOutput, TrainableModel};
use crate::training::loop_runner::Clock;

/// Shared, manually advanced clock.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn elapsed(&self) -> Duration {
        self.now.get()
    }
}

#[derive(Serialize, Deserialize)]
struct FakeState {
    weights: Vec<f64>,
    optimizer_steps: u64,
}

pub struct FakeModel {
    pub batches: usize,
    pub weights: Vec<f64>,
    pub optimizer_steps: u64,
    clock: Option<ManualClock>,
    durations: Vec<Duration>,
}

impl FakeModel {
    pub fn new(batches: usize) -> Self {
        Self {
            batches,
            weights: vec![0.0; 3],
            optimizer_steps: 0,
            clock: None,
            durations: Vec::new(),
        }
    }

    /// Each batch advances `clock` by the next entry of `durations`, cycling.
    pub fn with_durations(mut self, clock: ManualClock, durations: Vec<Duration>) -> Self {
        self.clock = Some(clock);
        self.durations = durations;
        self
    }
}

impl TrainableModel for FakeModel {
    fn batches_per_epoch(&self, _epoch: usize) -> usize {
        self.batches
    }

    fn train_batch(&mut self, _epoch: usize, _batch: usize) -> Result<StepOutput> {
        if let Some(clock) = &self.clock {
            if !self.durations.is_empty() {
                let i = self.optimizer_steps as usize % self.durations.len();
                clock.advance(self.durations[i]);
            }
        }
        self.optimizer_steps += 1;
        for w in &mut self.weights {
            *w += 0.5;
        }
        let loss = 1.0 / self.optimizer_steps as f64;
        Ok(StepOutput { loss, accuracy: 1.0 - loss, samples: 4 })
    }

    fn save_state(&self, stem: &Path) -> Result<()> {
        let state = FakeState { weights: self.weights.clone(), optimizer_steps: self.optimizer_steps };
        fs::write(stem.with_extension("json"), serde_json::to_string(&state)?)?;
        Ok(())
    }

    fn load_state(&mut self, stem: &Path) -> Result<()> {
        let path = stem.with_extension("json");
        let json = fs::read_to_string(&path).with_context(|| format!("missing {}", path.display()))?;
        let state: FakeState = serde_json::from_str(&json)?;
        self.weights = state.weights;
        self.optimizer_steps = state.optimizer_steps;
        Ok(())
    }

    fn export_weights(&self, stem: &Path) -> Result<()> {
        fs::write(stem.with_extension("json"), serde_json::to_string(&self.weights)?)?;
        Ok(())
    }
}
