// ============================================================
// Layer 5 — Timing Recorder
// ============================================================
// Rolling window of per-iteration wall-clock durations, plus the
// duration of every finished epoch.
//
// The window is bounded: once `capacity` samples are held, the
// oldest is dropped for each new one. Statistics therefore always
// describe the most recent stretch of training, and memory stays
// flat on long runs.

use std::collections::VecDeque;

use crate::domain::timing::IterationTiming;

/// Default number of iteration samples kept for statistics.
pub const DEFAULT_WINDOW: usize = 100;

#[derive(Debug, Clone)]
pub struct TimingRecorder {
    window: VecDeque<IterationTiming>,
    capacity: usize,
    epoch_seconds: Vec<(usize, f64)>,
}

impl Default for TimingRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl TimingRecorder {
    /// A recorder keeping at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            epoch_seconds: Vec::new(),
        }
    }

    pub fn record(&mut self, timing: IterationTiming) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(timing);
    }

    pub fn record_epoch(&mut self, epoch: usize, seconds: f64) {
        self.epoch_seconds.push((epoch, seconds));
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn samples(&self) -> impl Iterator<Item = &IterationTiming> {
        self.window.iter()
    }

    /// (epoch, seconds) for every finished epoch of this run.
    pub fn epoch_seconds(&self) -> &[(usize, f64)] {
        &self.epoch_seconds
    }

    /// Arithmetic mean and population standard deviation of the window,
    /// or `None` while the window is empty.
    pub fn mean_and_stddev(&self) -> Option<(f64, f64)> {
        if self.window.is_empty() {
            return None;
        }
        let n = self.window.len() as f64;
        let mean = self.window.iter().map(|t| t.duration_seconds).sum::<f64>() / n;
        let variance = self
            .window
            .iter()
            .map(|t| (t.duration_seconds - mean).powi(2))
            .sum::<f64>()
            / n;
        Some((mean, variance.sqrt()))
    }
}
