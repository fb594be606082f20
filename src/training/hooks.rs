// ============================================================
// Layer 5 — Training Hooks
// ============================================================
// Callbacks the TrainingLoop fires around every unit of work:
//
//   on_train_begin
//   ┌ on_epoch_begin
//   │ ┌ on_batch_begin
//   │ │   model.train_batch(..)
//   │ └ on_batch_end
//   │   model.validate()
//   └ on_epoch_end
//   on_train_end            (also after an early stop)
//
// Any hook may return HookAction::Stop; the loop finishes the
// current callback round and then ends the run. Hooks run in the
// order they were registered.

use anyhow::Result;

use crate::domain::traits::TrainableModel;
use crate::infra::{
    checkpoint::CheckpointManager,
    metrics::{EpochMetrics, MetricsLogger},
};
use crate::training::state::TrainingState;

/// Fixed tag at the start of every per-epoch summary log line.
pub const EPOCH_TAG: &str = "LANECAPS_EPOCH";

/// What a hook asks the loop to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookAction {
    #[default]
    Continue,
    Stop,
}

impl HookAction {
    pub fn is_stop(self) -> bool {
        self == HookAction::Stop
    }
}

/// Observer of a training run. Every method defaults to `Continue`.
pub trait TrainingHooks<M: TrainableModel> {
    fn on_train_begin(&mut self, _state: &mut TrainingState) -> Result<HookAction> {
        Ok(HookAction::Continue)
    }

    fn on_epoch_begin(&mut self, _state: &mut TrainingState) -> Result<HookAction> {
        Ok(HookAction::Continue)
    }

    fn on_batch_begin(&mut self, _state: &mut TrainingState) -> Result<HookAction> {
        Ok(HookAction::Continue)
    }

    fn on_batch_end(&mut self, _state: &mut TrainingState, _model: &M) -> Result<HookAction> {
        Ok(HookAction::Continue)
    }

    fn on_epoch_end(&mut self, _state: &mut TrainingState, _model: &M) -> Result<HookAction> {
        Ok(HookAction::Continue)
    }

    fn on_train_end(&mut self, _state: &TrainingState, _model: &M) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

// ─── CheckpointHook ───────────────────────────────────────────────────────────
/// Saves the full model state at the end of every epoch.
pub struct CheckpointHook {
    manager: CheckpointManager,
}

impl CheckpointHook {
    pub fn new(manager: CheckpointManager) -> Self {
        Self { manager }
    }
}

impl<M: TrainableModel> TrainingHooks<M> for CheckpointHook {
    fn on_epoch_end(&mut self, state: &mut TrainingState, model: &M) -> Result<HookAction> {
        let stem = self.manager.save(state.epoch, state.node_id, model)?;
        tracing::info!("Checkpoint written: {}", stem.display());
        Ok(HookAction::Continue)
    }

    fn name(&self) -> &str {
        "checkpoint"
    }
}

// ─── EpochLogHook ─────────────────────────────────────────────────────────────
/// Emits the per-epoch summary line and appends a row to log.csv.
pub struct EpochLogHook {
    logger: MetricsLogger,
}

impl EpochLogHook {
    pub fn new(logger: MetricsLogger) -> Self {
        Self { logger }
    }

    fn metrics(state: &TrainingState) -> EpochMetrics {
        EpochMetrics {
            epoch: state.epoch + 1,
            loss: state.totals.mean_loss(),
            accuracy: state.totals.mean_accuracy(),
            val_loss: state.last_validation.map(|v| v.loss),
            val_accuracy: state.last_validation.map(|v| v.accuracy),
            seconds: state.epoch_elapsed.as_secs_f64(),
        }
    }
}

impl<M: TrainableModel> TrainingHooks<M> for EpochLogHook {
    fn on_epoch_end(&mut self, state: &mut TrainingState, _model: &M) -> Result<HookAction> {
        let m = Self::metrics(state);
        let samples_per_sec = if m.seconds > 0.0 {
            state.totals.samples as f64 / m.seconds
        } else {
            0.0
        };

        tracing::info!(
            "{EPOCH_TAG} node={} epoch={}/{} loss={:.4} acc={:.4} val_loss={} val_acc={} elapsed={:.3} samples_per_sec={:.1}",
            state.node_id,
            m.epoch,
            state.total_epochs,
            m.loss,
            m.accuracy,
            m.val_loss.map(|v| format!("{v:.4}")).unwrap_or_else(|| "-".to_string()),
            m.val_accuracy.map(|v| format!("{v:.4}")).unwrap_or_else(|| "-".to_string()),
            m.seconds,
            samples_per_sec,
        );

        self.logger.log(&m)?;
        Ok(HookAction::Continue)
    }

    fn name(&self) -> &str {
        "epoch-log"
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::traits::{StepOutput, ValidationMetrics};
    use crate::training::testing::FakeModel;
    use std::{fs, time::Duration};
    use tempfile::tempdir;

    #[test]
    fn test_hook_action_default_is_continue() {
        assert_eq!(HookAction::default(), HookAction::Continue);
        assert!(HookAction::Stop.is_stop());
        assert!(!HookAction::Continue.is_stop());
    }

    #[test]
    fn test_checkpoint_hook_writes_one_group_per_epoch() {
        let dir = tempdir().unwrap();
        let mut hook = CheckpointHook::new(CheckpointManager::new(dir.path()).unwrap());
        let model = FakeModel::new(2);
        let mut state = TrainingState::new(3, 5, 10);

        for epoch in 0..2 {
            state.begin_epoch(epoch);
            let action = TrainingHooks::<FakeModel>::on_epoch_end(&mut hook, &mut state, &model).unwrap();
            assert_eq!(action, HookAction::Continue);
        }
        assert!(dir.path().join("model-epoch-01-node-3.json").is_file());
        assert!(dir.path().join("model-epoch-02-node-3.json").is_file());
    }

    #[test]
    fn test_epoch_log_hook_appends_csv_row() {
        let dir = tempdir().unwrap();
        let mut hook = EpochLogHook::new(MetricsLogger::new(dir.path()).unwrap());
        let model = FakeModel::new(2);
        let mut state = TrainingState::new(0, 4, 10);

        state.begin_epoch(1);
        state.record_step(StepOutput { loss: 0.5, accuracy: 0.8, samples: 10 });
        state.record_step(StepOutput { loss: 0.3, accuracy: 0.9, samples: 10 });
        state.last_validation = Some(ValidationMetrics { loss: 0.25, accuracy: 0.95 });
        state.epoch_elapsed = Duration::from_millis(1500);

        TrainingHooks::<FakeModel>::on_epoch_end(&mut hook, &mut state, &model).unwrap();

        let csv = fs::read_to_string(dir.path().join("log.csv")).unwrap();
        let rows: Vec<&str> = csv.lines().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], "2,0.400000,0.850000,0.250000,0.950000,1.500");
    }
}
