// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Two CSV files:
//
//   <save_dir>/log.csv          one row per epoch
//     epoch,loss,accuracy,val_loss,val_accuracy,seconds
//     1,0.412300,0.861000,0.301200,0.902000,41.220
//
//   <result_dir>/timing-<id>.csv   one row per recorded iteration
//     epoch,batch,iteration,seconds
//     0,1,1,0.104217
//
// log.csv is appended to across resumed runs; epoch numbers keep
// its rows apart. Iteration numbers restart with every run, so the
// timing file is recreated when a run starts and only ever holds
// that run's rows. It is the per-worker artifact the leader pulls
// once every follower has reported convergence. Empty validation
// columns mean the model had no held-out split.
//
// Reference: Rust Book §12 (I/O and File Handling)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::timing::IterationTiming;

/// One row of metrics data for a single training epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch: usize,
    /// Mean training loss over this node's batches
    pub loss: f64,
    /// Mean training accuracy over this node's batches
    pub accuracy: f64,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
    /// Wall-clock seconds spent in the epoch
    pub seconds: f64,
}

/// Open `path` for appending, writing `header` first if the file is new.
fn open_with_header(path: &Path, header: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if !path.exists() {
        let mut f = fs::File::create(path)?;
        writeln!(f, "{header}")?;
        tracing::debug!("Created CSV: '{}'", path.display());
    }
    Ok(())
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut f = OpenOptions::new().append(true).open(path)?;
    writeln!(f, "{line}")?;
    Ok(())
}

fn opt(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.6}")).unwrap_or_default()
}

/// Logs epoch metrics to a CSV file for later analysis.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    /// Create the logger; appends to an existing log across resumed runs.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let csv_path = dir.into().join("log.csv");
        open_with_header(&csv_path, "epoch,loss,accuracy,val_loss,val_accuracy,seconds")?;
        Ok(Self { csv_path })
    }

    /// Append one epoch's metrics as a new row.
    pub fn log(&self, m: &EpochMetrics) -> Result<()> {
        append_line(
            &self.csv_path,
            &format!(
                "{},{:.6},{:.6},{},{},{:.3}",
                m.epoch,
                m.loss,
                m.accuracy,
                opt(m.val_loss),
                opt(m.val_accuracy),
                m.seconds,
            ),
        )?;
        tracing::debug!("Logged epoch {} metrics: loss={:.4}", m.epoch, m.loss);
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

/// Per-node iteration timing artifact for the current run.
pub struct TimingLog {
    csv_path: PathBuf,
}

impl TimingLog {
    /// Start the artifact afresh, discarding rows of earlier runs.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let csv_path = path.into();
        if csv_path.exists() {
            fs::remove_file(&csv_path)?;
            tracing::debug!("Replacing timing log of an earlier run: '{}'", csv_path.display());
        }
        open_with_header(&csv_path, "epoch,batch,iteration,seconds")?;
        Ok(Self { csv_path })
    }

    pub fn append(&self, t: &IterationTiming) -> Result<()> {
        append_line(
            &self.csv_path,
            &format!("{},{},{},{:.6}", t.epoch, t.batch_index, t.iteration, t.duration_seconds),
        )
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_epoch_rows_append_after_header() {
        let dir = tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger
            .log(&EpochMetrics {
                epoch: 1,
                loss: 0.5,
                accuracy: 0.75,
                val_loss: None,
                val_accuracy: Some(0.8),
                seconds: 12.0,
            })
            .unwrap();

        let text = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "epoch,loss,accuracy,val_loss,val_accuracy,seconds");
        assert_eq!(lines[1], "1,0.500000,0.750000,,0.800000,12.000");
    }

    #[test]
    fn test_epoch_log_survives_reopening() {
        let dir = tempdir().unwrap();
        let row = EpochMetrics {
            epoch: 1,
            loss: 0.5,
            accuracy: 0.75,
            val_loss: None,
            val_accuracy: None,
            seconds: 1.0,
        };
        MetricsLogger::new(dir.path()).unwrap().log(&row).unwrap();
        MetricsLogger::new(dir.path()).unwrap().log(&EpochMetrics { epoch: 2, ..row }).unwrap();

        let text = fs::read_to_string(dir.path().join("log.csv")).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_new_run_starts_fresh_timing_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("timing-1.csv");
        let timing = IterationTiming {
            epoch: 0,
            batch_index: 3,
            iteration: 3,
            duration_seconds: 0.25,
        };

        let first = TimingLog::new(&path).unwrap();
        first.append(&timing).unwrap();
        first.append(&IterationTiming { batch_index: 4, iteration: 4, ..timing }).unwrap();

        // A resumed run restarts iteration numbering
        let resumed = TimingLog::new(&path).unwrap();
        resumed.append(&IterationTiming { epoch: 2, ..timing }).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines, vec!["epoch,batch,iteration,seconds", "2,3,3,0.250000"]);
    }
}
