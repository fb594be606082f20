// ============================================================
// Layer 6 — File Transport + Retry Policy
// ============================================================
// Moves result files between nodes. Two implementations:
//
//   SharedFsTransport — every node mounts the same result/ dir;
//                       a copy is only needed when the source and
//                       destination directories differ.
//   ScpTransport      — shells out to `scp` (BatchMode, so a
//                       missing key fails instead of prompting).
//
// A single call is one attempt. RetryPolicy wraps attempts with
// a fixed backoff, an attempt cap and an overall deadline; when
// all are used up the caller gets CoordinationError::TransferExhausted.

use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
    process::Command,
    thread,
    time::{Duration, Instant},
};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::{
    cluster::WorkerAddress,
    error::{CoordinationError, TransportError},
    traits::Transport,
};

/// Which transport a run uses to move result files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// The result directory is mounted on every node.
    #[default]
    SharedFs,
    /// Copy with `scp` to the worker hosts.
    Scp,
}

// ─── RetryPolicy ──────────────────────────────────────────────────────────────
/// Bounded retry for transfers.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Always at least 1.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
    /// Give up once this much time has passed since the first attempt.
    pub deadline: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            backoff: Duration::from_secs(2),
            deadline: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or the policy is exhausted.
    pub fn run<T, E, F>(&self, what: &str, mut op: F) -> Result<T, CoordinationError>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        let started = Instant::now();
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match op() {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("{what} succeeded on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let elapsed = started.elapsed();
            let out_of_time = elapsed + self.backoff > self.deadline;
            if attempt >= max_attempts || out_of_time {
                return Err(CoordinationError::TransferExhausted {
                    what: what.to_string(),
                    attempts: attempt,
                    elapsed_secs: elapsed.as_secs_f64(),
                    last_error: err.to_string(),
                });
            }

            tracing::warn!(
                "{what} failed (attempt {attempt}/{max_attempts}): {err}; retrying in {:?}",
                self.backoff
            );
            thread::sleep(self.backoff);
        }
    }
}

// ─── SharedFsTransport ────────────────────────────────────────────────────────
/// Transport for clusters whose result directory is a shared mount.
#[derive(Debug, Clone, Default)]
pub struct SharedFsTransport;

impl SharedFsTransport {
    fn copy_into(src: &Path, dir: &Path) -> Result<(), TransportError> {
        if !src.is_file() {
            return Err(TransportError::MissingSource(src.to_path_buf()));
        }
        let file_name = src
            .file_name()
            .ok_or_else(|| TransportError::MissingSource(src.to_path_buf()))?;
        let dest = dir.join(file_name);
        if same_file(src, &dest) {
            return Ok(());
        }
        fs::create_dir_all(dir).map_err(|e| TransportError::Copy(src.into(), dest.clone(), e))?;
        fs::copy(src, &dest).map_err(|e| TransportError::Copy(src.into(), dest.clone(), e))?;
        Ok(())
    }
}

impl Transport for SharedFsTransport {
    fn send(&self, local: &Path, _peer: &WorkerAddress, remote_dir: &Path)
        -> Result<(), TransportError> {
        Self::copy_into(local, remote_dir)
    }

    fn fetch(&self, _peer: &WorkerAddress, remote: &Path, local_dir: &Path)
        -> Result<(), TransportError> {
        Self::copy_into(remote, local_dir)
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

// ─── ScpTransport ─────────────────────────────────────────────────────────────
/// Transport that copies with `scp` to the host part of a worker address.
/// The worker port belongs to the training runtime, not to ssh.
#[derive(Debug, Clone)]
pub struct ScpTransport {
    program: String,
    connect_timeout_secs: u64,
}

impl Default for ScpTransport {
    fn default() -> Self {
        Self { program: "scp".to_string(), connect_timeout_secs: 10 }
    }
}

impl ScpTransport {
    /// Use a different executable (e.g. a wrapper script).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// `host:path`, with IPv6 literals re-bracketed so scp can split them.
    fn remote_spec(peer: &WorkerAddress, path: &Path) -> String {
        if peer.host.contains(':') {
            format!("[{}]:{}", peer.host, path.display())
        } else {
            format!("{}:{}", peer.host, path.display())
        }
    }

    fn command_args(&self, from: String, to: String) -> Vec<String> {
        vec![
            "-q".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            from,
            to,
        ]
    }

    fn run(&self, args: Vec<String>) -> Result<(), TransportError> {
        let rendered = format!("{} {}", self.program, args.join(" "));
        tracing::debug!("Running: {rendered}");

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| TransportError::Spawn(self.program.clone(), e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                command: rendered,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl Transport for ScpTransport {
    fn send(&self, local: &Path, peer: &WorkerAddress, remote_dir: &Path)
        -> Result<(), TransportError> {
        if !local.is_file() {
            return Err(TransportError::MissingSource(local.to_path_buf()));
        }
        // Trailing slash makes scp treat the target as a directory
        let target = PathBuf::from(format!("{}/", remote_dir.display()));
        let args = self.command_args(
            local.display().to_string(),
            Self::remote_spec(peer, &target),
        );
        self.run(args)
    }

    fn fetch(&self, peer: &WorkerAddress, remote: &Path, local_dir: &Path)
        -> Result<(), TransportError> {
        fs::create_dir_all(local_dir)
            .map_err(|e| TransportError::Copy(remote.into(), local_dir.into(), e))?;
        let args = self.command_args(
            Self::remote_spec(peer, remote),
            format!("{}/", local_dir.display()),
        );
        self.run(args)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tempfile::tempdir;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::ZERO,
            deadline: Duration::from_secs(60),
        }
    }

    fn peer() -> WorkerAddress {
        WorkerAddress { host: "node-b".to_string(), port: 2222 }
    }

    #[test]
    fn test_retry_succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let result = fast_policy(5).run("copy", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 { Err("connection refused") } else { Ok(42) }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_retry_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast_policy(4).run("push metrics", || {
            calls.set(calls.get() + 1);
            Err("host unreachable")
        });
        assert_eq!(calls.get(), 4);
        match result.unwrap_err() {
            CoordinationError::TransferExhausted { what, attempts, last_error, .. } => {
                assert_eq!(what, "push metrics");
                assert_eq!(attempts, 4);
                assert_eq!(last_error, "host unreachable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_retry_respects_deadline() {
        let policy = RetryPolicy {
            max_attempts: 1000,
            backoff: Duration::from_millis(20),
            deadline: Duration::from_millis(10),
        };
        let calls = Cell::new(0);
        let result: Result<(), _> = policy.run("copy", || {
            calls.set(calls.get() + 1);
            Err("timeout")
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_zero_attempts_still_tries_once() {
        let calls = Cell::new(0);
        let _ = fast_policy(0).run("copy", || {
            calls.set(calls.get() + 1);
            Err::<(), _>("nope")
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_shared_fs_send_copies_into_other_dir() {
        let dir = tempdir().unwrap();
        let local = dir.path().join("local");
        let remote = dir.path().join("remote");
        fs::create_dir_all(&local).unwrap();
        fs::write(local.join("metrics-1.json"), "{}").unwrap();

        SharedFsTransport
            .send(&local.join("metrics-1.json"), &peer(), &remote)
            .unwrap();
        assert_eq!(fs::read_to_string(remote.join("metrics-1.json")).unwrap(), "{}");
    }

    #[test]
    fn test_shared_fs_same_dir_is_noop() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("timing-2.csv");
        fs::write(&file, "epoch,batch,iteration,seconds\n").unwrap();

        SharedFsTransport.fetch(&peer(), &file, dir.path()).unwrap();
        assert!(file.is_file());
    }

    #[test]
    fn test_shared_fs_missing_source() {
        let dir = tempdir().unwrap();
        let err = SharedFsTransport
            .fetch(&peer(), &dir.path().join("absent.csv"), dir.path())
            .unwrap_err();
        assert!(matches!(err, TransportError::MissingSource(_)));
    }

    #[test]
    fn test_scp_arguments() {
        let scp = ScpTransport::default();
        let args = scp.command_args(
            "/tmp/result/metrics-1.json".to_string(),
            ScpTransport::remote_spec(&peer(), Path::new("result/")),
        );
        assert_eq!(args.last().unwrap(), "node-b:result/");
        assert!(args.contains(&"BatchMode=yes".to_string()));
    }

    #[test]
    fn test_scp_brackets_ipv6_hosts() {
        let peer = WorkerAddress::parse("[::1]:2222").unwrap();
        assert_eq!(peer.host, "::1");
        assert_eq!(
            ScpTransport::remote_spec(&peer, Path::new("/srv/result/timing-1.csv")),
            "[::1]:/srv/result/timing-1.csv"
        );
        let v4 = WorkerAddress { host: "10.0.0.5".to_string(), port: 2222 };
        assert_eq!(ScpTransport::remote_spec(&v4, Path::new("result/")), "10.0.0.5:result/");
    }

    #[test]
    fn test_scp_spawn_failure_is_reported() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("metrics-1.json");
        fs::write(&file, "{}").unwrap();

        let scp = ScpTransport::default().with_program("/nonexistent/scp-binary");
        let err = scp.send(&file, &peer(), Path::new("result")).unwrap_err();
        assert!(matches!(err, TransportError::Spawn(_, _)));
    }
}
