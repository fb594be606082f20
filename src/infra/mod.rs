// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Filesystem and process plumbing used by the other layers:
//
//   checkpoint.rs — per-epoch full-state checkpoints, resume
//                   epoch bookkeeping, train_config.json
//   metrics.rs    — epoch log.csv and per-node timing CSV
//   store.rs      — the shared result/ directory as a
//                   CoordinationStore
//   transport.rs  — scp / shared-filesystem copies behind a
//                   bounded retry policy
//
// Reference: Rust Book §9 (Error Handling with anyhow)
//            Burn Book §5 (Checkpointing)

/// Model checkpoint saving and resume
pub mod checkpoint;

/// Epoch and timing CSV loggers
pub mod metrics;

/// Shared result directory store
pub mod store;

/// Remote file copy with bounded retries
pub mod transport;
