// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums and traits that define the core
// concepts of a distributed training run.
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO network calls
//   - Only plain Rust structs, enums, and traits
//
//   cluster.rs     — who the workers are and which one we are
//   convergence.rs — the per-node convergence record and its
//                    JSON wire format in the result store
//   timing.rs      — one measured training iteration
//   error.rs       — typed failures that map to exit codes
//   traits.rs      — seams: trainable model, coordination store,
//                    file transport
//
// Reference: Rust Book §5 (Structs), §10 (Traits)

/// Cluster descriptor (worker addresses + this node's index)
pub mod cluster;

/// Convergence record and metrics file format
pub mod convergence;

/// Iteration timing sample
pub mod timing;

/// Typed error taxonomy
pub mod error;

/// Core abstractions (traits) that other layers implement
pub mod traits;
