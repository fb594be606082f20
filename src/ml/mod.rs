// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn model code lives here. The training loop above it
// only sees the TrainableModel trait, so the coordination and
// checkpoint logic is testable without a model at all.
//
//   model.rs      — LaneCapsNet: parallel capsule lanes with
//                   dynamic routing, lane dropout and a
//                   reconstruction decoder
//
//   loss.rs       — margin loss + weighted reconstruction MSE
//
//   trainer.rs    — LaneCapsTrainer: one Adam step per batch,
//                   per-epoch validation, full-state save/load
//
//   evaluator.rs  — rebuilds exported weights and scores them
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Sabour et al. (2017) Dynamic Routing Between Capsules

/// Multi-lane capsule network architecture
pub mod model;

/// CapsNet loss functions
pub mod loss;

/// TrainableModel implementation over Burn + Adam
pub mod trainer;

/// Scores exported weights on a dataset
pub mod evaluator;
