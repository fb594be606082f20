// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates the other layers to accomplish one
// goal (training a node, or scoring trained weights).
//
// Rules for this layer:
//   - No model math here (that's Layer 5 - ml)
//   - No printing here (that's Layer 1)
//   - No file formats here (that's Layer 4 and 6)
//   - Only workflow coordination
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// One node's training run, from cluster descriptor to export
pub mod train_use_case;

// Scores exported weights on the test split
pub mod evaluate_use_case;
