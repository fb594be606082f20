// ============================================================
// Layer 4 — Data Pipeline
// ============================================================
// From files on disk to tensor batches for one worker:
//
//   dataset files / seed
//       │
//       ▼
//   loader / synthetic   → train + test ImageDataset
//       │
//       ▼
//   sharding             → this worker's slice, per-epoch order
//       │
//       ▼
//   ImageBatcher         → [N, C, H, W] images, one-hot targets
//
// Reference: Burn Book §4 (Datasets and Dataloaders)

/// Reads MNIST-style IDX and CIFAR binary files
pub mod loader;

/// Seeded synthetic images for runs without dataset files
pub mod synthetic;

/// Implements Burn's Dataset trait for labelled images
pub mod dataset;

/// Implements Burn's Batcher trait to create tensor batches
pub mod batcher;

/// Per-worker sharding and seeded epoch shuffles
pub mod sharding;
