// ============================================================
// Layer 4 — Worker Sharding + Epoch Order
// ============================================================
// Splits the training set across workers and decides the order
// each worker visits its shard in:
//
//   shard of worker w  = samples i with i % num_workers == w
//   order of epoch e   = Fisher-Yates shuffle seeded by (seed, e)
//
// Seeding the shuffle by epoch (not by a running RNG) means a
// resumed run sees exactly the order an uninterrupted run would.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::data::dataset::ImageDataset;

/// The part of `dataset` assigned to `node_index` of `num_workers`.
pub fn shard_for_worker(dataset: ImageDataset, num_workers: usize, node_index: usize) -> ImageDataset {
    let workers = num_workers.max(1);
    let total = dataset.samples().len();
    let shard = dataset.retain_indices(|i| i % workers == node_index);
    tracing::info!(
        "Node {} takes {} of {} training samples ({} worker(s))",
        node_index,
        shard.samples().len(),
        total,
        workers
    );
    shard
}

/// Visiting order of `len` samples in `epoch`.
pub fn epoch_order(len: usize, seed: u64, epoch: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    let mut rng = StdRng::seed_from_u64(seed ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    order.shuffle(&mut rng);
    order
}
