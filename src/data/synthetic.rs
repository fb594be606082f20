// ============================================================
// Layer 4 — Synthetic Dataset
// ============================================================
// A learnable stand-in for the real datasets, generated from the
// run seed so every node builds exactly the same images.
//
// Class k is a bright square whose position walks along the
// image diagonal with k, over uniform background noise:
//
//   k = 0          k = 1          k = 2
//   ██░░░░░░       ░░██░░░░       ░░░░██░░
//   ██░░░░░░       ░░██░░░░       ░░░░██░░
//   ░░░░░░░░       ░░░░░░░░       ░░░░░░░░

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::data::{
    dataset::{ImageDataset, ImageSample, ImageShape},
    loader::DataSplits,
};

#[derive(Debug, Clone, Copy)]
pub struct SyntheticSpec {
    pub shape: ImageShape,
    pub num_classes: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    /// Upper bound of the background noise.
    pub noise: f32,
}

impl Default for SyntheticSpec {
    fn default() -> Self {
        Self {
            shape: ImageShape::new(1, 28, 28),
            num_classes: 10,
            train_samples: 1024,
            test_samples: 256,
            noise: 0.2,
        }
    }
}

impl SyntheticSpec {
    pub fn generate(&self, seed: u64) -> DataSplits {
        let mut rng = StdRng::seed_from_u64(seed);
        DataSplits {
            train: self.split(&mut rng, self.train_samples),
            test: self.split(&mut rng, self.test_samples),
        }
    }

    fn split(&self, rng: &mut StdRng, n: usize) -> ImageDataset {
        let samples = (0..n)
            .map(|_| {
                let label = rng.gen_range(0..self.num_classes.max(1));
                ImageSample { pixels: self.draw(rng, label), label }
            })
            .collect();
        ImageDataset::new(self.shape, self.num_classes, samples)
    }

    fn draw(&self, rng: &mut StdRng, label: usize) -> Vec<f32> {
        let ImageShape { channels, height, width } = self.shape;
        let side = (height.min(width) / 4).max(1);
        let span = height.min(width).saturating_sub(side);
        let offset = if self.num_classes > 1 {
            label * span / (self.num_classes - 1)
        } else {
            0
        };

        let mut pixels = Vec::with_capacity(self.shape.pixels());
        for _ in 0..channels {
            for row in 0..height {
                for col in 0..width {
                    let inside = (offset..offset + side).contains(&row)
                        && (offset..offset + side).contains(&col);
                    pixels.push(if inside { 1.0 } else { rng.gen_range(0.0..=self.noise) });
                }
            }
        }
        pixels
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SyntheticSpec {
        SyntheticSpec {
            shape: ImageShape::new(1, 8, 8),
            num_classes: 3,
            train_samples: 20,
            test_samples: 5,
            noise: 0.1,
        }
    }

    #[test]
    fn test_same_seed_same_data() {
        let a = small().generate(7);
        let b = small().generate(7);
        assert_eq!(a.train.samples(), b.train.samples());
        assert_eq!(a.test.samples(), b.test.samples());
    }

    #[test]
    fn test_sizes_and_ranges() {
        let splits = small().generate(1);
        assert_eq!(splits.train.samples().len(), 20);
        assert_eq!(splits.test.samples().len(), 5);
        for s in splits.train.samples() {
            assert_eq!(s.pixels.len(), 64);
            assert!(s.label < 3);
            assert!(s.pixels.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }

    #[test]
    fn test_class_square_position() {
        let spec = small();
        let mut rng = StdRng::seed_from_u64(0);
        // side = 2, span = 6; class 2 → offset 6
        let pixels = spec.draw(&mut rng, 2);
        assert_eq!(pixels[6 * 8 + 6], 1.0);
        assert_eq!(pixels[7 * 8 + 7], 1.0);
        assert!(pixels[0] <= 0.1);
    }
}
