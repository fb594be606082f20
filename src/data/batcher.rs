// ============================================================
// Layer 4 — Image Batcher
// ============================================================
// Implements Burn's Batcher trait to turn a Vec<ImageSample>
// into tensors:
//
//   images   [N, C, H, W]   float, pixels in [0, 1]
//   targets  [N, K]         float one-hot (margin loss, masking)
//   labels   [N]            int class ids (accuracy)
//
// Every sample already has the same shape, so the pixels are
// flattened into one Vec and reshaped once.
//
// Reference: Burn Book §4 (Batcher)

use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::data::dataset::{ImageSample, ImageShape};

#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 2>,
    pub labels: Tensor<B, 1, Int>,
}

#[derive(Clone, Debug)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
    shape: ImageShape,
    num_classes: usize,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device, shape: ImageShape, num_classes: usize) -> Self {
        Self { device, shape, num_classes }
    }
}

impl<B: Backend> Batcher<ImageSample, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageSample>) -> ImageBatch<B> {
        let n = items.len();
        let ImageShape { channels, height, width } = self.shape;

        let pixels: Vec<f32> = items.iter().flat_map(|s| s.pixels.iter().copied()).collect();

        let mut one_hot = vec![0.0f32; n * self.num_classes];
        for (row, sample) in items.iter().enumerate() {
            if sample.label < self.num_classes {
                one_hot[row * self.num_classes + sample.label] = 1.0;
            }
        }

        let labels: Vec<i32> = items.iter().map(|s| s.label as i32).collect();

        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), &self.device)
            .reshape([n, channels, height, width]);
        let targets = Tensor::<B, 1>::from_floats(one_hot.as_slice(), &self.device)
            .reshape([n, self.num_classes]);
        let labels = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), &self.device);

        ImageBatch { images, targets, labels }
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_batch_shapes_and_one_hot() {
        let batcher = ImageBatcher::<TestBackend>::new(Default::default(), ImageShape::new(1, 2, 2), 3);
        let items = vec![
            ImageSample { pixels: vec![0.0, 0.25, 0.5, 1.0], label: 2 },
            ImageSample { pixels: vec![1.0; 4], label: 0 },
        ];
        let batch = batcher.batch(items);

        assert_eq!(batch.images.dims(), [2, 1, 2, 2]);
        assert_eq!(batch.targets.dims(), [2, 3]);
        let one_hot = batch.targets.into_data().to_vec::<f32>().unwrap();
        assert_eq!(one_hot, vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);

        let labels: Vec<i64> = batch
            .labels
            .into_data()
            .iter::<i64>()
            .collect();
        assert_eq!(labels, vec![2, 0]);
    }
}
