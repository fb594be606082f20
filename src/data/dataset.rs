// ============================================================
// Layer 4 — Image Dataset
// ============================================================
// In-memory labelled images, channels-first, pixels in [0, 1].
//
//   ImageSample.pixels layout: [channel][row][col], flattened
//
// ImageDataset implements Burn's Dataset trait so the batcher
// (and anything else in the Burn ecosystem) can index into it.

use burn::data::dataset::Dataset;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which dataset to train on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetKind {
    /// MNIST handwritten digits (IDX files)
    Mnist,
    /// Fashion-MNIST (IDX files, same layout as MNIST)
    Fashion,
    /// CIFAR-10 binary version
    Cifar10,
    /// CIFAR-100 binary version (fine labels)
    Cifar100,
    /// Generated in memory from the run seed; needs no files
    Synthetic,
}

/// Image geometry, channels first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self { channels, height, width }
    }

    pub fn pixels(&self) -> usize {
        self.channels * self.height * self.width
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageSample {
    pub pixels: Vec<f32>,
    pub label: usize,
}

#[derive(Debug, Clone)]
pub struct ImageDataset {
    shape: ImageShape,
    num_classes: usize,
    samples: Vec<ImageSample>,
}

impl ImageDataset {
    pub fn new(shape: ImageShape, num_classes: usize, samples: Vec<ImageSample>) -> Self {
        Self { shape, num_classes, samples }
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    /// Keep only the samples whose index satisfies `keep`.
    pub fn retain_indices(self, mut keep: impl FnMut(usize) -> bool) -> Self {
        let samples = self
            .samples
            .into_iter()
            .enumerate()
            .filter(|(i, _)| keep(*i))
            .map(|(_, s)| s)
            .collect();
        Self { samples, ..self }
    }
}

impl Dataset<ImageSample> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageSample> {
        self.samples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}
