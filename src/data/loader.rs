// ============================================================
// Layer 4 — Dataset Loader
// ============================================================
// Reads the standard binary distributions of the supported
// datasets from `--data-dir` (no downloading):
//
//   MNIST / Fashion-MNIST (IDX, big-endian header)
//     train-images-idx3-ubyte   magic 0x00000803, n, rows, cols
//     train-labels-idx1-ubyte   magic 0x00000801, n
//     t10k-images-idx3-ubyte
//     t10k-labels-idx1-ubyte
//
//   CIFAR-10 binary           <label:1><pixels:3072> per record
//     data_batch_1.bin .. data_batch_5.bin, test_batch.bin
//
//   CIFAR-100 binary          <coarse:1><fine:1><pixels:3072>
//     train.bin, test.bin     (the fine label is used)
//
// CIFAR pixels are already stored channel-major (R, G, B planes),
// which is the layout ImageSample expects. All pixels are scaled
// from bytes to [0, 1].

use anyhow::{bail, Context, Result};
use std::{fs, path::Path};

use crate::data::{
    dataset::{DatasetKind, ImageDataset, ImageSample, ImageShape},
    synthetic::SyntheticSpec,
};

const IDX_IMAGES_MAGIC: u32 = 0x0000_0803;
const IDX_LABELS_MAGIC: u32 = 0x0000_0801;
const CIFAR_PIXELS: usize = 3 * 32 * 32;

/// Train and test splits of one dataset.
pub struct DataSplits {
    pub train: ImageDataset,
    pub test: ImageDataset,
}

/// Load `kind` from `data_dir` (ignored for the synthetic set).
pub fn load_dataset(kind: DatasetKind, data_dir: &Path, seed: u64) -> Result<DataSplits> {
    tracing::info!("Loading {:?} from '{}'", kind, data_dir.display());
    let splits = match kind {
        DatasetKind::Mnist | DatasetKind::Fashion => DataSplits {
            train: load_idx_pair(data_dir, "train", 10)?,
            test: load_idx_pair(data_dir, "t10k", 10)?,
        },
        DatasetKind::Cifar10 => {
            let train_files: Vec<String> =
                (1..=5).map(|i| format!("data_batch_{i}.bin")).collect();
            DataSplits {
                train: load_cifar(data_dir, &train_files, 1, 10)?,
                test: load_cifar(data_dir, &["test_batch.bin".to_string()], 1, 10)?,
            }
        }
        DatasetKind::Cifar100 => DataSplits {
            train: load_cifar(data_dir, &["train.bin".to_string()], 2, 100)?,
            test: load_cifar(data_dir, &["test.bin".to_string()], 2, 100)?,
        },
        DatasetKind::Synthetic => SyntheticSpec::default().generate(seed),
    };
    tracing::info!(
        "Loaded {} training and {} test images of shape {:?}",
        splits.train.samples().len(),
        splits.test.samples().len(),
        splits.train.shape()
    );
    Ok(splits)
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Cannot read dataset file '{}'", path.display()))
}

fn be_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let b = bytes.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Parse an IDX3 image file into (rows, cols, pixel bytes per image).
pub fn parse_idx_images(bytes: &[u8]) -> Result<(usize, usize, Vec<&[u8]>)> {
    let header = (be_u32(bytes, 0), be_u32(bytes, 4), be_u32(bytes, 8), be_u32(bytes, 12));
    let (Some(magic), Some(n), Some(rows), Some(cols)) = header else {
        bail!("IDX image file is shorter than its header");
    };
    if magic != IDX_IMAGES_MAGIC {
        bail!("bad IDX image magic {magic:#010x}");
    }
    let (n, rows, cols) = (n as usize, rows as usize, cols as usize);
    if rows == 0 || cols == 0 {
        bail!("IDX image file declares empty {rows}x{cols} images");
    }
    let body = &bytes[16..];
    if body.len() < n * rows * cols {
        bail!("IDX image file holds {} bytes, header promises {}", body.len(), n * rows * cols);
    }
    let images = body.chunks_exact(rows * cols).take(n).collect();
    Ok((rows, cols, images))
}

/// Parse an IDX1 label file.
pub fn parse_idx_labels(bytes: &[u8]) -> Result<&[u8]> {
    let (Some(magic), Some(n)) = (be_u32(bytes, 0), be_u32(bytes, 4)) else {
        bail!("IDX label file is shorter than its header");
    };
    if magic != IDX_LABELS_MAGIC {
        bail!("bad IDX label magic {magic:#010x}");
    }
    bytes
        .get(8..8 + n as usize)
        .context("IDX label file is shorter than its header promises")
}

fn load_idx_pair(dir: &Path, prefix: &str, num_classes: usize) -> Result<ImageDataset> {
    let image_bytes = read_file(&dir.join(format!("{prefix}-images-idx3-ubyte")))?;
    let label_bytes = read_file(&dir.join(format!("{prefix}-labels-idx1-ubyte")))?;
    let (rows, cols, images) = parse_idx_images(&image_bytes)?;
    let labels = parse_idx_labels(&label_bytes)?;
    if images.len() != labels.len() {
        bail!("{} images but {} labels in '{}'", images.len(), labels.len(), dir.display());
    }

    let samples = images
        .into_iter()
        .zip(labels)
        .map(|(img, &label)| ImageSample { pixels: scale(img), label: label as usize })
        .collect();
    Ok(ImageDataset::new(ImageShape::new(1, rows, cols), num_classes, samples))
}

/// Parse CIFAR binary records; `label_bytes` is 1 (CIFAR-10) or 2 (CIFAR-100).
pub fn parse_cifar(bytes: &[u8], label_bytes: usize) -> Result<Vec<ImageSample>> {
    let record = label_bytes + CIFAR_PIXELS;
    if bytes.len() % record != 0 {
        bail!("CIFAR file size {} is not a multiple of {record}", bytes.len());
    }
    Ok(bytes
        .chunks_exact(record)
        .map(|r| ImageSample {
            label: r[label_bytes - 1] as usize,
            pixels: scale(&r[label_bytes..]),
        })
        .collect())
}

fn load_cifar(dir: &Path, files: &[String], label_bytes: usize, num_classes: usize)
    -> Result<ImageDataset> {
    let mut samples = Vec::new();
    for file in files {
        samples.extend(parse_cifar(&read_file(&dir.join(file))?, label_bytes)?);
    }
    Ok(ImageDataset::new(ImageShape::new(3, 32, 32), num_classes, samples))
}

fn scale(bytes: &[u8]) -> Vec<f32> {
    bytes.iter().map(|&b| b as f32 / 255.0).collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn idx_images(images: &[[u8; 4]]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(IDX_IMAGES_MAGIC.to_be_bytes());
        bytes.extend((images.len() as u32).to_be_bytes());
        bytes.extend(2u32.to_be_bytes());
        bytes.extend(2u32.to_be_bytes());
        for img in images {
            bytes.extend(img);
        }
        bytes
    }

    fn idx_labels(labels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(IDX_LABELS_MAGIC.to_be_bytes());
        bytes.extend((labels.len() as u32).to_be_bytes());
        bytes.extend(labels);
        bytes
    }

    #[test]
    fn test_parse_idx_images() {
        let bytes = idx_images(&[[0, 255, 0, 255], [1, 2, 3, 4]]);
        let (rows, cols, images) = parse_idx_images(&bytes).unwrap();
        assert_eq!((rows, cols), (2, 2));
        assert_eq!(images.len(), 2);
        assert_eq!(images[1], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_idx_rejects_wrong_magic() {
        let mut bytes = idx_labels(&[1, 2]);
        bytes[3] = 0x99;
        assert!(parse_idx_labels(&bytes).is_err());
        assert!(parse_idx_images(&bytes).is_err());
    }

    #[test]
    fn test_idx_truncated_body() {
        let mut bytes = idx_images(&[[0; 4], [0; 4]]);
        bytes.truncate(bytes.len() - 1);
        assert!(parse_idx_images(&bytes).is_err());
    }

    #[test]
    fn test_load_mnist_layout_from_dir() {
        let dir = tempdir().unwrap();
        for prefix in ["train", "t10k"] {
            fs::write(
                dir.path().join(format!("{prefix}-images-idx3-ubyte")),
                idx_images(&[[0, 255, 0, 255], [255; 4], [0; 4]]),
            )
            .unwrap();
            fs::write(dir.path().join(format!("{prefix}-labels-idx1-ubyte")), idx_labels(&[7, 1, 0]))
                .unwrap();
        }

        let splits = load_dataset(DatasetKind::Mnist, dir.path(), 0).unwrap();
        assert_eq!(splits.train.shape(), ImageShape::new(1, 2, 2));
        assert_eq!(splits.train.samples().len(), 3);
        assert_eq!(splits.test.samples()[0].label, 7);
        assert_eq!(splits.train.samples()[0].pixels, vec![0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_parse_cifar100_uses_fine_label() {
        let mut bytes = vec![3u8, 42u8];
        bytes.extend(std::iter::repeat(255u8).take(CIFAR_PIXELS));
        let samples = parse_cifar(&bytes, 2).unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].label, 42);
        assert_eq!(samples[0].pixels.len(), CIFAR_PIXELS);
        assert_eq!(samples[0].pixels[0], 1.0);
    }

    #[test]
    fn test_cifar_partial_record_is_error() {
        let bytes = vec![0u8; CIFAR_PIXELS];
        assert!(parse_cifar(&bytes, 1).is_err());
    }

    #[test]
    fn test_missing_files_name_the_path() {
        let dir = tempdir().unwrap();
        let err = load_dataset(DatasetKind::Cifar10, dir.path(), 0).err().unwrap();
        assert!(format!("{err:#}").contains("data_batch_1.bin"));
    }
}
