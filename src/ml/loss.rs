// ============================================================
// Layer 5 — CapsNet Losses
// ============================================================
// Margin loss on capsule lengths, per sample summed over classes
// and averaged over the batch:
//
//   L = T·max(0, m⁺ − |v|)² + λ·(1 − T)·max(0, |v| − m⁻)²
//
// plus a mean-squared reconstruction term, weighted by lam_recon:
//
//   total = margin + lam_recon · mean((x − x̂)²)

use burn::{prelude::*, tensor::activation::relu};

pub const M_PLUS: f64 = 0.9;
pub const M_MINUS: f64 = 0.1;
pub const LAMBDA: f64 = 0.5;

/// lengths, targets: [B, K] → scalar [1]
pub fn margin_loss<B: Backend>(lengths: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let present = relu(lengths.clone().neg() + M_PLUS).powf_scalar(2.0);
    let absent = relu(lengths - M_MINUS).powf_scalar(2.0);
    let per_class = targets.clone() * present + (targets.neg() + 1.0) * absent * LAMBDA;
    per_class.sum_dim(1).mean()
}

pub fn reconstruction_loss<B: Backend>(images: Tensor<B, 4>, reconstruction: Tensor<B, 4>) -> Tensor<B, 1> {
    (images - reconstruction).powf_scalar(2.0).mean()
}

pub fn total_loss<B: Backend>(
    lengths:        Tensor<B, 2>,
    targets:        Tensor<B, 2>,
    images:         Tensor<B, 4>,
    reconstruction: Tensor<B, 4>,
    lam_recon:      f64,
) -> Tensor<B, 1> {
    margin_loss(lengths, targets) + reconstruction_loss(images, reconstruction) * lam_recon
}

/// Number of rows whose longest capsule is the labelled class.
pub fn correct_predictions<B: Backend>(lengths: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> usize {
    let predicted = lengths.argmax(1).flatten::<1>(0, 1);
    predicted.equal(labels).int().sum().into_scalar().elem::<i64>() as usize
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn scalar(t: Tensor<TestBackend, 1>) -> f64 {
        t.into_scalar().elem::<f64>()
    }

    #[test]
    fn test_confident_correct_prediction_has_zero_margin_loss() {
        let device = Default::default();
        let lengths = Tensor::<TestBackend, 2>::from_floats([[0.95, 0.05, 0.0]], &device);
        let targets = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0, 0.0]], &device);
        assert!(scalar(margin_loss(lengths, targets)).abs() < 1e-7);
    }

    #[test]
    fn test_margin_loss_value() {
        let device = Default::default();
        // present: (0.9 - 0.5)² = 0.16; absent: 0.5 · (0.5 - 0.1)² = 0.08
        let lengths = Tensor::<TestBackend, 2>::from_floats([[0.5, 0.5], [0.5, 0.5]], &device);
        let targets = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0], [0.0, 1.0]], &device);
        assert!((scalar(margin_loss(lengths, targets)) - 0.24).abs() < 1e-6);
    }

    #[test]
    fn test_total_loss_weights_reconstruction() {
        let device = Default::default();
        let lengths = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0]], &device);
        let targets = Tensor::<TestBackend, 2>::from_floats([[1.0, 0.0]], &device);
        let images = Tensor::<TestBackend, 4>::ones([1, 1, 2, 2], &device);
        let recon = Tensor::<TestBackend, 4>::zeros([1, 1, 2, 2], &device);

        let loss = total_loss(lengths, targets, images, recon, 0.392);
        assert!((scalar(loss) - 0.392).abs() < 1e-6);
    }

    #[test]
    fn test_correct_predictions() {
        let device = Default::default();
        let lengths = Tensor::<TestBackend, 2>::from_floats([[0.1, 0.9], [0.8, 0.2], [0.3, 0.4]], &device);
        let labels = Tensor::<TestBackend, 1, Int>::from_ints([1, 1, 1], &device);
        assert_eq!(correct_predictions(lengths, labels), 2);
    }
}
