// ============================================================
// Layer 5 — Multi-Lane Capsule Network
// ============================================================
// Each lane is an independent CapsNet producing ONE capsule whose
// dimension equals the number of classes. Stacking the lanes and
// transposing gives, per class, a vector with one entry per lane:
//
//   image [B, C, H, W]
//     └─ lane ×L:  conv 9×9 relu → PrimaryCaps (6×6, stride 2)
//                  [→ conv 9×9 relu → PrimaryCaps (6×6, stride 3)]×(depth-1)
//                  → CapsuleLayer (1 capsule, dim K, dynamic routing)
//                  = [B, 1, K]
//   cat lanes → [B, L, K] → swap → digit caps [B, K, L]
//   lane dropout (whole lanes, training only)
//   length over L → class scores [B, K]
//
//   decoder: mask digit caps by the one-hot target (or the longest
//            capsule at inference) → 512 relu → 1024 relu →
//            C·H·W sigmoid → [B, C, H, W]
//
// Reference: Sabour et al. (2017) Dynamic Routing Between Capsules

use anyhow::{bail, Result};
use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Linear, LinearConfig,
    },
    prelude::*,
    tensor::{
        activation::{relu, sigmoid, softmax},
        Distribution,
    },
};

const CONV_KERNEL: usize = 9;
const PRIMARY_KERNEL: usize = 6;
const PRIMARY_DIM: usize = 16;
const FILTERS_PER_LANE_UNIT: usize = 16;
const EPSILON: f64 = 1e-7;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize.
#[derive(Config, Debug)]
pub struct LaneCapsNetConfig {
    pub channels:    usize,
    pub height:      usize,
    pub width:       usize,
    pub num_classes: usize,
    #[config(default = 16)]
    pub num_lanes:   usize,
    #[config(default = 8)]
    pub lane_size:   usize,
    #[config(default = 1)]
    pub lane_depth:  usize,
    #[config(default = 3)]
    pub routings:    usize,
    /// Probability of dropping a whole lane per batch.
    #[config(default = 0.0)]
    pub dropout:     f64,
}

/// Output size of a valid (unpadded) convolution, if the input is large enough.
fn conv_out(size: usize, kernel: usize, stride: usize) -> Option<usize> {
    (size >= kernel).then(|| (size - kernel) / stride + 1)
}

impl LaneCapsNetConfig {
    fn primary_channels(&self) -> usize {
        self.lane_size * 2
    }

    fn filters(&self) -> usize {
        self.lane_size * FILTERS_PER_LANE_UNIT
    }

    /// Primary capsules per lane per stage, or `None` when the input is
    /// too small for the requested depth.
    pub fn primary_caps_per_stage(&self) -> Option<Vec<usize>> {
        let h = conv_out(conv_out(self.height, CONV_KERNEL, 1)?, PRIMARY_KERNEL, 2)?;
        let w = conv_out(conv_out(self.width, CONV_KERNEL, 1)?, PRIMARY_KERNEL, 2)?;
        let mut stages = vec![self.primary_channels() * h * w];

        for _ in 1..self.lane_depth.max(1) {
            // The previous stage's capsules are read as a 1-channel N×16 image
            let previous = *stages.last()?;
            let h = conv_out(conv_out(previous, CONV_KERNEL, 1)?, PRIMARY_KERNEL, 3)?;
            let w = conv_out(conv_out(PRIMARY_DIM, CONV_KERNEL, 1)?, PRIMARY_KERNEL, 3)?;
            stages.push(self.primary_channels() * h * w);
        }
        Some(stages)
    }

    /// Check the hyperparameters describe a buildable network.
    pub fn validate(&self) -> Result<()> {
        if self.num_lanes == 0 || self.lane_size == 0 || self.num_classes == 0 {
            bail!("num_lanes, lane_size and the class count must all be positive");
        }
        if !(0.0..1.0).contains(&self.dropout) {
            bail!("lane dropout {} must be in [0, 1)", self.dropout);
        }
        if self.primary_caps_per_stage().is_none() {
            bail!(
                "{}x{} images are too small for lane depth {}",
                self.height,
                self.width,
                self.lane_depth
            );
        }
        Ok(())
    }

    /// Whether two configs describe the same parameter layout (dropout
    /// is a training setting and may differ).
    pub fn same_architecture(&self, other: &Self) -> bool {
        (self.channels, self.height, self.width, self.num_classes)
            == (other.channels, other.height, other.width, other.num_classes)
            && (self.num_lanes, self.lane_size, self.lane_depth, self.routings)
                == (other.num_lanes, other.lane_size, other.lane_depth, other.routings)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<LaneCapsNet<B>> {
        self.validate()?;
        let stages = self.primary_caps_per_stage().unwrap_or_default();
        let lanes = (0..self.num_lanes).map(|_| self.build_lane(&stages, device)).collect();

        let pixels = self.channels * self.height * self.width;
        let decoder = Decoder {
            fc1: LinearConfig::new(self.num_classes * self.num_lanes, 512).init(device),
            fc2: LinearConfig::new(512, 1024).init(device),
            fc3: LinearConfig::new(1024, pixels).init(device),
        };

        Ok(LaneCapsNet {
            lanes,
            decoder,
            num_classes: self.num_classes,
            channels:    self.channels,
            height:      self.height,
            width:       self.width,
            dropout:     self.dropout,
        })
    }

    fn build_lane<B: Backend>(&self, stages: &[usize], device: &B::Device) -> Lane<B> {
        let stage_modules = (0..stages.len())
            .map(|i| {
                let (in_channels, stride) = if i == 0 { (self.channels, 2) } else { (1, 3) };
                LaneStage {
                    conv: Conv2dConfig::new([in_channels, self.filters()], [CONV_KERNEL, CONV_KERNEL])
                        .init(device),
                    primary: PrimaryCaps {
                        conv: Conv2dConfig::new(
                            [self.filters(), self.primary_channels() * PRIMARY_DIM],
                            [PRIMARY_KERNEL, PRIMARY_KERNEL],
                        )
                        .with_stride([stride, stride])
                        .init(device),
                        n_channels: self.primary_channels(),
                    },
                }
            })
            .collect();

        let input_caps: usize = stages.iter().sum();
        Lane {
            stages: stage_modules,
            capsules: CapsuleLayer::new(1, input_caps, self.num_classes, PRIMARY_DIM, self.routings, device),
        }
    }
}

/// v = |s|² / (1 + |s|²) · s / |s|, along `dim`.
pub fn squash<B: Backend, const D: usize>(s: Tensor<B, D>, dim: usize) -> Tensor<B, D> {
    let squared_norm = s.clone().powf_scalar(2.0).sum_dim(dim);
    let scale = squared_norm.clone() / (squared_norm.clone() + 1.0) / (squared_norm + EPSILON).sqrt();
    s * scale
}

// ─── PrimaryCaps ──────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct PrimaryCaps<B: Backend> {
    conv:       Conv2d<B>,
    n_channels: usize,
}

impl<B: Backend> PrimaryCaps<B> {
    /// [B, F, H, W] → [B, n_channels·H'·W', 16], squashed.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 3> {
        let out = self.conv.forward(x);
        let [batch, _, h, w] = out.dims();
        let caps = out
            .reshape([batch, self.n_channels, PRIMARY_DIM, h * w])
            .swap_dims(2, 3)
            .reshape([batch, self.n_channels * h * w, PRIMARY_DIM]);
        squash(caps, 2)
    }
}

// ─── CapsuleLayer ─────────────────────────────────────────────────────────────
/// Fully connected capsule layer with routing-by-agreement.
#[derive(Module, Debug)]
pub struct CapsuleLayer<B: Backend> {
    /// [out_caps, in_caps, out_dim, in_dim]
    weight:   Param<Tensor<B, 4>>,
    routings: usize,
}

impl<B: Backend> CapsuleLayer<B> {
    pub fn new(
        out_caps: usize,
        in_caps:  usize,
        out_dim:  usize,
        in_dim:   usize,
        routings: usize,
        device:   &B::Device,
    ) -> Self {
        // Glorot-uniform bound over the per-capsule transform
        let limit = (6.0 / (in_dim + out_dim) as f64).sqrt();
        let weight = Tensor::random(
            [out_caps, in_caps, out_dim, in_dim],
            Distribution::Uniform(-limit, limit),
            device,
        );
        Self { weight: Param::from_tensor(weight), routings: routings.max(1) }
    }

    /// u [B, N, in_dim] → v [B, out_caps, out_dim]
    pub fn forward(&self, u: Tensor<B, 3>) -> Tensor<B, 3> {
        let [batch, in_caps, in_dim] = u.dims();
        let [out_caps, _, out_dim, _] = self.weight.val().dims();
        let full = [batch, out_caps, in_caps, out_dim, in_dim];

        // û[b, j, i] = W[j, i] · u[b, i]
        let w = self.weight.val().unsqueeze_dim::<5>(0).expand(full);
        let u = u.reshape([batch, 1, in_caps, 1, in_dim]).expand(full);
        let u_hat = (w * u).sum_dim(4).reshape([batch, out_caps, in_caps, out_dim]);

        // Intermediate rounds only update the logits; keep them off the graph
        let u_hat_detached = u_hat.clone().detach();
        let mut logits = Tensor::<B, 3>::zeros([batch, out_caps, in_caps], &u_hat.device());
        for _ in 1..self.routings {
            let v = Self::route(logits.clone(), u_hat_detached.clone());
            let agreement = (v * u_hat_detached.clone())
                .sum_dim(3)
                .reshape([batch, out_caps, in_caps]);
            logits = logits + agreement;
        }
        Self::route(logits, u_hat).reshape([batch, out_caps, out_dim])
    }

    /// One routing round: couple, sum, squash → [B, out_caps, 1, out_dim].
    fn route(logits: Tensor<B, 3>, u_hat: Tensor<B, 4>) -> Tensor<B, 4> {
        let coupling = softmax(logits, 1).unsqueeze_dim::<4>(3);
        squash((coupling * u_hat).sum_dim(2), 3)
    }
}

// ─── Lane ─────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct LaneStage<B: Backend> {
    conv:    Conv2d<B>,
    primary: PrimaryCaps<B>,
}

#[derive(Module, Debug)]
pub struct Lane<B: Backend> {
    stages:   Vec<LaneStage<B>>,
    capsules: CapsuleLayer<B>,
}

impl<B: Backend> Lane<B> {
    /// [B, C, H, W] → [B, 1, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 3> {
        let mut primaries: Vec<Tensor<B, 3>> = Vec::with_capacity(self.stages.len());
        for (i, stage) in self.stages.iter().enumerate() {
            let input = match primaries.last() {
                Some(previous) if i > 0 => previous.clone().unsqueeze_dim::<4>(1),
                _ => x.clone(),
            };
            primaries.push(stage.primary.forward(relu(stage.conv.forward(input))));
        }
        self.capsules.forward(Tensor::cat(primaries, 1))
    }
}

// ─── Decoder ──────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
}

impl<B: Backend> Decoder<B> {
    pub fn forward(&self, masked: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = relu(self.fc1.forward(masked));
        let x = relu(self.fc2.forward(x));
        sigmoid(self.fc3.forward(x))
    }
}

// ─── LaneCapsNet ──────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct LaneCapsNet<B: Backend> {
    lanes:       Vec<Lane<B>>,
    decoder:     Decoder<B>,
    num_classes: usize,
    channels:    usize,
    height:      usize,
    width:       usize,
    dropout:     f64,
}

pub struct CapsOutput<B: Backend> {
    /// Capsule length per class, [B, K].
    pub lengths:        Tensor<B, 2>,
    /// Decoder output, [B, C, H, W].
    pub reconstruction: Tensor<B, 4>,
}

impl<B: Backend> LaneCapsNet<B> {
    /// `targets` (one-hot) masks the decoder input during training; without
    /// them the longest capsule is used. Lane dropout only applies when
    /// `training` is set.
    pub fn forward(&self, images: Tensor<B, 4>, targets: Option<Tensor<B, 2>>, training: bool) -> CapsOutput<B> {
        let [batch, _, _, _] = images.dims();
        let num_lanes = self.lanes.len();
        let device = images.device();

        let lane_caps: Vec<Tensor<B, 3>> = self.lanes.iter().map(|l| l.forward(images.clone())).collect();
        let digit_caps = Tensor::cat(lane_caps, 1).swap_dims(1, 2); // [B, K, L]

        let scored = if training && self.dropout > 0.0 {
            let keep = 1.0 - self.dropout;
            let mask = Tensor::<B, 3>::random([1, 1, num_lanes], Distribution::Bernoulli(keep), &device);
            digit_caps.clone() * mask / keep
        } else {
            digit_caps.clone()
        };

        let lengths = (scored.powf_scalar(2.0).sum_dim(2) + EPSILON)
            .sqrt()
            .reshape([batch, self.num_classes]);

        let mask = targets.unwrap_or_else(|| {
            let longest = lengths.clone().max_dim(1).expand([batch, self.num_classes]);
            lengths.clone().greater_equal(longest).float()
        });
        let masked = (digit_caps * mask.unsqueeze_dim::<3>(2)).reshape([batch, self.num_classes * num_lanes]);
        let reconstruction = self
            .decoder
            .forward(masked)
            .reshape([batch, self.channels, self.height, self.width]);

        CapsOutput { lengths, reconstruction }
    }

    pub fn num_lanes(&self) -> usize {
        self.lanes.len()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn tiny_config() -> LaneCapsNetConfig {
        LaneCapsNetConfig::new(1, 20, 20, 3)
            .with_num_lanes(2)
            .with_lane_size(1)
            .with_routings(2)
    }

    #[test]
    fn test_primary_caps_counts() {
        // 28 → 20 → 8 per side, 16 primary channels
        let mnist = LaneCapsNetConfig::new(1, 28, 28, 10);
        assert_eq!(mnist.primary_caps_per_stage(), Some(vec![1024]));

        // Second stage reads 1024×16: 1016 → 337 rows, 8 → 1 column
        let deep = LaneCapsNetConfig::new(1, 28, 28, 10).with_lane_depth(2);
        assert_eq!(deep.primary_caps_per_stage(), Some(vec![1024, 16 * 337]));

        let cifar = LaneCapsNetConfig::new(3, 32, 32, 10).with_lane_size(1);
        assert_eq!(cifar.primary_caps_per_stage(), Some(vec![2 * 10 * 10]));
    }

    #[test]
    fn test_too_small_images_are_rejected() {
        let cfg = LaneCapsNetConfig::new(1, 12, 12, 10);
        assert_eq!(cfg.primary_caps_per_stage(), None);
        assert!(cfg.validate().is_err());
        assert!(LaneCapsNetConfig::new(1, 28, 28, 10).with_dropout(1.0).validate().is_err());
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let model = tiny_config().init::<TestBackend>(&device).unwrap();
        assert_eq!(model.num_lanes(), 2);

        let images = Tensor::<TestBackend, 4>::random([2, 1, 20, 20], Distribution::Default, &device);
        let out = model.forward(images, None, false);
        assert_eq!(out.lengths.dims(), [2, 3]);
        assert_eq!(out.reconstruction.dims(), [2, 1, 20, 20]);

        // Two lanes of squashed vectors: every length is below √2
        let lengths = out.lengths.into_data().to_vec::<f32>().unwrap();
        assert!(lengths.iter().all(|&l| (0.0..1.5).contains(&l)));
        let recon = out.reconstruction.into_data().to_vec::<f32>().unwrap();
        assert!(recon.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn test_squash_keeps_direction_and_bounds_length() {
        let device = Default::default();
        let s = Tensor::<TestBackend, 2>::from_floats([[3.0, 4.0], [0.0, 0.0]], &device);
        let v = squash(s, 1).into_data().to_vec::<f32>().unwrap();
        // |s| = 5 → |v| = 25/26
        let scale = 25.0 / 26.0 / 5.0;
        assert!((v[0] - 3.0 * scale).abs() < 1e-5);
        assert!((v[1] - 4.0 * scale).abs() < 1e-5);
        assert_eq!(&v[2..], &[0.0, 0.0]);
    }

    #[test]
    fn test_capsule_layer_output_shape() {
        let device = Default::default();
        let layer = CapsuleLayer::<TestBackend>::new(1, 6, 4, 16, 3, &device);
        let u = Tensor::<TestBackend, 3>::random([2, 6, 16], Distribution::Default, &device);
        assert_eq!(layer.forward(u).dims(), [2, 1, 4]);
    }
}
