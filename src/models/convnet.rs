//! Small conv-bn-relu stack for smoke tests and synthetic-data runs
//!
//! Three strided conv blocks, global average pooling, and a linear head.
//! Cheap enough to train in-process on tiny inputs while exercising every
//! code path the residual networks use (masking, momentum, checkpoints).

use ndarray::{Array2, Array4};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::Network;
use crate::nn::{BatchNorm2d, Conv2d, GlobalAvgPool, Linear, Param, Relu};

const PLAN: [(usize, usize, usize); 3] = [(3, 16, 1), (16, 32, 2), (32, 64, 2)];

struct ConvBlock {
    conv: Conv2d,
    bn: BatchNorm2d,
    relu: Relu,
}

impl ConvBlock {
    fn forward(&mut self, x: &Array4<f32>, train: bool) -> Array4<f32> {
        let out = self.conv.forward(x, train);
        let out = self.bn.forward(&out, train);
        self.relu.forward(&out, train)
    }

    fn backward(&mut self, dy: &Array4<f32>) -> Array4<f32> {
        let d = self.relu.backward(dy);
        let d = self.bn.backward(&d);
        self.conv.backward(&d)
    }
}

/// Compact CNN registered as `convnet_nm`
pub struct ConvNet {
    num_classes: usize,
    features: Vec<ConvBlock>,
    avgpool: GlobalAvgPool,
    fc: Linear,
}

impl ConvNet {
    pub fn new(num_classes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let features = PLAN
            .iter()
            .map(|&(in_c, out_c, stride)| ConvBlock {
                conv: Conv2d::new(in_c, out_c, 3, stride, 1, false, &mut rng),
                bn: BatchNorm2d::new(out_c),
                relu: Relu::new(),
            })
            .collect();
        let fc = Linear::new(PLAN[PLAN.len() - 1].1, num_classes, &mut rng);
        Self { num_classes, features, avgpool: GlobalAvgPool::new(), fc }
    }
}

impl Network for ConvNet {
    fn arch(&self) -> &'static str {
        "convnet_nm"
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&mut self, x: &Array4<f32>, train: bool) -> Array2<f32> {
        let mut out = x.clone();
        for block in &mut self.features {
            out = block.forward(&out, train);
        }
        let pooled = self.avgpool.forward(&out, train);
        self.fc.forward(&pooled, train)
    }

    fn backward(&mut self, dlogits: &Array2<f32>) {
        let d = self.fc.backward(dlogits);
        let mut d = self.avgpool.backward(&d);
        for block in self.features.iter_mut().rev() {
            d = block.backward(&d);
        }
    }

    fn visit_params(&mut self, f: &mut dyn FnMut(&str, &mut Param)) {
        for (i, block) in self.features.iter_mut().enumerate() {
            block.conv.visit_params(&format!("features.{i}.conv"), f);
            block.bn.visit_params(&format!("features.{i}.bn"), f);
        }
        self.fc.visit_params("fc", f);
    }
}
