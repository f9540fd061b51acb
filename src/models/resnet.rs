//! Residual networks with basic blocks (ResNet-18/34)
//!
//! Layout and parameter naming follow the reference topology: a 7x7 stem,
//! four stages of basic blocks doubling channels at stride 2, global average
//! pooling, and a linear classifier. Stage `s`, block `i` parameters appear
//! as `layer{s}.{i}.conv1.weight` and so on, with strided shortcuts under
//! `downsample.0` / `downsample.1`.
//!
//! # References
//!
//! - He et al. (2016): "Deep Residual Learning for Image Recognition"

use ndarray::{Array2, Array4};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::Network;
use crate::nn::{BatchNorm2d, Conv2d, GlobalAvgPool, Linear, MaxPool2d, Param, Relu};

const STAGE_CHANNELS: [usize; 4] = [64, 128, 256, 512];

/// Two 3x3 convolutions with an identity (or strided 1x1) shortcut
struct BasicBlock {
    conv1: Conv2d,
    bn1: BatchNorm2d,
    relu1: Relu,
    conv2: Conv2d,
    bn2: BatchNorm2d,
    downsample: Option<(Conv2d, BatchNorm2d)>,
    relu2: Relu,
}

impl BasicBlock {
    fn new(in_c: usize, out_c: usize, stride: usize, rng: &mut StdRng) -> Self {
        let downsample = (stride != 1 || in_c != out_c)
            .then(|| (Conv2d::new(in_c, out_c, 1, stride, 0, false, rng), BatchNorm2d::new(out_c)));
        Self {
            conv1: Conv2d::new(in_c, out_c, 3, stride, 1, false, rng),
            bn1: BatchNorm2d::new(out_c),
            relu1: Relu::new(),
            conv2: Conv2d::new(out_c, out_c, 3, 1, 1, false, rng),
            bn2: BatchNorm2d::new(out_c),
            downsample,
            relu2: Relu::new(),
        }
    }

    fn forward(&mut self, x: &Array4<f32>, train: bool) -> Array4<f32> {
        let shortcut = match &mut self.downsample {
            Some((conv, bn)) => bn.forward(&conv.forward(x, train), train),
            None => x.clone(),
        };
        let out = self.conv1.forward(x, train);
        let out = self.bn1.forward(&out, train);
        let out = self.relu1.forward(&out, train);
        let out = self.conv2.forward(&out, train);
        let mut out = self.bn2.forward(&out, train);
        out += &shortcut;
        self.relu2.forward(&out, train)
    }

    fn backward(&mut self, dy: &Array4<f32>) -> Array4<f32> {
        let dsum = self.relu2.backward(dy);
        let d = self.bn2.backward(&dsum);
        let d = self.conv2.backward(&d);
        let d = self.relu1.backward(&d);
        let d = self.bn1.backward(&d);
        let mut dx = self.conv1.backward(&d);
        match &mut self.downsample {
            Some((conv, bn)) => {
                let ds = bn.backward(&dsum);
                dx += &conv.backward(&ds);
            }
            None => dx += &dsum,
        }
        dx
    }

    fn visit_params(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut Param)) {
        self.conv1.visit_params(&crate::nn::qualify(prefix, "conv1"), f);
        self.bn1.visit_params(&crate::nn::qualify(prefix, "bn1"), f);
        self.conv2.visit_params(&crate::nn::qualify(prefix, "conv2"), f);
        self.bn2.visit_params(&crate::nn::qualify(prefix, "bn2"), f);
        if let Some((conv, bn)) = &mut self.downsample {
            conv.visit_params(&crate::nn::qualify(prefix, "downsample.0"), f);
            bn.visit_params(&crate::nn::qualify(prefix, "downsample.1"), f);
        }
    }
}

/// ResNet with basic blocks; depth is set by the per-stage block counts.
pub struct ResNet {
    arch: &'static str,
    num_classes: usize,
    conv1: Conv2d,
    bn1: BatchNorm2d,
    relu: Relu,
    maxpool: MaxPool2d,
    stages: Vec<Vec<BasicBlock>>,
    avgpool: GlobalAvgPool,
    fc: Linear,
}

impl ResNet {
    pub fn new(arch: &'static str, blocks: &[usize; 4], num_classes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let conv1 = Conv2d::new(3, 64, 7, 2, 3, false, &mut rng);
        let bn1 = BatchNorm2d::new(64);

        let mut stages = Vec::with_capacity(4);
        let mut in_c = 64;
        for (stage, (&count, &out_c)) in blocks.iter().zip(STAGE_CHANNELS.iter()).enumerate() {
            let mut layer = Vec::with_capacity(count);
            for i in 0..count {
                let stride = if stage > 0 && i == 0 { 2 } else { 1 };
                layer.push(BasicBlock::new(in_c, out_c, stride, &mut rng));
                in_c = out_c;
            }
            stages.push(layer);
        }

        let fc = Linear::new(512, num_classes, &mut rng);
        Self {
            arch,
            num_classes,
            conv1,
            bn1,
            relu: Relu::new(),
            maxpool: MaxPool2d::new(3, 2, 1),
            stages,
            avgpool: GlobalAvgPool::new(),
            fc,
        }
    }
}

impl Network for ResNet {
    fn arch(&self) -> &'static str {
        self.arch
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn forward(&mut self, x: &Array4<f32>, train: bool) -> Array2<f32> {
        let out = self.conv1.forward(x, train);
        let out = self.bn1.forward(&out, train);
        let out = self.relu.forward(&out, train);
        let mut out = self.maxpool.forward(&out, train);
        for stage in &mut self.stages {
            for block in stage {
                out = block.forward(&out, train);
            }
        }
        let pooled = self.avgpool.forward(&out, train);
        self.fc.forward(&pooled, train)
    }

    fn backward(&mut self, dlogits: &Array2<f32>) {
        let d = self.fc.backward(dlogits);
        let mut d = self.avgpool.backward(&d);
        for stage in self.stages.iter_mut().rev() {
            for block in stage.iter_mut().rev() {
                d = block.backward(&d);
            }
        }
        let d = self.maxpool.backward(&d);
        let d = self.relu.backward(&d);
        let d = self.bn1.backward(&d);
        self.conv1.backward(&d);
    }

    fn visit_params(&mut self, f: &mut dyn FnMut(&str, &mut Param)) {
        self.conv1.visit_params("conv1", f);
        self.bn1.visit_params("bn1", f);
        for (stage, layer) in self.stages.iter_mut().enumerate() {
            for (i, block) in layer.iter_mut().enumerate() {
                block.visit_params(&format!("layer{}.{}", stage + 1, i), f);
            }
        }
        self.fc.visit_params("fc", f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::param_count;

    #[test]
    fn test_resnet18_param_shapes() {
        // TEST_ID: RESNET-001
        let mut net = ResNet::new("resnet18_nm", &[2, 2, 2, 2], 10, 0);
        let mut shapes = std::collections::BTreeMap::new();
        Network::visit_params(&mut net, &mut |name, p| {
            shapes.insert(name.to_string(), p.w.shape().to_vec());
        });
        assert_eq!(shapes["conv1.weight"], vec![64, 3, 7, 7]);
        assert_eq!(shapes["layer1.0.conv1.weight"], vec![64, 64, 3, 3]);
        assert_eq!(shapes["layer2.0.conv1.weight"], vec![128, 64, 3, 3]);
        assert_eq!(shapes["layer2.0.downsample.0.weight"], vec![128, 64, 1, 1]);
        assert_eq!(shapes["layer2.0.downsample.1.weight"], vec![128]);
        assert_eq!(shapes["layer4.1.conv2.weight"], vec![512, 512, 3, 3]);
        assert_eq!(shapes["fc.weight"], vec![10, 512]);
        assert!(
            !shapes.contains_key("layer1.0.downsample.0.weight"),
            "RESNET-001 FALSIFIED: stride-1 same-width blocks must use identity shortcuts"
        );
    }

    #[test]
    fn test_resnet18_trainable_count() {
        // TEST_ID: RESNET-002
        // 11.69M weights for the 1000-class reference topology (biasless convs).
        let mut net = ResNet::new("resnet18_nm", &[2, 2, 2, 2], 1000, 0);
        let (trainable, _) = param_count(&mut net);
        assert_eq!(
            trainable, 11_689_512,
            "RESNET-002 FALSIFIED: resnet18 trainable weight count drifted"
        );
    }

    #[test]
    fn test_resnet_forward_backward_shapes() {
        // TEST_ID: RESNET-003
        let mut net = ResNet::new("resnet18_nm", &[2, 2, 2, 2], 7, 0);
        let x = Array4::from_elem((2, 3, 64, 64), 0.1f32);
        let logits = Network::forward(&mut net, &x, true);
        assert_eq!(logits.dim(), (2, 7));
        assert!(logits.iter().all(|v| v.is_finite()));

        let dlogits = Array2::from_elem((2, 7), 0.5f32);
        Network::backward(&mut net, &dlogits);
        let mut nonzero = false;
        Network::visit_params(&mut net, &mut |name, p| {
            if name == "layer3.0.conv1.weight" {
                nonzero = p.grad.iter().any(|g| *g != 0.0);
            }
        });
        assert!(nonzero, "RESNET-003 FALSIFIED: gradient must reach mid-network convolutions");
    }

    #[test]
    fn test_resnet34_block_counts() {
        let mut net = ResNet::new("resnet34_nm", &[3, 4, 6, 3], 10, 0);
        let mut names = Vec::new();
        Network::visit_params(&mut net, &mut |name, _| names.push(name.to_string()));
        assert!(names.iter().any(|n| n == "layer3.5.conv2.weight"));
        assert!(!names.iter().any(|n| n.starts_with("layer3.6")));
    }
}
