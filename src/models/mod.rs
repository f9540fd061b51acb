//! Prunable CNN architectures
//!
//! Models are selected by name from the training config, the way a registry
//! maps `arch: resnet18_nm` onto a constructor. Every model exposes its
//! parameters through [`Network::visit_params`] under dotted paths
//! (`layer1.0.conv1.weight`), which are the keys used by optimizer state,
//! sparsity masks, and checkpoints alike.

mod convnet;
mod resnet;

pub use convnet::ConvNet;
pub use resnet::ResNet;

use std::collections::BTreeMap;

use ndarray::{Array2, Array4, ArrayD};

use crate::nn::Param;

/// Errors from model construction and state exchange
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("unknown architecture '{0}', expected one of {1}")]
    UnknownArch(String, String),

    #[error("state entry '{name}' has shape {found:?}, parameter has {expected:?}")]
    ShapeMismatch { name: String, expected: Vec<usize>, found: Vec<usize> },

    #[error("state is missing parameter '{0}'")]
    MissingParam(String),

    #[error("state has entry '{0}' with no matching parameter")]
    UnexpectedParam(String),
}

/// Result alias for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// A trainable classification network
///
/// `forward` maps an NCHW batch to logits; `backward` consumes the logit
/// gradient and accumulates parameter gradients. Parameter traversal order
/// is fixed per architecture, which lets distributed workers exchange
/// flattened gradient buffers positionally.
pub trait Network: Send {
    /// Architecture name as registered
    fn arch(&self) -> &'static str;

    /// Number of output classes
    fn num_classes(&self) -> usize;

    /// Compute logits `(batch, classes)` for an NCHW input batch
    fn forward(&mut self, x: &Array4<f32>, train: bool) -> Array2<f32>;

    /// Backpropagate from the logit gradient, accumulating into params
    fn backward(&mut self, dlogits: &Array2<f32>);

    /// Visit every parameter (weights and buffers) with its dotted path
    fn visit_params(&mut self, f: &mut dyn FnMut(&str, &mut Param));
}

/// Registered architecture names
pub fn model_names() -> &'static [&'static str] {
    &["resnet18_nm", "resnet34_nm", "convnet_nm"]
}

/// Construct a model by registry name.
///
/// `seed` drives weight initialization; workers that build with the same
/// seed start from identical parameters.
pub fn build_model(arch: &str, num_classes: usize, seed: u64) -> Result<Box<dyn Network>> {
    match arch {
        "resnet18_nm" => Ok(Box::new(ResNet::new("resnet18_nm", &[2, 2, 2, 2], num_classes, seed))),
        "resnet34_nm" => Ok(Box::new(ResNet::new("resnet34_nm", &[3, 4, 6, 3], num_classes, seed))),
        "convnet_nm" => Ok(Box::new(ConvNet::new(num_classes, seed))),
        other => {
            Err(ModelError::UnknownArch(other.to_string(), model_names().join(", ")))
        }
    }
}

/// Count of (trainable, total) scalar parameters
pub fn param_count(net: &mut dyn Network) -> (usize, usize) {
    let mut trainable = 0usize;
    let mut total = 0usize;
    net.visit_params(&mut |_, p| {
        total += p.numel();
        if p.trainable {
            trainable += p.numel();
        }
    });
    (trainable, total)
}

/// Copy all trainable gradients into `buf` in traversal order.
pub fn flatten_grads(net: &mut dyn Network, buf: &mut Vec<f32>) {
    buf.clear();
    net.visit_params(&mut |_, p| {
        if p.trainable {
            buf.extend(p.grad.iter());
        }
    });
}

/// Overwrite all trainable gradients from `buf` in traversal order.
pub fn load_grads(net: &mut dyn Network, buf: &[f32]) {
    let mut offset = 0usize;
    net.visit_params(&mut |_, p| {
        if p.trainable {
            let len = p.grad.len();
            for (g, v) in p.grad.iter_mut().zip(&buf[offset..offset + len]) {
                *g = *v;
            }
            offset += len;
        }
    });
}

/// Copy every parameter and buffer into `buf` in traversal order.
pub fn flatten_state(net: &mut dyn Network, buf: &mut Vec<f32>) {
    buf.clear();
    net.visit_params(&mut |_, p| {
        buf.extend(p.w.iter());
    });
}

/// Overwrite every parameter and buffer from `buf` in traversal order.
pub fn load_state(net: &mut dyn Network, buf: &[f32]) {
    let mut offset = 0usize;
    net.visit_params(&mut |_, p| {
        let len = p.w.len();
        for (w, v) in p.w.iter_mut().zip(&buf[offset..offset + len]) {
            *w = *v;
        }
        offset += len;
    });
}

/// Clone the full named state (weights and buffers)
pub fn export_state(net: &mut dyn Network) -> BTreeMap<String, ArrayD<f32>> {
    let mut state = BTreeMap::new();
    net.visit_params(&mut |name, p| {
        state.insert(name.to_string(), p.w.clone());
    });
    state
}

/// Load a full named state, requiring an exact parameter match.
pub fn import_state(
    net: &mut dyn Network,
    state: &BTreeMap<String, ArrayD<f32>>,
) -> Result<()> {
    let mut seen = 0usize;
    let mut failed: Option<ModelError> = None;
    net.visit_params(&mut |name, p| {
        if failed.is_some() {
            return;
        }
        match state.get(name) {
            Some(values) if values.shape() == p.w.shape() => {
                p.w.assign(values);
                seen += 1;
            }
            Some(values) => {
                failed = Some(ModelError::ShapeMismatch {
                    name: name.to_string(),
                    expected: p.w.shape().to_vec(),
                    found: values.shape().to_vec(),
                });
            }
            None => failed = Some(ModelError::MissingParam(name.to_string())),
        }
    });
    if let Some(e) = failed {
        return Err(e);
    }
    if seen != state.len() {
        let mut names = Vec::new();
        net.visit_params(&mut |name, _| names.push(name.to_string()));
        for key in state.keys() {
            if !names.iter().any(|n| n == key) {
                return Err(ModelError::UnexpectedParam(key.clone()));
            }
        }
    }
    Ok(())
}
