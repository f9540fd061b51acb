//! Activation functions

use ndarray::Array4;

/// ReLU over feature maps, caching the active set for backward
#[derive(Default)]
pub struct Relu {
    active: Array4<bool>,
}

impl Relu {
    pub fn new() -> Self {
        Self { active: Array4::from_elem((0, 0, 0, 0), false) }
    }

    pub fn forward(&mut self, x: &Array4<f32>, train: bool) -> Array4<f32> {
        if train {
            self.active = x.mapv(|v| v > 0.0);
        }
        x.mapv(|v| v.max(0.0))
    }

    pub fn backward(&self, dy: &Array4<f32>) -> Array4<f32> {
        let mut dx = dy.clone();
        dx.zip_mut_with(&self.active, |d, &a| {
            if !a {
                *d = 0.0;
            }
        });
        dx
    }
}
