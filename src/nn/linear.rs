//! Fully connected layer

use ndarray::{Array2, Axis};
use rand::Rng;

use super::Param;

/// Linear layer, weight stored `(out, in)`
pub struct Linear {
    /// Weight `(out, in)`
    pub weight: Param,
    /// Bias `(out,)`
    pub bias: Param,
    in_features: usize,
    out_features: usize,
    x: Array2<f32>,
}

impl Linear {
    /// Uniform init in `±1/sqrt(in_features)`
    pub fn new<R: Rng>(in_features: usize, out_features: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (in_features as f32).sqrt();
        let weight = Array2::from_shape_fn((out_features, in_features), |_| {
            (rng.random::<f32>() * 2.0 - 1.0) * bound
        });
        Self {
            weight: Param::new(weight.into_dyn()),
            bias: Param::new(ndarray::Array1::zeros(out_features).into_dyn()),
            in_features,
            out_features,
            x: Array2::zeros((0, 0)),
        }
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn forward(&mut self, x: &Array2<f32>, train: bool) -> Array2<f32> {
        let w = self
            .weight
            .w
            .view()
            .into_shape_with_order((self.out_features, self.in_features))
            .unwrap();
        let b = self.bias.w.view().into_shape_with_order(self.out_features).unwrap();
        let mut y = x.dot(&w.t());
        y += &b;
        if train {
            self.x = x.clone();
        }
        y
    }

    pub fn backward(&mut self, dy: &Array2<f32>) -> Array2<f32> {
        let dw = dy.t().dot(&self.x);
        {
            let mut g = self
                .weight
                .grad
                .view_mut()
                .into_shape_with_order((self.out_features, self.in_features))
                .unwrap();
            g += &dw;
        }
        {
            let db = dy.sum_axis(Axis(0));
            let mut g = self.bias.grad.view_mut().into_shape_with_order(self.out_features).unwrap();
            g += &db;
        }
        let w = self
            .weight
            .w
            .view()
            .into_shape_with_order((self.out_features, self.in_features))
            .unwrap();
        dy.dot(&w)
    }

    pub fn visit_params(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut Param)) {
        f(&super::qualify(prefix, "weight"), &mut self.weight);
        f(&super::qualify(prefix, "bias"), &mut self.bias);
    }
}
