//! Batch normalization over NCHW feature maps

use ndarray::{Array1, Array4, Axis, Zip};

use super::Param;

/// Per-channel batch normalization with running statistics
///
/// Training mode normalizes with batch statistics and updates the running
/// mean/variance buffers; eval mode normalizes with the buffers. The running
/// variance is updated with the unbiased estimate.
pub struct BatchNorm2d {
    /// Scale `(c,)`
    pub gamma: Param,
    /// Shift `(c,)`
    pub beta: Param,
    /// Running mean buffer `(c,)`
    pub running_mean: Param,
    /// Running variance buffer `(c,)`
    pub running_var: Param,
    momentum: f32,
    eps: f32,
    x_hat: Array4<f32>,
    std_inv: Array1<f32>,
}

impl BatchNorm2d {
    pub fn new(channels: usize) -> Self {
        Self {
            gamma: Param::new(Array1::ones(channels).into_dyn()),
            beta: Param::new(Array1::zeros(channels).into_dyn()),
            running_mean: Param::buffer(Array1::zeros(channels).into_dyn()),
            running_var: Param::buffer(Array1::ones(channels).into_dyn()),
            momentum: 0.1,
            eps: 1e-5,
            x_hat: Array4::zeros((0, 0, 0, 0)),
            std_inv: Array1::zeros(0),
        }
    }

    pub fn forward(&mut self, x: &Array4<f32>, train: bool) -> Array4<f32> {
        let (n, c, h, w) = x.dim();
        let m = (n * h * w) as f32;
        let mut y = Array4::<f32>::zeros((n, c, h, w));

        if train {
            self.x_hat = Array4::zeros((n, c, h, w));
            self.std_inv = Array1::zeros(c);
            for ci in 0..c {
                let xc = x.index_axis(Axis(1), ci);
                let mean = xc.sum() / m;
                let var = xc.fold(0.0, |acc, &v| acc + (v - mean) * (v - mean)) / m;
                let std_inv = 1.0 / (var + self.eps).sqrt();
                self.std_inv[ci] = std_inv;

                let g = self.gamma.w[[ci]];
                let b = self.beta.w[[ci]];
                let mut xh = self.x_hat.index_axis_mut(Axis(1), ci);
                let mut yc = y.index_axis_mut(Axis(1), ci);
                Zip::from(&mut xh).and(&mut yc).and(&xc).for_each(|xh, yc, &xv| {
                    *xh = (xv - mean) * std_inv;
                    *yc = g * *xh + b;
                });

                let unbiased = if m > 1.0 { var * m / (m - 1.0) } else { var };
                let rm = &mut self.running_mean.w[[ci]];
                *rm = (1.0 - self.momentum) * *rm + self.momentum * mean;
                let rv = &mut self.running_var.w[[ci]];
                *rv = (1.0 - self.momentum) * *rv + self.momentum * unbiased;
            }
        } else {
            for ci in 0..c {
                let mean = self.running_mean.w[[ci]];
                let var = self.running_var.w[[ci]];
                let std_inv = 1.0 / (var + self.eps).sqrt();
                let g = self.gamma.w[[ci]];
                let b = self.beta.w[[ci]];
                let xc = x.index_axis(Axis(1), ci);
                let mut yc = y.index_axis_mut(Axis(1), ci);
                Zip::from(&mut yc).and(&xc).for_each(|yc, &xv| {
                    *yc = g * (xv - mean) * std_inv + b;
                });
            }
        }
        y
    }

    pub fn backward(&mut self, dy: &Array4<f32>) -> Array4<f32> {
        let (n, c, h, w) = dy.dim();
        let m = (n * h * w) as f32;
        let mut dx = Array4::<f32>::zeros((n, c, h, w));

        for ci in 0..c {
            let dyc = dy.index_axis(Axis(1), ci);
            let xh = self.x_hat.index_axis(Axis(1), ci);

            let sum_dy = dyc.sum();
            let sum_dy_xh = Zip::from(&dyc).and(&xh).fold(0.0, |acc, &d, &x| acc + d * x);

            self.beta.grad[[ci]] += sum_dy;
            self.gamma.grad[[ci]] += sum_dy_xh;

            let g = self.gamma.w[[ci]];
            let scale = g * self.std_inv[ci] / m;
            let mut dxc = dx.index_axis_mut(Axis(1), ci);
            Zip::from(&mut dxc).and(&dyc).and(&xh).for_each(|dx, &d, &x| {
                *dx = scale * (m * d - sum_dy - x * sum_dy_xh);
            });
        }
        dx
    }

    pub fn visit_params(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut Param)) {
        f(&super::qualify(prefix, "weight"), &mut self.gamma);
        f(&super::qualify(prefix, "bias"), &mut self.beta);
        f(&super::qualify(prefix, "running_mean"), &mut self.running_mean);
        f(&super::qualify(prefix, "running_var"), &mut self.running_var);
    }
}
