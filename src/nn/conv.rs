//! 2D convolution via im2col and GEMM
//!
//! The forward pass lowers each input sample to a column matrix where every
//! column holds one receptive field, then multiplies by the flattened weight
//! matrix. The backward pass reuses the cached columns for the weight
//! gradient and scatters `Wᵀ·dY` back with col2im for the input gradient.

use ndarray::parallel::prelude::*;
use ndarray::{Array2, Array4, ArrayView3, ArrayViewMut3, Axis};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rand::Rng;

use super::Param;

/// Output spatial size for one dimension
pub(crate) fn conv_out(size: usize, kernel: usize, stride: usize, pad: usize) -> usize {
    (size + 2 * pad - kernel) / stride + 1
}

/// 2D convolution layer, NCHW layout, square kernel
pub struct Conv2d {
    /// Weight `(out_c, in_c, kh, kw)`
    pub weight: Param,
    /// Optional bias `(out_c,)`
    pub bias: Option<Param>,
    in_c: usize,
    out_c: usize,
    kernel: usize,
    stride: usize,
    pad: usize,
    cols: Array2<f32>,
    x_dims: (usize, usize, usize, usize),
}

impl Conv2d {
    /// Kaiming-normal initialization over fan-out, the usual choice for
    /// ReLU conv stacks
    pub fn new<R: Rng>(
        in_c: usize,
        out_c: usize,
        kernel: usize,
        stride: usize,
        pad: usize,
        with_bias: bool,
        rng: &mut R,
    ) -> Self {
        let fan_out = out_c * kernel * kernel;
        let std = (2.0 / fan_out as f32).sqrt();
        let w: Array4<f32> =
            Array4::random_using((out_c, in_c, kernel, kernel), StandardNormal, rng);
        let weight = Param::new((w * std).into_dyn());
        let bias = with_bias.then(|| Param::new(ndarray::Array1::zeros(out_c).into_dyn()));
        Self {
            weight,
            bias,
            in_c,
            out_c,
            kernel,
            stride,
            pad,
            cols: Array2::zeros((0, 0)),
            x_dims: (0, 0, 0, 0),
        }
    }

    pub fn in_channels(&self) -> usize {
        self.in_c
    }

    pub fn out_channels(&self) -> usize {
        self.out_c
    }

    pub fn forward(&mut self, x: &Array4<f32>, train: bool) -> Array4<f32> {
        let (n, c, h, w) = x.dim();
        debug_assert_eq!(c, self.in_c);
        let (k, s, p) = (self.kernel, self.stride, self.pad);
        let (oh, ow) = (conv_out(h, k, s, p), conv_out(w, k, s, p));
        let ckk = c * k * k;

        let mut cols = Array2::<f32>::zeros((ckk, n * oh * ow));
        cols.axis_chunks_iter_mut(Axis(1), oh * ow)
            .into_par_iter()
            .zip(x.outer_iter().into_par_iter())
            .for_each(|(mut sample_cols, sample)| {
                im2col(&sample, &mut sample_cols.view_mut(), k, s, p, oh, ow);
            });

        let wmat = self.weight.w.view().into_shape_with_order((self.out_c, ckk)).unwrap();
        let mut y_mat = wmat.dot(&cols);
        if let Some(bias) = &self.bias {
            for (mut row, &b) in y_mat.outer_iter_mut().zip(bias.w.iter()) {
                row += b;
            }
        }

        if train {
            self.cols = cols;
            self.x_dims = (n, c, h, w);
        } else {
            self.cols = Array2::zeros((0, 0));
        }

        // (out_c, n*oh*ow) -> (n, out_c, oh, ow)
        let y = y_mat.into_shape_with_order((self.out_c, n, oh, ow)).unwrap();
        y.permuted_axes([1, 0, 2, 3]).as_standard_layout().into_owned()
    }

    /// Accumulates weight/bias gradients and returns the input gradient.
    /// Requires a preceding `forward(.., train=true)`.
    pub fn backward(&mut self, dy: &Array4<f32>) -> Array4<f32> {
        let (n, c, h, w) = self.x_dims;
        let (k, s, p) = (self.kernel, self.stride, self.pad);
        let (_, oc, oh, ow) = dy.dim();
        debug_assert_eq!(oc, self.out_c);
        let ckk = c * k * k;

        let dy_mat = dy
            .view()
            .permuted_axes([1, 0, 2, 3])
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((self.out_c, n * oh * ow))
            .unwrap();

        let dw = dy_mat.dot(&self.cols.t());
        {
            let mut gmat =
                self.weight.grad.view_mut().into_shape_with_order((self.out_c, ckk)).unwrap();
            gmat += &dw;
        }
        if let Some(bias) = &mut self.bias {
            let db = dy_mat.sum_axis(Axis(1));
            let mut g = bias.grad.view_mut().into_shape_with_order(self.out_c).unwrap();
            g += &db;
        }

        let wmat = self.weight.w.view().into_shape_with_order((self.out_c, ckk)).unwrap();
        let dcols = wmat.t().dot(&dy_mat);

        let mut dx = Array4::<f32>::zeros((n, c, h, w));
        dx.outer_iter_mut()
            .into_par_iter()
            .zip(dcols.axis_chunks_iter(Axis(1), oh * ow).into_par_iter())
            .for_each(|(mut sample_dx, sample_cols)| {
                col2im(&sample_cols.view(), &mut sample_dx, k, s, p, oh, ow);
            });
        dx
    }

    pub fn visit_params(&mut self, prefix: &str, f: &mut dyn FnMut(&str, &mut Param)) {
        f(&super::qualify(prefix, "weight"), &mut self.weight);
        if let Some(bias) = &mut self.bias {
            f(&super::qualify(prefix, "bias"), bias);
        }
    }
}

fn im2col(
    x: &ArrayView3<f32>,
    cols: &mut ndarray::ArrayViewMut2<f32>,
    k: usize,
    s: usize,
    p: usize,
    oh: usize,
    ow: usize,
) {
    let (c, h, w) = x.dim();
    for ci in 0..c {
        for ki in 0..k {
            for kj in 0..k {
                let row = (ci * k + ki) * k + kj;
                for oi in 0..oh {
                    let ii = (oi * s + ki) as isize - p as isize;
                    let in_row = ii >= 0 && (ii as usize) < h;
                    for oj in 0..ow {
                        let jj = (oj * s + kj) as isize - p as isize;
                        cols[[row, oi * ow + oj]] = if in_row && jj >= 0 && (jj as usize) < w {
                            x[[ci, ii as usize, jj as usize]]
                        } else {
                            0.0
                        };
                    }
                }
            }
        }
    }
}

fn col2im(
    cols: &ndarray::ArrayView2<f32>,
    dx: &mut ArrayViewMut3<f32>,
    k: usize,
    s: usize,
    p: usize,
    oh: usize,
    ow: usize,
) {
    let (c, h, w) = dx.dim();
    for ci in 0..c {
        for ki in 0..k {
            for kj in 0..k {
                let row = (ci * k + ki) * k + kj;
                for oi in 0..oh {
                    let ii = (oi * s + ki) as isize - p as isize;
                    if ii < 0 || ii as usize >= h {
                        continue;
                    }
                    for oj in 0..ow {
                        let jj = (oj * s + kj) as isize - p as isize;
                        if jj < 0 || jj as usize >= w {
                            continue;
                        }
                        dx[[ci, ii as usize, jj as usize]] += cols[[row, oi * ow + oj]];
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn fixed_conv(in_c: usize, out_c: usize, k: usize, s: usize, p: usize) -> Conv2d {
        let mut rng = StdRng::seed_from_u64(7);
        let mut conv = Conv2d::new(in_c, out_c, k, s, p, true, &mut rng);
        // Deterministic small weights keep finite differences stable
        let mut i = 0.0f32;
        conv.weight.w.mapv_inplace(|_| {
            i += 1.0;
            (i * 0.37).sin() * 0.5
        });
        conv
    }

    fn input(n: usize, c: usize, h: usize, w: usize) -> Array4<f32> {
        let mut i = 0.0f32;
        Array4::from_shape_fn((n, c, h, w), |_| {
            i += 1.0;
            (i * 0.61).cos()
        })
    }

    #[test]
    fn test_conv_output_shape() {
        // TEST_ID: CONV-001
        let mut conv = fixed_conv(3, 8, 3, 2, 1);
        let y = conv.forward(&input(2, 3, 8, 8), false);
        assert_eq!(
            y.dim(),
            (2, 8, 4, 4),
            "CONV-001 FALSIFIED: 8x8 input, k=3 s=2 p=1 must give 4x4"
        );
    }

    #[test]
    fn test_conv_known_values_identity_kernel() {
        // 1x1 kernel with unit weight is a passthrough
        let mut rng = StdRng::seed_from_u64(0);
        let mut conv = Conv2d::new(1, 1, 1, 1, 0, false, &mut rng);
        conv.weight.w.fill(1.0);
        let x = input(1, 1, 3, 3);
        let y = conv.forward(&x, false);
        assert_abs_diff_eq!(
            y.as_slice().unwrap(),
            x.as_slice().unwrap(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_conv_gradient_matches_finite_difference() {
        // TEST_ID: CONV-002
        let mut conv = fixed_conv(2, 3, 3, 1, 1);
        let x = input(2, 2, 4, 4);

        let y = conv.forward(&x, true);
        let dy = Array4::ones(y.dim());
        let dx = conv.backward(&dy);

        let eps = 1e-3f32;
        // Input gradient at a few probe positions
        for &idx in &[[0, 0, 0, 0], [1, 1, 2, 3], [0, 1, 3, 1]] {
            let mut xp = x.clone();
            xp[idx] += eps;
            let mut xm = x.clone();
            xm[idx] -= eps;
            let lp: f32 = conv.forward(&xp, false).sum();
            let lm: f32 = conv.forward(&xm, false).sum();
            let numeric = (lp - lm) / (2.0 * eps);
            assert_abs_diff_eq!(dx[idx], numeric, epsilon = 2e-2);
        }
    }

    #[test]
    fn test_conv_weight_gradient_matches_finite_difference() {
        // TEST_ID: CONV-003
        let x = input(1, 2, 4, 4);
        let eps = 1e-3f32;
        for probe in [[0usize, 0, 0, 0], [2, 1, 1, 2]] {
            let mut conv = fixed_conv(2, 3, 3, 1, 1);
            let y = conv.forward(&x, true);
            conv.backward(&Array4::ones(y.dim()));
            let analytic = conv.weight.grad[probe.as_slice()];

            let mut cp = fixed_conv(2, 3, 3, 1, 1);
            cp.weight.w[probe.as_slice()] += eps;
            let lp: f32 = cp.forward(&x, false).sum();
            let mut cm = fixed_conv(2, 3, 3, 1, 1);
            cm.weight.w[probe.as_slice()] -= eps;
            let lm: f32 = cm.forward(&x, false).sum();
            let numeric = (lp - lm) / (2.0 * eps);
            assert_abs_diff_eq!(analytic, numeric, epsilon = 2e-2);
        }
    }

    #[test]
    fn test_conv_grad_accumulates_across_backward_calls() {
        let mut conv = fixed_conv(1, 1, 3, 1, 1);
        let x = input(1, 1, 4, 4);
        let y = conv.forward(&x, true);
        let dy = Array4::ones(y.dim());
        conv.backward(&dy);
        let once = conv.weight.grad.clone();
        conv.forward(&x, true);
        conv.backward(&dy);
        assert_abs_diff_eq!(
            conv.weight.grad.as_slice().unwrap(),
            (&once * 2.0).as_slice().unwrap(),
            epsilon = 1e-4
        );
    }
}
