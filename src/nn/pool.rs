//! Spatial pooling layers

use ndarray::{Array2, Array4};

use super::conv::conv_out;

/// Max pooling with square window; remembers winner positions for backward
pub struct MaxPool2d {
    kernel: usize,
    stride: usize,
    pad: usize,
    argmax: Array4<usize>,
    in_hw: (usize, usize),
}

impl MaxPool2d {
    pub fn new(kernel: usize, stride: usize, pad: usize) -> Self {
        Self {
            kernel,
            stride,
            pad,
            argmax: Array4::from_elem((0, 0, 0, 0), 0),
            in_hw: (0, 0),
        }
    }

    pub fn forward(&mut self, x: &Array4<f32>, train: bool) -> Array4<f32> {
        let (n, c, h, w) = x.dim();
        let (k, s, p) = (self.kernel, self.stride, self.pad);
        let (oh, ow) = (conv_out(h, k, s, p), conv_out(w, k, s, p));

        let mut y = Array4::<f32>::zeros((n, c, oh, ow));
        let mut argmax = Array4::<usize>::zeros((n, c, oh, ow));
        for ni in 0..n {
            for ci in 0..c {
                for oi in 0..oh {
                    for oj in 0..ow {
                        let mut best = f32::NEG_INFINITY;
                        let mut best_idx = 0usize;
                        for ki in 0..k {
                            let ii = (oi * s + ki) as isize - p as isize;
                            if ii < 0 || ii as usize >= h {
                                continue;
                            }
                            for kj in 0..k {
                                let jj = (oj * s + kj) as isize - p as isize;
                                if jj < 0 || jj as usize >= w {
                                    continue;
                                }
                                let v = x[[ni, ci, ii as usize, jj as usize]];
                                if v > best {
                                    best = v;
                                    best_idx = ii as usize * w + jj as usize;
                                }
                            }
                        }
                        y[[ni, ci, oi, oj]] = best;
                        argmax[[ni, ci, oi, oj]] = best_idx;
                    }
                }
            }
        }
        if train {
            self.argmax = argmax;
            self.in_hw = (h, w);
        }
        y
    }

    pub fn backward(&self, dy: &Array4<f32>) -> Array4<f32> {
        let (n, c, oh, ow) = dy.dim();
        let (h, w) = self.in_hw;
        let mut dx = Array4::<f32>::zeros((n, c, h, w));
        for ni in 0..n {
            for ci in 0..c {
                for oi in 0..oh {
                    for oj in 0..ow {
                        let flat = self.argmax[[ni, ci, oi, oj]];
                        dx[[ni, ci, flat / w, flat % w]] += dy[[ni, ci, oi, oj]];
                    }
                }
            }
        }
        dx
    }
}

/// Global average pooling, `(n, c, h, w)` down to `(n, c)`
pub struct GlobalAvgPool {
    in_dims: (usize, usize, usize, usize),
}

impl GlobalAvgPool {
    pub fn new() -> Self {
        Self { in_dims: (0, 0, 0, 0) }
    }

    pub fn forward(&mut self, x: &Array4<f32>, train: bool) -> Array2<f32> {
        let (n, c, h, w) = x.dim();
        if train {
            self.in_dims = (n, c, h, w);
        }
        let scale = 1.0 / (h * w) as f32;
        Array2::from_shape_fn((n, c), |(ni, ci)| {
            let mut acc = 0.0;
            for i in 0..h {
                for j in 0..w {
                    acc += x[[ni, ci, i, j]];
                }
            }
            acc * scale
        })
    }

    pub fn backward(&self, dy: &Array2<f32>) -> Array4<f32> {
        let (n, c, h, w) = self.in_dims;
        let scale = 1.0 / (h * w) as f32;
        Array4::from_shape_fn((n, c, h, w), |(ni, ci, _, _)| dy[[ni, ci]] * scale)
    }
}

impl Default for GlobalAvgPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_maxpool_picks_window_maximum() {
        // TEST_ID: POOL-001
        let x = Array4::from_shape_vec(
            (1, 1, 4, 4),
            vec![
                1.0, 2.0, 5.0, 6.0, //
                3.0, 4.0, 7.0, 8.0, //
                0.0, 0.0, 1.0, 0.0, //
                0.0, 9.0, 0.0, 2.0,
            ],
        )
        .unwrap();
        let mut pool = MaxPool2d::new(2, 2, 0);
        let y = pool.forward(&x, true);
        assert_eq!(
            y.as_slice().unwrap(),
            &[4.0, 8.0, 9.0, 2.0],
            "POOL-001 FALSIFIED: 2x2/2 max pool must pick window maxima"
        );

        let dy = Array4::from_shape_vec((1, 1, 2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let dx = pool.backward(&dy);
        assert_eq!(dx[[0, 0, 1, 1]], 1.0);
        assert_eq!(dx[[0, 0, 1, 3]], 2.0);
        assert_eq!(dx[[0, 0, 3, 1]], 3.0);
        assert_eq!(dx[[0, 0, 3, 3]], 4.0);
        assert_eq!(dx.sum(), 10.0);
    }

    #[test]
    fn test_maxpool_padded_stem_shape() {
        // The classifier stem uses k=3 s=2 p=1
        let x = Array4::<f32>::ones((2, 4, 8, 8));
        let mut pool = MaxPool2d::new(3, 2, 1);
        let y = pool.forward(&x, false);
        assert_eq!(y.dim(), (2, 4, 4, 4));
    }

    #[test]
    fn test_global_avgpool_mean_and_backward() {
        // TEST_ID: POOL-002
        let x = Array4::from_shape_vec((1, 2, 2, 2), vec![1.0, 2.0, 3.0, 4.0, 5.0, 5.0, 5.0, 5.0])
            .unwrap();
        let mut pool = GlobalAvgPool::new();
        let y = pool.forward(&x, true);
        assert_abs_diff_eq!(y[[0, 0]], 2.5);
        assert_abs_diff_eq!(y[[0, 1]], 5.0);

        let dy = Array2::from_shape_vec((1, 2), vec![4.0, 8.0]).unwrap();
        let dx = pool.backward(&dy);
        assert_abs_diff_eq!(dx[[0, 0, 0, 0]], 1.0);
        assert_abs_diff_eq!(dx[[0, 1, 1, 1]], 2.0);
    }
}
