//! In-memory RGB images and the geometric ops the augmentations build on

/// An 8-bit RGB image in row-major HWC layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbImage {
    height: usize,
    width: usize,
    data: Vec<u8>,
}

impl RgbImage {
    /// Wrap an HWC pixel buffer; `data.len()` must equal `height * width * 3`.
    pub fn new(height: usize, width: usize, data: Vec<u8>) -> Self {
        assert_eq!(data.len(), height * width * 3, "pixel buffer does not match dimensions");
        Self { height, width, data }
    }

    /// Solid-color image, mostly useful in tests
    pub fn filled(height: usize, width: usize, rgb: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(height * width * 3);
        for _ in 0..height * width {
            data.extend_from_slice(&rgb);
        }
        Self { height, width, data }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    #[inline]
    pub fn pixel(&self, y: usize, x: usize) -> [u8; 3] {
        let at = (y * self.width + x) * 3;
        [self.data[at], self.data[at + 1], self.data[at + 2]]
    }

    /// Bilinear resize to `(out_h, out_w)`.
    ///
    /// Sample positions use the half-pixel convention so that up- and
    /// down-scaling stay centered.
    pub fn resize(&self, out_h: usize, out_w: usize) -> RgbImage {
        if out_h == self.height && out_w == self.width {
            return self.clone();
        }
        let scale_y = self.height as f32 / out_h as f32;
        let scale_x = self.width as f32 / out_w as f32;
        let mut data = vec![0u8; out_h * out_w * 3];
        for oy in 0..out_h {
            let sy = ((oy as f32 + 0.5) * scale_y - 0.5).max(0.0);
            let y0 = (sy as usize).min(self.height - 1);
            let y1 = (y0 + 1).min(self.height - 1);
            let fy = sy - y0 as f32;
            for ox in 0..out_w {
                let sx = ((ox as f32 + 0.5) * scale_x - 0.5).max(0.0);
                let x0 = (sx as usize).min(self.width - 1);
                let x1 = (x0 + 1).min(self.width - 1);
                let fx = sx - x0 as f32;

                let at = (oy * out_w + ox) * 3;
                for ch in 0..3 {
                    let tl = self.pixel(y0, x0)[ch] as f32;
                    let tr = self.pixel(y0, x1)[ch] as f32;
                    let bl = self.pixel(y1, x0)[ch] as f32;
                    let br = self.pixel(y1, x1)[ch] as f32;
                    let top = tl + (tr - tl) * fx;
                    let bottom = bl + (br - bl) * fx;
                    data[at + ch] = (top + (bottom - top) * fy).round().clamp(0.0, 255.0) as u8;
                }
            }
        }
        RgbImage { height: out_h, width: out_w, data }
    }

    /// Scale the shorter side to `size`, preserving aspect ratio.
    pub fn resize_shorter(&self, size: usize) -> RgbImage {
        if self.height <= self.width {
            let w = (self.width * size).div_ceil(self.height.max(1));
            self.resize(size, w.max(size))
        } else {
            let h = (self.height * size).div_ceil(self.width.max(1));
            self.resize(h.max(size), size)
        }
    }

    /// Extract the `(h, w)` window whose top-left corner is `(top, left)`.
    pub fn crop(&self, top: usize, left: usize, h: usize, w: usize) -> RgbImage {
        assert!(top + h <= self.height && left + w <= self.width, "crop exceeds image bounds");
        let mut data = Vec::with_capacity(h * w * 3);
        for y in top..top + h {
            let row = (y * self.width + left) * 3;
            data.extend_from_slice(&self.data[row..row + w * 3]);
        }
        RgbImage { height: h, width: w, data }
    }

    /// Centered `(size, size)` crop; the image must be at least that large.
    pub fn center_crop(&self, size: usize) -> RgbImage {
        let top = (self.height - size) / 2;
        let left = (self.width - size) / 2;
        self.crop(top, left, size, size)
    }

    /// Mirror left-to-right
    pub fn hflip(&self) -> RgbImage {
        let mut data = Vec::with_capacity(self.data.len());
        for y in 0..self.height {
            for x in (0..self.width).rev() {
                let at = (y * self.width + x) * 3;
                data.extend_from_slice(&self.data[at..at + 3]);
            }
        }
        RgbImage { height: self.height, width: self.width, data }
    }
}
