//! The double-precision MDEC decoder.
//!
//! Keeps samples in `f64` through the IDCT, supports the three chroma
//! upsampling kernels, and exposes the planar readers the YV12 AVI paths
//! use in addition to packed RGB.

use strdec_core::error::{Error, Result};
use strdec_core::frame::YCbCrImage;
use strdec_core::mdec::macroblock_dim;

use super::idct::idct_f64;
use super::{read_block_coefficients, ChromaUpsampling, ColorMatrix, MdecCodeSource, MdecDecoder};

/// Double-precision MDEC decoder.
pub struct MdecDecoderDouble {
    width: usize,
    height: usize,
    mb_w: usize,
    mb_h: usize,
    upsampling: ChromaUpsampling,
    matrix: ColorMatrix,
    y: Vec<f64>,
    cb: Vec<f64>,
    cr: Vec<f64>,
}

impl MdecDecoderDouble {
    /// Create a decoder with nearest-neighbor chroma and Rec.601 weights.
    pub fn new(width: usize, height: usize) -> Self {
        Self::with_options(width, height, ChromaUpsampling::default(), ColorMatrix::default())
    }

    /// Create a decoder with explicit upsampling and color weights.
    pub fn with_options(
        width: usize,
        height: usize,
        upsampling: ChromaUpsampling,
        matrix: ColorMatrix,
    ) -> Self {
        let mb_w = macroblock_dim(width);
        let mb_h = macroblock_dim(height);
        Self {
            width,
            height,
            mb_w,
            mb_h,
            upsampling,
            matrix,
            y: vec![0.0; mb_w * 16 * mb_h * 16],
            cb: vec![0.0; mb_w * 8 * mb_h * 8],
            cr: vec![0.0; mb_w * 8 * mb_h * 8],
        }
    }

    fn store_block(plane: &mut [f64], stride: usize, px: usize, py: usize, samples: &[f64; 64]) {
        for row in 0..8 {
            let base = (py + row) * stride + px;
            for col in 0..8 {
                plane[base + col] = samples[row * 8 + col].clamp(-128.0, 127.0);
            }
        }
    }

    fn chroma_sample(&self, plane: &[f64], px: usize, py: usize) -> f64 {
        let cw = self.mb_w * 8;
        let ch = self.mb_h * 8;
        // chroma samples sit at the center of each 2x2 luma quad
        let u = (px as f64 - 0.5) / 2.0;
        let v = (py as f64 - 0.5) / 2.0;
        let at = |cx: i64, cy: i64| -> f64 {
            let cx = cx.clamp(0, cw as i64 - 1) as usize;
            let cy = cy.clamp(0, ch as i64 - 1) as usize;
            plane[cy * cw + cx]
        };
        match self.upsampling {
            ChromaUpsampling::NearestNeighbor => at((px / 2) as i64, (py / 2) as i64),
            ChromaUpsampling::Bilinear => {
                let x0 = u.floor();
                let y0 = v.floor();
                let fx = u - x0;
                let fy = v - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);
                let top = at(x0, y0) * (1.0 - fx) + at(x0 + 1, y0) * fx;
                let bottom = at(x0, y0 + 1) * (1.0 - fx) + at(x0 + 1, y0 + 1) * fx;
                top * (1.0 - fy) + bottom * fy
            }
            ChromaUpsampling::Bicubic => {
                let x0 = u.floor();
                let y0 = v.floor();
                let fx = u - x0;
                let fy = v - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);
                let wx = catmull_rom_weights(fx);
                let wy = catmull_rom_weights(fy);
                let mut sum = 0.0;
                for (j, wyj) in wy.iter().enumerate() {
                    for (i, wxi) in wx.iter().enumerate() {
                        sum += wyj * wxi * at(x0 + i as i64 - 1, y0 + j as i64 - 1);
                    }
                }
                sum
            }
        }
    }

    fn check_plane_dims(&self, img: &YCbCrImage) -> Result<()> {
        if img.width() != self.width || img.height() != self.height {
            return Err(Error::invalid_param(format!(
                "image is {}x{}, decoder is {}x{}",
                img.width(),
                img.height(),
                self.width,
                self.height
            )));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(Error::invalid_param(
                "planar 4:2:0 output requires even dimensions".to_string(),
            ));
        }
        Ok(())
    }

    fn read_planar(&self, img: &mut YCbCrImage, scale: fn(f64, bool) -> u8) -> Result<()> {
        self.check_plane_dims(img)?;
        let (w, h) = (self.width, self.height);
        let luma_stride = self.mb_w * 16;
        let chroma_stride = self.mb_w * 8;
        let (y_out, cb_out, cr_out) = img.planes_mut();
        for row in 0..h {
            for col in 0..w {
                y_out[row * w + col] = scale(self.y[row * luma_stride + col], true);
            }
        }
        for row in 0..h / 2 {
            for col in 0..w / 2 {
                let ci = row * chroma_stride + col;
                cb_out[row * (w / 2) + col] = scale(self.cb[ci], false);
                cr_out[row * (w / 2) + col] = scale(self.cr[ci], false);
            }
        }
        Ok(())
    }

    /// Read the decoded frame as BT.601 studio-range planes (Y 16..235,
    /// chroma 16..240).
    pub fn read_decoded_rec601_ycbcr420(&self, img: &mut YCbCrImage) -> Result<()> {
        self.read_planar(img, |v, is_luma| {
            let full = v + 128.0;
            let scaled = if is_luma {
                16.0 + full * 219.0 / 255.0
            } else {
                128.0 + (full - 128.0) * 224.0 / 255.0
            };
            scaled.round().clamp(0.0, 255.0) as u8
        })
    }

    /// Read the decoded frame as full-range JFIF planes.
    pub fn read_decoded_jfif_ycbcr420(&self, img: &mut YCbCrImage) -> Result<()> {
        self.read_planar(img, |v, _| (v + 128.0).round().clamp(0.0, 255.0) as u8)
    }
}

/// Catmull-Rom kernel weights for the four taps around fraction `t`.
fn catmull_rom_weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        -0.5 * t3 + t2 - 0.5 * t,
        1.5 * t3 - 2.5 * t2 + 1.0,
        -1.5 * t3 + 2.0 * t2 + 0.5 * t,
        0.5 * t3 - 0.5 * t2,
    ]
}

impl MdecDecoder for MdecDecoderDouble {
    fn decode(&mut self, src: &mut dyn MdecCodeSource) -> Result<()> {
        let luma_stride = self.mb_w * 16;
        let chroma_stride = self.mb_w * 8;

        for mb_x in 0..self.mb_w {
            for mb_y in 0..self.mb_h {
                let macroblock = mb_x * self.mb_h + mb_y;
                for block in 0..6 {
                    let (coefficients, _qscale) =
                        read_block_coefficients(src, macroblock, block)?;
                    let mut input = [0f64; 64];
                    for (dst, src) in input.iter_mut().zip(&coefficients) {
                        *dst = *src as f64;
                    }
                    let samples = idct_f64(&input);
                    match block {
                        0 => Self::store_block(
                            &mut self.cr,
                            chroma_stride,
                            mb_x * 8,
                            mb_y * 8,
                            &samples,
                        ),
                        1 => Self::store_block(
                            &mut self.cb,
                            chroma_stride,
                            mb_x * 8,
                            mb_y * 8,
                            &samples,
                        ),
                        _ => {
                            let (dx, dy) = match block {
                                2 => (0, 0),
                                3 => (8, 0),
                                4 => (0, 8),
                                _ => (8, 8),
                            };
                            Self::store_block(
                                &mut self.y,
                                luma_stride,
                                mb_x * 16 + dx,
                                mb_y * 16 + dy,
                                &samples,
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn read_decoded_rgb(&self, width: usize, height: usize, out: &mut [u32]) -> Result<()> {
        if width > self.mb_w * 16 || height > self.mb_h * 16 {
            return Err(Error::invalid_param(format!(
                "requested {width}x{height} exceeds the decoded raster"
            )));
        }
        if out.len() != width * height {
            return Err(Error::invalid_param(format!(
                "output buffer holds {} pixels, need {}",
                out.len(),
                width * height
            )));
        }
        let (cr_r, cb_g, cr_g, cb_b) = self.matrix.weights();
        let luma_stride = self.mb_w * 16;
        for y in 0..height {
            for x in 0..width {
                let luma = self.y[y * luma_stride + x] + 128.0;
                let cb = self.chroma_sample(&self.cb, x, y);
                let cr = self.chroma_sample(&self.cr, x, y);

                let r = (luma + cr_r * cr).round().clamp(0.0, 255.0) as u32;
                let g = (luma - cb_g * cb - cr_g * cr).round().clamp(0.0, 255.0) as u32;
                let b = (luma + cb_b * cb).round().clamp(0.0, 255.0) as u32;
                out[y * width + x] = (r << 16) | (g << 8) | b;
            }
        }
        Ok(())
    }

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }

    fn as_double(&self) -> Option<&MdecDecoderDouble> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mdec::CodeSliceSource;
    use strdec_core::mdec::{blocks, MdecCode};

    fn dc_only_frame(width: usize, height: usize, dc: i16) -> Vec<MdecCode> {
        let mut codes = Vec::new();
        for _ in 0..blocks(width, height) {
            codes.push(MdecCode::header(1, dc));
            codes.push(MdecCode::END_OF_BLOCK);
        }
        codes
    }

    #[test]
    fn test_uniform_gray_all_upsampling_modes() {
        for upsampling in [
            ChromaUpsampling::NearestNeighbor,
            ChromaUpsampling::Bilinear,
            ChromaUpsampling::Bicubic,
        ] {
            let codes = dc_only_frame(32, 16, 0);
            let mut decoder =
                MdecDecoderDouble::with_options(32, 16, upsampling, ColorMatrix::Rec601);
            decoder.decode(&mut CodeSliceSource::new(&codes)).unwrap();
            let mut out = vec![0u32; 32 * 16];
            decoder.read_decoded_rgb(32, 16, &mut out).unwrap();
            assert!(
                out.iter().all(|&p| p == 0x808080),
                "{upsampling:?}: {:06x}",
                out[0]
            );
        }
    }

    #[test]
    fn test_jfif_planes_of_gray_frame() {
        let codes = dc_only_frame(16, 16, 0);
        let mut decoder = MdecDecoderDouble::new(16, 16);
        decoder.decode(&mut CodeSliceSource::new(&codes)).unwrap();

        let mut img = YCbCrImage::new(16, 16);
        decoder.read_decoded_jfif_ycbcr420(&mut img).unwrap();
        assert!(img.y_plane().iter().all(|&v| v == 128));
        assert!(img.cb_plane().iter().all(|&v| v == 128));
    }

    #[test]
    fn test_rec601_planes_are_studio_range() {
        let codes = dc_only_frame(16, 16, 0);
        let mut decoder = MdecDecoderDouble::new(16, 16);
        decoder.decode(&mut CodeSliceSource::new(&codes)).unwrap();

        let mut img = YCbCrImage::new(16, 16);
        decoder.read_decoded_rec601_ycbcr420(&mut img).unwrap();
        // 128 full-range maps to 16 + 128*219/255 = 126
        assert!(img.y_plane().iter().all(|&v| v == 126));
    }

    #[test]
    fn test_plane_reader_checks_dimensions() {
        let decoder = MdecDecoderDouble::new(16, 16);
        let mut img = YCbCrImage::new(32, 32);
        assert!(decoder.read_decoded_rec601_ycbcr420(&mut img).is_err());
    }

    #[test]
    fn test_catmull_rom_partition_of_unity() {
        for t in [0.0, 0.25, 0.5, 0.75] {
            let sum: f64 = catmull_rom_weights(t).iter().sum();
            assert!((sum - 1.0).abs() < 1e-12);
        }
    }
}
