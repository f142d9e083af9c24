//! The integer-precision MDEC decoder.
//!
//! Fixed-point IDCT, nearest-neighbor chroma, packed RGB output. This is
//! the tier the live player runs at playback rate; the double-precision
//! decoder handles the high-quality save paths.

use strdec_core::error::{Error, Result};
use strdec_core::mdec::macroblock_dim;

use super::idct::idct_int;
use super::{read_block_coefficients, MdecCodeSource, MdecDecoder};

// Rec.601 weights in 16.16 fixed point.
const CR_R: i32 = 91881;
const CB_G: i32 = 22525;
const CR_G: i32 = 46812;
const CB_B: i32 = 116130;

/// Integer MDEC decoder.
pub struct MdecDecoderInt {
    width: usize,
    height: usize,
    mb_w: usize,
    mb_h: usize,
    y: Vec<i16>,
    cb: Vec<i16>,
    cr: Vec<i16>,
}

impl MdecDecoderInt {
    /// Create a decoder for `width` x `height` frames.
    pub fn new(width: usize, height: usize) -> Self {
        let mb_w = macroblock_dim(width);
        let mb_h = macroblock_dim(height);
        Self {
            width,
            height,
            mb_w,
            mb_h,
            y: vec![0; mb_w * 16 * mb_h * 16],
            cb: vec![0; mb_w * 8 * mb_h * 8],
            cr: vec![0; mb_w * 8 * mb_h * 8],
        }
    }

    fn store_block(plane: &mut [i16], stride: usize, px: usize, py: usize, samples: &[i32; 64]) {
        for row in 0..8 {
            let base = (py + row) * stride + px;
            for col in 0..8 {
                plane[base + col] = samples[row * 8 + col].clamp(-128, 127) as i16;
            }
        }
    }
}

impl MdecDecoder for MdecDecoderInt {
    fn decode(&mut self, src: &mut dyn MdecCodeSource) -> Result<()> {
        let luma_stride = self.mb_w * 16;
        let chroma_stride = self.mb_w * 8;

        // Macroblocks arrive top-to-bottom then left-to-right, each as
        // Cr, Cb, Y1, Y2, Y3, Y4.
        for mb_x in 0..self.mb_w {
            for mb_y in 0..self.mb_h {
                let macroblock = mb_x * self.mb_h + mb_y;
                for block in 0..6 {
                    let (coefficients, _qscale) = read_block_coefficients(src, macroblock, block)
                        .map_err(|e| {
                            if e.is_eof() {
                                tracing::debug!(macroblock, block, "stream ended mid-frame");
                            }
                            e
                        })?;
                    let samples = idct_int(&coefficients);
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
        let luma_stride = self.mb_w * 16;
        let chroma_stride = self.mb_w * 8;
        for y in 0..height {
            for x in 0..width {
                let luma = self.y[y * luma_stride + x] as i32 + 128;
                let ci = (y / 2) * chroma_stride + x / 2;
                let cb = self.cb[ci] as i32;
                let cr = self.cr[ci] as i32;

                let r = luma + ((CR_R * cr) >> 16);
                let g = luma - ((CB_G * cb) >> 16) - ((CR_G * cr) >> 16);
                let b = luma + ((CB_B * cb) >> 16);

                let r = r.clamp(0, 255) as u32;
                let g = g.clamp(0, 255) as u32;
                let b = b.clamp(0, 255) as u32;
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
}
