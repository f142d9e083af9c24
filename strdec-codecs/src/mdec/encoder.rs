//! The MDEC encoder and partial frame replacement.
//!
//! The encoder is the inverse of the decoder: forward DCT, quantization at
//! a trial qscale, zig-zag run-length coding. For partial replacement only
//! the dirty macroblocks are re-encoded; clean macroblocks copy their codes
//! verbatim from the parsed original, so an empty dirty set reproduces the
//! original payload byte for byte.

use std::collections::HashSet;

use strdec_core::error::{CodecError, Error, Result};
use strdec_core::frame::{RgbImage, YCbCrImage};
use strdec_core::mdec::{blocks, macroblock_dim, MdecCode, PSX_QUANT_TABLE, ZIGZAG};

use super::idct::fdct_f64;
use super::{CodeSliceSource, MdecCodeSource};
use crate::bitstreams::BitstreamCompressor;

/// A pixel-space rectangle mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
}

impl Rect {
    /// Whether the point lies inside.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    /// Whether this rectangle overlaps another.
    pub fn intersects(&self, x: i32, y: i32, width: i32, height: i32) -> bool {
        self.x < x + width && x < self.x + self.width && self.y < y + height && y < self.y + self.height
    }
}

/// An original frame parsed into per-block code lists.
pub struct ParsedMdecImage {
    width: usize,
    height: usize,
    mb_h: usize,
    frame_qscale: u8,
    blocks: Vec<Vec<MdecCode>>,
}

impl ParsedMdecImage {
    /// Parse `blocks(width, height)` blocks out of `src`.
    pub fn parse(src: &mut dyn MdecCodeSource, width: usize, height: usize) -> Result<Self> {
        let total = blocks(width, height);
        let mut parsed = Vec::with_capacity(total);
        let mut frame_qscale = 0u8;
        for index in 0..total {
            let mut block = Vec::new();
            let header = src.read_code()?;
            if index % 6 == 2 && frame_qscale == 0 {
                frame_qscale = header.top6();
            }
            block.push(header);
            loop {
                let code = src.read_code()?;
                let eob = code.is_eob();
                block.push(code);
                if eob {
                    break;
                }
            }
            parsed.push(block);
        }
        Ok(Self {
            width,
            height,
            mb_h: macroblock_dim(height),
            frame_qscale,
            blocks: parsed,
        })
    }

    /// Frame width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// The first luma block's qscale.
    pub fn frame_qscale(&self) -> u8 {
        self.frame_qscale
    }

    /// All codes in stream order.
    pub fn code_stream(&self) -> Vec<MdecCode> {
        self.blocks.iter().flatten().copied().collect()
    }

    fn macroblock_blocks(&self, mb_x: usize, mb_y: usize) -> &[Vec<MdecCode>] {
        let index = (mb_x * self.mb_h + mb_y) * 6;
        &self.blocks[index..index + 6]
    }
}

/// Planar `f64` YCbCr at PSX centering: luma in [-128, 127], chroma around 0.
struct EncoderPlanes {
    mb_w: usize,
    mb_h: usize,
    y: Vec<f64>,
    cb: Vec<f64>,
    cr: Vec<f64>,
}

impl EncoderPlanes {
    fn from_rgb(img: &RgbImage, width: usize, height: usize) -> Self {
        let mb_w = macroblock_dim(width);
        let mb_h = macroblock_dim(height);
        let (pw, ph) = (mb_w * 16, mb_h * 16);

        let mut y = vec![0f64; pw * ph];
        let mut cb_full = vec![0f64; pw * ph];
        let mut cr_full = vec![0f64; pw * ph];
        for py in 0..ph {
            for px in 0..pw {
                // replicate the edge into the macroblock padding
                let sx = px.min(img.width() - 1).min(width - 1);
                let sy = py.min(img.height() - 1).min(height - 1);
                let rgb = img.pixel(sx, sy);
                let r = ((rgb >> 16) & 0xFF) as f64;
                let g = ((rgb >> 8) & 0xFF) as f64;
                let b = (rgb & 0xFF) as f64;
                let i = py * pw + px;
                y[i] = 0.299 * r + 0.587 * g + 0.114 * b - 128.0;
                cb_full[i] = -0.168736 * r - 0.331264 * g + 0.5 * b;
                cr_full[i] = 0.5 * r - 0.418688 * g - 0.081312 * b;
            }
        }

        let (cw, ch) = (pw / 2, ph / 2);
        let mut cb = vec![0f64; cw * ch];
        let mut cr = vec![0f64; cw * ch];
        for cy in 0..ch {
            for cx in 0..cw {
                let mut sb = 0.0;
                let mut sr = 0.0;
                for dy in 0..2 {
                    for dx in 0..2 {
                        let i = (cy * 2 + dy) * pw + cx * 2 + dx;
                        sb += cb_full[i];
                        sr += cr_full[i];
                    }
                }
                cb[cy * cw + cx] = sb / 4.0;
                cr[cy * cw + cx] = sr / 4.0;
            }
        }
        Self { mb_w, mb_h, y, cb, cr }
    }

    fn from_ycbcr(img: &YCbCrImage, width: usize, height: usize) -> Self {
        let mb_w = macroblock_dim(width);
        let mb_h = macroblock_dim(height);
        let (pw, ph) = (mb_w * 16, mb_h * 16);
        let (cw, ch) = (pw / 2, ph / 2);

        let mut y = vec![0f64; pw * ph];
        for py in 0..ph {
            for px in 0..pw {
                let sx = px.min(img.width() - 1);
                let sy = py.min(img.height() - 1);
                y[py * pw + px] = img.y_plane()[sy * img.width() + sx] as f64 - 128.0;
            }
        }
        let (icw, ich) = (img.width() / 2, img.height() / 2);
        let mut cb = vec![0f64; cw * ch];
        let mut cr = vec![0f64; cw * ch];
        for cy in 0..ch {
            for cx in 0..cw {
                let sx = cx.min(icw - 1);
                let sy = cy.min(ich - 1);
                cb[cy * cw + cx] = img.cb_plane()[sy * icw + sx] as f64 - 128.0;
                cr[cy * cw + cx] = img.cr_plane()[sy * icw + sx] as f64 - 128.0;
            }
        }
        Self { mb_w, mb_h, y, cb, cr }
    }

    fn block_samples(&self, mb_x: usize, mb_y: usize, block: usize) -> [f64; 64] {
        let mut samples = [0f64; 64];
        match block {
            0 | 1 => {
                let plane = if block == 0 { &self.cr } else { &self.cb };
                let stride = self.mb_w * 8;
                for row in 0..8 {
                    for col in 0..8 {
                        samples[row * 8 + col] =
                            plane[(mb_y * 8 + row) * stride + mb_x * 8 + col];
                    }
                }
            }
            _ => {
                let (dx, dy) = match block {
                    2 => (0, 0),
                    3 => (8, 0),
                    4 => (0, 8),
                    _ => (8, 8),
                };
                let stride = self.mb_w * 16;
                for row in 0..8 {
                    for col in 0..8 {
                        samples[row * 8 + col] =
                            self.y[(mb_y * 16 + dy + row) * stride + mb_x * 16 + dx + col];
                    }
                }
            }
        }
        samples
    }
}

/// Encodes a replacement image, reusing the original's codes outside the
/// dirty macroblock set.
pub struct MdecEncoder<'a> {
    original: Option<&'a ParsedMdecImage>,
    planes: EncoderPlanes,
    dirty: HashSet<(usize, usize)>,
}

impl<'a> MdecEncoder<'a> {
    /// Partial encoder: dirty macroblocks come from the replacement image,
    /// the rest from the parsed original.
    pub fn with_original(
        original: &'a ParsedMdecImage,
        replacement: &RgbImage,
        dirty: &[(usize, usize)],
    ) -> Result<Self> {
        if replacement.width() < original.width() || replacement.height() < original.height() {
            return Err(Error::invalid_param(format!(
                "replacement {}x{} is smaller than the frame {}x{}",
                replacement.width(),
                replacement.height(),
                original.width(),
                original.height()
            )));
        }
        Ok(Self {
            original: Some(original),
            planes: EncoderPlanes::from_rgb(replacement, original.width(), original.height()),
            dirty: dirty.iter().copied().collect(),
        })
    }

    /// Full-frame encoder from an RGB image: every macroblock is dirty.
    pub fn from_rgb(img: &RgbImage) -> Self {
        let planes = EncoderPlanes::from_rgb(img, img.width(), img.height());
        let dirty = all_macroblocks(planes.mb_w, planes.mb_h);
        Self {
            original: None,
            planes,
            dirty,
        }
    }

    /// Full-frame encoder from planar YCbCr.
    pub fn from_ycbcr(img: &YCbCrImage) -> Self {
        let planes = EncoderPlanes::from_ycbcr(img, img.width(), img.height());
        let dirty = all_macroblocks(planes.mb_w, planes.mb_h);
        Self {
            original: None,
            planes,
            dirty,
        }
    }

    /// Produce the frame's code stream with dirty macroblocks quantized at
    /// `qscale`.
    pub fn stream(&self, qscale: u8) -> Result<Vec<MdecCode>> {
        let mut codes = Vec::new();
        for mb_x in 0..self.planes.mb_w {
            for mb_y in 0..self.planes.mb_h {
                if self.dirty.contains(&(mb_x, mb_y)) {
                    for block in 0..6 {
                        let samples = self.planes.block_samples(mb_x, mb_y, block);
                        encode_block(&samples, qscale, &mut codes);
                    }
                } else if let Some(original) = self.original {
                    for block in original.macroblock_blocks(mb_x, mb_y) {
                        codes.extend_from_slice(block);
                    }
                } else {
                    return Err(Error::invalid_param(format!(
                        "macroblock ({mb_x}, {mb_y}) is clean but there is no original frame"
                    )));
                }
            }
        }
        Ok(codes)
    }
}

fn all_macroblocks(mb_w: usize, mb_h: usize) -> HashSet<(usize, usize)> {
    let mut set = HashSet::with_capacity(mb_w * mb_h);
    for x in 0..mb_w {
        for y in 0..mb_h {
            set.insert((x, y));
        }
    }
    set
}

/// Forward-DCT, quantize and run-length code one 8x8 block.
fn encode_block(samples: &[f64; 64], qscale: u8, out: &mut Vec<MdecCode>) {
    let coefficients = fdct_f64(samples);

    let dc = (coefficients[0] / (PSX_QUANT_TABLE[0] as f64 * 2.0))
        .round()
        .clamp(-512.0, 511.0) as i16;
    out.push(MdecCode::header(qscale, dc));

    let mut run = 0u8;
    for zig in 1..64 {
        let raw = coefficients[ZIGZAG[zig]];
        let level = (raw * 16.0 / (PSX_QUANT_TABLE[zig] as f64 * qscale as f64 * 2.0))
            .round()
            .clamp(-512.0, 511.0) as i16;
        if level == 0 {
            run += 1;
        } else {
            out.push(MdecCode::run_level(run, level));
            run = 0;
        }
    }
    out.push(MdecCode::END_OF_BLOCK);
}

/// Find macroblocks whose pixels differ beyond `tolerance` in any channel,
/// honoring the optional rectangle and bitmap masks.
pub fn find_diff_macroblocks(
    original: &RgbImage,
    replacement: &RgbImage,
    tolerance: i32,
    rect: Option<Rect>,
    mask: Option<&RgbImage>,
) -> Vec<(usize, usize)> {
    let mb_w = macroblock_dim(original.width());
    let mb_h = macroblock_dim(original.height());
    let mut dirty = Vec::new();
    for mb_y in 0..mb_h {
        for mb_x in 0..mb_w {
            if macroblock_differs(original, replacement, tolerance, rect, mask, mb_x, mb_y) {
                dirty.push((mb_x, mb_y));
            }
        }
    }
    dirty
}

fn macroblock_differs(
    original: &RgbImage,
    replacement: &RgbImage,
    tolerance: i32,
    rect: Option<Rect>,
    mask: Option<&RgbImage>,
    mb_x: usize,
    mb_y: usize,
) -> bool {
    if let Some(rect) = rect {
        if !rect.intersects(mb_x as i32 * 16, mb_y as i32 * 16, 16, 16) {
            return false;
        }
    }
    let x0 = mb_x * 16;
    let y0 = mb_y * 16;
    for y in y0..(y0 + 16).min(original.height()) {
        for x in x0..(x0 + 16).min(original.width()) {
            if let Some(rect) = rect {
                if !rect.contains(x as i32, y as i32) {
                    continue;
                }
            }
            if let Some(mask) = mask {
                if mask.pixel(x, y) & 0xFFFFFF == 0 {
                    continue;
                }
            }
            let a = original.pixel(x, y);
            let b = replacement.pixel(x, y);
            let dr = ((a >> 16) & 0xFF) as i32 - ((b >> 16) & 0xFF) as i32;
            let dg = ((a >> 8) & 0xFF) as i32 - ((b >> 8) & 0xFF) as i32;
            let db = (a & 0xFF) as i32 - (b & 0xFF) as i32;
            if dr.abs() > tolerance || dg.abs() > tolerance || db.abs() > tolerance {
                return true;
            }
        }
    }
    false
}

/// Compress `encoder`'s stream within `byte_budget`, raising the qscale of
/// the dirty macroblocks one step at a time. Fails with `TooMuchEnergy` at
/// qscale 63.
pub fn compress_replacement(
    compressor: &BitstreamCompressor,
    encoder: &MdecEncoder<'_>,
    width: usize,
    height: usize,
    start_qscale: u8,
    byte_budget: usize,
) -> Result<Vec<u8>> {
    for qscale in start_qscale.max(1)..=63 {
        let codes = encoder.stream(qscale)?;
        let payload = match compressor.compress(&mut CodeSliceSource::new(&codes), width, height) {
            Ok(payload) => payload,
            Err(Error::Codec(CodecError::TooMuchEnergy(msg))) => {
                // a higher qscale shrinks the levels; keep going
                tracing::debug!(qscale, %msg, "levels uncodable at this qscale");
                continue;
            }
            Err(e) => return Err(e),
        };
        if payload.len() <= byte_budget {
            if qscale > start_qscale {
                tracing::info!(qscale, size = payload.len(), "frame fit after raising qscale");
            }
            return Ok(payload);
        }
        tracing::debug!(
            qscale,
            size = payload.len(),
            byte_budget,
            "compressed frame over budget"
        );
    }
    Err(CodecError::TooMuchEnergy(format!(
        "frame does not fit in {byte_budget} bytes at any qscale"
    ))
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstreams::BitstreamFormat;
    use crate::mdec::{MdecDecoder, MdecDecoderDouble};

    fn gradient_image(width: usize, height: usize) -> RgbImage {
        let mut img = RgbImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let r = (x * 255 / width.max(1)) as u32;
                let g = (y * 255 / height.max(1)) as u32;
                let b = 128u32;
                img.set_pixel(x, y, (r << 16) | (g << 8) | b);
            }
        }
        img
    }

    #[test]
    fn test_full_encode_decode_reconstruction() {
        let img = gradient_image(32, 32);
        let encoder = MdecEncoder::from_rgb(&img);
        let codes = encoder.stream(1).unwrap();
        assert_eq!(
            codes.iter().filter(|c| c.is_eob()).count(),
            blocks(32, 32)
        );

        let mut decoder = MdecDecoderDouble::new(32, 32);
        decoder.decode(&mut CodeSliceSource::new(&codes)).unwrap();
        let mut out = vec![0u32; 32 * 32];
        decoder.read_decoded_rgb(32, 32, &mut out).unwrap();

        let mut total_err = 0i64;
        for (a, b) in img.data().iter().zip(&out) {
            for shift in [16, 8, 0] {
                let d = ((a >> shift) & 0xFF) as i64 - ((b >> shift) & 0xFF) as i64;
                total_err += d.abs();
            }
        }
        let mean_err = total_err as f64 / (32.0 * 32.0 * 3.0);
        assert!(mean_err < 6.0, "mean abs error {mean_err}");
    }

    #[test]
    fn test_empty_dirty_set_reproduces_payload() {
        let img = gradient_image(32, 16);
        let payload = {
            let encoder = MdecEncoder::from_rgb(&img);
            let codes = encoder.stream(2).unwrap();
            BitstreamCompressor::new(BitstreamFormat::StrV2)
                .compress(&mut CodeSliceSource::new(&codes), 32, 16)
                .unwrap()
        };

        let mut unc = crate::bitstreams::BitstreamUncompressor::identify(&payload).unwrap();
        let parsed = ParsedMdecImage::parse(&mut unc, 32, 16).unwrap();
        assert_eq!(parsed.frame_qscale(), 2);

        let encoder = MdecEncoder::with_original(&parsed, &img, &[]).unwrap();
        let replacement = compress_replacement(
            &BitstreamCompressor::new(BitstreamFormat::StrV2),
            &encoder,
            32,
            16,
            parsed.frame_qscale(),
            payload.len(),
        )
        .unwrap();
        assert_eq!(replacement, payload);
    }

    #[test]
    fn test_tolerance_boundary() {
        let original = gradient_image(32, 32);
        let mut replacement = original.clone();
        // green channel differs by exactly 10 at one pixel
        let p = original.pixel(5, 5);
        let g = (p >> 8) & 0xFF;
        replacement.set_pixel(5, 5, (p & 0xFF00FF) | ((g + 10) << 8));

        assert!(find_diff_macroblocks(&original, &replacement, 10, None, None).is_empty());
        assert_eq!(
            find_diff_macroblocks(&original, &replacement, 9, None, None),
            vec![(0, 0)]
        );
    }

    #[test]
    fn test_rect_and_mask_filters() {
        let original = gradient_image(64, 32);
        let mut replacement = original.clone();
        replacement.set_pixel(40, 10, 0xFFFFFF); // macroblock (2, 0)

        // rect mask not covering the change
        let rect = Rect { x: 0, y: 0, width: 16, height: 16 };
        assert!(find_diff_macroblocks(&original, &replacement, 0, Some(rect), None).is_empty());

        // bitmap mask zero at the changed pixel
        let mask = RgbImage::new(64, 32);
        assert!(find_diff_macroblocks(&original, &replacement, 0, None, Some(&mask)).is_empty());

        assert_eq!(
            find_diff_macroblocks(&original, &replacement, 0, None, None),
            vec![(2, 0)]
        );
    }

    #[test]
    fn test_budget_failure_raises_too_much_energy() {
        // a noisy frame cannot fit in a handful of bytes at any qscale
        let mut img = RgbImage::new(16, 16);
        for y in 0..16 {
            for x in 0..16 {
                let v = ((x * 7919 + y * 104729) % 256) as u32;
                img.set_pixel(x, y, (v << 16) | ((255 - v) << 8) | (v * 37 % 256));
            }
        }
        let encoder = MdecEncoder::from_rgb(&img);
        let err = compress_replacement(
            &BitstreamCompressor::new(BitstreamFormat::StrV2),
            &encoder,
            16,
            16,
            1,
            24,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Codec(CodecError::TooMuchEnergy(_))
        ));
    }
}
