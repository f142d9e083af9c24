//! MDEC code stream to baseline JFIF translation.
//!
//! Converts a frame's MDEC codes straight into a JPEG file without a pixel
//! decode: the PSX dequantized coefficients are re-quantized against a JPEG
//! table derived from the frame qscale and entropy-coded with the standard
//! Huffman tables. Coefficients that overflow JPEG's baseline range raise
//! `TooMuchEnergy` and the caller skips or error-frames the frame.

use std::collections::HashMap;
use std::sync::OnceLock;

use byteorder::{BigEndian, WriteBytesExt};

use strdec_core::bitstream::BitWriter;
use strdec_core::error::{CodecError, Result};
use strdec_core::mdec::{macroblock_dim, PSX_QUANT_TABLE, ZIGZAG};

use crate::mdec::{read_block_coefficients, MdecCodeSource};

// Standard JPEG Huffman table specs (Annex K).
const DC_LUMA_BITS: [u8; 16] = [0, 1, 5, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0];
const DC_LUMA_VALS: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];
const DC_CHROMA_BITS: [u8; 16] = [0, 3, 1, 1, 1, 1, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0];
const DC_CHROMA_VALS: [u8; 12] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11];

const AC_LUMA_BITS: [u8; 16] = [0, 2, 1, 3, 3, 2, 4, 3, 5, 5, 4, 4, 0, 0, 1, 125];
#[rustfmt::skip]
const AC_LUMA_VALS: [u8; 162] = [
    0x01, 0x02, 0x03, 0x00, 0x04, 0x11, 0x05, 0x12, 0x21, 0x31, 0x41, 0x06, 0x13, 0x51, 0x61, 0x07,
    0x22, 0x71, 0x14, 0x32, 0x81, 0x91, 0xA1, 0x08, 0x23, 0x42, 0xB1, 0xC1, 0x15, 0x52, 0xD1, 0xF0,
    0x24, 0x33, 0x62, 0x72, 0x82, 0x09, 0x0A, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x25, 0x26, 0x27, 0x28,
    0x29, 0x2A, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3A, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49,
    0x4A, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5A, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x69,
    0x6A, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7A, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88, 0x89,
    0x8A, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9A, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7,
    0xA8, 0xA9, 0xAA, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6, 0xB7, 0xB8, 0xB9, 0xBA, 0xC2, 0xC3, 0xC4, 0xC5,
    0xC6, 0xC7, 0xC8, 0xC9, 0xCA, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7, 0xD8, 0xD9, 0xDA, 0xE1, 0xE2,
    0xE3, 0xE4, 0xE5, 0xE6, 0xE7, 0xE8, 0xE9, 0xEA, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF8,
    0xF9, 0xFA,
];

const AC_CHROMA_BITS: [u8; 16] = [0, 2, 1, 2, 4, 4, 3, 4, 7, 5, 4, 4, 0, 1, 2, 119];
#[rustfmt::skip]
const AC_CHROMA_VALS: [u8; 162] = [
    0x00, 0x01, 0x02, 0x03, 0x11, 0x04, 0x05, 0x21, 0x31, 0x06, 0x12, 0x41, 0x51, 0x07, 0x61, 0x71,
    0x13, 0x22, 0x32, 0x81, 0x08, 0x14, 0x42, 0x91, 0xA1, 0xB1, 0xC1, 0x09, 0x23, 0x33, 0x52, 0xF0,
    0x15, 0x62, 0x72, 0xD1, 0x0A, 0x16, 0x24, 0x34, 0xE1, 0x25, 0xF1, 0x17, 0x18, 0x19, 0x1A, 0x26,
    0x27, 0x28, 0x29, 0x2A, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3A, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48,
    0x49, 0x4A, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58, 0x59, 0x5A, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68,
    0x69, 0x6A, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78, 0x79, 0x7A, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87,
    0x88, 0x89, 0x8A, 0x92, 0x93, 0x94, 0x95, 0x96, 0x97, 0x98, 0x99, 0x9A, 0xA2, 0xA3, 0xA4, 0xA5,
    0xA6, 0xA7, 0xA8, 0xA9, 0xAA, 0xB2, 0xB3, 0xB4, 0xB5, 0xB6, 0xB7, 0xB8, 0xB9, 0xBA, 0xC2, 0xC3,
    0xC4, 0xC5, 0xC6, 0xC7, 0xC8, 0xC9, 0xCA, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7, 0xD8, 0xD9, 0xDA,
    0xE2, 0xE3, 0xE4, 0xE5, 0xE6, 0xE7, 0xE8, 0xE9, 0xEA, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7, 0xF8,
    0xF9, 0xFA,
];

/// Canonical Huffman code assignment: symbol -> (code bits, length).
fn build_codes(bits: &[u8; 16], vals: &[u8]) -> HashMap<u8, (u32, u8)> {
    let mut map = HashMap::new();
    let mut code = 0u32;
    let mut k = 0usize;
    for (i, &count) in bits.iter().enumerate() {
        let len = i as u8 + 1;
        for _ in 0..count {
            map.insert(vals[k], (code, len));
            code += 1;
            k += 1;
        }
        code <<= 1;
    }
    map
}

fn dc_luma_codes() -> &'static HashMap<u8, (u32, u8)> {
    static T: OnceLock<HashMap<u8, (u32, u8)>> = OnceLock::new();
    T.get_or_init(|| build_codes(&DC_LUMA_BITS, &DC_LUMA_VALS))
}

fn dc_chroma_codes() -> &'static HashMap<u8, (u32, u8)> {
    static T: OnceLock<HashMap<u8, (u32, u8)>> = OnceLock::new();
    T.get_or_init(|| build_codes(&DC_CHROMA_BITS, &DC_CHROMA_VALS))
}

fn ac_luma_codes() -> &'static HashMap<u8, (u32, u8)> {
    static T: OnceLock<HashMap<u8, (u32, u8)>> = OnceLock::new();
    T.get_or_init(|| build_codes(&AC_LUMA_BITS, &AC_LUMA_VALS))
}

fn ac_chroma_codes() -> &'static HashMap<u8, (u32, u8)> {
    static T: OnceLock<HashMap<u8, (u32, u8)>> = OnceLock::new();
    T.get_or_init(|| build_codes(&AC_CHROMA_BITS, &AC_CHROMA_VALS))
}

/// Coefficient category: the number of magnitude bits.
fn category(value: i32) -> u8 {
    (32 - value.unsigned_abs().leading_zeros()) as u8
}

/// The magnitude bits: the value itself when positive, one's complement
/// when negative.
fn magnitude_bits(value: i32, cat: u8) -> u32 {
    if value >= 0 {
        value as u32
    } else {
        (value + (1 << cat) - 1) as u32
    }
}

type CoefficientBlock = [i32; 64];

/// Translates MDEC frames into baseline JFIF files.
pub struct JpegTranslator {
    width: usize,
    height: usize,
    mb_w: usize,
    mb_h: usize,
    /// Per macroblock: Cr, Cb, Y1..Y4 quantized JPEG levels in zig-zag order.
    macroblocks: Vec<[CoefficientBlock; 6]>,
    /// The derived quantization table, zig-zag order.
    quant: [u8; 64],
    /// AC step multiplier from the configured JPEG quality.
    quant_scale: f64,
}

impl JpegTranslator {
    /// Create a translator for `width` x `height` frames.
    pub fn new(width: usize, height: usize) -> Self {
        let mb_w = macroblock_dim(width);
        let mb_h = macroblock_dim(height);
        Self {
            width,
            height,
            mb_w,
            mb_h,
            macroblocks: vec![[[0; 64]; 6]; mb_w * mb_h],
            quant: [1; 64],
            quant_scale: 1.0,
        }
    }

    /// Set the output quality in [0.0, 1.0]. Quality 1.0 preserves the
    /// MDEC coefficients exactly; lower values coarsen the AC steps.
    pub fn set_quality(&mut self, quality: f64) {
        self.quant_scale = 1.0 / quality.clamp(0.05, 1.0);
    }

    /// Consume one frame's codes, re-quantizing into JPEG levels.
    pub fn read_mdec(&mut self, src: &mut dyn MdecCodeSource) -> Result<()> {
        let mut quant_ready = false;
        for mb_x in 0..self.mb_w {
            for mb_y in 0..self.mb_h {
                let macroblock = mb_x * self.mb_h + mb_y;
                for block in 0..6 {
                    let (coefficients, qscale) =
                        read_block_coefficients(src, macroblock, block)?;
                    if !quant_ready {
                        self.derive_quant_table(qscale);
                        quant_ready = true;
                    }
                    let out = &mut self.macroblocks[macroblock][block];
                    for zig in 0..64 {
                        let dequantized = coefficients[ZIGZAG[zig]];
                        let q = self.quant[zig] as i32;
                        let level = if dequantized >= 0 {
                            (dequantized + q / 2) / q
                        } else {
                            -((-dequantized + q / 2) / q)
                        };
                        let limit = if zig == 0 { 2047 } else { 1023 };
                        if level.abs() > limit {
                            return Err(CodecError::TooMuchEnergy(format!(
                                "coefficient {level} exceeds the baseline JPEG range \
                                 in macroblock {macroblock} block {block}"
                            ))
                            .into());
                        }
                        out[zig] = level;
                    }
                }
            }
        }
        Ok(())
    }

    /// Derive the JPEG quantization table from the PSX table and qscale so
    /// JPEG dequantization reproduces the MDEC coefficient values.
    fn derive_quant_table(&mut self, qscale: u8) {
        self.quant[0] = (PSX_QUANT_TABLE[0] as u32 * 2).clamp(1, 255) as u8;
        for zig in 1..64 {
            let step = (PSX_QUANT_TABLE[zig] as f64 * qscale as f64 * 2.0 / 16.0
                * self.quant_scale)
                .round() as u32;
            self.quant[zig] = step.clamp(1, 255) as u8;
        }
    }

    /// Serialize the frame as a JFIF file.
    pub fn write_jpeg(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&[0xFF, 0xD8]); // SOI

        // APP0 JFIF
        out.extend_from_slice(&[0xFF, 0xE0]);
        out.write_u16::<BigEndian>(16)?;
        out.extend_from_slice(b"JFIF\0");
        out.extend_from_slice(&[1, 1, 0]); // v1.1, no density units
        out.write_u16::<BigEndian>(1)?;
        out.write_u16::<BigEndian>(1)?;
        out.extend_from_slice(&[0, 0]); // no thumbnail

        // DQT, one table used by all components
        out.extend_from_slice(&[0xFF, 0xDB]);
        out.write_u16::<BigEndian>(2 + 1 + 64)?;
        out.push(0x00);
        out.extend_from_slice(&self.quant);

        // SOF0, 4:2:0 sampling
        out.extend_from_slice(&[0xFF, 0xC0]);
        out.write_u16::<BigEndian>(2 + 6 + 3 * 3)?;
        out.push(8);
        out.write_u16::<BigEndian>(self.height as u16)?;
        out.write_u16::<BigEndian>(self.width as u16)?;
        out.push(3);
        out.extend_from_slice(&[1, 0x22, 0]); // Y
        out.extend_from_slice(&[2, 0x11, 0]); // Cb
        out.extend_from_slice(&[3, 0x11, 0]); // Cr

        write_dht(out, 0x00, &DC_LUMA_BITS, &DC_LUMA_VALS)?;
        write_dht(out, 0x10, &AC_LUMA_BITS, &AC_LUMA_VALS)?;
        write_dht(out, 0x01, &DC_CHROMA_BITS, &DC_CHROMA_VALS)?;
        write_dht(out, 0x11, &AC_CHROMA_BITS, &AC_CHROMA_VALS)?;

        // SOS
        out.extend_from_slice(&[0xFF, 0xDA]);
        out.write_u16::<BigEndian>(2 + 1 + 3 * 2 + 3)?;
        out.push(3);
        out.extend_from_slice(&[1, 0x00, 2, 0x11, 3, 0x11]);
        out.extend_from_slice(&[0, 63, 0]);

        let scan = self.encode_scan()?;
        // byte stuffing: 0xFF in entropy data is followed by 0x00
        for byte in scan {
            out.push(byte);
            if byte == 0xFF {
                out.push(0x00);
            }
        }

        out.extend_from_slice(&[0xFF, 0xD9]); // EOI
        Ok(())
    }

    fn encode_scan(&self) -> Result<Vec<u8>> {
        let mut writer = BitWriter::new();
        let mut dc_pred = [0i32; 3]; // Y, Cb, Cr

        // JPEG MCUs go row-major; macroblocks are stored column-major
        for mcu_y in 0..self.mb_h {
            for mcu_x in 0..self.mb_w {
                let mb = &self.macroblocks[mcu_x * self.mb_h + mcu_y];
                // Y1 Y2 Y3 Y4, then Cb, then Cr
                for block in [2usize, 3, 4, 5] {
                    encode_block(&mut writer, &mb[block], &mut dc_pred[0], true);
                }
                encode_block(&mut writer, &mb[1], &mut dc_pred[1], false);
                encode_block(&mut writer, &mb[0], &mut dc_pred[2], false);
            }
        }

        // pad the final byte with one bits
        while writer.position() % 8 != 0 {
            writer.write_bit(true);
        }
        Ok(writer.into_data())
    }
}

fn write_dht(out: &mut Vec<u8>, class_id: u8, bits: &[u8; 16], vals: &[u8]) -> Result<()> {
    out.extend_from_slice(&[0xFF, 0xC4]);
    out.write_u16::<BigEndian>(2 + 1 + 16 + vals.len() as u16)?;
    out.push(class_id);
    out.extend_from_slice(bits);
    out.extend_from_slice(vals);
    Ok(())
}

fn encode_block(writer: &mut BitWriter, levels: &CoefficientBlock, dc_pred: &mut i32, luma: bool) {
    let (dc_codes, ac_codes) = if luma {
        (dc_luma_codes(), ac_luma_codes())
    } else {
        (dc_chroma_codes(), ac_chroma_codes())
    };

    let diff = levels[0] - *dc_pred;
    *dc_pred = levels[0];
    let cat = category(diff);
    let (code, len) = dc_codes[&cat];
    writer.write_bits(code, len);
    if cat > 0 {
        writer.write_bits(magnitude_bits(diff, cat), cat);
    }

    let mut run = 0u32;
    for zig in 1..64 {
        let level = levels[zig];
        if level == 0 {
            run += 1;
            continue;
        }
        while run > 15 {
            let (code, len) = ac_codes[&0xF0]; // ZRL
            writer.write_bits(code, len);
            run -= 16;
        }
        let cat = category(level);
        let symbol = ((run as u8) << 4) | cat;
        let (code, len) = ac_codes[&symbol];
        writer.write_bits(code, len);
        writer.write_bits(magnitude_bits(level, cat), cat);
        run = 0;
    }
    if run > 0 {
        let (code, len) = ac_codes[&0x00]; // EOB
        writer.write_bits(code, len);
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
            codes.push(MdecCode::header(2, dc));
            codes.push(MdecCode::END_OF_BLOCK);
        }
        codes
    }

    #[test]
    fn test_category() {
        assert_eq!(category(0), 0);
        assert_eq!(category(1), 1);
        assert_eq!(category(-1), 1);
        assert_eq!(category(2), 2);
        assert_eq!(category(-255), 8);
        assert_eq!(category(1023), 10);
    }

    #[test]
    fn test_huffman_codes_canonical() {
        // the first DC luma symbol is the two-bit code 00
        assert_eq!(dc_luma_codes()[&0], (0b00, 2));
        // AC luma EOB is the standard four-bit 1010
        assert_eq!(ac_luma_codes()[&0x00], (0b1010, 4));
        assert_eq!(ac_luma_codes().len(), 162);
        assert_eq!(ac_chroma_codes().len(), 162);
    }

    #[test]
    fn test_translate_produces_wellformed_jfif() {
        let codes = dc_only_frame(32, 16, 25);
        let mut translator = JpegTranslator::new(32, 16);
        translator
            .read_mdec(&mut CodeSliceSource::new(&codes))
            .unwrap();

        let mut jpeg = Vec::new();
        translator.write_jpeg(&mut jpeg).unwrap();

        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
        assert_eq!(&jpeg[6..11], b"JFIF\0");
        // the quant table derives from the qscale; entry 0 stays the DC step
        assert_eq!(translator.quant[0], 4);
    }

    #[test]
    fn test_short_frame_is_error() {
        let mut codes = dc_only_frame(32, 16, 0);
        codes.truncate(codes.len() - 2);
        let mut translator = JpegTranslator::new(32, 16);
        assert!(translator
            .read_mdec(&mut CodeSliceSource::new(&codes))
            .unwrap_err()
            .is_eof());
    }
}
