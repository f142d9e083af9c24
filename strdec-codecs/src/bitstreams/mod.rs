//! Bitstream codecs: translators between compressed frame payloads and MDEC
//! code streams.
//!
//! All five formats share the MDEC code alphabet and the MPEG-1 AC table;
//! they differ in frame header, DC coding, AC escape width and trailer.
//! Codec dispatch is a tagged variant, not inheritance: format-specific DC
//! state lives in [`DcState`].

pub mod ac_vlc;
pub mod crusader;
pub mod iki;
pub mod lain;
pub mod strv2;
pub mod strv3;

use strdec_core::bitstream::{BitReader, BitWriter};
use strdec_core::error::{BitstreamError, CodecError, Error, Result};
use strdec_core::mdec::{blocks, MdecCode};

use crate::mdec::MdecCodeSource;
use ac_vlc::EscapeLevelWidth;

/// The recognized bitstream formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitstreamFormat {
    /// STR version 2: absolute DC.
    StrV2,
    /// STR version 3: VLC-coded DC differentials.
    StrV3,
    /// Iki engine: v2-style body with dimensions in the header.
    Iki,
    /// Serial Experiments Lain: dual qscale, no word swap, 8-bit escape.
    Lain,
    /// Crusader engine video packets.
    Crusader,
}

/// Header fields every format resolves to.
pub(crate) struct ParsedHeader {
    pub luma_qscale: u8,
    pub chroma_qscale: u8,
    pub body_offset: usize,
}

impl BitstreamFormat {
    /// Identification preference order.
    pub const IDENTIFICATION_ORDER: [BitstreamFormat; 5] = [
        BitstreamFormat::StrV2,
        BitstreamFormat::StrV3,
        BitstreamFormat::Iki,
        BitstreamFormat::Lain,
        BitstreamFormat::Crusader,
    ];

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            BitstreamFormat::StrV2 => "STRv2",
            BitstreamFormat::StrV3 => "STRv3",
            BitstreamFormat::Iki => "Iki",
            BitstreamFormat::Lain => "Lain",
            BitstreamFormat::Crusader => "Crusader",
        }
    }

    /// Whether payload bits are stored as 16-bit little-endian words.
    fn word_swap(self) -> bool {
        !matches!(self, BitstreamFormat::Lain)
    }

    fn escape_width(self) -> EscapeLevelWidth {
        match self {
            BitstreamFormat::Lain => EscapeLevelWidth::Eight,
            _ => EscapeLevelWidth::Ten,
        }
    }

    fn parse_header(self, data: &[u8]) -> Option<ParsedHeader> {
        match self {
            BitstreamFormat::StrV2 => strv2::parse_header(data, 2),
            BitstreamFormat::StrV3 => strv2::parse_header(data, 3),
            BitstreamFormat::Iki => iki::parse_header(data),
            BitstreamFormat::Lain => lain::parse_header(data),
            BitstreamFormat::Crusader => crusader::parse_header(data),
        }
    }

    /// Whether `data` starts with this format's frame header.
    pub fn check_header(self, data: &[u8]) -> bool {
        self.parse_header(data).is_some()
    }

    /// Try each codec's header check in preference order.
    pub fn identify(data: &[u8]) -> Result<BitstreamFormat> {
        Self::IDENTIFICATION_ORDER
            .into_iter()
            .find(|f| f.check_header(data))
            .ok_or_else(|| BitstreamError::UnrecognizedFormat.into())
    }
}

/// Format-specific DC decode state.
#[derive(Debug, Clone, Copy)]
enum DcState {
    /// 10 absolute bits per block.
    Absolute,
    /// STRv3 running predictors.
    Predicted(strv3::DcPredictors),
}

/// Translates one compressed frame payload into MDEC codes.
///
/// The uncompressor owns a copy of the payload so it can be held across
/// frames by the sticky identification stage; [`reset`](Self::reset) re-arms
/// it on the next frame's bytes.
pub struct BitstreamUncompressor {
    format: BitstreamFormat,
    data: Vec<u8>,
    body_offset: usize,
    bit_pos: usize,
    luma_qscale: u8,
    chroma_qscale: u8,
    dc: DcState,
    macroblock: usize,
    block: usize,
    at_block_start: bool,
}

impl BitstreamUncompressor {
    /// Identify the payload's format and build an uncompressor for it.
    pub fn identify(data: &[u8]) -> Result<Self> {
        let format = BitstreamFormat::identify(data)?;
        Self::new(format, data)
    }

    /// Build an uncompressor for a known format.
    pub fn new(format: BitstreamFormat, data: &[u8]) -> Result<Self> {
        let mut this = Self {
            format,
            data: Vec::new(),
            body_offset: 0,
            bit_pos: 0,
            luma_qscale: 0,
            chroma_qscale: 0,
            dc: DcState::Absolute,
            macroblock: 0,
            block: 0,
            at_block_start: true,
        };
        this.reset(data)?;
        Ok(this)
    }

    /// Re-arm on a new frame's payload. Fails with `UnrecognizedFormat` if
    /// the payload no longer matches this uncompressor's format.
    pub fn reset(&mut self, data: &[u8]) -> Result<()> {
        let header = self
            .format
            .parse_header(data)
            .ok_or(BitstreamError::UnrecognizedFormat)?;
        self.data.clear();
        self.data.extend_from_slice(data);
        self.body_offset = header.body_offset;
        self.bit_pos = 0;
        self.luma_qscale = header.luma_qscale;
        self.chroma_qscale = header.chroma_qscale;
        self.dc = match self.format {
            BitstreamFormat::StrV3 => DcState::Predicted(strv3::DcPredictors::default()),
            _ => DcState::Absolute,
        };
        self.macroblock = 0;
        self.block = 0;
        self.at_block_start = true;
        Ok(())
    }

    /// This uncompressor's format.
    pub fn format(&self) -> BitstreamFormat {
        self.format
    }

    /// The frame qscale (luma qscale for Lain).
    pub fn frame_qscale(&self) -> u8 {
        self.luma_qscale
    }

    /// The chroma qscale (equal to the frame qscale except for Lain).
    pub fn chroma_qscale(&self) -> u8 {
        self.chroma_qscale
    }

    fn make_reader(data: &[u8], body_offset: usize, word_swap: bool, bit_pos: usize) -> BitReader<'_> {
        let body = &data[body_offset..];
        let mut reader = if word_swap {
            BitReader::new_word_swapped(body)
        } else {
            BitReader::new(body)
        };
        reader.skip(bit_pos);
        reader
    }

    /// Validate the frame trailer. STRv3 frames end with `11111111110`; a
    /// mismatch is a warning, not an error. Other formats pad with zeros
    /// and are not validated.
    pub fn skip_padding_bits(&mut self) {
        if self.format != BitstreamFormat::StrV3 {
            return;
        }
        let mut reader =
            Self::make_reader(&self.data, self.body_offset, self.format.word_swap(), self.bit_pos);
        match reader.read_bits(strv3::TRAILER_LEN) {
            Ok(bits) if bits == strv3::TRAILER_BITS => {}
            Ok(bits) => {
                tracing::warn!(bits = format!("{bits:011b}"), "incorrect STRv3 trailer bits");
            }
            Err(_) => {
                tracing::warn!("frame ends before the STRv3 trailer bits");
            }
        }
        self.bit_pos = reader.position();
    }
}

impl MdecCodeSource for BitstreamUncompressor {
    fn read_code(&mut self) -> Result<MdecCode> {
        let mut reader =
            Self::make_reader(&self.data, self.body_offset, self.format.word_swap(), self.bit_pos);
        let code = if self.at_block_start {
            let qscale = if self.block < 2 {
                self.chroma_qscale
            } else {
                self.luma_qscale
            };
            let dc = match &mut self.dc {
                DcState::Absolute => reader.read_signed_bits(10)? as i16,
                DcState::Predicted(predictors) => {
                    strv3::read_dc(&mut reader, self.block, predictors, self.macroblock)?
                }
            };
            self.at_block_start = false;
            MdecCode::header(qscale, dc)
        } else {
            let code = ac_vlc::read_ac(
                &mut reader,
                self.format.escape_width(),
                self.macroblock,
                self.block,
            )?;
            if code.is_eob() {
                self.at_block_start = true;
                self.block += 1;
                if self.block == 6 {
                    self.block = 0;
                    self.macroblock += 1;
                }
            }
            code
        };
        self.bit_pos = reader.position();
        Ok(code)
    }
}

/// Translates an MDEC code stream back into a compressed frame payload.
pub struct BitstreamCompressor {
    format: BitstreamFormat,
}

impl BitstreamCompressor {
    /// Create a compressor for `format`.
    pub fn new(format: BitstreamFormat) -> Self {
        Self { format }
    }

    /// The matching compressor for an identified uncompressor.
    pub fn for_uncompressor(uncompressor: &BitstreamUncompressor) -> Self {
        Self::new(uncompressor.format())
    }

    /// Compress `blocks(width, height)` blocks worth of codes into a frame
    /// payload. Block qscales may vary (partial replacement re-encodes only
    /// the dirty macroblocks); the header records the first block's values.
    pub fn compress(
        &self,
        src: &mut dyn MdecCodeSource,
        width: usize,
        height: usize,
    ) -> Result<Vec<u8>> {
        let total_blocks = blocks(width, height);
        let mut writer = if self.format.word_swap() {
            BitWriter::new_word_swapped()
        } else {
            BitWriter::new()
        };
        let mut code_count = 0usize;
        let mut luma_qscale: Option<u8> = None;
        let mut chroma_qscale: Option<u8> = None;
        let mut v3_state = strv3::DcEncodeState::default();

        for block_index in 0..total_blocks {
            let sub = block_index % 6;
            let header = src.read_code()?;
            code_count += 1;
            let qscale = header.top6();
            if !(1..=63).contains(&qscale) {
                return Err(Error::invalid_param(format!(
                    "block {block_index} header qscale {qscale} outside 1..=63"
                )));
            }
            let slot = if sub < 2 {
                &mut chroma_qscale
            } else {
                &mut luma_qscale
            };
            slot.get_or_insert(qscale);

            match self.format {
                BitstreamFormat::StrV3 => {
                    strv3::write_dc(&mut writer, sub, header.bottom10(), &mut v3_state)?
                }
                _ => writer.write_bits((header.bottom10() as u16 & 0x3FF) as u32, 10),
            }

            loop {
                let code = src.read_code()?;
                code_count += 1;
                if code.is_eob() {
                    ac_vlc::write_eob(&mut writer);
                    break;
                }
                let level = code.bottom10();
                if level == 0 {
                    return Err(CodecError::Other(format!(
                        "zero AC level in block {block_index}"
                    ))
                    .into());
                }
                ac_vlc::write_ac(&mut writer, code.top6(), level, self.format.escape_width())?;
            }
        }

        if self.format == BitstreamFormat::StrV3 {
            writer.write_bits(strv3::TRAILER_BITS, strv3::TRAILER_LEN);
        }
        let body = writer.into_data();

        let luma = luma_qscale.unwrap_or(1);
        let chroma = chroma_qscale.unwrap_or(luma);
        let mut out = Vec::with_capacity(16 + body.len());
        match self.format {
            BitstreamFormat::StrV2 => strv2::write_header(&mut out, code_count, chroma, 2),
            BitstreamFormat::StrV3 => strv2::write_header(&mut out, code_count, chroma, 3),
            BitstreamFormat::Iki => {
                iki::write_header(&mut out, code_count, chroma, width as u16, height as u16)
            }
            BitstreamFormat::Lain => lain::write_header(&mut out, code_count, luma, chroma),
            BitstreamFormat::Crusader => crusader::write_header(&mut out, chroma),
        }
        out.extend_from_slice(&body);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mdec::CodeSliceSource;

    /// A 16x16 frame: 6 blocks, each DC-only plus a couple of AC levels in
    /// the luma blocks.
    fn sample_codes(qscale: u8) -> Vec<MdecCode> {
        let mut codes = Vec::new();
        for block in 0..6 {
            let dc = match block {
                0 => -40,
                1 => 44,
                _ => 16 * block as i16,
            };
            codes.push(MdecCode::header(qscale, dc));
            if block >= 2 {
                codes.push(MdecCode::run_level(0, 5));
                codes.push(MdecCode::run_level(3, -2));
                codes.push(MdecCode::run_level(20, 90)); // escape territory
            }
            codes.push(MdecCode::END_OF_BLOCK);
        }
        codes
    }

    fn uncompress_all(unc: &mut BitstreamUncompressor, count_blocks: usize) -> Vec<MdecCode> {
        let mut codes = Vec::new();
        let mut eobs = 0;
        while eobs < count_blocks {
            let code = unc.read_code().unwrap();
            if code.is_eob() {
                eobs += 1;
            }
            codes.push(code);
        }
        codes
    }

    fn round_trip(format: BitstreamFormat) {
        let codes = sample_codes(9);
        let compressor = BitstreamCompressor::new(format);
        let mut src = CodeSliceSource::new(&codes);
        let payload = compressor.compress(&mut src, 16, 16).unwrap();

        assert_eq!(BitstreamFormat::identify(&payload).unwrap(), format);

        let mut unc = BitstreamUncompressor::new(format, &payload).unwrap();
        let decoded = uncompress_all(&mut unc, 6);
        assert_eq!(decoded, codes);

        // and compressing the decoded stream reproduces the payload
        let mut src = CodeSliceSource::new(&decoded);
        let payload2 = compressor.compress(&mut src, 16, 16).unwrap();
        assert_eq!(payload2, payload);
    }

    #[test]
    fn test_strv2_round_trip() {
        round_trip(BitstreamFormat::StrV2);
    }

    #[test]
    fn test_iki_round_trip() {
        round_trip(BitstreamFormat::Iki);
    }

    #[test]
    fn test_crusader_round_trip() {
        round_trip(BitstreamFormat::Crusader);
    }

    #[test]
    fn test_lain_round_trip() {
        let mut codes = Vec::new();
        for block in 0..6 {
            let qscale = if block < 2 { 11 } else { 7 };
            codes.push(MdecCode::header(qscale, block as i16 * 8));
            codes.push(MdecCode::run_level(1, -6));
            codes.push(MdecCode::END_OF_BLOCK);
        }
        let compressor = BitstreamCompressor::new(BitstreamFormat::Lain);
        let mut src = CodeSliceSource::new(&codes);
        let payload = compressor.compress(&mut src, 16, 16).unwrap();

        let mut unc = BitstreamUncompressor::identify(&payload).unwrap();
        assert_eq!(unc.format(), BitstreamFormat::Lain);
        assert_eq!(unc.frame_qscale(), 7);
        assert_eq!(unc.chroma_qscale(), 11);
        let decoded = uncompress_all(&mut unc, 6);
        assert_eq!(decoded, codes);
    }

    #[test]
    fn test_strv3_round_trip_with_dc_drift() {
        // multiples of 4 round-trip exactly
        let codes = sample_codes(9);
        let compressor = BitstreamCompressor::new(BitstreamFormat::StrV3);
        let mut src = CodeSliceSource::new(&codes);
        let payload = compressor.compress(&mut src, 16, 16).unwrap();

        let mut unc = BitstreamUncompressor::new(BitstreamFormat::StrV3, &payload).unwrap();
        let decoded = uncompress_all(&mut unc, 6);
        assert_eq!(decoded, codes);
        unc.skip_padding_bits();

        // off-grid DC values drift by at most 3
        let codes = vec![
            MdecCode::header(9, -41),
            MdecCode::END_OF_BLOCK,
            MdecCode::header(9, 13),
            MdecCode::END_OF_BLOCK,
            MdecCode::header(9, 510),
            MdecCode::END_OF_BLOCK,
            MdecCode::header(9, 1),
            MdecCode::END_OF_BLOCK,
            MdecCode::header(9, -2),
            MdecCode::END_OF_BLOCK,
            MdecCode::header(9, 0),
            MdecCode::END_OF_BLOCK,
        ];
        let mut src = CodeSliceSource::new(&codes);
        let payload = compressor.compress(&mut src, 16, 16).unwrap();
        let mut unc = BitstreamUncompressor::new(BitstreamFormat::StrV3, &payload).unwrap();
        let decoded = uncompress_all(&mut unc, 6);
        for (orig, dec) in codes.iter().zip(&decoded) {
            if orig.is_eob() {
                assert!(dec.is_eob());
            } else {
                assert_eq!(dec.top6(), orig.top6());
                assert!((dec.bottom10() as i32 - orig.bottom10() as i32).abs() <= 3);
            }
        }
    }

    #[test]
    fn test_identify_unrecognized() {
        let err = BitstreamFormat::identify(&[0u8; 32]).unwrap_err();
        assert!(matches!(
            err,
            Error::Bitstream(BitstreamError::UnrecognizedFormat)
        ));
    }

    #[test]
    fn test_reset_rejects_other_format() {
        let codes = sample_codes(5);
        let payload_v2 = BitstreamCompressor::new(BitstreamFormat::StrV2)
            .compress(&mut CodeSliceSource::new(&codes), 16, 16)
            .unwrap();
        let payload_cru = BitstreamCompressor::new(BitstreamFormat::Crusader)
            .compress(&mut CodeSliceSource::new(&codes), 16, 16)
            .unwrap();

        let mut unc = BitstreamUncompressor::new(BitstreamFormat::StrV2, &payload_v2).unwrap();
        assert!(unc.reset(&payload_cru).is_err());
        // still usable on its own format
        unc.reset(&payload_v2).unwrap();
        let decoded = uncompress_all(&mut unc, 6);
        assert_eq!(decoded, codes);
    }

    #[test]
    fn test_truncated_frame_is_end_of_stream() {
        let codes = sample_codes(5);
        let payload = BitstreamCompressor::new(BitstreamFormat::StrV2)
            .compress(&mut CodeSliceSource::new(&codes), 16, 16)
            .unwrap();
        // keep the header plus one body word: enough for the first block's
        // DC and EOB, cutting the second block's DC short
        let truncated = &payload[..strv2::HEADER_LEN + 2];
        let mut unc = BitstreamUncompressor::new(BitstreamFormat::StrV2, truncated).unwrap();
        assert!(!unc.read_code().unwrap().is_eob()); // Cr header
        assert!(unc.read_code().unwrap().is_eob()); // Cr EOB
        assert!(unc.read_code().unwrap_err().is_eof());
    }
}
