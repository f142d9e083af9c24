//! Iki-engine framing.
//!
//! Iki frames carry their own dimensions in a 10-byte header, all 16-bit
//! little-endian: half the MDEC code count, the `0x3800` magic, width,
//! height, qscale. The body is v2-style (absolute 10-bit DC, word-swapped)
//! and frames frequently end early relative to their presentation clock, so
//! trailing garbage after the last block is tolerated.

use byteorder::{ByteOrder, LittleEndian};

use super::strv2::MAGIC;
use super::ParsedHeader;

/// Header length in bytes.
pub const HEADER_LEN: usize = 10;

pub(super) fn parse_header(data: &[u8]) -> Option<ParsedHeader> {
    if data.len() < HEADER_LEN {
        return None;
    }
    let half_code_count = LittleEndian::read_u16(&data[0..2]);
    let magic = LittleEndian::read_u16(&data[2..4]);
    let width = LittleEndian::read_u16(&data[4..6]);
    let height = LittleEndian::read_u16(&data[6..8]);
    let qscale = LittleEndian::read_u16(&data[8..10]);
    if magic != MAGIC || half_code_count == 0 {
        return None;
    }
    if width == 0 || height == 0 || width > 640 || height > 480 {
        return None;
    }
    if !(1..=63).contains(&qscale) {
        return None;
    }
    Some(ParsedHeader {
        luma_qscale: qscale as u8,
        chroma_qscale: qscale as u8,
        body_offset: HEADER_LEN,
    })
}

/// Frame dimensions recorded in the header, for demuxer cross-checks.
pub fn dimensions(data: &[u8]) -> Option<(u16, u16)> {
    parse_header(data)?;
    Some((
        LittleEndian::read_u16(&data[4..6]),
        LittleEndian::read_u16(&data[6..8]),
    ))
}

pub(super) fn write_header(
    out: &mut Vec<u8>,
    code_count: usize,
    qscale: u8,
    width: u16,
    height: u16,
) {
    let half_count = code_count.div_ceil(2) as u16;
    for field in [half_count, MAGIC, width, height, qscale as u16] {
        out.extend_from_slice(&field.to_le_bytes());
    }
}
