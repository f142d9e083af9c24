//! Serial Experiments Lain framing.
//!
//! Lain frames carry separate luma and chroma qscales in the first two
//! header bytes, followed by half the MDEC code count, the `0x3800` magic
//! and a zero version word. The body is plain byte order (no 16-bit word
//! swap) and the AC escape stores an 8-bit signed level instead of 10.

use byteorder::{ByteOrder, LittleEndian};

use super::strv2::MAGIC;
use super::ParsedHeader;

/// Header length in bytes.
pub const HEADER_LEN: usize = 8;

pub(super) fn parse_header(data: &[u8]) -> Option<ParsedHeader> {
    if data.len() < HEADER_LEN {
        return None;
    }
    let luma_qscale = data[0];
    let chroma_qscale = data[1];
    let half_code_count = LittleEndian::read_u16(&data[2..4]);
    let magic = LittleEndian::read_u16(&data[4..6]);
    let version = LittleEndian::read_u16(&data[6..8]);
    if magic != MAGIC || version != 0 || half_code_count == 0 {
        return None;
    }
    if !(1..=63).contains(&luma_qscale) || !(1..=63).contains(&chroma_qscale) {
        return None;
    }
    Some(ParsedHeader {
        luma_qscale,
        chroma_qscale,
        body_offset: HEADER_LEN,
    })
}

pub(super) fn write_header(
    out: &mut Vec<u8>,
    code_count: usize,
    luma_qscale: u8,
    chroma_qscale: u8,
) {
    let half_count = code_count.div_ceil(2) as u16;
    out.push(luma_qscale);
    out.push(chroma_qscale);
    out.extend_from_slice(&half_count.to_le_bytes());
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
}
