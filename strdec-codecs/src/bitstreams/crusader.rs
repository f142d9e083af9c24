//! Crusader-engine framing.
//!
//! The Crusader demuxer reassembles video packets from the engine's AV
//! stream into payloads with an 8-byte header: the ASCII magic `MDEC`, a
//! 16-bit little-endian qscale and a version word of 1. The body is
//! v2-style (absolute 10-bit DC, word-swapped, zero padding).

use byteorder::{ByteOrder, LittleEndian};

use super::ParsedHeader;

/// ASCII magic at the start of every Crusader frame payload.
pub const MAGIC: &[u8; 4] = b"MDEC";
/// Header length in bytes.
pub const HEADER_LEN: usize = 8;

pub(super) fn parse_header(data: &[u8]) -> Option<ParsedHeader> {
    if data.len() < HEADER_LEN {
        return None;
    }
    if &data[0..4] != MAGIC {
        return None;
    }
    let qscale = LittleEndian::read_u16(&data[4..6]);
    let version = LittleEndian::read_u16(&data[6..8]);
    if version != 1 || !(1..=63).contains(&qscale) {
        return None;
    }
    Some(ParsedHeader {
        luma_qscale: qscale as u8,
        chroma_qscale: qscale as u8,
        body_offset: HEADER_LEN,
    })
}

pub(super) fn write_header(out: &mut Vec<u8>, qscale: u8) {
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&(qscale as u16).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
}
