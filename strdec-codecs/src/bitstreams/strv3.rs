//! STR version 3 DC prediction.
//!
//! v3 frames reuse the v2 framing and AC alphabet but code each block's DC
//! as a variable-length differential against the previous block's DC of the
//! same color component. The differential is stored with 8 bits of
//! precision and scaled by 4 to restore the 10-bit DC range, which makes the
//! v3 *encoder* lossy: DC values round to the nearest multiple of 4 before
//! differencing. Frames end with the 11-bit word `11111111110`.

use std::sync::OnceLock;

use strdec_core::bitstream::{BitReader, BitWriter};
use strdec_core::error::{BitstreamError, CodecError, Result};

/// The 11 bits trailing every v3 frame.
pub const TRAILER_BITS: u32 = 0x7FE;
/// Trailer length in bits.
pub const TRAILER_LEN: u8 = 11;

/// Running DC predictors, reset to zero at frame start.
#[derive(Debug, Clone, Copy, Default)]
pub struct DcPredictors {
    cr: i32,
    cb: i32,
    y: i32,
}

/// One DC variable-length code: the code bits, the differential field width,
/// and the positive differential range it covers. The zero code has a
/// zero-width differential.
struct DcVlc {
    bits: u16,
    len: u8,
    diff_bits: u8,
    pos_min: i32,
    pos_max: i32,
}

macro_rules! dc {
    ($bits:literal, $len:literal, $diff:literal, $min:literal, $max:literal) => {
        DcVlc {
            bits: $bits,
            len: $len,
            diff_bits: $diff,
            pos_min: $min,
            pos_max: $max,
        }
    };
}

/// DC luma codes (Y1..Y4); the longest is 7 bits.
#[rustfmt::skip]
static LUMA_TABLE: [DcVlc; 9] = [
    dc!(0b00,      2, 1,   1,   1),
    dc!(0b01,      2, 2,   2,   3),
    dc!(0b100,     3, 0,   0,   0),
    dc!(0b101,     3, 3,   4,   7),
    dc!(0b110,     3, 4,   8,  15),
    dc!(0b1110,    4, 5,  16,  31),
    dc!(0b11110,   5, 6,  32,  63),
    dc!(0b111110,  6, 7,  64, 127),
    dc!(0b1111110, 7, 8, 128, 255),
];

/// DC chroma codes (Cr, Cb); the longest is 8 bits.
#[rustfmt::skip]
static CHROMA_TABLE: [DcVlc; 9] = [
    dc!(0b00,       2, 0,   0,   0),
    dc!(0b01,       2, 1,   1,   1),
    dc!(0b10,       2, 2,   2,   3),
    dc!(0b110,      3, 3,   4,   7),
    dc!(0b1110,     4, 4,   8,  15),
    dc!(0b11110,    5, 5,  16,  31),
    dc!(0b111110,   6, 6,  32,  63),
    dc!(0b1111110,  7, 7,  64, 127),
    dc!(0b11111110, 8, 8, 128, 255),
];

const LUMA_LONGEST: u8 = 7;
const CHROMA_LONGEST: u8 = 8;

/// Lookup array of size `2^longest`: every bit pattern whose leading bits
/// match a code maps to that code's table index.
fn build_lookup(table: &'static [DcVlc; 9], longest: u8) -> Vec<Option<u8>> {
    let mut lookup = vec![None; 1usize << longest];
    for (i, vlc) in table.iter().enumerate() {
        let unused = longest - vlc.len;
        let start = (vlc.bits as usize) << unused;
        let end = start | ((1usize << unused) - 1);
        for entry in &mut lookup[start..=end] {
            assert!(entry.is_none());
            *entry = Some(i as u8);
        }
    }
    lookup
}

fn luma_lookup() -> &'static [Option<u8>] {
    static LOOKUP: OnceLock<Vec<Option<u8>>> = OnceLock::new();
    LOOKUP.get_or_init(|| build_lookup(&LUMA_TABLE, LUMA_LONGEST))
}

fn chroma_lookup() -> &'static [Option<u8>] {
    static LOOKUP: OnceLock<Vec<Option<u8>>> = OnceLock::new();
    LOOKUP.get_or_init(|| build_lookup(&CHROMA_TABLE, CHROMA_LONGEST))
}

/// Decode one DC differential, already scaled by 4.
fn read_differential(
    reader: &mut BitReader<'_>,
    table: &'static [DcVlc; 9],
    lookup: &[Option<u8>],
    longest: u8,
    macroblock: usize,
    block: usize,
) -> Result<i32> {
    let remaining = reader.remaining_bits();
    if remaining == 0 {
        return Err(BitstreamError::UnexpectedEnd.into());
    }
    // Peek the longest code length; near the end of the frame the available
    // bits are padded with zeros on the right.
    let avail = (longest as usize).min(remaining) as u8;
    let bits = reader.peek_bits(avail)? << (longest - avail);

    let index = lookup[bits as usize].ok_or_else(|| CodecError::ReadCorruption {
        macroblock,
        block,
        detail: format!("unknown DC variable-length code {bits:0w$b}", w = longest as usize),
    })?;
    let vlc = &table[index as usize];
    if (vlc.len + vlc.diff_bits) as usize > remaining {
        return Err(BitstreamError::UnexpectedEnd.into());
    }
    reader.skip(vlc.len as usize);

    if vlc.diff_bits == 0 {
        return Ok(0);
    }
    let raw = reader.read_bits(vlc.diff_bits)? as i32;
    let top_bit = 1 << (vlc.diff_bits - 1);
    // high bit clear means negative: shift the raw value down by the range max
    let diff = if raw & top_bit == 0 { raw - vlc.pos_max } else { raw };
    Ok(diff * 4)
}

/// Read the DC for sub-block `block` (0 = Cr, 1 = Cb, 2.. = luma), updating
/// the matching predictor. Out-of-range running values are corruption.
pub(super) fn read_dc(
    reader: &mut BitReader<'_>,
    block: usize,
    predictors: &mut DcPredictors,
    macroblock: usize,
) -> Result<i16> {
    let (slot, table, lookup, longest, what) = match block {
        0 => (&mut predictors.cr, &CHROMA_TABLE, chroma_lookup(), CHROMA_LONGEST, "chroma"),
        1 => (&mut predictors.cb, &CHROMA_TABLE, chroma_lookup(), CHROMA_LONGEST, "chroma"),
        _ => (&mut predictors.y, &LUMA_TABLE, luma_lookup(), LUMA_LONGEST, "luma"),
    };
    let diff = read_differential(reader, table, lookup, longest, macroblock, block)?;
    let dc = *slot + diff;
    if !(-512..=511).contains(&dc) {
        return Err(CodecError::ReadCorruption {
            macroblock,
            block,
            detail: format!("{what} DC value {dc} out of range"),
        }
        .into());
    }
    *slot = dc;
    Ok(dc as i16)
}

/// Encoder-side predictors; the stored values are always multiples of 4.
#[derive(Debug, Clone, Copy, Default)]
pub struct DcEncodeState {
    cr: i32,
    cb: i32,
    y: i32,
}

/// Encode one DC value for sub-block `block`, rounding to the nearest
/// multiple of 4 (the v3 precision loss).
pub(super) fn write_dc(
    writer: &mut BitWriter,
    block: usize,
    dc: i16,
    state: &mut DcEncodeState,
) -> Result<()> {
    let dc_round4 = ((dc as f64) / 4.0).round() as i32 * 4;
    let (slot, table) = match block {
        0 => (&mut state.cr, &CHROMA_TABLE),
        1 => (&mut state.cb, &CHROMA_TABLE),
        _ => (&mut state.y, &LUMA_TABLE),
    };
    let diff4 = (dc_round4 - *slot) / 4;
    *slot = dc_round4;

    for vlc in table.iter() {
        if vlc.diff_bits == 0 {
            if diff4 == 0 {
                writer.write_bits(vlc.bits as u32, vlc.len);
                return Ok(());
            }
            continue;
        }
        if (vlc.pos_min..=vlc.pos_max).contains(&diff4) {
            writer.write_bits(vlc.bits as u32, vlc.len);
            writer.write_bits(diff4 as u32, vlc.diff_bits);
            return Ok(());
        }
        if (-vlc.pos_max..=-vlc.pos_min).contains(&diff4) {
            writer.write_bits(vlc.bits as u32, vlc.len);
            writer.write_bits((diff4 + vlc.pos_max) as u32, vlc.diff_bits);
            return Ok(());
        }
    }
    Err(CodecError::TooMuchEnergy(format!(
        "DC value {dc} cannot be coded as differential {diff4}"
    ))
    .into())
}
