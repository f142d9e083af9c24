//! The shared AC run/level variable-length alphabet.
//!
//! Every format in the STR family reuses the MPEG-1 AC coefficient table:
//! a prefix-free code for each common `(run, level)` pair with one appended
//! sign bit (1 = negative), `10` as end-of-block, and the escape prefix
//! `000001` followed by a 6-bit run and a signed level field. STRv2/v3, Iki
//! and Crusader use a 10-bit escape level; Lain stores 8 bits.

use std::collections::HashMap;
use std::sync::OnceLock;

use strdec_core::bitstream::{BitReader, BitWriter};
use strdec_core::error::{CodecError, Result};
use strdec_core::mdec::MdecCode;

/// End-of-block code: `10`.
pub const EOB_BITS: u32 = 0b10;
/// End-of-block code length.
pub const EOB_LEN: u8 = 2;
/// Escape prefix: `000001`.
pub const ESCAPE_BITS: u32 = 0b000001;
/// Escape prefix length.
pub const ESCAPE_LEN: u8 = 6;

/// Width of the escape level field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeLevelWidth {
    /// 10-bit signed level (STRv2, STRv3, Iki, Crusader).
    Ten,
    /// 8-bit signed level (Lain).
    Eight,
}

/// One table entry: the code bits (sign excluded), their length, and the
/// `(run, level)` pair they stand for. Levels in the table are positive.
struct AcEntry {
    bits: u32,
    len: u8,
    run: u8,
    level: u16,
}

macro_rules! ac {
    ($bits:literal, $len:literal, $run:literal, $level:literal) => {
        AcEntry {
            bits: $bits,
            len: $len,
            run: $run,
            level: $level,
        }
    };
}

/// The MPEG-1 AC coefficient table (ISO 11172-2 table 2-B.5c..f), sign bit
/// excluded. The `(0, 1)` pair uses the two-bit form `11` since the first
/// code of every STR block is the DC header, never an AC coefficient.
#[rustfmt::skip]
static AC_TABLE: &[AcEntry] = &[
    ac!(0b11,                2,  0,  1),
    ac!(0b011,               3,  1,  1),
    ac!(0b0100,              4,  0,  2),
    ac!(0b0101,              4,  2,  1),
    ac!(0b00101,             5,  0,  3),
    ac!(0b00110,             5,  4,  1),
    ac!(0b00111,             5,  3,  1),
    ac!(0b000100,            6,  7,  1),
    ac!(0b000101,            6,  6,  1),
    ac!(0b000110,            6,  1,  2),
    ac!(0b000111,            6,  5,  1),
    ac!(0b0000100,           7,  2,  2),
    ac!(0b0000101,           7,  9,  1),
    ac!(0b0000110,           7,  0,  4),
    ac!(0b0000111,           7,  8,  1),
    ac!(0b00100000,          8, 13,  1),
    ac!(0b00100001,          8,  0,  6),
    ac!(0b00100010,          8, 12,  1),
    ac!(0b00100011,          8, 11,  1),
    ac!(0b00100100,          8,  3,  2),
    ac!(0b00100101,          8,  1,  3),
    ac!(0b00100110,          8,  0,  5),
    ac!(0b00100111,          8, 10,  1),
    ac!(0b0000001000,       10, 16,  1),
    ac!(0b0000001001,       10,  5,  2),
    ac!(0b0000001010,       10,  0,  7),
    ac!(0b0000001011,       10,  2,  3),
    ac!(0b0000001100,       10,  1,  4),
    ac!(0b0000001101,       10, 15,  1),
    ac!(0b0000001110,       10, 14,  1),
    ac!(0b0000001111,       10,  4,  2),
    ac!(0b000000010000,     12,  0, 11),
    ac!(0b000000010001,     12,  8,  2),
    ac!(0b000000010010,     12,  4,  3),
    ac!(0b000000010011,     12,  0, 10),
    ac!(0b000000010100,     12,  2,  4),
    ac!(0b000000010101,     12,  7,  2),
    ac!(0b000000010110,     12, 21,  1),
    ac!(0b000000010111,     12, 20,  1),
    ac!(0b000000011000,     12,  0,  9),
    ac!(0b000000011001,     12, 19,  1),
    ac!(0b000000011010,     12, 18,  1),
    ac!(0b000000011011,     12,  1,  5),
    ac!(0b000000011100,     12,  3,  3),
    ac!(0b000000011101,     12,  0,  8),
    ac!(0b000000011110,     12,  6,  2),
    ac!(0b000000011111,     12, 17,  1),
    ac!(0b0000000010000,    13, 10,  2),
    ac!(0b0000000010001,    13,  9,  2),
    ac!(0b0000000010010,    13,  5,  3),
    ac!(0b0000000010011,    13,  3,  4),
    ac!(0b0000000010100,    13,  2,  5),
    ac!(0b0000000010101,    13,  1,  7),
    ac!(0b0000000010110,    13,  1,  6),
    ac!(0b0000000010111,    13,  0, 15),
    ac!(0b0000000011000,    13,  0, 14),
    ac!(0b0000000011001,    13,  0, 13),
    ac!(0b0000000011010,    13,  0, 12),
    ac!(0b0000000011011,    13, 26,  1),
    ac!(0b0000000011100,    13, 25,  1),
    ac!(0b0000000011101,    13, 24,  1),
    ac!(0b0000000011110,    13, 23,  1),
    ac!(0b0000000011111,    13, 22,  1),
    ac!(0b00000000010000,   14,  0, 31),
    ac!(0b00000000010001,   14,  0, 30),
    ac!(0b00000000010010,   14,  0, 29),
    ac!(0b00000000010011,   14,  0, 28),
    ac!(0b00000000010100,   14,  0, 27),
    ac!(0b00000000010101,   14,  0, 26),
    ac!(0b00000000010110,   14,  0, 25),
    ac!(0b00000000010111,   14,  0, 24),
    ac!(0b00000000011000,   14,  0, 23),
    ac!(0b00000000011001,   14,  0, 22),
    ac!(0b00000000011010,   14,  0, 21),
    ac!(0b00000000011011,   14,  0, 20),
    ac!(0b00000000011100,   14,  0, 19),
    ac!(0b00000000011101,   14,  0, 18),
    ac!(0b00000000011110,   14,  0, 17),
    ac!(0b00000000011111,   14,  0, 16),
    ac!(0b000000000010000,  15,  0, 40),
    ac!(0b000000000010001,  15,  0, 39),
    ac!(0b000000000010010,  15,  0, 38),
    ac!(0b000000000010011,  15,  0, 37),
    ac!(0b000000000010100,  15,  0, 36),
    ac!(0b000000000010101,  15,  0, 35),
    ac!(0b000000000010110,  15,  0, 34),
    ac!(0b000000000010111,  15,  0, 33),
    ac!(0b000000000011000,  15,  0, 32),
    ac!(0b000000000011001,  15,  1, 14),
    ac!(0b000000000011010,  15,  1, 13),
    ac!(0b000000000011011,  15,  1, 12),
    ac!(0b000000000011100,  15,  1, 11),
    ac!(0b000000000011101,  15,  1, 10),
    ac!(0b000000000011110,  15,  1,  9),
    ac!(0b000000000011111,  15,  1,  8),
    ac!(0b0000000000010000, 16,  1, 18),
    ac!(0b0000000000010001, 16,  1, 17),
    ac!(0b0000000000010010, 16,  1, 16),
    ac!(0b0000000000010011, 16,  1, 15),
    ac!(0b0000000000010100, 16,  6,  3),
    ac!(0b0000000000010101, 16, 16,  2),
    ac!(0b0000000000010110, 16, 15,  2),
    ac!(0b0000000000010111, 16, 14,  2),
    ac!(0b0000000000011000, 16, 13,  2),
    ac!(0b0000000000011001, 16, 12,  2),
    ac!(0b0000000000011010, 16, 11,  2),
    ac!(0b0000000000011011, 16, 31,  1),
    ac!(0b0000000000011100, 16, 30,  1),
    ac!(0b0000000000011101, 16, 29,  1),
    ac!(0b0000000000011110, 16, 28,  1),
    ac!(0b0000000000011111, 16, 27,  1),
];

/// Longest table code, sign excluded.
const LONGEST_CODE: u8 = 16;

fn decode_map() -> &'static HashMap<(u8, u32), (u8, u16)> {
    static MAP: OnceLock<HashMap<(u8, u32), (u8, u16)>> = OnceLock::new();
    MAP.get_or_init(|| {
        AC_TABLE
            .iter()
            .map(|e| ((e.len, e.bits), (e.run, e.level)))
            .collect()
    })
}

fn encode_map() -> &'static HashMap<(u8, u16), (u32, u8)> {
    static MAP: OnceLock<HashMap<(u8, u16), (u32, u8)>> = OnceLock::new();
    MAP.get_or_init(|| {
        AC_TABLE
            .iter()
            .map(|e| ((e.run, e.level), (e.bits, e.len)))
            .collect()
    })
}

/// Read one AC symbol. Returns the end-of-block sentinel or a run/level
/// code. `macroblock`/`block` only feed error reports.
pub fn read_ac(
    reader: &mut BitReader<'_>,
    escape: EscapeLevelWidth,
    macroblock: usize,
    block: usize,
) -> Result<MdecCode> {
    let mut bits = 0u32;
    for len in 1..=LONGEST_CODE {
        bits = (bits << 1) | reader.read_bit()? as u32;
        if len == EOB_LEN && bits == EOB_BITS {
            return Ok(MdecCode::END_OF_BLOCK);
        }
        if len == ESCAPE_LEN && bits == ESCAPE_BITS {
            let run = reader.read_bits(6)? as u8;
            let level = match escape {
                EscapeLevelWidth::Ten => reader.read_signed_bits(10)? as i16,
                EscapeLevelWidth::Eight => reader.read_signed_bits(8)? as i16,
            };
            return Ok(MdecCode::run_level(run, level));
        }
        if let Some(&(run, level)) = decode_map().get(&(len, bits)) {
            let negative = reader.read_bit()?;
            let level = if negative { -(level as i16) } else { level as i16 };
            return Ok(MdecCode::run_level(run, level));
        }
    }
    Err(CodecError::ReadCorruption {
        macroblock,
        block,
        detail: format!("unknown AC variable-length code {bits:0width$b}", width = LONGEST_CODE as usize),
    }
    .into())
}

/// Write the end-of-block code.
pub fn write_eob(writer: &mut BitWriter) {
    writer.write_bits(EOB_BITS, EOB_LEN);
}

/// Write one run/level pair, escaping when the pair is not in the table.
pub fn write_ac(
    writer: &mut BitWriter,
    run: u8,
    level: i16,
    escape: EscapeLevelWidth,
) -> Result<()> {
    if let Some(&(bits, len)) = encode_map().get(&(run, level.unsigned_abs())) {
        writer.write_bits(bits, len);
        writer.write_bit(level < 0);
        return Ok(());
    }
    writer.write_bits(ESCAPE_BITS, ESCAPE_LEN);
    writer.write_bits(run as u32, 6);
    match escape {
        EscapeLevelWidth::Ten => writer.write_bits((level as u16 & 0x3FF) as u32, 10),
        EscapeLevelWidth::Eight => {
            if !(-128..=127).contains(&level) {
                return Err(CodecError::TooMuchEnergy(format!(
                    "AC level {level} exceeds the 8-bit escape range"
                ))
                .into());
            }
            writer.write_bits((level as u16 & 0xFF) as u32, 8);
        }
    }
    Ok(())
}
