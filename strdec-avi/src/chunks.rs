//! RIFF chunk primitives.

use crate::error::Result;
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::Write;

/// A four-character code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Stream chunk id for stream `index`: `NNdc` for video, `NNwb` for
    /// audio data.
    pub fn stream_chunk(index: u32, suffix: &[u8; 2]) -> Self {
        FourCC([
            b'0' + (index / 10) as u8,
            b'0' + (index % 10) as u8,
            suffix[0],
            suffix[1],
        ])
    }
}

/// One RIFF chunk: id, 32-bit size, data, even-byte padding.
#[derive(Debug, Clone)]
pub struct RiffChunk {
    /// Chunk id.
    pub id: FourCC,
    /// Chunk payload.
    pub data: Vec<u8>,
}

impl RiffChunk {
    /// Create a chunk.
    pub fn new(id: FourCC, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    /// Bytes the chunk occupies in the file, padding included.
    pub fn total_size(&self) -> usize {
        8 + self.data.len() + self.data.len() % 2
    }

    /// Write the chunk.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.id.0)?;
        writer.write_u32::<LittleEndian>(self.data.len() as u32)?;
        writer.write_all(&self.data)?;
        if self.data.len() % 2 != 0 {
            writer.write_all(&[0])?;
        }
        Ok(())
    }
}

/// One `idx1` index entry.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry {
    /// Chunk id the entry points at.
    pub chunk_id: FourCC,
    /// Entry flags.
    pub flags: u32,
    /// Chunk offset relative to the start of `movi` data.
    pub offset: u32,
    /// Chunk data size.
    pub size: u32,
}

impl IndexEntry {
    /// Keyframe flag (AVIIF_KEYFRAME).
    pub const KEYFRAME: u32 = 0x10;

    /// Whether the entry marks a keyframe.
    pub fn is_keyframe(&self) -> bool {
        self.flags & Self::KEYFRAME != 0
    }

    /// Write the 16-byte entry.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.chunk_id.0)?;
        writer.write_u32::<LittleEndian>(self.flags)?;
        writer.write_u32::<LittleEndian>(self.offset)?;
        writer.write_u32::<LittleEndian>(self.size)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_chunk_ids() {
        assert_eq!(FourCC::stream_chunk(0, b"dc").0, *b"00dc");
        assert_eq!(FourCC::stream_chunk(1, b"wb").0, *b"01wb");
    }

    #[test]
    fn test_chunk_write_pads_to_even() {
        let chunk = RiffChunk::new(FourCC(*b"00dc"), vec![1, 2, 3]);
        assert_eq!(chunk.total_size(), 12);
        let mut out = Vec::new();
        chunk.write(&mut out).unwrap();
        assert_eq!(out.len(), 12);
        assert_eq!(&out[0..4], b"00dc");
        assert_eq!(out[11], 0);
    }
}
