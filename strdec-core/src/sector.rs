//! The CD sector model consumed from the sector reader.
//!
//! Reading and identifying raw sectors belongs to the disc layer; this
//! module only defines the shapes the decode pipeline consumes: a sector of
//! user data, the reader trait, and the tagged union of identified sector
//! types the demuxers dispatch on.

use crate::error::{Error, Result};

/// Bytes of user data in one mode-1/form-1 sector.
pub const USER_DATA_SIZE: usize = 2048;

/// One CD sector's user data, already stripped of sync/header/EDC.
#[derive(Debug, Clone)]
pub struct Sector {
    /// Absolute sector number on the disc image.
    pub number: u32,
    /// User-data payload.
    pub data: Vec<u8>,
}

/// Sequential access to a disc image's sectors.
pub trait SectorReader {
    /// Read sector `index`.
    fn sector(&mut self, index: u32) -> Result<Sector>;

    /// Total sectors in the image.
    fn sector_count(&self) -> u32;

    /// Overwrite sector `index`'s user data (frame replacement).
    fn write_sector(&mut self, index: u32, data: &[u8]) -> Result<()>;
}

/// An in-memory disc image, used by tests and the frame replacer.
#[derive(Debug, Default)]
pub struct MemorySectorReader {
    sectors: Vec<Vec<u8>>,
}

impl MemorySectorReader {
    /// Create an image from pre-built sector payloads.
    pub fn new(sectors: Vec<Vec<u8>>) -> Self {
        Self { sectors }
    }
}

impl SectorReader for MemorySectorReader {
    fn sector(&mut self, index: u32) -> Result<Sector> {
        let data = self
            .sectors
            .get(index as usize)
            .cloned()
            .ok_or_else(|| Error::invalid_param(format!("sector {index} out of range")))?;
        Ok(Sector {
            number: index,
            data,
        })
    }

    fn sector_count(&self) -> u32 {
        self.sectors.len() as u32
    }

    fn write_sector(&mut self, index: u32, data: &[u8]) -> Result<()> {
        let slot = self
            .sectors
            .get_mut(index as usize)
            .ok_or_else(|| Error::invalid_param(format!("sector {index} out of range")))?;
        slot.clear();
        slot.extend_from_slice(data);
        Ok(())
    }
}

/// An STR video sector: one chunk of a demuxed frame.
#[derive(Debug, Clone)]
pub struct StrVideoSector {
    /// Absolute sector number.
    pub sector_number: u32,
    /// Interleave channel.
    pub channel: u8,
    /// Frame this chunk belongs to.
    pub frame_number: u32,
    /// Chunk index within the frame.
    pub chunk_number: u16,
    /// Total chunks in the frame.
    pub chunks_in_frame: u16,
    /// Frame width in pixels.
    pub width: u16,
    /// Frame height in pixels.
    pub height: u16,
    /// Demuxed (compressed) size of the whole frame in bytes.
    pub frame_demux_size: u32,
    /// This chunk's share of the frame payload.
    pub payload: Vec<u8>,
}

/// An XA-ADPCM audio sector.
#[derive(Debug, Clone)]
pub struct XaAudioSector {
    /// Absolute sector number.
    pub sector_number: u32,
    /// Interleave channel (0..32).
    pub channel: u8,
    /// 18900 or 37800.
    pub samples_per_second: u32,
    /// 4 or 8.
    pub bits_per_sample: u8,
    /// Stereo flag.
    pub stereo: bool,
    /// ADPCM payload.
    pub payload: Vec<u8>,
}

/// A Crusader engine sector carrying interleaved audio and video packets.
#[derive(Debug, Clone)]
pub struct CrusaderAvSector {
    /// Absolute sector number.
    pub sector_number: u32,
    /// Raw AV stream payload.
    pub payload: Vec<u8>,
}

/// A sector tagged with its semantic type by the identification layer.
#[derive(Debug, Clone)]
pub enum IdentifiedSector {
    /// STR video chunk.
    StrVideo(StrVideoSector),
    /// XA-ADPCM audio.
    XaAudio(XaAudioSector),
    /// Crusader combined audio/video.
    CrusaderAv(CrusaderAvSector),
    /// Anything the identifier did not recognize.
    Unknown(Sector),
}

impl IdentifiedSector {
    /// Absolute sector number regardless of variant.
    pub fn sector_number(&self) -> u32 {
        match self {
            IdentifiedSector::StrVideo(s) => s.sector_number,
            IdentifiedSector::XaAudio(s) => s.sector_number,
            IdentifiedSector::CrusaderAv(s) => s.sector_number,
            IdentifiedSector::Unknown(s) => s.number,
        }
    }

    /// Interleave channel, for the variants that have one.
    pub fn channel(&self) -> Option<u8> {
        match self {
            IdentifiedSector::StrVideo(s) => Some(s.channel),
            IdentifiedSector::XaAudio(s) => Some(s.channel),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_reader_round_trip() {
        let mut reader = MemorySectorReader::new(vec![vec![1u8; 8], vec![2u8; 8]]);
        assert_eq!(reader.sector_count(), 2);
        assert_eq!(reader.sector(1).unwrap().data, vec![2u8; 8]);

        reader.write_sector(1, &[9, 9]).unwrap();
        assert_eq!(reader.sector(1).unwrap().data, vec![9, 9]);
        assert!(reader.sector(2).is_err());
    }

    #[test]
    fn test_identified_sector_accessors() {
        let s = IdentifiedSector::XaAudio(XaAudioSector {
            sector_number: 42,
            channel: 3,
            samples_per_second: 37800,
            bits_per_sample: 4,
            stereo: true,
            payload: Vec::new(),
        });
        assert_eq!(s.sector_number(), 42);
        assert_eq!(s.channel(), Some(3));
    }
}
