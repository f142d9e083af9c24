//! PNG writer: 8-bit RGB, filter type 0 per row, stored deflate blocks.
//!
//! Frame-sequence output favors write speed over size, so the zlib stream
//! uses stored (uncompressed) blocks. Viewers and ffmpeg read them like any
//! other PNG.

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::Result;
use crate::image::Image;

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];
const MAX_STORED_BLOCK: usize = 65535;

/// PNG encoder.
#[derive(Debug, Default)]
pub struct PngEncoder;

impl PngEncoder {
    /// Create an encoder.
    pub fn new() -> Self {
        Self
    }

    /// Encode `image` as a PNG file.
    pub fn encode(&self, image: &Image) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&PNG_SIGNATURE);

        let mut ihdr = Vec::with_capacity(13);
        ihdr.write_u32::<BigEndian>(image.width() as u32)?;
        ihdr.write_u32::<BigEndian>(image.height() as u32)?;
        ihdr.push(8); // bit depth
        ihdr.push(2); // color type: truecolor
        ihdr.push(0); // compression
        ihdr.push(0); // filter method
        ihdr.push(0); // no interlace
        write_chunk(&mut out, b"IHDR", &ihdr)?;

        // raw scanlines, each preceded by filter byte 0
        let mut raw = Vec::with_capacity(image.height() * (1 + image.width() * 3));
        for y in 0..image.height() {
            raw.push(0);
            raw.extend_from_slice(image.row(y));
        }
        write_chunk(&mut out, b"IDAT", &zlib_stored(&raw))?;
        write_chunk(&mut out, b"IEND", &[])?;
        Ok(out)
    }
}

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) -> Result<()> {
    out.write_u32::<BigEndian>(data.len() as u32)?;
    out.extend_from_slice(kind);
    out.extend_from_slice(data);
    let mut crc = Crc32::new();
    crc.update(kind);
    crc.update(data);
    out.write_u32::<BigEndian>(crc.finish())?;
    Ok(())
}

/// Wrap `data` in a zlib stream of stored deflate blocks.
fn zlib_stored(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / MAX_STORED_BLOCK * 5 + 16);
    out.push(0x78);
    out.push(0x01);

    let mut chunks = data.chunks(MAX_STORED_BLOCK).peekable();
    if data.is_empty() {
        out.extend_from_slice(&[0x01, 0, 0, 0xFF, 0xFF]);
    }
    while let Some(chunk) = chunks.next() {
        let last = chunks.peek().is_none();
        out.push(last as u8); // BFINAL, BTYPE=00
        let len = chunk.len() as u16;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&(!len).to_le_bytes());
        out.extend_from_slice(chunk);
    }

    let mut a = 1u32;
    let mut b = 0u32;
    for &byte in data {
        a = (a + byte as u32) % 65521;
        b = (b + a) % 65521;
    }
    out.extend_from_slice(&((b << 16) | a).to_be_bytes());
    out
}

/// CRC-32 (ISO 3309) as PNG chunks require.
struct Crc32 {
    value: u32,
}

impl Crc32 {
    fn new() -> Self {
        Self { value: 0xFFFF_FFFF }
    }

    fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.value ^= byte as u32;
            for _ in 0..8 {
                let mask = (self.value & 1).wrapping_neg();
                self.value = (self.value >> 1) ^ (0xEDB8_8320 & mask);
            }
        }
    }

    fn finish(self) -> u32 {
        !self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_known_value() {
        let mut crc = Crc32::new();
        crc.update(b"IEND");
        assert_eq!(crc.finish(), 0xAE42_6082);
    }

    #[test]
    fn test_encode_structure() {
        let img = Image::from_rgb32(&[0x00FF8000; 4], 2, 2).unwrap();
        let png = PngEncoder::new().encode(&img).unwrap();

        assert_eq!(&png[0..8], &PNG_SIGNATURE);
        assert_eq!(&png[12..16], b"IHDR");
        // IHDR records the dimensions big-endian
        assert_eq!(&png[16..24], &[0, 0, 0, 2, 0, 0, 0, 2]);
        assert_eq!(&png[png.len() - 8..png.len() - 4], b"IEND");
    }

    #[test]
    fn test_zlib_stream_round_trips_lengths() {
        let data = vec![7u8; 100];
        let z = zlib_stored(&data);
        assert_eq!(z[0], 0x78);
        assert_eq!(z[2], 1); // single final stored block
        assert_eq!(u16::from_le_bytes([z[3], z[4]]), 100);
        assert_eq!(u16::from_le_bytes([z[5], z[6]]), !100u16);
        assert_eq!(z.len(), 2 + 5 + 100 + 4);
    }
}
