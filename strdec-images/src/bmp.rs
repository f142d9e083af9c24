//! BMP writer: BITMAPINFOHEADER, 24 bpp, bottom-up BGR rows.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::error::Result;
use crate::image::Image;

/// Windows bitmap encoder.
#[derive(Debug, Default)]
pub struct BmpEncoder;

impl BmpEncoder {
    /// Create an encoder.
    pub fn new() -> Self {
        Self
    }

    /// Encode `image` as a BMP file.
    pub fn encode(&self, image: &Image) -> Result<Vec<u8>> {
        let width = image.width();
        let height = image.height();
        let row_bytes = (width * 3 + 3) & !3;
        let pixel_bytes = row_bytes * height;
        let file_size = 14 + 40 + pixel_bytes;

        let mut out = Vec::with_capacity(file_size);
        out.extend_from_slice(b"BM");
        out.write_u32::<LittleEndian>(file_size as u32)?;
        out.write_u32::<LittleEndian>(0)?; // reserved
        out.write_u32::<LittleEndian>(54)?; // pixel data offset

        out.write_u32::<LittleEndian>(40)?;
        out.write_i32::<LittleEndian>(width as i32)?;
        out.write_i32::<LittleEndian>(height as i32)?;
        out.write_u16::<LittleEndian>(1)?; // planes
        out.write_u16::<LittleEndian>(24)?;
        out.write_u32::<LittleEndian>(0)?; // BI_RGB
        out.write_u32::<LittleEndian>(pixel_bytes as u32)?;
        out.write_i32::<LittleEndian>(0)?;
        out.write_i32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(0)?;
        out.write_u32::<LittleEndian>(0)?;

        let pad = row_bytes - width * 3;
        for y in (0..height).rev() {
            let row = image.row(y);
            for px in row.chunks_exact(3) {
                out.push(px[2]);
                out.push(px[1]);
                out.push(px[0]);
            }
            out.extend(std::iter::repeat(0u8).take(pad));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let mut pixels = vec![0u32; 2 * 2];
        pixels[0] = 0x00FF0000; // top-left red
        let img = Image::from_rgb32(&pixels, 2, 2).unwrap();
        let bmp = BmpEncoder::new().encode(&img).unwrap();

        assert_eq!(&bmp[0..2], b"BM");
        assert_eq!(bmp.len(), 54 + 2 * 8);
        // bottom-up: the red pixel is in the second stored row, BGR order
        assert_eq!(&bmp[54 + 8..54 + 8 + 3], &[0, 0, 0xFF]);
    }
}
