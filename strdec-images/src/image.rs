//! The RGB24 buffer the encoders consume.

use crate::error::{ImageError, Result};

/// An 8-bit-per-channel RGB image, rows top-down.
#[derive(Debug, Clone)]
pub struct Image {
    width: usize,
    height: usize,
    data: Vec<u8>,
}

impl Image {
    /// Create a black image.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height * 3],
        }
    }

    /// Build from a packed `0x00RRGGBB` raster.
    pub fn from_rgb32(pixels: &[u32], width: usize, height: usize) -> Result<Self> {
        if pixels.len() != width * height {
            return Err(ImageError::InvalidImage(format!(
                "raster holds {} pixels, dimensions say {}",
                pixels.len(),
                width * height
            )));
        }
        let mut data = Vec::with_capacity(width * height * 3);
        for &p in pixels {
            data.push((p >> 16) as u8);
            data.push((p >> 8) as u8);
            data.push(p as u8);
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Image width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Image height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// The RGB bytes, 3 per pixel.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// One row of RGB bytes.
    pub fn row(&self, y: usize) -> &[u8] {
        &self.data[y * self.width * 3..(y + 1) * self.width * 3]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgb32() {
        let img = Image::from_rgb32(&[0x00112233, 0x00445566], 2, 1).unwrap();
        assert_eq!(img.data(), &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);
        assert!(Image::from_rgb32(&[0; 3], 2, 1).is_err());
    }
}
