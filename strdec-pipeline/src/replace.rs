//! Lossy partial frame replacement.
//!
//! A replacement bitmap is compared macroblock-by-macroblock against the
//! decoded original; only the differing macroblocks are re-encoded, and the
//! result must fit the original frame's compressed byte budget. An empty
//! difference set is a no-op.

use strdec_codecs::bitstreams::{BitstreamCompressor, BitstreamUncompressor};
use strdec_codecs::mdec::encoder::{
    compress_replacement, find_diff_macroblocks, MdecEncoder, ParsedMdecImage, Rect,
};
use strdec_codecs::mdec::{
    Ac0Cleaner, ChromaUpsampling, ColorMatrix, CodeSliceSource, MdecCodeSource, MdecDecoder,
    MdecDecoderDouble,
};
use strdec_core::error::Result;
use strdec_core::frame::RgbImage;
use strdec_core::mdec::macroblock_dim;

use crate::demux::DemuxedFrame;

/// Partial-replacement settings.
#[derive(Debug, Clone)]
pub struct ReplaceFramePartial {
    /// Per-channel difference below or at this value is "the same".
    pub tolerance: i32,
    /// Only consider pixels inside this rectangle.
    pub rect_mask: Option<Rect>,
    /// Only consider pixels whose mask-image pixel is non-zero.
    pub image_mask: Option<RgbImage>,
    /// Filter stray first-AC-coefficient codes while parsing the original.
    pub clean_ac0: bool,
}

impl Default for ReplaceFramePartial {
    fn default() -> Self {
        Self {
            tolerance: 0,
            rect_mask: None,
            image_mask: None,
            clean_ac0: true,
        }
    }
}

impl ReplaceFramePartial {
    /// Compute the replacement payload for `frame`, or `None` when nothing
    /// differs. The caller persists the returned bytes into the frame's
    /// sectors.
    pub fn replace(
        &self,
        frame: &DemuxedFrame,
        replacement: &RgbImage,
    ) -> Result<Option<Vec<u8>>> {
        let width = frame.width as usize;
        let height = frame.height as usize;

        let mut uncompressor = BitstreamUncompressor::identify(&frame.payload)?;
        let format = uncompressor.format();

        let parsed = if self.clean_ac0 {
            let mut cleaner = Ac0Cleaner::new(&mut uncompressor as &mut dyn MdecCodeSource);
            ParsedMdecImage::parse(&mut cleaner, width, height)?
        } else {
            ParsedMdecImage::parse(&mut uncompressor, width, height)?
        };

        let mut decoder = MdecDecoderDouble::with_options(
            width,
            height,
            ChromaUpsampling::NearestNeighbor,
            ColorMatrix::Rec601,
        );
        let codes = parsed.code_stream();
        decoder.decode(&mut CodeSliceSource::new(&codes))?;
        let mut original = RgbImage::new(width, height);
        decoder.read_decoded_rgb(width, height, original.data_mut())?;

        let dirty = find_diff_macroblocks(
            &original,
            replacement,
            self.tolerance,
            self.rect_mask,
            self.image_mask.as_ref(),
        );
        if dirty.is_empty() {
            tracing::info!(frame = frame.frame_number, "no difference, skipping");
            return Ok(None);
        }
        let mb_w = macroblock_dim(width);
        let mb_h = macroblock_dim(height);
        if dirty.len() == mb_w * mb_h {
            tracing::warn!(frame = frame.frame_number, "the entire frame is different");
        }
        log_diff_map(&dirty, mb_w, mb_h);

        let encoder = MdecEncoder::with_original(&parsed, replacement, &dirty)?;
        let compressor = BitstreamCompressor::new(format);
        let payload = compress_replacement(
            &compressor,
            &encoder,
            width,
            height,
            parsed.frame_qscale(),
            frame.payload.len(),
        )?;
        Ok(Some(payload))
    }
}

fn log_diff_map(dirty: &[(usize, usize)], mb_w: usize, mb_h: usize) {
    tracing::info!(count = dirty.len(), "differing macroblocks");
    for y in 0..mb_h {
        let row: String = (0..mb_w)
            .map(|x| if dirty.contains(&(x, y)) { 'X' } else { '.' })
            .collect();
        tracing::info!("{row}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strdec_codecs::bitstreams::BitstreamFormat;

    fn gradient_image(width: usize, height: usize) -> RgbImage {
        let mut img = RgbImage::new(width, height);
        for y in 0..height {
            for x in 0..width {
                let r = (x * 255 / width) as u32;
                let g = (y * 255 / height) as u32;
                img.set_pixel(x, y, (r << 16) | (g << 8) | 0x40);
            }
        }
        img
    }

    fn frame_for(img: &RgbImage) -> DemuxedFrame {
        let encoder = MdecEncoder::from_rgb(img);
        let codes = encoder.stream(2).unwrap();
        let payload = BitstreamCompressor::new(BitstreamFormat::StrV2)
            .compress(
                &mut CodeSliceSource::new(&codes),
                img.width(),
                img.height(),
            )
            .unwrap();
        DemuxedFrame {
            width: img.width() as u16,
            height: img.height() as u16,
            frame_number: 3,
            start_sector: 0,
            end_sector: 1,
            presentation_sector: 1,
            payload,
        }
    }

    #[test]
    fn test_replace_with_identical_image_is_noop() {
        let img = gradient_image(32, 32);
        let frame = frame_for(&img);

        // decode the stored frame the way the replacer will: AC0 cleaning
        // is on by default
        let mut unc = BitstreamUncompressor::identify(&frame.payload).unwrap();
        let mut cleaner = Ac0Cleaner::new(&mut unc as &mut dyn MdecCodeSource);
        let parsed = ParsedMdecImage::parse(&mut cleaner, 32, 32).unwrap();
        let codes = parsed.code_stream();
        let mut decoder = MdecDecoderDouble::with_options(
            32,
            32,
            ChromaUpsampling::NearestNeighbor,
            ColorMatrix::Rec601,
        );
        decoder.decode(&mut CodeSliceSource::new(&codes)).unwrap();
        let mut decoded = RgbImage::new(32, 32);
        decoder.read_decoded_rgb(32, 32, decoded.data_mut()).unwrap();

        let replacer = ReplaceFramePartial::default();
        assert!(replacer.replace(&frame, &decoded).unwrap().is_none());
    }

    #[test]
    fn test_replace_fits_budget_and_changes_payload() {
        let img = gradient_image(32, 32);
        let frame = frame_for(&img);

        let mut replacement = img.clone();
        for y in 0..16 {
            for x in 0..16 {
                replacement.set_pixel(x, y, 0xFFFFFF);
            }
        }
        let replacer = ReplaceFramePartial {
            tolerance: 4,
            ..Default::default()
        };
        let new_payload = replacer.replace(&frame, &replacement).unwrap().unwrap();
        assert!(new_payload.len() <= frame.payload.len());
        assert_ne!(new_payload, frame.payload);
    }

    #[test]
    fn test_replacement_persists_through_sector_writer() {
        use strdec_core::sector::{MemorySectorReader, SectorReader};

        let img = gradient_image(32, 32);
        let frame = frame_for(&img);

        // the frame occupies two sectors on the in-memory image
        let half = frame.payload.len() / 2;
        let mut reader = MemorySectorReader::new(vec![
            frame.payload[..half].to_vec(),
            frame.payload[half..].to_vec(),
        ]);

        let mut replacement = img.clone();
        replacement.set_pixel(2, 2, 0xFFFFFF);
        let replacer = ReplaceFramePartial {
            tolerance: 4,
            ..Default::default()
        };
        let new_payload = replacer.replace(&frame, &replacement).unwrap().unwrap();

        // split the new payload back over the frame's sectors
        let half = new_payload.len() / 2;
        reader.write_sector(0, &new_payload[..half]).unwrap();
        reader.write_sector(1, &new_payload[half..]).unwrap();

        let mut read_back = reader.sector(0).unwrap().data;
        read_back.extend(reader.sector(1).unwrap().data);
        assert_eq!(read_back, new_payload);
    }
}
