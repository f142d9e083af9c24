//! The video saver configuration and stage-chain builder.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use strdec_avi::AudioFormat;
use strdec_codecs::mdec::{ChromaUpsampling, ColorMatrix, MdecDecoderDouble, MdecDecoderInt};
use strdec_core::error::{Error, Result};
use strdec_core::rational::Rational;

use crate::demux::{DecodedAudio, DemuxedFrame};
use crate::sync::{AudioVideoSync, VideoSync};
use crate::vdp::{
    Bitstream2File, Bitstream2Mdec, BitstreamListener, Decoded2ImageFile, Decoded2RgbAvi,
    Decoded2YuvAvi, FrameInfo, Mdec2File, Mdec2Jpeg, Mdec2MjpegAvi, Mdec2Decoded,
    NumberedFileFormatter, SectorTimedAudioWriter, SharedStage, StillFormat,
};

/// Output container/sequence selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoFormat {
    /// Motion-JPEG AVI.
    AviMjpg,
    /// YV12 AVI with BT.601 studio-range planes.
    AviYuv,
    /// YV12 AVI with JFIF full-range planes.
    AviJyuv,
    /// Uncompressed RGB AVI.
    AviRgb,
    /// One compressed bitstream file per frame.
    ImgSeqDemux,
    /// One raw MDEC code dump per frame.
    ImgSeqMdec,
    /// One JPEG per frame.
    ImgSeqJpg,
    /// One BMP per frame.
    ImgSeqBmp,
    /// One PNG per frame.
    ImgSeqPng,
}

impl VideoFormat {
    fn is_avi(self) -> bool {
        matches!(
            self,
            VideoFormat::AviMjpg | VideoFormat::AviYuv | VideoFormat::AviJyuv | VideoFormat::AviRgb
        )
    }
}

/// Decode precision tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeQuality {
    /// Integer IDCT, nearest-neighbor chroma.
    Low,
    /// Double-precision IDCT with selectable chroma upsampling.
    High,
    /// Bit-faithful emulation of the console's own output.
    PsxExact,
}

/// Chroma upsampling selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChromaUpsamplingOption {
    /// Repeat the nearest sample.
    NearestNeighbor,
    /// Bilinear interpolation.
    Bilinear,
    /// Bicubic interpolation.
    Bicubic,
}

impl From<ChromaUpsamplingOption> for ChromaUpsampling {
    fn from(value: ChromaUpsamplingOption) -> Self {
        match value {
            ChromaUpsamplingOption::NearestNeighbor => ChromaUpsampling::NearestNeighbor,
            ChromaUpsamplingOption::Bilinear => ChromaUpsampling::Bilinear,
            ChromaUpsamplingOption::Bicubic => ChromaUpsampling::Bicubic,
        }
    }
}

/// CD rotation speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscSpeed {
    /// 1x: 75 sectors/second.
    Single,
    /// 2x: 150 sectors/second.
    Double,
}

impl DiscSpeed {
    /// Sectors per second at this speed.
    pub fn sectors_per_second(self) -> u32 {
        match self {
            DiscSpeed::Single => 75,
            DiscSpeed::Double => 150,
        }
    }
}

/// The video saver's configuration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSaverConfig {
    /// Output format.
    pub video_format: VideoFormat,
    /// Decode precision.
    pub decode_quality: DecodeQuality,
    /// Chroma upsampling (double-precision decoder only).
    pub chroma_upsampling: ChromaUpsamplingOption,
    /// JPEG quality in [0.0, 1.0].
    pub jpg_quality: f64,
    /// When false, dimensions round up to multiples of 16.
    pub crop: bool,
    /// Disc rotation speed.
    pub disc_speed: DiscSpeed,
    /// Inclusive frame range to save, or everything.
    pub frame_range: Option<(u32, u32)>,
    /// Start audio and video together the way the console does.
    pub emulate_psx_av_sync: bool,
    /// Audio gain in [0.0, 1.0].
    pub audio_volume: f64,
    /// AVI file path, or the frame-sequence directory.
    pub output: PathBuf,
}

impl Default for VideoSaverConfig {
    fn default() -> Self {
        Self {
            video_format: VideoFormat::AviMjpg,
            decode_quality: DecodeQuality::High,
            chroma_upsampling: ChromaUpsamplingOption::Bicubic,
            jpg_quality: 0.95,
            crop: true,
            disc_speed: DiscSpeed::Double,
            frame_range: None,
            emulate_psx_av_sync: false,
            audio_volume: 1.0,
            output: PathBuf::from("out"),
        }
    }
}

/// The audio half of the stream being saved.
#[derive(Debug, Clone, Copy)]
pub struct AudioStreamInfo {
    /// Sector the audio starts at.
    pub start_sector: u32,
    /// Sample rate.
    pub samples_per_second: u32,
    /// Channel count.
    pub channels: u16,
}

/// The video stream being saved.
#[derive(Debug, Clone, Copy)]
pub struct VideoStreamInfo {
    /// Frame width in pixels.
    pub width: usize,
    /// Frame height in pixels.
    pub height: usize,
    /// Sector the video starts at.
    pub start_sector: u32,
    /// Frame rate numerator.
    pub fps_num: u32,
    /// Frame rate denominator.
    pub fps_den: u32,
    /// Companion audio, when muxing.
    pub audio: Option<AudioStreamInfo>,
}

/// A composed saver chain: feed it demuxed frames and decoded audio, then
/// close it.
pub struct SaverPipeline {
    stage: Box<dyn BitstreamListener>,
    audio: Option<Box<dyn SectorTimedAudioWriter>>,
    frame_range: Option<(u32, u32)>,
    audio_volume: f64,
    scaled: Vec<u8>,
}

impl SaverPipeline {
    /// Feed one demuxed frame.
    pub fn feed_frame(&mut self, frame: &DemuxedFrame) -> Result<()> {
        if let Some((first, last)) = self.frame_range {
            if frame.frame_number < first || frame.frame_number > last {
                return Ok(());
            }
        }
        let info = FrameInfo {
            frame_number: frame.frame_number,
            presentation_end_sector: frame.presentation_sector as i64,
        };
        self.stage.bitstream(&frame.payload, &info)
    }

    /// Feed one decoded audio buffer.
    pub fn feed_audio(&mut self, audio: &DecodedAudio) -> Result<()> {
        let Some(sink) = &mut self.audio else {
            return Ok(());
        };
        self.scaled.clear();
        if (self.audio_volume - 1.0).abs() < f64::EPSILON {
            self.scaled.extend_from_slice(&audio.data);
        } else {
            for pair in audio.data.chunks_exact(2) {
                let sample = i16::from_le_bytes([pair[0], pair[1]]);
                let scaled = (sample as f64 * self.audio_volume)
                    .round()
                    .clamp(-32768.0, 32767.0) as i16;
                self.scaled.extend_from_slice(&scaled.to_le_bytes());
            }
        }
        sink.write_timed_audio(
            &self.scaled,
            Rational::from_int(audio.presentation_sector as i64),
        )
    }

    /// Finalize every open writer.
    pub fn close(&mut self) -> Result<()> {
        self.stage.close()
    }
}

fn saved_dimensions(config: &VideoSaverConfig, video: &VideoStreamInfo) -> (usize, usize) {
    if config.crop {
        (video.width, video.height)
    } else {
        (video.width.div_ceil(16) * 16, video.height.div_ceil(16) * 16)
    }
}

fn build_decoder(
    config: &VideoSaverConfig,
    width: usize,
    height: usize,
) -> Box<dyn strdec_codecs::mdec::MdecDecoder> {
    match config.decode_quality {
        DecodeQuality::Low | DecodeQuality::PsxExact => {
            Box::new(MdecDecoderInt::new(width, height))
        }
        DecodeQuality::High => Box::new(MdecDecoderDouble::with_options(
            width,
            height,
            config.chroma_upsampling.into(),
            ColorMatrix::Rec601,
        )),
    }
}

/// Compose the stage chain for `config` over `video`.
pub fn build(config: &VideoSaverConfig, video: &VideoStreamInfo) -> Result<SaverPipeline> {
    let (width, height) = saved_dimensions(config, video);
    if !(0.0..=1.0).contains(&config.jpg_quality) || !(0.0..=1.0).contains(&config.audio_volume) {
        return Err(Error::invalid_param(
            "jpg_quality and audio_volume must be within [0.0, 1.0]".to_string(),
        ));
    }

    let sectors_per_second = config.disc_speed.sectors_per_second();
    let av_sync = video.audio.map(|audio| {
        AudioVideoSync::new(
            video.start_sector,
            audio.start_sector,
            sectors_per_second,
            video.fps_num,
            video.fps_den,
            audio.samples_per_second,
            config.emulate_psx_av_sync,
        )
    });
    let vid_sync = match &av_sync {
        Some(av) => av.video().clone(),
        None => VideoSync::new(video.start_sector, sectors_per_second, video.fps_num, video.fps_den),
    };
    let avi_audio = video.audio.map(|audio| AudioFormat {
        channels: audio.channels,
        sample_rate: audio.samples_per_second,
        bits_per_sample: 16,
    });

    let open_avi = || -> Result<fs::File> {
        if let Some(parent) = config.output.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(fs::File::create(&config.output)?)
    };
    let formatter = |ext: &str| -> Box<dyn crate::vdp::FrameFileFormatter> {
        Box::new(NumberedFileFormatter::new(&config.output, "frame", ext, 4))
    };

    if config.video_format.is_avi() && config.video_format != VideoFormat::AviRgb {
        // planar and MJPG interchange needs even dimensions
        if width % 2 != 0 || height % 2 != 0 {
            return Err(Error::invalid_param(format!(
                "{width}x{height} frames cannot be saved without crop disabled"
            )));
        }
    }

    let (stage, audio): (Box<dyn BitstreamListener>, Option<Box<dyn SectorTimedAudioWriter>>) =
        match config.video_format {
            VideoFormat::ImgSeqDemux => (Box::new(Bitstream2File::new(formatter("bs"))), None),
            VideoFormat::ImgSeqMdec => (
                Box::new(Bitstream2Mdec::new(Box::new(Mdec2File::new(
                    formatter("mdec"),
                    width,
                    height,
                )))),
                None,
            ),
            VideoFormat::ImgSeqJpg => {
                let mut jpeg = Mdec2Jpeg::new(formatter("jpg"), width, height);
                jpeg.set_quality(config.jpg_quality);
                (Box::new(Bitstream2Mdec::new(Box::new(jpeg))), None)
            }
            VideoFormat::ImgSeqBmp | VideoFormat::ImgSeqPng => {
                let (still, ext) = if config.video_format == VideoFormat::ImgSeqPng {
                    (StillFormat::Png, "png")
                } else {
                    (StillFormat::Bmp, "bmp")
                };
                let image_stage =
                    Decoded2ImageFile::new(formatter(ext), still, width, height);
                let decoded = Mdec2Decoded::new(
                    build_decoder(config, width, height),
                    Box::new(image_stage),
                );
                (Box::new(Bitstream2Mdec::new(Box::new(decoded))), None)
            }
            VideoFormat::AviMjpg => {
                let mut stage = Mdec2MjpegAvi::new(
                    open_avi()?,
                    width,
                    height,
                    vid_sync,
                    av_sync,
                    avi_audio,
                );
                stage.set_quality(config.jpg_quality);
                let shared = SharedStage::new(stage);
                let audio_handle: Option<Box<dyn SectorTimedAudioWriter>> = avi_audio
                    .is_some()
                    .then(|| Box::new(shared.handle()) as Box<dyn SectorTimedAudioWriter>);
                (
                    Box::new(Bitstream2Mdec::new(Box::new(shared))),
                    audio_handle,
                )
            }
            VideoFormat::AviRgb => {
                let stage = Decoded2RgbAvi::new(
                    open_avi()?,
                    width,
                    height,
                    vid_sync,
                    av_sync,
                    avi_audio,
                );
                let shared = SharedStage::new(stage);
                let audio_handle: Option<Box<dyn SectorTimedAudioWriter>> = avi_audio
                    .is_some()
                    .then(|| Box::new(shared.handle()) as Box<dyn SectorTimedAudioWriter>);
                let decoded =
                    Mdec2Decoded::new(build_decoder(config, width, height), Box::new(shared));
                (
                    Box::new(Bitstream2Mdec::new(Box::new(decoded))),
                    audio_handle,
                )
            }
            VideoFormat::AviYuv | VideoFormat::AviJyuv => {
                if config.decode_quality != DecodeQuality::High {
                    return Err(Error::invalid_param(
                        "YUV AVI output requires the high decode quality".to_string(),
                    ));
                }
                let stage = Decoded2YuvAvi::new(
                    open_avi()?,
                    width,
                    height,
                    config.video_format == VideoFormat::AviJyuv,
                    vid_sync,
                    av_sync,
                    avi_audio,
                );
                let shared = SharedStage::new(stage);
                let audio_handle: Option<Box<dyn SectorTimedAudioWriter>> = avi_audio
                    .is_some()
                    .then(|| Box::new(shared.handle()) as Box<dyn SectorTimedAudioWriter>);
                let decoded =
                    Mdec2Decoded::new(build_decoder(config, width, height), Box::new(shared));
                (
                    Box::new(Bitstream2Mdec::new(Box::new(decoded))),
                    audio_handle,
                )
            }
        };

    Ok(SaverPipeline {
        stage,
        audio,
        frame_range: config.frame_range,
        audio_volume: config.audio_volume,
        scaled: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_info() -> VideoStreamInfo {
        VideoStreamInfo {
            width: 320,
            height: 240,
            start_sector: 0,
            fps_num: 15,
            fps_den: 1,
            audio: None,
        }
    }

    #[test]
    fn test_crop_rounds_dimensions() {
        let mut config = VideoSaverConfig::default();
        let mut video = video_info();
        video.width = 321;
        video.height = 239;

        config.crop = true;
        assert_eq!(saved_dimensions(&config, &video), (321, 239));
        config.crop = false;
        assert_eq!(saved_dimensions(&config, &video), (336, 240));
    }

    #[test]
    fn test_yuv_avi_requires_high_quality() {
        let config = VideoSaverConfig {
            video_format: VideoFormat::AviYuv,
            decode_quality: DecodeQuality::Low,
            output: std::env::temp_dir().join("strdec-test-reject.avi"),
            ..Default::default()
        };
        assert!(build(&config, &video_info()).is_err());
    }

    #[test]
    fn test_bad_quality_range_rejected() {
        let config = VideoSaverConfig {
            jpg_quality: 1.5,
            ..Default::default()
        };
        assert!(build(&config, &video_info()).is_err());
    }

    #[test]
    fn test_config_round_trips_through_serde() {
        let config = VideoSaverConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: VideoSaverConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.video_format, config.video_format);
        assert_eq!(back.disc_speed, config.disc_speed);
    }
}
