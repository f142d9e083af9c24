//! The video decoding pipeline stages.
//!
//! Each stage consumes one typed element per frame and emits one file or
//! writer call. File stages skip frames that fail; AVI stages substitute a
//! synthetic error frame so the frame index stays aligned with the nominal
//! sequence.

use std::cell::RefCell;
use std::fs;
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use byteorder::{LittleEndian, WriteBytesExt};

use strdec_avi::{AudioFormat, AviWriter, VideoLayout};
use strdec_codecs::bitstreams::BitstreamUncompressor;
use strdec_codecs::mdec::encoder::MdecEncoder;
use strdec_codecs::mdec::{MdecCodeSource, MdecDecoder};
use strdec_codecs::tojpeg::JpegTranslator;
use strdec_core::error::Result;
use strdec_core::frame::{RgbImage, YCbCrImage};
use strdec_core::mdec::blocks;
use strdec_core::rational::Rational;
use strdec_images::{BmpEncoder, Image, PngEncoder};

use crate::sync::{AudioVideoSync, VideoSync};

/// Frame identity as it moves through the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    /// Frame number within the stream.
    pub frame_number: u32,
    /// Sector by which the frame should be presented.
    pub presentation_end_sector: i64,
}

/// Produces the output path for one frame of a sequence.
pub trait FrameFileFormatter {
    /// The path frame `frame_number` is written to.
    fn format(&self, frame_number: u32) -> PathBuf;
}

/// `prefix[NNNN].ext` under a directory.
pub struct NumberedFileFormatter {
    dir: PathBuf,
    prefix: String,
    extension: String,
    digits: usize,
}

impl NumberedFileFormatter {
    /// Create a formatter.
    pub fn new(dir: impl Into<PathBuf>, prefix: &str, extension: &str, digits: usize) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.to_string(),
            extension: extension.to_string(),
            digits,
        }
    }
}

impl FrameFileFormatter for NumberedFileFormatter {
    fn format(&self, frame_number: u32) -> PathBuf {
        self.dir.join(format!(
            "{}[{:0width$}].{}",
            self.prefix,
            frame_number,
            self.extension,
            width = self.digits
        ))
    }
}

/// Receives each frame's compressed payload.
pub trait BitstreamListener {
    /// Handle one frame's bitstream.
    fn bitstream(&mut self, data: &[u8], info: &FrameInfo) -> Result<()>;

    /// Finalize any open outputs.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Receives each frame as an MDEC code stream, or the error that replaced
/// it.
pub trait MdecListener {
    /// Handle one frame's codes.
    fn mdec(&mut self, src: &mut dyn MdecCodeSource, info: &FrameInfo) -> Result<()>;

    /// Handle a frame that produced no codes.
    fn error(&mut self, message: &str, info: &FrameInfo) -> Result<()>;

    /// Finalize any open outputs.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Receives each frame decoded, or the error that replaced it.
pub trait DecodedListener {
    /// Handle one decoded frame.
    fn decoded(&mut self, decoder: &dyn MdecDecoder, info: &FrameInfo) -> Result<()>;

    /// Handle a frame that could not be decoded at all.
    fn error(&mut self, message: &str, info: &FrameInfo) -> Result<()>;

    /// Finalize any open outputs.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

fn open_output(path: &Path) -> std::io::Result<BufWriter<fs::File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(fs::File::create(path)?))
}

/// Writes each frame's raw compressed payload to its own file.
pub struct Bitstream2File {
    formatter: Box<dyn FrameFileFormatter>,
}

impl Bitstream2File {
    /// Create the stage.
    pub fn new(formatter: Box<dyn FrameFileFormatter>) -> Self {
        Self { formatter }
    }
}

impl BitstreamListener for Bitstream2File {
    fn bitstream(&mut self, data: &[u8], info: &FrameInfo) -> Result<()> {
        let path = self.formatter.format(info.frame_number);
        match open_output(&path).and_then(|mut f| f.write_all(data).and_then(|_| f.flush())) {
            Ok(()) => {}
            Err(e) => {
                tracing::error!(frame = info.frame_number, path = %path.display(), error = %e,
                    "failed to write bitstream file");
            }
        }
        Ok(())
    }
}

/// Identifies the bitstream format on the first frame and reuses the
/// uncompressor for the rest of the stream; a reset failure re-identifies
/// from scratch.
pub struct Bitstream2Mdec {
    uncompressor: Option<BitstreamUncompressor>,
    listener: Box<dyn MdecListener>,
}

impl Bitstream2Mdec {
    /// Create the stage around its downstream listener.
    pub fn new(listener: Box<dyn MdecListener>) -> Self {
        Self {
            uncompressor: None,
            listener,
        }
    }

    fn identify(&self, data: &[u8]) -> Option<BitstreamUncompressor> {
        match BitstreamUncompressor::identify(data) {
            Ok(unc) => {
                tracing::info!(format = unc.format().name(), "video format identified");
                Some(unc)
            }
            Err(_) => None,
        }
    }

    fn reset_uncompressor(&mut self, data: &[u8]) {
        match &mut self.uncompressor {
            None => self.uncompressor = self.identify(data),
            Some(unc) => {
                if unc.reset(data).is_err() {
                    self.uncompressor = self.identify(data);
                }
            }
        }
    }
}

impl BitstreamListener for Bitstream2Mdec {
    fn bitstream(&mut self, data: &[u8], info: &FrameInfo) -> Result<()> {
        self.reset_uncompressor(data);
        match &mut self.uncompressor {
            Some(unc) => self.listener.mdec(unc, info),
            None => {
                tracing::error!(frame = info.frame_number, "unable to determine frame type");
                self.listener
                    .error("unable to determine frame type", info)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.listener.close()
    }
}

/// Writes each frame's MDEC codes verbatim as 16-bit little-endian words.
pub struct Mdec2File {
    formatter: Box<dyn FrameFileFormatter>,
    total_blocks: usize,
}

impl Mdec2File {
    /// Create the stage for frames of the given dimensions.
    pub fn new(formatter: Box<dyn FrameFileFormatter>, width: usize, height: usize) -> Self {
        Self {
            formatter,
            total_blocks: blocks(width, height),
        }
    }
}

impl MdecListener for Mdec2File {
    fn mdec(&mut self, src: &mut dyn MdecCodeSource, info: &FrameInfo) -> Result<()> {
        let path = self.formatter.format(info.frame_number);
        let mut file = match open_output(&path) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(frame = info.frame_number, error = %e, "cannot open mdec file");
                return Ok(());
            }
        };
        let mut blocks_done = 0usize;
        while blocks_done < self.total_blocks {
            let code = match src.read_code() {
                Ok(code) => code,
                Err(e) if e.is_recoverable() => {
                    tracing::error!(frame = info.frame_number, error = %e,
                        "frame truncated while dumping codes");
                    break;
                }
                Err(e) => return Err(e),
            };
            if code.is_eob() {
                blocks_done += 1;
            }
            if let Err(e) = file.write_u16::<LittleEndian>(code.to_u16()) {
                tracing::error!(frame = info.frame_number, error = %e, "mdec file write failed");
                return Ok(());
            }
        }
        if let Err(e) = file.flush() {
            tracing::error!(frame = info.frame_number, error = %e, "mdec file flush failed");
        }
        Ok(())
    }

    fn error(&mut self, _message: &str, _info: &FrameInfo) -> Result<()> {
        // error frames are simply not written
        Ok(())
    }
}

/// Writes one JFIF file per frame, straight from the code stream.
pub struct Mdec2Jpeg {
    formatter: Box<dyn FrameFileFormatter>,
    translator: JpegTranslator,
    buffer: Vec<u8>,
}

impl Mdec2Jpeg {
    /// Create the stage for frames of the given dimensions.
    pub fn new(formatter: Box<dyn FrameFileFormatter>, width: usize, height: usize) -> Self {
        Self {
            formatter,
            translator: JpegTranslator::new(width, height),
            buffer: Vec::new(),
        }
    }

    /// Set the JPEG quality factor in [0.0, 1.0].
    pub fn set_quality(&mut self, quality: f64) {
        self.translator.set_quality(quality);
    }
}

impl MdecListener for Mdec2Jpeg {
    fn mdec(&mut self, src: &mut dyn MdecCodeSource, info: &FrameInfo) -> Result<()> {
        if let Err(e) = self.translator.read_mdec(src) {
            if e.is_recoverable() {
                tracing::warn!(frame = info.frame_number, error = %e, "skipping jpeg frame");
                return Ok(());
            }
            return Err(e);
        }
        self.buffer.clear();
        self.translator.write_jpeg(&mut self.buffer)?;

        let path = self.formatter.format(info.frame_number);
        match open_output(&path).and_then(|mut f| f.write_all(&self.buffer).and_then(|_| f.flush()))
        {
            Ok(()) => {}
            Err(e) => {
                tracing::error!(frame = info.frame_number, error = %e, "failed to write jpeg");
            }
        }
        Ok(())
    }

    fn error(&mut self, _message: &str, _info: &FrameInfo) -> Result<()> {
        // error frames are simply not written
        Ok(())
    }
}

/// Decodes each frame and forwards the decoder to the next stage.
pub struct Mdec2Decoded {
    decoder: Box<dyn MdecDecoder>,
    listener: Box<dyn DecodedListener>,
}

impl Mdec2Decoded {
    /// Create the stage around a decoder and its downstream listener.
    pub fn new(decoder: Box<dyn MdecDecoder>, listener: Box<dyn DecodedListener>) -> Self {
        Self { decoder, listener }
    }
}

impl MdecListener for Mdec2Decoded {
    fn mdec(&mut self, src: &mut dyn MdecCodeSource, info: &FrameInfo) -> Result<()> {
        match self.decoder.decode(src) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => {
                // what decoded before the corruption is still shown
                tracing::error!(frame = info.frame_number, error = %e, "frame decode failed");
            }
            Err(e) => return Err(e),
        }
        self.listener.decoded(self.decoder.as_ref(), info)
    }

    fn error(&mut self, message: &str, info: &FrameInfo) -> Result<()> {
        self.listener.error(message, info)
    }

    fn close(&mut self) -> Result<()> {
        self.listener.close()
    }
}

/// Still-image output format for decoded frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StillFormat {
    /// PNG files.
    Png,
    /// BMP files.
    Bmp,
}

/// Writes each decoded frame as a still image.
pub struct Decoded2ImageFile {
    formatter: Box<dyn FrameFileFormatter>,
    format: StillFormat,
    width: usize,
    height: usize,
    raster: Vec<u32>,
}

impl Decoded2ImageFile {
    /// Create the stage.
    pub fn new(
        formatter: Box<dyn FrameFileFormatter>,
        format: StillFormat,
        width: usize,
        height: usize,
    ) -> Self {
        Self {
            formatter,
            format,
            width,
            height,
            raster: vec![0; width * height],
        }
    }
}

impl DecodedListener for Decoded2ImageFile {
    fn decoded(&mut self, decoder: &dyn MdecDecoder, info: &FrameInfo) -> Result<()> {
        decoder.read_decoded_rgb(self.width, self.height, &mut self.raster)?;
        let image = match Image::from_rgb32(&self.raster, self.width, self.height) {
            Ok(image) => image,
            Err(e) => {
                tracing::error!(frame = info.frame_number, error = %e, "raster conversion failed");
                return Ok(());
            }
        };
        let encoded = match self.format {
            StillFormat::Png => PngEncoder::new().encode(&image),
            StillFormat::Bmp => BmpEncoder::new().encode(&image),
        };
        let bytes = match encoded {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(frame = info.frame_number, error = %e, "image encode failed");
                return Ok(());
            }
        };
        let path = self.formatter.format(info.frame_number);
        if let Err(e) =
            open_output(&path).and_then(|mut f| f.write_all(&bytes).and_then(|_| f.flush()))
        {
            tracing::error!(frame = info.frame_number, error = %e, "failed to write image file");
        }
        Ok(())
    }

    fn error(&mut self, _message: &str, _info: &FrameInfo) -> Result<()> {
        // error frames are simply not written
        Ok(())
    }
}

/// Writes sector-timed audio buffers, inserting silence to hold sync.
pub trait SectorTimedAudioWriter {
    /// Write one PCM buffer presented at `presentation_sector`.
    fn write_timed_audio(&mut self, data: &[u8], presentation_sector: Rational) -> Result<()>;
}

/// The shared part of every AVI stage: the writer, the sync clocks, and
/// the blank/repeat bookkeeping ahead of each frame.
struct AviSink<W: Write + Seek> {
    writer: AviWriter<W>,
    vid_sync: VideoSync,
    av_sync: Option<AudioVideoSync>,
}

impl<W: Write + Seek> AviSink<W> {
    fn new(writer: AviWriter<W>, vid_sync: VideoSync, av_sync: Option<AudioVideoSync>) -> Self {
        Self {
            writer,
            vid_sync,
            av_sync,
        }
    }

    /// Write whatever blank or repeated frames this frame's presentation
    /// sector requires before it.
    fn prep_for_frame(&mut self, info: &FrameInfo) -> Result<()> {
        if self.writer.video_frames_written() < 1 && self.vid_sync.initial_video() > 0 {
            tracing::info!(
                frames = self.vid_sync.initial_video(),
                "writing blank frames to align audio and video"
            );
            self.writer.write_blank_frame().map_err(into_io)?;
            for _ in 1..self.vid_sync.initial_video() {
                self.writer.repeat_previous_frame().map_err(into_io)?;
            }
        }

        let dup = self.vid_sync.frames_to_catch_up(
            info.presentation_end_sector,
            self.writer.video_frames_written(),
        );
        if dup < 0 {
            // frames can end early (Iki) which puts the presentation
            // sector ahead of the write clock
            tracing::warn!(
                frame = info.frame_number,
                ahead = -dup,
                "frame is ahead of schedule"
            );
        } else {
            for _ in 0..dup {
                if self.writer.video_frames_written() < 1 {
                    self.writer.write_blank_frame().map_err(into_io)?;
                } else {
                    self.writer.repeat_previous_frame().map_err(into_io)?;
                }
            }
        }
        Ok(())
    }

    fn write_timed_audio(&mut self, data: &[u8], presentation_sector: Rational) -> Result<()> {
        let av = self
            .av_sync
            .as_ref()
            .ok_or_else(|| strdec_core::error::Error::invalid_param(
                "AVI stream has no audio".to_string(),
            ))?;
        if self.writer.audio_sample_frames_written() < 1 && av.audio().initial_audio() > 0 {
            tracing::info!(
                samples = av.audio().initial_audio(),
                "writing initial silence to align audio and video"
            );
            let samples = av.audio().initial_audio();
            self.writer.write_silent_samples(samples).map_err(into_io)?;
        }
        let need = av
            .audio()
            .samples_to_catch_up(presentation_sector, self.writer.audio_sample_frames_written());
        if need > 0 {
            tracing::info!(samples = need, "writing silence to keep audio in sync");
            self.writer.write_silent_samples(need as u64).map_err(into_io)?;
        }
        self.writer.write_audio(data).map_err(into_io)?;
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        self.writer.finalize().map_err(into_io)
    }
}

fn into_io(e: strdec_avi::AviError) -> strdec_core::error::Error {
    match e {
        strdec_avi::AviError::Io(io) => io.into(),
        other => strdec_core::error::Error::invalid_param(other.to_string()),
    }
}

/// Pack a decoded raster into bottom-up BGR DIB rows.
fn rgb_to_dib(pixels: &[u32], width: usize, height: usize) -> Vec<u8> {
    let row_bytes = (width * 3 + 3) & !3;
    let mut out = vec![0u8; row_bytes * height];
    for y in 0..height {
        let src_row = &pixels[y * width..(y + 1) * width];
        let dst = &mut out[(height - 1 - y) * row_bytes..];
        for (x, &p) in src_row.iter().enumerate() {
            dst[x * 3] = p as u8;
            dst[x * 3 + 1] = (p >> 8) as u8;
            dst[x * 3 + 2] = (p >> 16) as u8;
        }
    }
    out
}

/// Pack planar YCbCr into YV12 frame bytes (Y, then Cr, then Cb).
fn ycbcr_to_yv12(img: &YCbCrImage) -> Vec<u8> {
    let mut out =
        Vec::with_capacity(img.y_plane().len() + img.cb_plane().len() + img.cr_plane().len());
    out.extend_from_slice(img.y_plane());
    out.extend_from_slice(img.cr_plane());
    out.extend_from_slice(img.cb_plane());
    out
}

/// Convert a packed RGB raster to full-range planar 4:2:0.
fn rgb_to_ycbcr_image(pixels: &[u32], width: usize, height: usize) -> YCbCrImage {
    let mut img = YCbCrImage::new(width, height);
    let (y_plane, cb_plane, cr_plane) = img.planes_mut();
    for py in 0..height {
        for px in 0..width {
            let p = pixels[py * width + px];
            let r = ((p >> 16) & 0xFF) as f64;
            let g = ((p >> 8) & 0xFF) as f64;
            let b = (p & 0xFF) as f64;
            let y = 0.299 * r + 0.587 * g + 0.114 * b;
            y_plane[py * width + px] = y.round().clamp(0.0, 255.0) as u8;
        }
    }
    for cy in 0..height / 2 {
        for cx in 0..width / 2 {
            let mut cb = 0.0;
            let mut cr = 0.0;
            for dy in 0..2 {
                for dx in 0..2 {
                    let p = pixels[(cy * 2 + dy) * width + cx * 2 + dx];
                    let r = ((p >> 16) & 0xFF) as f64;
                    let g = ((p >> 8) & 0xFF) as f64;
                    let b = (p & 0xFF) as f64;
                    cb += -0.168736 * r - 0.331264 * g + 0.5 * b;
                    cr += 0.5 * r - 0.418688 * g - 0.081312 * b;
                }
            }
            cb_plane[cy * (width / 2) + cx] = (cb / 4.0 + 128.0).round().clamp(0.0, 255.0) as u8;
            cr_plane[cy * (width / 2) + cx] = (cr / 4.0 + 128.0).round().clamp(0.0, 255.0) as u8;
        }
    }
    img
}

/// Writes decoded frames into an uncompressed RGB (DIB) AVI.
pub struct Decoded2RgbAvi<W: Write + Seek> {
    sink: AviSink<W>,
    width: usize,
    height: usize,
    raster: Vec<u32>,
}

impl<W: Write + Seek> Decoded2RgbAvi<W> {
    /// Create the stage; `audio` enables the PCM stream.
    pub fn new(
        out: W,
        width: usize,
        height: usize,
        vid_sync: VideoSync,
        av_sync: Option<AudioVideoSync>,
        audio: Option<AudioFormat>,
    ) -> Self {
        let writer = AviWriter::new(
            out,
            VideoLayout::Dib,
            width as u32,
            height as u32,
            vid_sync.fps_num(),
            vid_sync.fps_den(),
            audio,
        );
        Self {
            sink: AviSink::new(writer, vid_sync, av_sync),
            width,
            height,
            raster: vec![0; width * height],
        }
    }

    /// Video frames written so far, fillers included.
    pub fn video_frames_written(&self) -> u64 {
        self.sink.writer.video_frames_written()
    }
}

impl<W: Write + Seek> DecodedListener for Decoded2RgbAvi<W> {
    fn decoded(&mut self, decoder: &dyn MdecDecoder, info: &FrameInfo) -> Result<()> {
        decoder.read_decoded_rgb(self.width, self.height, &mut self.raster)?;
        self.sink.prep_for_frame(info)?;
        let dib = rgb_to_dib(&self.raster, self.width, self.height);
        self.sink.writer.write_frame(&dib).map_err(into_io)
    }

    fn error(&mut self, message: &str, info: &FrameInfo) -> Result<()> {
        let raster = render_error_frame(message, self.width, self.height);
        self.sink.prep_for_frame(info)?;
        let dib = rgb_to_dib(&raster, self.width, self.height);
        self.sink.writer.write_frame(&dib).map_err(into_io)
    }

    fn close(&mut self) -> Result<()> {
        self.sink.finalize()
    }
}

impl<W: Write + Seek> SectorTimedAudioWriter for Decoded2RgbAvi<W> {
    fn write_timed_audio(&mut self, data: &[u8], presentation_sector: Rational) -> Result<()> {
        self.sink.write_timed_audio(data, presentation_sector)
    }
}

/// Writes decoded frames into a planar YV12 AVI, studio-range or JFIF
/// full-range.
pub struct Decoded2YuvAvi<W: Write + Seek> {
    sink: AviSink<W>,
    jfif: bool,
    planes: YCbCrImage,
}

impl<W: Write + Seek> Decoded2YuvAvi<W> {
    /// Create the stage. `jfif` selects the full-range plane reader.
    pub fn new(
        out: W,
        width: usize,
        height: usize,
        jfif: bool,
        vid_sync: VideoSync,
        av_sync: Option<AudioVideoSync>,
        audio: Option<AudioFormat>,
    ) -> Self {
        let writer = AviWriter::new(
            out,
            VideoLayout::Yv12,
            width as u32,
            height as u32,
            vid_sync.fps_num(),
            vid_sync.fps_den(),
            audio,
        );
        Self {
            sink: AviSink::new(writer, vid_sync, av_sync),
            jfif,
            planes: YCbCrImage::new(width, height),
        }
    }

    /// Video frames written so far, fillers included.
    pub fn video_frames_written(&self) -> u64 {
        self.sink.writer.video_frames_written()
    }
}

impl<W: Write + Seek> DecodedListener for Decoded2YuvAvi<W> {
    fn decoded(&mut self, decoder: &dyn MdecDecoder, info: &FrameInfo) -> Result<()> {
        let double = decoder.as_double().ok_or_else(|| {
            strdec_core::error::Error::invalid_param(
                "YUV AVI output needs the double-precision decoder".to_string(),
            )
        })?;
        if self.jfif {
            double.read_decoded_jfif_ycbcr420(&mut self.planes)?;
        } else {
            double.read_decoded_rec601_ycbcr420(&mut self.planes)?;
        }
        self.sink.prep_for_frame(info)?;
        let frame = ycbcr_to_yv12(&self.planes);
        self.sink.writer.write_frame(&frame).map_err(into_io)
    }

    fn error(&mut self, message: &str, info: &FrameInfo) -> Result<()> {
        let raster =
            render_error_frame(message, self.planes.width(), self.planes.height());
        let planes = rgb_to_ycbcr_image(&raster, self.planes.width(), self.planes.height());
        self.sink.prep_for_frame(info)?;
        let frame = ycbcr_to_yv12(&planes);
        self.sink.writer.write_frame(&frame).map_err(into_io)
    }

    fn close(&mut self) -> Result<()> {
        self.sink.finalize()
    }
}

impl<W: Write + Seek> SectorTimedAudioWriter for Decoded2YuvAvi<W> {
    fn write_timed_audio(&mut self, data: &[u8], presentation_sector: Rational) -> Result<()> {
        self.sink.write_timed_audio(data, presentation_sector)
    }
}

/// Translates each frame's codes to JPEG and writes an MJPG AVI. The only
/// AVI stage that consumes codes instead of decoded pixels.
pub struct Mdec2MjpegAvi<W: Write + Seek> {
    sink: AviSink<W>,
    translator: JpegTranslator,
    buffer: Vec<u8>,
    width: usize,
    height: usize,
}

impl<W: Write + Seek> Mdec2MjpegAvi<W> {
    /// Create the stage.
    pub fn new(
        out: W,
        width: usize,
        height: usize,
        vid_sync: VideoSync,
        av_sync: Option<AudioVideoSync>,
        audio: Option<AudioFormat>,
    ) -> Self {
        let writer = AviWriter::new(
            out,
            VideoLayout::Mjpg,
            width as u32,
            height as u32,
            vid_sync.fps_num(),
            vid_sync.fps_den(),
            audio,
        );
        let mut stage = Self {
            sink: AviSink::new(writer, vid_sync, av_sync),
            translator: JpegTranslator::new(width, height),
            buffer: Vec::new(),
            width,
            height,
        };
        if let Ok(blank) = stage.encode_raster_jpeg(&vec![0u32; width * height]) {
            stage.sink.writer.set_blank_frame(blank);
        }
        stage
    }

    /// Video frames written so far, fillers included.
    pub fn video_frames_written(&self) -> u64 {
        self.sink.writer.video_frames_written()
    }

    /// Set the JPEG quality factor in [0.0, 1.0].
    pub fn set_quality(&mut self, quality: f64) {
        self.translator.set_quality(quality);
    }

    /// Encode an RGB raster through the MDEC encoder and translator.
    fn encode_raster_jpeg(&mut self, raster: &[u32]) -> Result<Vec<u8>> {
        let mut img = RgbImage::new(self.width, self.height);
        img.data_mut().copy_from_slice(raster);
        let encoder = MdecEncoder::from_rgb(&img);
        let codes = encoder.stream(1)?;
        let mut translator = JpegTranslator::new(self.width, self.height);
        translator.read_mdec(&mut strdec_codecs::mdec::CodeSliceSource::new(&codes))?;
        let mut out = Vec::new();
        translator.write_jpeg(&mut out)?;
        Ok(out)
    }
}

impl<W: Write + Seek> MdecListener for Mdec2MjpegAvi<W> {
    fn mdec(&mut self, src: &mut dyn MdecCodeSource, info: &FrameInfo) -> Result<()> {
        match self.translator.read_mdec(src) {
            Ok(()) => {
                self.buffer.clear();
                self.translator.write_jpeg(&mut self.buffer)?;
                self.sink.prep_for_frame(info)?;
                self.sink.writer.write_frame(&self.buffer).map_err(into_io)
            }
            Err(e) if e.is_recoverable() => {
                tracing::warn!(frame = info.frame_number, error = %e, "mjpeg frame failed");
                self.error(&e.to_string(), info)
            }
            Err(e) => Err(e),
        }
    }

    fn error(&mut self, message: &str, info: &FrameInfo) -> Result<()> {
        let raster = render_error_frame(message, self.width, self.height);
        let jpeg = self.encode_raster_jpeg(&raster)?;
        self.sink.prep_for_frame(info)?;
        self.sink.writer.write_frame(&jpeg).map_err(into_io)
    }

    fn close(&mut self) -> Result<()> {
        self.sink.finalize()
    }
}

impl<W: Write + Seek> SectorTimedAudioWriter for Mdec2MjpegAvi<W> {
    fn write_timed_audio(&mut self, data: &[u8], presentation_sector: Rational) -> Result<()> {
        self.sink.write_timed_audio(data, presentation_sector)
    }
}

/// Shared ownership wrapper so one AVI stage can sit in the listener chain
/// and also receive sector-timed audio.
pub struct SharedStage<T>(Rc<RefCell<T>>);

impl<T> SharedStage<T> {
    /// Wrap a stage.
    pub fn new(inner: T) -> Self {
        Self(Rc::new(RefCell::new(inner)))
    }

    /// Another handle to the same stage.
    pub fn handle(&self) -> SharedStage<T> {
        SharedStage(Rc::clone(&self.0))
    }
}

impl<T: MdecListener> MdecListener for SharedStage<T> {
    fn mdec(&mut self, src: &mut dyn MdecCodeSource, info: &FrameInfo) -> Result<()> {
        self.0.borrow_mut().mdec(src, info)
    }

    fn error(&mut self, message: &str, info: &FrameInfo) -> Result<()> {
        self.0.borrow_mut().error(message, info)
    }

    fn close(&mut self) -> Result<()> {
        self.0.borrow_mut().close()
    }
}

impl<T: DecodedListener> DecodedListener for SharedStage<T> {
    fn decoded(&mut self, decoder: &dyn MdecDecoder, info: &FrameInfo) -> Result<()> {
        self.0.borrow_mut().decoded(decoder, info)
    }

    fn error(&mut self, message: &str, info: &FrameInfo) -> Result<()> {
        self.0.borrow_mut().error(message, info)
    }

    fn close(&mut self) -> Result<()> {
        self.0.borrow_mut().close()
    }
}

impl<T: SectorTimedAudioWriter> SectorTimedAudioWriter for SharedStage<T> {
    fn write_timed_audio(&mut self, data: &[u8], presentation_sector: Rational) -> Result<()> {
        self.0.borrow_mut().write_timed_audio(data, presentation_sector)
    }
}

/// Render a black frame with the error text drawn in white at (5, 20).
pub fn render_error_frame(message: &str, width: usize, height: usize) -> Vec<u32> {
    let mut raster = vec![0u32; width * height];
    let mut x = 5usize;
    let y = 20usize;
    for ch in message.chars() {
        if x + 5 >= width {
            break;
        }
        let glyph = font::glyph(ch);
        for (row, &bits) in glyph.iter().enumerate() {
            if y + row >= height {
                break;
            }
            for col in 0..5 {
                if bits & (0x10 >> col) != 0 {
                    raster[(y + row) * width + x + col] = 0xFFFFFF;
                }
            }
        }
        x += 6;
    }
    raster
}

mod font {
    /// 5x7 glyphs, bit 4 is the leftmost pixel of each row.
    pub fn glyph(ch: char) -> [u8; 7] {
        match ch.to_ascii_uppercase() {
            'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
            'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
            'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
            'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
            'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
            'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
            'G' => [0x0E, 0x11, 0x10, 0x13, 0x11, 0x11, 0x0F],
            'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
            'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
            'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
            'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
            'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
            'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
            'N' => [0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x11],
            'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
            'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
            'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
            'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
            'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
            'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
            'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
            'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
            'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
            'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
            'Y' => [0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x04],
            'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
            '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
            '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
            '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
            '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
            '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
            '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
            '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
            '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
            '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
            '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
            ' ' => [0; 7],
            '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
            ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
            ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
            '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
            '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
            ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
            '/' => [0x01, 0x01, 0x02, 0x04, 0x08, 0x10, 0x10],
            '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
            '?' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
            '\'' => [0x04, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00],
            _ => [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F],
        }
    }
}
