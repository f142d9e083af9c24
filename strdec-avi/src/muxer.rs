//! AVI muxer.

use crate::chunks::{FourCC, IndexEntry, RiffChunk};
use crate::error::{AviError, Result};
use crate::types::{AudioFormat, VideoLayout};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{Cursor, Seek, SeekFrom, Write};

const VIDEO_STREAM: u32 = 0;
const AUDIO_STREAM: u32 = 1;

/// AVI 1.0 writer with one video stream and an optional PCM audio stream.
pub struct AviWriter<W: Write + Seek> {
    writer: W,
    layout: VideoLayout,
    width: u32,
    height: u32,
    fps_num: u32,
    fps_den: u32,
    audio: Option<AudioFormat>,
    index_entries: Vec<IndexEntry>,
    movi_offset: u64,
    header_written: bool,
    finalized: bool,
    video_frames: u64,
    audio_bytes: u64,
    last_video_entry: Option<(u32, u32)>,
    blank_frame: Option<Vec<u8>>,
    avih_total_frames_offset: u64,
    strh_length_offsets: Vec<(u32, u64)>,
}

impl<W: Write + Seek> AviWriter<W> {
    /// Create a writer. `fps_num / fps_den` is the video frame rate.
    pub fn new(
        writer: W,
        layout: VideoLayout,
        width: u32,
        height: u32,
        fps_num: u32,
        fps_den: u32,
        audio: Option<AudioFormat>,
    ) -> Self {
        let blank_frame = layout.frame_size(width, height).map(|size| {
            let mut frame = vec![0u8; size];
            if layout == VideoLayout::Yv12 {
                // black YV12 has centered chroma
                let y_len = (width * height) as usize;
                for b in &mut frame[y_len..] {
                    *b = 128;
                }
            }
            frame
        });
        AviWriter {
            writer,
            layout,
            width,
            height,
            fps_num,
            fps_den,
            audio,
            index_entries: Vec::new(),
            movi_offset: 0,
            header_written: false,
            finalized: false,
            video_frames: 0,
            audio_bytes: 0,
            last_video_entry: None,
            blank_frame,
            avih_total_frames_offset: 0,
            strh_length_offsets: Vec::new(),
        }
    }

    /// Provide the frame bytes `write_blank_frame` emits. Required for
    /// MJPG streams, where a blank frame is a pre-encoded black JPEG.
    pub fn set_blank_frame(&mut self, frame: Vec<u8>) {
        self.blank_frame = Some(frame);
    }

    /// Video frames written so far (blanks and repeats included).
    pub fn video_frames_written(&self) -> u64 {
        self.video_frames
    }

    /// Audio sample frames written so far (silence included).
    pub fn audio_sample_frames_written(&self) -> u64 {
        match self.audio {
            Some(af) => self.audio_bytes / af.block_align() as u64,
            None => 0,
        }
    }

    /// Write the RIFF/hdrl/movi preamble.
    pub fn write_header(&mut self) -> Result<()> {
        if self.header_written {
            return Ok(());
        }

        self.writer.write_all(b"RIFF")?;
        self.writer.write_u32::<LittleEndian>(0)?; // patched in finalize
        self.writer.write_all(b"AVI ")?;

        self.write_hdrl_list()?;

        // JUNK padding to a 2 KiB boundary
        let pos = self.writer.stream_position()?;
        let target = pos.div_ceil(2048) * 2048;
        let junk = target - pos;
        if junk >= 8 {
            self.writer.write_all(b"JUNK")?;
            self.writer.write_u32::<LittleEndian>((junk - 8) as u32)?;
            self.writer.write_all(&vec![0u8; (junk - 8) as usize])?;
        }

        self.movi_offset = self.writer.stream_position()?;
        self.writer.write_all(b"LIST")?;
        self.writer.write_u32::<LittleEndian>(0)?; // patched in finalize
        self.writer.write_all(b"movi")?;

        self.header_written = true;
        log::debug!("header written, movi starts at {}", self.movi_offset);
        Ok(())
    }

    fn write_hdrl_list(&mut self) -> Result<()> {
        let hdrl_start = self.writer.stream_position()?;
        self.writer.write_all(b"LIST")?;
        self.writer.write_u32::<LittleEndian>(0)?;
        self.writer.write_all(b"hdrl")?;

        self.write_avih()?;
        self.write_video_strl()?;
        if self.audio.is_some() {
            self.write_audio_strl()?;
        }

        let hdrl_end = self.writer.stream_position()?;
        self.writer.seek(SeekFrom::Start(hdrl_start + 4))?;
        self.writer
            .write_u32::<LittleEndian>((hdrl_end - hdrl_start - 8) as u32)?;
        self.writer.seek(SeekFrom::Start(hdrl_end))?;
        Ok(())
    }

    fn write_avih(&mut self) -> Result<()> {
        let mut data = Cursor::new(Vec::new());
        let usec_per_frame = if self.fps_num > 0 {
            (1_000_000u64 * self.fps_den as u64 / self.fps_num as u64) as u32
        } else {
            33333
        };
        data.write_u32::<LittleEndian>(usec_per_frame)?;
        data.write_u32::<LittleEndian>(10_000_000)?; // max bytes per sec
        data.write_u32::<LittleEndian>(0)?; // padding granularity
        data.write_u32::<LittleEndian>(0x110)?; // HASINDEX | ISINTERLEAVED
        let total_frames_field = data.position();
        data.write_u32::<LittleEndian>(0)?; // total frames, patched later
        data.write_u32::<LittleEndian>(0)?; // initial frames
        let streams = 1 + self.audio.is_some() as u32;
        data.write_u32::<LittleEndian>(streams)?;
        data.write_u32::<LittleEndian>(1_000_000)?; // suggested buffer size
        data.write_u32::<LittleEndian>(self.width)?;
        data.write_u32::<LittleEndian>(self.height)?;
        data.write_all(&[0u8; 16])?; // reserved

        // avih data begins 8 bytes after the chunk header
        self.avih_total_frames_offset =
            self.writer.stream_position()? + 8 + total_frames_field;
        let chunk = RiffChunk::new(FourCC(*b"avih"), data.into_inner());
        chunk.write(&mut self.writer)?;
        Ok(())
    }

    fn write_video_strl(&mut self) -> Result<()> {
        let strl_start = self.writer.stream_position()?;
        self.writer.write_all(b"LIST")?;
        self.writer.write_u32::<LittleEndian>(0)?;
        self.writer.write_all(b"strl")?;

        // strh
        let mut strh = Cursor::new(Vec::new());
        strh.write_all(b"vids")?;
        strh.write_all(&self.layout.codec())?;
        strh.write_u32::<LittleEndian>(0)?; // flags
        strh.write_u16::<LittleEndian>(0)?; // priority
        strh.write_u16::<LittleEndian>(0)?; // language
        strh.write_u32::<LittleEndian>(0)?; // initial frames
        strh.write_u32::<LittleEndian>(self.fps_den)?; // scale
        strh.write_u32::<LittleEndian>(self.fps_num)?; // rate
        strh.write_u32::<LittleEndian>(0)?; // start
        let length_field = strh.position();
        strh.write_u32::<LittleEndian>(0)?; // length, patched later
        strh.write_u32::<LittleEndian>(1_000_000)?; // suggested buffer size
        strh.write_u32::<LittleEndian>(0)?; // quality
        strh.write_u32::<LittleEndian>(0)?; // sample size
        strh.write_all(&[0u8; 8])?; // frame rect

        self.strh_length_offsets
            .push((VIDEO_STREAM, self.writer.stream_position()? + 8 + length_field));
        RiffChunk::new(FourCC(*b"strh"), strh.into_inner()).write(&mut self.writer)?;

        // strf: BITMAPINFOHEADER
        let mut strf = Cursor::new(Vec::new());
        strf.write_u32::<LittleEndian>(40)?;
        strf.write_i32::<LittleEndian>(self.width as i32)?;
        strf.write_i32::<LittleEndian>(self.height as i32)?;
        strf.write_u16::<LittleEndian>(1)?; // planes
        strf.write_u16::<LittleEndian>(self.layout.bit_count())?;
        strf.write_all(&self.layout.compression())?;
        let image_size = self
            .layout
            .frame_size(self.width, self.height)
            .unwrap_or(0) as u32;
        strf.write_u32::<LittleEndian>(image_size)?;
        strf.write_i32::<LittleEndian>(0)?;
        strf.write_i32::<LittleEndian>(0)?;
        strf.write_u32::<LittleEndian>(0)?;
        strf.write_u32::<LittleEndian>(0)?;
        RiffChunk::new(FourCC(*b"strf"), strf.into_inner()).write(&mut self.writer)?;

        let strl_end = self.writer.stream_position()?;
        self.writer.seek(SeekFrom::Start(strl_start + 4))?;
        self.writer
            .write_u32::<LittleEndian>((strl_end - strl_start - 8) as u32)?;
        self.writer.seek(SeekFrom::Start(strl_end))?;
        Ok(())
    }

    fn write_audio_strl(&mut self) -> Result<()> {
        let af = self.audio.expect("audio stream configured");
        let strl_start = self.writer.stream_position()?;
        self.writer.write_all(b"LIST")?;
        self.writer.write_u32::<LittleEndian>(0)?;
        self.writer.write_all(b"strl")?;

        let mut strh = Cursor::new(Vec::new());
        strh.write_all(b"auds")?;
        strh.write_all(&[1, 0, 0, 0])?; // PCM
        strh.write_u32::<LittleEndian>(0)?;
        strh.write_u16::<LittleEndian>(0)?;
        strh.write_u16::<LittleEndian>(0)?;
        strh.write_u32::<LittleEndian>(0)?;
        strh.write_u32::<LittleEndian>(1)?; // scale
        strh.write_u32::<LittleEndian>(af.sample_rate)?; // rate
        strh.write_u32::<LittleEndian>(0)?;
        let length_field = strh.position();
        strh.write_u32::<LittleEndian>(0)?; // length in samples, patched
        strh.write_u32::<LittleEndian>(af.avg_bytes_per_sec())?;
        strh.write_u32::<LittleEndian>(0)?;
        strh.write_u32::<LittleEndian>(af.block_align() as u32)?; // sample size
        strh.write_all(&[0u8; 8])?;

        self.strh_length_offsets
            .push((AUDIO_STREAM, self.writer.stream_position()? + 8 + length_field));
        RiffChunk::new(FourCC(*b"strh"), strh.into_inner()).write(&mut self.writer)?;

        // strf: WAVEFORMATEX without extra data
        let mut strf = Cursor::new(Vec::new());
        strf.write_u16::<LittleEndian>(1)?; // PCM
        strf.write_u16::<LittleEndian>(af.channels)?;
        strf.write_u32::<LittleEndian>(af.sample_rate)?;
        strf.write_u32::<LittleEndian>(af.avg_bytes_per_sec())?;
        strf.write_u16::<LittleEndian>(af.block_align())?;
        strf.write_u16::<LittleEndian>(af.bits_per_sample)?;
        RiffChunk::new(FourCC(*b"strf"), strf.into_inner()).write(&mut self.writer)?;

        let strl_end = self.writer.stream_position()?;
        self.writer.seek(SeekFrom::Start(strl_start + 4))?;
        self.writer
            .write_u32::<LittleEndian>((strl_end - strl_start - 8) as u32)?;
        self.writer.seek(SeekFrom::Start(strl_end))?;
        Ok(())
    }

    fn write_chunk(&mut self, stream: u32, suffix: &[u8; 2], data: &[u8]) -> Result<(u32, u32)> {
        if !self.header_written {
            self.write_header()?;
        }
        if self.finalized {
            return Err(AviError::InvalidState("writer already finalized".into()));
        }
        let chunk_id = FourCC::stream_chunk(stream, suffix);
        let offset = (self.writer.stream_position()? - self.movi_offset - 8) as u32;
        let chunk = RiffChunk::new(chunk_id, data.to_vec());
        chunk.write(&mut self.writer)?;
        self.index_entries.push(IndexEntry {
            chunk_id,
            flags: IndexEntry::KEYFRAME,
            offset,
            size: data.len() as u32,
        });
        Ok((offset, data.len() as u32))
    }

    /// Write one video frame in the stream's layout.
    pub fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        if let Some(expected) = self.layout.frame_size(self.width, self.height) {
            if data.len() != expected {
                return Err(AviError::InvalidFrame(format!(
                    "frame is {} bytes, layout needs {expected}",
                    data.len()
                )));
            }
        }
        let entry = self.write_chunk(VIDEO_STREAM, b"dc", data)?;
        self.last_video_entry = Some(entry);
        self.video_frames += 1;
        Ok(())
    }

    /// Write a blank (black) frame.
    pub fn write_blank_frame(&mut self) -> Result<()> {
        match self.blank_frame.take() {
            Some(frame) => {
                let result = self.write_frame(&frame);
                self.blank_frame = Some(frame);
                result
            }
            None => {
                log::warn!("no blank frame registered, writing an empty chunk");
                let entry = self.write_chunk(VIDEO_STREAM, b"dc", &[])?;
                self.last_video_entry = Some(entry);
                self.video_frames += 1;
                Ok(())
            }
        }
    }

    /// Repeat the previous video frame by pointing a new index entry at the
    /// previous chunk; no new chunk data is written.
    pub fn repeat_previous_frame(&mut self) -> Result<()> {
        let (offset, size) = self.last_video_entry.ok_or_else(|| {
            AviError::InvalidState("no previous frame to repeat".into())
        })?;
        self.index_entries.push(IndexEntry {
            chunk_id: FourCC::stream_chunk(VIDEO_STREAM, b"dc"),
            flags: IndexEntry::KEYFRAME,
            offset,
            size,
        });
        self.video_frames += 1;
        Ok(())
    }

    /// Write PCM audio data. The length must be a multiple of the block
    /// alignment.
    pub fn write_audio(&mut self, data: &[u8]) -> Result<()> {
        let af = self
            .audio
            .ok_or_else(|| AviError::InvalidState("no audio stream".into()))?;
        if data.len() % af.block_align() as usize != 0 {
            return Err(AviError::InvalidFrame(format!(
                "audio data length {} is not a multiple of the {}-byte block",
                data.len(),
                af.block_align()
            )));
        }
        self.write_chunk(AUDIO_STREAM, b"wb", data)?;
        self.audio_bytes += data.len() as u64;
        Ok(())
    }

    /// Write `samples` sample frames of silence.
    pub fn write_silent_samples(&mut self, samples: u64) -> Result<()> {
        let af = self
            .audio
            .ok_or_else(|| AviError::InvalidState("no audio stream".into()))?;
        if samples == 0 {
            return Ok(());
        }
        let zeros = vec![0u8; samples as usize * af.block_align() as usize];
        self.write_audio(&zeros)
    }

    /// Patch sizes and totals, write the index, and close out the file.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        if !self.header_written {
            self.write_header()?;
        }

        let movi_end = self.writer.stream_position()?;
        self.writer.seek(SeekFrom::Start(self.movi_offset + 4))?;
        self.writer
            .write_u32::<LittleEndian>((movi_end - self.movi_offset - 8) as u32)?;
        self.writer.seek(SeekFrom::Start(movi_end))?;

        if !self.index_entries.is_empty() {
            self.writer.write_all(b"idx1")?;
            self.writer
                .write_u32::<LittleEndian>((self.index_entries.len() * 16) as u32)?;
            for entry in &self.index_entries {
                entry.write(&mut self.writer)?;
            }
        }

        let file_end = self.writer.stream_position()?;
        self.writer.seek(SeekFrom::Start(4))?;
        self.writer.write_u32::<LittleEndian>((file_end - 8) as u32)?;

        self.writer
            .seek(SeekFrom::Start(self.avih_total_frames_offset))?;
        self.writer
            .write_u32::<LittleEndian>(self.video_frames as u32)?;

        for &(stream, offset) in &self.strh_length_offsets {
            let length = if stream == VIDEO_STREAM {
                self.video_frames as u32
            } else {
                self.audio_sample_frames_written() as u32
            };
            self.writer.seek(SeekFrom::Start(offset))?;
            self.writer.write_u32::<LittleEndian>(length)?;
        }

        self.writer.seek(SeekFrom::Start(file_end))?;
        self.finalized = true;
        log::debug!("AVI finalized, {} bytes", file_end);
        Ok(())
    }

    /// Whether `finalize` has run.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Consume the writer, returning the underlying sink.
    pub fn into_inner(self) -> W {
        if !self.finalized {
            log::warn!("AVI writer dropped without finalize; file will be unreadable");
        }
        self.writer
    }
}
