//! End-to-end pipeline tests over synthetic disc images.

use std::cell::RefCell;

use strdec_codecs::bitstreams::{BitstreamCompressor, BitstreamFormat, BitstreamUncompressor};
use strdec_codecs::mdec::encoder::MdecEncoder;
use strdec_codecs::mdec::{CodeSliceSource, MdecCodeSource, MdecDecoder, MdecDecoderInt};
use strdec_core::frame::RgbImage;
use strdec_core::mdec::MdecCode;
use strdec_core::rational::Rational;
use strdec_core::sector::{
    CrusaderAvSector, IdentifiedSector, MemorySectorReader, Sector, StrVideoSector,
};
use strdec_pipeline::builder::{self, VideoFormat, VideoSaverConfig, VideoStreamInfo};
use strdec_pipeline::demux::CrusaderDemuxer;
use strdec_pipeline::driver::{DriverStreams, PipelineDriver};
use strdec_pipeline::progress::NullProgress;
use strdec_pipeline::StrFrameDemuxer;

fn gradient_image(width: usize, height: usize, shade: u32) -> RgbImage {
    let mut img = RgbImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let r = (x * 255 / width) as u32;
            let g = (y * 255 / height) as u32;
            img.set_pixel(x, y, (r << 16) | (g << 8) | (shade & 0xFF));
        }
    }
    img
}

fn compress_frame(img: &RgbImage, format: BitstreamFormat) -> Vec<u8> {
    let encoder = MdecEncoder::from_rgb(img);
    let codes = encoder.stream(2).unwrap();
    BitstreamCompressor::new(format)
        .compress(&mut CodeSliceSource::new(&codes), img.width(), img.height())
        .unwrap()
}

/// A synthetic STR stream: each frame's payload split over two sectors.
struct SynthMovie {
    payloads: Vec<Vec<u8>>,
}

impl SynthMovie {
    fn new(frames: usize) -> Self {
        let payloads = (0..frames)
            .map(|i| {
                compress_frame(&gradient_image(32, 16, 0x20 + 0x30 * i as u32), BitstreamFormat::StrV2)
            })
            .collect();
        Self { payloads }
    }

    fn sector_count(&self) -> u32 {
        self.payloads.len() as u32 * 2
    }

    fn identify(&self, sector: &Sector) -> IdentifiedSector {
        let frame = sector.number / 2;
        let chunk = sector.number % 2;
        let payload = &self.payloads[frame as usize];
        let half = payload.len().div_ceil(2);
        let slice = if chunk == 0 {
            &payload[..half]
        } else {
            &payload[half..]
        };
        IdentifiedSector::StrVideo(StrVideoSector {
            sector_number: sector.number,
            channel: 0,
            frame_number: frame,
            chunk_number: chunk as u16,
            chunks_in_frame: 2,
            width: 32,
            height: 16,
            frame_demux_size: payload.len() as u32,
            payload: slice.to_vec(),
        })
    }
}

#[test]
fn test_strv3_minimum_frame_literal_bytes() {
    // A 16x16 STRv3 frame, qscale 1, every DC zero, no AC coefficients:
    // 8-byte header, then per block the chroma/luma zero DC code and an
    // end-of-block, then the 11-bit trailer, padded into LE words.
    let expected: Vec<u8> = vec![
        0x06, 0x00, // half the 12 codes
        0x00, 0x38, // magic
        0x01, 0x00, // qscale 1
        0x03, 0x00, // version 3
        0x94, 0x22, 0x2F, 0xA5, 0x00, 0xFC,
    ];

    let mut codes = Vec::new();
    for _ in 0..6 {
        codes.push(MdecCode::header(1, 0));
        codes.push(MdecCode::END_OF_BLOCK);
    }
    let payload = BitstreamCompressor::new(BitstreamFormat::StrV3)
        .compress(&mut CodeSliceSource::new(&codes), 16, 16)
        .unwrap();
    assert_eq!(payload, expected);

    // uncompressing yields 6 headers and 6 end-of-blocks
    let mut unc = BitstreamUncompressor::identify(&payload).unwrap();
    assert_eq!(unc.format(), BitstreamFormat::StrV3);
    let mut decoded = Vec::new();
    for _ in 0..12 {
        decoded.push(unc.read_code().unwrap());
    }
    assert_eq!(decoded, codes);
    unc.skip_padding_bits();

    // and the frame decodes to uniform mid-gray
    let mut decoder = MdecDecoderInt::new(16, 16);
    let mut unc = BitstreamUncompressor::identify(&payload).unwrap();
    decoder.decode(&mut unc).unwrap();
    let mut out = vec![0u32; 16 * 16];
    decoder.read_decoded_rgb(16, 16, &mut out).unwrap();
    assert!(out.iter().all(|&p| p == 0x808080));
}

#[test]
fn test_save_rgb_avi_end_to_end() {
    let movie = SynthMovie::new(3);
    let dir = tempfile::tempdir().unwrap();
    let config = VideoSaverConfig {
        video_format: VideoFormat::AviRgb,
        output: dir.path().join("movie.avi"),
        ..Default::default()
    };
    let video = VideoStreamInfo {
        width: 32,
        height: 16,
        start_sector: 0,
        fps_num: 15,
        fps_den: 1,
        audio: None,
    };
    let pipeline = RefCell::new(builder::build(&config, &video).unwrap());

    let mut reader =
        MemorySectorReader::new(vec![vec![0u8; 16]; movie.sector_count() as usize]);
    let mut demuxer = StrFrameDemuxer::new();
    let mut progress = NullProgress::new();
    let driver = PipelineDriver::new(0, movie.sector_count() - 1);
    driver
        .run(
            &mut reader,
            &mut |s| movie.identify(s),
            &mut DriverStreams::Separate {
                demuxer: &mut demuxer,
                audio: None,
            },
            &mut |f| pipeline.borrow_mut().feed_frame(&f),
            &mut |a| pipeline.borrow_mut().feed_audio(&a),
            &mut progress,
        )
        .unwrap();
    pipeline.borrow_mut().close().unwrap();

    let bytes = std::fs::read(dir.path().join("movie.avi")).unwrap();
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"AVI ");
    // three frames, each 32x16 DIB
    assert!(bytes.len() > 3 * 32 * 16 * 3);
}

#[test]
fn test_save_avi_with_xa_audio_end_to_end() {
    use strdec_core::sector::XaAudioSector;
    use strdec_pipeline::builder::AudioStreamInfo;
    use strdec_pipeline::xa::{XaAudioDecoder, XaAudioStream};

    // sectors 0,1 and 3,4 carry the two video frames; 2 and 5 are XA audio
    let movie = SynthMovie::new(2);
    let video_sector_for = |number: u32| -> u32 {
        match number {
            0 | 1 => number,
            3 | 4 => number - 1,
            _ => unreachable!(),
        }
    };

    let dir = tempfile::tempdir().unwrap();
    let config = VideoSaverConfig {
        video_format: VideoFormat::AviRgb,
        output: dir.path().join("muxed.avi"),
        ..Default::default()
    };
    let video = VideoStreamInfo {
        width: 32,
        height: 16,
        start_sector: 0,
        fps_num: 15,
        fps_den: 1,
        audio: Some(AudioStreamInfo {
            start_sector: 2,
            samples_per_second: 37800,
            channels: 1,
        }),
    };
    let pipeline = RefCell::new(builder::build(&config, &video).unwrap());

    let stream = XaAudioStream {
        channel: 0,
        samples_per_second: 37800,
        bits_per_sample: 4,
        stereo: false,
    };
    let mut xa = XaAudioDecoder::new(stream);
    let mut reader = MemorySectorReader::new(vec![vec![0u8; 16]; 6]);
    let mut demuxer = StrFrameDemuxer::new();
    let mut progress = NullProgress::new();
    PipelineDriver::new(0, 5)
        .run(
            &mut reader,
            &mut |s| {
                if s.number == 2 || s.number == 5 {
                    IdentifiedSector::XaAudio(XaAudioSector {
                        sector_number: s.number,
                        channel: 0,
                        samples_per_second: 37800,
                        bits_per_sample: 4,
                        stereo: false,
                        payload: vec![0u8; 128],
                    })
                } else {
                    let mut v = match movie.identify(&Sector {
                        number: video_sector_for(s.number),
                        data: Vec::new(),
                    }) {
                        IdentifiedSector::StrVideo(v) => v,
                        _ => unreachable!(),
                    };
                    v.sector_number = s.number;
                    IdentifiedSector::StrVideo(v)
                }
            },
            &mut DriverStreams::Separate {
                demuxer: &mut demuxer,
                audio: Some(&mut xa),
            },
            &mut |f| pipeline.borrow_mut().feed_frame(&f),
            &mut |a| pipeline.borrow_mut().feed_audio(&a),
            &mut progress,
        )
        .unwrap();
    pipeline.borrow_mut().close().unwrap();

    let bytes = std::fs::read(dir.path().join("muxed.avi")).unwrap();
    assert_eq!(&bytes[0..4], b"RIFF");
    // both an audio stream header and audio data chunks are present
    assert!(bytes.windows(4).any(|w| w == b"auds"));
    assert!(bytes.windows(4).any(|w| w == b"01wb"));
}

#[test]
fn test_save_png_sequence_end_to_end() {
    let movie = SynthMovie::new(2);
    let dir = tempfile::tempdir().unwrap();
    let config = VideoSaverConfig {
        video_format: VideoFormat::ImgSeqPng,
        output: dir.path().to_path_buf(),
        ..Default::default()
    };
    let video = VideoStreamInfo {
        width: 32,
        height: 16,
        start_sector: 0,
        fps_num: 15,
        fps_den: 1,
        audio: None,
    };
    let pipeline = RefCell::new(builder::build(&config, &video).unwrap());

    let mut reader =
        MemorySectorReader::new(vec![vec![0u8; 16]; movie.sector_count() as usize]);
    let mut demuxer = StrFrameDemuxer::new();
    let mut progress = NullProgress::new();
    PipelineDriver::new(0, movie.sector_count() - 1)
        .run(
            &mut reader,
            &mut |s| movie.identify(s),
            &mut DriverStreams::Separate {
                demuxer: &mut demuxer,
                audio: None,
            },
            &mut |f| pipeline.borrow_mut().feed_frame(&f),
            &mut |a| pipeline.borrow_mut().feed_audio(&a),
            &mut progress,
        )
        .unwrap();
    pipeline.borrow_mut().close().unwrap();

    for frame in 0..2 {
        let path = dir.path().join(format!("frame[{frame:04}].png"));
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG", "{}", path.display());
    }
}

#[test]
fn test_frame_range_filters_output() {
    let movie = SynthMovie::new(3);
    let dir = tempfile::tempdir().unwrap();
    let config = VideoSaverConfig {
        video_format: VideoFormat::ImgSeqBmp,
        output: dir.path().to_path_buf(),
        frame_range: Some((1, 1)),
        ..Default::default()
    };
    let video = VideoStreamInfo {
        width: 32,
        height: 16,
        start_sector: 0,
        fps_num: 15,
        fps_den: 1,
        audio: None,
    };
    let pipeline = RefCell::new(builder::build(&config, &video).unwrap());

    let mut reader =
        MemorySectorReader::new(vec![vec![0u8; 16]; movie.sector_count() as usize]);
    let mut demuxer = StrFrameDemuxer::new();
    let mut progress = NullProgress::new();
    PipelineDriver::new(0, movie.sector_count() - 1)
        .run(
            &mut reader,
            &mut |s| movie.identify(s),
            &mut DriverStreams::Separate {
                demuxer: &mut demuxer,
                audio: None,
            },
            &mut |f| pipeline.borrow_mut().feed_frame(&f),
            &mut |a| pipeline.borrow_mut().feed_audio(&a),
            &mut progress,
        )
        .unwrap();
    pipeline.borrow_mut().close().unwrap();

    assert!(!dir.path().join("frame[0000].bmp").exists());
    assert!(dir.path().join("frame[0001].bmp").exists());
    assert!(!dir.path().join("frame[0002].bmp").exists());
}

#[test]
fn test_crusader_combined_stream() {
    // one Crusader frame split over two sectors plus one audio packet
    let img = gradient_image(32, 16, 0x55);
    let payload = compress_frame(&img, BitstreamFormat::Crusader);
    let half = payload.len() / 2;

    let mut start = Vec::new();
    start.extend_from_slice(&0u16.to_le_bytes()); // video start
    start.extend_from_slice(&2u16.to_le_bytes());
    start.extend_from_slice(&32u16.to_le_bytes());
    start.extend_from_slice(&16u16.to_le_bytes());
    start.extend_from_slice(&0u32.to_le_bytes());
    start.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    start.extend_from_slice(&payload[..half]);

    let mut cont = Vec::new();
    cont.extend_from_slice(&1u16.to_le_bytes()); // continuation
    cont.extend_from_slice(&1u16.to_le_bytes());
    cont.extend_from_slice(&payload[half..]);

    let mut audio = Vec::new();
    audio.extend_from_slice(&2u16.to_le_bytes()); // audio packet
    audio.extend_from_slice(&2u16.to_le_bytes());
    audio.extend_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);

    let sectors = vec![start, cont, audio];
    let mut reader = MemorySectorReader::new(sectors.clone());
    let mut demuxer = CrusaderDemuxer::new();
    let mut progress = NullProgress::new();

    let frames = RefCell::new(Vec::new());
    let pcm = RefCell::new(Vec::new());
    PipelineDriver::new(0, 2)
        .run(
            &mut reader,
            &mut |s| {
                IdentifiedSector::CrusaderAv(CrusaderAvSector {
                    sector_number: s.number,
                    payload: s.data.clone(),
                })
            },
            &mut DriverStreams::Combined {
                demuxer: &mut demuxer,
            },
            &mut |f| {
                frames.borrow_mut().push(f);
                Ok(())
            },
            &mut |a| {
                pcm.borrow_mut().push(a);
                Ok(())
            },
            &mut progress,
        )
        .unwrap();

    let frames = frames.into_inner();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload, payload);
    assert_eq!(frames[0].presentation_sector, 1 + 15);

    // the frame payload decodes as Crusader video
    let mut unc = BitstreamUncompressor::identify(&frames[0].payload).unwrap();
    assert_eq!(unc.format(), BitstreamFormat::Crusader);
    let mut decoder = MdecDecoderInt::new(32, 16);
    decoder.decode(&mut unc).unwrap();

    let pcm = pcm.into_inner();
    assert_eq!(pcm.len(), 1);
    // big-endian input pairs arrive byte-swapped
    assert_eq!(pcm[0].data, vec![0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07]);
}

#[test]
fn test_audio_video_sync_against_cumulative_clocks() {
    // spec scenario: audio from sector 0, video from sector 75, 150
    // sectors/s at 15 fps. The first seven AVI frames must be blanks.
    use std::io::Cursor;
    use strdec_avi::AudioFormat;
    use strdec_pipeline::sync::AudioVideoSync;
    use strdec_pipeline::vdp::{Decoded2RgbAvi, DecodedListener, FrameInfo, SectorTimedAudioWriter};

    let av = AudioVideoSync::new(75, 0, 150, 15, 1, 37800, false);
    assert_eq!(av.video().initial_video(), 7);

    let mut stage = Decoded2RgbAvi::new(
        Cursor::new(Vec::new()),
        16,
        16,
        av.video().clone(),
        Some(av),
        Some(AudioFormat {
            channels: 2,
            sample_rate: 37800,
            bits_per_sample: 16,
        }),
    );

    // audio arrives first, at its own start
    stage
        .write_timed_audio(&[0u8; 4 * 100], Rational::from_int(0))
        .unwrap();

    // then the first real frame, presented at its stream start
    let mut decoder = MdecDecoderInt::new(16, 16);
    let mut codes = Vec::new();
    for _ in 0..strdec_core::mdec::blocks(16, 16) {
        codes.push(MdecCode::header(1, 0));
        codes.push(MdecCode::END_OF_BLOCK);
    }
    decoder.decode(&mut CodeSliceSource::new(&codes)).unwrap();
    stage
        .decoded(
            &decoder,
            &FrameInfo {
                frame_number: 0,
                presentation_end_sector: 75,
            },
        )
        .unwrap();

    // seven blanks preceded the real frame
    assert_eq!(stage.video_frames_written(), 8);
    stage.close().unwrap();
}
