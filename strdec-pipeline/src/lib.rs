//! The strdec video decoding pipeline.
//!
//! A frame travels through a chain of typed listeners:
//!
//! ```text
//! Bitstream -+-> File (Bitstream2File)
//!            |
//!            +-> Mdec (Bitstream2Mdec) -+-> File (Mdec2File)
//!                                       |
//!                                       +-> Jpeg (Mdec2Jpeg)
//!                                       |
//!                                       +-> MjpegAvi (Mdec2MjpegAvi)
//!                                       |
//!                                       +-> Decoded (Mdec2Decoded) -+-> ImageFile
//!                                                                   |
//!                                                                   +-> RgbAvi, YuvAvi, JYuvAvi
//! ```
//!
//! Sector-timed audio joins at the AVI stages, where the sync engines keep
//! the two clocks aligned by inserting blank frames and silent samples.

pub mod builder;
pub mod demux;
pub mod driver;
pub mod player;
pub mod progress;
pub mod replace;
pub mod sync;
pub mod vdp;
pub mod xa;

pub use builder::{
    ChromaUpsamplingOption, DecodeQuality, DiscSpeed, SaverPipeline, VideoFormat, VideoSaverConfig,
};
pub use demux::{CrusaderDemuxer, DecodedAudio, DemuxedFrame, SectorAudioDecoder, StrFrameDemuxer};
pub use driver::{DriverStreams, PipelineDriver};
pub use progress::{NullProgress, ProgressLogger};
pub use sync::{AudioSync, AudioVideoSync, VideoSync};
pub use vdp::FrameInfo;
