//! AVI 1.0 writer for the strdec pipeline.
//!
//! Supports three video stream layouts — uncompressed bottom-up DIB
//! (BI_RGB), planar YV12, and MJPG — plus an optional PCM audio stream.
//! Beyond plain frame writing, the A/V sync engine needs three operations:
//! blank frames, repeats of the previous frame (index-only, no new chunk
//! data), and runs of silent audio samples.

mod chunks;
mod error;
mod muxer;
mod types;

pub use chunks::{FourCC, IndexEntry, RiffChunk};
pub use error::{AviError, Result};
pub use muxer::AviWriter;
pub use types::{AudioFormat, VideoLayout};
