// Allow common patterns in multimedia/DSP code
#![allow(clippy::needless_range_loop)]
#![allow(clippy::too_many_arguments)]

//! PSX video codecs for the strdec library.
//!
//! Two symmetric layers:
//!
//! - **Bitstream codecs** translate between a raw compressed frame payload
//!   and a stream of 16-bit MDEC codes. One codec per format (STRv2, STRv3,
//!   Iki, Lain, Crusader); the differences are confined to the frame header,
//!   the DC coefficient coding, the AC escape width, and the trailer.
//! - **The MDEC layer** turns code streams into pixels (inverse quantization,
//!   inverse zig-zag, IDCT, macroblock assembly) and back (forward DCT,
//!   quantization, run-length coding with a compressed-size budget).
//!
//! A third module translates MDEC code streams directly into baseline JFIF
//! images without a full decode.

pub mod bitstreams;
pub mod mdec;
pub mod tojpeg;

pub use bitstreams::{BitstreamCompressor, BitstreamFormat, BitstreamUncompressor};
pub use mdec::{
    Ac0Cleaner, ChromaUpsampling, ColorMatrix, MdecCodeSource, MdecDecoder, MdecDecoderDouble,
    MdecDecoderInt,
};
pub use mdec::encoder::{MdecEncoder, ParsedMdecImage};
pub use tojpeg::JpegTranslator;
