//! # strdec Core
//!
//! Core types and utilities for the strdec PlayStation 1 media decoder.
//!
//! This crate provides the fundamental building blocks used across all strdec
//! components:
//! - Error handling types
//! - Bit-level reading/writing with the STR 16-bit word-swap mode
//! - The MDEC 16-bit code model and block geometry helpers
//! - Decoded-frame raster types (packed RGB and planar YCbCr)
//! - Rational arithmetic for frame rates and presentation sectors
//! - Reusable-object pools for the live player
//! - The CD sector model consumed from the sector reader

pub mod error;
pub mod bitstream;
pub mod mdec;
pub mod frame;
pub mod rational;
pub mod pool;
pub mod sector;

pub use error::{BitstreamError, CodecError, Error, Result};
pub use bitstream::{BitReader, BitWriter};
pub use mdec::{MdecCode, ZIGZAG, PSX_QUANT_TABLE};
pub use frame::{RgbImage, YCbCrImage};
pub use rational::Rational;
pub use pool::{ObjectPool, SharedObjectPool};
pub use sector::{IdentifiedSector, Sector, SectorReader};
