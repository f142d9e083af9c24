//! Still-image writers for the strdec frame-sequence savers.
//!
//! PNG and BMP only; JPEG stills come from the MDEC-to-JFIF translator
//! upstream, which never rasterizes the frame.

mod bmp;
mod error;
mod image;
mod png;

pub use bmp::BmpEncoder;
pub use error::{ImageError, Result};
pub use image::Image;
pub use png::PngEncoder;
