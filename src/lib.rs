//! Decodes PNG files into plain pixel buffers: chunk framing, zlib/DEFLATE inflation, scanline
//! unfiltering, and bit-depth/palette expansion into the caller's chosen sample width.
//!
//! Never initializes a logger itself; `log::debug!`/`log::warn!` calls assume the binary crate
//! installs one, leaving that choice to the application.

pub mod bitreader;
pub mod chunks;
pub mod crc;
pub mod error;
pub mod filter;
pub mod huffman;
pub mod inflate;
pub mod pool;
pub mod sample;

use std::fs;
use std::path::Path;

pub use chunks::{Ihdr, Palette};
pub use error::{PngError, Result};
pub use sample::Sample;

/// A fully decoded raster: `data.len() == width as usize * height as usize * channels as usize`.
#[derive(Debug, Clone)]
pub struct Image<T> {
    pub data: Vec<T>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
}

/// Reads `path` and decodes it as a PNG.
pub fn load_image<T: Sample>(path: impl AsRef<Path>) -> Result<Image<T>> {
    let bytes = fs::read(path)?;
    decode(&bytes)
}

/// Decodes a complete PNG byte buffer already in memory.
pub fn decode<T: Sample>(bytes: &[u8]) -> Result<Image<T>> {
    let parsed = chunks::parse(bytes)?;
    let header = parsed
        .header
        .ok_or_else(|| PngError::BadChunkOrder("file is missing an IHDR chunk".into()))?;
    log::debug!(
        "parsed chunks: {}x{} color_type={} bit_depth={} interlace={}",
        header.width,
        header.height,
        header.color_type,
        header.bit_depth,
        header.interlace_method
    );

    let compressed = parsed.idat.unwrap_or_default();
    let mut decompressed = inflate::inflate(&compressed)?;
    log::debug!(
        "inflated {} bytes of IDAT into {} raw bytes",
        compressed.len(),
        decompressed.len()
    );

    let output_channels = header.output_channels();
    let data = filter::unfilter::<T>(&mut decompressed, &header, parsed.palette.as_ref())?;
    log::debug!("unfiltered into {} samples", data.len());

    let expected = header.width as usize * header.height as usize * output_channels as usize;
    if data.len() != expected {
        return Err(PngError::InternalInvariant(format!(
            "decoded {} samples, expected {expected}",
            data.len()
        )));
    }

    Ok(Image {
        data,
        width: header.width,
        height: header.height,
        channels: output_channels,
    })
}
