//! JPEG tile codec.
//!
//! Each tile is stored as one self-contained baseline JPEG stream whose
//! dimensions equal the block size. Only 8-bit single-band blocks can be
//! JPEG compressed.
//!
//! # Design Decisions
//!
//! - **Lossy**: a written block is not reproduced exactly on read. Callers
//!   needing exact round trips use `NONE` or `RLE`.
//!
//! - **No abbreviated streams**: tables are embedded in every tile, so a
//!   tile decodes without any segment-level state.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, ImageFormat, ImageReader};

use super::{BlockShape, TileCodec};
use crate::error::ChannelError;

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 75;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

/// Start Of Image marker
pub const SOI: [u8; 2] = [0xFF, 0xD8];

/// End Of Image marker
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// JPEG codec for 8-bit blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegCodec {
    quality: u8,
}

impl JpegCodec {
    /// Create a codec encoding at `quality`, clamped to 1-100.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY),
        }
    }

    /// Encoding quality.
    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Get image dimensions without fully decoding.
    pub fn dimensions(&self, data: &[u8]) -> Result<(u32, u32), image::ImageError> {
        ImageReader::with_format(Cursor::new(data), ImageFormat::Jpeg).into_dimensions()
    }
}

impl Default for JpegCodec {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl TileCodec for JpegCodec {
    fn compress(&self, block: &[u8], shape: &BlockShape) -> Result<Vec<u8>, ChannelError> {
        if shape.pixel_size != 1 {
            return Err(ChannelError::UnsupportedCompression(format!(
                "JPEG requires 8-bit pixels, got {} bytes per pixel",
                shape.pixel_size
            )));
        }

        let img = GrayImage::from_raw(shape.width, shape.height, block.to_vec()).ok_or_else(
            || {
                ChannelError::InvalidArgument(format!(
                    "block of {} bytes does not fill {}x{} pixels",
                    block.len(),
                    shape.width,
                    shape.height
                ))
            },
        )?;

        let mut output = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut output, self.quality);
        encoder
            .encode_image(&img)
            .map_err(|e| ChannelError::InvalidArgument(format!("JPEG encoding failed: {e}")))?;

        Ok(output)
    }

    fn decompress(
        &self,
        tile: u64,
        data: &[u8],
        out: &mut [u8],
        shape: &BlockShape,
    ) -> Result<(), ChannelError> {
        let corrupt = |reason: String| ChannelError::CorruptTile { tile, reason };

        if data.len() < 4 || data[0..2] != SOI {
            return Err(corrupt("tile does not start with a JPEG SOI marker".to_string()));
        }

        let img = ImageReader::with_format(Cursor::new(data), ImageFormat::Jpeg)
            .decode()
            .map_err(|e| corrupt(format!("JPEG decode failed: {e}")))?
            .to_luma8();

        if img.width() != shape.width || img.height() != shape.height {
            return Err(corrupt(format!(
                "JPEG is {}x{}, block is {}x{}",
                img.width(),
                img.height(),
                shape.width,
                shape.height
            )));
        }

        let pixels = img.as_raw();
        if pixels.len() != out.len() {
            return Err(corrupt(format!(
                "decoded {} bytes, block holds {}",
                pixels.len(),
                out.len()
            )));
        }
        out.copy_from_slice(pixels);
        Ok(())
    }
}
