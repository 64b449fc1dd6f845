//! Tile compression codecs.
//!
//! Every tile of a tiled channel is stored through exactly one codec,
//! selected by the compression tag in the segment header:
//!
//! - [`RawCodec`]: bytes stored as-is (`"NONE"`)
//! - [`RleCodec`]: `(run_length - 1, value)` byte pairs (`"RLE"`)
//! - [`JpegCodec`]: one baseline JPEG image per tile (`"JPEG75"`, lossy)
//!
//! Codecs operate on one block buffer at a time and never see the tile
//! directory or the backing store.

mod jpeg;
mod raw;
mod rle;

use std::fmt;

use crate::error::ChannelError;

pub use jpeg::{JpegCodec, DEFAULT_JPEG_QUALITY, EOI, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY, SOI};
pub use raw::RawCodec;
pub use rle::RleCodec;

/// Length of the compression tag field in a segment header.
pub const COMPRESSION_TAG_LEN: usize = 8;

// =============================================================================
// Block Shape
// =============================================================================

/// Dimensions of the block a codec works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockShape {
    /// Block width in pixels
    pub width: u32,

    /// Block height in pixels
    pub height: u32,

    /// Bytes per pixel
    pub pixel_size: usize,
}

impl BlockShape {
    /// Create a block shape.
    pub fn new(width: u32, height: u32, pixel_size: usize) -> Self {
        Self {
            width,
            height,
            pixel_size,
        }
    }

    /// Size of the uncompressed block in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_size
    }
}

// =============================================================================
// Codec Trait
// =============================================================================

/// A compress/decompress strategy for one block at a time.
pub trait TileCodec: Send + Sync {
    /// Compress an uncompressed block of `shape.byte_len()` bytes.
    fn compress(&self, block: &[u8], shape: &BlockShape) -> Result<Vec<u8>, ChannelError>;

    /// Decompress the stored bytes of `tile` into `out`.
    ///
    /// `out` is exactly `shape.byte_len()` bytes long. Any failure to
    /// reconstruct the full block is a `CorruptTile` error.
    fn decompress(
        &self,
        tile: u64,
        data: &[u8],
        out: &mut [u8],
        shape: &BlockShape,
    ) -> Result<(), ChannelError>;
}

// =============================================================================
// Compression Tag
// =============================================================================

/// Compression scheme of a tiled channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Uncompressed tiles
    None,
    /// Byte-oriented run-length encoding
    Rle,
    /// Baseline JPEG at the given quality
    Jpeg { quality: u8 },
}

impl Compression {
    /// Parse a header compression tag.
    ///
    /// Accepts `NONE`, `RLE`, `JPEG` and `JPEG<quality>` (for example
    /// `JPEG75`), ignoring case and surrounding padding.
    pub fn from_tag(tag: &str) -> Result<Self, ChannelError> {
        let normalized = tag.trim_matches(|c: char| c == ' ' || c == '\0');
        let upper = normalized.to_ascii_uppercase();

        match upper.as_str() {
            "NONE" => return Ok(Compression::None),
            "RLE" => return Ok(Compression::Rle),
            "JPEG" => {
                return Ok(Compression::Jpeg {
                    quality: DEFAULT_JPEG_QUALITY,
                })
            }
            _ => {}
        }

        if let Some(quality) = upper.strip_prefix("JPEG") {
            let quality: u8 = quality
                .trim()
                .parse()
                .map_err(|_| ChannelError::UnsupportedCompression(normalized.to_string()))?;
            if !(MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality) {
                return Err(ChannelError::UnsupportedCompression(normalized.to_string()));
            }
            return Ok(Compression::Jpeg { quality });
        }

        Err(ChannelError::UnsupportedCompression(normalized.to_string()))
    }

    /// Canonical header tag for this scheme.
    pub fn tag(&self) -> String {
        match self {
            Compression::None => "NONE".to_string(),
            Compression::Rle => "RLE".to_string(),
            Compression::Jpeg { quality } => format!("JPEG{quality}"),
        }
    }

    /// Whether decoding reproduces the written block exactly.
    pub fn is_lossless(&self) -> bool {
        !matches!(self, Compression::Jpeg { .. })
    }

    /// Instantiate the codec implementing this scheme.
    pub fn codec(&self) -> Box<dyn TileCodec> {
        match *self {
            Compression::None => Box::new(RawCodec),
            Compression::Rle => Box::new(RleCodec),
            Compression::Jpeg { quality } => Box::new(JpegCodec::new(quality)),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}
