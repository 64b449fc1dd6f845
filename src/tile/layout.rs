//! On-disk layout of a tiled segment.
//!
//! # Header (128 bytes)
//!
//! ```text
//! Bytes  0-7:   Magic "CHANTILE"
//! Bytes  8-9:   Layout version (1)
//! Bytes 10-11:  Byte order ("II" = little-endian, "MM" = big-endian)
//! Bytes 12-15:  Image width
//! Bytes 16-19:  Image height
//! Bytes 20-23:  Block width
//! Bytes 24-27:  Block height
//! Bytes 28-35:  Pixel type tag, ASCII, space padded
//! Bytes 36-43:  Compression tag, ASCII, space padded
//! Bytes 44-47:  Tile count
//! Bytes 48-55:  End of the data region
//! Bytes 56-127: Reserved (zero)
//! ```
//!
//! The tile directory follows the header: `tile_count` entries of
//! `(offset: u64, size: i32)`, grouped in pages of [`PAGE_SIZE`] entries.
//! Tile data starts right after the directory. An entry offset of 0 marks
//! a tile that was never written.

use crate::channel::PixelType;
use crate::codec::{Compression, COMPRESSION_TAG_LEN};
use crate::error::{ChannelError, LayoutError};
use crate::io::{ByteOrder, ByteStore};

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes at the start of every tiled segment
pub const SEGMENT_MAGIC: [u8; 8] = *b"CHANTILE";

/// Current layout version
pub const LAYOUT_VERSION: u16 = 1;

/// Size of the segment header in bytes
pub const HEADER_SIZE: usize = 128;

/// Size of one directory entry in bytes (u64 offset + i32 size)
pub const ENTRY_SIZE: usize = 12;

/// Number of directory entries per page
pub const PAGE_SIZE: usize = 4096;

/// Length of the pixel type tag field
const PIXEL_TAG_LEN: usize = 8;

// =============================================================================
// Segment Parameters
// =============================================================================

/// Parameters for creating a new tiled segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentParams {
    pub width: u32,
    pub height: u32,
    pub block_width: u32,
    pub block_height: u32,
    pub pixel_type: PixelType,
    pub compression: Compression,
    pub byte_order: ByteOrder,
}

impl SegmentParams {
    /// Parameters for an uncompressed big-endian segment.
    pub fn new(width: u32, height: u32, block_width: u32, block_height: u32) -> Self {
        Self {
            width,
            height,
            block_width,
            block_height,
            pixel_type: PixelType::U8,
            compression: Compression::None,
            byte_order: ByteOrder::BigEndian,
        }
    }

    /// Set the pixel type.
    pub fn with_pixel_type(mut self, pixel_type: PixelType) -> Self {
        self.pixel_type = pixel_type;
        self
    }

    /// Set the compression scheme.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the byte order of stored values.
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }
}

// =============================================================================
// Segment Header
// =============================================================================

/// Parsed header of a tiled segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentHeader {
    /// Byte order of every multi-byte value in the segment
    pub byte_order: ByteOrder,

    /// Image width in pixels
    pub width: u32,

    /// Image height in pixels
    pub height: u32,

    /// Block width in pixels
    pub block_width: u32,

    /// Block height in pixels
    pub block_height: u32,

    /// Pixel data type
    pub pixel_type: PixelType,

    /// Raw compression tag, parsed when the channel establishes access
    pub compression_tag: String,

    /// Number of directory entries
    pub tile_count: u32,

    /// End of the data region (first free byte for appended tiles)
    pub data_end: u64,
}

impl SegmentHeader {
    /// Build the header of a freshly created segment.
    pub fn from_params(params: &SegmentParams) -> Result<Self, LayoutError> {
        for (field, value) in [
            ("width", params.width),
            ("height", params.height),
            ("block_width", params.block_width),
            ("block_height", params.block_height),
        ] {
            if value == 0 {
                return Err(LayoutError::InvalidField {
                    field,
                    message: "must be positive".to_string(),
                });
            }
        }

        let tiles_x = params.width.div_ceil(params.block_width) as u64;
        let tiles_y = params.height.div_ceil(params.block_height) as u64;
        let tile_count =
            u32::try_from(tiles_x * tiles_y).map_err(|_| LayoutError::InvalidField {
                field: "tile_count",
                message: format!("{} tiles exceed the format limit", tiles_x * tiles_y),
            })?;

        let mut header = SegmentHeader {
            byte_order: params.byte_order,
            width: params.width,
            height: params.height,
            block_width: params.block_width,
            block_height: params.block_height,
            pixel_type: params.pixel_type,
            compression_tag: params.compression.tag(),
            tile_count,
            data_end: 0,
        };
        header.data_end = header.data_start();
        Ok(header)
    }

    /// Parse a header from the first [`HEADER_SIZE`] bytes of a segment.
    ///
    /// # Errors
    /// - `SegmentTooSmall` if fewer than `HEADER_SIZE` bytes are available
    /// - `InvalidMagic`, `UnsupportedVersion`, `InvalidByteOrder` for a foreign header
    /// - `InvalidField` if the geometry or data region is inconsistent
    pub fn parse(bytes: &[u8], segment_size: u64) -> Result<Self, LayoutError> {
        if bytes.len() < HEADER_SIZE {
            return Err(LayoutError::SegmentTooSmall {
                required: HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);
        if magic != SEGMENT_MAGIC {
            return Err(LayoutError::InvalidMagic(magic));
        }

        // Checked as raw bytes since the order is not known yet
        let byte_order = match [bytes[10], bytes[11]] {
            [b'I', b'I'] => ByteOrder::LittleEndian,
            [b'M', b'M'] => ByteOrder::BigEndian,
            other => return Err(LayoutError::InvalidByteOrder(u16::from_be_bytes(other))),
        };

        let version = byte_order.read_u16(&bytes[8..10]);
        if version != LAYOUT_VERSION {
            return Err(LayoutError::UnsupportedVersion(version));
        }

        let pixel_type = read_tag(&bytes[28..28 + PIXEL_TAG_LEN]).parse::<PixelType>()?;
        let compression_tag = read_tag(&bytes[36..36 + COMPRESSION_TAG_LEN]);

        let header = SegmentHeader {
            byte_order,
            width: byte_order.read_u32(&bytes[12..16]),
            height: byte_order.read_u32(&bytes[16..20]),
            block_width: byte_order.read_u32(&bytes[20..24]),
            block_height: byte_order.read_u32(&bytes[24..28]),
            pixel_type,
            compression_tag,
            tile_count: byte_order.read_u32(&bytes[44..48]),
            data_end: byte_order.read_u64(&bytes[48..56]),
        };

        header.validate(segment_size)?;
        Ok(header)
    }

    fn validate(&self, segment_size: u64) -> Result<(), LayoutError> {
        if self.width == 0 || self.height == 0 {
            return Err(LayoutError::InvalidField {
                field: "width/height",
                message: format!("{}x{} image", self.width, self.height),
            });
        }
        if self.block_width == 0 || self.block_height == 0 {
            return Err(LayoutError::InvalidField {
                field: "block_width/block_height",
                message: format!("{}x{} block", self.block_width, self.block_height),
            });
        }

        let expected = self.tiles_per_row() as u64 * self.tiles_per_col() as u64;
        if self.tile_count as u64 != expected {
            return Err(LayoutError::InvalidField {
                field: "tile_count",
                message: format!("header says {}, geometry implies {}", self.tile_count, expected),
            });
        }

        if self.data_end < self.data_start() || self.data_end > segment_size {
            return Err(LayoutError::InvalidField {
                field: "data_end",
                message: format!(
                    "{} outside data region [{}, {}]",
                    self.data_end,
                    self.data_start(),
                    segment_size
                ),
            });
        }

        Ok(())
    }

    /// Serialize the header.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let order = self.byte_order;
        let mut out = [0u8; HEADER_SIZE];

        out[0..8].copy_from_slice(&SEGMENT_MAGIC);
        order.write_u16(&mut out[8..10], LAYOUT_VERSION);
        out[10..12].copy_from_slice(&order.marker());
        order.write_u32(&mut out[12..16], self.width);
        order.write_u32(&mut out[16..20], self.height);
        order.write_u32(&mut out[20..24], self.block_width);
        order.write_u32(&mut out[24..28], self.block_height);
        write_tag(&mut out[28..28 + PIXEL_TAG_LEN], self.pixel_type.tag());
        write_tag(&mut out[36..36 + COMPRESSION_TAG_LEN], &self.compression_tag);
        order.write_u32(&mut out[44..48], self.tile_count);
        order.write_u64(&mut out[48..56], self.data_end);

        out
    }

    /// Number of tiles across.
    #[inline]
    pub fn tiles_per_row(&self) -> u32 {
        self.width.div_ceil(self.block_width)
    }

    /// Number of tiles down.
    #[inline]
    pub fn tiles_per_col(&self) -> u32 {
        self.height.div_ceil(self.block_height)
    }

    /// Offset of the first directory entry.
    #[inline]
    pub const fn directory_offset(&self) -> u64 {
        HEADER_SIZE as u64
    }

    /// Offset of the first byte of the data region.
    #[inline]
    pub fn data_start(&self) -> u64 {
        HEADER_SIZE as u64 + self.tile_count as u64 * ENTRY_SIZE as u64
    }
}

/// Read a space/NUL padded ASCII tag.
fn read_tag(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(|c: char| c == ' ' || c == '\0')
        .to_string()
}

/// Write an ASCII tag, space padded (truncated if too long).
fn write_tag(out: &mut [u8], tag: &str) {
    out.fill(b' ');
    let len = tag.len().min(out.len());
    out[..len].copy_from_slice(&tag.as_bytes()[..len]);
}

// =============================================================================
// Segment Creation
// =============================================================================

/// Initialize an empty tiled segment in `store`.
///
/// Writes the header and a zeroed directory (every tile unwritten). The
/// store should be empty; any existing content is overwritten.
pub fn create_segment(
    store: &dyn ByteStore,
    params: &SegmentParams,
) -> Result<SegmentHeader, ChannelError> {
    if matches!(params.compression, Compression::Jpeg { .. }) && params.pixel_type != PixelType::U8
    {
        return Err(ChannelError::UnsupportedCompression(format!(
            "{} is only supported for 8U channels, not {}",
            params.compression, params.pixel_type
        )));
    }

    let header = SegmentHeader::from_params(params)?;
    store.write_all_at(0, &header.to_bytes())?;

    let zero_page = vec![0u8; PAGE_SIZE * ENTRY_SIZE];
    let mut offset = header.directory_offset();
    let mut remaining = header.tile_count as usize * ENTRY_SIZE;
    while remaining > 0 {
        let chunk = remaining.min(zero_page.len());
        store.write_all_at(offset, &zero_page[..chunk])?;
        offset += chunk as u64;
        remaining -= chunk;
    }

    tracing::debug!(
        store = store.identifier(),
        width = header.width,
        height = header.height,
        tiles = header.tile_count,
        compression = %header.compression_tag,
        "Created tiled segment"
    );

    Ok(header)
}
