//! # chanstore
//!
//! A storage engine for raster channels: 2-D bands of pixels addressed in
//! fixed-size blocks.
//!
//! ## Features
//!
//! - **Tiled segments**: blocks stored as tiles, raw, run-length or JPEG encoded
//! - **Paged tile directory**: directory pages load on first touch and only
//!   dirty pages are written back
//! - **Sparse tiles**: unwritten tiles read as the channel's empty value
//!   without touching tile data
//! - **Overviews**: reduced-resolution channels discovered from metadata and
//!   opened on demand
//! - **Alternate backends**: band-interleaved raw files and external images
//!   behind the same [`Channel`] trait
//!
//! ## Architecture
//!
//! - [`io`] - Byte stores (file, memory) and segment sources
//! - [`codec`] - Tile codecs (raw, RLE, JPEG)
//! - [`tile`] - Tiled segment layout and the paged tile directory
//! - [`channel`] - The `Channel` trait and its backends
//! - [`config`] - CLI configuration for the `chanstore` tool
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chanstore::{
//!     Access, Channel, ChannelCore, Compression, FileStore, PixelType, SegmentParams,
//!     TiledChannel,
//! };
//!
//! fn main() -> Result<(), chanstore::ChannelError> {
//!     let store = Arc::new(FileStore::create("band1.seg")?);
//!     let params = SegmentParams::new(1000, 1000, 256, 256).with_compression(Compression::Rle);
//!     let core = ChannelCore::new(1, 1000, 1000, PixelType::U8).with_access(Access::Update);
//!
//!     let mut channel = TiledChannel::create(core, store, &params)?;
//!     assert_eq!(channel.block_count(), 16);
//!
//!     channel.write_block(0, &vec![7u8; 256 * 256])?;
//!     channel.synchronize()?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod io;
pub mod tile;

// Re-export commonly used types
pub use channel::{
    BandInterleavedChannel, BlockWindow, Channel, ChannelCore, ExternalChannel,
    ExternalDatabases, ExternalHandle, ExternalImage, ExternalMapping, ExternalOpener,
    OverviewRef, PixelType, RawLayout, TileLayout, TiledChannel, Window,
    DEFAULT_EXTERNAL_CACHE_BLOCKS, HISTORY_DEPTH, NO_DATA_VALUE_KEY, OVERVIEW_KEY_PREFIX,
};
pub use codec::{
    BlockShape, Compression, JpegCodec, RawCodec, RleCodec, TileCodec, DEFAULT_JPEG_QUALITY,
};
pub use config::{Cli, Command, DumpConfig, InfoConfig, OutputFormat};
pub use error::{ChannelError, IoError, LayoutError};
pub use io::{
    Access, ByteOrder, ByteStore, DirectorySegmentSource, FileStore, MemorySegmentSource,
    MemoryStore, SegmentSource,
};
pub use tile::{
    create_segment, PageState, SegmentHeader, SegmentParams, TileDirectory, TileEntry,
    PAGE_SIZE,
};
