//! Channel stored as tiles in a segment.
//!
//! Tiles are located through a paged [`TileDirectory`] and encoded with the
//! segment's compression scheme. Opening a channel establishes access:
//! the segment header is parsed, the channel geometry is taken from it and
//! the directory is set up. Directory pages are still loaded lazily.
//!
//! # Growth
//!
//! A rewritten tile reuses its slot when the new encoding is no larger than
//! the old one; otherwise it is appended at the end of the data region and
//! the old bytes are left unused.

use std::sync::Arc;

use tracing::{debug, warn};

use super::core::{alloc_block, copy_window, fill_pixels, BlockWindow, ChannelCore};
use super::{Channel, Window};
use crate::codec::{BlockShape, Compression, TileCodec};
use crate::error::{ChannelError, IoError, LayoutError};
use crate::io::{swap_words, ByteStore};
use crate::tile::{
    create_segment, PageState, SegmentHeader, SegmentParams, TileDirectory, TileEntry,
    HEADER_SIZE,
};

/// Tile grid and compression of an established tiled channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLayout {
    pub tiles_per_row: u32,
    pub tiles_per_col: u32,
    pub tile_count: u64,
    pub compression: Compression,
}

/// Everything learned from the segment once access is established.
struct Established {
    layout: TileLayout,
    header: SegmentHeader,
    directory: TileDirectory,
    codec: Box<dyn TileCodec>,
    /// `header.data_end` changed since the last synchronize
    header_dirty: bool,
}

enum AccessState {
    Unestablished,
    Established(Box<Established>),
}

// =============================================================================
// TiledChannel
// =============================================================================

/// A channel whose blocks are tiles in a segment store.
pub struct TiledChannel {
    core: ChannelCore,
    store: Arc<dyn ByteStore>,
    state: AccessState,
}

impl TiledChannel {
    /// Open the tiled segment in `store`.
    ///
    /// Geometry, pixel type and byte order in `core` are replaced by the
    /// segment header's.
    pub fn open(core: ChannelCore, store: Arc<dyn ByteStore>) -> Result<Self, ChannelError> {
        let mut channel = Self::unestablished(core, store);
        channel.establish_access()?;
        Ok(channel)
    }

    fn unestablished(core: ChannelCore, store: Arc<dyn ByteStore>) -> Self {
        Self {
            core,
            store,
            state: AccessState::Unestablished,
        }
    }

    /// Initialize an empty segment in `store` and open it.
    pub fn create(
        core: ChannelCore,
        store: Arc<dyn ByteStore>,
        params: &SegmentParams,
    ) -> Result<Self, ChannelError> {
        create_segment(store.as_ref(), params)?;
        Self::open(core, store)
    }

    /// Parse the segment header and set up the tile directory.
    ///
    /// Idempotent; updates the channel geometry from the header.
    pub fn establish_access(&mut self) -> Result<(), ChannelError> {
        self.established().map(|_| ())
    }

    /// Whether the segment header has been read.
    pub fn is_established(&self) -> bool {
        matches!(self.state, AccessState::Established(_))
    }

    /// Tile grid and compression, once established.
    pub fn layout(&self) -> Option<&TileLayout> {
        match &self.state {
            AccessState::Established(est) => Some(&est.layout),
            AccessState::Unestablished => None,
        }
    }

    /// Segment header as last read or updated, once established.
    pub fn segment_header(&self) -> Option<&SegmentHeader> {
        match &self.state {
            AccessState::Established(est) => Some(&est.header),
            AccessState::Unestablished => None,
        }
    }

    /// Directory entry of tile `block_index`.
    pub fn tile_info(&mut self, block_index: u64) -> Result<TileEntry, ChannelError> {
        self.established()?.directory.entry(block_index)
    }

    /// Whether tile `block_index` has never been written.
    pub fn is_tile_empty(&mut self, block_index: u64) -> Result<bool, ChannelError> {
        Ok(self.tile_info(block_index)?.is_empty())
    }

    /// State of directory page `page`; `NotLoaded` before access is established.
    pub fn page_state(&self, page: usize) -> PageState {
        match &self.state {
            AccessState::Established(est) => est.directory.page_state(page),
            AccessState::Unestablished => PageState::NotLoaded,
        }
    }

    /// Number of directory pages in memory.
    pub fn loaded_pages(&self) -> usize {
        match &self.state {
            AccessState::Established(est) => est.directory.loaded_pages(),
            AccessState::Unestablished => 0,
        }
    }

    /// The backing segment store.
    pub fn store(&self) -> &Arc<dyn ByteStore> {
        &self.store
    }

    fn established(&mut self) -> Result<&mut Established, ChannelError> {
        if let AccessState::Unestablished = self.state {
            let est = self.load_segment()?;
            self.state = AccessState::Established(Box::new(est));
        }

        match &mut self.state {
            AccessState::Established(est) => Ok(est),
            AccessState::Unestablished => Err(ChannelError::CorruptDirectory(
                "access could not be established".to_string(),
            )),
        }
    }

    fn load_segment(&mut self) -> Result<Established, ChannelError> {
        let size = self.store.size();
        if size < HEADER_SIZE as u64 {
            return Err(LayoutError::SegmentTooSmall {
                required: HEADER_SIZE as u64,
                actual: size,
            }
            .into());
        }

        let bytes = self.store.read_exact_at(0, HEADER_SIZE)?;
        let header = SegmentHeader::parse(&bytes, size)?;

        let compression = Compression::from_tag(&header.compression_tag)?;
        if matches!(compression, Compression::Jpeg { .. })
            && header.pixel_type != super::PixelType::U8
        {
            return Err(ChannelError::UnsupportedCompression(format!(
                "{} requires 8U pixels, segment holds {}",
                compression, header.pixel_type
            )));
        }

        let layout = TileLayout {
            tiles_per_row: header.tiles_per_row(),
            tiles_per_col: header.tiles_per_col(),
            tile_count: header.tile_count as u64,
            compression,
        };

        self.core.set_geometry(
            header.width,
            header.height,
            header.block_width,
            header.block_height,
        );
        self.core.set_pixel_type(header.pixel_type);
        self.core.set_byte_order(header.byte_order);

        let directory = TileDirectory::new(
            Arc::clone(&self.store),
            header.byte_order,
            header.directory_offset(),
            layout.tile_count,
        );

        debug!(
            store = self.store.identifier(),
            width = header.width,
            height = header.height,
            block_width = header.block_width,
            block_height = header.block_height,
            pixel_type = %header.pixel_type,
            compression = %compression,
            tiles = layout.tile_count,
            "Established tiled channel access"
        );

        Ok(Established {
            layout,
            header,
            directory,
            codec: compression.codec(),
            header_dirty: false,
        })
    }

    fn shape(&self) -> BlockShape {
        BlockShape::new(
            self.core.block_width(),
            self.core.block_height(),
            self.core.pixel_type().size(),
        )
    }

    /// Decode tile `block_index` and copy `window` of it into `out`.
    fn read_tile(
        &mut self,
        block_index: u64,
        window: &BlockWindow,
        out: &mut [u8],
    ) -> Result<(), ChannelError> {
        let shape = self.shape();
        let pixel_type = self.core.pixel_type();
        let swap = self.core.needs_byte_swap();
        let empty = self.core.empty_pixel();
        let store = Arc::clone(&self.store);

        let est = self.established()?;
        let entry = est.directory.entry(block_index)?;

        if entry.is_empty() {
            fill_pixels(out, &empty);
            return Ok(());
        }

        check_entry(&est.header, block_index, &entry)?;

        let data = store.read_exact_at(entry.offset, entry.size as usize)?;
        if data.len() != entry.size as usize {
            return Err(IoError::ShortRead {
                offset: entry.offset,
                expected: entry.size as u64,
                actual: data.len() as u64,
            }
            .into());
        }

        if window.is_full(shape.width as usize, shape.height as usize) {
            est.codec.decompress(block_index, &data, out, &shape)?;
            if swap {
                swap_words(out, pixel_type.word_size());
            }
            return Ok(());
        }

        let mut block = alloc_block(shape.byte_len())?;
        est.codec.decompress(block_index, &data, &mut block, &shape)?;
        if swap {
            swap_words(&mut block, pixel_type.word_size());
        }
        copy_window(&block, shape.width as usize, shape.pixel_size, window, out);
        Ok(())
    }
}

/// Fail with `CorruptDirectory` unless `entry` lies inside the data region.
fn check_entry(header: &SegmentHeader, block_index: u64, entry: &TileEntry) -> Result<(), ChannelError> {
    let data_start = header.data_start();
    let data_end = header.data_end;
    if entry.size < 0
        || entry.offset < data_start
        || entry.offset.saturating_add(entry.size as u64) > data_end
    {
        return Err(ChannelError::CorruptDirectory(format!(
            "tile {} entry ({} bytes at {}) outside data region [{}, {})",
            block_index, entry.size, entry.offset, data_start, data_end
        )));
    }
    Ok(())
}

impl Channel for TiledChannel {
    fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ChannelCore {
        &mut self.core
    }

    fn read_block(
        &mut self,
        block_index: u64,
        buffer: &mut [u8],
        window: Option<Window>,
    ) -> Result<usize, ChannelError> {
        let result = self.establish_access().and_then(|()| {
            let resolved = self.core.resolve_window(window)?;
            let len = self.core.check_buffer(buffer.len(), &resolved)?;
            self.core.check_block_index(block_index)?;
            self.read_tile(block_index, &resolved, &mut buffer[..len])?;
            Ok(len)
        });

        if result.is_err() {
            self.core.clear_requested(buffer, window);
        }
        result
    }

    fn write_block(&mut self, block_index: u64, buffer: &[u8]) -> Result<usize, ChannelError> {
        self.establish_access()?;
        self.core.check_writable()?;
        self.core.check_block_index(block_index)?;

        let shape = self.shape();
        let len = shape.byte_len();
        if buffer.len() < len {
            return Err(ChannelError::InvalidArgument(format!(
                "buffer of {} bytes too small for {} byte block",
                buffer.len(),
                len
            )));
        }

        let swap = self.core.needs_byte_swap();
        let word_size = self.core.pixel_type().word_size();
        let store = Arc::clone(&self.store);
        let est = self.established()?;

        let encoded = if swap {
            let mut block = alloc_block(len)?;
            block.copy_from_slice(&buffer[..len]);
            swap_words(&mut block, word_size);
            est.codec.compress(&block, &shape)?
        } else {
            est.codec.compress(&buffer[..len], &shape)?
        };

        let size = i32::try_from(encoded.len()).map_err(|_| {
            ChannelError::InvalidArgument(format!(
                "encoded tile of {} bytes exceeds the entry size limit",
                encoded.len()
            ))
        })?;

        let old = est.directory.entry(block_index)?;
        if !old.is_empty() {
            check_entry(&est.header, block_index, &old)?;
        }

        let offset = if !old.is_empty() && old.size >= size {
            store.write_all_at(old.offset, &encoded)?;
            old.offset
        } else {
            let offset = est.header.data_end;
            store.write_all_at(offset, &encoded)?;
            est.header.data_end = offset + encoded.len() as u64;
            est.header_dirty = true;

            debug!(
                tile = block_index,
                offset,
                size,
                previous_size = old.size,
                "Appended tile"
            );
            offset
        };

        est.directory.set_entry(block_index, TileEntry { offset, size })?;
        Ok(len)
    }

    /// Flush dirty directory pages and the header.
    fn synchronize(&mut self) -> Result<(), ChannelError> {
        let AccessState::Established(est) = &mut self.state else {
            return Ok(());
        };

        let pages = est.directory.synchronize()?;
        let header_written = est.header_dirty;
        if header_written {
            self.store.write_all_at(0, &est.header.to_bytes())?;
            est.header_dirty = false;
        }
        if pages > 0 || header_written {
            self.store.flush()?;
            debug!(store = self.store.identifier(), pages, "Synchronized tiled channel");
        }
        Ok(())
    }
}

impl Drop for TiledChannel {
    fn drop(&mut self) {
        if let Err(err) = self.synchronize() {
            warn!(
                store = self.store.identifier(),
                channel = self.core.channel_number(),
                error = %err,
                "Failed to synchronize tiled channel on drop"
            );
        }
    }
}
