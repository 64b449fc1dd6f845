//! Channel abstraction and backends.
//!
//! A channel is one 2-D raster band addressed in fixed-size blocks. Every
//! backend implements [`Channel`]:
//!
//! - [`TiledChannel`]: blocks stored as (optionally compressed) tiles in a
//!   segment, located through a paged tile directory
//! - [`BandInterleavedChannel`]: scanlines of a raw pixel-interleaved file
//! - [`ExternalChannel`]: a crop of a channel in an external image
//!
//! Geometry, metadata, history and overviews live in [`ChannelCore`], which
//! backends embed and expose through [`Channel::core`].
//!
//! # Example
//!
//! ```ignore
//! use chanstore::{Channel, ChannelCore, PixelType, TiledChannel};
//!
//! let core = ChannelCore::new(1, 1000, 1000, PixelType::U8);
//! let mut channel = TiledChannel::open(core, store)?;
//!
//! let mut block = vec![0u8; channel.block_width() as usize * channel.block_height() as usize];
//! channel.read_block(0, &mut block, None)?;
//! ```

mod core;
mod external;
mod interleaved;
mod overview;
mod pixel;
mod tiled;

pub use self::core::{
    BlockWindow, ChannelCore, HISTORY_DEPTH, HISTORY_ENTRY_LEN, NO_DATA_VALUE_KEY,
};
pub use external::{
    ExternalChannel, ExternalDatabases, ExternalHandle, ExternalImage, ExternalMapping,
    ExternalOpener, DEFAULT_EXTERNAL_CACHE_BLOCKS,
};
pub use interleaved::{BandInterleavedChannel, RawLayout};
pub use overview::{
    format_reference, parse_reference, OverviewList, OverviewRef, DEFAULT_RESAMPLING,
    OVERVIEW_KEY_PREFIX,
};
pub use pixel::PixelType;
pub use tiled::{TileLayout, TiledChannel};

use crate::error::ChannelError;

// =============================================================================
// Window
// =============================================================================

/// A requested sub-window of a block, in pixels relative to the block origin.
///
/// Fields are signed so that negative requests can be rejected explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub xoff: i32,
    pub yoff: i32,
    pub xsize: i32,
    pub ysize: i32,
}

impl Window {
    pub fn new(xoff: i32, yoff: i32, xsize: i32, ysize: i32) -> Self {
        Self {
            xoff,
            yoff,
            xsize,
            ysize,
        }
    }
}

// =============================================================================
// Channel Trait
// =============================================================================

/// One raster band stored as fixed-size blocks.
///
/// Implementors provide block I/O; everything else has a default built on
/// [`ChannelCore`]. Channels are not internally synchronized: I/O takes
/// `&mut self`.
pub trait Channel: Send {
    /// Shared geometry, metadata, history and overview state.
    fn core(&self) -> &ChannelCore;

    /// Mutable access to the shared state.
    fn core_mut(&mut self) -> &mut ChannelCore;

    /// Read block `block_index` into `buffer`.
    ///
    /// With `window` set, only that part of the block is returned, packed
    /// row by row. Returns the number of bytes written to `buffer`. Data is
    /// returned in host byte order.
    ///
    /// # Errors
    /// - `InvalidArgument` for a bad block index, window or short buffer
    /// - `Io`, `CorruptTile`, `CorruptDirectory` for storage failures
    fn read_block(
        &mut self,
        block_index: u64,
        buffer: &mut [u8],
        window: Option<Window>,
    ) -> Result<usize, ChannelError>;

    /// Write a full block from `buffer` (host byte order).
    ///
    /// Returns the number of bytes consumed from `buffer`.
    ///
    /// # Errors
    /// - `ReadOnlyViolation` if the channel is not writable
    /// - `InvalidArgument` for a bad block index or short buffer
    fn write_block(&mut self, block_index: u64, buffer: &[u8]) -> Result<usize, ChannelError>;

    /// Flush pending state to the backing store.
    fn synchronize(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Geometry
    // -------------------------------------------------------------------------

    fn width(&self) -> u32 {
        self.core().width()
    }

    fn height(&self) -> u32 {
        self.core().height()
    }

    fn block_width(&self) -> u32 {
        self.core().block_width()
    }

    fn block_height(&self) -> u32 {
        self.core().block_height()
    }

    fn pixel_type(&self) -> PixelType {
        self.core().pixel_type()
    }

    /// Number of blocks, from the current geometry.
    fn block_count(&self) -> u64 {
        self.core().block_count()
    }

    fn channel_number(&self) -> u32 {
        self.core().channel_number()
    }

    fn needs_byte_swap(&self) -> bool {
        self.core().needs_byte_swap()
    }

    // -------------------------------------------------------------------------
    // Metadata & History
    // -------------------------------------------------------------------------

    fn metadata_value(&self, key: &str) -> Option<String> {
        self.core().metadata_value(key).map(str::to_string)
    }

    fn set_metadata_value(&mut self, key: &str, value: &str) {
        self.core_mut().set_metadata_value(key, value);
    }

    fn metadata_keys(&self) -> Vec<String> {
        self.core().metadata_keys()
    }

    /// History entries, newest first.
    fn history_entries(&self) -> Vec<String> {
        self.core().history_entries().to_vec()
    }

    fn set_history_entries(&mut self, entries: Vec<String>) {
        self.core_mut().set_history_entries(entries);
    }

    fn push_history(&mut self, app: &str, message: &str) {
        self.core_mut().push_history(app, message);
    }

    // -------------------------------------------------------------------------
    // Overviews
    // -------------------------------------------------------------------------

    fn overview_count(&mut self) -> usize {
        self.core_mut().overview_count()
    }

    /// The `index`th overview, ordered by decimation factor.
    fn overview(&mut self, index: usize) -> Result<&mut dyn Channel, ChannelError> {
        self.core_mut().overview(index)
    }

    fn is_overview_valid(&mut self, index: usize) -> Result<bool, ChannelError> {
        self.core_mut().is_overview_valid(index)
    }

    fn set_overview_validity(&mut self, index: usize, valid: bool) -> Result<(), ChannelError> {
        self.core_mut().set_overview_validity(index, valid)
    }

    fn overview_resampling(&mut self, index: usize) -> Result<String, ChannelError> {
        self.core_mut().overview_resampling(index)
    }

    fn overview_decimations(&mut self) -> Vec<String> {
        self.core_mut().overview_decimations()
    }

    /// Forget cached overviews; the next overview query rescans metadata.
    fn invalidate_overview_info(&mut self) {
        self.core_mut().invalidate_overview_info();
    }

    /// Number of times overview metadata has been scanned.
    fn overview_scan_count(&self) -> usize {
        self.core().overview_scan_count()
    }
}
