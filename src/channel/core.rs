//! State shared by every channel backend.
//!
//! `ChannelCore` holds geometry, metadata, history and the overview list.
//! Backends embed one and expose it through [`Channel::core`], which gives
//! them the whole non-I/O part of the contract for free.
//!
//! [`Channel::core`]: super::Channel::core

use std::collections::BTreeMap;
use std::sync::Arc;

use super::overview::{OverviewList, OVERVIEW_KEY_PREFIX};
use super::pixel::PixelType;
use super::{Channel, Window};
use crate::error::ChannelError;
use crate::io::{Access, ByteOrder, SegmentSource};

/// Metadata key holding the value reported for never-written pixels.
pub const NO_DATA_VALUE_KEY: &str = "NO_DATA_VALUE";

/// Maximum number of history entries kept per channel.
pub const HISTORY_DEPTH: usize = 8;

/// Maximum length of one history entry in characters.
pub const HISTORY_ENTRY_LEN: usize = 80;

/// Width of the application name column in history entries.
const HISTORY_APP_LEN: usize = 7;

// =============================================================================
// ChannelCore
// =============================================================================

/// Geometry, metadata, history and overview bookkeeping of one channel.
pub struct ChannelCore {
    channel_number: u32,
    width: u32,
    height: u32,
    block_width: u32,
    block_height: u32,
    pixel_type: PixelType,
    byte_order: ByteOrder,
    access: Access,
    metadata: BTreeMap<String, String>,
    history: Vec<String>,
    overviews: OverviewList,
    segments: Option<Arc<dyn SegmentSource>>,
}

impl ChannelCore {
    /// Create a read-only core with one block covering the whole image.
    pub fn new(channel_number: u32, width: u32, height: u32, pixel_type: PixelType) -> Self {
        Self {
            channel_number,
            width,
            height,
            block_width: width.max(1),
            block_height: height.max(1),
            pixel_type,
            byte_order: ByteOrder::BigEndian,
            access: Access::ReadOnly,
            metadata: BTreeMap::new(),
            history: Vec::new(),
            overviews: OverviewList::default(),
            segments: None,
        }
    }

    /// Core for an overview of `parent`; geometry comes from the overview segment.
    pub(crate) fn for_overview(parent: &ChannelCore) -> Self {
        let mut core = Self::new(parent.channel_number, 1, 1, parent.pixel_type)
            .with_access(parent.access)
            .with_byte_order(parent.byte_order);
        core.segments = parent.segments.clone();
        core
    }

    /// Set the block size.
    pub fn with_block_size(mut self, block_width: u32, block_height: u32) -> Self {
        self.block_width = block_width;
        self.block_height = block_height;
        self
    }

    /// Set the byte order of the stored pixel data.
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    /// Set the access mode.
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Set the source used to open overview segments.
    pub fn with_segment_source(mut self, segments: Arc<dyn SegmentSource>) -> Self {
        self.segments = Some(segments);
        self
    }

    /// Set the initial metadata.
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    // -------------------------------------------------------------------------
    // Geometry
    // -------------------------------------------------------------------------

    pub fn channel_number(&self) -> u32 {
        self.channel_number
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn block_width(&self) -> u32 {
        self.block_width
    }

    pub fn block_height(&self) -> u32 {
        self.block_height
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn access(&self) -> Access {
        self.access
    }

    /// Whether stored pixel data must be byte-swapped on this host.
    pub fn needs_byte_swap(&self) -> bool {
        self.pixel_type.word_size() > 1 && self.byte_order.needs_swap()
    }

    /// Number of blocks across.
    pub fn blocks_per_row(&self) -> u64 {
        self.width.div_ceil(self.block_width.max(1)) as u64
    }

    /// Number of blocks down.
    pub fn blocks_per_col(&self) -> u64 {
        self.height.div_ceil(self.block_height.max(1)) as u64
    }

    /// Total number of blocks, always derived from the current geometry.
    pub fn block_count(&self) -> u64 {
        self.blocks_per_row() * self.blocks_per_col()
    }

    /// Size of one full block in bytes.
    pub fn block_byte_len(&self) -> usize {
        self.block_width as usize * self.block_height as usize * self.pixel_type.size()
    }

    /// Replace the geometry once a backend has learned the real values.
    pub(crate) fn set_geometry(
        &mut self,
        width: u32,
        height: u32,
        block_width: u32,
        block_height: u32,
    ) {
        self.width = width;
        self.height = height;
        self.block_width = block_width;
        self.block_height = block_height;
    }

    pub(crate) fn set_pixel_type(&mut self, pixel_type: PixelType) {
        self.pixel_type = pixel_type;
    }

    pub(crate) fn set_byte_order(&mut self, byte_order: ByteOrder) {
        self.byte_order = byte_order;
    }

    // -------------------------------------------------------------------------
    // Argument Checks
    // -------------------------------------------------------------------------

    /// Fail with `InvalidArgument` unless `block_index` addresses a block.
    pub fn check_block_index(&self, block_index: u64) -> Result<(), ChannelError> {
        let count = self.block_count();
        if block_index >= count {
            return Err(ChannelError::InvalidArgument(format!(
                "block {} out of range (block count {})",
                block_index, count
            )));
        }
        Ok(())
    }

    /// Fail with `ReadOnlyViolation` unless the channel is writable.
    pub fn check_writable(&self) -> Result<(), ChannelError> {
        if !self.access.is_writable() {
            return Err(ChannelError::ReadOnlyViolation {
                channel: self.channel_number,
            });
        }
        Ok(())
    }

    /// Validate an optional sub-window against the block size.
    ///
    /// `None` selects the whole block. Windows reaching outside
    /// `[0, block_width) x [0, block_height)` are rejected, never clamped.
    pub fn resolve_window(&self, window: Option<Window>) -> Result<BlockWindow, ChannelError> {
        let Some(w) = window else {
            return Ok(BlockWindow {
                xoff: 0,
                yoff: 0,
                xsize: self.block_width as usize,
                ysize: self.block_height as usize,
            });
        };

        let fits = w.xoff >= 0
            && w.yoff >= 0
            && w.xsize > 0
            && w.ysize > 0
            && w.xoff as i64 + w.xsize as i64 <= self.block_width as i64
            && w.yoff as i64 + w.ysize as i64 <= self.block_height as i64;

        if !fits {
            return Err(ChannelError::InvalidArgument(format!(
                "window {}x{}+{}+{} outside {}x{} block",
                w.xsize, w.ysize, w.xoff, w.yoff, self.block_width, self.block_height
            )));
        }

        Ok(BlockWindow {
            xoff: w.xoff as usize,
            yoff: w.yoff as usize,
            xsize: w.xsize as usize,
            ysize: w.ysize as usize,
        })
    }

    /// Fail with `InvalidArgument` if `buffer_len` cannot hold `window`.
    pub fn check_buffer(&self, buffer_len: usize, window: &BlockWindow) -> Result<usize, ChannelError> {
        let needed = window.byte_len(self.pixel_type.size());
        if buffer_len < needed {
            return Err(ChannelError::InvalidArgument(format!(
                "buffer of {} bytes too small for {} byte window",
                buffer_len, needed
            )));
        }
        Ok(needed)
    }

    /// Zero the part of `buffer` a failed read of `window` was meant to fill.
    ///
    /// A window that does not resolve clears up to one full block.
    pub(crate) fn clear_requested(&self, buffer: &mut [u8], window: Option<Window>) {
        let needed = match self.resolve_window(window) {
            Ok(w) => w.byte_len(self.pixel_type.size()),
            Err(_) => self.block_byte_len(),
        };
        let len = needed.min(buffer.len());
        buffer[..len].fill(0);
    }

    /// One pixel of the empty value, in host byte order.
    ///
    /// Taken from the `NO_DATA_VALUE` metadata entry, zero if absent.
    pub fn empty_pixel(&self) -> Vec<u8> {
        let value = self
            .metadata
            .get(NO_DATA_VALUE_KEY)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(0.0);
        self.pixel_type.encode_value(value, ByteOrder::host())
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Set `key`; an empty value removes it.
    pub fn set_metadata_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if value.is_empty() {
            self.metadata.remove(&key);
        } else {
            self.metadata.insert(key, value);
        }
    }

    pub fn metadata_keys(&self) -> Vec<String> {
        self.metadata.keys().cloned().collect()
    }

    /// All metadata, for the owning container to persist.
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    // -------------------------------------------------------------------------
    // History
    // -------------------------------------------------------------------------

    /// History entries, newest first.
    pub fn history_entries(&self) -> &[String] {
        &self.history
    }

    /// Replace the history, keeping at most [`HISTORY_DEPTH`] entries.
    pub fn set_history_entries(&mut self, entries: Vec<String>) {
        self.history = entries
            .into_iter()
            .take(HISTORY_DEPTH)
            .map(|e| truncate_chars(&e, HISTORY_ENTRY_LEN))
            .collect();
    }

    /// Record `message` from `app` as the newest history entry.
    pub fn push_history(&mut self, app: &str, message: &str) {
        let app = truncate_chars(app, HISTORY_APP_LEN);
        let entry = truncate_chars(
            &format!("{:<width$}: {}", app, message, width = HISTORY_APP_LEN),
            HISTORY_ENTRY_LEN,
        );

        self.history.insert(0, entry);
        self.history.truncate(HISTORY_DEPTH);
    }

    // -------------------------------------------------------------------------
    // Overviews
    // -------------------------------------------------------------------------

    /// Number of overviews, scanning metadata on first use.
    pub fn overview_count(&mut self) -> usize {
        self.overviews.ensure_scanned(&self.metadata);
        self.overviews.len()
    }

    /// The `index`th overview channel, opened and cached on first use.
    pub fn overview(&mut self, index: usize) -> Result<&mut dyn Channel, ChannelError> {
        self.overviews.ensure_scanned(&self.metadata);
        let template = ChannelCore::for_overview(self);
        self.overviews.channel(index, template)
    }

    pub fn is_overview_valid(&mut self, index: usize) -> Result<bool, ChannelError> {
        self.overviews.ensure_scanned(&self.metadata);
        Ok(self.overviews.get(index)?.valid)
    }

    /// Persist the validity flag of the `index`th overview in metadata.
    pub fn set_overview_validity(&mut self, index: usize, valid: bool) -> Result<(), ChannelError> {
        self.overviews.ensure_scanned(&self.metadata);
        let (key, value) = self.overviews.set_valid(index, valid)?;
        self.metadata.insert(key, value);
        Ok(())
    }

    pub fn overview_resampling(&mut self, index: usize) -> Result<String, ChannelError> {
        self.overviews.ensure_scanned(&self.metadata);
        Ok(self.overviews.get(index)?.resampling.clone())
    }

    /// Decimation descriptors of all overviews, in overview order.
    pub fn overview_decimations(&mut self) -> Vec<String> {
        self.overviews.ensure_scanned(&self.metadata);
        self.overviews.decimations()
    }

    /// Register an overview stored in `segment` at decimation `decimation`.
    ///
    /// Writes the reference into metadata (invalid until content is
    /// generated) and drops the cached overview list.
    pub fn add_overview_reference(&mut self, decimation: u32, segment: u32, resampling: &str) {
        let key = format!("{OVERVIEW_KEY_PREFIX}{decimation}");
        let value = super::overview::format_reference(segment, false, resampling);
        self.metadata.insert(key, value);
        self.invalidate_overview_info();
    }

    /// Drop every cached overview channel and rescan metadata on next use.
    pub fn invalidate_overview_info(&mut self) {
        self.overviews.invalidate();
    }

    /// Number of metadata scans performed so far.
    pub fn overview_scan_count(&self) -> usize {
        self.overviews.scan_count()
    }

    pub(crate) fn segment_source(&self) -> Option<&Arc<dyn SegmentSource>> {
        self.segments.as_ref()
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// =============================================================================
// Block Windows
// =============================================================================

/// A validated sub-window of a block, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindow {
    pub xoff: usize,
    pub yoff: usize,
    pub xsize: usize,
    pub ysize: usize,
}

impl BlockWindow {
    /// Bytes needed to hold the window.
    pub fn byte_len(&self, pixel_size: usize) -> usize {
        self.xsize * self.ysize * pixel_size
    }

    /// Whether the window covers a whole `block_width` x `block_height` block.
    pub fn is_full(&self, block_width: usize, block_height: usize) -> bool {
        self.xoff == 0 && self.yoff == 0 && self.xsize == block_width && self.ysize == block_height
    }
}

/// Copy `window` out of a full block into a tightly packed buffer.
pub(crate) fn copy_window(
    block: &[u8],
    block_width: usize,
    pixel_size: usize,
    window: &BlockWindow,
    out: &mut [u8],
) {
    let row_len = window.xsize * pixel_size;
    for row in 0..window.ysize {
        let src = ((window.yoff + row) * block_width + window.xoff) * pixel_size;
        let dst = row * row_len;
        out[dst..dst + row_len].copy_from_slice(&block[src..src + row_len]);
    }
}

/// Fill `out` with repetitions of `pixel`.
pub(crate) fn fill_pixels(out: &mut [u8], pixel: &[u8]) {
    if pixel.iter().all(|b| *b == 0) {
        out.fill(0);
        return;
    }
    for chunk in out.chunks_mut(pixel.len()) {
        chunk.copy_from_slice(&pixel[..chunk.len()]);
    }
}

/// Allocate a zeroed block buffer, reporting allocation failure.
pub(crate) fn alloc_block(len: usize) -> Result<Vec<u8>, ChannelError> {
    let mut block = Vec::new();
    block
        .try_reserve_exact(len)
        .map_err(|_| ChannelError::OutOfMemory { bytes: len })?;
    block.resize(len, 0);
    Ok(block)
}
