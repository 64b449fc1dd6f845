//! Paged tile directory.
//!
//! The directory maps tile numbers to `(offset, size)` entries stored in
//! the segment right after the header. Images can have millions of tiles,
//! so entries are loaded one page ([`PAGE_SIZE`] entries) at a time, on
//! first touch, and only pages modified since the last flush are written
//! back.
//!
//! Pages live in an arena indexed by page number. A slot is `None` until
//! the page is loaded; a loaded page carries its own dirty flag.

use std::sync::Arc;

use tracing::debug;

use super::layout::{ENTRY_SIZE, PAGE_SIZE};
use crate::error::{ChannelError, IoError};
use crate::io::{ByteOrder, ByteStore};

// =============================================================================
// Entries and Pages
// =============================================================================

/// Location of one tile in the segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileEntry {
    /// Byte offset of the tile data, 0 if the tile was never written
    pub offset: u64,

    /// Size of the stored tile data in bytes
    pub size: i32,
}

impl TileEntry {
    /// Entry of a tile that was never written.
    pub const EMPTY: TileEntry = TileEntry { offset: 0, size: 0 };

    /// Whether the tile was never written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.offset == 0
    }
}

/// Load state of one directory page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Not read from the store yet
    NotLoaded,
    /// In memory and identical to the store
    Clean,
    /// In memory with changes not yet written back
    Dirty,
}

#[derive(Debug)]
struct DirectoryPage {
    entries: Vec<TileEntry>,
    dirty: bool,
}

// =============================================================================
// TileDirectory
// =============================================================================

/// Lazily paged index of tile locations.
pub struct TileDirectory {
    store: Arc<dyn ByteStore>,
    byte_order: ByteOrder,
    /// Offset of entry 0 in the store
    base_offset: u64,
    tile_count: u64,
    pages: Vec<Option<DirectoryPage>>,
}

impl TileDirectory {
    /// Create a directory of `tile_count` entries starting at `base_offset`.
    ///
    /// No I/O happens until an entry is touched.
    pub fn new(
        store: Arc<dyn ByteStore>,
        byte_order: ByteOrder,
        base_offset: u64,
        tile_count: u64,
    ) -> Self {
        let page_count = (tile_count as usize).div_ceil(PAGE_SIZE);
        let mut pages = Vec::with_capacity(page_count);
        pages.resize_with(page_count, || None);

        Self {
            store,
            byte_order,
            base_offset,
            tile_count,
            pages,
        }
    }

    /// Number of entries.
    pub fn tile_count(&self) -> u64 {
        self.tile_count
    }

    /// Number of pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Page holding entry `tile`.
    #[inline]
    pub fn page_of(tile: u64) -> usize {
        (tile / PAGE_SIZE as u64) as usize
    }

    /// Current state of `page`.
    pub fn page_state(&self, page: usize) -> PageState {
        match self.pages.get(page) {
            Some(Some(p)) if p.dirty => PageState::Dirty,
            Some(Some(_)) => PageState::Clean,
            _ => PageState::NotLoaded,
        }
    }

    /// Number of pages currently in memory.
    pub fn loaded_pages(&self) -> usize {
        self.pages.iter().filter(|p| p.is_some()).count()
    }

    /// Whether any page has unsaved changes.
    pub fn is_dirty(&self) -> bool {
        self.pages.iter().flatten().any(|p| p.dirty)
    }

    /// Look up the entry of `tile`, loading its page if needed.
    pub fn entry(&mut self, tile: u64) -> Result<TileEntry, ChannelError> {
        let (page, slot) = self.locate(tile)?;
        let entries = self.page_entries(page)?;
        Ok(entries[slot])
    }

    /// Replace the entry of `tile` and mark its page dirty.
    pub fn set_entry(&mut self, tile: u64, entry: TileEntry) -> Result<(), ChannelError> {
        let (page, slot) = self.locate(tile)?;
        self.load_page(page)?;

        if let Some(Some(p)) = self.pages.get_mut(page) {
            p.entries[slot] = entry;
            p.dirty = true;
        }
        Ok(())
    }

    /// Write every dirty page back to the store.
    ///
    /// Returns the number of pages written.
    pub fn synchronize(&mut self) -> Result<usize, ChannelError> {
        let mut flushed = 0;
        for page in 0..self.pages.len() {
            if self.page_state(page) == PageState::Dirty {
                self.save_page(page)?;
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    fn locate(&self, tile: u64) -> Result<(usize, usize), ChannelError> {
        if tile >= self.tile_count {
            return Err(ChannelError::InvalidArgument(format!(
                "tile {} out of range (tile count {})",
                tile, self.tile_count
            )));
        }
        Ok((Self::page_of(tile), (tile % PAGE_SIZE as u64) as usize))
    }

    fn page_entries(&mut self, page: usize) -> Result<&[TileEntry], ChannelError> {
        self.load_page(page)?;
        match self.pages.get(page) {
            Some(Some(p)) => Ok(&p.entries),
            _ => Err(ChannelError::CorruptDirectory(format!(
                "page {page} missing after load"
            ))),
        }
    }

    /// Number of entries stored in `page` (the last page may be short).
    fn entries_in_page(&self, page: usize) -> usize {
        let first = page as u64 * PAGE_SIZE as u64;
        (self.tile_count - first).min(PAGE_SIZE as u64) as usize
    }

    fn page_offset(&self, page: usize) -> u64 {
        self.base_offset + (page * PAGE_SIZE * ENTRY_SIZE) as u64
    }

    /// Read `page` from the store unless it is already loaded.
    fn load_page(&mut self, page: usize) -> Result<(), ChannelError> {
        if matches!(self.pages.get(page), Some(Some(_))) {
            return Ok(());
        }

        let count = self.entries_in_page(page);
        let offset = self.page_offset(page);
        let bytes = self.store.read_exact_at(offset, count * ENTRY_SIZE)?;
        if bytes.len() != count * ENTRY_SIZE {
            return Err(IoError::ShortRead {
                offset,
                expected: (count * ENTRY_SIZE) as u64,
                actual: bytes.len() as u64,
            }
            .into());
        }

        let order = self.byte_order;
        let entries = bytes
            .chunks_exact(ENTRY_SIZE)
            .map(|raw| TileEntry {
                offset: order.read_u64(&raw[0..8]),
                size: order.read_i32(&raw[8..12]),
            })
            .collect();

        debug!(
            store = self.store.identifier(),
            page, entries = count, "Loaded tile directory page"
        );

        self.pages[page] = Some(DirectoryPage {
            entries,
            dirty: false,
        });
        Ok(())
    }

    /// Serialize `page` back to its slot in the store and mark it clean.
    fn save_page(&mut self, page: usize) -> Result<(), ChannelError> {
        let offset = self.page_offset(page);
        let order = self.byte_order;

        let Some(Some(p)) = self.pages.get_mut(page) else {
            return Ok(());
        };

        let mut raw = vec![0u8; p.entries.len() * ENTRY_SIZE];
        for (entry, out) in p.entries.iter().zip(raw.chunks_exact_mut(ENTRY_SIZE)) {
            order.write_u64(&mut out[0..8], entry.offset);
            order.write_i32(&mut out[8..12], entry.size);
        }

        self.store.write_all_at(offset, &raw)?;
        p.dirty = false;

        debug!(
            store = self.store.identifier(),
            page, "Saved tile directory page"
        );
        Ok(())
    }
}
