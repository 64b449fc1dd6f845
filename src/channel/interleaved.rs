//! Channel over raw pixel-interleaved bytes.
//!
//! Pixel `(x, y)` lives at `start_byte + x * pixel_offset + y * line_offset`
//! in either the container store or a separate raw file. Blocks are
//! scanlines: one block per image row.

use std::sync::Arc;

use tracing::debug;

use super::core::{alloc_block, BlockWindow, ChannelCore};
use super::{Channel, Window};
use crate::error::ChannelError;
use crate::io::{swap_words, Access, ByteOrder, ByteStore, FileStore};

/// Location and interleaving of a band's pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLayout {
    /// Raw file holding the pixels; empty means the container store
    pub filename: String,
    /// Offset of pixel (0, 0)
    pub start_byte: u64,
    /// Distance between horizontally adjacent pixels
    pub pixel_offset: u64,
    /// Distance between vertically adjacent pixels
    pub line_offset: u64,
    /// Byte order of stored pixels
    pub little_endian: bool,
}

impl RawLayout {
    /// Big-endian layout inside the container store.
    pub fn new(start_byte: u64, pixel_offset: u64, line_offset: u64) -> Self {
        Self {
            filename: String::new(),
            start_byte,
            pixel_offset,
            line_offset,
            little_endian: false,
        }
    }

    /// Store pixels in a separate raw file.
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    pub fn with_little_endian(mut self, little_endian: bool) -> Self {
        self.little_endian = little_endian;
        self
    }

    pub fn byte_order(&self) -> ByteOrder {
        if self.little_endian {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }
}

/// A channel whose scanlines are read directly from interleaved raw bytes.
pub struct BandInterleavedChannel {
    core: ChannelCore,
    container: Arc<dyn ByteStore>,
    layout: RawLayout,
    /// Store the layout currently points at
    store: Arc<dyn ByteStore>,
}

impl BandInterleavedChannel {
    /// Bind a channel to `layout`, opening its raw file if it names one.
    ///
    /// The block size is forced to one scanline.
    pub fn new(
        core: ChannelCore,
        container: Arc<dyn ByteStore>,
        layout: RawLayout,
    ) -> Result<Self, ChannelError> {
        let width = core.width();
        let height = core.height();
        let mut core = core.with_block_size(width, 1);

        validate_layout(&layout, &core)?;
        let store = resolve_store(&container, &layout, core.access())?;
        core.set_byte_order(layout.byte_order());

        Ok(Self {
            core,
            container,
            layout,
            store,
        })
    }

    /// The current layout descriptor.
    pub fn chan_info(&self) -> &RawLayout {
        &self.layout
    }

    /// Repoint the channel at a new layout.
    ///
    /// The new backing file is opened before anything is replaced, so a
    /// failure leaves the channel on its previous layout.
    pub fn set_chan_info(&mut self, layout: RawLayout) -> Result<(), ChannelError> {
        self.core.check_writable()?;
        validate_layout(&layout, &self.core)?;

        let store = resolve_store(&self.container, &layout, self.core.access())?;

        debug!(
            channel = self.core.channel_number(),
            filename = %layout.filename,
            start_byte = layout.start_byte,
            pixel_offset = layout.pixel_offset,
            line_offset = layout.line_offset,
            "Repointed band-interleaved channel"
        );

        self.core.set_byte_order(layout.byte_order());
        self.store = store;
        self.layout = layout;
        Ok(())
    }

    /// Offset of pixel `(x, line)`.
    fn pixel_address(&self, x: usize, line: u64) -> u64 {
        self.layout.start_byte + x as u64 * self.layout.pixel_offset + line * self.layout.line_offset
    }

    /// Bytes spanned by `count` pixels starting at one pixel.
    fn span_len(&self, count: usize) -> usize {
        (count - 1) * self.layout.pixel_offset as usize + self.core.pixel_type().size()
    }

    fn is_packed(&self) -> bool {
        self.layout.pixel_offset as usize == self.core.pixel_type().size()
    }

    fn read_rows(
        &self,
        block_index: u64,
        window: &BlockWindow,
        out: &mut [u8],
    ) -> Result<(), ChannelError> {
        let pixel_size = self.core.pixel_type().size();
        let stride = self.layout.pixel_offset as usize;
        let row_len = window.xsize * pixel_size;

        for row in 0..window.ysize {
            let line = block_index * self.core.block_height() as u64 + (window.yoff + row) as u64;
            let address = self.pixel_address(window.xoff, line);
            let dst = &mut out[row * row_len..(row + 1) * row_len];

            if self.is_packed() {
                let data = self.store.read_exact_at(address, row_len)?;
                dst.copy_from_slice(&data);
            } else {
                let data = self.store.read_exact_at(address, self.span_len(window.xsize))?;
                for (i, pixel) in dst.chunks_exact_mut(pixel_size).enumerate() {
                    let src = i * stride;
                    pixel.copy_from_slice(&data[src..src + pixel_size]);
                }
            }
        }

        if self.core.needs_byte_swap() {
            swap_words(out, self.core.pixel_type().word_size());
        }
        Ok(())
    }

    /// Read `len` bytes at `offset`, zero-filling whatever lies past the end.
    fn read_existing(&self, offset: u64, len: usize) -> Result<Vec<u8>, ChannelError> {
        let mut span = alloc_block(len)?;
        let size = self.store.size();
        if offset < size {
            let available = ((size - offset) as usize).min(len);
            let data = self.store.read_exact_at(offset, available)?;
            span[..available].copy_from_slice(&data);
        }
        Ok(span)
    }
}

fn validate_layout(layout: &RawLayout, core: &ChannelCore) -> Result<(), ChannelError> {
    let pixel_size = core.pixel_type().size() as u64;
    if layout.pixel_offset < pixel_size {
        return Err(ChannelError::InvalidArgument(format!(
            "pixel offset {} smaller than {} byte pixels",
            layout.pixel_offset, pixel_size
        )));
    }

    let row_span = (core.width().max(1) as u64 - 1) * layout.pixel_offset + pixel_size;
    if core.height() > 1 && layout.line_offset < row_span {
        return Err(ChannelError::InvalidArgument(format!(
            "line offset {} overlaps {} byte rows",
            layout.line_offset, row_span
        )));
    }
    Ok(())
}

fn resolve_store(
    container: &Arc<dyn ByteStore>,
    layout: &RawLayout,
    access: Access,
) -> Result<Arc<dyn ByteStore>, ChannelError> {
    if layout.filename.is_empty() {
        return Ok(Arc::clone(container));
    }
    Ok(Arc::new(FileStore::open(&layout.filename, access)?))
}

impl Channel for BandInterleavedChannel {
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
        let result = self.core.resolve_window(window).and_then(|resolved| {
            let len = self.core.check_buffer(buffer.len(), &resolved)?;
            self.core.check_block_index(block_index)?;
            self.read_rows(block_index, &resolved, &mut buffer[..len])?;
            Ok(len)
        });

        if result.is_err() {
            self.core.clear_requested(buffer, window);
        }
        result
    }

    fn write_block(&mut self, block_index: u64, buffer: &[u8]) -> Result<usize, ChannelError> {
        self.core.check_writable()?;
        self.core.check_block_index(block_index)?;

        let len = self.core.block_byte_len();
        if buffer.len() < len {
            return Err(ChannelError::InvalidArgument(format!(
                "buffer of {} bytes too small for {} byte block",
                buffer.len(),
                len
            )));
        }

        let pixel_size = self.core.pixel_type().size();
        let width = self.core.block_width() as usize;
        let row_len = width * pixel_size;
        let mut rows = alloc_block(len)?;
        rows.copy_from_slice(&buffer[..len]);
        if self.core.needs_byte_swap() {
            swap_words(&mut rows, self.core.pixel_type().word_size());
        }

        let stride = self.layout.pixel_offset as usize;
        for (row, pixels) in rows.chunks_exact(row_len).enumerate() {
            let line = block_index * self.core.block_height() as u64 + row as u64;
            let address = self.pixel_address(0, line);

            if self.is_packed() {
                self.store.write_all_at(address, pixels)?;
            } else {
                // Other bands' bytes sit between our pixels
                let mut span = self.read_existing(address, self.span_len(width))?;
                for (i, pixel) in pixels.chunks_exact(pixel_size).enumerate() {
                    let dst = i * stride;
                    span[dst..dst + pixel_size].copy_from_slice(pixel);
                }
                self.store.write_all_at(address, &span)?;
            }
        }

        Ok(len)
    }

    fn synchronize(&mut self) -> Result<(), ChannelError> {
        self.store.flush()?;
        Ok(())
    }
}
