//! Channel backed by a channel of an external database image.
//!
//! The channel presents a crop `(exoff, eyoff, exsize, eysize)` of one
//! channel of the external image, using the image's own block size. Each
//! destination block is composed from every source block it overlaps.
//!
//! Images are opened through an [`ExternalOpener`] and shared between
//! channels via [`ExternalDatabases`], which hands out one
//! [`ExternalHandle`] per filename. The first channel mapping a file opens
//! it; later channels reuse the handle. The handle serializes access to
//! the image with a mutex.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use super::core::{alloc_block, copy_window, ChannelCore};
use super::pixel::PixelType;
use super::{Channel, Window};
use crate::error::{ChannelError, IoError};
use crate::io::Access;

/// Default number of source blocks cached per external channel.
pub const DEFAULT_EXTERNAL_CACHE_BLOCKS: usize = 16;

// =============================================================================
// External Image Traits
// =============================================================================

/// An opened external database image.
///
/// Channel numbers are 1-based. Block data is exchanged in host byte order,
/// one full block of `block_width * block_height` pixels at a time.
pub trait ExternalImage: Send {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn channel_count(&self) -> u32;

    fn block_width(&self, channel: u32) -> u32;

    fn block_height(&self, channel: u32) -> u32;

    fn pixel_type(&self, channel: u32) -> PixelType;

    fn read_block(&mut self, channel: u32, block_index: u64, buffer: &mut [u8])
        -> Result<(), IoError>;

    fn write_block(&mut self, channel: u32, block_index: u64, buffer: &[u8])
        -> Result<(), IoError>;
}

/// Opens external images by filename.
pub trait ExternalOpener: Send + Sync {
    fn open(&self, filename: &str, access: Access) -> Result<Box<dyn ExternalImage>, IoError>;
}

// =============================================================================
// Handle Registry
// =============================================================================

/// A shared, lock-guarded external image.
pub struct ExternalHandle {
    filename: String,
    writable: AtomicBool,
    image: Mutex<Box<dyn ExternalImage>>,
}

impl ExternalHandle {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn access(&self) -> Access {
        if self.writable.load(Ordering::SeqCst) {
            Access::Update
        } else {
            Access::ReadOnly
        }
    }

    /// Lock the image for exclusive use.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn ExternalImage>> {
        self.image.lock()
    }
}

/// Registry of open external images, one handle per filename.
pub struct ExternalDatabases {
    opener: Arc<dyn ExternalOpener>,
    handles: Mutex<HashMap<String, Arc<ExternalHandle>>>,
    opens: AtomicUsize,
}

impl ExternalDatabases {
    pub fn new(opener: Arc<dyn ExternalOpener>) -> Self {
        Self {
            opener,
            handles: Mutex::new(HashMap::new()),
            opens: AtomicUsize::new(0),
        }
    }

    /// Return the handle for `filename`, opening the image if needed.
    ///
    /// The registry lock is held while opening, so concurrent first
    /// accesses share one handle. When update access is requested on a
    /// read-only handle, the image is reopened for update inside that same
    /// handle, so every channel holding it sees the writable image.
    pub fn get_or_open(&self, filename: &str, access: Access) -> Result<Arc<ExternalHandle>, IoError> {
        let mut handles = self.handles.lock();

        if let Some(handle) = handles.get(filename) {
            if access.is_writable() && !handle.access().is_writable() {
                let image = self.opener.open(filename, access)?;
                self.opens.fetch_add(1, Ordering::SeqCst);
                *handle.image.lock() = image;
                handle.writable.store(true, Ordering::SeqCst);
                debug!(filename, "Reopened external image for update");
            }
            return Ok(Arc::clone(handle));
        }

        let image = self.opener.open(filename, access)?;
        self.opens.fetch_add(1, Ordering::SeqCst);

        debug!(filename, ?access, "Opened external image");

        let handle = Arc::new(ExternalHandle {
            filename: filename.to_string(),
            writable: AtomicBool::new(access.is_writable()),
            image: Mutex::new(image),
        });
        handles.insert(filename.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Number of images opened so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of handles currently registered.
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// ExternalChannel
// =============================================================================

/// Which external channel, and which part of it, a channel presents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalMapping {
    pub filename: String,
    /// 1-based channel of the external image
    pub echannel: u32,
    pub exoff: u32,
    pub eyoff: u32,
    /// Crop width; 0 extends to the right edge of the image
    pub exsize: u32,
    /// Crop height; 0 extends to the bottom of the image
    pub eysize: u32,
}

impl ExternalMapping {
    /// Map the whole of `echannel`.
    pub fn new(filename: impl Into<String>, echannel: u32) -> Self {
        Self {
            filename: filename.into(),
            echannel,
            exoff: 0,
            eyoff: 0,
            exsize: 0,
            eysize: 0,
        }
    }

    /// Restrict the mapping to a crop of the external channel.
    pub fn with_window(mut self, exoff: u32, eyoff: u32, exsize: u32, eysize: u32) -> Self {
        self.exoff = exoff;
        self.eyoff = eyoff;
        self.exsize = exsize;
        self.eysize = eysize;
        self
    }
}

/// Source geometry and resolved crop of an open mapping.
#[derive(Clone)]
struct Connection {
    handle: Arc<ExternalHandle>,
    pixel_type: PixelType,
    block_width: u64,
    block_height: u64,
    /// Source blocks across
    source_blocks_per_row: u64,
    exoff: u64,
    eyoff: u64,
    exsize: u64,
    eysize: u64,
}

impl Connection {
    /// Open (or reuse) the image `mapping` names and resolve its crop.
    fn open(
        databases: &ExternalDatabases,
        mapping: &ExternalMapping,
        access: Access,
    ) -> Result<Self, ChannelError> {
        let m = mapping;
        let handle = databases.get_or_open(&m.filename, access)?;

        let (width, height, block_width, block_height, pixel_type) = {
            let image = handle.lock();
            let count = image.channel_count();
            if m.echannel == 0 || m.echannel > count {
                return Err(ChannelError::InvalidArgument(format!(
                    "external channel {} out of range (1..={}) in {}",
                    m.echannel, count, m.filename
                )));
            }
            (
                image.width() as u64,
                image.height() as u64,
                image.block_width(m.echannel),
                image.block_height(m.echannel),
                image.pixel_type(m.echannel),
            )
        };

        if block_width == 0 || block_height == 0 {
            return Err(ChannelError::InvalidArgument(format!(
                "external channel {} has a {}x{} block size",
                m.echannel, block_width, block_height
            )));
        }

        let exoff = m.exoff as u64;
        let eyoff = m.eyoff as u64;
        let exsize = if m.exsize == 0 { width.saturating_sub(exoff) } else { m.exsize as u64 };
        let eysize = if m.eysize == 0 { height.saturating_sub(eyoff) } else { m.eysize as u64 };
        if exsize == 0 || eysize == 0 || exoff + exsize > width || eyoff + eysize > height {
            return Err(ChannelError::InvalidArgument(format!(
                "window {}x{}+{}+{} outside {}x{} external image",
                exsize, eysize, exoff, eyoff, width, height
            )));
        }

        Ok(Self {
            handle,
            pixel_type,
            block_width: block_width as u64,
            block_height: block_height as u64,
            source_blocks_per_row: width.div_ceil(block_width as u64),
            exoff,
            eyoff,
            exsize,
            eysize,
        })
    }

    /// Give `core` the crop size, source block size and pixel type.
    fn apply(&self, core: &mut ChannelCore) {
        core.set_geometry(
            self.exsize as u32,
            self.eysize as u32,
            self.block_width as u32,
            self.block_height as u32,
        );
        core.set_pixel_type(self.pixel_type);
    }
}

/// Rectangle of a destination block in source image coordinates.
#[derive(Debug, Clone, Copy)]
struct SourceRect {
    x: u64,
    y: u64,
    width: u64,
    height: u64,
}

/// A channel presenting a crop of an external image channel.
pub struct ExternalChannel {
    core: ChannelCore,
    databases: Arc<ExternalDatabases>,
    mapping: ExternalMapping,
    connection: Connection,
    cache: LruCache<u64, Bytes>,
}

impl ExternalChannel {
    /// Open a channel for `mapping`.
    ///
    /// Geometry and pixel type in `core` are replaced by the crop's.
    pub fn open(
        core: ChannelCore,
        databases: Arc<ExternalDatabases>,
        mapping: ExternalMapping,
    ) -> Result<Self, ChannelError> {
        Self::open_with_cache(core, databases, mapping, DEFAULT_EXTERNAL_CACHE_BLOCKS)
    }

    /// Open a channel caching up to `cache_blocks` source blocks.
    pub fn open_with_cache(
        mut core: ChannelCore,
        databases: Arc<ExternalDatabases>,
        mapping: ExternalMapping,
        cache_blocks: usize,
    ) -> Result<Self, ChannelError> {
        let connection = Connection::open(&databases, &mapping, core.access())?;
        connection.apply(&mut core);

        let capacity = NonZeroUsize::new(cache_blocks).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            core,
            databases,
            mapping,
            connection,
            cache: LruCache::new(capacity),
        })
    }

    /// The current mapping.
    pub fn echan_info(&self) -> &ExternalMapping {
        &self.mapping
    }

    /// Repoint the channel at a new external image or crop.
    ///
    /// The new mapping is resolved before anything is replaced, so a
    /// failure leaves the channel on its previous mapping. Cached source
    /// blocks are dropped.
    pub fn set_echan_info(&mut self, mapping: ExternalMapping) -> Result<(), ChannelError> {
        self.core.check_writable()?;
        let connection = Connection::open(&self.databases, &mapping, self.core.access())?;

        debug!(
            channel = self.core.channel_number(),
            filename = %mapping.filename,
            echannel = mapping.echannel,
            "Repointed external channel"
        );

        connection.apply(&mut self.core);
        self.mapping = mapping;
        self.connection = connection;
        self.cache.clear();
        Ok(())
    }

    /// The shared external image handle.
    pub fn access_db(&self) -> Arc<ExternalHandle> {
        Arc::clone(&self.connection.handle)
    }

    /// Number of source blocks currently cached.
    pub fn cached_blocks(&self) -> usize {
        self.cache.len()
    }

    /// Source-image rectangle covered by destination block `block_index`,
    /// clipped to the crop.
    fn source_rect(&self, conn: &Connection, block_index: u64) -> SourceRect {
        let per_row = self.core.blocks_per_row();
        let x0 = (block_index % per_row) * conn.block_width;
        let y0 = (block_index / per_row) * conn.block_height;
        SourceRect {
            x: conn.exoff + x0,
            y: conn.eyoff + y0,
            width: conn.block_width.min(conn.exsize - x0),
            height: conn.block_height.min(conn.eysize - y0),
        }
    }

    /// Visit every source block overlapping `rect`.
    ///
    /// The callback receives the source block index, the overlap in source
    /// coordinates as `(x0, x1, y0, y1)`, and the block's origin.
    fn for_each_source_block<F>(conn: &Connection, rect: SourceRect, mut visit: F) -> Result<(), ChannelError>
    where
        F: FnMut(u64, (u64, u64, u64, u64), (u64, u64)) -> Result<(), ChannelError>,
    {
        let (bw, bh) = (conn.block_width, conn.block_height);
        for sby in rect.y / bh..=(rect.y + rect.height - 1) / bh {
            for sbx in rect.x / bw..=(rect.x + rect.width - 1) / bw {
                let origin = (sbx * bw, sby * bh);
                let overlap = (
                    rect.x.max(origin.0),
                    (rect.x + rect.width).min(origin.0 + bw),
                    rect.y.max(origin.1),
                    (rect.y + rect.height).min(origin.1 + bh),
                );
                visit(sby * conn.source_blocks_per_row + sbx, overlap, origin)?;
            }
        }
        Ok(())
    }

    /// Fetch a source block through the cache.
    fn source_block(&mut self, conn: &Connection, index: u64) -> Result<Bytes, ChannelError> {
        if let Some(data) = self.cache.get(&index) {
            return Ok(data.clone());
        }

        let mut buf = alloc_block(self.core.block_byte_len())?;
        conn.handle
            .lock()
            .read_block(self.mapping.echannel, index, &mut buf)?;

        let data = Bytes::from(buf);
        self.cache.put(index, data.clone());
        Ok(data)
    }

    /// Assemble destination block `block_index` into `block`.
    fn compose(&mut self, conn: &Connection, block_index: u64, block: &mut [u8]) -> Result<(), ChannelError> {
        let rect = self.source_rect(conn, block_index);
        let ps = self.core.pixel_type().size() as u64;
        let bw = conn.block_width;

        let mut sources = Vec::new();
        Self::for_each_source_block(conn, rect, |index, overlap, origin| {
            sources.push((index, overlap, origin));
            Ok(())
        })?;

        for (index, (x0, x1, y0, y1), (ox, oy)) in sources {
            let data = self.source_block(conn, index)?;
            let len = ((x1 - x0) * ps) as usize;
            for y in y0..y1 {
                let src = (((y - oy) * bw + (x0 - ox)) * ps) as usize;
                let dst = (((y - rect.y) * bw + (x0 - rect.x)) * ps) as usize;
                block[dst..dst + len].copy_from_slice(&data[src..src + len]);
            }
        }
        Ok(())
    }

    fn read_into(
        &mut self,
        conn: &Connection,
        block_index: u64,
        window: &super::BlockWindow,
        out: &mut [u8],
    ) -> Result<(), ChannelError> {
        let bw = self.core.block_width() as usize;
        let bh = self.core.block_height() as usize;

        if window.is_full(bw, bh) {
            out.fill(0);
            return self.compose(conn, block_index, out);
        }

        let mut block = alloc_block(self.core.block_byte_len())?;
        self.compose(conn, block_index, &mut block)?;
        copy_window(&block, bw, self.core.pixel_type().size(), window, out);
        Ok(())
    }
}

impl Channel for ExternalChannel {
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
        let conn = self.connection.clone();
        let result = self.core.resolve_window(window).and_then(|resolved| {
            let len = self.core.check_buffer(buffer.len(), &resolved)?;
            self.core.check_block_index(block_index)?;
            self.read_into(&conn, block_index, &resolved, &mut buffer[..len])?;
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
        let conn = self.connection.clone();

        let len = self.core.block_byte_len();
        if buffer.len() < len {
            return Err(ChannelError::InvalidArgument(format!(
                "buffer of {} bytes too small for {} byte block",
                buffer.len(),
                len
            )));
        }

        let echannel = self.mapping.echannel;
        let rect = self.source_rect(&conn, block_index);
        let (bw, bh) = (conn.block_width, conn.block_height);
        let aligned = rect.x % bw == 0 && rect.y % bh == 0 && rect.width == bw && rect.height == bh;

        if aligned {
            let index = (rect.y / bh) * conn.source_blocks_per_row + rect.x / bw;
            conn.handle.lock().write_block(echannel, index, &buffer[..len])?;
            self.cache.pop(&index);
            return Ok(len);
        }

        let ps = self.core.pixel_type().size() as u64;
        let cache = &mut self.cache;
        Self::for_each_source_block(&conn, rect, |index, (x0, x1, y0, y1), (ox, oy)| {
            let mut image = conn.handle.lock();
            let mut source = alloc_block(len)?;
            image.read_block(echannel, index, &mut source)?;

            let row = ((x1 - x0) * ps) as usize;
            for y in y0..y1 {
                let dst = (((y - oy) * bw + (x0 - ox)) * ps) as usize;
                let src = (((y - rect.y) * bw + (x0 - rect.x)) * ps) as usize;
                source[dst..dst + row].copy_from_slice(&buffer[src..src + row]);
            }

            image.write_block(echannel, index, &source)?;
            cache.pop(&index);
            Ok(())
        })?;

        Ok(len)
    }
}
