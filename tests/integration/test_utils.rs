//! Test utilities for integration tests.
//!
//! This module provides a store that records every request, fixture
//! builders for tiled segments, and an in-memory external image.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use image::{GrayImage, Luma};
use parking_lot::Mutex;

use chanstore::error::IoError;
use chanstore::{
    create_segment, Access, ByteStore, ChannelCore, ExternalImage, ExternalOpener, MemoryStore,
    PixelType, SegmentParams, TiledChannel,
};

// =============================================================================
// Tracking Store
// =============================================================================

/// A memory store that logs every read and write request.
pub struct TrackingStore {
    inner: MemoryStore,
    reads: Mutex<Vec<(u64, usize)>>,
    writes: Mutex<Vec<(u64, usize)>>,
}

impl TrackingStore {
    pub fn new(identifier: &str) -> Self {
        Self {
            inner: MemoryStore::new(identifier),
            reads: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// `(offset, len)` of every read since the last reset.
    pub fn reads(&self) -> Vec<(u64, usize)> {
        self.reads.lock().clone()
    }

    /// `(offset, len)` of every write since the last reset.
    pub fn writes(&self) -> Vec<(u64, usize)> {
        self.writes.lock().clone()
    }

    pub fn reset_tracking(&self) {
        self.reads.lock().clear();
        self.writes.lock().clear();
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.inner.to_vec()
    }
}

impl ByteStore for TrackingStore {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.reads.lock().push((offset, len));
        self.inner.read_exact_at(offset, len)
    }

    fn write_all_at(&self, offset: u64, bytes: &[u8]) -> Result<(), IoError> {
        self.writes.lock().push((offset, bytes.len()));
        self.inner.write_all_at(offset, bytes)
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}

// =============================================================================
// Segment Fixtures
// =============================================================================

/// Create a segment in a fresh tracking store and open it for update.
pub fn create_tiled(params: &SegmentParams) -> (Arc<TrackingStore>, TiledChannel) {
    let store = Arc::new(TrackingStore::new("mem://segment"));
    create_segment(store.as_ref(), params).unwrap();

    let core = ChannelCore::new(1, params.width, params.height, params.pixel_type)
        .with_access(Access::Update);
    let channel = TiledChannel::open(core, store.clone()).unwrap();
    store.reset_tracking();
    (store, channel)
}

/// Create a segment in a fresh memory store.
pub fn create_memory_segment(params: &SegmentParams) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new("mem://overview"));
    create_segment(store.as_ref(), params).unwrap();
    store
}

/// A block of pseudo-random bytes that RLE cannot shrink.
pub fn noise_block(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xFF) as u8
        })
        .collect()
}

/// A block of long horizontal runs.
pub fn striped_block(width: usize, height: usize) -> Vec<u8> {
    (0..height)
        .flat_map(|y| std::iter::repeat((y / 4 * 17) as u8).take(width))
        .collect()
}

/// A smooth 8-bit gradient, friendly to JPEG.
pub fn gradient_block(width: u32, height: u32) -> Vec<u8> {
    let img = GrayImage::from_fn(width, height, |x, y| {
        Luma([((x + y) * 255 / (width + height - 2).max(1)) as u8])
    });
    img.into_raw()
}

/// Mean absolute difference between two equally sized blocks.
pub fn mean_abs_diff(a: &[u8], b: &[u8]) -> f64 {
    assert_eq!(a.len(), b.len());
    let total: u64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| (*x as i32 - *y as i32).unsigned_abs() as u64)
        .sum();
    total as f64 / a.len() as f64
}

// =============================================================================
// Mock External Image
// =============================================================================

/// Single-channel U8 image held in memory, pixel (x, y) = `(x * 3 + y * 7) % 256`.
pub struct MockImage {
    width: u32,
    height: u32,
    block: u32,
    pixels: Vec<u8>,
    fail_reads: bool,
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl MockImage {
    pub fn pixel(x: u32, y: u32) -> u8 {
        ((x * 3 + y * 7) % 256) as u8
    }

    fn origin(&self, index: u64) -> (u32, u32) {
        let per_row = self.width.div_ceil(self.block) as u64;
        (
            (index % per_row) as u32 * self.block,
            (index / per_row) as u32 * self.block,
        )
    }
}

impl ExternalImage for MockImage {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn channel_count(&self) -> u32 {
        1
    }

    fn block_width(&self, _channel: u32) -> u32 {
        self.block
    }

    fn block_height(&self, _channel: u32) -> u32 {
        self.block
    }

    fn pixel_type(&self, _channel: u32) -> PixelType {
        PixelType::U8
    }

    fn read_block(&mut self, _channel: u32, index: u64, buffer: &mut [u8]) -> Result<(), IoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads {
            return Err(IoError::External(format!("block {index} unreadable")));
        }
        let (ox, oy) = self.origin(index);
        for y in 0..self.block {
            for x in 0..self.block {
                let (px, py) = (ox + x, oy + y);
                buffer[(y * self.block + x) as usize] = if px < self.width && py < self.height {
                    self.pixels[(py * self.width + px) as usize]
                } else {
                    0
                };
            }
        }
        Ok(())
    }

    fn write_block(&mut self, _channel: u32, index: u64, buffer: &[u8]) -> Result<(), IoError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let (ox, oy) = self.origin(index);
        for y in 0..self.block {
            for x in 0..self.block {
                let (px, py) = (ox + x, oy + y);
                if px < self.width && py < self.height {
                    self.pixels[(py * self.width + px) as usize] =
                        buffer[(y * self.block + x) as usize];
                }
            }
        }
        Ok(())
    }
}

/// Opens [`MockImage`]s of a fixed size, counting opens and block I/O.
pub struct MockOpener {
    pub width: u32,
    pub height: u32,
    pub block: u32,
    pub fail_reads: bool,
    pub opens: Arc<AtomicUsize>,
    pub reads: Arc<AtomicUsize>,
    pub writes: Arc<AtomicUsize>,
}

impl MockOpener {
    pub fn new(width: u32, height: u32, block: u32) -> Self {
        Self {
            width,
            height,
            block,
            fail_reads: false,
            opens: Arc::new(AtomicUsize::new(0)),
            reads: Arc::new(AtomicUsize::new(0)),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockOpener {
    /// Images whose block reads always fail.
    pub fn with_failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }
}

impl ExternalOpener for MockOpener {
    fn open(&self, filename: &str, _access: Access) -> Result<Box<dyn ExternalImage>, IoError> {
        if !filename.ends_with(".pix") {
            return Err(IoError::NotFound(filename.to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);

        let pixels = (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| MockImage::pixel(x, y)))
            .collect();

        Ok(Box::new(MockImage {
            width: self.width,
            height: self.height,
            block: self.block,
            pixels,
            fail_reads: self.fail_reads,
            reads: self.reads.clone(),
            writes: self.writes.clone(),
        }))
    }
}
