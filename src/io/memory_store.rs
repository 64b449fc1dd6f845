use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::RwLock;

use super::store::ByteStore;
use crate::error::IoError;

/// In-memory implementation of ByteStore.
///
/// Used for scratch segments and for tests. Read and write calls are
/// counted so callers can verify which operations actually touched the
/// store.
pub struct MemoryStore {
    data: RwLock<Vec<u8>>,
    identifier: String,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self::with_data(identifier, Vec::new())
    }

    /// Create a store holding `data`.
    pub fn with_data(identifier: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
            identifier: identifier.into(),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Copy of the current contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Number of `read_exact_at` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of `write_all_at` calls served so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Reset the read/write counters.
    pub fn reset_counts(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }
}

impl ByteStore for MemoryStore {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let data = self.data.read();
        if offset + len as u64 > data.len() as u64 {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size: data.len() as u64,
            });
        }

        let start = offset as usize;
        Ok(Bytes::copy_from_slice(&data[start..start + len]))
    }

    fn write_all_at(&self, offset: u64, bytes: &[u8]) -> Result<(), IoError> {
        self.writes.fetch_add(1, Ordering::SeqCst);

        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.data.read().len() as u64
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}
