use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use super::file_store::FileStore;
use super::memory_store::MemoryStore;
use super::store::{Access, ByteStore};
use crate::error::IoError;

/// Trait for opening the store that backs a numbered segment.
///
/// Overview references name the segment holding the reduced-resolution
/// copy; a channel resolves them through its source so it never needs
/// to know how the owning container lays segments out.
pub trait SegmentSource: Send + Sync {
    /// Open the store for `segment`.
    ///
    /// Returns `IoError::NotFound` if the segment does not exist.
    fn open_segment(&self, segment: u32, access: Access) -> Result<Arc<dyn ByteStore>, IoError>;
}

// =============================================================================
// Directory Source
// =============================================================================

/// Segments stored as individual files, `<root>/<segment>.seg`.
///
/// Opened stores are remembered so channels that reference the same
/// segment share one file handle. A store first opened read-only is
/// reopened for update in place when a writer asks for it.
pub struct DirectorySegmentSource {
    root: PathBuf,
    open: RwLock<HashMap<u32, Arc<FileStore>>>,
}

impl DirectorySegmentSource {
    /// Create a source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open: RwLock::new(HashMap::new()),
        }
    }

    /// Path of the file backing `segment`.
    pub fn segment_path(&self, segment: u32) -> PathBuf {
        self.root.join(format!("{segment}.seg"))
    }

    /// Create an empty file for `segment` and return its store.
    pub fn create_segment(&self, segment: u32) -> Result<Arc<FileStore>, IoError> {
        let store = Arc::new(FileStore::create(self.segment_path(segment))?);
        self.open.write().insert(segment, store.clone());
        Ok(store)
    }

    /// Root directory of this source.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SegmentSource for DirectorySegmentSource {
    fn open_segment(&self, segment: u32, access: Access) -> Result<Arc<dyn ByteStore>, IoError> {
        let cached = self.open.read().get(&segment).cloned();
        if let Some(store) = cached {
            if access.is_writable() {
                store.upgrade_to_update()?;
            }
            return Ok(store);
        }

        let mut open = self.open.write();
        if let Some(store) = open.get(&segment) {
            if access.is_writable() {
                store.upgrade_to_update()?;
            }
            return Ok(store.clone());
        }

        let store = Arc::new(FileStore::open(self.segment_path(segment), access)?);
        open.insert(segment, store.clone());
        Ok(store)
    }
}

// =============================================================================
// Memory Source
// =============================================================================

/// Segments held in memory, for scratch datasets and tests.
#[derive(Default)]
pub struct MemorySegmentSource {
    segments: RwLock<HashMap<u32, Arc<MemoryStore>>>,
}

impl MemorySegmentSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under `segment`, replacing any previous one.
    pub fn insert(&self, segment: u32, store: Arc<MemoryStore>) {
        self.segments.write().insert(segment, store);
    }

    /// Look up the store registered under `segment`.
    pub fn get(&self, segment: u32) -> Option<Arc<MemoryStore>> {
        self.segments.read().get(&segment).cloned()
    }

    /// Number of registered segments.
    pub fn len(&self) -> usize {
        self.segments.read().len()
    }

    /// Whether no segments are registered.
    pub fn is_empty(&self) -> bool {
        self.segments.read().is_empty()
    }
}

impl SegmentSource for MemorySegmentSource {
    fn open_segment(&self, segment: u32, _access: Access) -> Result<Arc<dyn ByteStore>, IoError> {
        self.segments
            .read()
            .get(&segment)
            .map(|store| store.clone() as Arc<dyn ByteStore>)
            .ok_or_else(|| IoError::NotFound(format!("segment {segment}")))
    }
}
