use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use super::store::{Access, ByteStore};
use crate::error::IoError;

/// File-backed implementation of ByteStore.
///
/// Positioned reads and writes go through a single file handle guarded by
/// a mutex, so one `FileStore` can be shared by every channel that lives
/// in the same file.
pub struct FileStore {
    file: Mutex<File>,
    path: PathBuf,
    size: AtomicU64,
    writable: AtomicBool,
    identifier: String,
}

impl FileStore {
    /// Open an existing file.
    ///
    /// `Access::Update` opens the file for reading and writing.
    pub fn open(path: impl AsRef<Path>, access: Access) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let identifier = path.display().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(access.is_writable())
            .open(&path)
            .map_err(|e| IoError::file(identifier.clone(), e))?;

        Self::from_file(file, path, identifier, access)
    }

    /// Create (or truncate) a file for reading and writing.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path = path.as_ref().to_path_buf();
        let identifier = path.display().to_string();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| IoError::file(identifier.clone(), e))?;

        Self::from_file(file, path, identifier, Access::Update)
    }

    fn from_file(
        file: File,
        path: PathBuf,
        identifier: String,
        access: Access,
    ) -> Result<Self, IoError> {
        let size = file
            .metadata()
            .map_err(|e| IoError::file(identifier.clone(), e))?
            .len();

        Ok(Self {
            file: Mutex::new(file),
            path,
            size: AtomicU64::new(size),
            writable: AtomicBool::new(access.is_writable()),
            identifier,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Access mode of the current file handle.
    pub fn access(&self) -> Access {
        if self.writable.load(Ordering::SeqCst) {
            Access::Update
        } else {
            Access::ReadOnly
        }
    }

    /// Reopen the file for reading and writing, keeping this store.
    ///
    /// No-op if the store is already writable.
    pub fn upgrade_to_update(&self) -> Result<(), IoError> {
        let mut file = self.file.lock();
        if self.writable.load(Ordering::SeqCst) {
            return Ok(());
        }

        *file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| IoError::file(self.identifier.clone(), e))?;
        self.writable.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl ByteStore for FileStore {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let size = self.size();
        if offset + len as u64 > size {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            });
        }

        let mut buffer = vec![0u8; len];
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| IoError::file(self.identifier.clone(), e))?;

        let mut filled = 0;
        while filled < len {
            match file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(IoError::file(self.identifier.clone(), e)),
            }
        }

        if filled < len {
            return Err(IoError::ShortRead {
                offset,
                expected: len as u64,
                actual: filled as u64,
            });
        }

        Ok(Bytes::from(buffer))
    }

    fn write_all_at(&self, offset: u64, data: &[u8]) -> Result<(), IoError> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| IoError::file(self.identifier.clone(), e))?;
        file.write_all(data)
            .map_err(|e| IoError::file(self.identifier.clone(), e))?;

        self.size
            .fetch_max(offset + data.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn flush(&self) -> Result<(), IoError> {
        self.file
            .lock()
            .flush()
            .map_err(|e| IoError::file(self.identifier.clone(), e))
    }
}
