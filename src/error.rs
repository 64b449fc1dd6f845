use thiserror::Error;

/// I/O errors that can occur when reading from or writing to a backing store
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error reported by the operating system for a file-backed store
    #[error("File error on {path}: {message}")]
    File { path: String, message: String },

    /// The store returned fewer bytes than requested
    #[error("Short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Segment or file not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Error reported by an external database image
    #[error("External image error: {0}")]
    External(String),
}

impl IoError {
    /// Wrap a `std::io::Error` raised while accessing `path`.
    pub fn file(path: impl Into<String>, err: std::io::Error) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            return IoError::NotFound(path);
        }
        IoError::File {
            path,
            message: err.to_string(),
        }
    }
}

/// Errors that can occur when parsing a tiled segment header
#[derive(Debug, Clone, Error)]
pub enum LayoutError {
    /// Segment is too small to contain a header
    #[error("Segment too small: need at least {required} bytes, got {actual}")]
    SegmentTooSmall { required: u64, actual: u64 },

    /// Magic bytes do not identify a tiled segment
    #[error("Invalid segment magic: {0:02X?}")]
    InvalidMagic([u8; 8]),

    /// Unknown layout version
    #[error("Unsupported segment version: {0}")]
    UnsupportedVersion(u16),

    /// Byte order marker is neither II nor MM
    #[error("Invalid byte order marker: 0x{0:04X}")]
    InvalidByteOrder(u16),

    /// Pixel type tag is not recognized
    #[error("Unknown pixel type: {0:?}")]
    UnknownPixelType(String),

    /// A header field has an impossible value
    #[error("Invalid header field {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
}

/// Errors returned by channel operations
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// Bad block index, sub-window or buffer size
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Write attempted on a channel opened read-only
    #[error("Channel {channel} is read-only")]
    ReadOnlyViolation { channel: u32 },

    /// I/O error against the backing store
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Tile bytes could not be decoded into a block
    #[error("Corrupt tile {tile}: {reason}")]
    CorruptTile { tile: u64, reason: String },

    /// Tile directory or segment header is inconsistent
    #[error("Corrupt tile directory: {0}")]
    CorruptDirectory(String),

    /// Compression tag is not recognized or cannot be used here
    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// A block buffer could not be allocated
    #[error("Out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },
}

impl From<LayoutError> for ChannelError {
    fn from(err: LayoutError) -> Self {
        ChannelError::CorruptDirectory(err.to_string())
    }
}
