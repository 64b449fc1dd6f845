use bytes::Bytes;

use crate::error::IoError;

/// Access mode a store or channel was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Access {
    /// Reads only; every write is rejected
    #[default]
    ReadOnly,
    /// Reads and writes
    Update,
}

impl Access {
    /// Whether writes are allowed.
    #[inline]
    pub fn is_writable(self) -> bool {
        self == Access::Update
    }
}

/// Trait for positioned access to the bytes backing a channel.
///
/// This abstraction lets the tile directory, the tiled channel and the
/// band-interleaved channel work against a file, an in-memory buffer or
/// a segment of some larger container without knowing which. Stores are
/// shared between channels (a base channel and its overviews usually
/// live in the same container), so implementations serialize their own
/// I/O and take `&self`.
pub trait ByteStore: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Write all of `data` starting at `offset`, growing the store if needed.
    fn write_all_at(&self, offset: u64, data: &[u8]) -> Result<(), IoError>;

    /// Get the total size of the store in bytes.
    fn size(&self) -> u64;

    /// Get a unique identifier for this store (for logging and registries).
    fn identifier(&self) -> &str;

    /// Flush buffered writes to durable storage.
    fn flush(&self) -> Result<(), IoError> {
        Ok(())
    }
}

// =============================================================================
// Byte Order
// =============================================================================
//
// Segments declare the byte order of their multi-byte fields. Pixel data
// written by a channel whose byte order differs from the host must be
// swapped on the way in and out.

/// Byte order (endianness) of stored multi-byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian ("II" = Intel)
    LittleEndian,
    /// Big-endian ("MM" = Motorola)
    BigEndian,
}

impl ByteOrder {
    /// The byte order of the machine we are running on.
    #[inline]
    pub const fn host() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::LittleEndian
        } else {
            ByteOrder::BigEndian
        }
    }

    /// Whether values stored in this order must be swapped on this host.
    #[inline]
    pub fn needs_swap(self) -> bool {
        self != Self::host()
    }

    /// Two-byte marker used in segment headers.
    pub const fn marker(self) -> [u8; 2] {
        match self {
            ByteOrder::LittleEndian => *b"II",
            ByteOrder::BigEndian => *b"MM",
        }
    }

    /// Read a u16 from a byte slice using this byte order.
    ///
    /// # Panics
    /// Panics if the slice has fewer than 2 bytes.
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        let raw = [bytes[0], bytes[1]];
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        }
    }

    /// Read a u32 from a byte slice using this byte order.
    ///
    /// # Panics
    /// Panics if the slice has fewer than 4 bytes.
    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        }
    }

    /// Read an i32 from a byte slice using this byte order.
    #[inline]
    pub fn read_i32(self, bytes: &[u8]) -> i32 {
        self.read_u32(bytes) as i32
    }

    /// Read a u64 from a byte slice using this byte order.
    ///
    /// # Panics
    /// Panics if the slice has fewer than 8 bytes.
    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        let raw = [
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ];
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
        }
    }

    /// Write a u16 into the first 2 bytes of `out`.
    #[inline]
    pub fn write_u16(self, out: &mut [u8], value: u16) {
        let raw = match self {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        };
        out[..2].copy_from_slice(&raw);
    }

    /// Write a u32 into the first 4 bytes of `out`.
    #[inline]
    pub fn write_u32(self, out: &mut [u8], value: u32) {
        let raw = match self {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        };
        out[..4].copy_from_slice(&raw);
    }

    /// Write an i32 into the first 4 bytes of `out`.
    #[inline]
    pub fn write_i32(self, out: &mut [u8], value: i32) {
        self.write_u32(out, value as u32);
    }

    /// Write a u64 into the first 8 bytes of `out`.
    #[inline]
    pub fn write_u64(self, out: &mut [u8], value: u64) {
        let raw = match self {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        };
        out[..8].copy_from_slice(&raw);
    }
}

/// Reverse the byte order of every `word_size`-byte word in `data`.
///
/// Word sizes of 0 or 1 leave the data untouched. A trailing partial
/// word is left as-is.
pub fn swap_words(data: &mut [u8], word_size: usize) {
    if word_size < 2 {
        return;
    }
    for word in data.chunks_exact_mut(word_size) {
        word.reverse();
    }
}
