//! Tiled segment storage.
//!
//! A tiled segment holds one channel's blocks in a single store:
//!
//! ```text
//! ┌────────────────────┐  0
//! │   Segment header   │
//! ├────────────────────┤  128
//! │  Tile directory    │  page 0 │ page 1 │ ... (4096 entries each)
//! ├────────────────────┤  data_start
//! │  Tile data         │  appended tiles, never compacted
//! └────────────────────┘  data_end
//! ```
//!
//! # Components
//!
//! - [`SegmentHeader`]: geometry, pixel type, compression tag and byte order
//! - [`TileDirectory`]: lazily paged `(offset, size)` index with dirty tracking
//! - [`create_segment`]: writes the header and an empty directory

mod directory;
mod layout;

pub use directory::{PageState, TileDirectory, TileEntry};
pub use layout::{
    create_segment, SegmentHeader, SegmentParams, ENTRY_SIZE, HEADER_SIZE, LAYOUT_VERSION,
    PAGE_SIZE, SEGMENT_MAGIC,
};
