mod file_store;
mod memory_store;
mod segment_source;
mod store;

pub use file_store::FileStore;
pub use memory_store::MemoryStore;
pub use segment_source::{DirectorySegmentSource, MemorySegmentSource, SegmentSource};
pub use store::{swap_words, Access, ByteOrder, ByteStore};
