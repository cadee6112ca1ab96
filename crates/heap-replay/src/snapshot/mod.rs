//! Binary heap snapshots and the GC index.
//!
//! A snapshot holds the front views of every space after a completed GC,
//! so replay can restart from it instead of from the beginning of the
//! trace. The index lists every GC boundary with its trace position and
//! whether a snapshot exists for it. All values are big-endian.

mod codec;
mod index;
mod reader;
mod recorder;
mod writer;

pub use index::{GcLookup, HeapPosition, IndexReader, IndexRecord, IndexWriter};
pub use reader::HeapReader;
pub use recorder::DumpRecorder;
pub use writer::HeapWriter;

/// First value of every snapshot and index file.
pub const MAGIC: i32 = 0x4852_5031;

/// Snapshot format version.
pub const VERSION: i32 = 1;

/// Name of the index file inside a dump directory.
pub const INDEX_FILE: &str = "heap.idx";
