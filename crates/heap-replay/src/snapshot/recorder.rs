//! Writes snapshots and index records while a trace is replayed.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::config::DumpPolicy;
use crate::error::Result;
use crate::event::GcInfo;
use crate::heap::Heap;
use crate::replay::HeapListener;
use crate::snapshot::{HeapWriter, IndexRecord, IndexWriter, INDEX_FILE};
use crate::tracing::replay_debug;

/// [`HeapListener`] that maintains a dump directory: one index record per
/// GC boundary and a snapshot after the GC ends selected by a
/// [`DumpPolicy`].
pub struct DumpRecorder {
    dir: PathBuf,
    policy: DumpPolicy,
    index: IndexWriter<BufWriter<File>>,
    gc_ordinal: u32,
    dumps_written: u32,
}

impl DumpRecorder {
    /// Create `dir` if needed and start a fresh index in it.
    ///
    /// # Errors
    ///
    /// Fails if the directory or the index file cannot be created.
    pub fn create(dir: impl Into<PathBuf>, policy: DumpPolicy) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let index = IndexWriter::create(dir.join(INDEX_FILE))?;
        Ok(Self {
            dir,
            policy,
            index,
            gc_ordinal: 0,
            dumps_written: 0,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the snapshot written at the end of GC `gc_id`.
    #[must_use]
    pub fn dump_path(&self, gc_id: i32) -> PathBuf {
        self.dir.join(gc_id.to_string())
    }

    #[must_use]
    pub const fn dumps_written(&self) -> u32 {
        self.dumps_written
    }

    /// Flush the index.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn finish(self) -> Result<()> {
        self.index.finish().map(drop)
    }
}

impl HeapListener for DumpRecorder {
    fn gc_started(&mut self, _heap: &Heap, info: &GcInfo, position: u64) -> Result<()> {
        self.index.append(&IndexRecord::new(position, info, false))
    }

    fn gc_ended(&mut self, heap: &Heap, info: &GcInfo, _failed: bool, position: u64) -> Result<()> {
        self.gc_ordinal += 1;
        let dump = self
            .policy
            .should_dump(self.gc_ordinal, info.kind.is_full(), self.dumps_written);
        if dump {
            let path = self.dump_path(i32::from(info.id));
            let mut writer = HeapWriter::create(&path)?;
            writer.write(heap)?;
            writer.finish()?;
            self.dumps_written += 1;
            replay_debug!(gc_id = info.id, path = %path.display(), "heap_dumped");
        }
        // Written after the snapshot so a record never names a missing dump.
        self.index.append(&IndexRecord::new(position, info, dump))?;
        self.index.flush()
    }
}
