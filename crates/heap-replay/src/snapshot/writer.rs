//! Heap snapshot writer.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, TraceError};
use crate::event::GcInfo;
use crate::heap::Heap;
use crate::lab::Lab;
use crate::object::{ObjectInfo, ObjectShape, PrototypeKey};
use crate::roots::{RootPointer, ThreadInfo};
use crate::snapshot::codec::Encoder;
use crate::snapshot::{MAGIC, VERSION};
use crate::space::Space;
use crate::tracing::replay_debug;

/// Prototype table of one snapshot, in first-use order.
#[derive(Default)]
struct Prototypes {
    ids: HashMap<PrototypeKey, i32>,
    infos: Vec<Arc<ObjectInfo>>,
}

impl Prototypes {
    fn collect(spaces: &[Space]) -> Result<Self> {
        let mut prototypes = Self::default();
        for space in spaces {
            for lab in space.front().iter() {
                for (_, object) in lab.objects() {
                    prototypes.insert(object.info())?;
                }
            }
        }
        Ok(prototypes)
    }

    fn insert(&mut self, info: &Arc<ObjectInfo>) -> Result<()> {
        if self.ids.contains_key(&info.key()) {
            return Ok(());
        }
        let id = i32::try_from(self.infos.len())
            .map_err(|_| TraceError::InvalidSnapshot("too many object prototypes".to_owned()))?;
        self.ids.insert(info.key(), id);
        self.infos.push(Arc::clone(info));
        Ok(())
    }

    fn id(&self, info: &ObjectInfo) -> Result<i32> {
        self.ids
            .get(&info.key())
            .copied()
            .ok_or_else(|| TraceError::invariant("object prototype missing from snapshot table"))
    }
}

/// Writes one heap state to a byte stream.
pub struct HeapWriter<W: Write> {
    enc: Encoder<W>,
}

impl HeapWriter<BufWriter<File>> {
    /// Create (or truncate) the snapshot file at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> HeapWriter<W> {
    pub const fn new(out: W) -> Self {
        Self {
            enc: Encoder::new(out),
        }
    }

    /// Write `heap`. Only the front views are written, so the heap must be
    /// outside a GC.
    ///
    /// # Errors
    ///
    /// Fails while a GC is active, before the first GC and on I/O errors.
    /// Nothing already written is rolled back.
    pub fn write(&mut self, heap: &Heap) -> Result<()> {
        let gc = heap
            .gc_info()
            .filter(|gc| !gc.is_start())
            .ok_or_else(|| TraceError::UnexpectedEvent("cannot write a heap outside a completed GC".to_owned()))?;
        self.enc.i32(MAGIC)?;
        self.enc.i32(VERSION)?;
        self.write_gc(gc)?;

        let prototypes = Prototypes::collect(heap.spaces())?;
        self.enc.count(prototypes.infos.len())?;
        for (id, info) in (0..).zip(&prototypes.infos) {
            self.enc.i32(id)?;
            self.write_prototype(info)?;
        }

        let slots = heap.spaces().iter().map(|space| usize::from(space.id()) + 1).max().unwrap_or(0);
        self.enc.count(slots)?;
        for id in 0..slots {
            match heap.spaces().iter().find(|space| usize::from(space.id()) == id) {
                Some(space) => self.write_space(space, &prototypes)?,
                None => self.enc.u8(0)?,
            }
        }

        if heap.symbols().expect_pointers {
            let roots: Vec<&RootPointer> = heap.roots().values().flatten().collect();
            self.enc.count(roots.len())?;
            for root in roots {
                self.write_root(root)?;
            }
        }

        self.enc.count(heap.threads().len())?;
        for thread in heap.threads().values() {
            self.write_thread(thread)?;
        }
        self.enc.flush()?;
        replay_debug!(gc_id = gc.id, prototypes = prototypes.infos.len(), spaces = slots, "snapshot_written");
        Ok(())
    }

    /// Flush and return the underlying stream.
    ///
    /// # Errors
    ///
    /// Fails if flushing fails.
    pub fn finish(mut self) -> Result<W> {
        self.enc.flush()?;
        Ok(self.enc.into_inner())
    }

    fn write_gc(&mut self, gc: &GcInfo) -> Result<()> {
        self.enc.i32(i32::from(gc.event.id()))?;
        self.enc.i32(gc.kind.id())?;
        self.enc.i32(gc.cause)?;
        self.enc.i16(gc.id)?;
        self.enc.i64(gc.time)?;
        self.enc.bool(gc.concurrent)
    }

    fn write_prototype(&mut self, info: &ObjectInfo) -> Result<()> {
        self.enc.str(&info.thread)?;
        self.enc.i32(info.ty.id)?;
        self.enc.i32(info.site)?;
        self.enc.i32(i32::from(info.event.id()))?;
        match info.shape {
            ObjectShape::Mirror { size } => {
                self.enc.i32(0)?;
                self.enc.u64(size)
            }
            ObjectShape::Instance => self.enc.i32(1),
            ObjectShape::Array { length } => {
                self.enc.i32(2)?;
                self.enc.i32(length)
            }
        }
    }

    fn write_space(&mut self, space: &Space, prototypes: &Prototypes) -> Result<()> {
        self.enc.u8(1)?;
        self.enc.str(space.name())?;
        self.enc.u64(space.addr())?;
        self.enc.u64(space.length())?;
        self.enc.i32(space.space_type().map_or(-1, |ty| ty.id()))?;
        self.enc.i32(space.mode().map_or(-1, |mode| mode.id()))?;
        self.enc.count(space.front().len())?;
        for lab in space.front().iter() {
            self.write_lab(lab, prototypes)?;
        }
        Ok(())
    }

    fn write_lab(&mut self, lab: &Lab, prototypes: &Prototypes) -> Result<()> {
        self.enc.str(lab.thread())?;
        self.enc.i32(lab.kind().id())?;
        self.enc.u64(lab.bottom())?;
        self.enc.u64(lab.capacity())?;
        self.enc.count(lab.object_count())?;
        for (_, object) in lab.objects() {
            self.enc.i32(prototypes.id(object.info())?)?;
            self.enc.count(object.pointers().len())?;
            for &ptr in object.pointers() {
                self.enc.i64(ptr)?;
            }
        }
        Ok(())
    }

    fn write_root(&mut self, root: &RootPointer) -> Result<()> {
        self.enc.u8(root.kind().id())?;
        self.enc.u64(root.addr())?;
        match root {
            RootPointer::ClassLoader { loader_name, .. } => self.enc.long_str(loader_name),
            RootPointer::Class { class_id, .. } => self.enc.i32(*class_id),
            RootPointer::StaticField { class_id, offset, .. } => {
                self.enc.i32(*class_id)?;
                self.enc.i32(*offset)
            }
            RootPointer::LocalVariable {
                thread_id,
                class_id,
                method_id,
                slot,
                depth,
                ..
            } => {
                self.enc.i64(*thread_id)?;
                self.enc.i32(*class_id)?;
                self.enc.i32(*method_id)?;
                self.enc.i32(*slot)?;
                self.enc.i32(*depth)
            }
            RootPointer::VmInternalThreadData { thread_id, .. } | RootPointer::JniLocal { thread_id, .. } => {
                self.enc.i64(*thread_id)
            }
            RootPointer::CodeBlob { class_id, method_id, .. } => {
                self.enc.i32(*class_id)?;
                self.enc.i32(*method_id)
            }
            RootPointer::JniGlobal { weak, .. } => self.enc.bool(*weak),
            RootPointer::Other { .. } => Ok(()),
            RootPointer::Debug { vm_call, .. } => self.enc.long_str(vm_call),
        }
    }

    fn write_thread(&mut self, thread: &ThreadInfo) -> Result<()> {
        self.enc.i64(thread.id)?;
        self.enc.str(&thread.name)?;
        self.enc.str(&thread.internal_name)?;
        self.enc.bool(thread.alive)?;
        self.enc.count(thread.call_stack.len())?;
        for frame in &thread.call_stack {
            self.enc.i32(frame.class_id)?;
            self.enc.i32(frame.method_id)?;
        }
        Ok(())
    }
}
