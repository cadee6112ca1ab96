//! Heap snapshot reader.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use crate::config::ReplayConfig;
use crate::error::{Result, TraceError};
use crate::event::{EventKind, GcInfo, GcKind};
use crate::heap::Heap;
use crate::lab::{Lab, LabKind};
use crate::object::{AddressedObject, ObjectInfo, ObjectShape};
use crate::roots::{RootKind, RootPointer, StackFrame, ThreadInfo};
use crate::snapshot::codec::Decoder;
use crate::snapshot::{MAGIC, VERSION};
use crate::space::{Space, SpaceMode, SpaceType};
use crate::symbols::Symbols;

fn invalid(msg: impl Into<String>) -> TraceError {
    TraceError::InvalidSnapshot(msg.into())
}

/// Reads a heap state written by [`super::HeapWriter`].
pub struct HeapReader<R: Read> {
    dec: Decoder<R>,
}

impl HeapReader<BufReader<File>> {
    /// Open the snapshot file at `path`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> HeapReader<R> {
    pub const fn new(input: R) -> Self {
        Self {
            dec: Decoder::new(input),
        }
    }

    /// Rebuild the heap. `symbols` must be the symbol table of the traced
    /// program.
    ///
    /// # Errors
    ///
    /// Fails on a wrong magic number or version, on unknown ids and on I/O errors.
    pub fn read(mut self, symbols: Symbols, config: ReplayConfig) -> Result<Heap> {
        let magic = self.dec.i32()?;
        if magic != MAGIC {
            return Err(invalid(format!("bad magic number {magic:#x}")));
        }
        let version = self.dec.i32()?;
        if version != VERSION {
            return Err(invalid(format!("unsupported version {version}")));
        }
        let gc = self.read_gc()?;

        let mut heap = Heap::new(symbols, config);
        let prototypes = self.read_prototypes(&mut heap)?;

        let slots = self.dec.count()?;
        let mut spaces = Vec::with_capacity(slots);
        for id in 0..slots {
            let id = u16::try_from(id).map_err(|_| invalid(format!("space id {id} out of range")))?;
            if let Some(space) = self.read_space(id, heap.symbols(), &prototypes)? {
                spaces.push(space);
            }
        }

        let mut roots: BTreeMap<u64, Vec<RootPointer>> = BTreeMap::new();
        if heap.symbols().expect_pointers {
            for _ in 0..self.dec.count()? {
                let root = self.read_root()?;
                roots.entry(root.addr()).or_default().push(root);
            }
        }

        let mut threads = BTreeMap::new();
        for _ in 0..self.dec.count()? {
            let thread = self.read_thread()?;
            threads.insert(thread.internal_name.clone(), thread);
        }

        heap.restore(gc, spaces, roots, threads)?;
        Ok(heap)
    }

    fn read_gc(&mut self) -> Result<GcInfo> {
        let event = self.dec.i32()?;
        let event = u8::try_from(event)
            .ok()
            .and_then(EventKind::from_id)
            .ok_or_else(|| invalid(format!("unknown GC event id {event}")))?;
        let kind = self.dec.i32()?;
        let kind = GcKind::from_id(kind).ok_or_else(|| invalid(format!("unknown GC kind id {kind}")))?;
        Ok(GcInfo {
            event,
            kind,
            cause: self.dec.i32()?,
            id: self.dec.i16()?,
            time: self.dec.i64()?,
            concurrent: self.dec.bool()?,
        })
    }

    fn read_prototypes(&mut self, heap: &mut Heap) -> Result<Vec<Arc<ObjectInfo>>> {
        let count = self.dec.count()?;
        let mut prototypes = Vec::with_capacity(count);
        for expected in 0..count {
            let id = self.dec.count()?;
            if id != expected {
                return Err(invalid(format!("prototype {id} found at position {expected}")));
            }
            let thread: Arc<str> = Arc::from(self.dec.str()?);
            let type_id = self.dec.i32()?;
            let site = self.dec.i32()?;
            let event = self.dec.i32()?;
            let event = u8::try_from(event)
                .ok()
                .and_then(EventKind::from_id)
                .ok_or_else(|| invalid(format!("unknown event id {event}")))?;
            let shape = match self.dec.i32()? {
                0 => ObjectShape::Mirror { size: self.dec.u64()? },
                1 => ObjectShape::Instance,
                2 => ObjectShape::Array { length: self.dec.i32()? },
                other => return Err(invalid(format!("unknown object prototype {other}"))),
            };
            let symbols = heap.symbols();
            let ty = Arc::clone(symbols.type_by_id(type_id)?);
            let info = ObjectInfo::with_shape(symbols, thread, ty, site, event, shape);
            prototypes.push(heap.cache_mut().intern(info));
        }
        Ok(prototypes)
    }

    fn read_space(&mut self, id: u16, symbols: &Symbols, prototypes: &[Arc<ObjectInfo>]) -> Result<Option<Space>> {
        if self.dec.u8()? == 0 {
            return Ok(None);
        }
        let name = self.dec.str()?;
        let addr = self.dec.u64()?;
        let length = self.dec.u64()?;
        let mut space = Space::new(id, name, addr, length);
        let ty = self.dec.i32()?;
        space.set_space_type(match ty {
            -1 => None,
            id => Some(SpaceType::from_id(id).ok_or_else(|| invalid(format!("unknown space type {id}")))?),
        });
        let mode = self.dec.i32()?;
        space.set_mode(match mode {
            -1 => None,
            id => Some(SpaceMode::from_id(id).ok_or_else(|| invalid(format!("unknown space mode {id}")))?),
        });
        for _ in 0..self.dec.count()? {
            let lab = self.read_lab(symbols, prototypes)?;
            space.assign_lab(lab)?;
        }
        Ok(Some(space))
    }

    fn read_lab(&mut self, symbols: &Symbols, prototypes: &[Arc<ObjectInfo>]) -> Result<Lab> {
        let thread: Arc<str> = Arc::from(self.dec.str()?);
        let kind = self.dec.i32()?;
        let kind = LabKind::from_id(kind).ok_or_else(|| invalid(format!("unknown lab kind {kind}")))?;
        let addr = self.dec.u64()?;
        let capacity = self.dec.u64()?;
        let count = self.dec.count()?;
        let mut objects = Vec::with_capacity(count);
        for _ in 0..count {
            let id = self.dec.count()?;
            let info = prototypes
                .get(id)
                .ok_or_else(|| invalid(format!("unknown prototype {id}")))?;
            let mut object = AddressedObject::create(Arc::clone(info), symbols);
            let pointers = (0..self.dec.count()?)
                .map(|_| self.dec.i64())
                .collect::<Result<Vec<i64>>>()?;
            object.fill_pointers(&pointers)?;
            objects.push(object);
        }
        if let [object] = objects.as_slice() {
            if object.size() == capacity {
                return Lab::from_objects(thread, kind, addr, objects);
            }
        }
        let mut lab = Lab::multi(thread, kind, addr, Some(capacity));
        for object in objects {
            lab.push(object)?;
        }
        Ok(lab)
    }

    fn read_root(&mut self) -> Result<RootPointer> {
        let id = self.dec.u8()?;
        let kind = RootKind::from_id(id).ok_or_else(|| invalid(format!("unknown root kind {id}")))?;
        let addr = self.dec.u64()?;
        Ok(match kind {
            RootKind::ClassLoader => RootPointer::ClassLoader {
                addr,
                loader_name: self.dec.long_str()?,
            },
            RootKind::Class => RootPointer::Class {
                addr,
                class_id: self.dec.i32()?,
            },
            RootKind::StaticField => RootPointer::StaticField {
                addr,
                class_id: self.dec.i32()?,
                offset: self.dec.i32()?,
            },
            RootKind::LocalVariable => RootPointer::LocalVariable {
                addr,
                thread_id: self.dec.i64()?,
                class_id: self.dec.i32()?,
                method_id: self.dec.i32()?,
                slot: self.dec.i32()?,
                depth: self.dec.i32()?,
            },
            RootKind::VmInternalThreadData => RootPointer::VmInternalThreadData {
                addr,
                thread_id: self.dec.i64()?,
            },
            RootKind::CodeBlob => RootPointer::CodeBlob {
                addr,
                class_id: self.dec.i32()?,
                method_id: self.dec.i32()?,
            },
            RootKind::JniLocal => RootPointer::JniLocal {
                addr,
                thread_id: self.dec.i64()?,
            },
            RootKind::JniGlobal => RootPointer::JniGlobal {
                addr,
                weak: self.dec.bool()?,
            },
            RootKind::Debug => RootPointer::Debug {
                addr,
                vm_call: self.dec.long_str()?,
            },
            RootKind::ClassLoaderInternal
            | RootKind::Universe
            | RootKind::SystemDictionary
            | RootKind::BusyMonitor
            | RootKind::InternedString
            | RootKind::FlatProfiler
            | RootKind::Management
            | RootKind::Jvmti => RootPointer::Other { addr, kind },
        })
    }

    fn read_thread(&mut self) -> Result<ThreadInfo> {
        let mut thread = ThreadInfo::new(self.dec.i64()?, self.dec.str()?, self.dec.str()?);
        thread.alive = self.dec.bool()?;
        for _ in 0..self.dec.count()? {
            thread.call_stack.push(StackFrame {
                class_id: self.dec.i32()?,
                method_id: self.dec.i32()?,
            });
        }
        Ok(thread)
    }
}
