//! Replay of decoded trace records against a [`Heap`].
//!
//! Records are applied strictly in trace order. References streamed by GC
//! worker threads are accumulated per thread (see [`ThreadState`]) and handed
//! to the heap when complete; everything still open is flushed before the
//! heap processes a GC end.

mod thread;

use std::collections::HashMap;
use std::sync::Arc;

pub use thread::ThreadState;

use crate::error::{Result, TraceError};
use crate::event::{EventKind, GcInfo};
use crate::heap::Heap;
use crate::lab::LabKind;
use crate::object::{ObjectInfo, ObjectShape};
use crate::roots::{RootPointer, ThreadInfo};
use crate::space::{Space, SpaceMode, SpaceType};
use crate::tracing::replay_debug;

/// One decoded trace record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// A heap region becomes known.
    SpaceCreate {
        id: u16,
        name: String,
        addr: u64,
        length: u64,
    },
    /// A region changes its role.
    SpaceRedefine {
        id: u16,
        ty: Option<SpaceType>,
        mode: Option<SpaceMode>,
    },
    /// A thread receives an allocation buffer.
    LabAllocation {
        thread: Arc<str>,
        kind: LabKind,
        addr: u64,
        capacity: Option<u64>,
    },
    Allocation {
        thread: Arc<str>,
        addr: u64,
        type_id: i32,
        site: i32,
        shape: ObjectShape,
    },
    GcStart(GcInfo),
    /// The running GC evacuates a space.
    GcSpaceCollected { space_id: u16 },
    /// The running GC gave up on a space.
    GcSpaceFailed { space_id: u16 },
    GcEnd { info: GcInfo, failed: bool },
    /// The running GC paused the evacuation of the space covering `addr`.
    GcInterrupt { gc_id: i16, addr: u64 },
    /// The running GC resumed evacuating the space covering `addr`.
    GcContinue { gc_id: i16, addr: u64 },
    /// Object relocation, with references for the `*Ptr` kinds.
    Move {
        thread: Arc<str>,
        event: EventKind,
        from: u64,
        to: u64,
        lab_kind: LabKind,
        pointers: Option<Vec<i64>>,
    },
    KeepAlive {
        thread: Arc<str>,
        event: EventKind,
        addr: u64,
        pointers: Option<Vec<i64>>,
    },
    RegionMove {
        thread: Arc<str>,
        from: u64,
        to: u64,
        count: usize,
    },
    /// Extension, multi-threaded or pointer-update record.
    Pointers {
        thread: Arc<str>,
        event: EventKind,
        to: u64,
        pointers: Vec<i64>,
    },
    Root(RootPointer),
    ThreadAlive(ThreadInfo),
    ThreadDeath { internal_name: String },
}

/// Observer of GC boundaries during a replay.
pub trait HeapListener {
    /// Called after the heap entered a GC. `position` is the 0-based ordinal
    /// of the GC record in the trace.
    ///
    /// # Errors
    ///
    /// Errors abort the replay.
    fn gc_started(&mut self, _heap: &Heap, _info: &GcInfo, _position: u64) -> Result<()> {
        Ok(())
    }

    /// Called after references were repaired and all transitions committed.
    ///
    /// # Errors
    ///
    /// Errors abort the replay.
    fn gc_ended(&mut self, _heap: &Heap, _info: &GcInfo, _failed: bool, _position: u64) -> Result<()> {
        Ok(())
    }
}

impl HeapListener for () {}

/// Drives a [`Heap`] through a sequence of [`TraceEvent`]s.
#[derive(Debug)]
pub struct HeapReplayer {
    heap: Heap,
    threads: HashMap<Arc<str>, ThreadState>,
    applied: u64,
}

impl HeapReplayer {
    #[must_use]
    pub fn new(heap: Heap) -> Self {
        Self {
            heap,
            threads: HashMap::new(),
            applied: 0,
        }
    }

    #[must_use]
    pub const fn heap(&self) -> &Heap {
        &self.heap
    }

    #[must_use]
    pub fn into_heap(self) -> Heap {
        self.heap
    }

    /// Number of records applied so far.
    #[must_use]
    pub const fn applied(&self) -> u64 {
        self.applied
    }

    /// Apply every record of `events` in order.
    ///
    /// # Errors
    ///
    /// Stops at the first record that fails.
    pub fn replay<I>(&mut self, events: I, listener: &mut dyn HeapListener) -> Result<()>
    where
        I: IntoIterator<Item = TraceEvent>,
    {
        for event in events {
            self.apply_with(event, listener)?;
        }
        Ok(())
    }

    /// Apply one record without a listener.
    ///
    /// # Errors
    ///
    /// See [`HeapReplayer::apply_with`].
    pub fn apply(&mut self, event: TraceEvent) -> Result<()> {
        self.apply_with(event, &mut ())
    }

    /// Apply one record.
    ///
    /// # Errors
    ///
    /// Fails on records that do not fit the heap state, on trace
    /// inconsistencies and on listener errors.
    pub fn apply_with(&mut self, event: TraceEvent, listener: &mut dyn HeapListener) -> Result<()> {
        let position = self.applied;
        self.applied += 1;
        match event {
            TraceEvent::SpaceCreate {
                id,
                name,
                addr,
                length,
            } => self.heap.add_space(Space::new(id, name, addr, length)),
            TraceEvent::SpaceRedefine { id, ty, mode } => self.heap.set_space_type(id, ty, mode),
            TraceEvent::LabAllocation {
                thread,
                kind,
                addr,
                capacity,
            } => self.heap.assign_lab(&thread, kind, addr, capacity),
            TraceEvent::Allocation {
                thread,
                addr,
                type_id,
                site,
                shape,
            } => {
                let symbols = self.heap.symbols();
                let ty = Arc::clone(symbols.type_by_id(type_id)?);
                let info = ObjectInfo::with_shape(symbols, thread, ty, site, EventKind::Allocation, shape);
                self.heap.allocate(addr, info).map(|_| ())
            }
            TraceEvent::GcStart(info) => {
                self.heap.gc_start(info)?;
                listener.gc_started(&self.heap, &info, position)
            }
            TraceEvent::GcSpaceCollected { space_id } => self.heap.mark_space_for_collection(space_id),
            TraceEvent::GcSpaceFailed { space_id } => self.heap.fail_space(space_id),
            TraceEvent::GcEnd { info, failed } => {
                for state in self.threads.values_mut() {
                    state.flush(&mut self.heap)?;
                }
                self.heap.gc_end(info, failed)?;
                replay_debug!(gc_id = info.id, applied = self.applied, "replayed gc");
                listener.gc_ended(&self.heap, &info, failed, position)
            }
            TraceEvent::GcInterrupt { gc_id, addr } => self.heap.interrupt_gc(gc_id, addr),
            TraceEvent::GcContinue { gc_id, addr } => self.heap.continue_gc(gc_id, addr),
            TraceEvent::Move {
                thread,
                event,
                from,
                to,
                lab_kind,
                pointers,
            } => self.on_move(&thread, event, from, to, lab_kind, pointers),
            TraceEvent::KeepAlive {
                thread,
                event,
                addr,
                pointers,
            } => {
                self.heap.keep_alive(&thread, addr)?;
                self.on_move_pointers(&thread, event, addr, addr, pointers)
            }
            TraceEvent::RegionMove {
                thread,
                from,
                to,
                count,
            } => self.heap.move_region(&thread, from, to, count),
            TraceEvent::Pointers {
                thread,
                event,
                to,
                pointers,
            } => self.on_pointers(&thread, event, to, pointers),
            TraceEvent::Root(root) => {
                self.heap.add_root(root);
                Ok(())
            }
            TraceEvent::ThreadAlive(info) => {
                self.heap.add_thread(info);
                Ok(())
            }
            TraceEvent::ThreadDeath { internal_name } => self.heap.thread_death(&internal_name),
        }
    }

    fn on_move(
        &mut self,
        thread: &Arc<str>,
        event: EventKind,
        from: u64,
        to: u64,
        lab_kind: LabKind,
        pointers: Option<Vec<i64>>,
    ) -> Result<()> {
        if !event.is_move() {
            return Err(TraceError::UnexpectedEvent(format!("{event:?} is not a move record")));
        }
        self.heap.move_object(thread, from, to, lab_kind)?;
        self.on_move_pointers(thread, event, from, to, pointers)
    }

    fn on_move_pointers(
        &mut self,
        thread: &Arc<str>,
        event: EventKind,
        from: u64,
        to: u64,
        pointers: Option<Vec<i64>>,
    ) -> Result<()> {
        let carries_pointers = matches!(
            event,
            EventKind::GcMoveSlowPtr
                | EventKind::GcMoveFastWidePtr
                | EventKind::GcMoveFastPtr
                | EventKind::GcKeepAlivePtr
        );
        if !carries_pointers || !self.heap.symbols().expect_pointers {
            return Ok(());
        }
        let mut state = self.threads.remove(thread).unwrap_or_default();
        let result = state.start(&mut self.heap, event, from, to, pointers);
        self.threads.insert(Arc::clone(thread), state);
        result
    }

    fn on_pointers(&mut self, thread: &Arc<str>, event: EventKind, to: u64, pointers: Vec<i64>) -> Result<()> {
        if !self.heap.symbols().expect_pointers {
            return Ok(());
        }
        let mut state = self.threads.remove(thread).unwrap_or_default();
        let result = match event {
            EventKind::GcPtrExtension => state.extend(event, to, pointers),
            EventKind::GcPtrMultithreaded => state.add_multithreaded(&self.heap, to, &pointers),
            EventKind::GcPtrUpdatePremove | EventKind::GcPtrUpdatePostmove => {
                state.update(&mut self.heap, event, to, pointers)
            }
            other => Err(TraceError::UnexpectedEvent(format!("{other:?} is not a pointer record"))),
        };
        self.threads.insert(Arc::clone(thread), state);
        result
    }
}
