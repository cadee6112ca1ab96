//! Per-thread reference accumulation.
//!
//! Each GC worker thread streams the references of one object at a time: a
//! move or pointer-update record opens the object, extension records append
//! to it, and the next opening record (or the GC end) finishes it.

use crate::error::{Result, TraceError};
use crate::event::EventKind;
use crate::heap::Heap;
use crate::object::{MAX_PTRS_PER_EVENT, NULL_PTR};
use crate::pointer::{may_be_non_dirty, IncompletePointerInfo, PtrEvent, PtrList};

/// Object whose references are currently streamed by a thread.
#[derive(Debug)]
struct CurrentObject {
    from: u64,
    declared: Option<usize>,
    list: PtrList,
}

impl CurrentObject {
    fn remaining(&self) -> Option<usize> {
        self.declared
            .map(|declared| declared.saturating_sub(self.list.pointer_count()))
    }
}

/// Reference state of one trace thread.
#[derive(Debug, Default)]
pub struct ThreadState {
    current: Option<CurrentObject>,
    unmatched: Vec<IncompletePointerInfo>,
}

fn check_payload(event: EventKind, to: u64, pointers: Option<&[i64]>) -> Result<()> {
    match pointers {
        Some(pointers) if pointers.len() > MAX_PTRS_PER_EVENT => Err(TraceError::UnexpectedEvent(format!(
            "{event:?} for {to:#x} carries {} references, at most {MAX_PTRS_PER_EVENT} allowed",
            pointers.len()
        ))),
        _ => Ok(()),
    }
}

impl ThreadState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Address of the object currently being streamed.
    #[must_use]
    pub fn current_target(&self) -> Option<u64> {
        self.current.as_ref().map(|current| current.list.target())
    }

    /// Open the references of the object at `to`.
    ///
    /// `from` is the pre-move address for move records and equal to `to`
    /// for pointer-update records. Objects with at most
    /// [`MAX_PTRS_PER_EVENT`] declared references are finished immediately.
    ///
    /// # Errors
    ///
    /// Fails if there is no object at `to` or finishing the previous object fails.
    pub fn start(
        &mut self,
        heap: &mut Heap,
        event: EventKind,
        from: u64,
        to: u64,
        pointers: Option<Vec<i64>>,
    ) -> Result<()> {
        check_payload(event, to, pointers.as_deref())?;
        self.finish(heap)?;
        let declared = heap
            .payload_target(event, to)
            .ok_or_else(|| TraceError::UnexpectedEvent(format!("{event:?} for {to:#x} without an object")))?
            .declared_pointer_count();
        self.current = Some(CurrentObject {
            from,
            declared,
            list: PtrList::with_event(PtrEvent::new(event, to, pointers)),
        });
        if declared.is_some_and(|declared| declared <= MAX_PTRS_PER_EVENT) {
            self.finish(heap)?;
        }
        Ok(())
    }

    /// Append references to the current object.
    ///
    /// # Errors
    ///
    /// Fails if `to` is not the current object or the references overflow
    /// its declared count.
    pub fn extend(&mut self, event: EventKind, to: u64, pointers: Vec<i64>) -> Result<()> {
        check_payload(event, to, Some(&pointers))?;
        let current = self
            .current
            .as_mut()
            .filter(|current| current.list.target() == to)
            .ok_or_else(|| {
                TraceError::invariant(format!("{event:?} for {to:#x} does not belong to the current object"))
            })?;
        if current.remaining().is_some_and(|remaining| pointers.len() > remaining) {
            return Err(TraceError::invariant(format!(
                "{} more references overflow the {} declared for {to:#x}",
                pointers.len(),
                current.declared.unwrap_or_default()
            )));
        }
        current.list.push(PtrEvent::new(event, to, Some(pointers)))
    }

    /// Append to the current object if it is `to`, otherwise open `to`.
    ///
    /// # Errors
    ///
    /// See [`ThreadState::start`] and [`ThreadState::extend`].
    pub fn update(&mut self, heap: &mut Heap, event: EventKind, to: u64, pointers: Vec<i64>) -> Result<()> {
        if self.current_target() == Some(to) {
            self.extend(event, to, pointers)
        } else {
            self.start(heap, event, to, to, Some(pointers))
        }
    }

    /// Route a fragment produced by another GC worker.
    ///
    /// # Errors
    ///
    /// Fails if the fragment overflows its registered array.
    pub fn add_multithreaded(&mut self, heap: &Heap, to: u64, pointers: &[i64]) -> Result<()> {
        if !heap.add_multithreaded_fragment(to, pointers)? {
            self.unmatched.push(IncompletePointerInfo::fragment(to, pointers));
        }
        Ok(())
    }

    /// Apply or register the references of the current object.
    ///
    /// Complete arrays, possibly stale arrays and arrays of types with an
    /// unknown reference count are applied; shorter arrays wait for
    /// multi-threaded fragments.
    ///
    /// # Errors
    ///
    /// Fails on inconsistent lists and on double registration.
    pub fn finish(&mut self, heap: &mut Heap) -> Result<()> {
        let Some(current) = self.current.take() else {
            return Ok(());
        };
        let to = current.list.target();
        let kind = match current.list.move_event() {
            Some(event) => event.kind,
            None => current.list.ptr_update_event_kind()?,
        };
        if current.list.events().iter().all(|event| event.pointers.is_none()) {
            heap.apply_pointers(kind, to, None)?;
            return Ok(());
        }
        let mut pointers = current.list.final_pointer_array(heap.config().consistency_check)?;
        let target = heap
            .payload_target(kind, to)
            .ok_or_else(|| TraceError::UnexpectedEvent(format!("{kind:?} for {to:#x} without an object")))?;
        if may_be_non_dirty(target, &pointers) {
            return heap.apply_pointers(kind, to, Some(&pointers)).map(|_| ());
        }
        match current.declared {
            Some(declared) if pointers.len() < declared => {
                let top = pointers.len();
                pointers.resize(declared, NULL_PTR);
                heap.register_incomplete(IncompletePointerInfo::new(Some(current.from), to, pointers, top))
            }
            Some(declared) if pointers.len() > declared => Err(TraceError::invariant(format!(
                "{} references sent for {to:#x}, {declared} declared",
                pointers.len()
            ))),
            _ => heap.apply_pointers(kind, to, Some(&pointers)).map(|_| ()),
        }
    }

    /// Finish the current object and hand unmatched fragments to the heap.
    ///
    /// # Errors
    ///
    /// See [`ThreadState::finish`].
    pub fn flush(&mut self, heap: &mut Heap) -> Result<()> {
        self.finish(heap)?;
        heap.stash_unmatched(std::mem::take(&mut self.unmatched));
        Ok(())
    }
}
