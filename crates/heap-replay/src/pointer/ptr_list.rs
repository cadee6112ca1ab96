//! Reference payloads split across several trace records.

use crate::error::{Result, TraceError};
use crate::event::EventKind;

/// One trace record carrying references for `to_addr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtrEvent {
    pub kind: EventKind,
    pub to_addr: u64,
    /// `None` when the record did not carry references.
    pub pointers: Option<Vec<i64>>,
}

impl PtrEvent {
    #[must_use]
    pub const fn new(kind: EventKind, to_addr: u64, pointers: Option<Vec<i64>>) -> Self {
        Self {
            kind,
            to_addr,
            pointers,
        }
    }

    #[must_use]
    pub const fn is_dedicated_ptr_event(&self) -> bool {
        self.kind.is_dedicated_ptr_event()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pointers.as_ref().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered records that together make up one object's references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtrList {
    target: u64,
    events: Vec<PtrEvent>,
}

impl PtrList {
    #[must_use]
    pub const fn new(target: u64) -> Self {
        Self {
            target,
            events: Vec::new(),
        }
    }

    /// List starting with `event`.
    #[must_use]
    pub fn with_event(event: PtrEvent) -> Self {
        Self {
            target: event.to_addr,
            events: vec![event],
        }
    }

    #[must_use]
    pub const fn target(&self) -> u64 {
        self.target
    }

    #[must_use]
    pub fn events(&self) -> &[PtrEvent] {
        &self.events
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Append `event`.
    ///
    /// # Errors
    ///
    /// Fails if `event` targets another object.
    pub fn push(&mut self, event: PtrEvent) -> Result<()> {
        if event.to_addr != self.target {
            return Err(TraceError::invariant(format!(
                "pointer event for {:#x} added to the list of {:#x}",
                event.to_addr, self.target
            )));
        }
        self.events.push(event);
        Ok(())
    }

    /// The record that moved the object, if the list has one.
    #[must_use]
    pub fn move_event(&self) -> Option<&PtrEvent> {
        self.events.iter().find(|event| !event.is_dedicated_ptr_event())
    }

    /// Total number of references carried by the list.
    #[must_use]
    pub fn pointer_count(&self) -> usize {
        self.events.iter().map(PtrEvent::len).sum()
    }

    /// Concatenate the payloads of all records in list order.
    ///
    /// Records without a payload are skipped. With `consistency_check`, such
    /// records are only accepted for the move record of the list.
    ///
    /// # Errors
    ///
    /// Fails if a dedicated pointer record has no payload under
    /// `consistency_check`.
    pub fn final_pointer_array(&self, consistency_check: bool) -> Result<Vec<i64>> {
        if consistency_check {
            let absent = self.events.iter().filter(|event| event.pointers.is_none());
            let mut absent_outside_move = absent.clone().any(PtrEvent::is_dedicated_ptr_event);
            absent_outside_move |= absent.count() > 0 && self.move_event().is_none();
            if absent_outside_move {
                return Err(TraceError::invariant(format!(
                    "pointer list of {:#x} has a record without references outside its move record",
                    self.target
                )));
            }
        }
        let expected = self.pointer_count();
        let pointers: Vec<i64> = self
            .events
            .iter()
            .filter_map(|event| event.pointers.as_deref())
            .flatten()
            .copied()
            .collect();
        if pointers.len() != expected {
            return Err(TraceError::invariant(format!(
                "pointer list of {:#x} combined {} of {expected} references",
                self.target,
                pointers.len()
            )));
        }
        Ok(pointers)
    }

    /// The dedicated kind shared by every record of the list.
    ///
    /// # Errors
    ///
    /// Fails unless all records are pre-move updates or all are post-move updates.
    pub fn ptr_update_event_kind(&self) -> Result<EventKind> {
        for kind in [EventKind::GcPtrUpdatePremove, EventKind::GcPtrUpdatePostmove] {
            if self.events.iter().all(|event| event.kind == kind) {
                return Ok(kind);
            }
        }
        Err(TraceError::invariant(format!(
            "pointer list of {:#x} mixes update kinds",
            self.target
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_foreign_target() {
        let mut list = PtrList::new(64);
        assert!(list.push(PtrEvent::new(EventKind::GcPtrExtension, 128, Some(vec![1]))).is_err());
        assert!(list.is_empty());
    }

    #[test]
    fn test_absent_payload_only_in_move_record() {
        let mut list = PtrList::with_event(PtrEvent::new(EventKind::GcMoveSlowPtr, 64, None));
        list.push(PtrEvent::new(EventKind::GcPtrExtension, 64, Some(vec![8, 16])))
            .unwrap();
        assert_eq!(list.final_pointer_array(true).unwrap(), vec![8, 16]);

        let mut list = PtrList::with_event(PtrEvent::new(EventKind::GcPtrUpdatePremove, 64, Some(vec![8])));
        list.push(PtrEvent::new(EventKind::GcPtrUpdatePremove, 64, None))
            .unwrap();
        assert!(list.final_pointer_array(true).is_err());
        assert_eq!(list.final_pointer_array(false).unwrap(), vec![8]);
    }

    #[test]
    fn test_update_kind() {
        let mut list = PtrList::new(64);
        list.push(PtrEvent::new(EventKind::GcPtrUpdatePostmove, 64, Some(vec![1])))
            .unwrap();
        assert_eq!(list.ptr_update_event_kind().unwrap(), EventKind::GcPtrUpdatePostmove);
        list.push(PtrEvent::new(EventKind::GcPtrUpdatePremove, 64, Some(vec![2])))
            .unwrap();
        assert!(list.ptr_update_event_kind().is_err());
    }
}
