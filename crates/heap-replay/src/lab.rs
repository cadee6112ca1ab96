//! Allocation buffers ("labs").
//!
//! A [`Lab`] is a contiguous run of objects owned by one thread and one
//! allocation kind. Multi-object labs grow by bump allocation at [`Lab::top`];
//! single-object labs hold exactly the object they were created with.

use std::fmt;
use std::sync::Arc;

use crate::error::{Result, TraceError};
use crate::object::{AddressedObject, Tag};

/// How a lab came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabKind {
    /// Thread-local allocation buffer.
    Tlab,
    /// Promotion-local allocation buffer used by GC threads.
    Plab,
    /// Synthesized for objects allocated outside any reported buffer.
    Virtual,
    /// Synthesized for a region move.
    RegionVirtual,
}

impl LabKind {
    #[must_use]
    pub const fn id(self) -> i32 {
        match self {
            Self::Tlab => 0,
            Self::Plab => 1,
            Self::Virtual => 2,
            Self::RegionVirtual => 3,
        }
    }

    #[must_use]
    pub const fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Self::Tlab),
            1 => Some(Self::Plab),
            2 => Some(Self::Virtual),
            3 => Some(Self::RegionVirtual),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_virtual(self) -> bool {
        matches!(self, Self::Virtual | Self::RegionVirtual)
    }
}

/// Outcome of [`Lab::try_allocate`].
#[derive(Debug)]
pub enum Allocation {
    /// Placed at the given address.
    Assigned(u64),
    /// Address lies outside the lab; the object is handed back.
    NotAssigned(AddressedObject),
}

const SINGLE_OFFSET: &[u64] = &[0];

/// Predicate applied to each object before a visitor sees it.
pub type ObjectFilter<'a> = &'a (dyn Fn(u64, &AddressedObject) -> bool + Sync);

#[derive(Debug, Clone)]
enum LabBody {
    Single(AddressedObject),
    Multi {
        /// `None` while the final size is not yet known.
        capacity: Option<u64>,
        position: u64,
        /// Offsets from `addr`, ascending.
        offsets: Vec<u64>,
        objects: Vec<AddressedObject>,
    },
}

/// Allocation buffer.
#[derive(Debug, Clone)]
pub struct Lab {
    thread: Arc<str>,
    kind: LabKind,
    addr: u64,
    body: LabBody,
}

impl Lab {
    /// Lab holding exactly `object`.
    #[must_use]
    pub const fn single(thread: Arc<str>, kind: LabKind, addr: u64, object: AddressedObject) -> Self {
        Self {
            thread,
            kind,
            addr,
            body: LabBody::Single(object),
        }
    }

    /// Empty lab; `capacity` of `None` accepts any number of consecutive objects.
    #[must_use]
    pub const fn multi(thread: Arc<str>, kind: LabKind, addr: u64, capacity: Option<u64>) -> Self {
        Self {
            thread,
            kind,
            addr,
            body: LabBody::Multi {
                capacity,
                position: 0,
                offsets: Vec::new(),
                objects: Vec::new(),
            },
        }
    }

    /// Lab filled with consecutive `objects` starting at `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if `objects` is empty.
    pub fn from_objects(
        thread: Arc<str>,
        kind: LabKind,
        addr: u64,
        mut objects: Vec<AddressedObject>,
    ) -> Result<Self> {
        match objects.len() {
            0 => Err(TraceError::invariant(format!("lab at {addr:#x} without objects"))),
            1 => {
                let object = objects.pop().ok_or_else(|| TraceError::invariant("empty lab"))?;
                Ok(Self::single(thread, kind, addr, object))
            }
            _ => {
                let capacity = objects.iter().map(AddressedObject::size).sum();
                let mut lab = Self::multi(thread, kind, addr, Some(capacity));
                for object in objects {
                    lab.push(object)?;
                }
                Ok(lab)
            }
        }
    }

    #[must_use]
    pub fn thread(&self) -> &Arc<str> {
        &self.thread
    }

    #[must_use]
    pub const fn kind(&self) -> LabKind {
        self.kind
    }

    /// Capacity in bytes. Labs of unknown capacity report their position.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        match &self.body {
            LabBody::Single(object) => object.size(),
            LabBody::Multi {
                capacity, position, ..
            } => capacity.unwrap_or(*position),
        }
    }

    /// Bytes used by objects.
    #[must_use]
    pub fn position(&self) -> u64 {
        match &self.body {
            LabBody::Single(object) => object.size(),
            LabBody::Multi { position, .. } => *position,
        }
    }

    #[must_use]
    pub const fn bottom(&self) -> u64 {
        self.addr
    }

    /// Address of the next allocation.
    #[must_use]
    pub fn top(&self) -> u64 {
        self.addr + self.position()
    }

    #[must_use]
    pub fn end(&self) -> u64 {
        self.addr + self.capacity()
    }

    /// Half-open range test against `[bottom, end)`.
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        self.bottom() <= addr && addr < self.end()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        match &self.body {
            LabBody::Single(_) => true,
            LabBody::Multi {
                capacity, position, ..
            } => capacity.is_some_and(|capacity| capacity == *position),
        }
    }

    /// Whether the lab can still grow past its current end.
    #[must_use]
    pub const fn is_extendable(&self) -> bool {
        matches!(self.body, LabBody::Multi { capacity: None, .. })
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        match &self.body {
            LabBody::Single(_) => 1,
            LabBody::Multi { objects, .. } => objects.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.object_count() == 0
    }

    /// Place `object` at `addr`.
    ///
    /// Addresses outside the lab hand the object back unassigned.
    ///
    /// # Errors
    ///
    /// Fails for single-object labs, for addresses inside the lab that are not
    /// the current top, and when the object overflows the capacity.
    pub fn try_allocate(&mut self, addr: u64, object: AddressedObject) -> Result<Allocation> {
        let top = self.top();
        let LabBody::Multi { capacity, .. } = &self.body else {
            return Err(TraceError::invariant(format!(
                "cannot allocate at {addr:#x} into single-object lab at {:#x}",
                self.addr
            )));
        };
        let in_lab = match capacity {
            None => addr == top,
            Some(capacity) => self.addr <= addr && addr < self.addr + capacity,
        };
        if !in_lab {
            return Ok(Allocation::NotAssigned(object));
        }
        if addr != top {
            return Err(TraceError::invariant(format!(
                "{} lab of thread {} ({:#x} - {:#x}) is not consecutive: object at {addr:#x}, expected {top:#x}",
                self.kind,
                self.thread,
                self.bottom(),
                self.end()
            )));
        }
        self.push(object).map(Allocation::Assigned)
    }

    /// Bump-allocate `object` at the current top.
    ///
    /// # Errors
    ///
    /// Fails for single-object labs and on capacity overflow.
    pub fn push(&mut self, object: AddressedObject) -> Result<u64> {
        let addr = self.addr;
        let kind = self.kind;
        let LabBody::Multi {
            capacity,
            position,
            offsets,
            objects,
        } = &mut self.body
        else {
            return Err(TraceError::invariant(format!(
                "cannot allocate into single-object lab at {addr:#x}"
            )));
        };
        let offset = *position;
        let size = object.size();
        if let Some(capacity) = *capacity {
            if offset + size > capacity {
                return Err(TraceError::invariant(format!(
                    "{kind} lab capacity exceeded at {:#x}: object of {size} bytes, position {offset}, capacity {capacity}",
                    addr + offset
                )));
            }
        }
        offsets.push(offset);
        objects.push(object);
        *position += size;
        Ok(addr + offset)
    }

    /// Fix the capacity of an extendable lab to its current position.
    pub fn reset_capacity(&mut self) {
        if let LabBody::Multi {
            capacity, position, ..
        } = &mut self.body
        {
            *capacity = Some(*position);
        }
    }

    /// Allow the lab to grow again.
    pub fn variable_capacity(&mut self) {
        if let LabBody::Multi { capacity, .. } = &mut self.body {
            *capacity = None;
        }
    }

    /// Convert a single-object lab into an extendable multi-object lab.
    #[must_use]
    pub fn into_multi(self) -> Self {
        match self.body {
            LabBody::Single(object) => {
                let size = object.size();
                Self {
                    thread: self.thread,
                    kind: self.kind,
                    addr: self.addr,
                    body: LabBody::Multi {
                        capacity: None,
                        position: size,
                        offsets: vec![0],
                        objects: vec![object],
                    },
                }
            }
            LabBody::Multi { .. } => self,
        }
    }

    fn index_of(&self, addr: u64) -> Option<usize> {
        let offset = addr.checked_sub(self.addr)?;
        match &self.body {
            LabBody::Single(_) => (offset == 0).then_some(0),
            LabBody::Multi { offsets, .. } => offsets.binary_search(&offset).ok(),
        }
    }

    /// Object starting exactly at `addr`.
    #[must_use]
    pub fn object_at(&self, addr: u64) -> Option<&AddressedObject> {
        let idx = self.index_of(addr)?;
        match &self.body {
            LabBody::Single(object) => Some(object),
            LabBody::Multi { objects, .. } => objects.get(idx),
        }
    }

    pub fn object_at_mut(&mut self, addr: u64) -> Option<&mut AddressedObject> {
        let idx = self.index_of(addr)?;
        match &mut self.body {
            LabBody::Single(object) => Some(object),
            LabBody::Multi { objects, .. } => objects.get_mut(idx),
        }
    }

    /// Objects with their addresses, in address order.
    pub fn objects(&self) -> impl Iterator<Item = (u64, &AddressedObject)> {
        let addr = self.addr;
        let (offsets, objects): (&[u64], &[AddressedObject]) = match &self.body {
            LabBody::Single(object) => (SINGLE_OFFSET, std::slice::from_ref(object)),
            LabBody::Multi {
                offsets, objects, ..
            } => (offsets.as_slice(), objects.as_slice()),
        };
        offsets
            .iter()
            .zip(objects)
            .map(move |(offset, object)| (addr + offset, object))
    }

    /// Mutable objects with their addresses, in address order.
    pub fn objects_mut(&mut self) -> impl Iterator<Item = (u64, &mut AddressedObject)> {
        let addr = self.addr;
        let (offsets, objects): (&[u64], &mut [AddressedObject]) = match &mut self.body {
            LabBody::Single(object) => (SINGLE_OFFSET, std::slice::from_mut(object)),
            LabBody::Multi {
                offsets, objects, ..
            } => (offsets.as_slice(), objects.as_mut_slice()),
        };
        offsets
            .iter()
            .zip(objects)
            .map(move |(offset, object)| (addr + offset, object))
    }

    /// Visit every object accepted by all `filters`, in address order.
    ///
    /// The first rejecting filter skips the object.
    pub fn iterate<F>(&self, filters: &[ObjectFilter<'_>], mut visitor: F)
    where
        F: FnMut(u64, &AddressedObject),
    {
        for (addr, object) in self.objects() {
            if filters.iter().all(|accept| accept(addr, object)) {
                visitor(addr, object);
            }
        }
    }

    /// Forget every forwarding address recorded in this lab.
    pub fn reset_forwarding_addresses(&mut self) {
        for (_, object) in self.objects_mut() {
            object.set_tag(Tag::Unset);
        }
    }

    /// Copy of the objects in `[bottom, end)` as a new, full lab.
    ///
    /// Returns `None` for an empty range. `end` is clamped to [`Lab::top`].
    ///
    /// # Errors
    ///
    /// Fails if the bounds lie outside this lab or do not fall on object
    /// boundaries.
    pub fn sublab(&self, bottom: u64, end: u64) -> Result<Option<Self>> {
        if bottom == end {
            return Ok(None);
        }
        if bottom == self.bottom() && end == self.end() {
            return Ok(Some(self.clone()));
        }
        if !(self.bottom() <= bottom && bottom < self.end()) {
            return Err(TraceError::invariant(format!(
                "sublab bottom {bottom:#x} outside [{:#x}, {:#x})",
                self.bottom(),
                self.end()
            )));
        }
        if !(self.bottom() <= end && end <= self.end()) || end < bottom {
            return Err(TraceError::invariant(format!(
                "sublab end {end:#x} outside [{bottom:#x}, {:#x}]",
                self.end()
            )));
        }
        let end = end.min(self.top());
        if end <= bottom {
            return Ok(None);
        }
        let mut sublab = Self::multi(Arc::clone(&self.thread), self.kind, bottom, Some(end - bottom));
        let mut top = bottom;
        while top < end {
            let object = self.object_at(top).ok_or_else(|| {
                TraceError::invariant(format!(
                    "sublab [{bottom:#x}, {end:#x}) does not align to objects at {top:#x}"
                ))
            })?;
            top += object.size();
            sublab.push(object.clone())?;
        }
        if top != end || !sublab.is_full() {
            return Err(TraceError::invariant(format!(
                "sublab [{bottom:#x}, {end:#x}) ends inside the object ending at {top:#x}"
            )));
        }
        Ok(Some(sublab))
    }
}

impl fmt::Display for LabKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tlab => "TLAB",
            Self::Plab => "PLAB",
            Self::Virtual => "VIRTUAL",
            Self::RegionVirtual => "REGION_VIRTUAL",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Lab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LAB ({}) @ {:#x} - {:#x} ({} / {})",
            self.kind,
            self.bottom(),
            self.end(),
            self.position(),
            self.capacity()
        )
    }
}
