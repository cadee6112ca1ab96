//! Replayed heap objects.
//!
//! An [`AddressedObject`] is the in-memory proxy of one object in the traced
//! heap. Objects never move in memory: relocating an object during a replayed
//! GC copies it into the destination buffer and records the destination as the
//! forwarding [`Tag`] of the pre-move original.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, TraceError};
use crate::event::EventKind;
use crate::symbols::{AllocatedType, Symbols};

/// Null reference.
pub const NULL_PTR: i64 = -1;

/// Slot-0 marker for a null reference that was already repaired inline.
///
/// Full collections report references at their post-move address. The first
/// slot of such a payload is stored biased by +1 (or as this marker when
/// null), so the end-of-GC repair recognizes the object as already up to date.
/// The encoding is a wire-format detail and is kept as is.
pub const UPDATED_NULL_PTR: i64 = -2;

/// Maximum number of references one trace record can carry.
pub const MAX_PTRS_PER_EVENT: usize = 12;

/// Forwarding state of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Tag {
    /// No relocation recorded.
    #[default]
    Unset,
    /// Object is itself the relocated copy.
    NoForward,
    /// Object was relocated to the given address.
    Forwarded(u64),
}

impl Tag {
    #[must_use]
    pub const fn forwarding_address(self) -> Option<u64> {
        match self {
            Self::Forwarded(addr) => Some(addr),
            Self::Unset | Self::NoForward => None,
        }
    }
}

/// How the size of an object is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectShape {
    /// `java.lang.Class`-like object with an explicit size.
    Mirror { size: u64 },
    /// Plain instance sized by its type.
    Instance,
    /// Array sized by its length.
    Array { length: i32 },
}

/// Prototype shared by all objects allocated with the same thread, type,
/// site, event and shape.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub thread: Arc<str>,
    pub ty: Arc<AllocatedType>,
    pub site: i32,
    pub event: EventKind,
    pub shape: ObjectShape,
    size: u64,
}

impl ObjectInfo {
    #[must_use]
    pub fn instance(thread: Arc<str>, ty: Arc<AllocatedType>, site: i32, event: EventKind) -> Self {
        let size = u64::try_from(ty.size.max(0)).unwrap_or(0);
        Self {
            thread,
            ty,
            site,
            event,
            shape: ObjectShape::Instance,
            size,
        }
    }

    #[must_use]
    pub const fn mirror(
        thread: Arc<str>,
        ty: Arc<AllocatedType>,
        site: i32,
        event: EventKind,
        size: u64,
    ) -> Self {
        Self {
            thread,
            ty,
            site,
            event,
            shape: ObjectShape::Mirror { size },
            size,
        }
    }

    #[must_use]
    pub fn array(
        symbols: &Symbols,
        thread: Arc<str>,
        ty: Arc<AllocatedType>,
        site: i32,
        event: EventKind,
        length: i32,
    ) -> Self {
        let size = symbols.array_size(&ty, length);
        Self {
            thread,
            ty,
            site,
            event,
            shape: ObjectShape::Array { length },
            size,
        }
    }

    /// Prototype of any shape.
    #[must_use]
    pub fn with_shape(
        symbols: &Symbols,
        thread: Arc<str>,
        ty: Arc<AllocatedType>,
        site: i32,
        event: EventKind,
        shape: ObjectShape,
    ) -> Self {
        match shape {
            ObjectShape::Mirror { size } => Self::mirror(thread, ty, site, event, size),
            ObjectShape::Instance => Self::instance(thread, ty, site, event),
            ObjectShape::Array { length } => Self::array(symbols, thread, ty, site, event, length),
        }
    }

    /// Size in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub const fn array_length(&self) -> Option<i32> {
        match self.shape {
            ObjectShape::Array { length } => Some(length),
            ObjectShape::Mirror { .. } | ObjectShape::Instance => None,
        }
    }

    pub(crate) fn key(&self) -> PrototypeKey {
        PrototypeKey {
            thread: Arc::clone(&self.thread),
            type_id: self.ty.id,
            site: self.site,
            event: self.event,
            shape: self.shape,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PrototypeKey {
    thread: Arc<str>,
    type_id: i32,
    site: i32,
    event: EventKind,
    shape: ObjectShape,
}

/// Interns [`ObjectInfo`] prototypes so equal objects share one allocation.
#[derive(Debug, Default)]
pub struct ObjectInfoCache {
    entries: HashMap<PrototypeKey, Arc<ObjectInfo>>,
}

impl ObjectInfoCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared prototype equal to `info`, inserting it if new.
    pub fn intern(&mut self, info: ObjectInfo) -> Arc<ObjectInfo> {
        Arc::clone(self.entries.entry(info.key()).or_insert_with(|| Arc::new(info)))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop prototypes no longer referenced by any object.
    pub fn shrink(&mut self) {
        self.entries.retain(|_, info| Arc::strong_count(info) > 1);
    }
}

/// One replayed heap object.
#[derive(Debug, Clone)]
pub struct AddressedObject {
    info: Arc<ObjectInfo>,
    /// `None` if the type reports a varying reference count.
    declared_pointers: Option<usize>,
    pointers: Vec<i64>,
    tag: Tag,
}

impl AddressedObject {
    /// New object with every reference slot null.
    #[must_use]
    pub fn new(info: Arc<ObjectInfo>, declared_pointers: Option<usize>) -> Self {
        Self {
            info,
            declared_pointers,
            pointers: vec![NULL_PTR; declared_pointers.unwrap_or(0)],
            tag: Tag::Unset,
        }
    }

    /// New object using the symbol table to size its reference array.
    #[must_use]
    pub fn create(info: Arc<ObjectInfo>, symbols: &Symbols) -> Self {
        let declared = symbols.pointer_count_of(&info);
        Self::new(info, declared)
    }

    #[must_use]
    pub fn info(&self) -> &Arc<ObjectInfo> {
        &self.info
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.info.size()
    }

    #[must_use]
    pub fn ty(&self) -> &AllocatedType {
        &self.info.ty
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        self.info.array_length().is_some()
    }

    /// Declared reference count, `None` when unknown.
    #[must_use]
    pub const fn declared_pointer_count(&self) -> Option<usize> {
        self.declared_pointers
    }

    #[must_use]
    pub fn pointers(&self) -> &[i64] {
        &self.pointers
    }

    #[must_use]
    pub fn pointer(&self, idx: usize) -> Option<i64> {
        self.pointers.get(idx).copied()
    }

    /// Overwrite one reference slot.
    ///
    /// # Errors
    ///
    /// Fails if the object has no slot `idx`.
    pub fn set_pointer(&mut self, idx: usize, value: i64) -> Result<()> {
        let len = self.pointers.len();
        if idx >= len {
            return Err(TraceError::invariant(format!(
                "reference slot {idx} out of bounds for {len} slots of {}",
                self.info.ty.name
            )));
        }
        self.pointers[idx] = value;
        Ok(())
    }

    /// Replace the reference array.
    ///
    /// Objects with a declared count keep their arity; missing slots become null.
    ///
    /// # Errors
    ///
    /// Fails if the payload holds more references than the object declares.
    pub fn fill_pointers(&mut self, pointers: &[i64]) -> Result<()> {
        match self.declared_pointers {
            Some(count) if pointers.len() > count => Err(TraceError::invariant(format!(
                "{} references for an object of {} with {count} slots",
                pointers.len(),
                self.info.ty.name
            ))),
            Some(count) => {
                self.pointers.clear();
                self.pointers.extend_from_slice(pointers);
                self.pointers.resize(count, NULL_PTR);
                Ok(())
            }
            None => {
                pointers.clone_into(&mut self.pointers);
                Ok(())
            }
        }
    }

    #[must_use]
    pub const fn tag(&self) -> Tag {
        self.tag
    }

    pub fn set_tag(&mut self, tag: Tag) {
        self.tag = tag;
    }

    /// Copy placed at a relocation target.
    #[must_use]
    pub fn relocated_copy(&self) -> Self {
        Self {
            info: Arc::clone(&self.info),
            declared_pointers: self.declared_pointers,
            pointers: self.pointers.clone(),
            tag: Tag::NoForward,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(pointers: i32) -> Arc<ObjectInfo> {
        let ty = Arc::new(AllocatedType::instance(1, "Node", 24, pointers));
        Arc::new(ObjectInfo::instance(Arc::from("main"), ty, 7, EventKind::Allocation))
    }

    #[test]
    fn test_fill_keeps_declared_arity() {
        let mut obj = AddressedObject::new(node(3), Some(3));
        assert_eq!(obj.pointers(), &[NULL_PTR; 3]);
        obj.fill_pointers(&[16, 32]).unwrap();
        assert_eq!(obj.pointers(), &[16, 32, NULL_PTR]);
    }

    #[test]
    fn test_fill_rejects_oversized_payload() {
        let mut obj = AddressedObject::new(node(3), Some(3));
        obj.fill_pointers(&[16, 32, 48]).unwrap();
        let err = obj.fill_pointers(&[1, 2, 3, 4]).unwrap_err();
        assert!(matches!(err, TraceError::Invariant(_)));
        assert_eq!(obj.pointers(), &[16, 32, 48]);
    }

    #[test]
    fn test_set_pointer_out_of_range_fails() {
        let mut obj = AddressedObject::new(node(1), Some(1));
        assert!(obj.set_pointer(1, 64).is_err());
        assert_eq!(obj.pointer(0), Some(NULL_PTR));
    }

    #[test]
    fn test_unknown_count_takes_payload_length() {
        let mut obj = AddressedObject::new(node(2), None);
        assert!(obj.pointers().is_empty());
        obj.fill_pointers(&[8, 16, 24]).unwrap();
        assert_eq!(obj.pointers().len(), 3);
    }

    #[test]
    fn test_relocated_copy_is_not_forwarded() {
        let mut obj = AddressedObject::new(node(1), Some(1));
        obj.set_pointer(0, 64).unwrap();
        obj.set_tag(Tag::Forwarded(128));
        let copy = obj.relocated_copy();
        assert_eq!(copy.tag(), Tag::NoForward);
        assert_eq!(copy.pointer(0), Some(64));
        assert_eq!(obj.tag().forwarding_address(), Some(128));
    }

    #[test]
    fn test_cache_interns_equal_prototypes() {
        let ty = Arc::new(AllocatedType::instance(1, "Node", 24, 2));
        let thread: Arc<str> = Arc::from("main");
        let mut cache = ObjectInfoCache::new();
        let a = cache.intern(ObjectInfo::instance(Arc::clone(&thread), Arc::clone(&ty), 1, EventKind::Allocation));
        let b = cache.intern(ObjectInfo::instance(Arc::clone(&thread), Arc::clone(&ty), 1, EventKind::Allocation));
        let c = cache.intern(ObjectInfo::instance(thread, ty, 2, EventKind::Allocation));
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
        drop((a, b));
        cache.shrink();
        assert_eq!(cache.len(), 1);
    }
}
