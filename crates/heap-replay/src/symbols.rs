//! Symbol table collaborator: types, allocation sites and GC causes.
//!
//! The replay engine only consults types for their declared reference
//! count; everything else is carried along for snapshots and consumers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Result, TraceError};
use crate::object::ObjectInfo;

/// A type objects can be allocated as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedType {
    pub id: i32,
    pub name: String,
    /// Instance size in bytes, or -1 for arrays.
    pub size: i32,
    /// Element size in bytes for array types.
    pub element_size: i32,
    /// Declared number of reference fields of one instance.
    pub pointers_per_object: i32,
    /// The VM may report a varying number of references (weak references etc.).
    pub has_unknown_pointer_count: bool,
    pub is_primitive_array: bool,
}

impl AllocatedType {
    /// Instance type with a fixed size and reference count.
    #[must_use]
    pub fn instance(id: i32, name: impl Into<String>, size: i32, pointers: i32) -> Self {
        Self {
            id,
            name: name.into(),
            size,
            element_size: 0,
            pointers_per_object: pointers,
            has_unknown_pointer_count: false,
            is_primitive_array: false,
        }
    }

    /// Array type. Reference arrays hold one pointer per element.
    #[must_use]
    pub fn array(id: i32, name: impl Into<String>, element_size: i32, primitive: bool) -> Self {
        Self {
            id,
            name: name.into(),
            size: -1,
            element_size,
            pointers_per_object: 0,
            has_unknown_pointer_count: false,
            is_primitive_array: primitive,
        }
    }

    /// Mark the reference count of this type as unreliable.
    #[must_use]
    pub const fn with_unknown_pointer_count(mut self) -> Self {
        self.has_unknown_pointer_count = true;
        self
    }

    #[must_use]
    pub const fn is_array(&self) -> bool {
        self.size < 0
    }
}

/// Allocation site, resolved lazily by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationSite {
    pub id: i32,
    pub description: String,
}

/// Reason a GC was triggered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcCause {
    pub id: i32,
    pub name: String,
}

/// Lookup tables for the ids used in the trace.
#[derive(Debug, Clone)]
pub struct Symbols {
    types: HashMap<i32, Arc<AllocatedType>>,
    sites: HashMap<i32, AllocationSite>,
    causes: HashMap<i32, GcCause>,
    /// Whether the trace carries reference payloads at all.
    pub expect_pointers: bool,
    /// Array header size in bytes.
    pub array_header_size: u64,
    /// Allocation granularity in bytes.
    pub heap_word_size: u64,
}

impl Symbols {
    #[must_use]
    pub fn new(expect_pointers: bool) -> Self {
        Self {
            types: HashMap::new(),
            sites: HashMap::new(),
            causes: HashMap::new(),
            expect_pointers,
            array_header_size: 16,
            heap_word_size: 8,
        }
    }

    pub fn add_type(&mut self, ty: AllocatedType) -> Arc<AllocatedType> {
        let ty = Arc::new(ty);
        self.types.insert(ty.id, Arc::clone(&ty));
        ty
    }

    pub fn add_site(&mut self, site: AllocationSite) {
        self.sites.insert(site.id, site);
    }

    pub fn add_cause(&mut self, cause: GcCause) {
        self.causes.insert(cause.id, cause);
    }

    /// Type by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the trace references a type that was never declared.
    pub fn type_by_id(&self, id: i32) -> Result<&Arc<AllocatedType>> {
        self.types
            .get(&id)
            .ok_or_else(|| TraceError::UnexpectedEvent(format!("unknown type id {id}")))
    }

    #[must_use]
    pub fn site_by_id(&self, id: i32) -> Option<&AllocationSite> {
        self.sites.get(&id)
    }

    #[must_use]
    pub fn cause_by_id(&self, id: i32) -> Option<&GcCause> {
        self.causes.get(&id)
    }

    /// Size in bytes of an array of `length` elements, rounded up to heap words.
    #[must_use]
    pub fn array_size(&self, ty: &AllocatedType, length: i32) -> u64 {
        let elements = u64::try_from(length.max(0)).unwrap_or(0);
        let element_size = u64::try_from(ty.element_size.max(0)).unwrap_or(0);
        let raw = self.array_header_size + elements * element_size;
        raw.div_ceil(self.heap_word_size) * self.heap_word_size
    }

    /// Number of reference slots an object declares, or `None` if the type
    /// reports a varying count.
    #[must_use]
    pub fn pointer_count_of(&self, info: &ObjectInfo) -> Option<usize> {
        if !self.expect_pointers {
            return Some(0);
        }
        if info.ty.has_unknown_pointer_count {
            return None;
        }
        let count = match info.array_length() {
            Some(_) if info.ty.is_primitive_array => 0,
            Some(length) => length,
            None => info.ty.pointers_per_object,
        };
        Some(usize::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    #[test]
    fn test_pointer_counts() {
        let mut symbols = Symbols::new(true);
        let node = symbols.add_type(AllocatedType::instance(1, "Node", 24, 2));
        let refs = symbols.add_type(AllocatedType::array(2, "Object[]", 8, false));
        let bytes = symbols.add_type(AllocatedType::array(3, "byte[]", 1, true));
        let weak = symbols.add_type(AllocatedType::instance(4, "WeakRef", 32, 3).with_unknown_pointer_count());

        let thread: Arc<str> = Arc::from("main");
        let obj = |ty: &Arc<AllocatedType>, len: Option<i32>| match len {
            Some(len) => ObjectInfo::array(&symbols, Arc::clone(&thread), Arc::clone(ty), 0, EventKind::Allocation, len),
            None => ObjectInfo::instance(Arc::clone(&thread), Arc::clone(ty), 0, EventKind::Allocation),
        };

        assert_eq!(symbols.pointer_count_of(&obj(&node, None)), Some(2));
        assert_eq!(symbols.pointer_count_of(&obj(&refs, Some(5))), Some(5));
        assert_eq!(symbols.pointer_count_of(&obj(&bytes, Some(64))), Some(0));
        assert_eq!(symbols.pointer_count_of(&obj(&weak, None)), None);
    }

    #[test]
    fn test_no_pointers_without_payloads() {
        let mut symbols = Symbols::new(false);
        let node = symbols.add_type(AllocatedType::instance(1, "Node", 24, 2));
        let info = ObjectInfo::instance(Arc::from("t"), node, 0, EventKind::Allocation);
        assert_eq!(symbols.pointer_count_of(&info), Some(0));
    }

    #[test]
    fn test_array_size_rounds_to_words() {
        let mut symbols = Symbols::new(true);
        let bytes = symbols.add_type(AllocatedType::array(3, "byte[]", 1, true));
        assert_eq!(symbols.array_size(&bytes, 0), 16);
        assert_eq!(symbols.array_size(&bytes, 1), 24);
        assert_eq!(symbols.array_size(&bytes, 8), 24);
        assert!(symbols.type_by_id(9).is_err());
    }
}
