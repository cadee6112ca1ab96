//! Root pointers and thread metadata.
//!
//! Roots are reported between GC start and GC end and describe why an
//! object is reachable. Thread records keep the call stack needed to
//! attribute local-variable roots.

/// Category of a root pointer, with its wire id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RootKind {
    ClassLoader = 0,
    Class = 1,
    StaticField = 2,
    LocalVariable = 3,
    VmInternalThreadData = 4,
    CodeBlob = 5,
    JniLocal = 6,
    JniGlobal = 7,
    ClassLoaderInternal = 8,
    Universe = 9,
    SystemDictionary = 10,
    BusyMonitor = 11,
    InternedString = 12,
    FlatProfiler = 13,
    Management = 14,
    Jvmti = 15,
    Debug = 16,
}

impl RootKind {
    const ALL: [Self; 17] = [
        Self::ClassLoader,
        Self::Class,
        Self::StaticField,
        Self::LocalVariable,
        Self::VmInternalThreadData,
        Self::CodeBlob,
        Self::JniLocal,
        Self::JniGlobal,
        Self::ClassLoaderInternal,
        Self::Universe,
        Self::SystemDictionary,
        Self::BusyMonitor,
        Self::InternedString,
        Self::FlatProfiler,
        Self::Management,
        Self::Jvmti,
        Self::Debug,
    ];

    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id)).copied()
    }

    /// Whether roots of this kind belong to one thread's execution state.
    #[must_use]
    pub const fn is_thread_local(self) -> bool {
        matches!(
            self,
            Self::LocalVariable | Self::VmInternalThreadData | Self::JniLocal | Self::CodeBlob
        )
    }
}

/// One root pointer with its kind-specific metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootPointer {
    ClassLoader { addr: u64, loader_name: String },
    Class { addr: u64, class_id: i32 },
    StaticField { addr: u64, class_id: i32, offset: i32 },
    LocalVariable {
        addr: u64,
        thread_id: i64,
        class_id: i32,
        method_id: i32,
        slot: i32,
        depth: i32,
    },
    VmInternalThreadData { addr: u64, thread_id: i64 },
    CodeBlob { addr: u64, class_id: i32, method_id: i32 },
    JniLocal { addr: u64, thread_id: i64 },
    JniGlobal { addr: u64, weak: bool },
    /// Roots without metadata beyond their kind.
    Other { addr: u64, kind: RootKind },
    Debug { addr: u64, vm_call: String },
}

impl RootPointer {
    #[must_use]
    pub const fn kind(&self) -> RootKind {
        match self {
            Self::ClassLoader { .. } => RootKind::ClassLoader,
            Self::Class { .. } => RootKind::Class,
            Self::StaticField { .. } => RootKind::StaticField,
            Self::LocalVariable { .. } => RootKind::LocalVariable,
            Self::VmInternalThreadData { .. } => RootKind::VmInternalThreadData,
            Self::CodeBlob { .. } => RootKind::CodeBlob,
            Self::JniLocal { .. } => RootKind::JniLocal,
            Self::JniGlobal { .. } => RootKind::JniGlobal,
            Self::Other { kind, .. } => *kind,
            Self::Debug { .. } => RootKind::Debug,
        }
    }

    /// Address of the rooted object.
    #[must_use]
    pub const fn addr(&self) -> u64 {
        match self {
            Self::ClassLoader { addr, .. }
            | Self::Class { addr, .. }
            | Self::StaticField { addr, .. }
            | Self::LocalVariable { addr, .. }
            | Self::VmInternalThreadData { addr, .. }
            | Self::CodeBlob { addr, .. }
            | Self::JniLocal { addr, .. }
            | Self::JniGlobal { addr, .. }
            | Self::Other { addr, .. }
            | Self::Debug { addr, .. } => *addr,
        }
    }

    pub fn set_addr(&mut self, new_addr: u64) {
        match self {
            Self::ClassLoader { addr, .. }
            | Self::Class { addr, .. }
            | Self::StaticField { addr, .. }
            | Self::LocalVariable { addr, .. }
            | Self::VmInternalThreadData { addr, .. }
            | Self::CodeBlob { addr, .. }
            | Self::JniLocal { addr, .. }
            | Self::JniGlobal { addr, .. }
            | Self::Other { addr, .. }
            | Self::Debug { addr, .. } => *addr = new_addr,
        }
    }
}

/// One frame of a thread's call stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    pub class_id: i32,
    pub method_id: i32,
}

/// A mutator thread seen in the trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: i64,
    pub name: String,
    /// Name used by the VM to tag allocations of this thread.
    pub internal_name: String,
    pub alive: bool,
    /// Innermost frame first.
    pub call_stack: Vec<StackFrame>,
}

impl ThreadInfo {
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>, internal_name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            internal_name: internal_name.into(),
            alive: true,
            call_stack: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_kind_ids() {
        for kind in RootKind::ALL {
            assert_eq!(RootKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(RootKind::from_id(17), None);
    }

    #[test]
    fn test_root_address_update() {
        let mut root = RootPointer::Other {
            addr: 64,
            kind: RootKind::Universe,
        };
        root.set_addr(128);
        assert_eq!(root.addr(), 128);
        assert_eq!(root.kind(), RootKind::Universe);
        assert!(RootKind::LocalVariable.is_thread_local());
    }
}
