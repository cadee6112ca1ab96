//! Trace event kinds and GC cycle descriptors.

/// Kind of a trace record, with its wire id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    /// Mutator allocation.
    Allocation = 0x01,
    GcStart = 0x02,
    GcEnd = 0x03,
    /// Marks one space as evacuated by the running GC.
    GcInfo = 0x04,
    GcFailed = 0x05,
    GcMoveSlow = 0x1E,
    GcMoveFastWide = 0x1F,
    GcMoveFast = 0x20,
    GcMoveFastNarrow = 0x21,
    GcMoveRegion = 0x22,
    GcKeepAlive = 0x23,
    GcDeallocation = 0x26,
    GcMoveSlowPtr = 0x27,
    GcMoveFastWidePtr = 0x28,
    GcMoveFastPtr = 0x29,
    GcKeepAlivePtr = 0x2A,
    /// Continues the reference payload of the previous move event.
    GcPtrExtension = 0x2B,
    /// Reference fragment produced by one of several GC worker threads.
    GcPtrMultithreaded = 0x2C,
    GcRootPtr = 0x2D,
    /// References of an unmoved object, valid before the move phase.
    GcPtrUpdatePremove = 0x2E,
    GcInterrupt = 0x2F,
    GcContinue = 0x30,
    /// References of an unmoved object, valid after the move phase.
    GcPtrUpdatePostmove = 0x31,
    GcTag = 0x32,
}

impl EventKind {
    const ALL: [Self; 24] = [
        Self::Allocation,
        Self::GcStart,
        Self::GcEnd,
        Self::GcInfo,
        Self::GcFailed,
        Self::GcMoveSlow,
        Self::GcMoveFastWide,
        Self::GcMoveFast,
        Self::GcMoveFastNarrow,
        Self::GcMoveRegion,
        Self::GcKeepAlive,
        Self::GcDeallocation,
        Self::GcMoveSlowPtr,
        Self::GcMoveFastWidePtr,
        Self::GcMoveFastPtr,
        Self::GcKeepAlivePtr,
        Self::GcPtrExtension,
        Self::GcPtrMultithreaded,
        Self::GcRootPtr,
        Self::GcPtrUpdatePremove,
        Self::GcInterrupt,
        Self::GcContinue,
        Self::GcPtrUpdatePostmove,
        Self::GcTag,
    ];

    /// Wire id of this kind.
    #[must_use]
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Look up a kind by wire id.
    #[must_use]
    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.id() == id)
    }

    /// Whether this record carries references for an object that is not
    /// itself moved by the record.
    #[must_use]
    pub const fn is_dedicated_ptr_event(self) -> bool {
        matches!(
            self,
            Self::GcPtrExtension
                | Self::GcPtrMultithreaded
                | Self::GcPtrUpdatePremove
                | Self::GcPtrUpdatePostmove
        )
    }

    /// Whether this record relocates (or keeps alive) an object.
    #[must_use]
    pub const fn is_move(self) -> bool {
        matches!(
            self,
            Self::GcMoveSlow
                | Self::GcMoveFastWide
                | Self::GcMoveFast
                | Self::GcMoveFastNarrow
                | Self::GcMoveRegion
                | Self::GcKeepAlive
                | Self::GcMoveSlowPtr
                | Self::GcMoveFastWidePtr
                | Self::GcMoveFastPtr
                | Self::GcKeepAlivePtr
        )
    }
}

/// Collection kind of a GC cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GcKind {
    /// Young-generation collection. Uncollected spaces keep their content.
    Minor,
    /// Whole-heap collection. Every object that is not moved dies.
    Major,
}

impl GcKind {
    /// Wire id of this kind.
    #[must_use]
    pub const fn id(self) -> i32 {
        match self {
            Self::Minor => 0,
            Self::Major => 1,
        }
    }

    /// Look up a kind by wire id.
    #[must_use]
    pub const fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Self::Minor),
            1 => Some(Self::Major),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_full(self) -> bool {
        matches!(self, Self::Major)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Minor => "minor",
            Self::Major => "major",
        }
    }
}

/// Descriptor of one GC start or end record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcInfo {
    /// `GcStart` or `GcEnd`.
    pub event: EventKind,
    pub kind: GcKind,
    /// Id into the symbol table's GC cause list.
    pub cause: i32,
    /// Sequence id shared by the start and end of one cycle.
    pub id: i16,
    /// Trace timestamp.
    pub time: i64,
    pub concurrent: bool,
}

impl GcInfo {
    /// Start record of a cycle.
    #[must_use]
    pub const fn start(kind: GcKind, cause: i32, id: i16, time: i64) -> Self {
        Self {
            event: EventKind::GcStart,
            kind,
            cause,
            id,
            time,
            concurrent: false,
        }
    }

    /// End record of a cycle.
    #[must_use]
    pub const fn end(kind: GcKind, cause: i32, id: i16, time: i64) -> Self {
        Self {
            event: EventKind::GcEnd,
            kind,
            cause,
            id,
            time,
            concurrent: false,
        }
    }

    #[must_use]
    pub const fn is_start(&self) -> bool {
        matches!(self.event, EventKind::GcStart)
    }
}
