//! Replay tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! spans and events for GC cycles, pointer repair and snapshot I/O.

#[cfg(feature = "tracing")]
pub mod internal {
    use std::sync::atomic::{AtomicU64, Ordering};
    use tracing::{span, Level};

    /// Phases of one replayed GC end.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ReplayPhase {
        /// Merge multi-threaded pointer fragments.
        Flush,
        /// Rewrite references to relocated objects.
        Repair,
        /// Commit space transitions.
        Commit,
        /// Check every reference against the front views.
        Validate,
    }

    /// Stable identifier for one replayed GC cycle.
    ///
    /// Used to correlate every event emitted while the replay processes a
    /// single GC start/end pair. Independent of the GC id in the trace, which
    /// may wrap or repeat across VM restarts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CycleId(pub u64);

    static NEXT_CYCLE_ID: AtomicU64 = AtomicU64::new(1);

    /// Generate the next unique cycle ID.
    pub fn next_cycle_id() -> CycleId {
        CycleId(NEXT_CYCLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a span for one GC cycle.
    pub fn trace_gc_cycle(kind: &str, cycle: CycleId) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_cycle", kind = kind, cycle_id = cycle.0).entered()
    }

    /// Create a span for repairing one space.
    pub fn trace_repair(space: &str) -> span::EnteredSpan {
        span!(Level::DEBUG, "repair_space", space = space).entered()
    }

    /// Log the start of a replay phase.
    pub fn log_phase_start(phase: ReplayPhase, spaces: usize) {
        tracing::debug!(phase = ?phase, spaces, "phase_start");
    }

    /// Log the end of a replay phase.
    pub fn log_phase_end(phase: ReplayPhase, objects: usize) {
        tracing::debug!(phase = ?phase, objects, "phase_end");
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    /// Stub phase when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ReplayPhase {
        Flush,
        Repair,
        Commit,
        Validate,
    }

    /// Stub type when tracing is disabled.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CycleId(pub u64);

    /// Stub function when tracing is disabled.
    pub const fn next_cycle_id() -> CycleId {
        CycleId(0)
    }

    /// Stub guard.
    pub struct NoSpan;

    pub const fn trace_gc_cycle(_kind: &str, _cycle: CycleId) -> NoSpan {
        NoSpan
    }

    pub const fn trace_repair(_space: &str) -> NoSpan {
        NoSpan
    }

    pub const fn log_phase_start(_phase: ReplayPhase, _spaces: usize) {}

    pub const fn log_phase_end(_phase: ReplayPhase, _objects: usize) {}
}

pub use internal::{CycleId, ReplayPhase};

/// Debug event, compiled out without the `tracing` feature.
macro_rules! replay_debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        ::tracing::debug!($($arg)*);
    };
}

/// Warning event, compiled out without the `tracing` feature.
macro_rules! replay_warn {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing")]
        ::tracing::warn!($($arg)*);
    };
}

pub(crate) use replay_debug;
pub(crate) use replay_warn;
