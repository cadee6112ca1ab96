//! Replay configuration.

use std::num::NonZeroUsize;

/// Number of hardware threads, at least 1.
#[must_use]
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// Configuration for a heap replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayConfig {
    /// Maximum number of worker threads for pointer repair and validation.
    /// If 0 or 1, repair runs on the calling thread.
    pub max_workers: usize,
    /// Assert additional trace guarantees while repairing pointers.
    pub consistency_check: bool,
    /// Validate every reference after each successful GC end.
    pub validate_after_gc: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_workers: available_parallelism(),
            consistency_check: false,
            validate_after_gc: false,
        }
    }
}

impl ReplayConfig {
    /// Create a new configuration with the given maximum worker count.
    #[must_use]
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            ..Default::default()
        }
    }

    /// Configuration with consistency checks and post-GC validation enabled.
    #[must_use]
    pub fn checked() -> Self {
        Self {
            consistency_check: true,
            validate_after_gc: true,
            ..Default::default()
        }
    }

    /// Get the actual number of workers to use.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        self.max_workers.max(1)
    }

    /// Check if repair should fan out to worker threads.
    #[must_use]
    pub fn use_parallel(&self) -> bool {
        self.effective_workers() > 1
    }

    /// Set the maximum number of worker threads.
    pub const fn set_max_workers(&mut self, workers: usize) {
        self.max_workers = if workers < 1 { 1 } else { workers };
    }

    /// Enable or disable consistency checks.
    pub const fn set_consistency_check(&mut self, enabled: bool) {
        self.consistency_check = enabled;
    }

    /// Enable or disable validation after each GC.
    pub const fn set_validate_after_gc(&mut self, enabled: bool) {
        self.validate_after_gc = enabled;
    }
}

/// Which GC ends produce a heap snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpPolicy {
    /// Dump after every n-th GC end. 0 disables dumping.
    pub every_nth_gc: u32,
    /// Only dump after full collections.
    pub major_only: bool,
    /// Stop dumping after this many snapshots.
    pub max_dumps: Option<u32>,
}

impl Default for DumpPolicy {
    fn default() -> Self {
        Self {
            every_nth_gc: 1,
            major_only: false,
            max_dumps: None,
        }
    }
}

impl DumpPolicy {
    /// Whether a GC end with the given ordinal should be dumped.
    #[must_use]
    pub fn should_dump(&self, gc_ordinal: u32, is_full: bool, dumps_written: u32) -> bool {
        if self.every_nth_gc == 0 || (self.major_only && !is_full) {
            return false;
        }
        if self.max_dumps.is_some_and(|max| dumps_written >= max) {
            return false;
        }
        gc_ordinal % self.every_nth_gc == 0
    }
}
