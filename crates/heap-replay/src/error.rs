//! Error taxonomy for heap replay.
//!
//! Trace-consistency errors and defect assertions abort the current replay.
//! Staleness of reference payloads is not an error and never shows up here.

use std::fmt;

use crate::space::TransitionType;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TraceError>;

/// A reference that did not resolve to an object during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidPointer {
    /// Address of the object holding the reference.
    pub from: u64,
    /// Address the reference points to.
    pub to: i64,
}

impl fmt::Display for InvalidPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "The object at address {} points to position {}, but no object is located at the to-position",
            self.from, self.to
        )
    }
}

/// Errors raised while replaying a trace or reading/writing snapshots.
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    /// A reference could not be resolved where the replayed GC guarantees a live object.
    #[error("trace inconsistency at {addr:#x} in space {space} ({transition:?}): {reason}")]
    TraceConsistency {
        addr: u64,
        space: String,
        transition: TransitionType,
        reason: String,
    },

    /// Trace event that does not fit the current heap state.
    #[error("unexpected trace event: {0}")]
    UnexpectedEvent(String),

    /// Internal state that must be unreachable for a well-formed trace.
    #[error("invariant violated: {0}")]
    Invariant(String),

    /// Pointer validation found references without a target object.
    #[error("{} invalid pointers:\n{}", .0.len(), join_lines(.0))]
    InvalidPointers(Vec<InvalidPointer>),

    /// Snapshot or index content that cannot be decoded.
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Underlying I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TraceError {
    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    pub(crate) fn consistency(
        addr: u64,
        space: &str,
        transition: TransitionType,
        reason: impl Into<String>,
    ) -> Self {
        Self::TraceConsistency {
            addr,
            space: space.to_owned(),
            transition,
            reason: reason.into(),
        }
    }

    /// Whether this error signals a replay inconsistency.
    #[must_use]
    pub const fn is_trace_consistency(&self) -> bool {
        matches!(self, Self::TraceConsistency { .. })
    }
}

fn join_lines(pointers: &[InvalidPointer]) -> String {
    pointers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pointers_lists_every_pair() {
        let err = TraceError::InvalidPointers(vec![
            InvalidPointer { from: 16, to: 64 },
            InvalidPointer { from: 32, to: 128 },
        ]);
        let msg = err.to_string();
        assert!(msg.starts_with("2 invalid pointers"));
        assert!(msg.contains("The object at address 16 points to position 64"));
        assert!(msg.contains("The object at address 32 points to position 128"));
    }

    #[test]
    fn test_consistency_error_names_space() {
        let err = TraceError::consistency(0x40, "Eden", TransitionType::ReplaceAll, "tag unset");
        assert!(err.is_trace_consistency());
        assert!(err.to_string().contains("Eden"));
        assert!(err.to_string().contains("ReplaceAll"));
    }
}
