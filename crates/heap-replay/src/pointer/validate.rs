//! Post-GC reference validation.

use std::collections::HashSet;

use crate::error::{InvalidPointer, Result, TraceError};
use crate::heap::{find_space, Heap};
use crate::lab::Lab;
use crate::parallel;
use crate::space::Space;
use crate::tracing::{internal, replay_debug, ReplayPhase};

struct LabReport {
    invalid: Vec<InvalidPointer>,
    visited: Vec<u64>,
}

fn validate_lab(spaces: &[Space], lab: &Lab, stale: &HashSet<u64>) -> LabReport {
    let mut report = LabReport {
        invalid: Vec::new(),
        visited: Vec::new(),
    };
    for (addr, object) in lab.objects() {
        for &ptr in object.pointers() {
            let Ok(target) = u64::try_from(ptr) else { continue };
            let resolved = find_space(spaces, target).is_some_and(|space| space.front_object(target).is_some());
            if !resolved {
                report.invalid.push(InvalidPointer { from: addr, to: ptr });
            }
        }
        if stale.contains(&addr) {
            report.visited.push(addr);
        }
    }
    report
}

/// Check that every non-null reference in the heap names an object in the
/// front view of its space.
///
/// Objects whose references were assumed unchanged lose that flag once
/// they have been visited.
///
/// # Errors
///
/// Returns every unresolved reference in a single
/// [`TraceError::InvalidPointers`], and an invariant error if a flagged
/// object no longer exists.
pub fn validate_all_pointers(heap: &mut Heap) -> Result<()> {
    internal::log_phase_start(ReplayPhase::Validate, heap.spaces().len());
    let workers = heap.config().effective_workers();
    let stale = std::mem::take(heap.maybe_stale_mut());

    let spaces = heap.spaces();
    let labs: Vec<&Lab> = spaces.iter().flat_map(|space| space.front().iter()).collect();
    let reports = parallel::fan_out(workers, labs, |lab| validate_lab(spaces, lab, &stale));

    let mut remaining = stale;
    let mut invalid = Vec::new();
    for report in reports {
        invalid.extend(report.invalid);
        for addr in report.visited {
            remaining.remove(&addr);
        }
    }
    internal::log_phase_end(ReplayPhase::Validate, heap.object_count());

    if let Some(addr) = remaining.iter().min() {
        return Err(TraceError::invariant(format!(
            "{} objects flagged as possibly stale were not found after GC, first at {addr:#x}",
            remaining.len()
        )));
    }
    if invalid.is_empty() {
        return Ok(());
    }
    invalid.sort_unstable_by_key(|pointer| (pointer.from, pointer.to));
    replay_debug!(invalid = invalid.len(), "pointer validation failed");
    Err(TraceError::InvalidPointers(invalid))
}
