//! Reference repair at the end of a GC.
//!
//! Repair runs in two phases. New reference arrays are computed from shared
//! borrows of all spaces, split into one work item per lab. The arrays are
//! then written back with one exclusive borrow per space.

use crate::error::{Result, TraceError};
use crate::heap::Heap;
use crate::lab::Lab;
use crate::parallel;
use crate::pointer::handling::{update_refs_failed_gc, update_refs_new};
use crate::space::{Space, TransitionType};
use crate::tracing::{internal, replay_debug, replay_warn, ReplayPhase};

/// Which lab map of a space an object lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Front,
    Back,
}

/// New reference array for one object.
#[derive(Debug)]
struct ObjectRepair {
    view: View,
    addr: u64,
    pointers: Vec<i64>,
}

struct RepairUnit<'a> {
    space_idx: usize,
    space: &'a Space,
    view: View,
    lab: &'a Lab,
}

#[derive(Debug, Clone, Copy)]
struct RepairMode {
    failed: bool,
    full_gc: bool,
    consistency_check: bool,
}

/// Views of `space` whose objects need repair.
fn views_to_repair(space: &Space, failed: bool) -> Result<&'static [View]> {
    match space.transition() {
        TransitionType::Accumulative => Ok(&[View::Back, View::Front]),
        TransitionType::ReplaceAll => Ok(&[View::Front]),
        TransitionType::None if failed => Ok(&[View::Front]),
        TransitionType::None => Err(TraceError::invariant(format!(
            "space {space} has no transition at the end of a successful GC"
        ))),
    }
}

fn repair_lab(spaces: &[Space], unit: &RepairUnit<'_>, mode: RepairMode) -> Result<Vec<ObjectRepair>> {
    let mut repairs = Vec::new();
    for (addr, object) in unit.lab.objects() {
        let pointers = if mode.failed {
            update_refs_failed_gc(spaces, unit.space, object, mode.full_gc, mode.consistency_check)?
        } else {
            update_refs_new(spaces, unit.space, object)?
        };
        if let Some(pointers) = pointers {
            repairs.push(ObjectRepair {
                view: unit.view,
                addr,
                pointers,
            });
        }
    }
    Ok(repairs)
}

fn apply_repairs(space: &mut Space, repairs: Vec<ObjectRepair>) -> Result<usize> {
    let _span = internal::trace_repair(space.name());
    let count = repairs.len();
    for repair in repairs {
        let labs = match repair.view {
            View::Front => space.front_mut(),
            View::Back => space.back_mut(),
        };
        let object = labs.object_at_mut(repair.addr).ok_or_else(|| {
            TraceError::invariant(format!("repaired object at {:#x} disappeared", repair.addr))
        })?;
        object.fill_pointers(&repair.pointers)?;
    }
    Ok(count)
}

/// First error of `results`; the others are logged.
fn first_error<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut first = None;
    let mut values = Vec::with_capacity(results.len());
    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(err) if first.is_none() => first = Some(err),
            Err(err) => {
                replay_warn!(error = %err, "additional repair error");
                drop(err);
            }
        }
    }
    first.map_or(Ok(values), Err)
}

/// Bring every reference in the heap up to date at the end of a GC.
///
/// Completed multi-threaded reference arrays are applied first. After a
/// failed GC the forwarding addresses of rolled-back spaces are cleared.
///
/// # Errors
///
/// Fails on incomplete multi-threaded arrays, on spaces without a transition
/// after a successful GC and on any per-object repair error.
pub fn handle_ptrs_on_gc_end(heap: &mut Heap, failed: bool) -> Result<()> {
    internal::log_phase_start(ReplayPhase::Flush, heap.spaces().len());
    let completed = heap.pending_mut().drain_completed()?;
    let flushed = completed.len();
    for info in completed {
        heap.fill_relocated(info)?;
    }
    internal::log_phase_end(ReplayPhase::Flush, flushed);

    let mode = RepairMode {
        failed,
        full_gc: heap.gc_info().is_some_and(|gc| gc.kind.is_full()),
        consistency_check: heap.config().consistency_check,
    };
    let workers = heap.config().effective_workers();

    internal::log_phase_start(ReplayPhase::Repair, heap.spaces().len());
    let spaces = heap.spaces();
    let mut units = Vec::new();
    for (space_idx, space) in spaces.iter().enumerate() {
        for &view in views_to_repair(space, failed)? {
            let labs = match view {
                View::Front => space.front(),
                View::Back => space.back(),
            };
            units.extend(labs.iter().map(|lab| RepairUnit {
                space_idx,
                space,
                view,
                lab,
            }));
        }
    }
    let unit_spaces: Vec<usize> = units.iter().map(|unit| unit.space_idx).collect();
    let computed = first_error(parallel::fan_out(workers, units, |unit| {
        repair_lab(spaces, &unit, mode)
    }))?;

    let mut per_space: Vec<Vec<ObjectRepair>> = spaces.iter().map(|_| Vec::new()).collect();
    for (space_idx, repairs) in unit_spaces.into_iter().zip(computed) {
        per_space[space_idx].extend(repairs);
    }

    let work: Vec<(&mut Space, Vec<ObjectRepair>)> = heap.spaces_mut().iter_mut().zip(per_space).collect();
    let repaired: usize = first_error(parallel::fan_out(workers, work, |(space, repairs)| {
        apply_repairs(space, repairs)
    }))?
    .into_iter()
    .sum();

    if failed {
        for space in heap.spaces_mut() {
            if space.transition() == TransitionType::None {
                space.reset_forwarding_addresses();
            }
        }
    }
    replay_debug!(repaired, failed, "pointers repaired");
    internal::log_phase_end(ReplayPhase::Repair, repaired);
    Ok(())
}
