//! Per-object pointer algorithms.
//!
//! Repairs are computed against borrowed views of the heap and returned as
//! new reference arrays, so the caller decides when and where to write them.

use crate::error::{Result, TraceError};
use crate::event::EventKind;
use crate::object::{AddressedObject, NULL_PTR, UPDATED_NULL_PTR};
use crate::space::{Space, TransitionType};

/// What a move or pointer-update record did to an object's references.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadDisposition {
    /// The payload replaced the references.
    Applied,
    /// The payload was absent or plausibly stale; references were kept.
    AssumedUnchanged,
}

/// Lookup of the space covering an address.
pub trait SpaceLookup: Sync {
    fn space_for(&self, addr: u64) -> Option<&Space>;
}

impl SpaceLookup for [Space] {
    fn space_for(&self, addr: u64) -> Option<&Space> {
        crate::heap::find_space(self, addr)
    }
}

/// A payload consisting only of null slots, sent for an object whose
/// declared count differs, means the references did not change since the
/// previous collection.
#[must_use]
pub fn may_be_non_dirty(object: &AddressedObject, pointers: &[i64]) -> bool {
    let has_correct_count = object
        .declared_pointer_count()
        .is_some_and(|count| count == pointers.len());
    !has_correct_count
        && pointers.iter().all(|&ptr| ptr == NULL_PTR)
        && !object.ty().has_unknown_pointer_count
}

/// Mark slot 0 as already repaired: non-null values get the +1 bias, null
/// becomes [`UPDATED_NULL_PTR`].
pub fn bias_first_slot(pointers: &mut [i64]) {
    if let Some(first) = pointers.first_mut() {
        *first = if *first == NULL_PTR {
            UPDATED_NULL_PTR
        } else {
            *first + 1
        };
    }
}

/// Apply the reference payload of a move or dedicated pointer record.
///
/// Full collections report post-move addresses, so move payloads get their
/// slot 0 biased. Dedicated records are only biased for post-move updates.
///
/// # Errors
///
/// Fails if the payload holds more references than the object declares.
pub fn handle_moved_object_with_pointers(
    object: &mut AddressedObject,
    event: EventKind,
    full_gc: bool,
    pointers: Option<&[i64]>,
) -> Result<PayloadDisposition> {
    let Some(pointers) = pointers.filter(|pointers| !may_be_non_dirty(object, pointers)) else {
        return Ok(PayloadDisposition::AssumedUnchanged);
    };
    let mut pointers = pointers.to_vec();
    let biased = if event.is_dedicated_ptr_event() {
        event == EventKind::GcPtrUpdatePostmove
    } else {
        full_gc
    };
    if biased {
        bias_first_slot(&mut pointers);
    }
    object.fill_pointers(&pointers)?;
    Ok(PayloadDisposition::Applied)
}

/// Undo the slot-0 marker of an object repaired inline.
///
/// Returns the corrected array if slot 0 carried a marker.
fn resolve_first_slot(pointers: &[i64]) -> Option<Vec<i64>> {
    let first = *pointers.first()?;
    let resolved = if first == UPDATED_NULL_PTR {
        NULL_PTR
    } else if first != NULL_PTR && first % 2 != 0 {
        first - 1
    } else {
        return None;
    };
    let mut pointers = pointers.to_vec();
    pointers[0] = resolved;
    Some(pointers)
}

fn as_addr(ptr: i64) -> Option<u64> {
    u64::try_from(ptr).ok()
}

/// Repair after a successful collection.
///
/// References into evacuated spaces are replaced by the forwarding address
/// of the pre-move object. Returns `None` if nothing changes.
///
/// # Errors
///
/// Fails if an evacuated target has no pre-move object or no forwarding address.
pub fn update_refs_new<L>(spaces: &L, holder: &Space, object: &AddressedObject) -> Result<Option<Vec<i64>>>
where
    L: SpaceLookup + ?Sized,
{
    let current = object.pointers();
    if current.is_empty() {
        return Ok(None);
    }
    if let Some(resolved) = resolve_first_slot(current) {
        return Ok(Some(resolved));
    }

    let mut updated: Option<Vec<i64>> = None;
    for (idx, &ptr) in current.iter().enumerate() {
        let Some(addr) = as_addr(ptr) else { continue };
        let Some(target) = spaces.space_for(addr) else { continue };
        if !target.is_being_collected() {
            continue;
        }
        let pre_move = target.pre_collection_view().labs.object_at(addr).ok_or_else(|| {
            TraceError::consistency(
                addr,
                target.name(),
                target.transition(),
                format!("no pre-move object for the reference {idx} of an object in {holder}"),
            )
        })?;
        let forwarded = pre_move.tag().forwarding_address().ok_or_else(|| {
            TraceError::consistency(
                addr,
                target.name(),
                target.transition(),
                format!("forwarding address not set, referenced by slot {idx} of an object in {holder}"),
            )
        })?;
        let forwarded = i64::try_from(forwarded)
            .map_err(|_| TraceError::invariant(format!("forwarding address {forwarded:#x} out of range")))?;
        updated.get_or_insert_with(|| current.to_vec())[idx] = forwarded;
    }
    Ok(updated)
}

/// Repair after a failed, non-full collection.
///
/// Returns `None` if nothing changes.
///
/// # Errors
///
/// Fails for full collections and when a referenced object cannot be found
/// where the failed GC must have left it.
pub fn update_refs_failed_gc<L>(
    spaces: &L,
    holder: &Space,
    object: &AddressedObject,
    full_gc: bool,
    consistency_check: bool,
) -> Result<Option<Vec<i64>>>
where
    L: SpaceLookup + ?Sized,
{
    if full_gc {
        return Err(TraceError::invariant("a full GC cannot fail"));
    }
    let current = object.pointers();
    if current.is_empty() {
        return Ok(None);
    }
    if let Some(resolved) = resolve_first_slot(current) {
        return Ok(Some(resolved));
    }

    let mut updated: Option<Vec<i64>> = None;
    for (idx, &ptr) in current.iter().enumerate() {
        let Some(addr) = as_addr(ptr) else { continue };
        let Some(target) = spaces.space_for(addr) else { continue };
        let forwarded = match target.transition() {
            TransitionType::None => {
                let obj = target.post_collection_view().labs.object_at(addr).ok_or_else(|| {
                    TraceError::consistency(
                        addr,
                        target.name(),
                        TransitionType::None,
                        format!("no object in front of the failed space, referenced by slot {idx} of an object in {holder}"),
                    )
                })?;
                // Moved before the failure: the object exists twice and the copy survives.
                obj.tag().forwarding_address()
            }
            TransitionType::Accumulative => {
                if consistency_check && target.pre_collection_view().labs.object_at(addr).is_none() {
                    return Err(TraceError::consistency(
                        addr,
                        target.name(),
                        TransitionType::Accumulative,
                        "expected the referenced object in the back view of an uncollected space",
                    ));
                }
                None
            }
            TransitionType::ReplaceAll => {
                let forwarded = target
                    .pre_collection_view()
                    .labs
                    .object_at(addr)
                    .and_then(|obj| obj.tag().forwarding_address());
                if forwarded.is_none() {
                    return Err(TraceError::consistency(
                        addr,
                        target.name(),
                        TransitionType::ReplaceAll,
                        format!("forwarding address not set, referenced by slot {idx} of an object in {holder}"),
                    ));
                }
                forwarded
            }
        };
        if let Some(forwarded) = forwarded {
            let forwarded = i64::try_from(forwarded)
                .map_err(|_| TraceError::invariant(format!("forwarding address {forwarded:#x} out of range")))?;
            updated.get_or_insert_with(|| current.to_vec())[idx] = forwarded;
        }
    }
    Ok(updated)
}
