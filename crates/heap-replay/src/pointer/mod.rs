//! Reference bookkeeping and repair.
//!
//! Move and pointer-update records deliver reference arrays that are only
//! partially up to date. This module accumulates them per object, decides
//! which arrays can be trusted and rewrites stale references once the GC
//! that moved their targets has ended.

mod handling;
mod incomplete;
mod ptr_list;
mod repair;
mod validate;

pub use handling::{
    bias_first_slot, handle_moved_object_with_pointers, may_be_non_dirty, update_refs_failed_gc,
    update_refs_new, PayloadDisposition, SpaceLookup,
};
pub use incomplete::{IncompletePointerInfo, PendingPointers};
pub use ptr_list::{PtrEvent, PtrList};
pub use repair::handle_ptrs_on_gc_end;
pub use validate::validate_all_pointers;
