//! The replayed heap.
//!
//! [`Heap`] owns all spaces and drives their transitions at GC boundaries.
//! Pointer repair and validation live in [`crate::pointer`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::config::ReplayConfig;
use crate::error::{Result, TraceError};
use crate::event::{EventKind, GcInfo};
use crate::lab::{Lab, LabKind};
use crate::object::{AddressedObject, ObjectInfo, ObjectInfoCache, Tag};
use crate::pointer::{self, IncompletePointerInfo, PayloadDisposition, PendingPointers};
use crate::roots::{RootPointer, ThreadInfo};
use crate::space::{Space, SpaceMode, SpaceType, TransitionType};
use crate::symbols::Symbols;
use crate::tracing::{internal, replay_debug, CycleId};

/// Space covering `addr` in a slice sorted by address.
#[must_use]
pub fn find_space(spaces: &[Space], addr: u64) -> Option<&Space> {
    let idx = spaces.partition_point(|space| space.addr() <= addr);
    idx.checked_sub(1)
        .map(|idx| &spaces[idx])
        .filter(|space| space.contains(addr))
}

/// Move payloads belong to the relocated copy; objects kept alive in a
/// retained space and dedicated updates use the view holding the object.
fn payload_in_front(space: &Space, event: EventKind, to: u64) -> bool {
    !event.is_dedicated_ptr_event() && space.front_object(to).is_some()
}

fn find_space_index(spaces: &[Space], addr: u64) -> Option<usize> {
    let idx = spaces.partition_point(|space| space.addr() <= addr).checked_sub(1)?;
    spaces[idx].contains(addr).then_some(idx)
}

/// Replayed heap state.
#[derive(Debug)]
pub struct Heap {
    /// Sorted by address.
    spaces: Vec<Space>,
    symbols: Symbols,
    config: ReplayConfig,
    cache: ObjectInfoCache,
    /// Latest GC start or end record.
    gc: Option<GcInfo>,
    cycle: Option<CycleId>,
    gc_failed: bool,
    collected: Vec<u16>,
    roots: BTreeMap<u64, Vec<RootPointer>>,
    clear_roots: bool,
    root_moves: HashMap<u64, u64>,
    threads: BTreeMap<String, ThreadInfo>,
    pending: PendingPointers,
    maybe_stale: HashSet<u64>,
}

impl Heap {
    #[must_use]
    pub fn new(symbols: Symbols, config: ReplayConfig) -> Self {
        Self {
            spaces: Vec::new(),
            symbols,
            config,
            cache: ObjectInfoCache::new(),
            gc: None,
            cycle: None,
            gc_failed: false,
            collected: Vec::new(),
            roots: BTreeMap::new(),
            clear_roots: false,
            root_moves: HashMap::new(),
            threads: BTreeMap::new(),
            pending: PendingPointers::new(),
            maybe_stale: HashSet::new(),
        }
    }

    #[must_use]
    pub const fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    #[must_use]
    pub const fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn cache_mut(&mut self) -> &mut ObjectInfoCache {
        &mut self.cache
    }

    /// Latest GC record seen.
    #[must_use]
    pub const fn gc_info(&self) -> Option<&GcInfo> {
        self.gc.as_ref()
    }

    #[must_use]
    pub fn is_gc_active(&self) -> bool {
        self.gc.is_some_and(|gc| gc.is_start())
    }

    fn is_full_gc(&self) -> bool {
        self.gc.is_some_and(|gc| gc.kind.is_full())
    }

    /// Add a space.
    ///
    /// # Errors
    ///
    /// Fails if the id is taken or the range overlaps another space.
    pub fn add_space(&mut self, space: Space) -> Result<()> {
        if self.spaces.iter().any(|s| s.id() == space.id()) {
            return Err(TraceError::UnexpectedEvent(format!("space id {} registered twice", space.id())));
        }
        if let Some(other) = self
            .spaces
            .iter()
            .find(|s| s.addr() < space.end() && space.addr() < s.end())
        {
            return Err(TraceError::UnexpectedEvent(format!("{space} overlaps {other}")));
        }
        let idx = self.spaces.partition_point(|s| s.addr() < space.addr());
        self.spaces.insert(idx, space);
        Ok(())
    }

    #[must_use]
    pub fn spaces(&self) -> &[Space] {
        &self.spaces
    }

    pub(crate) fn spaces_mut(&mut self) -> &mut [Space] {
        &mut self.spaces
    }

    /// Space by id.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids.
    pub fn space(&self, id: u16) -> Result<&Space> {
        self.spaces
            .iter()
            .find(|space| space.id() == id)
            .ok_or_else(|| TraceError::UnexpectedEvent(format!("unknown space id {id}")))
    }

    fn space_mut(&mut self, id: u16) -> Result<&mut Space> {
        self.spaces
            .iter_mut()
            .find(|space| space.id() == id)
            .ok_or_else(|| TraceError::UnexpectedEvent(format!("unknown space id {id}")))
    }

    /// Update the type and mode of a space.
    ///
    /// # Errors
    ///
    /// Fails for unknown ids.
    pub fn set_space_type(&mut self, id: u16, ty: Option<SpaceType>, mode: Option<SpaceMode>) -> Result<()> {
        let space = self.space_mut(id)?;
        space.set_space_type(ty);
        space.set_mode(mode);
        Ok(())
    }

    #[must_use]
    pub fn space_for(&self, addr: u64) -> Option<&Space> {
        find_space(&self.spaces, addr)
    }

    fn space_for_mut(&mut self, addr: u64) -> Result<&mut Space> {
        let idx = find_space_index(&self.spaces, addr)
            .ok_or_else(|| TraceError::UnexpectedEvent(format!("no space covers {addr:#x}")))?;
        Ok(&mut self.spaces[idx])
    }

    /// Object at `addr` in the view of its space that currently holds it.
    #[must_use]
    pub fn object(&self, addr: u64) -> Option<&AddressedObject> {
        self.space_for(addr)?.object(addr)
    }

    #[must_use]
    pub fn front_object(&self, addr: u64) -> Option<&AddressedObject> {
        self.space_for(addr)?.front_object(addr)
    }

    #[must_use]
    pub fn back_object(&self, addr: u64) -> Option<&AddressedObject> {
        self.space_for(addr)?.back_object(addr)
    }

    /// Number of objects in all front views.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.spaces.iter().map(|space| space.front().object_count()).sum()
    }

    /// Register an allocation buffer handed to `thread`.
    ///
    /// # Errors
    ///
    /// Fails if no space covers `addr` or the lab overlaps another one.
    pub fn assign_lab(&mut self, thread: &Arc<str>, kind: LabKind, addr: u64, capacity: Option<u64>) -> Result<()> {
        let lab = Lab::multi(Arc::clone(thread), kind, addr, capacity);
        self.space_for_mut(addr)?.assign_lab(lab)
    }

    /// Allocate a new object at `addr`.
    ///
    /// # Errors
    ///
    /// Fails if no space covers `addr` or the covering lab rejects the object.
    pub fn allocate(&mut self, addr: u64, info: ObjectInfo) -> Result<u64> {
        let info = self.cache.intern(info);
        let thread = Arc::clone(&info.thread);
        let object = AddressedObject::create(info, &self.symbols);
        self.space_for_mut(addr)?.assign(&thread, LabKind::Virtual, addr, object)
    }

    /// Start a GC cycle.
    ///
    /// Full collections evacuate every space; other collections keep every
    /// space until [`Heap::mark_space_for_collection`] says otherwise.
    ///
    /// # Errors
    ///
    /// Fails if a GC is already active.
    pub fn gc_start(&mut self, info: GcInfo) -> Result<()> {
        if self.is_gc_active() {
            return Err(TraceError::UnexpectedEvent(format!("GC {} started while another GC is active", info.id)));
        }
        let cycle = internal::next_cycle_id();
        let transition = if info.kind.is_full() {
            TransitionType::ReplaceAll
        } else {
            TransitionType::Accumulative
        };
        for space in &mut self.spaces {
            if space.space_type().is_none() {
                space.start_transition(TransitionType::ReplaceAll)?;
                space.commit_transition()?;
            }
            if !space.is_being_collected() {
                space.start_transition(transition)?;
            }
        }
        self.maybe_stale.clear();
        self.root_moves.clear();
        self.clear_roots = true;
        self.gc_failed = false;
        self.collected.clear();
        self.gc = Some(info);
        self.cycle = Some(cycle);
        replay_debug!(gc_id = info.id, kind = info.kind.name(), cycle_id = cycle.0, "gc_start");
        Ok(())
    }

    /// Mark a space as evacuated by the running GC.
    ///
    /// # Errors
    ///
    /// Fails if no GC is active or the space is already being collected.
    pub fn mark_space_for_collection(&mut self, space_id: u16) -> Result<()> {
        if !self.is_gc_active() {
            return Err(TraceError::UnexpectedEvent(format!("space {space_id} marked for collection outside a GC")));
        }
        let space = self.space_mut(space_id)?;
        if space.transition() == TransitionType::Accumulative {
            space.commit_transition()?;
        }
        space.start_transition(TransitionType::ReplaceAll)?;
        self.collected.push(space_id);
        Ok(())
    }

    /// Abort the collection of one space.
    ///
    /// # Errors
    ///
    /// Fails for unknown spaces, spaces without a running transition, or if
    /// the rollback cannot split labs.
    pub fn fail_space(&mut self, space_id: u16) -> Result<()> {
        let space = self.space_mut(space_id)?;
        replay_debug!(space = %space, "fail_gc");
        space.rollback_transition()?;
        self.gc_failed = true;
        Ok(())
    }

    /// Pause the evacuation of the space covering `addr`. Everything below
    /// `addr` is committed, the rest stays in place, and the space
    /// accumulates moved objects until [`Heap::continue_gc`].
    ///
    /// # Errors
    ///
    /// Fails if GC `gc_id` is not running, does not collect that space, or
    /// still evacuates another space afterwards.
    pub fn interrupt_gc(&mut self, gc_id: i16, addr: u64) -> Result<()> {
        let space_id = self.collected_space(gc_id, addr)?;
        let space = self.space_mut(space_id)?;
        if !space.is_being_collected() {
            return Err(TraceError::UnexpectedEvent(format!(
                "GC {gc_id} interrupted {space}, which is not being collected"
            )));
        }
        space.commit_transition_to(addr)?;
        space.start_transition(TransitionType::Accumulative)?;
        replay_debug!(gc_id, addr, space = %space, "gc_interrupt");
        self.ensure_no_evacuation(gc_id)
    }

    /// Resume the evacuation of the space covering `addr`, which was paused
    /// by [`Heap::interrupt_gc`]. Objects below `addr` are already in place.
    ///
    /// # Errors
    ///
    /// Fails if GC `gc_id` is not running, does not collect that space, or
    /// still evacuates any of its spaces.
    pub fn continue_gc(&mut self, gc_id: i16, addr: u64) -> Result<()> {
        let space_id = self.collected_space(gc_id, addr)?;
        self.ensure_no_evacuation(gc_id)?;
        let space = self.space_mut(space_id)?;
        space.start_transition_from(addr)?;
        replay_debug!(gc_id, addr, space = %space, "gc_continue");
        Ok(())
    }

    /// Id of the space covering `addr`, which GC `gc_id` must collect.
    fn collected_space(&self, gc_id: i16, addr: u64) -> Result<u16> {
        let active = self
            .gc
            .filter(GcInfo::is_start)
            .ok_or_else(|| TraceError::UnexpectedEvent(format!("GC {gc_id} paused or resumed while no GC is active")))?;
        if active.id != gc_id {
            return Err(TraceError::UnexpectedEvent(format!(
                "GC {gc_id} paused or resumed while GC {} is active",
                active.id
            )));
        }
        let space = self
            .space_for(addr)
            .ok_or_else(|| TraceError::UnexpectedEvent(format!("no space covers {addr:#x}")))?;
        if !self.collected.contains(&space.id()) {
            return Err(TraceError::UnexpectedEvent(format!(
                "GC {gc_id} does not collect {space}"
            )));
        }
        Ok(space.id())
    }

    fn ensure_no_evacuation(&self, gc_id: i16) -> Result<()> {
        let running = self
            .spaces
            .iter()
            .find(|space| self.collected.contains(&space.id()) && space.is_being_collected());
        match running {
            Some(space) => Err(TraceError::UnexpectedEvent(format!(
                "GC {gc_id} still collects {space}, an interrupt is missing"
            ))),
            None => Ok(()),
        }
    }

    /// Whether a space of the running GC was rolled back.
    #[must_use]
    pub const fn gc_failed(&self) -> bool {
        self.gc_failed
    }

    /// Relocate the object at `from` to `to`.
    ///
    /// The pre-move object stays in the back view and records `to` as its
    /// forwarding address; a copy is placed in the front view of the space
    /// covering `to`, in a lab of `lab_kind` unless a front lab already
    /// covers `to`.
    ///
    /// Returns the size of the moved object.
    ///
    /// # Errors
    ///
    /// Fails if no GC is active, there is no object at `from`, or the copy
    /// cannot be placed.
    pub fn move_object(&mut self, thread: &Arc<str>, from: u64, to: u64, lab_kind: LabKind) -> Result<u64> {
        if !self.is_gc_active() {
            return Err(TraceError::UnexpectedEvent(format!("move of {from:#x} outside a GC")));
        }
        let source = self.space_for_mut(from)?;
        let (name, transition) = (source.name().to_owned(), source.transition());
        let original = source
            .object_mut(from)
            .ok_or_else(|| TraceError::consistency(from, &name, transition, "no object to move"))?;
        original.set_tag(Tag::Forwarded(to));
        let copy = original.relocated_copy();
        let size = copy.size();
        let assigned = self.space_for_mut(to)?.assign(thread, lab_kind, to, copy)?;
        if assigned != to {
            return Err(TraceError::invariant(format!("object moved to {to:#x} was placed at {assigned:#x}")));
        }
        if self.roots.contains_key(&from) {
            self.root_moves.insert(from, to);
        }
        Ok(size)
    }

    /// Move an object and apply the reference payload of its move record.
    ///
    /// # Errors
    ///
    /// See [`Heap::move_object`] and [`Heap::apply_pointers`].
    pub fn move_object_with_pointers(
        &mut self,
        thread: &Arc<str>,
        event: EventKind,
        from: u64,
        to: u64,
        lab_kind: LabKind,
        pointers: Option<&[i64]>,
    ) -> Result<PayloadDisposition> {
        self.move_object(thread, from, to, lab_kind)?;
        self.apply_pointers(event, to, pointers)
    }

    /// Keep an object alive at its address.
    ///
    /// Objects in evacuated spaces are moved onto themselves; objects in
    /// retained spaces just lose any stale forwarding address.
    ///
    /// # Errors
    ///
    /// Fails if there is no object at `addr`.
    pub fn keep_alive(&mut self, thread: &Arc<str>, addr: u64) -> Result<()> {
        let space = self.space_for_mut(addr)?;
        if space.is_being_collected() {
            self.move_object(thread, addr, addr, LabKind::Virtual)?;
            return Ok(());
        }
        let (name, transition) = (space.name().to_owned(), space.transition());
        space
            .object_mut(addr)
            .ok_or_else(|| TraceError::consistency(addr, &name, transition, "no object to keep alive"))?
            .set_tag(Tag::NoForward);
        Ok(())
    }

    /// Move `count` consecutive objects starting at `from` to consecutive
    /// addresses starting at `to`.
    ///
    /// Each destination space receives one region lab, sealed at the size of
    /// the objects it received.
    ///
    /// # Errors
    ///
    /// Fails like [`Heap::move_object`] for any object of the region.
    pub fn move_region(&mut self, thread: &Arc<str>, from: u64, to: u64, count: usize) -> Result<()> {
        let (mut from, mut to) = (from, to);
        let mut open_lab: Option<(u16, u64)> = None;
        for _ in 0..count {
            let space_id = self
                .space_for(to)
                .map(Space::id)
                .ok_or_else(|| TraceError::UnexpectedEvent(format!("no space covers {to:#x}")))?;
            if let Some((open_space, lab)) = open_lab {
                if open_space != space_id {
                    self.seal_lab(lab)?;
                }
            }
            if open_lab.is_none_or(|(open_space, _)| open_space != space_id) {
                open_lab = Some((space_id, to));
            }
            let size = self.move_object(thread, from, to, LabKind::RegionVirtual)?;
            from += size;
            to += size;
        }
        if let Some((_, lab)) = open_lab {
            self.seal_lab(lab)?;
        }
        Ok(())
    }

    fn seal_lab(&mut self, addr: u64) -> Result<()> {
        if let Some(lab) = self.space_for_mut(addr)?.front_mut().lab_containing_mut(addr) {
            lab.reset_capacity();
        }
        Ok(())
    }

    /// Apply a reference payload to its object.
    ///
    /// Move payloads go to the relocated copy at `to`; dedicated update
    /// payloads go to the unmoved object at `to`. Payloads that may be stale
    /// leave the references untouched and flag the object.
    ///
    /// # Errors
    ///
    /// Fails if the object cannot be found or the payload holds more
    /// references than the object declares.
    pub fn apply_pointers(&mut self, event: EventKind, to: u64, pointers: Option<&[i64]>) -> Result<PayloadDisposition> {
        let full_gc = self.is_full_gc();
        let space = self.space_for_mut(to)?;
        let (name, transition) = (space.name().to_owned(), space.transition());
        let object = if payload_in_front(space, event, to) {
            space.front_mut().object_at_mut(to)
        } else {
            space.object_mut(to)
        }
        .ok_or_else(|| TraceError::consistency(to, &name, transition, "no object for the reference payload"))?;
        let disposition = pointer::handle_moved_object_with_pointers(object, event, full_gc, pointers)?;
        if disposition == PayloadDisposition::AssumedUnchanged {
            self.maybe_stale.insert(to);
        }
        Ok(disposition)
    }

    /// Object a payload of `event` for `to` is applied to.
    pub(crate) fn payload_target(&self, event: EventKind, to: u64) -> Option<&AddressedObject> {
        let space = self.space_for(to)?;
        if payload_in_front(space, event, to) {
            space.front_object(to)
        } else {
            space.object(to)
        }
    }

    /// Fill the references of a relocated object from a completed
    /// multi-threaded array.
    pub(crate) fn fill_relocated(&mut self, info: IncompletePointerInfo) -> Result<()> {
        let to = info.to_addr();
        let from = info.from_addr();
        let pointers = info.into_pointers();
        let in_front = self
            .space_for(to)
            .is_some_and(|space| space.front_object(to).is_some());
        let object = if in_front {
            self.space_for_mut(to)?.front_mut().object_at_mut(to)
        } else {
            let from = from.unwrap_or(to);
            self.space_for_mut(from)?.object_mut(from)
        };
        let object = object.ok_or_else(|| {
            TraceError::invariant(format!("no relocated object at {to:#x} for multi-threaded references"))
        })?;
        object.fill_pointers(&pointers)
    }

    /// Register the references of an object still awaiting fragments.
    ///
    /// # Errors
    ///
    /// Fails if the object already has a registered array.
    pub fn register_incomplete(&mut self, info: IncompletePointerInfo) -> Result<()> {
        self.pending.register(info)
    }

    /// Append a multi-threaded fragment to its registered array.
    ///
    /// Returns `false` if the target has not been registered yet.
    ///
    /// # Errors
    ///
    /// Fails if the fragment overflows the array.
    pub fn add_multithreaded_fragment(&self, to: u64, pointers: &[i64]) -> Result<bool> {
        match self.pending.get(to) {
            Some(info) => info.add_pointers(pointers).map(|()| true),
            None => Ok(false),
        }
    }

    /// Keep fragments that did not find their array yet until GC end.
    pub fn stash_unmatched(&mut self, fragments: Vec<IncompletePointerInfo>) {
        self.pending.stash_unmatched(fragments);
    }

    pub(crate) fn pending_mut(&mut self) -> &mut PendingPointers {
        &mut self.pending
    }

    /// Addresses of objects whose references were assumed unchanged.
    #[must_use]
    pub const fn maybe_stale(&self) -> &HashSet<u64> {
        &self.maybe_stale
    }

    pub(crate) fn maybe_stale_mut(&mut self) -> &mut HashSet<u64> {
        &mut self.maybe_stale
    }

    /// End the running GC: repair references, then commit every transition.
    ///
    /// # Errors
    ///
    /// Fails if no GC with this id is active, on any repair error, and on
    /// validation failure when validation after GC is enabled.
    pub fn gc_end(&mut self, info: GcInfo, failed: bool) -> Result<()> {
        let active = self
            .gc
            .filter(GcInfo::is_start)
            .ok_or_else(|| TraceError::UnexpectedEvent(format!("GC {} ended while no GC is active", info.id)))?;
        if active.id != info.id {
            return Err(TraceError::UnexpectedEvent(format!(
                "GC {} ended while GC {} is active",
                info.id, active.id
            )));
        }
        let cycle = self.cycle.unwrap_or_else(internal::next_cycle_id);
        let _span = internal::trace_gc_cycle(active.kind.name(), cycle);
        let failed = failed || self.gc_failed;

        if self.symbols.expect_pointers {
            pointer::handle_ptrs_on_gc_end(self, failed)?;
        }

        internal::log_phase_start(internal::ReplayPhase::Commit, self.spaces.len());
        for space in &mut self.spaces {
            space.commit_transition()?;
            if space.space_type().is_none() {
                space.clear();
            }
            space.remove_empty_labs();
        }
        self.relocate_roots();
        internal::log_phase_end(internal::ReplayPhase::Commit, self.object_count());

        self.gc = Some(info);
        self.gc_failed = false;
        if info.kind.is_full() {
            self.cache.shrink();
        }
        replay_debug!(gc_id = info.id, failed, objects = self.object_count(), "gc_end");

        if self.config.validate_after_gc && self.symbols.expect_pointers {
            pointer::validate_all_pointers(self)?;
        }
        Ok(())
    }

    fn relocate_roots(&mut self) {
        for (from, to) in self.root_moves.drain() {
            if let Some(mut roots) = self.roots.remove(&from) {
                for root in &mut roots {
                    root.set_addr(to);
                }
                self.roots.entry(to).or_default().append(&mut roots);
            }
        }
        let spaces = &self.spaces;
        self.roots
            .retain(|&addr, _| find_space(spaces, addr).is_some_and(|space| space.front_object(addr).is_some()));
    }

    /// Record a root pointer. The first root after a GC start replaces all
    /// roots of the previous cycle.
    pub fn add_root(&mut self, root: RootPointer) {
        if self.clear_roots {
            self.roots.clear();
            self.clear_roots = false;
        }
        self.roots.entry(root.addr()).or_default().push(root);
    }

    #[must_use]
    pub const fn roots(&self) -> &BTreeMap<u64, Vec<RootPointer>> {
        &self.roots
    }

    /// Register a thread, replacing an earlier record with the same internal name.
    pub fn add_thread(&mut self, thread: ThreadInfo) {
        self.threads.insert(thread.internal_name.clone(), thread);
    }

    /// Mark a thread as terminated.
    ///
    /// # Errors
    ///
    /// Fails for unknown threads.
    pub fn thread_death(&mut self, internal_name: &str) -> Result<()> {
        let thread = self
            .threads
            .get_mut(internal_name)
            .ok_or_else(|| TraceError::UnexpectedEvent(format!("death of unknown thread {internal_name}")))?;
        thread.alive = false;
        Ok(())
    }

    pub fn thread_mut(&mut self, internal_name: &str) -> Option<&mut ThreadInfo> {
        self.threads.get_mut(internal_name)
    }

    #[must_use]
    pub const fn threads(&self) -> &BTreeMap<String, ThreadInfo> {
        &self.threads
    }

    /// Restore heap content decoded from a snapshot.
    pub(crate) fn restore(
        &mut self,
        gc: GcInfo,
        spaces: Vec<Space>,
        roots: BTreeMap<u64, Vec<RootPointer>>,
        threads: BTreeMap<String, ThreadInfo>,
    ) -> Result<()> {
        self.spaces.clear();
        for space in spaces {
            self.add_space(space)?;
        }
        self.gc = Some(gc);
        self.roots = roots;
        self.threads = threads;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::GcKind;
    use crate::symbols::AllocatedType;

    fn heap() -> Heap {
        let mut symbols = Symbols::new(true);
        symbols.add_type(AllocatedType::instance(1, "Node", 16, 1));
        let mut heap = Heap::new(symbols, ReplayConfig::new(1));
        heap.add_space(Space::new(0, "Eden", 0x1000, 0x1000).with_type(SpaceType::Eden))
            .unwrap();
        heap.add_space(Space::new(1, "Old", 0x4000, 0x1000).with_type(SpaceType::Old))
            .unwrap();
        heap
    }

    fn node(heap: &Heap) -> ObjectInfo {
        let ty = Arc::clone(heap.symbols().type_by_id(1).unwrap());
        ObjectInfo::instance(Arc::from("main"), ty, 0, EventKind::Allocation)
    }

    #[test]
    fn test_space_lookup() {
        let heap = heap();
        assert_eq!(heap.space_for(0x1000).unwrap().name(), "Eden");
        assert_eq!(heap.space_for(0x4fff).unwrap().name(), "Old");
        assert!(heap.space_for(0x2000).is_none());
        assert!(heap.space_for(0).is_none());
    }

    #[test]
    fn test_overlapping_space_rejected() {
        let mut heap = heap();
        assert!(heap.add_space(Space::new(2, "Bad", 0x1800, 0x100)).is_err());
        assert!(heap.add_space(Space::new(1, "Dup", 0x9000, 0x100)).is_err());
    }

    #[test]
    fn test_minor_gc_start_transitions() {
        let mut heap = heap();
        heap.gc_start(GcInfo::start(GcKind::Minor, 0, 1, 10)).unwrap();
        assert!(heap.spaces().iter().all(|s| s.transition() == TransitionType::Accumulative));
        heap.mark_space_for_collection(0).unwrap();
        assert_eq!(heap.space(0).unwrap().transition(), TransitionType::ReplaceAll);
        assert!(heap.gc_start(GcInfo::start(GcKind::Minor, 0, 2, 11)).is_err());
    }

    #[test]
    fn test_move_records_forwarding() {
        let mut heap = heap();
        let info = node(&heap);
        heap.allocate(0x1000, info).unwrap();
        heap.gc_start(GcInfo::start(GcKind::Major, 0, 1, 10)).unwrap();
        heap.move_object(&Arc::from("gc"), 0x1000, 0x4000, LabKind::Plab).unwrap();
        assert_eq!(heap.back_object(0x1000).unwrap().tag(), Tag::Forwarded(0x4000));
        assert_eq!(heap.front_object(0x4000).unwrap().tag(), Tag::NoForward);
        heap.gc_end(GcInfo::end(GcKind::Major, 0, 1, 20), false).unwrap();
        assert!(heap.object(0x1000).is_none());
        assert!(heap.object(0x4000).is_some());
    }

    #[test]
    fn test_interrupted_compaction() {
        let mut heap = heap();
        for addr in [0x4000, 0x4010, 0x4020, 0x4030] {
            let info = node(&heap);
            heap.allocate(addr, info).unwrap();
        }
        let gc: Arc<str> = Arc::from("gc");
        heap.gc_start(GcInfo::start(GcKind::Minor, 0, 1, 10)).unwrap();
        assert!(heap.interrupt_gc(1, 0x4020).is_err());
        heap.mark_space_for_collection(1).unwrap();
        heap.move_object(&gc, 0x4010, 0x4000, LabKind::Plab).unwrap();

        heap.interrupt_gc(1, 0x4020).unwrap();
        assert_eq!(heap.space(1).unwrap().transition(), TransitionType::Accumulative);
        assert!(heap.interrupt_gc(1, 0x4020).is_err());
        assert!(heap.continue_gc(2, 0x4020).is_err());
        assert!(heap.continue_gc(1, 0x1000).is_err());

        heap.continue_gc(1, 0x4020).unwrap();
        assert!(heap.space(1).unwrap().is_being_collected());
        assert!(heap.continue_gc(1, 0x4020).is_err());
        heap.move_object(&gc, 0x4030, 0x4010, LabKind::Plab).unwrap();
        heap.gc_end(GcInfo::end(GcKind::Minor, 0, 1, 20), false).unwrap();

        assert!(heap.object(0x4000).is_some());
        assert!(heap.object(0x4010).is_some());
        assert!(heap.object(0x4020).is_none());
        assert!(heap.object(0x4030).is_none());
        assert_eq!(heap.object_count(), 2);
    }

    #[test]
    fn test_roots_replaced_per_cycle() {
        let mut heap = heap();
        heap.add_root(RootPointer::Class { addr: 0x1000, class_id: 1 });
        heap.gc_start(GcInfo::start(GcKind::Minor, 0, 1, 10)).unwrap();
        heap.add_root(RootPointer::Class { addr: 0x4000, class_id: 2 });
        assert_eq!(heap.roots().len(), 1);
        assert!(heap.roots().contains_key(&0x4000));
    }
}
