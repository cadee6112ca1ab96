//! Heap spaces and their GC transition state machine.
//!
//! A [`Space`] keeps two views of its labs. The *front* view is the current
//! state. While a GC is replayed, the *back* view holds the pre-collection
//! state, and the [`TransitionType`] says how the two views are reconciled
//! once the GC ends.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Result, TraceError};
use crate::lab::{Lab, LabKind};
use crate::object::AddressedObject;

/// How a space's content relates before and after one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransitionType {
    /// No collection in progress for this space.
    #[default]
    None,
    /// Old content is retained; moved-in objects are added next to it.
    Accumulative,
    /// Old content is superseded by whatever was moved into the front view.
    ReplaceAll,
}

impl TransitionType {
    /// Wire id used by snapshots.
    #[must_use]
    pub const fn id(self) -> i32 {
        match self {
            Self::None => 0,
            Self::Accumulative => 1,
            Self::ReplaceAll => 2,
        }
    }
}

/// Generation a space belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpaceType {
    Eden,
    Survivor,
    Old,
}

impl SpaceType {
    #[must_use]
    pub const fn id(self) -> i32 {
        match self {
            Self::Eden => 0,
            Self::Survivor => 1,
            Self::Old => 2,
        }
    }

    #[must_use]
    pub const fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Self::Eden),
            1 => Some(Self::Survivor),
            2 => Some(Self::Old),
            _ => None,
        }
    }
}

/// Layout mode of a region-based space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpaceMode {
    Normal,
    HumongousStart,
    HumongousContinued,
}

impl SpaceMode {
    #[must_use]
    pub const fn id(self) -> i32 {
        match self {
            Self::Normal => 0,
            Self::HumongousStart => 1,
            Self::HumongousContinued => 2,
        }
    }

    #[must_use]
    pub const fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(Self::Normal),
            1 => Some(Self::HumongousStart),
            2 => Some(Self::HumongousContinued),
            _ => None,
        }
    }
}

/// Labs of one view, ordered by bottom address.
#[derive(Debug, Clone, Default)]
pub struct LabMap {
    labs: BTreeMap<u64, Lab>,
}

impl LabMap {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            labs: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Lab> {
        self.labs.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Lab> {
        self.labs.values_mut()
    }

    /// Lab whose range contains `addr`.
    #[must_use]
    pub fn lab_containing(&self, addr: u64) -> Option<&Lab> {
        self.labs
            .range(..=addr)
            .next_back()
            .map(|(_, lab)| lab)
            .filter(|lab| lab.contains(addr))
    }

    pub fn lab_containing_mut(&mut self, addr: u64) -> Option<&mut Lab> {
        self.labs
            .range_mut(..=addr)
            .next_back()
            .map(|(_, lab)| lab)
            .filter(|lab| lab.contains(addr))
    }

    /// Object starting exactly at `addr`.
    #[must_use]
    pub fn object_at(&self, addr: u64) -> Option<&AddressedObject> {
        self.lab_containing(addr)?.object_at(addr)
    }

    pub fn object_at_mut(&mut self, addr: u64) -> Option<&mut AddressedObject> {
        self.lab_containing_mut(addr)?.object_at_mut(addr)
    }

    fn overlapping(&self, bottom: u64, end: u64) -> Vec<u64> {
        let first = self
            .labs
            .range(..=bottom)
            .next_back()
            .filter(|(_, lab)| lab.end() > bottom)
            .map(|(&addr, _)| addr);
        first
            .into_iter()
            .chain(
                self.labs
                    .range(bottom..end)
                    .map(|(&addr, _)| addr)
                    .filter(|&addr| addr != bottom),
            )
            .collect()
    }

    /// Insert `lab`.
    ///
    /// With `allow_replace`, labs overlapping the new one are cut back to the
    /// parts outside of it. Without it, any overlap is an error.
    ///
    /// # Errors
    ///
    /// Fails on overlap without `allow_replace`, or when an overlapped lab
    /// cannot be cut on object boundaries.
    pub fn insert(&mut self, lab: Lab, allow_replace: bool) -> Result<()> {
        let (bottom, end) = (lab.bottom(), lab.end().max(lab.bottom() + 1));
        for addr in self.overlapping(bottom, end) {
            if !allow_replace {
                return Err(TraceError::invariant(format!(
                    "{lab} overlaps the lab at {addr:#x}"
                )));
            }
            let Some(old) = self.labs.remove(&addr) else {
                continue;
            };
            if let Some(below) = old.sublab(old.bottom(), bottom.max(old.bottom()))? {
                self.labs.insert(below.bottom(), below);
            }
            if end < old.end() {
                if let Some(above) = old.sublab(end, old.end())? {
                    self.labs.insert(above.bottom(), above);
                }
            }
        }
        self.labs.insert(lab.bottom(), lab);
        Ok(())
    }

    /// Move every lab of `other` into this map.
    ///
    /// # Errors
    ///
    /// See [`LabMap::insert`].
    pub fn merge(&mut self, other: Self, allow_replace: bool) -> Result<()> {
        for lab in other.labs.into_values() {
            self.insert(lab, allow_replace)?;
        }
        Ok(())
    }

    pub fn remove_empty_labs(&mut self) {
        self.labs.retain(|_, lab| !lab.is_empty());
    }

    pub fn clear(&mut self) {
        self.labs.clear();
    }

    #[must_use]
    pub fn object_count(&self) -> usize {
        self.labs.values().map(Lab::object_count).sum()
    }
}

/// Pre-collection state of a space, borrowed for pointer repair.
#[derive(Debug, Clone, Copy)]
pub struct PreCollectionView<'a> {
    pub space: &'a Space,
    pub labs: &'a LabMap,
}

/// Post-collection state of a space, borrowed for pointer repair.
#[derive(Debug, Clone, Copy)]
pub struct PostCollectionView<'a> {
    pub space: &'a Space,
    pub labs: &'a LabMap,
}

/// Named heap region.
#[derive(Debug, Clone)]
pub struct Space {
    id: u16,
    name: String,
    addr: u64,
    length: u64,
    ty: Option<SpaceType>,
    mode: Option<SpaceMode>,
    transition: TransitionType,
    front: LabMap,
    back: LabMap,
}

impl Space {
    #[must_use]
    pub fn new(id: u16, name: impl Into<String>, addr: u64, length: u64) -> Self {
        Self {
            id,
            name: name.into(),
            addr,
            length,
            ty: None,
            mode: None,
            transition: TransitionType::None,
            front: LabMap::new(),
            back: LabMap::new(),
        }
    }

    #[must_use]
    pub const fn with_type(mut self, ty: SpaceType) -> Self {
        self.ty = Some(ty);
        self
    }

    #[must_use]
    pub const fn id(&self) -> u16 {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn addr(&self) -> u64 {
        self.addr
    }

    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }

    #[must_use]
    pub const fn end(&self) -> u64 {
        self.addr + self.length
    }

    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        self.addr <= addr && addr < self.end()
    }

    #[must_use]
    pub const fn space_type(&self) -> Option<SpaceType> {
        self.ty
    }

    pub const fn set_space_type(&mut self, ty: Option<SpaceType>) {
        self.ty = ty;
    }

    #[must_use]
    pub const fn mode(&self) -> Option<SpaceMode> {
        self.mode
    }

    pub const fn set_mode(&mut self, mode: Option<SpaceMode>) {
        self.mode = mode;
    }

    #[must_use]
    pub const fn transition(&self) -> TransitionType {
        self.transition
    }

    /// Whether the running GC evacuates this space.
    #[must_use]
    pub const fn is_being_collected(&self) -> bool {
        matches!(self.transition, TransitionType::ReplaceAll)
    }

    #[must_use]
    pub const fn front(&self) -> &LabMap {
        &self.front
    }

    #[must_use]
    pub const fn back(&self) -> &LabMap {
        &self.back
    }

    pub fn front_mut(&mut self) -> &mut LabMap {
        &mut self.front
    }

    pub fn back_mut(&mut self) -> &mut LabMap {
        &mut self.back
    }

    #[must_use]
    pub const fn pre_collection_view(&self) -> PreCollectionView<'_> {
        PreCollectionView {
            space: self,
            labs: &self.back,
        }
    }

    #[must_use]
    pub const fn post_collection_view(&self) -> PostCollectionView<'_> {
        PostCollectionView {
            space: self,
            labs: &self.front,
        }
    }

    /// Enter a transition: the front view becomes the back view and a new,
    /// empty front view starts collecting moved objects.
    ///
    /// A running accumulative transition is committed first.
    ///
    /// # Errors
    ///
    /// Fails if this space is already being evacuated or `transition` is `None`.
    pub fn start_transition(&mut self, transition: TransitionType) -> Result<()> {
        match self.transition {
            TransitionType::ReplaceAll => {
                return Err(TraceError::invariant(format!(
                    "space {} is already being collected",
                    self.name
                )))
            }
            TransitionType::Accumulative => self.commit_transition()?,
            TransitionType::None => {}
        }
        if transition == TransitionType::None {
            return Err(TraceError::invariant(format!(
                "space {} cannot start a transition to None",
                self.name
            )));
        }
        std::mem::swap(&mut self.front, &mut self.back);
        self.transition = transition;
        crate::tracing::replay_debug!(space = %self.name, transition = ?transition, "start_transition");
        Ok(())
    }

    /// Finish a transition: keep both views (accumulative) or only the front
    /// view (replace-all).
    ///
    /// # Errors
    ///
    /// Fails if accumulated labs overlap the retained ones.
    pub fn commit_transition(&mut self) -> Result<()> {
        match self.transition {
            TransitionType::None => {}
            TransitionType::Accumulative => {
                let front = std::mem::take(&mut self.front);
                self.back.merge(front, false)?;
                std::mem::swap(&mut self.front, &mut self.back);
            }
            TransitionType::ReplaceAll => self.back.clear(),
        }
        self.transition = TransitionType::None;
        Ok(())
    }

    /// Commit an evacuation that was swept up to `addr`. Objects at or above
    /// `addr` were not reached and stay in place.
    ///
    /// # Errors
    ///
    /// Fails if the space is not being evacuated or the kept part overlaps
    /// objects moved into the front view.
    pub fn commit_transition_to(&mut self, addr: u64) -> Result<()> {
        if !self.is_being_collected() {
            return Err(TraceError::invariant(format!(
                "space {} cannot commit up to {addr:#x} without being collected",
                self.name
            )));
        }
        for lab in std::mem::take(&mut self.back.labs).into_values() {
            let kept = if addr <= lab.bottom() {
                Some(lab)
            } else if addr < lab.end() {
                lab.sublab(addr, lab.end())?
            } else {
                None
            };
            if let Some(kept) = kept {
                self.front.insert(kept, false)?;
            }
        }
        self.commit_transition()
    }

    /// Resume an evacuation at `addr`. Objects below `addr` were already
    /// swept and are kept in the front view.
    ///
    /// # Errors
    ///
    /// Fails like [`Space::start_transition`], or if a swept lab cannot be
    /// cut at `addr`.
    pub fn start_transition_from(&mut self, addr: u64) -> Result<()> {
        self.start_transition(TransitionType::ReplaceAll)?;
        let mut swept = Vec::new();
        for lab in self.back.iter().take_while(|lab| lab.bottom() < addr) {
            if lab.end() <= addr {
                swept.push(lab.clone());
            } else if let Some(part) = lab.sublab(lab.bottom(), addr)? {
                swept.push(part);
            }
        }
        for lab in swept {
            self.front.insert(lab, false)?;
        }
        Ok(())
    }

    /// Abort a transition after a failed GC. Objects moved into the front
    /// view override the parts of the back view they overlap.
    ///
    /// # Errors
    ///
    /// Fails if no transition is running, or if an overlapped lab cannot be
    /// cut on object boundaries.
    pub fn rollback_transition(&mut self) -> Result<()> {
        if self.transition == TransitionType::None {
            return Err(TraceError::invariant(format!(
                "space {} has no transition to roll back",
                self.name
            )));
        }
        let front = std::mem::take(&mut self.front);
        self.back.merge(front, true)?;
        std::mem::swap(&mut self.front, &mut self.back);
        self.transition = TransitionType::None;
        crate::tracing::replay_debug!(space = %self.name, labs = self.front.len(), "rollback_transition");
        Ok(())
    }

    /// Object at `addr` in the view that currently holds it.
    #[must_use]
    pub fn object(&self, addr: u64) -> Option<&AddressedObject> {
        match self.transition {
            TransitionType::None => self.front.object_at(addr),
            TransitionType::Accumulative | TransitionType::ReplaceAll => self.back.object_at(addr),
        }
    }

    pub fn object_mut(&mut self, addr: u64) -> Option<&mut AddressedObject> {
        match self.transition {
            TransitionType::None => self.front.object_at_mut(addr),
            TransitionType::Accumulative | TransitionType::ReplaceAll => {
                self.back.object_at_mut(addr)
            }
        }
    }

    #[must_use]
    pub fn front_object(&self, addr: u64) -> Option<&AddressedObject> {
        self.front.object_at(addr)
    }

    #[must_use]
    pub fn back_object(&self, addr: u64) -> Option<&AddressedObject> {
        self.back.object_at(addr)
    }

    /// Add a lab to the front view.
    ///
    /// # Errors
    ///
    /// Fails if the lab overlaps an existing front lab.
    pub fn assign_lab(&mut self, lab: Lab) -> Result<()> {
        self.front.insert(lab, false)
    }

    /// Place `object` at `addr` in the front view.
    ///
    /// The object goes into the front lab covering `addr`, onto the end of a
    /// lab of the same thread and kind ending at `addr`, or into a new
    /// single-object lab of `kind`.
    ///
    /// # Errors
    ///
    /// Fails if the covering lab rejects the object.
    pub fn assign(
        &mut self,
        thread: &Arc<str>,
        kind: LabKind,
        addr: u64,
        object: AddressedObject,
    ) -> Result<u64> {
        use crate::lab::Allocation;

        let object = match self.front.lab_containing_mut(addr) {
            Some(lab) => match lab.try_allocate(addr, object)? {
                Allocation::Assigned(assigned) => return Ok(assigned),
                Allocation::NotAssigned(object) => object,
            },
            None => object,
        };
        if let Some(bottom) = self.adjacent_lab(thread, kind, addr) {
            if let Some(lab) = self.front.labs.remove(&bottom) {
                let mut lab = lab.into_multi();
                lab.variable_capacity();
                let assigned = lab.push(object);
                self.front.labs.insert(bottom, lab);
                return assigned;
            }
        }
        self.assign_lab(Lab::single(Arc::clone(thread), kind, addr, object))?;
        Ok(addr)
    }

    fn adjacent_lab(&self, thread: &Arc<str>, kind: LabKind, addr: u64) -> Option<u64> {
        self.front
            .labs
            .range(..addr)
            .next_back()
            .filter(|(_, lab)| lab.top() == addr && lab.kind() == kind && lab.thread() == thread)
            .map(|(&bottom, _)| bottom)
    }

    pub fn remove_empty_labs(&mut self) {
        self.front.remove_empty_labs();
        self.back.remove_empty_labs();
    }

    pub fn clear(&mut self) {
        self.front.clear();
        self.back.clear();
    }

    /// Forget forwarding addresses of every object in the front view.
    pub fn reset_forwarding_addresses(&mut self) {
        for lab in self.front.iter_mut() {
            lab.reset_forwarding_addresses();
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} #{} [{:#x}, {:#x}) {:?}",
            self.name,
            self.id,
            self.addr,
            self.end(),
            self.transition
        )
    }
}
