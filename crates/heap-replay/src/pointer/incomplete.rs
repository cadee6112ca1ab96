//! Reference arrays completed by fragments from several GC worker threads.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::{Result, TraceError};

#[derive(Debug)]
struct Fill {
    pointers: Vec<i64>,
    top: usize,
}

/// Partially filled reference array of one relocated object.
///
/// Fragments may be appended from several threads; appends are serialized
/// by an internal lock.
#[derive(Debug)]
pub struct IncompletePointerInfo {
    from_addr: Option<u64>,
    to_addr: u64,
    fill: Mutex<Fill>,
}

impl IncompletePointerInfo {
    /// Array of full length `pointers.len()` whose first `top` slots are filled.
    #[must_use]
    pub fn new(from_addr: Option<u64>, to_addr: u64, pointers: Vec<i64>, top: usize) -> Self {
        Self {
            from_addr,
            to_addr,
            fill: Mutex::new(Fill { pointers, top }),
        }
    }

    /// Fragment whose target has not been registered yet.
    #[must_use]
    pub fn fragment(to_addr: u64, pointers: &[i64]) -> Self {
        Self::new(None, to_addr, pointers.to_vec(), pointers.len())
    }

    #[must_use]
    pub const fn from_addr(&self) -> Option<u64> {
        self.from_addr
    }

    #[must_use]
    pub const fn to_addr(&self) -> u64 {
        self.to_addr
    }

    /// Append `fragment` at the fill cursor.
    ///
    /// # Errors
    ///
    /// Fails if the fragment does not fit into the remaining slots.
    pub fn add_pointers(&self, fragment: &[i64]) -> Result<()> {
        let mut fill = self.fill.lock();
        let end = fill.top + fragment.len();
        if end > fill.pointers.len() {
            return Err(TraceError::invariant(format!(
                "fragment of {} references overflows the array of {:#x} ({} of {} filled)",
                fragment.len(),
                self.to_addr,
                fill.top,
                fill.pointers.len()
            )));
        }
        let top = fill.top;
        fill.pointers[top..end].copy_from_slice(fragment);
        fill.top = end;
        Ok(())
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        let fill = self.fill.lock();
        fill.top == fill.pointers.len()
    }

    /// Number of filled slots.
    #[must_use]
    pub fn filled(&self) -> usize {
        self.fill.lock().top
    }

    #[must_use]
    pub fn into_pointers(self) -> Vec<i64> {
        self.fill.into_inner().pointers
    }
}

/// Registry of incomplete arrays awaiting fragments until GC end.
#[derive(Debug, Default)]
pub struct PendingPointers {
    by_target: HashMap<u64, IncompletePointerInfo>,
    unmatched: Vec<IncompletePointerInfo>,
}

impl PendingPointers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the array of a relocated object.
    ///
    /// # Errors
    ///
    /// Fails if the target already has a registered array.
    pub fn register(&mut self, info: IncompletePointerInfo) -> Result<()> {
        let to_addr = info.to_addr;
        if self.by_target.insert(to_addr, info).is_some() {
            return Err(TraceError::invariant(format!(
                "incomplete pointer info for {to_addr:#x} registered twice"
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, to_addr: u64) -> Option<&IncompletePointerInfo> {
        self.by_target.get(&to_addr)
    }

    /// Keep fragments that arrived before their target was registered.
    pub fn stash_unmatched(&mut self, fragments: impl IntoIterator<Item = IncompletePointerInfo>) {
        self.unmatched.extend(fragments);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_target.is_empty() && self.unmatched.is_empty()
    }

    /// Merge stashed fragments and hand out every completed array.
    ///
    /// # Errors
    ///
    /// Fails if a stashed fragment has no registered target or an array stays
    /// incomplete.
    pub fn drain_completed(&mut self) -> Result<Vec<IncompletePointerInfo>> {
        for fragment in self.unmatched.drain(..) {
            let target = self.by_target.get(&fragment.to_addr).ok_or_else(|| {
                TraceError::invariant(format!(
                    "multi-threaded pointer fragment for {:#x} without a relocated object",
                    fragment.to_addr
                ))
            })?;
            target.add_pointers(&fragment.into_pointers())?;
        }
        let mut completed: Vec<IncompletePointerInfo> = self.by_target.drain().map(|(_, info)| info).collect();
        completed.sort_by_key(IncompletePointerInfo::to_addr);
        if let Some(info) = completed.iter().find(|info| !info.is_complete()) {
            return Err(TraceError::invariant(format!(
                "incomplete pointer info for {:#x} was not completed by multi-threaded events ({} filled)",
                info.to_addr,
                info.filled()
            )));
        }
        Ok(completed)
    }

    pub fn clear(&mut self) {
        self.by_target.clear();
        self.unmatched.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::NULL_PTR;

    #[test]
    fn test_fragments_complete_array() {
        let info = IncompletePointerInfo::new(Some(16), 64, vec![1, 2, NULL_PTR, NULL_PTR], 2);
        assert!(!info.is_complete());
        info.add_pointers(&[3]).unwrap();
        info.add_pointers(&[4]).unwrap();
        assert!(info.is_complete());
        assert!(info.add_pointers(&[5]).is_err());
        assert_eq!(info.into_pointers(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_unmatched_fragments_merge_at_drain() {
        let mut pending = PendingPointers::new();
        pending.stash_unmatched([IncompletePointerInfo::fragment(64, &[7, 8])]);
        pending
            .register(IncompletePointerInfo::new(Some(16), 64, vec![5, 6, NULL_PTR, NULL_PTR], 2))
            .unwrap();
        let completed = pending.drain_completed().unwrap();
        assert_eq!(completed.len(), 1);
        assert!(pending.is_empty());
        let info = completed.into_iter().next().unwrap();
        assert_eq!(info.from_addr(), Some(16));
        assert_eq!(info.into_pointers(), vec![5, 6, 7, 8]);
    }

    #[test]
    fn test_incomplete_at_drain_is_a_defect() {
        let mut pending = PendingPointers::new();
        pending
            .register(IncompletePointerInfo::new(None, 64, vec![NULL_PTR; 3], 1))
            .unwrap();
        assert!(pending
            .register(IncompletePointerInfo::new(None, 64, vec![NULL_PTR; 3], 1))
            .is_err());
        assert!(pending.drain_completed().is_err());
    }
}
