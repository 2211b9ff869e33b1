//! Remembered set - the cross-region reference table
//!
//! Holds the address of every image-object field that has been stored
//! into. The collector dereferences each entry at the start of a cycle and
//! treats heap targets as roots; entries that no longer point into the heap
//! are dropped then.

use crate::object::{Field, ObjRef};
use rustc_hash::FxHashSet;
use std::fmt;

/// Address of one reference field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldAddr {
    pub owner: ObjRef,
    pub field: Field,
}

impl FieldAddr {
    pub fn new(owner: ObjRef, field: Field) -> Self {
        Self { owner, field }
    }
}

impl fmt::Display for FieldAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.field)
    }
}

/// Set of recorded field addresses
#[derive(Debug, Default)]
pub struct RememberedSet {
    entries: FxHashSet<FieldAddr>,
    /// Calls to `record`, including repeats
    records: u64,
}

impl RememberedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a field. Re-recording is harmless; returns `true` the first
    /// time an address is seen.
    pub fn record(&mut self, addr: FieldAddr) -> bool {
        self.records += 1;
        self.entries.insert(addr)
    }

    pub fn contains(&self, addr: &FieldAddr) -> bool {
        self.entries.contains(addr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Entries in a stable order
    pub fn sorted(&self) -> Vec<FieldAddr> {
        let mut entries: Vec<_> = self.entries.iter().copied().collect();
        entries.sort_unstable();
        entries
    }

    /// Keep only the entries for which `keep` returns true; returns the
    /// number dropped
    pub fn retain(&mut self, mut keep: impl FnMut(&FieldAddr) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|addr| keep(addr));
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
