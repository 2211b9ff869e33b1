//! Reference Map - which reference slots of an object are traced, and how
//!
//! Every field object carries a fixed number of reference slots. Most slots
//! are *strong*: both collection marking and general marking follow them.
//! A slot can instead be declared *cached*: it holds a derived value that
//! can be recomputed, so collection marking does not keep its target alive
//! and the collector clears it when the target dies. General marking (image
//! save, flatten) still follows cached slots because those consumers need
//! the complete graph.
//!
//! # Layout
//!
//! ```text
//! slots:  5
//! cached: 0b00100
//!
//! ┌────────┬────────┬────────┬────────┬────────┐
//! │ slot 0 │ slot 1 │ slot 2 │ slot 3 │ slot 4 │
//! │ strong │ strong │ cached │ strong │ strong │
//! └────────┴────────┴────────┴────────┴────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use objmem::object::ReferenceMap;
//!
//! let map = ReferenceMap::strong(3).with_cached(&[2]);
//! assert!(!map.is_cached(0));
//! assert!(map.is_cached(2));
//! assert_eq!(map.strong_slots().count(), 2);
//! ```

use serde::{Deserialize, Serialize};

/// Only the first 64 slots can be declared cached; the bitmap is one word.
pub const MAX_CACHED_SLOT: u32 = 64;

/// Reference slot layout of a field object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReferenceMap {
    /// Number of reference slots
    slots: u32,
    /// Bit `i` set: slot `i` is cached rather than strong
    cached: u64,
}

impl ReferenceMap {
    /// A map with no reference slots (pure byte objects)
    #[inline]
    pub const fn empty() -> Self {
        Self {
            slots: 0,
            cached: 0,
        }
    }

    /// A map with `slots` strong reference slots
    #[inline]
    pub const fn strong(slots: u32) -> Self {
        Self { slots, cached: 0 }
    }

    /// Declare some slots cached
    ///
    /// # Panics
    ///
    /// Panics if a slot is out of range or beyond [`MAX_CACHED_SLOT`].
    pub fn with_cached(mut self, cached: &[u32]) -> Self {
        for &slot in cached {
            assert!(
                slot < self.slots && slot < MAX_CACHED_SLOT,
                "cached slot {} out of range for {} slots",
                slot,
                self.slots
            );
            self.cached |= 1u64 << slot;
        }
        self
    }

    /// Rebuild a map from its raw parts, validating them.
    ///
    /// Used by the envelope decoder; returns `None` if the bitmap names a
    /// slot that does not exist.
    pub fn from_raw(slots: u32, cached: u64) -> Option<Self> {
        let limit = slots.min(MAX_CACHED_SLOT);
        let valid = if limit >= 64 {
            u64::MAX
        } else {
            (1u64 << limit) - 1
        };
        if cached & !valid != 0 {
            return None;
        }
        Some(Self { slots, cached })
    }

    #[inline]
    pub const fn slot_count(&self) -> u32 {
        self.slots
    }

    #[inline]
    pub const fn cached_bits(&self) -> u64 {
        self.cached
    }

    #[inline]
    pub fn has_cached(&self) -> bool {
        self.cached != 0
    }

    /// Is `slot` a cached slot?
    #[inline]
    pub fn is_cached(&self, slot: u32) -> bool {
        slot < MAX_CACHED_SLOT && self.cached & (1u64 << slot) != 0
    }

    /// Slots followed by collection marking
    pub fn strong_slots(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.slots).filter(move |&slot| !self.is_cached(slot))
    }

    /// Slots skipped by collection marking
    pub fn cached_slots(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.slots.min(MAX_CACHED_SLOT)).filter(move |&slot| self.is_cached(slot))
    }
}
