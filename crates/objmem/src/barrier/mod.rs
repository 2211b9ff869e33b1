//! Barrier Module - write barrier for reference stores
//!
//! Image-region objects are never scanned by the collector. When one of
//! their reference fields is stored into, the field's address goes into
//! the [`RememberedSet`] so the next collection finds the edge:
//!
//! ```text
//!   set_reference(owner, field, value)
//!        │
//!        ├── owner in heap  ──▶ plain store
//!        │
//!        └── owner in image ──▶ store + record(owner.field)
//! ```
//!
//! The store itself happens in [`ObjectMemory`](crate::memory::ObjectMemory),
//! the only code that can write a reference field; this module decides what
//! a store must record.

pub mod remembered;

pub use remembered::{FieldAddr, RememberedSet};

use crate::object::{Field, ObjRef};

/// Counters for stores routed through the barrier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BarrierStats {
    /// All reference stores
    pub stores: u64,
    /// Stores into image objects
    pub image_stores: u64,
}

/// Write barrier state owned by one object memory
#[derive(Debug, Default)]
pub struct WriteBarrier {
    remembered: RememberedSet,
    stats: BarrierStats,
}

impl WriteBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for a completed store into `owner.field`.
    ///
    /// Stores into image objects are recorded unconditionally, whatever
    /// the stored value.
    #[inline]
    pub fn after_store(&mut self, owner: ObjRef, field: Field) {
        self.stats.stores += 1;
        if owner.is_image() {
            self.stats.image_stores += 1;
            if self.remembered.record(FieldAddr::new(owner, field)) {
                log::trace!("remembered {}.{}", owner, field);
            }
        }
    }

    pub fn remembered(&self) -> &RememberedSet {
        &self.remembered
    }

    pub fn remembered_mut(&mut self) -> &mut RememberedSet {
        &mut self.remembered
    }

    pub fn stats(&self) -> BarrierStats {
        self.stats
    }
}
