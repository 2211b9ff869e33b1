//! Object references and regions
//!
//! An [`ObjRef`] is the identity of a heap object. It is a small copyable
//! handle, not a pointer: it names the region the object lives in, the slot
//! index inside that region, and the reuse count of the slot at the time the
//! object was created.
//!
//! ```text
//! ObjRef (12 bytes):
//! ┌──────────┬───────────────┬───────────────┐
//! │  region  │  slot index   │  reuse count  │
//! │  (u8)    │    (u32)      │    (u32)      │
//! └──────────┴───────────────┴───────────────┘
//! ```
//!
//! The reuse count turns a use-after-reclaim into a detectable error: once
//! the sweep returns a slot to the allocator its count is bumped, and any
//! handle still carrying the old count no longer resolves.

use rustc_hash::FxHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// The two partitions of object memory.
///
/// An object's region is fixed when the object is created and never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Region {
    /// Ordinary objects created during execution; scanned and reclaimed by
    /// the collector.
    Heap,
    /// Objects restored from a saved image (or created while bootstrapping
    /// one). Never scanned, never reclaimed.
    Image,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Heap => write!(f, "heap"),
            Region::Image => write!(f, "image"),
        }
    }
}

/// Identity of an object in either region.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef {
    region: Region,
    index: u32,
    reuse: u32,
}

impl ObjRef {
    #[inline]
    pub(crate) const fn new(region: Region, index: u32, reuse: u32) -> Self {
        Self {
            region,
            index,
            reuse,
        }
    }

    /// Region the object belongs to
    #[inline]
    pub const fn region(self) -> Region {
        self.region
    }

    /// Slot index inside the region
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Reuse count of the slot when this object was allocated
    #[inline]
    pub const fn reuse(self) -> u32 {
        self.reuse
    }

    #[inline]
    pub fn is_image(self) -> bool {
        self.region == Region::Image
    }

    #[inline]
    pub fn is_heap(self) -> bool {
        self.region == Region::Heap
    }

    /// Identity hash, stable for the lifetime of the object.
    ///
    /// Restored copies of an object are different objects and hash
    /// differently; tables keyed by identity are rehashed on restore.
    pub fn identity_hash(self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}/{}", self.region, self.index, self.reuse)
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
