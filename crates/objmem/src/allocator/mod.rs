//! Allocator Module - arena for the collectible heap
//!
//! Objects live in an arena of slots. Each slot is charged a byte capacity
//! (the object's charged size rounded up to its size class) carved from a
//! segment budget. Objects never move: a slot keeps its object until the
//! sweep reclaims it.
//!
//! ## Allocation Flow
//!
//! 1. Round the charged size up to a size class
//! 2. Reuse a free slot of that class or a larger one
//! 3. Otherwise carve a new slot, if it fits under `max_heap_bytes`
//! 4. Otherwise retire smaller free slots to make room, then carve
//! 5. Otherwise fail with `OutOfMemory`
//!
//! ## Reuse counters
//!
//! ```text
//! slot 7: Live(reuse 0) ──sweep──▶ Free(reuse 1) ──alloc──▶ Live(reuse 1)
//!          ▲ heap#7/0 resolves      heap#7/0 is stale        heap#7/1 resolves
//! ```

pub mod segment;
pub mod size_class;

pub use segment::{Segment, SegmentList};
pub use size_class::{FreeLists, SizeClass, MIN_CLASS_BYTES};

use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::object::{HeapObject, ObjRef, Region};

#[derive(Debug)]
enum Slot {
    Live {
        object: HeapObject,
        reuse: u32,
        class: SizeClass,
        segment: u32,
    },
    Free {
        reuse: u32,
        class: SizeClass,
        segment: u32,
    },
    /// Bytes returned to the segment; the index waits for a new carve
    Retired { reuse: u32 },
}

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub reclaimed_objects: usize,
    pub reclaimed_bytes: usize,
    pub live_objects: usize,
    pub live_bytes: usize,
}

/// Arena allocator for heap-region objects
#[derive(Debug)]
pub struct Arena {
    slots: Vec<Slot>,
    segments: SegmentList,
    free: FreeLists,
    retired: Vec<u32>,
    max_bytes: usize,
    /// Capacity of live slots
    live_bytes: usize,
    /// Capacity of live and free slots
    reserved_bytes: usize,
    live_objects: usize,
    total_allocated: u64,
}

impl Arena {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            slots: Vec::new(),
            segments: SegmentList::new(config.segment_bytes),
            free: FreeLists::new(),
            retired: Vec::new(),
            max_bytes: config.max_heap_bytes,
            live_bytes: 0,
            reserved_bytes: 0,
            live_objects: 0,
            total_allocated: 0,
        }
    }

    /// Store `object` in a slot and return its reference.
    ///
    /// The object is expected to be zero-initialized by its constructor.
    pub fn allocate(&mut self, object: HeapObject) -> Result<ObjRef> {
        let charged = object.charged_size();
        let class = SizeClass::for_bytes(charged);

        let index = match self.free.pop_at_least(class) {
            Some(index) => index,
            None => self.carve(charged, class)?,
        };

        let slot = &mut self.slots[index as usize];
        let (reuse, class, segment) = match *slot {
            Slot::Free {
                reuse,
                class,
                segment,
            } => (reuse, class, segment),
            _ => {
                return Err(MemoryError::InvalidState {
                    expected: "free slot".to_string(),
                    actual: format!("slot {} not free", index),
                })
            }
        };
        *slot = Slot::Live {
            object,
            reuse,
            class,
            segment,
        };

        self.live_bytes += class.capacity();
        self.live_objects += 1;
        self.total_allocated += 1;
        Ok(ObjRef::new(Region::Heap, index, reuse))
    }

    /// Would an object charged `charged` bytes fit without collecting?
    pub fn fits(&self, charged: usize) -> bool {
        let class = SizeClass::for_bytes(charged);
        self.free.has_at_least(class)
            || self.reserved_bytes - self.free.bytes_below(class) + class.capacity()
                <= self.max_bytes
    }

    /// Carve a new free slot for `class`
    fn carve(&mut self, charged: usize, class: SizeClass) -> Result<u32> {
        let capacity = class.capacity();

        while self.reserved_bytes + capacity > self.max_bytes {
            match self.free.pop_below(class) {
                Some(index) => self.retire(index),
                None => {
                    return Err(MemoryError::OutOfMemory {
                        requested: charged,
                        available: self.available(),
                    })
                }
            }
        }

        let segment = self.segments.carve(capacity);
        self.reserved_bytes += capacity;

        let (index, reuse) = match self.retired.pop() {
            Some(index) => match self.slots[index as usize] {
                Slot::Retired { reuse } => (index, reuse),
                _ => {
                    return Err(MemoryError::InvalidState {
                        expected: "retired slot".to_string(),
                        actual: format!("slot {} in use", index),
                    })
                }
            },
            None => {
                let index = u32::try_from(self.slots.len()).map_err(|_| {
                    MemoryError::OutOfMemory {
                        requested: charged,
                        available: 0,
                    }
                })?;
                self.slots.push(Slot::Retired { reuse: 0 });
                (index, 0)
            }
        };

        self.slots[index as usize] = Slot::Free {
            reuse,
            class,
            segment,
        };
        Ok(index)
    }

    fn retire(&mut self, index: u32) {
        if let Slot::Free {
            reuse,
            class,
            segment,
        } = self.slots[index as usize]
        {
            self.segments.release(segment, class.capacity());
            self.reserved_bytes -= class.capacity();
            self.slots[index as usize] = Slot::Retired { reuse };
            self.retired.push(index);
        }
    }

    /// Return a live slot to the free lists, bumping its reuse counter so
    /// that outstanding references become stale.
    fn reclaim(&mut self, index: u32) -> usize {
        let slot = &mut self.slots[index as usize];
        if let Slot::Live {
            reuse,
            class,
            segment,
            ..
        } = *slot
        {
            *slot = Slot::Free {
                reuse: reuse.wrapping_add(1),
                class,
                segment,
            };
            self.free.push(class, index);
            self.live_bytes -= class.capacity();
            self.live_objects -= 1;
            return class.capacity();
        }
        0
    }

    pub fn get(&self, reference: ObjRef) -> Result<&HeapObject> {
        match self.slots.get(reference.index() as usize) {
            Some(Slot::Live { object, reuse, .. })
                if reference.is_heap() && *reuse == reference.reuse() =>
            {
                Ok(object)
            }
            _ => Err(MemoryError::StaleReference { reference }),
        }
    }

    pub fn get_mut(&mut self, reference: ObjRef) -> Result<&mut HeapObject> {
        match self.slots.get_mut(reference.index() as usize) {
            Some(Slot::Live { object, reuse, .. })
                if reference.is_heap() && *reuse == reference.reuse() =>
            {
                Ok(object)
            }
            _ => Err(MemoryError::StaleReference { reference }),
        }
    }

    /// Does `reference` name a live object?
    pub fn contains(&self, reference: ObjRef) -> bool {
        self.get(reference).is_ok()
    }

    /// Live objects in slot order
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, &HeapObject)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Live { object, reuse, .. } => {
                Some((ObjRef::new(Region::Heap, index as u32, *reuse), object))
            }
            _ => None,
        })
    }

    /// Reclaim every live object not marked in `generation`
    pub fn sweep(&mut self, generation: u32) -> SweepOutcome {
        let mut outcome = SweepOutcome::default();

        for index in 0..self.slots.len() {
            let dead = match &self.slots[index] {
                Slot::Live { object, .. } => !object.header().is_marked(generation),
                _ => false,
            };
            if dead {
                outcome.reclaimed_bytes += self.reclaim(index as u32);
                outcome.reclaimed_objects += 1;
            }
        }

        outcome.live_objects = self.live_objects;
        outcome.live_bytes = self.live_bytes;
        outcome
    }

    /// Bytes held by live objects
    pub fn used_bytes(&self) -> usize {
        self.live_bytes
    }

    /// Bytes held by live and free slots
    pub fn reserved_bytes(&self) -> usize {
        self.reserved_bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Bytes that could still be allocated, counting reusable free slots
    pub fn available(&self) -> usize {
        self.max_bytes.saturating_sub(self.live_bytes)
    }

    pub fn live_objects(&self) -> usize {
        self.live_objects
    }

    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    pub fn free_histogram(&self) -> Vec<(usize, usize)> {
        self.free.histogram()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn committed_bytes(&self) -> usize {
        self.segments.committed()
    }

    pub fn total_allocated(&self) -> u64 {
        self.total_allocated
    }
}
