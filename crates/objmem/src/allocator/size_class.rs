//! Size classes and free lists
//!
//! Slot capacities are rounded up to a power of two, starting at
//! [`MIN_CLASS_BYTES`]. Each class keeps a LIFO list of free slot indices.

/// Smallest slot capacity
pub const MIN_CLASS_BYTES: usize = 32;

/// Size class of a charged byte count
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SizeClass(u8);

impl SizeClass {
    /// Smallest class whose capacity holds `bytes`
    pub fn for_bytes(bytes: usize) -> Self {
        let capacity = bytes.max(MIN_CLASS_BYTES).next_power_of_two();
        let class = capacity.trailing_zeros() - MIN_CLASS_BYTES.trailing_zeros();
        SizeClass(class as u8)
    }

    /// Slot capacity of this class
    pub fn capacity(self) -> usize {
        MIN_CLASS_BYTES << self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Free slots segregated by size class
#[derive(Debug, Default)]
pub struct FreeLists {
    lists: Vec<Vec<u32>>,
    count: usize,
}

impl FreeLists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, class: SizeClass, slot: u32) {
        let index = class.index();
        if self.lists.len() <= index {
            self.lists.resize_with(index + 1, Vec::new);
        }
        self.lists[index].push(slot);
        self.count += 1;
    }

    /// Take a free slot of `class` or of the nearest larger class
    pub fn pop_at_least(&mut self, class: SizeClass) -> Option<u32> {
        let start = class.index();
        for list in self.lists.iter_mut().skip(start) {
            if let Some(slot) = list.pop() {
                self.count -= 1;
                return Some(slot);
            }
        }
        None
    }

    /// Take a free slot from the smallest non-empty class below `limit`
    pub fn pop_below(&mut self, limit: SizeClass) -> Option<u32> {
        for list in self.lists.iter_mut().take(limit.index()) {
            if let Some(slot) = list.pop() {
                self.count -= 1;
                return Some(slot);
            }
        }
        None
    }

    /// Is there a free slot of `class` or larger?
    pub fn has_at_least(&self, class: SizeClass) -> bool {
        self.lists.iter().skip(class.index()).any(|list| !list.is_empty())
    }

    /// Capacity held by free slots smaller than `limit`
    pub fn bytes_below(&self, limit: SizeClass) -> usize {
        self.lists
            .iter()
            .take(limit.index())
            .enumerate()
            .map(|(class, list)| SizeClass(class as u8).capacity() * list.len())
            .sum()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Free slot count per class capacity, smallest first
    pub fn histogram(&self) -> Vec<(usize, usize)> {
        self.lists
            .iter()
            .enumerate()
            .filter(|(_, list)| !list.is_empty())
            .map(|(class, list)| (SizeClass(class as u8).capacity(), list.len()))
            .collect()
    }
}
