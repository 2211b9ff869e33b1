//! Segments - byte budgets that slots are carved from
//!
//! A segment is a contiguous budget of `segment_bytes`. Slots are carved
//! from the open segment until it cannot hold the next slot; a slot larger
//! than a whole segment gets a dedicated segment of its own size.

/// One allocation segment
#[derive(Debug, Clone)]
pub struct Segment {
    budget: usize,
    used: usize,
    slots: usize,
}

impl Segment {
    pub fn new(budget: usize) -> Self {
        Self {
            budget,
            used: 0,
            slots: 0,
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.budget - self.used
    }

    pub fn slot_count(&self) -> usize {
        self.slots
    }

    pub fn fits(&self, bytes: usize) -> bool {
        self.remaining() >= bytes
    }

    pub(crate) fn carve(&mut self, bytes: usize) {
        debug_assert!(self.fits(bytes));
        self.used += bytes;
        self.slots += 1;
    }

    /// Give a retired slot's bytes back to the budget
    pub(crate) fn release(&mut self, bytes: usize) {
        self.used = self.used.saturating_sub(bytes);
        self.slots = self.slots.saturating_sub(1);
    }
}

/// All segments of one arena
#[derive(Debug)]
pub struct SegmentList {
    segments: Vec<Segment>,
    segment_bytes: usize,
}

impl SegmentList {
    pub fn new(segment_bytes: usize) -> Self {
        Self {
            segments: Vec::new(),
            segment_bytes,
        }
    }

    /// Carve `bytes` from the first segment with room, opening a new one
    /// if none has. Returns the segment index.
    pub fn carve(&mut self, bytes: usize) -> u32 {
        let index = match self.segments.iter().position(|s| s.fits(bytes)) {
            Some(index) => index,
            None => {
                self.segments
                    .push(Segment::new(bytes.max(self.segment_bytes)));
                self.segments.len() - 1
            }
        };
        self.segments[index].carve(bytes);
        index as u32
    }

    pub fn release(&mut self, segment: u32, bytes: usize) {
        if let Some(segment) = self.segments.get_mut(segment as usize) {
            segment.release(bytes);
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total budget of all segments
    pub fn committed(&self) -> usize {
        self.segments.iter().map(Segment::budget).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter()
    }
}
