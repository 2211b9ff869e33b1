//! Stats Module - collector performance monitoring
//!
//! Metrics:
//! - Pause time (last, max, total)
//! - Objects and bytes reclaimed
//! - Cache slots cleared and remembered entries dropped

pub mod timer;

pub use timer::GcTimer;

use std::time::Duration;

/// Outcome of one collection cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionSummary {
    /// 1-based cycle number
    pub cycle: u64,
    /// Mark generation used by the cycle
    pub generation: u32,
    /// Heap objects reached
    pub marked: usize,
    /// Heap objects reclaimed
    pub reclaimed_objects: usize,
    /// Bytes returned to the free lists
    pub reclaimed_bytes: usize,
    /// Heap objects surviving
    pub live_objects: usize,
    /// Bytes held by survivors
    pub live_bytes: usize,
    /// Cached slots cleared because their target died
    pub cleared_cache_slots: usize,
    /// Remembered entries used as roots
    pub remembered_roots: usize,
    /// Remembered entries dropped
    pub dropped_remembered: usize,
    pub mark_time: Duration,
    pub sweep_time: Duration,
    pub duration: Duration,
}

/// GcStats - cumulative statistics over all cycles
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    total_cycles: u64,
    total_reclaimed_objects: u64,
    total_reclaimed_bytes: u64,
    total_pause: Duration,
    max_pause: Duration,
    last: Option<CollectionSummary>,
}

impl GcStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record GC collection
    pub fn record_collection(&mut self, summary: &CollectionSummary) {
        self.total_cycles += 1;
        self.total_reclaimed_objects += summary.reclaimed_objects as u64;
        self.total_reclaimed_bytes += summary.reclaimed_bytes as u64;
        self.total_pause += summary.duration;
        self.max_pause = self.max_pause.max(summary.duration);
        self.last = Some(summary.clone());
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn total_reclaimed_objects(&self) -> u64 {
        self.total_reclaimed_objects
    }

    pub fn total_reclaimed_bytes(&self) -> u64 {
        self.total_reclaimed_bytes
    }

    pub fn max_pause(&self) -> Duration {
        self.max_pause
    }

    pub fn avg_pause(&self) -> Duration {
        if self.total_cycles == 0 {
            Duration::ZERO
        } else {
            self.total_pause / self.total_cycles as u32
        }
    }

    pub fn last(&self) -> Option<&CollectionSummary> {
        self.last.as_ref()
    }

    /// Reset statistics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
