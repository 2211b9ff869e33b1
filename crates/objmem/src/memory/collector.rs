//! Collection cycle driver
//!
//! One stop-the-world mark-and-sweep over the heap region. The image region
//! is never swept; heap objects referenced only from image fields survive
//! through the remembered set.

use super::ObjectMemory;
use crate::error::Result;
use crate::gc::GcReason;
use crate::logging::GcEvent;
use crate::marker;
use crate::stats::{CollectionSummary, GcTimer};

impl ObjectMemory {
    /// Run a full collection
    pub fn collect(&mut self) -> Result<CollectionSummary> {
        self.collect_for(GcReason::Explicit)
    }

    pub(crate) fn collect_for(&mut self, reason: GcReason) -> Result<CollectionSummary> {
        let generation = self.collector.begin()?;
        let cycle = self.collector.cycles();
        let total = GcTimer::new();
        let mut phase = GcTimer::new();

        self.logger.log(GcEvent::CycleStart {
            cycle,
            reason: reason.to_string(),
        });

        let marked = marker::mark_heap(
            &mut self.arena,
            &self.image,
            &self.roots,
            self.barrier.remembered_mut(),
            generation,
        );
        let cleared = marker::clear_dead_caches(&mut self.arena, &marked.cache_holders, generation);
        let mark_time = phase.lap();
        self.logger.log(GcEvent::PhaseEnd {
            phase: "mark",
            duration_us: mark_time.as_micros() as u64,
            cycle,
        });

        self.collector.start_sweep()?;
        let swept = self.arena.sweep(generation);
        let sweep_time = phase.lap();
        self.logger.log(GcEvent::PhaseEnd {
            phase: "sweep",
            duration_us: sweep_time.as_micros() as u64,
            cycle,
        });
        self.collector.finish()?;

        let summary = CollectionSummary {
            cycle,
            generation,
            marked: marked.marked,
            reclaimed_objects: swept.reclaimed_objects,
            reclaimed_bytes: swept.reclaimed_bytes,
            live_objects: swept.live_objects,
            live_bytes: swept.live_bytes,
            cleared_cache_slots: cleared,
            remembered_roots: marked.remembered_roots,
            dropped_remembered: marked.dropped_remembered,
            mark_time,
            sweep_time,
            duration: total.elapsed(),
        };
        self.stats.record_collection(&summary);

        self.logger.log(GcEvent::CycleEnd {
            cycle,
            duration_ms: total.elapsed_ms(),
            marked: summary.marked,
            reclaimed_objects: summary.reclaimed_objects,
            reclaimed_bytes: summary.reclaimed_bytes,
        });
        self.logger.log(GcEvent::HeapStats {
            used_bytes: self.arena.used_bytes(),
            max_bytes: self.arena.max_bytes(),
        });

        Ok(summary)
    }
}
