//! GC Logging and Tracing
//!
//! Events are emitted through the `log` facade and kept in a bounded
//! in-memory history for diagnostics.
//!
//! Log Levels:
//! - WARN: allocation failures, rejected envelopes
//! - INFO: collection cycles when `verbose` is set
//! - DEBUG: collection cycles otherwise, phases, image and envelope traffic
//! - TRACE: per-object operations (emitted directly by the subsystems)

use std::collections::VecDeque;
use std::time::Instant;

/// GC event types
#[derive(Debug, Clone, PartialEq)]
pub enum GcEvent {
    /// Collection cycle started
    CycleStart { cycle: u64, reason: String },

    /// Collection phase completed
    PhaseEnd {
        phase: &'static str,
        duration_us: u64,
        cycle: u64,
    },

    /// Collection cycle completed
    CycleEnd {
        cycle: u64,
        duration_ms: f64,
        marked: usize,
        reclaimed_objects: usize,
        reclaimed_bytes: usize,
    },

    /// Heap usage after a cycle
    HeapStats { used_bytes: usize, max_bytes: usize },

    /// Allocation did not fit
    AllocationFailure { size: usize, heap_used: usize },

    /// Envelope produced
    Flattened { objects: usize, bytes: usize },

    /// Envelope consumed
    Restored { objects: usize, image: bool },

    /// Envelope rejected
    RestoreFailed { reason: String },
}

impl GcEvent {
    /// Log level for event
    pub fn level(&self, verbose: bool) -> log::Level {
        match self {
            GcEvent::AllocationFailure { .. } | GcEvent::RestoreFailed { .. } => log::Level::Warn,
            GcEvent::CycleStart { .. } | GcEvent::CycleEnd { .. } | GcEvent::HeapStats { .. } => {
                if verbose {
                    log::Level::Info
                } else {
                    log::Level::Debug
                }
            }
            GcEvent::PhaseEnd { .. } | GcEvent::Flattened { .. } | GcEvent::Restored { .. } => {
                log::Level::Debug
            }
        }
    }

    /// Human-readable form
    pub fn describe(&self) -> String {
        match self {
            GcEvent::CycleStart { cycle, reason } => {
                format!("[GC] Cycle {} started (reason: {})", cycle, reason)
            }
            GcEvent::PhaseEnd {
                phase,
                duration_us,
                cycle,
            } => format!(
                "[GC] Cycle {}: {} phase completed ({} us)",
                cycle, phase, duration_us
            ),
            GcEvent::CycleEnd {
                cycle,
                duration_ms,
                marked,
                reclaimed_objects,
                reclaimed_bytes,
            } => format!(
                "[GC] Cycle {} completed ({:.2}ms, {} marked, reclaimed {} objects / {} bytes)",
                cycle, duration_ms, marked, reclaimed_objects, reclaimed_bytes
            ),
            GcEvent::HeapStats {
                used_bytes,
                max_bytes,
            } => {
                let utilization = if *max_bytes == 0 {
                    0.0
                } else {
                    *used_bytes as f64 / *max_bytes as f64
                };
                format!(
                    "[GC] Heap: {}/{} bytes ({:.1}% utilized)",
                    used_bytes,
                    max_bytes,
                    utilization * 100.0
                )
            }
            GcEvent::AllocationFailure { size, heap_used } => format!(
                "[GC] Allocation failure: {} bytes (heap used: {})",
                size, heap_used
            ),
            GcEvent::Flattened { objects, bytes } => {
                format!("[GC] Flattened {} objects into {} bytes", objects, bytes)
            }
            GcEvent::Restored { objects, image } => format!(
                "[GC] Restored {} objects into {}",
                objects,
                if *image { "image" } else { "heap" }
            ),
            GcEvent::RestoreFailed { reason } => format!("[GC] Restore rejected: {}", reason),
        }
    }

    /// JSON form
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            GcEvent::CycleStart { cycle, reason } => serde_json::json!({
                "type": "cycle_start",
                "cycle": cycle,
                "reason": reason
            }),
            GcEvent::PhaseEnd {
                phase,
                duration_us,
                cycle,
            } => serde_json::json!({
                "type": "phase_end",
                "cycle": cycle,
                "phase": phase,
                "duration_us": duration_us
            }),
            GcEvent::CycleEnd {
                cycle,
                duration_ms,
                marked,
                reclaimed_objects,
                reclaimed_bytes,
            } => serde_json::json!({
                "type": "cycle_end",
                "cycle": cycle,
                "duration_ms": duration_ms,
                "marked": marked,
                "reclaimed_objects": reclaimed_objects,
                "reclaimed_bytes": reclaimed_bytes
            }),
            GcEvent::HeapStats {
                used_bytes,
                max_bytes,
            } => serde_json::json!({
                "type": "heap_stats",
                "used_bytes": used_bytes,
                "max_bytes": max_bytes
            }),
            GcEvent::AllocationFailure { size, heap_used } => serde_json::json!({
                "type": "allocation_failure",
                "size": size,
                "heap_used": heap_used
            }),
            GcEvent::Flattened { objects, bytes } => serde_json::json!({
                "type": "flattened",
                "objects": objects,
                "bytes": bytes
            }),
            GcEvent::Restored { objects, image } => serde_json::json!({
                "type": "restored",
                "objects": objects,
                "image": image
            }),
            GcEvent::RestoreFailed { reason } => serde_json::json!({
                "type": "restore_failed",
                "reason": reason
            }),
        }
    }
}

/// GC Logger - forwards events to `log` and keeps recent ones
#[derive(Debug)]
pub struct GcLogger {
    verbose: bool,
    capacity: usize,
    events: VecDeque<(Instant, GcEvent)>,
    enabled: bool,
}

impl GcLogger {
    pub fn new(verbose: bool, capacity: usize) -> Self {
        Self {
            verbose,
            capacity,
            events: VecDeque::with_capacity(capacity.min(1024)),
            enabled: true,
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Log a GC event
    pub fn log(&mut self, event: GcEvent) {
        if !self.enabled {
            return;
        }

        let level = event.level(self.verbose);
        if log::log_enabled!(target: "objmem::gc", level) {
            log::log!(target: "objmem::gc", level, "{}", event.describe());
        }

        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back((Instant::now(), event));
    }

    /// Recent events, oldest first
    pub fn events(&self) -> impl Iterator<Item = &GcEvent> {
        self.events.iter().map(|(_, event)| event)
    }

    pub fn last(&self) -> Option<&GcEvent> {
        self.events.back().map(|(_, event)| event)
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Recent events as a JSON array
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.events().map(GcEvent::to_json).collect())
    }
}

impl Default for GcLogger {
    fn default() -> Self {
        Self::new(false, 64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let mut logger = GcLogger::new(false, 2);
        for cycle in 0..3 {
            logger.log(GcEvent::CycleStart {
                cycle,
                reason: "explicit".to_string(),
            });
        }
        assert_eq!(logger.event_count(), 2);
        assert_eq!(
            logger.events().next(),
            Some(&GcEvent::CycleStart {
                cycle: 1,
                reason: "explicit".to_string()
            })
        );
    }

    #[test]
    fn test_disabled_logger_drops_events() {
        let mut logger = GcLogger::default();
        logger.disable();
        logger.log(GcEvent::AllocationFailure {
            size: 8,
            heap_used: 0,
        });
        assert_eq!(logger.event_count(), 0);
    }

    #[test]
    fn test_levels() {
        let failure = GcEvent::AllocationFailure {
            size: 1,
            heap_used: 2,
        };
        assert_eq!(failure.level(false), log::Level::Warn);
        let start = GcEvent::CycleStart {
            cycle: 0,
            reason: String::new(),
        };
        assert_eq!(start.level(true), log::Level::Info);
        assert_eq!(start.level(false), log::Level::Debug);
    }

    #[test]
    fn test_json_shape() {
        let event = GcEvent::Flattened {
            objects: 3,
            bytes: 120,
        };
        let json = event.to_json();
        assert_eq!(json["type"], "flattened");
        assert_eq!(json["objects"], 3);
    }
}
