//! GC Core Module - collection cycle state
//!
//! Tracks where the stop-the-world mark-and-sweep cycle is and hands out
//! mark generations:
//!
//! ```text
//!   Idle ──begin──▶ Marking ──▶ Sweeping ──finish──▶ Idle
//! ```
//!
//! A heap object is live in a cycle iff its header carries that cycle's
//! generation, so mark flags never need clearing between cycles.
//! Generation 0 means "never marked" and is skipped when the counter wraps.

use crate::error::{MemoryError, Result};
use std::fmt;

/// GC cycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcState {
    /// No collection in progress
    Idle,
    /// Marking phase - identifying live objects
    Marking,
    /// Sweeping phase - reclaiming unmarked objects
    Sweeping,
}

impl fmt::Display for GcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcState::Idle => write!(f, "Idle"),
            GcState::Marking => write!(f, "Marking"),
            GcState::Sweeping => write!(f, "Sweeping"),
        }
    }
}

/// Reason for GC trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcReason {
    /// Explicit request from a collaborator
    Explicit,
    /// An allocation did not fit
    AllocationFailure { requested: usize },
}

impl fmt::Display for GcReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GcReason::Explicit => write!(f, "explicit"),
            GcReason::AllocationFailure { requested } => {
                write!(f, "allocation failure ({} bytes)", requested)
            }
        }
    }
}

/// Collector state machine and generation counter
#[derive(Debug)]
pub struct Collector {
    state: GcState,
    generation: u32,
    cycles: u64,
}

impl Collector {
    pub fn new() -> Self {
        Self {
            state: GcState::Idle,
            generation: 0,
            cycles: 0,
        }
    }

    pub fn state(&self) -> GcState {
        self.state
    }

    pub fn is_collecting(&self) -> bool {
        self.state != GcState::Idle
    }

    /// Generation of the current (or last) cycle
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Completed and running cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Start a cycle: `Idle → Marking`; returns the new generation
    pub fn begin(&mut self) -> Result<u32> {
        self.transition(GcState::Idle, GcState::Marking)?;
        self.generation = match self.generation.wrapping_add(1) {
            0 => 1,
            next => next,
        };
        self.cycles += 1;
        Ok(self.generation)
    }

    /// `Marking → Sweeping`
    pub fn start_sweep(&mut self) -> Result<()> {
        self.transition(GcState::Marking, GcState::Sweeping)
    }

    /// `Sweeping → Idle`
    pub fn finish(&mut self) -> Result<()> {
        self.transition(GcState::Sweeping, GcState::Idle)
    }

    fn transition(&mut self, from: GcState, to: GcState) -> Result<()> {
        if self.state != from {
            return Err(MemoryError::InvalidState {
                expected: from.to_string(),
                actual: self.state.to_string(),
            });
        }
        log::trace!("collector {} -> {}", from, to);
        self.state = to;
        Ok(())
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}
