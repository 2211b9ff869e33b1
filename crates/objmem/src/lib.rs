//! # objmem - Object Memory for a Dynamic Object-Oriented Interpreter
//!
//! objmem is the storage layer beneath an interpreter: it allocates objects,
//! reclaims the ones nothing can reach, keeps hash tables sound while the
//! heap changes underneath them, and moves object graphs between memories
//! or onto disk.
//!
//! ## Overview
//!
//! - **Two regions**: a collectible heap and an image region holding the
//!   interpreter's startup objects, which is never scanned or reclaimed
//! - **Mark-sweep collection**: non-moving, stop-the-world, driven by
//!   per-behavior reference maps
//! - **Write barrier**: every reference store into an image object is
//!   remembered, so heap objects referenced only from the image survive
//! - **Hash tables**: chained contents with identity or value indices, and
//!   the `Table`/`Directory`/`Relation` collections built on them
//! - **Envelopes**: flatten any reachable graph into a relocatable byte
//!   buffer and restore it elsewhere, with proxies for native handles
//! - **Image files**: save every global root and load it back into the
//!   image region of a fresh memory
//!
//! ## Quick Start
//!
//! ```rust
//! use objmem::{CollectionKind, MemoryConfig, ObjectMemory};
//!
//! fn main() -> Result<(), objmem::MemoryError> {
//!     let mut memory = ObjectMemory::new(MemoryConfig::default())?;
//!
//!     // Globals are roots: the directory and everything in it survive
//!     let names = memory.allocate_collection(CollectionKind::Directory)?;
//!     memory.set_global("names", names)?;
//!
//!     let value = memory.allocate_string("world")?;
//!     memory.directory_put_str(names, "hello", value)?;
//!
//!     // Unrooted garbage is reclaimed
//!     memory.allocate_string("garbage")?;
//!     let summary = memory.collect()?;
//!     assert_eq!(summary.reclaimed_objects, 1);
//!
//!     // Move the directory to another memory
//!     let envelope = memory.flatten(names)?;
//!     let mut other = ObjectMemory::new(MemoryConfig::default())?;
//!     let copy = other.restore(&envelope)?;
//!     let found = other.directory_get_str(copy, "hello")?;
//!     assert_eq!(other.string_value(found.unwrap())?, "world");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     Interpreter                          │
//! │   allocate · set_reference · table ops · flatten         │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │  &mut ObjectMemory
//!                             │  (or SharedMemory lock)
//! ┌───────────────────────────┼──────────────────────────────┐
//! │                    ObjectMemory                          │
//! │                           ▼                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────┐   │
//! │  │    Arena     │  │ ImageSpace   │  │   RootSet     │   │
//! │  │ (collected)  │  │ (permanent)  │  │ globals+stack │   │
//! │  └──────▲───────┘  └──────┬───────┘  └───────┬───────┘   │
//! │         │ sweep           │ remembered set   │ roots     │
//! │  ┌──────┴─────────────────▼──────────────────▼───────┐   │
//! │  │          Collector: mark → sweep → idle           │   │
//! │  └───────────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Collection Cycle
//!
//! 1. **Mark**: trace from globals, stack frames and the remembered set,
//!    following only strong reference slots and table entries
//! 2. **Clear caches**: null cached slots whose targets were not marked
//! 3. **Sweep**: return unmarked heap slots to the size-class free lists
//!
//! ## Safety
//!
//! objmem contains no `unsafe` outside the read-only mapping of image
//! files. Object references are handles, not pointers: a reference kept
//! outside the root set across a collection fails with
//! [`MemoryError::StaleReference`] instead of aliasing a new object.
//!
//! ### Thread Safety
//!
//! `ObjectMemory` is `Send` but takes `&mut self` for every mutation.
//! [`SharedMemory`] wraps it in one coarse lock for interpreters that share
//! a heap between threads.
//!
//! ## Modules
//!
//! - [`allocator`]: Size-class arena with segments and free lists
//! - [`barrier`]: Write barrier and remembered set
//! - [`config`]: Memory configuration and validation
//! - [`envelope`]: Flatten and restore of object graphs
//! - [`error`]: Error types for all operations
//! - [`gc`]: Collector state machine
//! - [`image`]: Image region and image files
//! - [`logging`]: Structured collector events
//! - [`marker`]: Root set and reachability
//! - [`memory`]: The object memory handle and collection operations
//! - [`object`]: References, behaviors, reference maps and object bodies
//! - [`stats`]: Collection statistics and timing
//! - [`table`]: Hash table contents

// Core
pub mod config;
pub mod error;
pub mod gc;
pub mod memory;

// Storage
pub mod allocator;
pub mod image;
pub mod object;
pub mod table;

// Collection
pub mod barrier;
pub mod marker;

// Serialization
pub mod envelope;

// Monitoring
pub mod logging;
pub mod stats;

// Re-export main types for convenience
pub use config::MemoryConfig;
pub use envelope::{Envelope, ProxyResolver, Restored};
pub use error::{EnvelopeError, MemoryError, Result};
pub use gc::{GcReason, GcState};
pub use image::ImageSummary;
pub use logging::GcEvent;
pub use memory::{CollectionKind, ObjectMemory, SharedMemory};
pub use object::{BehaviorId, MarkReason, ObjRef, ObjectLayout, ReferenceMap, Region};
pub use stats::CollectionSummary;
pub use table::IndexPolicy;

/// objmem version string from Cargo.toml
///
/// Used as the default interpreter version stamped into envelopes and
/// image files.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_memory() {
        let memory = ObjectMemory::new(MemoryConfig::default()).unwrap();
        assert_eq!(memory.state(), GcState::Idle);
        assert_eq!(memory.config().interpreter_version, VERSION);
    }

    #[test]
    fn test_version_not_empty() {
        assert!(!VERSION.is_empty());
    }
}
