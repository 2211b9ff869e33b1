//! Test Utilities for the objmem Test Suite
//!
//! Fixtures build a fresh memory per test; assertion helpers check whole
//! graphs rather than single fields, so a failure names the broken shape.
//!
//! ============================================================================
//! CRITICAL: These utilities are designed to FIND BUGS, not to have passing tests.
//! ============================================================================

#![allow(dead_code)]

use objmem::{
    BehaviorId, CollectionKind, MemoryConfig, MemoryError, ObjRef, ObjectLayout, ObjectMemory,
    ReferenceMap,
};
use std::collections::HashMap;

/// Small heap for exhaustion tests (64KB)
pub const SMALL_HEAP: usize = 64 * 1024;

/// ============================================================================
/// MEMORY FIXTURE
/// ============================================================================

/// Test fixture owning one object memory
pub struct MemoryFixture {
    pub memory: ObjectMemory,
    /// Two strong slots followed by one cached slot
    pub node: BehaviorId,
}

impl MemoryFixture {
    /// Create fixture with default configuration
    ///
    /// **Bug this finds:** Configuration validation bugs, initialization failures
    pub fn with_defaults() -> Self {
        Self::with_config(MemoryConfig::default())
    }

    /// Create fixture with a heap of `max_heap_bytes`
    ///
    /// **Bug this finds:** Heap size validation bugs, OOM handling
    pub fn with_heap_size(max_heap_bytes: usize) -> Self {
        Self::with_config(MemoryConfig {
            max_heap_bytes,
            segment_bytes: 4 * 1024,
            ..Default::default()
        })
    }

    pub fn with_config(config: MemoryConfig) -> Self {
        let mut memory =
            ObjectMemory::new(config).expect("memory should build from a valid config");
        let node = memory
            .register_behavior(
                "Node",
                ObjectLayout::Fields(ReferenceMap::strong(3).with_cached(&[2])),
            )
            .expect("Node behavior should register");
        Self { memory, node }
    }

    /// Allocate a node with no payload bytes
    pub fn node(&mut self) -> ObjRef {
        self.memory
            .allocate(self.node, 0)
            .unwrap_or_else(|e| panic!("node allocation failed: {:?}", e))
    }

    pub fn string(&mut self, value: &str) -> ObjRef {
        self.memory
            .allocate_string(value)
            .unwrap_or_else(|e| panic!("string allocation failed: {:?}", e))
    }

    pub fn link(&mut self, owner: ObjRef, slot: u32, target: ObjRef) {
        self.memory
            .set_reference(owner, slot, Some(target))
            .unwrap_or_else(|e| panic!("store {} -> {} failed: {:?}", owner, target, e));
    }

    /// Directory registered as global `name`
    pub fn global_directory(&mut self, name: &str) -> ObjRef {
        let directory = self
            .memory
            .allocate_collection(CollectionKind::Directory)
            .expect("directory allocation should succeed");
        self.memory
            .set_global(name, directory)
            .expect("global registration should succeed");
        directory
    }

    /// Run one collection and return the number of objects reclaimed
    ///
    /// **Bug this finds:** GC not completing, state machine bugs
    pub fn collect(&mut self) -> usize {
        let summary = self
            .memory
            .collect()
            .unwrap_or_else(|e| panic!("collection failed: {:?}", e));
        assert_eq!(
            self.memory.state(),
            objmem::GcState::Idle,
            "collector must return to Idle after a cycle"
        );
        summary.reclaimed_objects
    }
}

/// ============================================================================
/// STRICT ASSERTION HELPERS
/// ============================================================================

/// Assert that a reference still names a live object
///
/// **Bug this finds:** Live object reclaimed, root scanning bug
/// **Tolerance:** ZERO - a reachable object must never be collected
#[track_caller]
pub fn assert_alive(memory: &ObjectMemory, reference: ObjRef, context: &str) {
    assert!(
        memory.is_live(reference),
        "{}: {} was reclaimed while still reachable",
        context,
        reference
    );
}

/// Assert that a reference is stale
///
/// **Bug this finds:** Leak, unreachable object surviving a cycle
#[track_caller]
pub fn assert_reclaimed(memory: &ObjectMemory, reference: ObjRef, context: &str) {
    assert!(
        matches!(
            memory.object(reference),
            Err(MemoryError::StaleReference { .. })
        ),
        "{}: {} survived although nothing reaches it",
        context,
        reference
    );
}

/// Shape of the graph reachable from `root`: objects in traversal order,
/// each as (behavior name, bytes, slot targets as traversal positions)
pub type Shape = Vec<(String, Vec<u8>, Vec<Option<usize>>)>;

/// Canonical shape of a field graph, independent of where objects live
///
/// Table entries are not part of the shape; compare them through lookups.
pub fn shape(memory: &ObjectMemory, root: ObjRef) -> Shape {
    let order = memory
        .reachable_from(root, objmem::MarkReason::SaveImage)
        .expect("reachability walk should succeed");
    let position: HashMap<ObjRef, usize> =
        order.iter().enumerate().map(|(i, r)| (*r, i)).collect();

    order
        .iter()
        .map(|&reference| {
            let behavior = memory.behavior_of(reference).unwrap();
            let name = memory.behaviors().get(behavior).unwrap().name().to_string();
            let bytes = memory.bytes(reference).map(<[u8]>::to_vec).unwrap_or_default();
            let slots = memory
                .fields(reference)
                .map(|slots| {
                    slots
                        .iter()
                        .map(|slot| slot.map(|target| position[&target]))
                        .collect()
                })
                .unwrap_or_default();
            (name, bytes, slots)
        })
        .collect()
}
