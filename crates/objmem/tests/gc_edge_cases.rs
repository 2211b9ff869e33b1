//! GC Edge Cases Tests - Boundary Conditions and Error Handling
//!
//! These tests verify behavior at boundaries:
//! - Heap exhaustion, with and without collect-on-exhaustion
//! - Free slots retired to make room for larger size classes
//! - Deep graphs that would overflow a recursive marker
//! - Invalid configuration and behavior registration
//!
//! ============================================================================
//! EACH TEST FINDS SPECIFIC EDGE CASE BUGS - DO NOT WEAKEN ASSERTIONS
//! ============================================================================

mod common;

use common::{assert_alive, MemoryFixture, SMALL_HEAP};
use objmem::object::HEADER_SIZE;
use objmem::{
    BehaviorId, GcEvent, MemoryConfig, MemoryError, ObjectLayout, ObjectMemory, ReferenceMap,
};

/// A string whose object is charged just under 1KB
fn kilobyte() -> String {
    "x".repeat(1000)
}

/// ============================================================================
/// HEAP EXHAUSTION TESTS
/// ============================================================================

/// Test that a full heap of rooted objects reports OutOfMemory
///
/// **Bug this finds:** Allocation exceeding max_heap_bytes, wrong error type
/// **Invariant verified:** OOM is reported, never silently over-committed
#[test]
fn test_rooted_heap_exhaustion() {
    // Arrange
    let mut fixture = MemoryFixture::with_heap_size(SMALL_HEAP);
    fixture.memory.push_frame();
    for _ in 0..SMALL_HEAP / 1024 {
        let s = fixture.string(&kilobyte());
        fixture.memory.push_root(s).unwrap();
    }

    // Act
    let result = fixture.memory.allocate_string(&kilobyte());

    // Assert
    match result {
        Err(MemoryError::OutOfMemory {
            requested,
            available,
        }) => {
            assert!(requested >= 1000);
            assert_eq!(available, 0);
        }
        other => panic!("expected OutOfMemory, got {:?}", other),
    }
    assert!(fixture
        .memory
        .logger()
        .events()
        .any(|e| matches!(e, GcEvent::AllocationFailure { .. })));
    assert!(fixture.memory.arena().reserved_bytes() <= SMALL_HEAP);
}

/// Test that exhaustion triggers a collection and the retry succeeds
///
/// **Bug this finds:** collect_on_exhaustion ignored, retry not attempted
#[test]
fn test_exhaustion_collects_and_retries() {
    // Arrange - fill the heap with garbage
    let mut fixture = MemoryFixture::with_heap_size(SMALL_HEAP);
    for _ in 0..SMALL_HEAP / 1024 {
        fixture.string(&kilobyte());
    }
    assert_eq!(fixture.memory.stats().total_cycles(), 0);

    // Act
    let survivor = fixture.string(&kilobyte());

    // Assert
    assert_eq!(fixture.memory.stats().total_cycles(), 1);
    assert_eq!(
        fixture.memory.stats().last().map(|s| s.reclaimed_objects),
        Some(SMALL_HEAP / 1024)
    );
    assert_alive(&fixture.memory, survivor, "retried allocation");
    assert!(fixture.memory.logger().events().any(|e| matches!(
        e,
        GcEvent::CycleStart { reason, .. } if reason.starts_with("allocation failure")
    )));
}

/// Test that without collect-on-exhaustion the failure is immediate
#[test]
fn test_exhaustion_without_collection() {
    // Arrange
    let mut fixture = MemoryFixture::with_config(MemoryConfig {
        max_heap_bytes: SMALL_HEAP,
        segment_bytes: 4 * 1024,
        collect_on_exhaustion: false,
        ..Default::default()
    });
    for _ in 0..SMALL_HEAP / 1024 {
        fixture.string(&kilobyte());
    }

    // Act & Assert
    assert!(matches!(
        fixture.memory.allocate_string(&kilobyte()),
        Err(MemoryError::OutOfMemory { .. })
    ));
    assert_eq!(fixture.memory.stats().total_cycles(), 0);

    // Act & Assert - an explicit collection makes room
    fixture.collect();
    assert!(fixture.memory.allocate_string(&kilobyte()).is_ok());
}

/// Test that free small slots are retired to fit a larger object
///
/// **Bug this finds:** Fragmented free lists causing false OOM
#[test]
fn test_free_slots_retired_for_larger_class() {
    // Arrange - the whole budget sits in free 1KB slots
    let mut fixture = MemoryFixture::with_heap_size(SMALL_HEAP);
    for _ in 0..SMALL_HEAP / 1024 {
        fixture.string(&kilobyte());
    }
    fixture.collect();
    assert_eq!(fixture.memory.arena().used_bytes(), 0);

    // Act
    let large = fixture.string(&"y".repeat(3000));

    // Assert
    assert_alive(&fixture.memory, large, "large string");
    assert!(fixture.memory.arena().reserved_bytes() <= SMALL_HEAP);
    assert_eq!(fixture.memory.stats().total_cycles(), 1);
}

/// Test that an object larger than the whole heap is refused up front
#[test]
fn test_object_larger_than_heap() {
    let mut fixture = MemoryFixture::with_heap_size(SMALL_HEAP);
    assert!(matches!(
        fixture.memory.allocate_string(&"z".repeat(SMALL_HEAP)),
        Err(MemoryError::OutOfMemory { .. })
    ));
}

/// Test that absurd sizes fail with OutOfMemory instead of aborting
///
/// **Bug this finds:** Object bodies materialized before the size is
/// checked against the heap, or charged sizes that wrap around
#[test]
fn test_oversized_request_refused_before_building() {
    // Arrange
    let mut fixture = MemoryFixture::with_defaults();

    // Act & Assert
    for size in [usize::MAX / 2, usize::MAX, usize::MAX - HEADER_SIZE + 1] {
        assert!(
            matches!(
                fixture.memory.allocate(BehaviorId::STRING, size),
                Err(MemoryError::OutOfMemory { .. })
            ),
            "string of {} bytes",
            size
        );
    }
    assert!(matches!(
        fixture.memory.allocate(BehaviorId::ARRAY, usize::MAX - 3),
        Err(MemoryError::OutOfMemory { .. })
    ));
    assert!(matches!(
        fixture.memory.allocate_in_image(BehaviorId::STRING, usize::MAX / 2),
        Err(MemoryError::OutOfMemory { .. })
    ));
    assert!(matches!(
        fixture.memory.allocate_array(u32::MAX),
        Err(MemoryError::OutOfMemory { requested, .. }) if requested > u32::MAX as usize
    ));

    // Assert - nothing was charged and the heap still works
    assert_eq!(fixture.memory.arena().used_bytes(), 0);
    assert!(fixture.memory.image().is_empty());
    assert!(fixture
        .memory
        .logger()
        .events()
        .any(|e| matches!(e, GcEvent::AllocationFailure { .. })));
    let node = fixture.node();
    assert_alive(&fixture.memory, node, "allocation after refused requests");
}

/// ============================================================================
/// DEEP GRAPH TESTS
/// ============================================================================

/// Test that a long chain is marked and flattened without recursion
///
/// **Bug this finds:** Stack overflow in recursive tracing
#[test]
fn test_deep_chain() {
    // Arrange
    const LENGTH: usize = 50_000;
    let mut fixture = MemoryFixture::with_defaults();
    let head = fixture.node();
    fixture.memory.set_global("head", head).unwrap();
    let mut tail = head;
    for _ in 1..LENGTH {
        let next = fixture.node();
        fixture.link(tail, 0, next);
        tail = next;
    }

    // Act
    let reclaimed = fixture.collect();
    let envelope = fixture.memory.flatten(head).unwrap();
    let mut target = MemoryFixture::with_defaults();
    let copy = target.memory.restore(&envelope).unwrap();

    // Assert
    assert_eq!(reclaimed, 0);
    assert_alive(&fixture.memory, tail, "chain tail");
    assert_eq!(envelope.header().unwrap().object_count as usize, LENGTH);
    let mut cursor = Some(copy);
    let mut count = 0;
    while let Some(node) = cursor {
        count += 1;
        cursor = target.memory.field(node, 0).unwrap();
    }
    assert_eq!(count, LENGTH);
}

/// ============================================================================
/// CONFIGURATION AND REGISTRATION
/// ============================================================================

/// Test that invalid configurations are rejected at construction
#[test]
fn test_invalid_configs_rejected() {
    let configs = [
        MemoryConfig {
            max_heap_bytes: 0,
            ..Default::default()
        },
        MemoryConfig {
            segment_bytes: 16,
            ..Default::default()
        },
        MemoryConfig {
            default_bucket_count: 0,
            ..Default::default()
        },
        MemoryConfig {
            interpreter_version: String::new(),
            ..Default::default()
        },
    ];
    for config in configs {
        assert!(matches!(
            ObjectMemory::new(config),
            Err(MemoryError::Configuration(_))
        ));
    }
    assert!(MemoryConfig::from_json("{ not json").is_err());
}

/// Test that a behavior name cannot be re-registered with another layout
///
/// **Bug this finds:** Silent layout change breaking existing objects
#[test]
fn test_behavior_registration_conflict() {
    let mut fixture = MemoryFixture::with_defaults();
    let same = fixture
        .memory
        .register_behavior(
            "Node",
            ObjectLayout::Fields(ReferenceMap::strong(3).with_cached(&[2])),
        )
        .unwrap();
    assert_eq!(same, fixture.node);

    assert!(matches!(
        fixture
            .memory
            .register_behavior("Node", ObjectLayout::Array),
        Err(MemoryError::DuplicateBehavior(_))
    ));
    assert!(matches!(
        fixture.memory.register_behavior("String", ObjectLayout::Array),
        Err(MemoryError::DuplicateBehavior(_))
    ));
}

/// Test that operations on the wrong kind of object fail cleanly
#[test]
fn test_wrong_kind_operations() {
    let mut fixture = MemoryFixture::with_defaults();
    let s = fixture.string("text");
    let node = fixture.node();

    assert!(matches!(
        fixture.memory.table_of(s),
        Err(MemoryError::WrongKind { .. })
    ));
    assert!(matches!(
        fixture.memory.collection_len(node),
        Err(MemoryError::WrongKind { .. })
    ));
    assert!(matches!(
        fixture.memory.handle(s),
        Err(MemoryError::WrongKind { .. })
    ));
    assert!(matches!(
        fixture.memory.allocate(BehaviorId::HANDLE, 8),
        Err(MemoryError::InvalidArgument(_))
    ));
}

/// Test that diagnostics reflect the heap after a cycle
#[test]
fn test_diagnostics_after_cycle() {
    let mut fixture = MemoryFixture::with_defaults();
    let keep = fixture.string("keep");
    fixture.memory.set_global("keep", keep).unwrap();
    fixture.string("drop");
    fixture.collect();

    let diagnostics = fixture.memory.diagnostics();
    assert_eq!(diagnostics["state"], "Idle");
    assert_eq!(diagnostics["cycle_count"], "1");
    assert_eq!(diagnostics["heap_objects"], "1");
    assert_eq!(diagnostics["free_slots"], "1");
    assert_eq!(diagnostics["free_by_class"], "32:1");
    let committed: usize = diagnostics["heap_committed"].parse().unwrap();
    let used: usize = diagnostics["heap_used"].parse().unwrap();
    assert!(committed >= used);
    assert_eq!(diagnostics["globals"], "1");
    assert_eq!(diagnostics["image_loaded"], "false");
}
