//! Marker Module - the two graph traversals
//!
//! ## Collection marking
//!
//! Used by the collector. Starts from the root set plus the heap targets of
//! remembered image fields, follows strong fields only, stops at image
//! objects, and stamps every reached heap object with the current mark
//! generation. Objects with cached slots are reported so the collector can
//! clear cached references to objects that died.
//!
//! ## General marking
//!
//! Used by image save, flatten and inspection. Starts from one object,
//! follows every reference field including cached ones, and returns the
//! reached objects in discovery order. Image objects are entered only when
//! the reason asks for it; otherwise they are reported as leaves.
//!
//! Both traversals are iterative so deep graphs cannot overflow the stack.

pub mod roots;

pub use roots::{RootSet, RootType};

use crate::allocator::Arena;
use crate::barrier::RememberedSet;
use crate::error::Result;
use crate::image::ImageSpace;
use crate::object::{HeapObject, MarkReason, ObjRef, ObjectBody, Trace};
use indexmap::IndexSet;

/// Anything that can resolve a reference in either region
pub trait ObjectSource {
    fn object(&self, reference: ObjRef) -> Result<&HeapObject>;
}

/// Result of collection marking
#[derive(Debug, Clone, Default)]
pub struct MarkOutcome {
    /// Heap objects stamped with the generation
    pub marked: usize,
    /// Roots that came from the remembered set
    pub remembered_roots: usize,
    /// Remembered entries dropped because they no longer point into the heap
    pub dropped_remembered: usize,
    /// Marked objects holding cached slots
    pub cache_holders: Vec<ObjRef>,
}

/// Collection marking over the heap
pub(crate) fn mark_heap(
    arena: &mut Arena,
    image: &ImageSpace,
    roots: &RootSet,
    remembered: &mut RememberedSet,
    generation: u32,
) -> MarkOutcome {
    let mut outcome = MarkOutcome::default();
    let mut worklist: Vec<ObjRef> = Vec::with_capacity(roots.len() + remembered.len());

    for (kind, root) in roots.iter() {
        if root.is_heap() {
            log::trace!("{} root {}", kind, root);
            worklist.push(root);
        }
    }

    let mut remembered_targets = Vec::new();
    outcome.dropped_remembered = remembered.retain(|addr| {
        let target = image
            .get(addr.owner)
            .ok()
            .and_then(|owner| owner.read_field(addr.field))
            .flatten();
        match target {
            Some(target) if target.is_heap() => {
                remembered_targets.push(target);
                true
            }
            _ => false,
        }
    });
    outcome.remembered_roots = remembered_targets.len();
    worklist.extend(remembered_targets);

    let mut children = Vec::new();
    while let Some(reference) = worklist.pop() {
        let object = match arena.get_mut(reference) {
            Ok(object) => object,
            Err(_) => {
                log::warn!("marking skipped stale reference {}", reference);
                continue;
            }
        };
        if object.header().is_marked(generation) {
            continue;
        }
        object.header_mut().set_mark(generation);
        outcome.marked += 1;

        if let ObjectBody::Fields(fields) = object.body() {
            if fields.map().has_cached() {
                outcome.cache_holders.push(reference);
            }
        }

        object.mark(&mut |_, target| {
            if target.is_heap() {
                children.push(target);
            }
        });
        worklist.append(&mut children);
    }

    outcome
}

/// Clear cached slots of `holders` whose heap target was not marked in
/// `generation`; returns the number of slots cleared
pub(crate) fn clear_dead_caches(arena: &mut Arena, holders: &[ObjRef], generation: u32) -> usize {
    let mut cleared = 0;

    for &holder in holders {
        let dead: Vec<u32> = match arena.get(holder) {
            Ok(object) => match object.as_fields() {
                Some(fields) => fields
                    .map()
                    .cached_slots()
                    .filter(|&slot| match fields.slot(slot).flatten() {
                        Some(target) if target.is_heap() => !arena
                            .get(target)
                            .map(|t| t.header().is_marked(generation))
                            .unwrap_or(false),
                        _ => false,
                    })
                    .collect(),
                None => continue,
            },
            Err(_) => continue,
        };

        if let Ok(object) = arena.get_mut(holder) {
            if let ObjectBody::Fields(fields) = object.body_mut() {
                for slot in dead {
                    fields.set_slot(slot, None);
                    cleared += 1;
                }
            }
        }
    }

    cleared
}

/// General marking from `root`.
///
/// Returns every reached object, `root` first, in discovery order. Image
/// objects are included but only traversed when `reason.enters_image()`.
pub fn reachable_from(
    source: &dyn ObjectSource,
    root: ObjRef,
    reason: MarkReason,
) -> Result<IndexSet<ObjRef>> {
    let mut reached = IndexSet::new();
    let mut worklist = vec![root];

    while let Some(reference) = worklist.pop() {
        if !reached.insert(reference) {
            continue;
        }
        let object = source.object(reference)?;
        if reference.is_image() && !reason.enters_image() {
            continue;
        }

        let mut children = Vec::new();
        object.mark_general(reason, &mut |_, target| children.push(target));
        // Reverse so the first field is visited first
        worklist.extend(children.into_iter().rev());
    }

    Ok(reached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::FieldAddr;
    use crate::config::MemoryConfig;
    use crate::error::MemoryError;
    use crate::object::{BehaviorId, Field, FieldObject, ObjectHeader, ReferenceMap};

    struct Spaces<'a> {
        arena: &'a Arena,
        image: &'a ImageSpace,
    }

    impl ObjectSource for Spaces<'_> {
        fn object(&self, reference: ObjRef) -> Result<&HeapObject> {
            if reference.is_image() {
                self.image.get(reference)
            } else {
                self.arena.get(reference)
            }
        }
    }

    fn node(map: ReferenceMap) -> HeapObject {
        HeapObject::new(
            ObjectHeader::new(BehaviorId::ARRAY, 0),
            ObjectBody::Fields(FieldObject::new(map, 0)),
        )
    }

    fn link(arena: &mut Arena, owner: ObjRef, slot: u32, target: ObjRef) {
        match arena.get_mut(owner).unwrap().body_mut() {
            ObjectBody::Fields(fields) => assert!(fields.set_slot(slot, Some(target))),
            _ => unreachable!(),
        }
    }

    fn arena() -> Arena {
        Arena::new(&MemoryConfig::default())
    }

    #[test]
    fn test_marks_reachable_only() {
        let mut arena = arena();
        let image = ImageSpace::new();
        let a = arena.allocate(node(ReferenceMap::strong(1))).unwrap();
        let b = arena.allocate(node(ReferenceMap::strong(1))).unwrap();
        let garbage = arena.allocate(node(ReferenceMap::strong(1))).unwrap();
        link(&mut arena, a, 0, b);
        link(&mut arena, b, 0, a);

        let mut roots = RootSet::new();
        roots.set_global("a", a);
        let outcome = mark_heap(&mut arena, &image, &roots, &mut RememberedSet::new(), 1);

        assert_eq!(outcome.marked, 2);
        assert!(arena.get(b).unwrap().header().is_marked(1));
        assert!(!arena.get(garbage).unwrap().header().is_marked(1));
    }

    #[test]
    fn test_remembered_fields_are_roots() {
        let mut arena = arena();
        let mut image = ImageSpace::new();
        let target = arena.allocate(node(ReferenceMap::empty())).unwrap();
        let owner = image.push(node(ReferenceMap::strong(2))).unwrap();
        if let ObjectBody::Fields(fields) = image.get_mut(owner).unwrap().body_mut() {
            fields.set_slot(0, Some(target));
        }

        let mut remembered = RememberedSet::new();
        remembered.record(FieldAddr::new(owner, Field::Slot(0)));
        // Null field: dropped lazily
        remembered.record(FieldAddr::new(owner, Field::Slot(1)));

        let outcome = mark_heap(&mut arena, &image, &RootSet::new(), &mut remembered, 1);
        assert_eq!(outcome.remembered_roots, 1);
        assert_eq!(outcome.dropped_remembered, 1);
        assert_eq!(remembered.len(), 1);
        assert!(arena.get(target).unwrap().header().is_marked(1));
    }

    #[test]
    fn test_cached_slot_does_not_keep_alive_and_is_cleared() {
        let mut arena = arena();
        let image = ImageSpace::new();
        let holder = arena
            .allocate(node(ReferenceMap::strong(2).with_cached(&[1])))
            .unwrap();
        let kept = arena.allocate(node(ReferenceMap::empty())).unwrap();
        let cached = arena.allocate(node(ReferenceMap::empty())).unwrap();
        link(&mut arena, holder, 0, kept);
        link(&mut arena, holder, 1, cached);

        let mut roots = RootSet::new();
        roots.push(holder);
        let outcome = mark_heap(&mut arena, &image, &roots, &mut RememberedSet::new(), 1);
        assert_eq!(outcome.marked, 2);
        assert_eq!(outcome.cache_holders, vec![holder]);

        let cleared = clear_dead_caches(&mut arena, &outcome.cache_holders, 1);
        assert_eq!(cleared, 1);
        let fields = arena.get(holder).unwrap().as_fields().unwrap().clone();
        assert_eq!(fields.slot(0), Some(Some(kept)));
        assert_eq!(fields.slot(1), Some(None));
    }

    #[test]
    fn test_general_marking_follows_cached_and_stops_at_image() {
        let mut arena = arena();
        let mut image = ImageSpace::new();
        let image_leaf = image.push(node(ReferenceMap::empty())).unwrap();
        let image_parent = image.push(node(ReferenceMap::strong(1))).unwrap();
        if let ObjectBody::Fields(fields) = image.get_mut(image_parent).unwrap().body_mut() {
            fields.set_slot(0, Some(image_leaf));
        }

        let root = arena
            .allocate(node(ReferenceMap::strong(2).with_cached(&[1])))
            .unwrap();
        let cached = arena.allocate(node(ReferenceMap::empty())).unwrap();
        link(&mut arena, root, 0, image_parent);
        link(&mut arena, root, 1, cached);

        let spaces = Spaces {
            arena: &arena,
            image: &image,
        };
        let flatten = reachable_from(&spaces, root, MarkReason::Flatten).unwrap();
        assert_eq!(
            flatten.iter().copied().collect::<Vec<_>>(),
            vec![root, image_parent, cached]
        );

        let save = reachable_from(&spaces, root, MarkReason::SaveImage).unwrap();
        assert_eq!(save.len(), 4);
        assert!(save.contains(&image_leaf));
    }

    #[test]
    fn test_general_marking_reports_stale_root() {
        let mut arena = arena();
        let image = ImageSpace::new();
        let dead = arena.allocate(node(ReferenceMap::empty())).unwrap();
        arena.sweep(1);
        let spaces = Spaces {
            arena: &arena,
            image: &image,
        };
        assert!(matches!(
            reachable_from(&spaces, dead, MarkReason::Inspect),
            Err(MemoryError::StaleReference { .. })
        ));
    }
}
