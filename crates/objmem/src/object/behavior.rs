//! Behaviors - class identity and storage layout of objects
//!
//! Every object is tagged with a [`BehaviorId`] naming an entry in the
//! memory's [`BehaviorTable`]. The behavior fixes the object's layout, which
//! in turn decides what the allocator builds, what the marker traces and how
//! the envelope encoder writes the object.
//!
//! Behaviors travel between interpreter instances by *name*: an envelope
//! carries the names of the behaviors it uses and the receiving memory maps
//! them back to its own ids.

use crate::error::{MemoryError, Result};
use crate::object::ReferenceMap;
use rustc_hash::FxHashMap;

/// Index into a [`BehaviorTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BehaviorId(u16);

impl BehaviorId {
    /// Byte strings
    pub const STRING: BehaviorId = BehaviorId(0);
    /// Variable-length arrays of strong references
    pub const ARRAY: BehaviorId = BehaviorId(1);
    /// Raw hash table contents
    pub const HASH_CONTENTS: BehaviorId = BehaviorId(2);
    /// Identity-keyed table collection
    pub const TABLE: BehaviorId = BehaviorId(3);
    /// String-keyed directory collection
    pub const DIRECTORY: BehaviorId = BehaviorId(4);
    /// String-keyed collection allowing duplicate indices
    pub const RELATION: BehaviorId = BehaviorId(5);
    /// Non-portable native handle
    pub const HANDLE: BehaviorId = BehaviorId(6);

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

/// Storage layout of objects of one behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectLayout {
    /// Fixed reference slots described by the map, plus raw bytes
    Fields(ReferenceMap),
    /// Variable number of strong reference slots, plus raw bytes
    Array,
    /// Hash table contents
    Table,
    /// Native handle, replaced by a proxy when flattened
    Handle,
}

impl ObjectLayout {
    pub fn name(&self) -> &'static str {
        match self {
            ObjectLayout::Fields(_) => "fields",
            ObjectLayout::Array => "array",
            ObjectLayout::Table => "table",
            ObjectLayout::Handle => "handle",
        }
    }
}

/// A registered behavior
#[derive(Debug, Clone)]
pub struct Behavior {
    name: String,
    layout: ObjectLayout,
}

impl Behavior {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> ObjectLayout {
        self.layout
    }
}

/// Registry of behaviors known to one object memory
#[derive(Debug, Clone)]
pub struct BehaviorTable {
    behaviors: Vec<Behavior>,
    by_name: FxHashMap<String, BehaviorId>,
}

impl BehaviorTable {
    /// Create a table holding the built-in behaviors
    pub fn new() -> Self {
        let mut table = Self {
            behaviors: Vec::new(),
            by_name: FxHashMap::default(),
        };

        let builtins = [
            ("String", ObjectLayout::Fields(ReferenceMap::empty())),
            ("Array", ObjectLayout::Array),
            ("HashContents", ObjectLayout::Table),
            ("Table", ObjectLayout::Fields(ReferenceMap::strong(1))),
            ("Directory", ObjectLayout::Fields(ReferenceMap::strong(1))),
            ("Relation", ObjectLayout::Fields(ReferenceMap::strong(1))),
            ("Handle", ObjectLayout::Handle),
        ];
        for (name, layout) in builtins {
            table.push(name, layout);
        }

        table
    }

    fn push(&mut self, name: &str, layout: ObjectLayout) -> BehaviorId {
        let id = BehaviorId(self.behaviors.len() as u16);
        self.behaviors.push(Behavior {
            name: name.to_string(),
            layout,
        });
        self.by_name.insert(name.to_string(), id);
        id
    }

    /// Register a behavior.
    ///
    /// Registering the same name with the same layout again returns the
    /// existing id; a different layout is an error.
    pub fn register(&mut self, name: &str, layout: ObjectLayout) -> Result<BehaviorId> {
        if let Some(&id) = self.by_name.get(name) {
            if self.behaviors[id.0 as usize].layout == layout {
                return Ok(id);
            }
            return Err(MemoryError::DuplicateBehavior(name.to_string()));
        }

        if self.behaviors.len() >= u16::MAX as usize {
            return Err(MemoryError::InvalidArgument(
                "behavior table is full".to_string(),
            ));
        }

        Ok(self.push(name, layout))
    }

    pub fn get(&self, id: BehaviorId) -> Result<&Behavior> {
        self.behaviors
            .get(id.0 as usize)
            .ok_or(MemoryError::InvalidBehavior(id.0))
    }

    pub fn lookup(&self, name: &str) -> Option<BehaviorId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}

impl Default for BehaviorTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_have_fixed_ids() {
        let table = BehaviorTable::new();
        assert_eq!(table.lookup("String"), Some(BehaviorId::STRING));
        assert_eq!(table.lookup("HashContents"), Some(BehaviorId::HASH_CONTENTS));
        assert_eq!(table.lookup("Directory"), Some(BehaviorId::DIRECTORY));
        assert_eq!(table.lookup("Handle"), Some(BehaviorId::HANDLE));
        assert_eq!(table.get(BehaviorId::ARRAY).unwrap().layout(), ObjectLayout::Array);
    }

    #[test]
    fn test_register_is_idempotent_for_same_layout() {
        let mut table = BehaviorTable::new();
        let layout = ObjectLayout::Fields(ReferenceMap::strong(2));
        let a = table.register("Node", layout).unwrap();
        let b = table.register("Node", layout).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_register_conflicting_layout_fails() {
        let mut table = BehaviorTable::new();
        table
            .register("Node", ObjectLayout::Fields(ReferenceMap::strong(2)))
            .unwrap();
        let err = table.register("Node", ObjectLayout::Array).unwrap_err();
        assert!(matches!(err, MemoryError::DuplicateBehavior(_)));
    }
}
