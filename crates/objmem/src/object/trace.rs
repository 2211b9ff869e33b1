//! Reference-field traversal
//!
//! [`Trace`] is the contract every object body fulfils so the collector and
//! the serializer can find its references. The two methods correspond to the
//! two marking modes:
//!
//! - `mark`: the fields that matter for liveness (collection marking)
//! - `mark_general`: every reference field, including cached ones
//!   (image save, flatten, inspection)
//!
//! Object bodies form a closed enum, so adding a kind without a `Trace`
//! implementation does not compile.

use crate::object::ObjRef;
use std::fmt;

/// Address of a reference field inside its owning object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    /// Reference slot of a field or array object
    Slot(u32),
    /// Index half of a hash table entry
    Index(u32),
    /// Value half of a hash table entry
    Value(u32),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Slot(slot) => write!(f, "slot[{}]", slot),
            Field::Index(entry) => write!(f, "entry[{}].index", entry),
            Field::Value(entry) => write!(f, "entry[{}].value", entry),
        }
    }
}

/// Why a general marking pass is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkReason {
    /// Writing a startup image: the whole graph is copied, image objects
    /// included
    SaveImage,
    /// Building an envelope: image objects travel by name
    Flatten,
    /// Debugging / reachability queries
    Inspect,
}

impl MarkReason {
    /// Should the traversal descend into image-region objects?
    pub fn enters_image(self) -> bool {
        matches!(self, MarkReason::SaveImage)
    }
}

/// Reference-field visitor contract
pub trait Trace {
    /// Visit every field that keeps its target alive
    fn mark(&self, visit: &mut dyn FnMut(Field, ObjRef));

    /// Visit every reference field
    fn mark_general(&self, reason: MarkReason, visit: &mut dyn FnMut(Field, ObjRef));
}
