//! Object Module - the object model shared by every subsystem
//!
//! Defines object identity ([`ObjRef`], [`Region`]), object shape
//! ([`HeapObject`], [`ObjectBody`], [`ReferenceMap`]), class identity
//! ([`Behavior`], [`BehaviorTable`]) and the traversal contract ([`Trace`]).

pub mod behavior;
pub mod header;
pub mod reference;
pub mod refmap;
pub mod trace;

pub use behavior::{Behavior, BehaviorId, BehaviorTable, ObjectLayout};
pub use header::{
    FieldObject, HeapObject, NativeHandle, ObjectBody, ObjectHeader, HEADER_SIZE, SLOT_SIZE,
};
pub use reference::{ObjRef, Region};
pub use refmap::ReferenceMap;
pub use trace::{Field, MarkReason, Trace};
