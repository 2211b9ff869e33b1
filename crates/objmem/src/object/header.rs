//! Object Header and Bodies - the in-memory shape of every object
//!
//! ```text
//! HeapObject
//! ┌─────────────────────────────────────────┐
//! │ ObjectHeader                            │
//! │  - behavior   (BehaviorId)              │
//! │  - size       (requested payload bytes) │
//! │  - mark       (mark generation)         │
//! ├─────────────────────────────────────────┤
//! │ ObjectBody                              │
//! │  Fields: reference slots + raw bytes    │
//! │  Table:  hash table contents            │
//! │  Handle: native handle (non-portable)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Reference slots can only be read from outside the crate. Stores go
//! through `ObjectMemory`, which applies the write barrier.

use crate::object::{BehaviorId, Field, MarkReason, ObjRef, ReferenceMap, Trace};
use crate::table::HashContents;

/// Bytes charged for every object header
pub const HEADER_SIZE: usize = 16;

/// Bytes charged for every reference slot
pub const SLOT_SIZE: usize = 8;

/// Per-object metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    behavior: BehaviorId,
    size: u32,
    mark: u32,
}

impl ObjectHeader {
    pub fn new(behavior: BehaviorId, size: usize) -> Self {
        Self {
            behavior,
            size: size.min(u32::MAX as usize) as u32,
            mark: 0,
        }
    }

    #[inline]
    pub fn behavior(&self) -> BehaviorId {
        self.behavior
    }

    /// Requested payload size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        self.size as usize
    }

    /// Generation in which the object was last marked (0 = never)
    #[inline]
    pub fn mark_generation(&self) -> u32 {
        self.mark
    }

    /// Was the object reached in `generation`?
    #[inline]
    pub fn is_marked(&self, generation: u32) -> bool {
        generation != 0 && self.mark == generation
    }

    #[inline]
    pub(crate) fn set_mark(&mut self, generation: u32) {
        self.mark = generation;
    }
}

/// Reference slots plus raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldObject {
    map: ReferenceMap,
    slots: Vec<Option<ObjRef>>,
    bytes: Vec<u8>,
}

impl FieldObject {
    /// Zero-initialized object: all slots null, all bytes zero
    pub(crate) fn new(map: ReferenceMap, size: usize) -> Self {
        Self {
            map,
            slots: vec![None; map.slot_count() as usize],
            bytes: vec![0; size],
        }
    }

    pub(crate) fn with_bytes(map: ReferenceMap, bytes: Vec<u8>) -> Self {
        Self {
            map,
            slots: vec![None; map.slot_count() as usize],
            bytes,
        }
    }

    pub fn map(&self) -> ReferenceMap {
        self.map
    }

    pub fn slots(&self) -> &[Option<ObjRef>] {
        &self.slots
    }

    /// Slot value, or `None` if the slot does not exist
    pub fn slot(&self, slot: u32) -> Option<Option<ObjRef>> {
        self.slots.get(slot as usize).copied()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Store into a slot; `false` if the slot does not exist
    pub(crate) fn set_slot(&mut self, slot: u32, value: Option<ObjRef>) -> bool {
        match self.slots.get_mut(slot as usize) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }
}

impl Trace for FieldObject {
    fn mark(&self, visit: &mut dyn FnMut(Field, ObjRef)) {
        for slot in self.map.strong_slots() {
            if let Some(Some(target)) = self.slots.get(slot as usize) {
                visit(Field::Slot(slot), *target);
            }
        }
    }

    fn mark_general(&self, _reason: MarkReason, visit: &mut dyn FnMut(Field, ObjRef)) {
        for (slot, value) in self.slots.iter().enumerate() {
            if let Some(target) = value {
                visit(Field::Slot(slot as u32), *target);
            }
        }
    }
}

/// A live operating-system resource (file descriptor, window, socket).
///
/// Handles cannot travel: the envelope encoder replaces them with a proxy
/// carrying `name`, which the receiving side resolves to its own object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeHandle {
    name: String,
    raw: u64,
}

impl NativeHandle {
    pub fn new(name: impl Into<String>, raw: u64) -> Self {
        Self {
            name: name.into(),
            raw,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> u64 {
        self.raw
    }
}

impl Trace for NativeHandle {
    fn mark(&self, _visit: &mut dyn FnMut(Field, ObjRef)) {}

    fn mark_general(&self, _reason: MarkReason, _visit: &mut dyn FnMut(Field, ObjRef)) {}
}

/// Object payload
#[derive(Debug, Clone)]
pub enum ObjectBody {
    Fields(FieldObject),
    Table(HashContents),
    Handle(NativeHandle),
}

impl ObjectBody {
    pub fn kind_name(&self) -> &'static str {
        match self {
            ObjectBody::Fields(_) => "fields",
            ObjectBody::Table(_) => "table",
            ObjectBody::Handle(_) => "handle",
        }
    }

    /// Bytes charged for the payload (header excluded)
    pub fn charged_payload(&self) -> usize {
        match self {
            ObjectBody::Fields(fields) => fields.bytes.len() + fields.slots.len() * SLOT_SIZE,
            ObjectBody::Table(table) => table.charged_size(),
            ObjectBody::Handle(handle) => handle.name.len() + SLOT_SIZE,
        }
    }

    /// Current value of a reference field, or `None` if the field does not
    /// exist in this body
    pub fn read_field(&self, field: Field) -> Option<Option<ObjRef>> {
        match (self, field) {
            (ObjectBody::Fields(fields), Field::Slot(slot)) => fields.slot(slot),
            (ObjectBody::Table(table), Field::Index(entry)) => table.entry_index(entry),
            (ObjectBody::Table(table), Field::Value(entry)) => table.entry_value(entry),
            _ => None,
        }
    }
}

impl Trace for ObjectBody {
    fn mark(&self, visit: &mut dyn FnMut(Field, ObjRef)) {
        match self {
            ObjectBody::Fields(fields) => fields.mark(visit),
            ObjectBody::Table(table) => table.mark(visit),
            ObjectBody::Handle(handle) => handle.mark(visit),
        }
    }

    fn mark_general(&self, reason: MarkReason, visit: &mut dyn FnMut(Field, ObjRef)) {
        match self {
            ObjectBody::Fields(fields) => fields.mark_general(reason, visit),
            ObjectBody::Table(table) => table.mark_general(reason, visit),
            ObjectBody::Handle(handle) => handle.mark_general(reason, visit),
        }
    }
}

/// A complete object: header plus body
#[derive(Debug, Clone)]
pub struct HeapObject {
    header: ObjectHeader,
    body: ObjectBody,
}

impl HeapObject {
    pub fn new(header: ObjectHeader, body: ObjectBody) -> Self {
        Self { header, body }
    }

    #[inline]
    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    #[inline]
    pub(crate) fn header_mut(&mut self) -> &mut ObjectHeader {
        &mut self.header
    }

    #[inline]
    pub fn behavior(&self) -> BehaviorId {
        self.header.behavior
    }

    #[inline]
    pub fn body(&self) -> &ObjectBody {
        &self.body
    }

    #[inline]
    pub(crate) fn body_mut(&mut self) -> &mut ObjectBody {
        &mut self.body
    }

    pub fn as_fields(&self) -> Option<&FieldObject> {
        match &self.body {
            ObjectBody::Fields(fields) => Some(fields),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&HashContents> {
        match &self.body {
            ObjectBody::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&NativeHandle> {
        match &self.body {
            ObjectBody::Handle(handle) => Some(handle),
            _ => None,
        }
    }

    /// Total bytes charged to the allocator for this object
    pub fn charged_size(&self) -> usize {
        HEADER_SIZE + self.body.charged_payload()
    }

    pub fn read_field(&self, field: Field) -> Option<Option<ObjRef>> {
        self.body.read_field(field)
    }
}

impl Trace for HeapObject {
    fn mark(&self, visit: &mut dyn FnMut(Field, ObjRef)) {
        self.body.mark(visit)
    }

    fn mark_general(&self, reason: MarkReason, visit: &mut dyn FnMut(Field, ObjRef)) {
        self.body.mark_general(reason, visit)
    }
}
