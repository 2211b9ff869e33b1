//! Memory Module - the object memory handle
//!
//! [`ObjectMemory`] owns both regions, the root set, the write barrier and
//! the collector. Every allocation and every reference store goes through
//! it; there is no ambient global heap.
//!
//! ```text
//! ObjectMemory
//! ├── behaviors   BehaviorTable
//! ├── arena       collectible heap (Arena)
//! ├── image       image region (ImageSpace)
//! ├── roots       globals + activation stack
//! ├── barrier     write barrier + remembered set
//! ├── collector   state machine + mark generation
//! └── stats/log   GcStats, GcLogger
//! ```
//!
//! The submodules add the collector driver ([`collector`]), the
//! collection-level table operations ([`collections`]) and the coarse lock
//! ([`shared`]).

pub mod collections;
pub mod collector;
pub mod shared;

pub use collections::CollectionKind;
pub use shared::SharedMemory;

use crate::allocator::Arena;
use crate::barrier::WriteBarrier;
use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::gc::{Collector, GcReason, GcState};
use crate::image::ImageSpace;
use crate::logging::{GcEvent, GcLogger};
use crate::marker::{self, ObjectSource, RootSet};
use crate::object::{
    BehaviorId, BehaviorTable, Field, FieldObject, HeapObject, MarkReason, NativeHandle,
    ObjRef, ObjectBody, ObjectHeader, ObjectLayout, ReferenceMap, Region, HEADER_SIZE,
    SLOT_SIZE,
};
use crate::stats::GcStats;
use crate::table::{HashContents, IndexPolicy};
use indexmap::{IndexMap, IndexSet};

/// The object memory: both regions plus everything that manages them
#[derive(Debug)]
pub struct ObjectMemory {
    pub(crate) config: MemoryConfig,
    pub(crate) behaviors: BehaviorTable,
    pub(crate) arena: Arena,
    pub(crate) image: ImageSpace,
    pub(crate) roots: RootSet,
    pub(crate) barrier: WriteBarrier,
    pub(crate) collector: Collector,
    pub(crate) stats: GcStats,
    pub(crate) logger: GcLogger,
}

impl ObjectMemory {
    /// Create an empty memory
    ///
    /// # Examples
    ///
    /// ```rust
    /// use objmem::{MemoryConfig, ObjectMemory};
    ///
    /// let mut memory = ObjectMemory::new(MemoryConfig::default())?;
    /// let greeting = memory.allocate_string("hello")?;
    /// memory.set_global("greeting", greeting)?;
    /// memory.collect()?;
    /// assert_eq!(memory.string_value(greeting)?, "hello");
    /// # Ok::<(), objmem::MemoryError>(())
    /// ```
    pub fn new(config: MemoryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            arena: Arena::new(&config),
            behaviors: BehaviorTable::new(),
            image: ImageSpace::new(),
            roots: RootSet::new(),
            barrier: WriteBarrier::new(),
            collector: Collector::new(),
            stats: GcStats::new(),
            logger: GcLogger::new(config.verbose, config.event_history),
            config,
        })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn behaviors(&self) -> &BehaviorTable {
        &self.behaviors
    }

    pub fn register_behavior(&mut self, name: &str, layout: ObjectLayout) -> Result<BehaviorId> {
        self.behaviors.register(name, layout)
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn image(&self) -> &ImageSpace {
        &self.image
    }

    pub fn roots(&self) -> &RootSet {
        &self.roots
    }

    pub fn barrier(&self) -> &WriteBarrier {
        &self.barrier
    }

    pub fn stats(&self) -> &GcStats {
        &self.stats
    }

    pub fn logger(&self) -> &GcLogger {
        &self.logger
    }

    pub fn state(&self) -> GcState {
        self.collector.state()
    }

    // ------------------------------------------------------------------
    // Object access
    // ------------------------------------------------------------------

    /// Resolve a reference in either region
    pub fn object(&self, reference: ObjRef) -> Result<&HeapObject> {
        match reference.region() {
            Region::Heap => self.arena.get(reference),
            Region::Image => self.image.get(reference),
        }
    }

    pub(crate) fn object_mut(&mut self, reference: ObjRef) -> Result<&mut HeapObject> {
        match reference.region() {
            Region::Heap => self.arena.get_mut(reference),
            Region::Image => self.image.get_mut(reference),
        }
    }

    /// Does `reference` name a live object?
    pub fn is_live(&self, reference: ObjRef) -> bool {
        self.object(reference).is_ok()
    }

    pub fn behavior_of(&self, reference: ObjRef) -> Result<BehaviorId> {
        Ok(self.object(reference)?.behavior())
    }

    fn fields_of(&self, reference: ObjRef) -> Result<&FieldObject> {
        let object = self.object(reference)?;
        object
            .as_fields()
            .ok_or_else(|| MemoryError::wrong_kind("fields", object.body().kind_name()))
    }

    /// Value of reference slot `slot`
    pub fn field(&self, owner: ObjRef, slot: u32) -> Result<Option<ObjRef>> {
        let fields = self.fields_of(owner)?;
        fields.slot(slot).ok_or(MemoryError::FieldOutOfBounds {
            index: slot as usize,
            length: fields.slots().len(),
        })
    }

    /// All reference slots of a field object
    pub fn fields(&self, owner: ObjRef) -> Result<&[Option<ObjRef>]> {
        Ok(self.fields_of(owner)?.slots())
    }

    /// Raw bytes of a field object
    pub fn bytes(&self, reference: ObjRef) -> Result<&[u8]> {
        Ok(self.fields_of(reference)?.bytes())
    }

    /// Overwrite raw bytes starting at `offset`
    pub fn set_bytes(&mut self, reference: ObjRef, offset: usize, data: &[u8]) -> Result<()> {
        let object = self.object_mut(reference)?;
        let kind = object.body().kind_name();
        let ObjectBody::Fields(fields) = object.body_mut() else {
            return Err(MemoryError::wrong_kind("fields", kind));
        };
        let length = fields.bytes().len();
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= length)
            .ok_or(MemoryError::FieldOutOfBounds {
                index: offset.saturating_add(data.len()),
                length,
            })?;
        fields.bytes_mut()[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Bytes of an object decoded as UTF-8 (lossy)
    pub fn string_value(&self, reference: ObjRef) -> Result<String> {
        Ok(String::from_utf8_lossy(self.bytes(reference)?).into_owned())
    }

    pub fn handle(&self, reference: ObjRef) -> Result<&NativeHandle> {
        let object = self.object(reference)?;
        object
            .as_handle()
            .ok_or_else(|| MemoryError::wrong_kind("handle", object.body().kind_name()))
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Zero-initialized object of `behavior` with `size` payload bytes.
    ///
    /// For array behaviors `size` is rounded up to whole reference slots;
    /// table behaviors get empty identity contents with the default bucket
    /// count. Native handles are created with [`allocate_handle`].
    ///
    /// [`allocate_handle`]: Self::allocate_handle
    pub fn allocate(&mut self, behavior: BehaviorId, size: usize) -> Result<ObjRef> {
        self.allocate_in(Region::Heap, behavior, size)
    }

    /// Like [`allocate`](Self::allocate), but in the image region
    pub fn allocate_in_image(&mut self, behavior: BehaviorId, size: usize) -> Result<ObjRef> {
        self.allocate_in(Region::Image, behavior, size)
    }

    fn allocate_in(&mut self, region: Region, behavior: BehaviorId, size: usize) -> Result<ObjRef> {
        // Collections are useless without their contents
        if let Some(kind) = CollectionKind::from_behavior(behavior) {
            return self.allocate_collection_in(region, kind);
        }
        let layout = self.behaviors.get(behavior)?.layout();
        self.check_request(request_bytes(layout, size))?;
        let object = self.build(behavior, size)?;
        self.place(region, object)
    }

    /// Refuse a request whose charged size overflows or exceeds the whole
    /// heap before its body is materialized
    fn check_request(&mut self, charged: Option<usize>) -> Result<()> {
        match charged {
            Some(bytes) if bytes <= self.arena.max_bytes() => Ok(()),
            charged => {
                let requested = charged.unwrap_or(usize::MAX);
                self.logger.log(GcEvent::AllocationFailure {
                    size: requested,
                    heap_used: self.arena.used_bytes(),
                });
                Err(MemoryError::OutOfMemory {
                    requested,
                    available: self.arena.available(),
                })
            }
        }
    }

    fn build(&self, behavior: BehaviorId, size: usize) -> Result<HeapObject> {
        let body = match self.behaviors.get(behavior)?.layout() {
            ObjectLayout::Fields(map) => ObjectBody::Fields(FieldObject::new(map, size)),
            ObjectLayout::Array => {
                let slots = u32::try_from(size.div_ceil(SLOT_SIZE)).map_err(|_| {
                    MemoryError::InvalidArgument(format!("array of {} bytes", size))
                })?;
                ObjectBody::Fields(FieldObject::new(ReferenceMap::strong(slots), 0))
            }
            ObjectLayout::Table => ObjectBody::Table(HashContents::new(
                IndexPolicy::Identity,
                self.config.default_bucket_count,
            )),
            ObjectLayout::Handle => {
                return Err(MemoryError::InvalidArgument(
                    "native handles are created with allocate_handle".to_string(),
                ))
            }
        };
        Ok(HeapObject::new(ObjectHeader::new(behavior, size), body))
    }

    /// Store a finished object in `region`.
    ///
    /// Heap allocation that does not fit triggers one collection and a
    /// retry when `collect_on_exhaustion` is set.
    pub(crate) fn place(&mut self, region: Region, object: HeapObject) -> Result<ObjRef> {
        if region == Region::Image {
            return self.image.push(object);
        }

        let requested = object.charged_size();
        if self.config.collect_on_exhaustion
            && !self.collector.is_collecting()
            && !self.arena.fits(requested)
        {
            self.collect_for(GcReason::AllocationFailure { requested })?;
        }

        match self.arena.allocate(object) {
            Ok(reference) => Ok(reference),
            Err(err @ MemoryError::OutOfMemory { .. }) => {
                self.logger.log(GcEvent::AllocationFailure {
                    size: requested,
                    heap_used: self.arena.used_bytes(),
                });
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Store without collecting first (restore path)
    pub(crate) fn place_raw(&mut self, region: Region, object: HeapObject) -> Result<ObjRef> {
        match region {
            Region::Heap => self.arena.allocate(object),
            Region::Image => self.image.push(object),
        }
    }

    pub fn allocate_string(&mut self, value: &str) -> Result<ObjRef> {
        self.allocate_string_in(Region::Heap, value)
    }

    pub fn allocate_string_in(&mut self, region: Region, value: &str) -> Result<ObjRef> {
        self.check_request(HEADER_SIZE.checked_add(value.len()))?;
        let bytes = value.as_bytes().to_vec();
        let object = HeapObject::new(
            ObjectHeader::new(BehaviorId::STRING, bytes.len()),
            ObjectBody::Fields(FieldObject::with_bytes(ReferenceMap::empty(), bytes)),
        );
        self.place(region, object)
    }

    /// Array of `len` null reference slots
    pub fn allocate_array(&mut self, len: u32) -> Result<ObjRef> {
        self.check_request(
            (len as usize)
                .checked_mul(SLOT_SIZE)
                .and_then(|bytes| bytes.checked_add(HEADER_SIZE)),
        )?;
        let object = HeapObject::new(
            ObjectHeader::new(BehaviorId::ARRAY, len as usize * SLOT_SIZE),
            ObjectBody::Fields(FieldObject::new(ReferenceMap::strong(len), 0)),
        );
        self.place(Region::Heap, object)
    }

    /// Raw hash table contents
    pub fn allocate_contents(
        &mut self,
        region: Region,
        policy: IndexPolicy,
        bucket_count: usize,
    ) -> Result<ObjRef> {
        if bucket_count == 0 || bucket_count > crate::config::MAX_BUCKETS {
            return Err(MemoryError::InvalidArgument(format!(
                "bucket count {} out of range",
                bucket_count
            )));
        }
        let contents = HashContents::new(policy, bucket_count);
        let object = HeapObject::new(
            ObjectHeader::new(BehaviorId::HASH_CONTENTS, contents.charged_size()),
            ObjectBody::Table(contents),
        );
        self.place(region, object)
    }

    /// Native handle; flattened as a proxy carrying `name`
    pub fn allocate_handle(&mut self, name: &str, raw: u64) -> Result<ObjRef> {
        let handle = NativeHandle::new(name, raw);
        let object = HeapObject::new(
            ObjectHeader::new(BehaviorId::HANDLE, name.len()),
            ObjectBody::Handle(handle),
        );
        self.place(Region::Heap, object)
    }

    // ------------------------------------------------------------------
    // Write barrier
    // ------------------------------------------------------------------

    /// Store `value` into reference slot `slot` of `owner`.
    ///
    /// This is the only way to write a reference slot. Stores into image
    /// objects are recorded in the remembered set.
    pub fn set_reference(&mut self, owner: ObjRef, slot: u32, value: Option<ObjRef>) -> Result<()> {
        if let Some(value) = value {
            self.object(value)?;
        }

        let object = self.object_mut(owner)?;
        let kind = object.body().kind_name();
        let ObjectBody::Fields(fields) = object.body_mut() else {
            return Err(MemoryError::wrong_kind("fields", kind));
        };
        if !fields.set_slot(slot, value) {
            return Err(MemoryError::FieldOutOfBounds {
                index: slot as usize,
                length: fields.slots().len(),
            });
        }

        self.barrier.after_store(owner, Field::Slot(slot));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Roots
    // ------------------------------------------------------------------

    /// Register or replace a named global root
    pub fn set_global(&mut self, name: &str, value: ObjRef) -> Result<Option<ObjRef>> {
        self.object(value)?;
        Ok(self.roots.set_global(name, value))
    }

    pub fn remove_global(&mut self, name: &str) -> Result<ObjRef> {
        self.roots
            .remove_global(name)
            .ok_or_else(|| MemoryError::RootNotFound(name.to_string()))
    }

    pub fn global(&self, name: &str) -> Option<ObjRef> {
        self.roots.global(name)
    }

    /// Open an activation frame
    pub fn push_frame(&mut self) {
        self.roots.push_frame();
    }

    /// Root `reference` in the innermost frame
    pub fn push_root(&mut self, reference: ObjRef) -> Result<()> {
        self.object(reference)?;
        self.roots.push(reference);
        Ok(())
    }

    /// Close the innermost frame
    pub fn pop_frame(&mut self) -> Result<usize> {
        self.roots.pop_frame().ok_or(MemoryError::InvalidState {
            expected: "open frame".to_string(),
            actual: "empty frame stack".to_string(),
        })
    }

    /// Run `f` with `refs` rooted in a fresh frame
    pub(crate) fn with_rooted<R>(
        &mut self,
        refs: &[ObjRef],
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        self.roots.push_frame();
        for &reference in refs {
            self.roots.push(reference);
        }
        let result = f(self);
        self.roots.pop_frame();
        result
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Every object reachable from `root` under general marking
    pub fn reachable_from(&self, root: ObjRef, reason: MarkReason) -> Result<IndexSet<ObjRef>> {
        marker::reachable_from(self, root, reason)
    }

    /// Detailed diagnostic information
    pub fn diagnostics(&self) -> IndexMap<String, String> {
        let mut diagnostics = IndexMap::new();

        diagnostics.insert("state".to_string(), self.collector.state().to_string());
        diagnostics.insert("cycle_count".to_string(), self.collector.cycles().to_string());
        diagnostics.insert(
            "mark_generation".to_string(),
            self.collector.generation().to_string(),
        );

        let used = self.arena.used_bytes();
        let max = self.arena.max_bytes();
        diagnostics.insert("heap_used".to_string(), used.to_string());
        diagnostics.insert("heap_max".to_string(), max.to_string());
        diagnostics.insert(
            "heap_utilization".to_string(),
            format!("{:.2}", used as f64 / max as f64),
        );
        diagnostics.insert(
            "heap_objects".to_string(),
            self.arena.live_objects().to_string(),
        );
        diagnostics.insert("free_slots".to_string(), self.arena.free_slots().to_string());
        diagnostics.insert(
            "free_by_class".to_string(),
            self.arena
                .free_histogram()
                .iter()
                .map(|(capacity, count)| format!("{}:{}", capacity, count))
                .collect::<Vec<_>>()
                .join(" "),
        );
        diagnostics.insert(
            "segments".to_string(),
            self.arena.segment_count().to_string(),
        );
        diagnostics.insert(
            "heap_committed".to_string(),
            self.arena.committed_bytes().to_string(),
        );

        diagnostics.insert("image_objects".to_string(), self.image.len().to_string());
        diagnostics.insert(
            "image_loaded".to_string(),
            self.image.is_loaded().to_string(),
        );
        diagnostics.insert(
            "remembered".to_string(),
            self.barrier.remembered().len().to_string(),
        );
        diagnostics.insert(
            "globals".to_string(),
            self.roots.global_count().to_string(),
        );
        diagnostics.insert(
            "frame_depth".to_string(),
            self.roots.frame_depth().to_string(),
        );

        diagnostics
    }
}

impl ObjectSource for ObjectMemory {
    fn object(&self, reference: ObjRef) -> Result<&HeapObject> {
        ObjectMemory::object(self, reference)
    }
}

/// Charged size of a `size`-byte request under `layout`, `None` on overflow.
/// Tables are sized by the config and handles are refused later.
fn request_bytes(layout: ObjectLayout, size: usize) -> Option<usize> {
    match layout {
        ObjectLayout::Fields(map) => HEADER_SIZE
            .checked_add(size)?
            .checked_add(SLOT_SIZE.checked_mul(map.slot_count() as usize)?),
        ObjectLayout::Array => size
            .checked_next_multiple_of(SLOT_SIZE)?
            .checked_add(HEADER_SIZE),
        ObjectLayout::Table | ObjectLayout::Handle => Some(HEADER_SIZE),
    }
}
