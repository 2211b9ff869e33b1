//! Restore: envelope to object graph
//!
//! Everything that can reject an envelope is checked before the first
//! allocation: header, names, record layouts, image symbols and proxies.
//! Heap objects are allocated without triggering a collection and stay
//! unrooted until the root is handed back, so a failure after allocation
//! leaves nothing reachable. Image-region restores are truncated away.

use super::codec::{self, Decoded, EnvelopeMode, RecordBody, RefWord, Site};
use super::Envelope;
use crate::allocator::SizeClass;
use crate::error::{EnvelopeError, MemoryError, Result};
use crate::gc::GcReason;
use crate::logging::GcEvent;
use crate::memory::ObjectMemory;
use crate::object::{
    BehaviorId, Field, FieldObject, HeapObject, ObjRef, ObjectBody, ObjectHeader, ObjectLayout,
    Region,
};
use crate::table::HashContents;
use rustc_hash::FxHashMap;

/// Re-resolves native-handle proxies on the receiving side
pub trait ProxyResolver {
    fn resolve(&self, name: &str) -> Option<ObjRef>;
}

impl<F> ProxyResolver for F
where
    F: Fn(&str) -> Option<ObjRef>,
{
    fn resolve(&self, name: &str) -> Option<ObjRef> {
        self(name)
    }
}

/// Resolver that knows no proxies; restore falls back to globals
pub(crate) struct GlobalsOnly;

impl ProxyResolver for GlobalsOnly {
    fn resolve(&self, _name: &str) -> Option<ObjRef> {
        None
    }
}

/// Result of a successful restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Restored {
    pub root: ObjRef,
    /// Objects allocated (proxies and symbols excluded)
    pub objects: usize,
    /// Header fingerprint of the envelope
    pub fingerprint: u64,
}

impl ObjectMemory {
    /// Restore an envelope into the heap; proxies resolve through globals.
    ///
    /// The returned root is not registered anywhere: root it before the
    /// next collection.
    pub fn restore(&mut self, envelope: &Envelope) -> Result<ObjRef> {
        self.restore_with(envelope, &GlobalsOnly)
    }

    /// Restore an envelope, asking `resolver` first for every proxy
    pub fn restore_with(
        &mut self,
        envelope: &Envelope,
        resolver: &dyn ProxyResolver,
    ) -> Result<ObjRef> {
        self.restore_as(envelope.as_bytes(), EnvelopeMode::Envelope, resolver)
            .map(|restored| restored.root)
    }

    pub(crate) fn restore_as(
        &mut self,
        bytes: &[u8],
        mode: EnvelopeMode,
        resolver: &dyn ProxyResolver,
    ) -> Result<Restored> {
        let image_mark = self.image.len();
        let result = self.try_restore(bytes, mode, resolver);

        match &result {
            Ok(restored) => self.logger.log(GcEvent::Restored {
                objects: restored.objects,
                image: mode == EnvelopeMode::Image,
            }),
            Err(err) => {
                if self.image.len() > image_mark {
                    self.image.truncate(image_mark);
                    self.barrier.remembered_mut().retain(|addr| {
                        !(addr.owner.is_image() && addr.owner.index() as usize >= image_mark)
                    });
                }
                self.logger.log(GcEvent::RestoreFailed {
                    reason: err.to_string(),
                });
            }
        }
        result
    }

    fn try_restore(
        &mut self,
        bytes: &[u8],
        mode: EnvelopeMode,
        resolver: &dyn ProxyResolver,
    ) -> Result<Restored> {
        let decoded = codec::decode(
            bytes,
            self.config.max_envelope_objects,
            self.config.max_heap_bytes,
        )?;
        let header = &decoded.header;

        if header.mode != mode {
            return Err(EnvelopeError::WrongMode.into());
        }
        if header.interpreter_version != self.config.interpreter_version {
            return Err(EnvelopeError::VersionMismatch {
                expected: self.config.interpreter_version.clone(),
                found: header.interpreter_version.clone(),
            }
            .into());
        }
        if mode == EnvelopeMode::Image && header.fingerprint != decoded.payload_hash {
            return Err(EnvelopeError::ImageMismatch {
                expected: decoded.payload_hash,
                found: header.fingerprint,
            }
            .into());
        }

        let behaviors = self.resolve_behaviors(&decoded)?;

        let region = match mode {
            EnvelopeMode::Envelope => Region::Heap,
            EnvelopeMode::Image => Region::Image,
        };
        if region == Region::Heap {
            self.make_room(&decoded)?;
        }

        // Collections may run above; nothing resolved so far can move
        let symbols = self.resolve_symbols(&decoded)?;
        let proxies = self.resolve_proxies(&decoded, resolver)?;

        // Allocation
        let mut objects = Vec::with_capacity(decoded.records.len());
        let mut allocated = 0;
        for (index, record) in decoded.records.iter().enumerate() {
            let behavior = behaviors[record.behavior as usize];
            let header = ObjectHeader::new(behavior, record.size as usize);
            let body = match &record.body {
                RecordBody::Fields { map, bytes } => {
                    ObjectBody::Fields(FieldObject::with_bytes(*map, bytes.clone()))
                }
                RecordBody::Table {
                    policy,
                    buckets,
                    entries,
                } => ObjectBody::Table(HashContents::new(
                    *policy,
                    (*buckets).max(*entries) as usize,
                )),
                RecordBody::Proxy { .. } => {
                    objects.push(proxies[&index]);
                    continue;
                }
            };
            objects.push(self.place_raw(region, HeapObject::new(header, body))?);
            allocated += 1;
        }

        let resolve = |word: RefWord| -> Option<ObjRef> {
            match word {
                RefWord::Null => None,
                RefWord::Offset(offset) => decoded
                    .records
                    .binary_search_by_key(&offset, |record| record.offset)
                    .ok()
                    .map(|index| objects[index]),
                RefWord::Symbol(symbol) => symbols.get(&symbol).copied(),
            }
        };

        // Fix-up pass, in payload order
        let mut entries: FxHashMap<usize, Vec<(ObjRef, Option<ObjRef>)>> = FxHashMap::default();
        for site in &decoded.sites {
            let owner = objects[site.record];
            let target = resolve(site.word);
            match site.site {
                Site::Slot(slot) => {
                    if let ObjectBody::Fields(fields) = self.object_mut(owner)?.body_mut() {
                        fields.set_slot(slot, target);
                    }
                    if target.map_or(false, ObjRef::is_heap) {
                        self.barrier.after_store(owner, Field::Slot(slot));
                    }
                }
                Site::EntryIndex(_) => {
                    if let Some(index) = target {
                        entries.entry(site.record).or_default().push((index, None));
                    }
                }
                Site::EntryValue(_) => {
                    if let Some(last) = entries.get_mut(&site.record).and_then(|e| e.last_mut()) {
                        last.1 = target;
                    }
                }
            }
        }

        // Tables hash by the new identities
        for (record, mut pairs) in entries {
            let contents = objects[record];
            let policy = self.table_of(contents)?.policy();
            pairs.reverse();
            let hashed = pairs
                .into_iter()
                .map(|(index, value)| Ok((index, value, self.index_hash(policy, index)?)))
                .collect::<Result<Vec<_>>>()?;
            self.rebuild_table(contents, hashed)?;
        }

        let root = resolve(decoded.header.root)
            .ok_or_else(|| EnvelopeError::Malformed("unresolvable root".to_string()))?;

        log::debug!(
            "restored {} objects into {:?} (root {})",
            allocated,
            region,
            root
        );
        Ok(Restored {
            root,
            objects: allocated,
            fingerprint: decoded.header.fingerprint,
        })
    }

    fn resolve_behaviors(&self, decoded: &Decoded) -> Result<Vec<BehaviorId>> {
        let behaviors = decoded
            .behaviors
            .iter()
            .map(|name| {
                self.behaviors
                    .lookup(name)
                    .ok_or_else(|| EnvelopeError::UnknownBehavior(name.clone()))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for record in &decoded.records {
            let id = behaviors[record.behavior as usize];
            let behavior = self.behaviors.get(id)?;
            let fits = match (&record.body, behavior.layout()) {
                (RecordBody::Fields { map, .. }, ObjectLayout::Fields(expected)) => *map == expected,
                (RecordBody::Fields { map, .. }, ObjectLayout::Array) => !map.has_cached(),
                (RecordBody::Table { .. }, ObjectLayout::Table) => true,
                (RecordBody::Proxy { .. }, ObjectLayout::Handle) => true,
                _ => false,
            };
            if !fits {
                return Err(EnvelopeError::Malformed(format!(
                    "record at {} does not fit behavior {}",
                    record.offset,
                    behavior.name()
                ))
                .into());
            }
        }
        Ok(behaviors)
    }

    /// Collect first if the restored objects will not fit as things stand;
    /// fails before anything is built when they could never fit
    fn make_room(&mut self, decoded: &Decoded) -> Result<()> {
        let needed = decoded
            .records
            .iter()
            .filter(|record| !matches!(record.body, RecordBody::Proxy { .. }))
            // Decoding bounds each record by the heap size
            .map(|record| SizeClass::for_bytes(record.body.charged_bytes() as usize).capacity())
            .fold(0usize, usize::saturating_add);

        if needed > self.arena.max_bytes() {
            return Err(MemoryError::OutOfMemory {
                requested: needed,
                available: self.arena.available(),
            });
        }
        if needed > self.arena.available()
            && self.config.collect_on_exhaustion
            && !self.collector.is_collecting()
        {
            self.collect_for(GcReason::AllocationFailure { requested: needed })?;
        }
        Ok(())
    }

    fn resolve_symbols(&self, decoded: &Decoded) -> Result<FxHashMap<u32, ObjRef>> {
        let used = decoded
            .sites
            .iter()
            .map(|site| site.word)
            .chain(std::iter::once(decoded.header.root))
            .filter_map(|word| match word {
                RefWord::Symbol(symbol) => Some(symbol),
                _ => None,
            });

        let mut symbols = FxHashMap::default();
        for symbol in used {
            if symbols.contains_key(&symbol) {
                continue;
            }
            if decoded.header.mode == EnvelopeMode::Image {
                return Err(EnvelopeError::Malformed(
                    "image payload refers to image symbols".to_string(),
                )
                .into());
            }
            if decoded.header.fingerprint != self.image.fingerprint() {
                return Err(EnvelopeError::ImageMismatch {
                    expected: self.image.fingerprint(),
                    found: decoded.header.fingerprint,
                }
                .into());
            }
            let name = &decoded.symbols[symbol as usize];
            let reference = self
                .image
                .resolve(name)
                .ok_or_else(|| EnvelopeError::UnresolvedSymbol(name.clone()))?;
            symbols.insert(symbol, reference);
        }
        Ok(symbols)
    }

    fn resolve_proxies(
        &self,
        decoded: &Decoded,
        resolver: &dyn ProxyResolver,
    ) -> Result<FxHashMap<usize, ObjRef>> {
        let mut proxies = FxHashMap::default();
        for (index, record) in decoded.records.iter().enumerate() {
            let RecordBody::Proxy { symbol } = record.body else {
                continue;
            };
            let name = &decoded.symbols[symbol as usize];
            let reference = resolver
                .resolve(name)
                .or_else(|| self.global(name))
                .filter(|&reference| self.is_live(reference))
                .ok_or_else(|| EnvelopeError::UnresolvedProxy(name.clone()))?;
            proxies.insert(index, reference);
        }
        Ok(proxies)
    }

    fn rebuild_table(
        &mut self,
        contents: ObjRef,
        entries: Vec<(ObjRef, Option<ObjRef>, u64)>,
    ) -> Result<()> {
        let object = self.object_mut(contents)?;
        let kind = object.body().kind_name();
        let ObjectBody::Table(table) = object.body_mut() else {
            return Err(MemoryError::wrong_kind("table", kind));
        };

        let mut touched = Vec::new();
        for (index, value, hash) in entries {
            table.add(index, value, hash, &mut |field, target| {
                if target.map_or(false, ObjRef::is_heap) {
                    touched.push(field);
                }
            })?;
        }
        for field in touched {
            self.barrier.after_store(contents, field);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::memory::CollectionKind;

    fn memory() -> ObjectMemory {
        ObjectMemory::new(MemoryConfig::default()).unwrap()
    }

    #[test]
    fn test_round_trip_preserves_sharing() {
        let mut memory = memory();
        let shared = memory.allocate_string("shared").unwrap();
        let array = memory.allocate_array(2).unwrap();
        memory.set_reference(array, 0, Some(shared)).unwrap();
        memory.set_reference(array, 1, Some(shared)).unwrap();

        let envelope = memory.flatten(array).unwrap();
        let copy = memory.restore(&envelope).unwrap();

        assert_ne!(copy, array);
        let fields = memory.fields(copy).unwrap().to_vec();
        assert_eq!(fields[0], fields[1]);
        let restored_shared = fields[0].unwrap();
        assert_ne!(restored_shared, shared);
        assert_eq!(memory.string_value(restored_shared).unwrap(), "shared");
    }

    #[test]
    fn test_directory_rehashed() {
        let mut memory = memory();
        let dir = memory.allocate_collection(CollectionKind::Directory).unwrap();
        let v = memory.allocate_string("value").unwrap();
        memory.directory_put_str(dir, "key", v).unwrap();

        let envelope = memory.flatten(dir).unwrap();
        let copy = memory.restore(&envelope).unwrap();
        let found = memory.directory_get_str(copy, "key").unwrap().unwrap();
        assert_eq!(memory.string_value(found).unwrap(), "value");
    }

    #[test]
    fn test_identity_table_rehashed() {
        let mut memory = memory();
        let table = memory.allocate_collection(CollectionKind::Table).unwrap();
        let k = memory.allocate_string("k").unwrap();
        let v = memory.allocate_string("v").unwrap();
        memory.collection_put(table, k, v).unwrap();
        let holder = memory.allocate_array(2).unwrap();
        memory.set_reference(holder, 0, Some(table)).unwrap();
        memory.set_reference(holder, 1, Some(k)).unwrap();

        let envelope = memory.flatten(holder).unwrap();
        let copy = memory.restore(&envelope).unwrap();
        let new_table = memory.field(copy, 0).unwrap().unwrap();
        let new_key = memory.field(copy, 1).unwrap().unwrap();
        let found = memory.collection_get(new_table, new_key).unwrap().unwrap();
        assert_eq!(memory.string_value(found).unwrap(), "v");
        assert_eq!(memory.collection_get(new_table, k).unwrap(), None);
    }

    #[test]
    fn test_proxy_resolution() {
        let mut memory = memory();
        let handle = memory.allocate_handle("console", 7).unwrap();
        let array = memory.allocate_array(1).unwrap();
        memory.set_reference(array, 0, Some(handle)).unwrap();
        let envelope = memory.flatten(array).unwrap();

        let err = memory.restore(&envelope).unwrap_err();
        assert!(matches!(
            err,
            MemoryError::Envelope(EnvelopeError::UnresolvedProxy(ref name)) if name == "console"
        ));

        let local = memory.allocate_handle("console", 8).unwrap();
        let copy = memory
            .restore_with(&envelope, &|name: &str| (name == "console").then_some(local))
            .unwrap();
        assert_eq!(memory.field(copy, 0).unwrap(), Some(local));
    }

    #[test]
    fn test_interpreter_version_mismatch() {
        let mut sender = memory();
        let s = sender.allocate_string("x").unwrap();
        let envelope = sender.flatten(s).unwrap();

        let mut receiver = ObjectMemory::new(MemoryConfig {
            interpreter_version: "other".to_string(),
            ..Default::default()
        })
        .unwrap();
        let live_before = receiver.arena().live_objects();
        assert!(matches!(
            receiver.restore(&envelope),
            Err(MemoryError::Envelope(EnvelopeError::VersionMismatch { .. }))
        ));
        assert_eq!(receiver.arena().live_objects(), live_before);
        assert!(matches!(
            receiver.logger().last(),
            Some(GcEvent::RestoreFailed { .. })
        ));
    }

    #[test]
    fn test_unknown_behavior() {
        let mut sender = memory();
        let point = sender
            .register_behavior(
                "Point",
                ObjectLayout::Fields(crate::object::ReferenceMap::strong(2)),
            )
            .unwrap();
        let p = sender.allocate(point, 0).unwrap();
        let envelope = sender.flatten(p).unwrap();

        let mut receiver = memory();
        assert!(matches!(
            receiver.restore(&envelope),
            Err(MemoryError::Envelope(EnvelopeError::UnknownBehavior(ref name))) if name == "Point"
        ));
    }

    #[test]
    fn test_image_mode_rejected_by_restore() {
        let mut memory = memory();
        let s = memory.allocate_string("x").unwrap();
        let envelope = memory.flatten_as(s, EnvelopeMode::Image).unwrap();
        assert!(matches!(
            memory.restore(&envelope),
            Err(MemoryError::Envelope(EnvelopeError::WrongMode))
        ));
    }
}
