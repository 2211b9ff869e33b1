//! Table operations with barrier-routed stores
//!
//! Raw [`HashContents`] objects are driven through `table_*`; the
//! collection behaviors (`Table`, `Directory`, `Relation`) keep their
//! contents in reference slot 0 and are driven through `collection_*`,
//! which also grows the contents when they fill up.
//!
//! Every entry store the table performs is reported back and passed to the
//! write barrier, so contents living in the image region keep their heap
//! targets alive.

use super::ObjectMemory;
use crate::error::{MemoryError, Result};
use crate::object::{
    BehaviorId, Field, FieldObject, HeapObject, ObjRef, ObjectBody, ObjectHeader, ReferenceMap,
    Region,
};
use crate::table::{HashContents, IndexPolicy};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// The three dictionary-like collection behaviors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// Identity keys, one value per key
    Table,
    /// String keys, one value per key
    Directory,
    /// String keys, duplicates kept newest first
    Relation,
}

impl CollectionKind {
    pub fn behavior(self) -> BehaviorId {
        match self {
            CollectionKind::Table => BehaviorId::TABLE,
            CollectionKind::Directory => BehaviorId::DIRECTORY,
            CollectionKind::Relation => BehaviorId::RELATION,
        }
    }

    pub fn policy(self) -> IndexPolicy {
        match self {
            CollectionKind::Table => IndexPolicy::Identity,
            CollectionKind::Directory | CollectionKind::Relation => IndexPolicy::Value,
        }
    }

    pub fn allows_duplicates(self) -> bool {
        self == CollectionKind::Relation
    }

    pub fn from_behavior(behavior: BehaviorId) -> Option<Self> {
        match behavior {
            BehaviorId::TABLE => Some(CollectionKind::Table),
            BehaviorId::DIRECTORY => Some(CollectionKind::Directory),
            BehaviorId::RELATION => Some(CollectionKind::Relation),
            _ => None,
        }
    }
}

/// A lookup key: a live object, or string text not yet allocated
#[derive(Debug, Clone, Copy)]
enum Key<'a> {
    Object(ObjRef),
    Text(&'a str),
}

/// Hash of a value-compared index
pub(crate) fn value_hash(behavior: BehaviorId, bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    behavior.as_u16().hash(&mut hasher);
    bytes.hash(&mut hasher);
    hasher.finish()
}

impl ObjectMemory {
    // ------------------------------------------------------------------
    // Hashing
    // ------------------------------------------------------------------

    /// Hash of `index` under `policy`.
    ///
    /// Value hashing covers field objects only; other kinds fall back to
    /// their identity hash.
    pub fn index_hash(&self, policy: IndexPolicy, index: ObjRef) -> Result<u64> {
        self.key_hash(policy, Key::Object(index))
    }

    fn key_hash(&self, policy: IndexPolicy, key: Key<'_>) -> Result<u64> {
        match (policy, key) {
            (IndexPolicy::Identity, Key::Object(index)) => Ok(index.identity_hash()),
            (IndexPolicy::Value, Key::Object(index)) => {
                let object = self.object(index)?;
                Ok(match object.as_fields() {
                    Some(fields) => value_hash(object.behavior(), fields.bytes()),
                    None => index.identity_hash(),
                })
            }
            (IndexPolicy::Value, Key::Text(text)) => {
                Ok(value_hash(BehaviorId::STRING, text.as_bytes()))
            }
            (IndexPolicy::Identity, Key::Text(_)) => Err(MemoryError::InvalidArgument(
                "string keys need a value-keyed table".to_string(),
            )),
        }
    }

    fn key_matches(&self, policy: IndexPolicy, key: Key<'_>, candidate: ObjRef) -> bool {
        match key {
            Key::Object(index) if index == candidate => true,
            _ if policy == IndexPolicy::Identity => false,
            Key::Object(index) => match (self.object(index), self.object(candidate)) {
                (Ok(a), Ok(b)) => match (a.as_fields(), b.as_fields()) {
                    (Some(x), Some(y)) => a.behavior() == b.behavior() && x.bytes() == y.bytes(),
                    _ => false,
                },
                _ => false,
            },
            Key::Text(text) => self.object(candidate).map_or(false, |object| {
                object.behavior() == BehaviorId::STRING
                    && object
                        .as_fields()
                        .map_or(false, |fields| fields.bytes() == text.as_bytes())
            }),
        }
    }

    // ------------------------------------------------------------------
    // Raw contents
    // ------------------------------------------------------------------

    /// Borrow the hash table behind a contents object
    pub fn table_of(&self, contents: ObjRef) -> Result<&HashContents> {
        let object = self.object(contents)?;
        object
            .as_table()
            .ok_or_else(|| MemoryError::wrong_kind("table", object.body().kind_name()))
    }

    /// Run `op` on the contents while still able to read the rest of
    /// memory, then pass every reported store through the barrier.
    fn with_contents<R>(
        &mut self,
        contents: ObjRef,
        op: impl FnOnce(&Self, &mut HashContents, &mut dyn FnMut(Field, Option<ObjRef>)) -> Result<R>,
    ) -> Result<R> {
        let mut table = {
            let object = self.object_mut(contents)?;
            let kind = object.body().kind_name();
            match object.body_mut() {
                ObjectBody::Table(table) => std::mem::replace(table, HashContents::placeholder()),
                _ => return Err(MemoryError::wrong_kind("table", kind)),
            }
        };

        let mut touched = Vec::new();
        let result = op(self, &mut table, &mut |field, _| touched.push(field));

        if let ObjectBody::Table(slot) = self.object_mut(contents)?.body_mut() {
            *slot = table;
        }
        for field in touched {
            self.barrier.after_store(contents, field);
        }
        result
    }

    fn table_put_key(
        &mut self,
        contents: ObjRef,
        index: ObjRef,
        value: ObjRef,
        duplicates: bool,
    ) -> Result<Option<ObjRef>> {
        self.object(value)?;
        let policy = self.table_of(contents)?.policy();
        let hash = self.index_hash(policy, index)?;

        self.with_contents(contents, |memory, table, store| {
            if duplicates {
                table.add(index, Some(value), hash, store)?;
                Ok(None)
            } else {
                let matches = |candidate| memory.key_matches(policy, Key::Object(index), candidate);
                Ok(table.put(index, Some(value), hash, &matches, store)?.flatten())
            }
        })
    }

    /// Store `value` under `index`, replacing an existing entry
    pub fn table_put(
        &mut self,
        contents: ObjRef,
        index: ObjRef,
        value: ObjRef,
    ) -> Result<Option<ObjRef>> {
        self.table_put_key(contents, index, value, false)
    }

    /// Store `value` under `index` alongside any existing entries
    pub fn table_add(&mut self, contents: ObjRef, index: ObjRef, value: ObjRef) -> Result<()> {
        self.table_put_key(contents, index, value, true).map(|_| ())
    }

    fn table_lookup(&self, contents: ObjRef, key: Key<'_>) -> Result<Option<ObjRef>> {
        let table = self.table_of(contents)?;
        let policy = table.policy();
        let hash = self.key_hash(policy, key)?;
        let matches = |candidate| self.key_matches(policy, key, candidate);
        Ok(table.get(hash, &matches).flatten())
    }

    fn table_lookup_all(&self, contents: ObjRef, key: Key<'_>) -> Result<Vec<ObjRef>> {
        let table = self.table_of(contents)?;
        let policy = table.policy();
        let hash = self.key_hash(policy, key)?;
        let matches = |candidate| self.key_matches(policy, key, candidate);
        Ok(table.get_all(hash, &matches).into_iter().flatten().collect())
    }

    /// Value stored under `index` (newest for duplicates); `None` if absent
    pub fn table_get(&self, contents: ObjRef, index: ObjRef) -> Result<Option<ObjRef>> {
        self.table_lookup(contents, Key::Object(index))
    }

    /// Every value stored under `index`, newest first
    pub fn table_get_all(&self, contents: ObjRef, index: ObjRef) -> Result<Vec<ObjRef>> {
        self.table_lookup_all(contents, Key::Object(index))
    }

    fn table_take(&mut self, contents: ObjRef, key: Key<'_>, all: bool) -> Result<Vec<ObjRef>> {
        let policy = self.table_of(contents)?.policy();
        let hash = self.key_hash(policy, key)?;

        self.with_contents(contents, |memory, table, store| {
            let matches = |candidate| memory.key_matches(policy, key, candidate);
            let removed = if all {
                table.remove_all(hash, &matches, store)
            } else {
                table.remove(hash, &matches, store).into_iter().collect()
            };
            Ok(removed.into_iter().flatten().collect())
        })
    }

    /// Remove the newest entry under `index`, returning its value
    pub fn table_remove(&mut self, contents: ObjRef, index: ObjRef) -> Result<Option<ObjRef>> {
        Ok(self
            .table_take(contents, Key::Object(index), false)?
            .into_iter()
            .next())
    }

    /// Remove every entry under `index`, returning their values newest first
    pub fn table_remove_all(&mut self, contents: ObjRef, index: ObjRef) -> Result<Vec<ObjRef>> {
        self.table_take(contents, Key::Object(index), true)
    }

    /// Copy every entry of `from` into `into`
    pub fn table_merge(&mut self, into: ObjRef, from: ObjRef) -> Result<()> {
        if into == from {
            return Err(MemoryError::InvalidArgument(
                "cannot merge contents into themselves".to_string(),
            ));
        }
        self.table_of(from)?;
        self.with_contents(into, |memory, table, store| {
            table.merge(memory.table_of(from)?, store)
        })
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    pub fn allocate_collection(&mut self, kind: CollectionKind) -> Result<ObjRef> {
        self.allocate_collection_in(Region::Heap, kind)
    }

    /// Allocate a collection object and its contents in `region`
    pub fn allocate_collection_in(
        &mut self,
        region: Region,
        kind: CollectionKind,
    ) -> Result<ObjRef> {
        let buckets = self.config.default_bucket_count;
        let contents = self.allocate_contents(region, kind.policy(), buckets)?;
        let collection = self.with_rooted(&[contents], |memory| {
            let object = HeapObject::new(
                ObjectHeader::new(kind.behavior(), 0),
                ObjectBody::Fields(FieldObject::new(ReferenceMap::strong(1), 0)),
            );
            memory.place(region, object)
        })?;
        self.set_reference(collection, 0, Some(contents))?;
        Ok(collection)
    }

    pub fn collection_kind(&self, collection: ObjRef) -> Result<CollectionKind> {
        let behavior = self.behavior_of(collection)?;
        CollectionKind::from_behavior(behavior).ok_or_else(|| {
            let actual = self.behaviors.get(behavior).map_or("?", |b| b.name());
            MemoryError::wrong_kind("collection", actual)
        })
    }

    /// The contents object held in slot 0
    pub fn collection_contents(&self, collection: ObjRef) -> Result<ObjRef> {
        self.collection_kind(collection)?;
        self.field(collection, 0)?.ok_or_else(|| {
            MemoryError::InvalidArgument(format!("collection {} has no contents", collection))
        })
    }

    /// Contents with room for one more entry, growing them if needed
    fn contents_with_room(&mut self, collection: ObjRef, pinned: &[ObjRef]) -> Result<ObjRef> {
        let contents = self.collection_contents(collection)?;
        let table = self.table_of(contents)?;
        if !table.needs_growth() {
            return Ok(contents);
        }

        let policy = table.policy();
        let buckets = table.bucket_count() * 2 + 1;
        log::debug!(
            "growing {} from {} to {} buckets",
            collection,
            table.bucket_count(),
            buckets
        );

        let mut rooted = vec![collection, contents];
        rooted.extend_from_slice(pinned);
        let grown = self.with_rooted(&rooted, |memory| {
            memory.allocate_contents(Region::Heap, policy, buckets)
        })?;
        self.table_merge(grown, contents)?;
        self.set_reference(collection, 0, Some(grown))?;

        // Old image contents would otherwise keep their heap entries alive
        if contents.is_image() {
            self.with_contents(contents, |_, table, store| {
                table.clear(store);
                Ok(())
            })?;
        }
        Ok(grown)
    }

    /// Store `value` under `index`.
    ///
    /// Tables and directories replace an existing entry and return its
    /// value; relations keep every entry and return `None`.
    pub fn collection_put(
        &mut self,
        collection: ObjRef,
        index: ObjRef,
        value: ObjRef,
    ) -> Result<Option<ObjRef>> {
        let kind = self.collection_kind(collection)?;
        self.object(index)?;
        self.object(value)?;
        let contents = self.contents_with_room(collection, &[index, value])?;
        self.table_put_key(contents, index, value, kind.allows_duplicates())
    }

    /// Store `value` under `index` alongside any existing entries
    pub fn collection_add(&mut self, collection: ObjRef, index: ObjRef, value: ObjRef) -> Result<()> {
        self.collection_kind(collection)?;
        self.object(index)?;
        self.object(value)?;
        let contents = self.contents_with_room(collection, &[index, value])?;
        self.table_put_key(contents, index, value, true).map(|_| ())
    }

    pub fn collection_get(&self, collection: ObjRef, index: ObjRef) -> Result<Option<ObjRef>> {
        self.table_get(self.collection_contents(collection)?, index)
    }

    pub fn collection_get_all(&self, collection: ObjRef, index: ObjRef) -> Result<Vec<ObjRef>> {
        self.table_get_all(self.collection_contents(collection)?, index)
    }

    pub fn collection_remove(
        &mut self,
        collection: ObjRef,
        index: ObjRef,
    ) -> Result<Option<ObjRef>> {
        let contents = self.collection_contents(collection)?;
        self.table_remove(contents, index)
    }

    pub fn collection_remove_all(
        &mut self,
        collection: ObjRef,
        index: ObjRef,
    ) -> Result<Vec<ObjRef>> {
        let contents = self.collection_contents(collection)?;
        self.table_remove_all(contents, index)
    }

    pub fn collection_len(&self, collection: ObjRef) -> Result<usize> {
        Ok(self.table_of(self.collection_contents(collection)?)?.len())
    }

    /// Entries chain by chain, newest first within a chain
    pub fn collection_entries(&self, collection: ObjRef) -> Result<Vec<(ObjRef, ObjRef)>> {
        let table = self.table_of(self.collection_contents(collection)?)?;
        Ok(table
            .chain_entries()
            .into_iter()
            .filter_map(|(index, value)| value.map(|value| (index, value)))
            .collect())
    }

    // ------------------------------------------------------------------
    // String keys
    // ------------------------------------------------------------------

    /// Store `value` under a string key, allocating the key string
    pub fn directory_put_str(
        &mut self,
        directory: ObjRef,
        key: &str,
        value: ObjRef,
    ) -> Result<Option<ObjRef>> {
        let kind = self.collection_kind(directory)?;
        if kind.policy() != IndexPolicy::Value {
            return Err(MemoryError::InvalidArgument(
                "string keys need a value-keyed collection".to_string(),
            ));
        }
        self.object(value)?;
        let index = self.with_rooted(&[directory, value], |memory| memory.allocate_string(key))?;
        self.collection_put(directory, index, value)
    }

    /// Value stored under a string key, without allocating
    pub fn directory_get_str(&self, directory: ObjRef, key: &str) -> Result<Option<ObjRef>> {
        self.table_lookup(self.collection_contents(directory)?, Key::Text(key))
    }

    pub fn directory_get_all_str(&self, directory: ObjRef, key: &str) -> Result<Vec<ObjRef>> {
        self.table_lookup_all(self.collection_contents(directory)?, Key::Text(key))
    }

    pub fn directory_remove_str(&mut self, directory: ObjRef, key: &str) -> Result<Option<ObjRef>> {
        let contents = self.collection_contents(directory)?;
        Ok(self.table_take(contents, Key::Text(key), false)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;

    fn memory() -> ObjectMemory {
        ObjectMemory::new(MemoryConfig::default()).unwrap()
    }

    #[test]
    fn test_value_hash_depends_on_behavior() {
        assert_eq!(
            value_hash(BehaviorId::STRING, b"abc"),
            value_hash(BehaviorId::STRING, b"abc")
        );
        assert_ne!(
            value_hash(BehaviorId::STRING, b"abc"),
            value_hash(BehaviorId::ARRAY, b"abc")
        );
    }

    #[test]
    fn test_table_put_get_remove() {
        let mut memory = memory();
        let contents = memory
            .allocate_contents(Region::Heap, IndexPolicy::Identity, 17)
            .unwrap();
        let a = memory.allocate_string("A").unwrap();
        let one = memory.allocate_string("1").unwrap();
        let two = memory.allocate_string("2").unwrap();

        assert_eq!(memory.table_put(contents, a, one).unwrap(), None);
        assert_eq!(memory.table_get(contents, a).unwrap(), Some(one));
        assert_eq!(memory.table_put(contents, a, two).unwrap(), Some(one));
        assert_eq!(memory.table_get(contents, a).unwrap(), Some(two));
        assert_eq!(memory.table_remove(contents, a).unwrap(), Some(two));
        assert_eq!(memory.table_get(contents, a).unwrap(), None);
        assert_eq!(memory.table_of(contents).unwrap().free_slots(), 34);
    }

    #[test]
    fn test_identity_table_distinguishes_equal_strings() {
        let mut memory = memory();
        let table = memory.allocate_collection(CollectionKind::Table).unwrap();
        let k1 = memory.allocate_string("k").unwrap();
        let k2 = memory.allocate_string("k").unwrap();
        let v = memory.allocate_string("v").unwrap();

        memory.collection_put(table, k1, v).unwrap();
        assert_eq!(memory.collection_get(table, k1).unwrap(), Some(v));
        assert_eq!(memory.collection_get(table, k2).unwrap(), None);
    }

    #[test]
    fn test_directory_matches_by_value() {
        let mut memory = memory();
        let dir = memory.allocate_collection(CollectionKind::Directory).unwrap();
        let v = memory.allocate_string("v").unwrap();
        let w = memory.allocate_string("w").unwrap();

        memory.directory_put_str(dir, "name", v).unwrap();
        assert_eq!(memory.directory_get_str(dir, "name").unwrap(), Some(v));
        assert_eq!(memory.directory_put_str(dir, "name", w).unwrap(), Some(v));
        assert_eq!(memory.collection_len(dir).unwrap(), 1);

        let other_key = memory.allocate_string("name").unwrap();
        assert_eq!(memory.collection_get(dir, other_key).unwrap(), Some(w));
        assert_eq!(memory.directory_remove_str(dir, "name").unwrap(), Some(w));
        assert_eq!(memory.directory_get_str(dir, "name").unwrap(), None);
    }

    #[test]
    fn test_relation_keeps_duplicates_newest_first() {
        let mut memory = memory();
        let rel = memory.allocate_collection(CollectionKind::Relation).unwrap();
        let a = memory.allocate_string("a").unwrap();
        let b = memory.allocate_string("b").unwrap();

        memory.directory_put_str(rel, "k", a).unwrap();
        memory.directory_put_str(rel, "k", b).unwrap();
        assert_eq!(memory.directory_get_all_str(rel, "k").unwrap(), vec![b, a]);

        let key = memory.allocate_string("k").unwrap();
        assert_eq!(memory.collection_remove_all(rel, key).unwrap(), vec![b, a]);
        assert_eq!(memory.collection_len(rel).unwrap(), 0);
    }

    #[test]
    fn test_string_key_on_identity_table_rejected() {
        let mut memory = memory();
        let table = memory.allocate_collection(CollectionKind::Table).unwrap();
        let v = memory.allocate_string("v").unwrap();
        assert!(memory.directory_put_str(table, "k", v).is_err());
        assert!(memory.directory_get_str(table, "k").is_err());
    }

    #[test]
    fn test_collection_grows_and_keeps_entries() {
        let mut memory = memory();
        let table = memory.allocate_collection(CollectionKind::Table).unwrap();
        memory.set_global("table", table).unwrap();
        let first = memory.collection_contents(table).unwrap();

        let mut pairs = Vec::new();
        for i in 0..40 {
            let k = memory.allocate_string(&format!("k{}", i)).unwrap();
            memory.collection_put(table, k, k).unwrap();
            pairs.push(k);
        }

        let contents = memory.collection_contents(table).unwrap();
        assert_ne!(contents, first);
        assert_eq!(memory.table_of(contents).unwrap().bucket_count(), 71);
        assert_eq!(memory.collection_len(table).unwrap(), 40);
        for k in pairs {
            assert_eq!(memory.collection_get(table, k).unwrap(), Some(k));
        }
        assert!(memory.table_of(contents).unwrap().verify().is_ok());
    }

    #[test]
    fn test_image_contents_stores_are_remembered() {
        let mut memory = memory();
        let contents = memory
            .allocate_contents(Region::Image, IndexPolicy::Identity, 5)
            .unwrap();
        let k = memory.allocate_string("k").unwrap();
        memory.table_put(contents, k, k).unwrap();
        assert_eq!(memory.barrier().remembered().len(), 2);
    }

    #[test]
    fn test_non_collection_rejected() {
        let mut memory = memory();
        let s = memory.allocate_string("s").unwrap();
        assert!(matches!(
            memory.collection_len(s),
            Err(MemoryError::WrongKind { .. })
        ));
    }
}
