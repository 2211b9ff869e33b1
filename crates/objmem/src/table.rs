//! Hash Table Store - open-chained hash table contents
//!
//! Backs every dictionary-like collection. The contents are a fixed array
//! of `2 * bucket_count` entries: a primary area addressed by
//! `hash % bucket_count`, followed by an overflow area of the same size.
//!
//! ```text
//!            primary area              overflow area
//!  ┌─────┬─────┬─────┬─────┐  ┌─────┬─────┬─────┬─────┐
//!  │  A  │     │  B  │     │  │  C  │     │     │     │
//!  └──┬──┴─────┴─────┴─────┘  └─────┴─────┴─────┴─────┘
//!     └── next ──────────────────┘
//!
//!  free chain: head → overflow slots → primary slots ← tail
//! ```
//!
//! Every chain is anchored at its primary slot. A collision takes a slot
//! from the head of the free chain, which yields overflow slots first.
//! Freed overflow slots return to the head, freed primary slots to the
//! tail, and a primary slot taken for a new chain is unlinked directly.
//!
//! The table itself never resizes. [`HashContents::needs_growth`] reports
//! when the owner should allocate larger contents and [`merge`] into them.
//!
//! Hashing and index comparison are supplied by the caller: the table
//! stores the hash of each index next to it and asks a `matches` predicate
//! to confirm candidates. Every stored field is reported through a `store`
//! callback so the owner can run the write barrier.
//!
//! [`merge`]: HashContents::merge

use crate::error::{MemoryError, Result};
use crate::object::{Field, MarkReason, ObjRef, Trace};

/// Bytes charged per entry
pub const ENTRY_SIZE: usize = 32;

/// How indices are hashed and compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexPolicy {
    /// Same object; hash is the identity hash
    Identity,
    /// Same behavior and same raw bytes (strings)
    Value,
}

impl IndexPolicy {
    pub fn as_u8(self) -> u8 {
        match self {
            IndexPolicy::Identity => 0,
            IndexPolicy::Value => 1,
        }
    }

    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(IndexPolicy::Identity),
            1 => Some(IndexPolicy::Value),
            _ => None,
        }
    }
}

/// One table slot.
///
/// In use when `index` is set; `next` then links the collision chain.
/// When free, `next`/`prev` link the free chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Entry {
    index: Option<ObjRef>,
    value: Option<ObjRef>,
    hash: u64,
    next: Option<u32>,
    prev: Option<u32>,
}

impl Entry {
    #[inline]
    fn in_use(&self) -> bool {
        self.index.is_some()
    }
}

/// Fixed-capacity open-chained hash table
#[derive(Debug, Clone)]
pub struct HashContents {
    policy: IndexPolicy,
    bucket_count: u32,
    entries: Vec<Entry>,
    free_head: Option<u32>,
    free_tail: Option<u32>,
    used: u32,
}

impl HashContents {
    /// Create empty contents with `bucket_count` primary slots (at least 1)
    pub fn new(policy: IndexPolicy, bucket_count: usize) -> Self {
        let bucket_count = bucket_count.clamp(1, u32::MAX as usize / 2) as u32;
        let capacity = bucket_count * 2;
        let mut table = Self {
            policy,
            bucket_count,
            entries: vec![Entry::default(); capacity as usize],
            free_head: None,
            free_tail: None,
            used: 0,
        };

        for slot in bucket_count..capacity {
            table.push_tail(slot);
        }
        for slot in 0..bucket_count {
            table.push_tail(slot);
        }

        table
    }

    /// Zero-capacity stand-in left behind while contents are borrowed out
    /// of their object
    pub(crate) fn placeholder() -> Self {
        Self {
            policy: IndexPolicy::Identity,
            bucket_count: 0,
            entries: Vec::new(),
            free_head: None,
            free_tail: None,
            used: 0,
        }
    }

    pub fn policy(&self) -> IndexPolicy {
        self.policy
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count as usize
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of entries in use
    pub fn len(&self) -> usize {
        self.used as usize
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    pub fn free_slots(&self) -> usize {
        self.entries.len() - self.used as usize
    }

    /// No free entry left
    pub fn is_full(&self) -> bool {
        self.free_head.is_none()
    }

    /// The owner should grow once the in-use count reaches the bucket count
    pub fn needs_growth(&self) -> bool {
        self.used >= self.bucket_count
    }

    pub fn charged_size(&self) -> usize {
        self.entries.len() * ENTRY_SIZE
    }

    /// Slot where the chain for `hash` is anchored
    #[inline]
    pub fn bucket_of(&self, hash: u64) -> u32 {
        (hash % self.bucket_count as u64) as u32
    }

    pub fn entry_index(&self, slot: u32) -> Option<Option<ObjRef>> {
        self.entries.get(slot as usize).map(|e| e.index)
    }

    pub fn entry_value(&self, slot: u32) -> Option<Option<ObjRef>> {
        self.entries.get(slot as usize).map(|e| e.value)
    }

    /// Free slots in free-chain order, starting at the head
    pub fn free_chain(&self) -> Vec<u32> {
        let mut chain = Vec::with_capacity(self.free_slots());
        let mut cursor = self.free_head;
        while let Some(slot) = cursor {
            chain.push(slot);
            cursor = self.entries[slot as usize].next;
            if chain.len() > self.entries.len() {
                break;
            }
        }
        chain
    }

    /// Head of the free chain
    pub fn free_head(&self) -> Option<u32> {
        self.free_head
    }

    /// Check the free chain: it must visit every unused slot exactly once
    /// and no slot in use, and agree with the in-use count.
    pub fn verify(&self) -> std::result::Result<(), String> {
        let chain = self.free_chain();
        let mut seen = vec![false; self.entries.len()];
        for &slot in &chain {
            let entry = &self.entries[slot as usize];
            if entry.in_use() {
                return Err(format!("slot {} is in use but on the free chain", slot));
            }
            if std::mem::replace(&mut seen[slot as usize], true) {
                return Err(format!("slot {} appears twice on the free chain", slot));
            }
        }
        for (slot, entry) in self.entries.iter().enumerate() {
            if !entry.in_use() && !seen[slot] {
                return Err(format!("free slot {} is not on the free chain", slot));
            }
        }
        let in_use = self.entries.iter().filter(|e| e.in_use()).count();
        if in_use != self.used as usize {
            return Err(format!("used count {} but {} slots in use", self.used, in_use));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Free chain
    // ------------------------------------------------------------------

    fn push_head(&mut self, slot: u32) {
        let old_head = self.free_head;
        let entry = &mut self.entries[slot as usize];
        entry.prev = None;
        entry.next = old_head;
        match old_head {
            Some(head) => self.entries[head as usize].prev = Some(slot),
            None => self.free_tail = Some(slot),
        }
        self.free_head = Some(slot);
    }

    fn push_tail(&mut self, slot: u32) {
        let old_tail = self.free_tail;
        let entry = &mut self.entries[slot as usize];
        entry.next = None;
        entry.prev = old_tail;
        match old_tail {
            Some(tail) => self.entries[tail as usize].next = Some(slot),
            None => self.free_head = Some(slot),
        }
        self.free_tail = Some(slot);
    }

    fn unlink_free(&mut self, slot: u32) {
        let Entry { next, prev, .. } = self.entries[slot as usize];
        match prev {
            Some(p) => self.entries[p as usize].next = next,
            None => self.free_head = next,
        }
        match next {
            Some(n) => self.entries[n as usize].prev = prev,
            None => self.free_tail = prev,
        }
        let entry = &mut self.entries[slot as usize];
        entry.next = None;
        entry.prev = None;
    }

    fn take_free(&mut self) -> Result<u32> {
        let slot = self.free_head.ok_or(MemoryError::TableFull {
            capacity: self.entries.len(),
        })?;
        self.unlink_free(slot);
        Ok(slot)
    }

    /// Clear a slot and return it to the free chain
    fn release(&mut self, slot: u32, store: &mut dyn FnMut(Field, Option<ObjRef>)) {
        self.entries[slot as usize] = Entry::default();
        self.used -= 1;
        if slot >= self.bucket_count {
            self.push_head(slot);
        } else {
            self.push_tail(slot);
        }
        store(Field::Index(slot), None);
        store(Field::Value(slot), None);
    }

    fn write(
        &mut self,
        slot: u32,
        index: ObjRef,
        value: Option<ObjRef>,
        hash: u64,
        next: Option<u32>,
        store: &mut dyn FnMut(Field, Option<ObjRef>),
    ) {
        self.entries[slot as usize] = Entry {
            index: Some(index),
            value,
            hash,
            next,
            prev: None,
        };
        store(Field::Index(slot), Some(index));
        store(Field::Value(slot), value);
    }

    // ------------------------------------------------------------------
    // Chains
    // ------------------------------------------------------------------

    /// Slots of the chain anchored at `bucket`, head first
    fn chain(&self, bucket: u32) -> ChainIter<'_> {
        let head = &self.entries[bucket as usize];
        let start = if head.in_use() && self.bucket_of(head.hash) == bucket {
            Some(bucket)
        } else {
            None
        };
        ChainIter {
            entries: &self.entries,
            cursor: start,
        }
    }

    /// Make the primary slot `bucket` available for its own chain.
    ///
    /// Returns `true` if the slot is now free (taken off the free chain),
    /// `false` if it already anchors the chain for `bucket`.
    fn claim_primary(
        &mut self,
        bucket: u32,
        store: &mut dyn FnMut(Field, Option<ObjRef>),
    ) -> Result<bool> {
        let occupant = self.entries[bucket as usize];
        let Some(index) = occupant.index else {
            self.unlink_free(bucket);
            return Ok(true);
        };

        let home = self.bucket_of(occupant.hash);
        if home == bucket {
            return Ok(false);
        }

        // The occupant belongs to another chain: move it out
        let predecessor = self
            .chain(home)
            .find(|&slot| self.entries[slot as usize].next == Some(bucket))
            .ok_or_else(|| MemoryError::InvalidState {
                expected: format!("slot {} linked from chain {}", bucket, home),
                actual: "unlinked overflow entry".to_string(),
            })?;
        let target = self.take_free()?;
        self.write(target, index, occupant.value, occupant.hash, occupant.next, store);
        self.entries[predecessor as usize].next = Some(target);
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Insert or replace the value stored under `index`.
    ///
    /// Returns the previous value if the index was present.
    pub fn put(
        &mut self,
        index: ObjRef,
        value: Option<ObjRef>,
        hash: u64,
        matches: &dyn Fn(ObjRef) -> bool,
        store: &mut dyn FnMut(Field, Option<ObjRef>),
    ) -> Result<Option<Option<ObjRef>>> {
        let bucket = self.bucket_of(hash);

        if let Some(slot) = self.find(bucket, hash, matches) {
            let entry = &mut self.entries[slot as usize];
            let previous = std::mem::replace(&mut entry.value, value);
            store(Field::Value(slot), value);
            return Ok(Some(previous));
        }

        self.insert_new(bucket, index, value, hash, false, store)?;
        Ok(None)
    }

    /// Insert without looking for an existing entry.
    ///
    /// The new entry becomes the head of its chain, so it shadows older
    /// entries with the same index.
    pub fn add(
        &mut self,
        index: ObjRef,
        value: Option<ObjRef>,
        hash: u64,
        store: &mut dyn FnMut(Field, Option<ObjRef>),
    ) -> Result<()> {
        let bucket = self.bucket_of(hash);
        self.insert_new(bucket, index, value, hash, true, store)
    }

    fn insert_new(
        &mut self,
        bucket: u32,
        index: ObjRef,
        value: Option<ObjRef>,
        hash: u64,
        at_head: bool,
        store: &mut dyn FnMut(Field, Option<ObjRef>),
    ) -> Result<()> {
        // Every path below needs one free slot; fail before touching anything
        if self.free_head.is_none() {
            return Err(MemoryError::TableFull {
                capacity: self.entries.len(),
            });
        }
        // Relocating an intruder needs a second one
        let occupant = self.entries[bucket as usize];
        if occupant.in_use()
            && self.bucket_of(occupant.hash) != bucket
            && self.free_slots() < 2
        {
            return Err(MemoryError::TableFull {
                capacity: self.entries.len(),
            });
        }

        let anchored = !self.claim_primary(bucket, store)?;
        let head = self.entries[bucket as usize];

        match head.index {
            Some(head_index) if anchored && at_head => {
                let moved = self.take_free()?;
                self.write(moved, head_index, head.value, head.hash, head.next, store);
                self.write(bucket, index, value, hash, Some(moved), store);
            }
            Some(_) if anchored => {
                let slot = self.take_free()?;
                let last = self.chain(bucket).last().unwrap_or(bucket);
                self.write(slot, index, value, hash, None, store);
                self.entries[last as usize].next = Some(slot);
            }
            _ => self.write(bucket, index, value, hash, None, store),
        }

        self.used += 1;
        Ok(())
    }

    fn find(&self, bucket: u32, hash: u64, matches: &dyn Fn(ObjRef) -> bool) -> Option<u32> {
        self.chain(bucket).find(|&slot| {
            let entry = &self.entries[slot as usize];
            entry.hash == hash && entry.index.map_or(false, matches)
        })
    }

    /// Value stored under `index`; for duplicate indices, the newest
    pub fn get(
        &self,
        hash: u64,
        matches: &dyn Fn(ObjRef) -> bool,
    ) -> Option<Option<ObjRef>> {
        self.find(self.bucket_of(hash), hash, matches)
            .map(|slot| self.entries[slot as usize].value)
    }

    /// All values stored under `index`, newest first
    pub fn get_all(&self, hash: u64, matches: &dyn Fn(ObjRef) -> bool) -> Vec<Option<ObjRef>> {
        self.chain(self.bucket_of(hash))
            .filter_map(|slot| {
                let entry = &self.entries[slot as usize];
                (entry.hash == hash && entry.index.map_or(false, matches)).then_some(entry.value)
            })
            .collect()
    }

    pub fn has_index(&self, hash: u64, matches: &dyn Fn(ObjRef) -> bool) -> bool {
        self.find(self.bucket_of(hash), hash, matches).is_some()
    }

    /// Remove the first entry stored under `index`, returning its value.
    ///
    /// Removing a chain head pulls the second entry into the primary slot
    /// and frees the second entry's slot instead.
    pub fn remove(
        &mut self,
        hash: u64,
        matches: &dyn Fn(ObjRef) -> bool,
        store: &mut dyn FnMut(Field, Option<ObjRef>),
    ) -> Option<Option<ObjRef>> {
        let bucket = self.bucket_of(hash);
        let mut previous: Option<u32> = None;
        let mut found = None;
        for slot in self.chain(bucket) {
            let entry = &self.entries[slot as usize];
            if entry.hash == hash && entry.index.map_or(false, matches) {
                found = Some(slot);
                break;
            }
            previous = Some(slot);
        }
        let slot = found?;
        let removed = self.entries[slot as usize];

        let successor = removed.next.map(|second| (second, self.entries[second as usize]));
        match (previous, successor) {
            (None, Some((second, Entry { index: Some(index), value, hash, next, .. }))) => {
                self.write(slot, index, value, hash, next, store);
                // `write` does not count; `release` decrements for the vacated slot
                self.release(second, store);
            }
            (None, _) => self.release(slot, store),
            (Some(prev), next) => {
                let next = next.map(|(second, _)| second);
                self.entries[prev as usize].next = next;
                self.release(slot, store);
            }
        }

        Some(removed.value)
    }

    /// Remove every entry stored under `index`, newest first
    pub fn remove_all(
        &mut self,
        hash: u64,
        matches: &dyn Fn(ObjRef) -> bool,
        store: &mut dyn FnMut(Field, Option<ObjRef>),
    ) -> Vec<Option<ObjRef>> {
        let mut removed = Vec::new();
        while let Some(value) = self.remove(hash, matches, store) {
            removed.push(value);
        }
        removed
    }

    /// Copy every entry of `other` into this table, keeping the relative
    /// order of entries that share an index.
    pub fn merge(
        &mut self,
        other: &HashContents,
        store: &mut dyn FnMut(Field, Option<ObjRef>),
    ) -> Result<()> {
        if other.len() > self.free_slots() {
            return Err(MemoryError::TableFull {
                capacity: self.entries.len(),
            });
        }
        for bucket in 0..other.bucket_count {
            let chain: Vec<u32> = other.chain(bucket).collect();
            for &slot in chain.iter().rev() {
                let entry = other.entries[slot as usize];
                if let Some(index) = entry.index {
                    self.add(index, entry.value, entry.hash, store)?;
                }
            }
        }
        Ok(())
    }

    /// Empty the table, reporting every cleared field
    pub fn clear(&mut self, store: &mut dyn FnMut(Field, Option<ObjRef>)) {
        let in_use: Vec<u32> = (0..self.entries.len() as u32)
            .filter(|&slot| self.entries[slot as usize].in_use())
            .collect();
        *self = HashContents::new(self.policy, self.bucket_count as usize);
        for slot in in_use {
            store(Field::Index(slot), None);
            store(Field::Value(slot), None);
        }
    }

    /// In-use entries in slot order
    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Option<ObjRef>)> + '_ {
        self.entries
            .iter()
            .filter_map(|entry| entry.index.map(|index| (index, entry.value)))
    }

    /// In-use entries chain by chain, each chain head first
    pub fn chain_entries(&self) -> Vec<(ObjRef, Option<ObjRef>)> {
        let mut out = Vec::with_capacity(self.len());
        for bucket in 0..self.bucket_count {
            for slot in self.chain(bucket) {
                let entry = &self.entries[slot as usize];
                if let Some(index) = entry.index {
                    out.push((index, entry.value));
                }
            }
        }
        out
    }
}

struct ChainIter<'a> {
    entries: &'a [Entry],
    cursor: Option<u32>,
}

impl Iterator for ChainIter<'_> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let slot = self.cursor?;
        self.cursor = self.entries[slot as usize].next;
        Some(slot)
    }
}

impl Trace for HashContents {
    fn mark(&self, visit: &mut dyn FnMut(Field, ObjRef)) {
        for (slot, entry) in self.entries.iter().enumerate() {
            if let Some(index) = entry.index {
                visit(Field::Index(slot as u32), index);
                if let Some(value) = entry.value {
                    visit(Field::Value(slot as u32), value);
                }
            }
        }
    }

    fn mark_general(&self, _reason: MarkReason, visit: &mut dyn FnMut(Field, ObjRef)) {
        self.mark(visit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Region;
    use quickcheck_macros::quickcheck;

    fn obj(index: u32) -> ObjRef {
        ObjRef::new(Region::Heap, index, 0)
    }

    fn ignore(_: Field, _: Option<ObjRef>) {}

    fn put(table: &mut HashContents, key: ObjRef, value: u32) -> Option<Option<ObjRef>> {
        table
            .put(key, Some(obj(value)), key.index() as u64, &|k| k == key, &mut ignore)
            .unwrap()
    }

    fn get(table: &HashContents, key: ObjRef) -> Option<Option<ObjRef>> {
        table.get(key.index() as u64, &|k| k == key)
    }

    fn remove(table: &mut HashContents, key: ObjRef) -> Option<Option<ObjRef>> {
        table.remove(key.index() as u64, &|k| k == key, &mut ignore)
    }

    #[test]
    fn test_new_table_free_chain_order() {
        let table = HashContents::new(IndexPolicy::Identity, 3);
        assert_eq!(table.capacity(), 6);
        assert_eq!(table.free_chain(), vec![3, 4, 5, 0, 1, 2]);
        table.verify().unwrap();
    }

    #[test]
    fn test_put_get_remove() {
        let mut table = HashContents::new(IndexPolicy::Identity, 17);
        let a = obj(100);
        assert_eq!(put(&mut table, a, 1), None);
        assert_eq!(get(&table, a), Some(Some(obj(1))));

        assert_eq!(remove(&mut table, a), Some(Some(obj(1))));
        assert_eq!(get(&table, a), None);
        // 100 % 17 = 15: the primary slot went back to the tail
        assert_eq!(table.free_chain().last(), Some(&15));
        table.verify().unwrap();
    }

    #[test]
    fn test_put_replaces() {
        let mut table = HashContents::new(IndexPolicy::Identity, 5);
        let a = obj(1);
        put(&mut table, a, 10);
        assert_eq!(put(&mut table, a, 20), Some(Some(obj(10))));
        assert_eq!(table.len(), 1);
        assert_eq!(get(&table, a), Some(Some(obj(20))));
    }

    #[test]
    fn test_collision_uses_overflow_first() {
        let mut table = HashContents::new(IndexPolicy::Identity, 5);
        put(&mut table, obj(2), 1);
        put(&mut table, obj(7), 2);
        // 7 collides with 2 and lands in the first overflow slot
        assert_eq!(table.entry_index(5), Some(Some(obj(7))));
        assert_eq!(get(&table, obj(7)), Some(Some(obj(2))));
        table.verify().unwrap();
    }

    #[test]
    fn test_remove_chain_head_pulls_second_entry() {
        let mut table = HashContents::new(IndexPolicy::Identity, 5);
        put(&mut table, obj(2), 1);
        put(&mut table, obj(7), 2);
        remove(&mut table, obj(2));

        assert_eq!(table.entry_index(2), Some(Some(obj(7))));
        assert_eq!(table.entry_index(5), Some(None));
        assert_eq!(table.free_head(), Some(5));
        assert_eq!(get(&table, obj(7)), Some(Some(obj(2))));
        table.verify().unwrap();
    }

    #[test]
    fn test_intruder_is_relocated() {
        let mut table = HashContents::new(IndexPolicy::Identity, 5);
        // Chain 0 fills the whole overflow area (slots 5..10)
        for key in [0, 5, 10, 15, 20, 25] {
            put(&mut table, obj(key), key);
        }
        // The next collision spills into the first free primary slot
        put(&mut table, obj(30), 30);
        assert_eq!(table.entry_index(1), Some(Some(obj(30))));

        // A key homed at slot 1 evicts the intruder
        put(&mut table, obj(1), 1);
        assert_eq!(table.entry_index(1), Some(Some(obj(1))));
        assert_eq!(get(&table, obj(30)), Some(Some(obj(30))));
        assert_eq!(get(&table, obj(1)), Some(Some(obj(1))));
        assert_eq!(table.len(), 8);
        table.verify().unwrap();
    }

    #[test]
    fn test_add_duplicates_newest_first() {
        let mut table = HashContents::new(IndexPolicy::Identity, 5);
        let key = obj(3);
        for value in [1, 2, 3] {
            table.add(key, Some(obj(value)), 3, &mut ignore).unwrap();
        }
        assert_eq!(get(&table, key), Some(Some(obj(3))));
        assert_eq!(
            table.get_all(3, &|k| k == key),
            vec![Some(obj(3)), Some(obj(2)), Some(obj(1))]
        );

        let removed = table.remove_all(3, &|k| k == key, &mut ignore);
        assert_eq!(removed.len(), 3);
        assert!(table.is_empty());
        table.verify().unwrap();
    }

    #[test]
    fn test_table_full() {
        let mut table = HashContents::new(IndexPolicy::Identity, 1);
        put(&mut table, obj(0), 0);
        put(&mut table, obj(1), 1);
        assert!(table.is_full());
        let err = table
            .put(obj(2), None, 2, &|k| k == obj(2), &mut ignore)
            .unwrap_err();
        assert!(err.is_recoverable());
        table.verify().unwrap();
    }

    #[test]
    fn test_merge_keeps_duplicate_order() {
        let mut small = HashContents::new(IndexPolicy::Identity, 2);
        let key = obj(4);
        small.add(key, Some(obj(1)), 4, &mut ignore).unwrap();
        small.add(key, Some(obj(2)), 4, &mut ignore).unwrap();
        put(&mut small, obj(1), 7);
        assert!(small.needs_growth());

        let mut large = HashContents::new(IndexPolicy::Identity, 5);
        large.merge(&small, &mut ignore).unwrap();
        assert_eq!(large.len(), 3);
        assert_eq!(large.get_all(4, &|k| k == key), vec![Some(obj(2)), Some(obj(1))]);
        assert_eq!(get(&large, obj(1)), Some(Some(obj(7))));
        large.verify().unwrap();
    }

    #[test]
    fn test_store_reports_every_write() {
        let mut table = HashContents::new(IndexPolicy::Identity, 5);
        let mut writes = Vec::new();
        table
            .put(obj(1), Some(obj(9)), 1, &|k| k == obj(1), &mut |field, value| {
                writes.push((field, value))
            })
            .unwrap();
        assert_eq!(
            writes,
            vec![
                (Field::Index(1), Some(obj(1))),
                (Field::Value(1), Some(obj(9)))
            ]
        );
    }

    #[test]
    fn test_trace_visits_index_and_value() {
        let mut table = HashContents::new(IndexPolicy::Identity, 3);
        put(&mut table, obj(1), 5);
        let mut seen = Vec::new();
        table.mark(&mut |field, target| seen.push((field, target)));
        assert_eq!(
            seen,
            vec![(Field::Index(1), obj(1)), (Field::Value(1), obj(5))]
        );
    }

    /// Random put/remove sequences keep the free chain exact and lookups
    /// consistent with a model map.
    #[quickcheck]
    fn prop_free_chain_and_lookup(ops: Vec<(bool, u8, u8)>) -> bool {
        let mut table = HashContents::new(IndexPolicy::Identity, 7);
        let mut model = std::collections::HashMap::new();

        for (insert, key, value) in ops {
            let key = obj(key as u32 % 32);
            if insert {
                let stored = table.put(
                    key,
                    Some(obj(value as u32)),
                    key.index() as u64,
                    &|k| k == key,
                    &mut ignore,
                );
                match stored {
                    Ok(_) => {
                        model.insert(key, obj(value as u32));
                    }
                    Err(_) if table.len() == model.len() => {}
                    Err(_) => return false,
                }
            } else {
                let removed = remove(&mut table, key).flatten();
                if removed != model.remove(&key) {
                    return false;
                }
                if get(&table, key).is_some() {
                    return false;
                }
            }
            if table.verify().is_err() {
                return false;
            }
        }

        model
            .iter()
            .all(|(&key, &value)| get(&table, key) == Some(Some(value)))
    }
}
