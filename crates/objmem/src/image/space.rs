//! Image space - the non-collected region
//!
//! Objects restored from an image file, or created directly in the image
//! while bootstrapping one. They are never scanned or reclaimed, so an
//! image reference stays valid for the life of the memory.

use crate::error::{MemoryError, Result};
use crate::object::{HeapObject, ObjRef, Region};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

/// Storage for image-region objects
#[derive(Debug, Default)]
pub struct ImageSpace {
    objects: Vec<HeapObject>,
    /// Stable names by which image objects travel in envelopes
    names: IndexMap<String, ObjRef>,
    named: FxHashMap<ObjRef, String>,
    fingerprint: u64,
    loaded: bool,
}

impl ImageSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, object: HeapObject) -> Result<ObjRef> {
        let index = u32::try_from(self.objects.len()).map_err(|_| MemoryError::OutOfMemory {
            requested: object.charged_size(),
            available: 0,
        })?;
        self.objects.push(object);
        Ok(ObjRef::new(Region::Image, index, 0))
    }

    /// Drop objects pushed after `len` (failed restore)
    pub(crate) fn truncate(&mut self, len: usize) {
        self.objects.truncate(len);
        self.names.retain(|_, r| (r.index() as usize) < len);
        self.named.retain(|r, _| (r.index() as usize) < len);
    }

    pub fn get(&self, reference: ObjRef) -> Result<&HeapObject> {
        if !reference.is_image() || reference.reuse() != 0 {
            return Err(MemoryError::StaleReference { reference });
        }
        self.objects
            .get(reference.index() as usize)
            .ok_or(MemoryError::StaleReference { reference })
    }

    pub(crate) fn get_mut(&mut self, reference: ObjRef) -> Result<&mut HeapObject> {
        if !reference.is_image() || reference.reuse() != 0 {
            return Err(MemoryError::StaleReference { reference });
        }
        self.objects
            .get_mut(reference.index() as usize)
            .ok_or(MemoryError::StaleReference { reference })
    }

    pub fn contains(&self, reference: ObjRef) -> bool {
        self.get(reference).is_ok()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, &HeapObject)> {
        self.objects
            .iter()
            .enumerate()
            .map(|(index, object)| (ObjRef::new(Region::Image, index as u32, 0), object))
    }

    /// Bytes charged to image objects
    pub fn bytes(&self) -> usize {
        self.objects.iter().map(HeapObject::charged_size).sum()
    }

    /// Give an image object a stable name; the first name given wins.
    ///
    /// Names starting with `@` are refused since they would shadow the
    /// positional symbols of unnamed objects. Returns whether the name was
    /// taken.
    pub fn set_name(&mut self, name: &str, reference: ObjRef) -> bool {
        if name.starts_with('@')
            || self.named.contains_key(&reference)
            || self.names.contains_key(name)
        {
            return false;
        }
        self.names.insert(name.to_string(), reference);
        self.named.insert(reference, name.to_string());
        true
    }

    /// Stable name of an image object: its given name, else `@<index>`
    pub fn symbol(&self, reference: ObjRef) -> String {
        match self.named.get(&reference) {
            Some(name) => name.clone(),
            None => format!("@{}", reference.index()),
        }
    }

    /// Resolve a stable name produced by [`symbol`](Self::symbol)
    pub fn resolve(&self, symbol: &str) -> Option<ObjRef> {
        if let Some(&reference) = self.names.get(symbol) {
            return Some(reference);
        }
        let index = symbol.strip_prefix('@')?.parse::<u32>().ok()?;
        let reference = ObjRef::new(Region::Image, index, 0);
        self.contains(reference).then_some(reference)
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub(crate) fn mark_loaded(&mut self, fingerprint: u64) {
        self.loaded = true;
        self.fingerprint = fingerprint;
    }
}
