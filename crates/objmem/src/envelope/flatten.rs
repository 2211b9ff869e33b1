//! Flatten: object graph to envelope

use super::codec::{
    self, EnvelopeHeader, EnvelopeMode, PayloadWriter, RecordKind, RefWord, FORMAT_VERSION,
};
use super::Envelope;
use crate::error::{MemoryError, Result};
use crate::logging::GcEvent;
use crate::marker;
use crate::memory::ObjectMemory;
use crate::object::{BehaviorId, MarkReason, ObjRef, ObjectBody};
use indexmap::{IndexMap, IndexSet};

impl ObjectMemory {
    /// Flatten everything reachable from `root` into an envelope.
    ///
    /// Image objects travel by symbol and native handles as proxies.
    pub fn flatten(&mut self, root: ObjRef) -> Result<Envelope> {
        self.flatten_as(root, EnvelopeMode::Envelope)
    }

    pub(crate) fn flatten_as(&mut self, root: ObjRef, mode: EnvelopeMode) -> Result<Envelope> {
        let envelope = Flattener::new(self, mode).run(root)?;
        self.logger.log(GcEvent::Flattened {
            objects: envelope.header().map_or(0, |h| h.object_count as usize),
            bytes: envelope.len(),
        });
        Ok(envelope)
    }
}

struct Flattener<'a> {
    memory: &'a ObjectMemory,
    mode: EnvelopeMode,
    behaviors: IndexSet<BehaviorId>,
    symbols: IndexSet<String>,
    /// Visited set: object → payload offset
    offsets: IndexMap<ObjRef, u32>,
    /// Offset words written before their target was placed
    patches: Vec<(u32, ObjRef)>,
    payload: PayloadWriter,
}

impl<'a> Flattener<'a> {
    fn new(memory: &'a ObjectMemory, mode: EnvelopeMode) -> Self {
        Self {
            memory,
            mode,
            behaviors: IndexSet::new(),
            symbols: IndexSet::new(),
            offsets: IndexMap::new(),
            patches: Vec::new(),
            payload: PayloadWriter::new(),
        }
    }

    fn by_name(&self, reference: ObjRef) -> bool {
        self.mode == EnvelopeMode::Envelope && reference.is_image()
    }

    fn symbol(&mut self, name: String) -> u32 {
        self.symbols.insert_full(name).0 as u32
    }

    fn run(mut self, root: ObjRef) -> Result<Envelope> {
        let reason = match self.mode {
            EnvelopeMode::Envelope => MarkReason::Flatten,
            EnvelopeMode::Image => MarkReason::SaveImage,
        };

        for reference in marker::reachable_from(self.memory, root, reason)? {
            if self.by_name(reference) {
                continue;
            }
            let offset = self.payload.position();
            self.offsets.insert(reference, offset);
            self.encode(reference)?;
        }

        for (position, target) in std::mem::take(&mut self.patches) {
            let offset = *self.offsets.get(&target).ok_or(MemoryError::InvalidState {
                expected: format!("{} flattened", target),
                actual: "target never visited".to_string(),
            })?;
            self.payload.patch(position, offset);
        }

        let root = if self.by_name(root) {
            let name = self.memory.image().symbol(root);
            RefWord::Symbol(self.symbol(name))
        } else {
            RefWord::Offset(self.offsets.get(&root).copied().unwrap_or(0))
        };

        let (payload, fixups) = self.payload.finish();
        if u32::try_from(payload.len()).is_err() {
            return Err(MemoryError::InvalidArgument(format!(
                "graph too large to flatten: {} payload bytes",
                payload.len()
            )));
        }

        let fingerprint = match self.mode {
            EnvelopeMode::Envelope => self.memory.image().fingerprint(),
            EnvelopeMode::Image => codec::payload_fingerprint(&payload),
        };
        let header = EnvelopeHeader {
            format_version: FORMAT_VERSION,
            interpreter_version: self.memory.config().interpreter_version.clone(),
            mode: self.mode,
            fingerprint,
            object_count: self.offsets.len() as u32,
            root,
        };

        let behaviors = self
            .behaviors
            .iter()
            .map(|&id| self.memory.behaviors().get(id).map(|b| b.name().to_string()))
            .collect::<Result<Vec<_>>>()?;
        let symbols: Vec<String> = self.symbols.into_iter().collect();

        log::debug!(
            "flattened {} objects from {} ({} payload bytes, {} fix-ups)",
            header.object_count,
            root_name(root),
            payload.len(),
            fixups.len()
        );

        let data = codec::write_envelope(&header, &behaviors, &symbols, &payload, &fixups);
        Ok(Envelope::from_bytes(data.freeze()))
    }

    fn reference(&mut self, target: Option<ObjRef>) {
        match target {
            None => {
                self.payload.put_word(RefWord::Null);
            }
            Some(target) if self.by_name(target) => {
                let name = self.memory.image().symbol(target);
                let symbol = self.symbol(name);
                self.payload.put_word(RefWord::Symbol(symbol));
            }
            Some(target) => {
                if let Some(position) = self.payload.put_word(RefWord::Offset(0)) {
                    self.patches.push((position, target));
                }
            }
        }
    }

    fn encode(&mut self, reference: ObjRef) -> Result<()> {
        let memory = self.memory;
        let object = memory.object(reference)?;
        let behavior = self.behaviors.insert_full(object.behavior()).0 as u16;
        let size = u32::try_from(object.header().size()).map_err(|_| {
            MemoryError::InvalidArgument(format!("{} too large to flatten", reference))
        })?;

        match object.body() {
            ObjectBody::Fields(fields) => {
                let map = fields.map();
                self.payload.record_header(behavior, RecordKind::Fields, size);
                self.payload.put_u32(map.slot_count());
                self.payload.put_u64(map.cached_bits());
                self.payload.put_u32(fields.bytes().len() as u32);
                self.payload.put_slice(fields.bytes());
                for &slot in fields.slots() {
                    self.reference(slot);
                }
            }
            ObjectBody::Table(table) => {
                let entries = table.chain_entries();
                self.payload.record_header(behavior, RecordKind::Table, size);
                self.payload.put_u8(table.policy().as_u8());
                self.payload.put_u32(table.bucket_count() as u32);
                self.payload.put_u32(entries.len() as u32);
                for (index, value) in entries {
                    self.reference(Some(index));
                    self.reference(value);
                }
            }
            ObjectBody::Handle(handle) => {
                let symbol = self.symbol(handle.name().to_string());
                self.payload.record_header(behavior, RecordKind::Proxy, size);
                self.payload.put_u32(symbol);
            }
        }
        Ok(())
    }
}

fn root_name(root: RefWord) -> String {
    match root {
        RefWord::Symbol(symbol) => format!("symbol #{}", symbol),
        RefWord::Offset(offset) => format!("offset {}", offset),
        RefWord::Null => "null".to_string(),
    }
}
