//! Envelope wire codec
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ "OMEV" │ format u32 │ interpreter version    │
//! │ mode u8 │ image fingerprint u64              │
//! │ object count u32 │ root word u64             │
//! │ behavior names │ symbol names                │
//! │ payload length u32 │ payload records ...     │
//! │ fix-up count u32 │ fix-up positions u32 ...  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Integers are little-endian; strings are a `u16` length followed by UTF-8.
//! A reference word is `0` for null, or a two-bit tag in the top bits over
//! a 62-bit operand: tag 1 is a payload offset, tag 2 a symbol index.
//!
//! Records, each starting at its payload offset:
//!
//! ```text
//! behavior u16 │ kind u8 │ size u32 │ body
//!   fields: slots u32, cached u64, byte length u32, bytes, slot words
//!   table:  policy u8, buckets u32, entries u32, (index word, value word)*
//!   proxy:  symbol u32
//! ```

use crate::config::MAX_BUCKETS;
use crate::error::EnvelopeError;
use crate::object::{ReferenceMap, HEADER_SIZE, SLOT_SIZE};
use crate::table::{IndexPolicy, ENTRY_SIZE};
use bytes::{Buf, BufMut, BytesMut};
use rustc_hash::FxHasher;
use std::hash::Hasher;

pub const MAGIC: &[u8; 4] = b"OMEV";

/// Wire format revision; any difference is a hard rejection
pub const FORMAT_VERSION: u32 = 1;

const TAG_SHIFT: u32 = 62;
const OPERAND_MASK: u64 = (1 << TAG_SHIFT) - 1;
const TAG_OFFSET: u64 = 1;
const TAG_SYMBOL: u64 = 2;

const KIND_FIELDS: u8 = 0;
const KIND_TABLE: u8 = 1;
const KIND_PROXY: u8 = 2;

type DecodeResult<T> = std::result::Result<T, EnvelopeError>;

/// What an envelope is for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeMode {
    /// Object transfer; image objects travel by symbol
    Envelope,
    /// Startup image payload; everything is copied
    Image,
}

impl EnvelopeMode {
    fn as_u8(self) -> u8 {
        match self {
            EnvelopeMode::Envelope => 0,
            EnvelopeMode::Image => 1,
        }
    }

    fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(EnvelopeMode::Envelope),
            1 => Some(EnvelopeMode::Image),
            _ => None,
        }
    }
}

/// A decoded reference word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefWord {
    Null,
    Offset(u32),
    Symbol(u32),
}

impl RefWord {
    pub fn encode(self) -> u64 {
        match self {
            RefWord::Null => 0,
            RefWord::Offset(offset) => TAG_OFFSET << TAG_SHIFT | offset as u64,
            RefWord::Symbol(symbol) => TAG_SYMBOL << TAG_SHIFT | symbol as u64,
        }
    }

    pub fn decode(word: u64) -> DecodeResult<Self> {
        let operand = word & OPERAND_MASK;
        let operand = u32::try_from(operand)
            .map_err(|_| EnvelopeError::Malformed(format!("reference word {:#x}", word)))?;
        match word >> TAG_SHIFT {
            0 if operand == 0 => Ok(RefWord::Null),
            TAG_OFFSET => Ok(RefWord::Offset(operand)),
            TAG_SYMBOL => Ok(RefWord::Symbol(operand)),
            _ => Err(EnvelopeError::Malformed(format!(
                "reference word {:#x}",
                word
            ))),
        }
    }
}

/// Fixed part of an envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub format_version: u32,
    pub interpreter_version: String,
    pub mode: EnvelopeMode,
    pub fingerprint: u64,
    pub object_count: u32,
    pub root: RefWord,
}

/// Where a reference word sits inside its record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    Slot(u32),
    EntryIndex(u32),
    EntryValue(u32),
}

/// A reference word and its payload position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordSite {
    pub position: u32,
    pub record: usize,
    pub site: Site,
    pub word: RefWord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordBody {
    Fields { map: ReferenceMap, bytes: Vec<u8> },
    Table { policy: IndexPolicy, buckets: u32, entries: u32 },
    Proxy { symbol: u32 },
}

impl RecordBody {
    /// Bytes the restored object is charged, before size-class rounding;
    /// proxies restore no object
    pub fn charged_bytes(&self) -> u64 {
        match self {
            RecordBody::Fields { map, bytes } => {
                (HEADER_SIZE + bytes.len()) as u64 + SLOT_SIZE as u64 * map.slot_count() as u64
            }
            RecordBody::Table {
                buckets, entries, ..
            } => HEADER_SIZE as u64 + 2 * (*buckets).max(*entries) as u64 * ENTRY_SIZE as u64,
            RecordBody::Proxy { .. } => 0,
        }
    }
}

/// One object record; its reference words are kept in [`Decoded::sites`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub offset: u32,
    pub behavior: u16,
    pub size: u32,
    pub body: RecordBody,
}

/// A fully parsed envelope
#[derive(Debug, Clone)]
pub struct Decoded {
    pub header: EnvelopeHeader,
    pub behaviors: Vec<String>,
    pub symbols: Vec<String>,
    pub records: Vec<Record>,
    /// Every reference word in payload order
    pub sites: Vec<WordSite>,
    pub fixups: Vec<u32>,
    pub payload_len: usize,
    /// [`payload_fingerprint`] of the payload bytes
    pub payload_hash: u64,
}

// ----------------------------------------------------------------------
// Writing
// ----------------------------------------------------------------------

/// Append-only payload builder that remembers where offset words go
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: BytesMut,
    fixups: Vec<u32>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> u32 {
        self.buf.len() as u32
    }

    pub fn record_header(&mut self, behavior: u16, kind: RecordKind, size: u32) {
        self.buf.put_u16_le(behavior);
        self.buf.put_u8(kind.tag());
        self.buf.put_u32_le(size);
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
    }

    pub fn put_u64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
    }

    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Write a word; offset words are returned for patching later
    pub fn put_word(&mut self, word: RefWord) -> Option<u32> {
        let position = self.position();
        self.buf.put_u64_le(word.encode());
        match word {
            RefWord::Offset(_) => {
                self.fixups.push(position);
                Some(position)
            }
            _ => None,
        }
    }

    /// Overwrite the offset word at `position`
    pub fn patch(&mut self, position: u32, offset: u32) {
        let start = position as usize;
        let word = RefWord::Offset(offset).encode().to_le_bytes();
        self.buf[start..start + 8].copy_from_slice(&word);
    }

    pub fn finish(self) -> (BytesMut, Vec<u32>) {
        (self.buf, self.fixups)
    }
}

/// Record kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Fields,
    Table,
    Proxy,
}

impl RecordKind {
    fn tag(self) -> u8 {
        match self {
            RecordKind::Fields => KIND_FIELDS,
            RecordKind::Table => KIND_TABLE,
            RecordKind::Proxy => KIND_PROXY,
        }
    }
}

/// Fingerprint of an image payload; identifies the image that envelope
/// symbols refer to
pub fn payload_fingerprint(payload: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(payload);
    hasher.write_usize(payload.len());
    hasher.finish()
}

fn put_str(buf: &mut BytesMut, value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    buf.put_u16_le(len as u16);
    buf.put_slice(&bytes[..len]);
}

/// Assemble a complete envelope
pub fn write_envelope(
    header: &EnvelopeHeader,
    behaviors: &[String],
    symbols: &[String],
    payload: &[u8],
    fixups: &[u32],
) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64 + payload.len() + fixups.len() * 4);
    buf.put_slice(MAGIC);
    buf.put_u32_le(header.format_version);
    put_str(&mut buf, &header.interpreter_version);
    buf.put_u8(header.mode.as_u8());
    buf.put_u64_le(header.fingerprint);
    buf.put_u32_le(header.object_count);
    buf.put_u64_le(header.root.encode());

    buf.put_u32_le(behaviors.len() as u32);
    for name in behaviors {
        put_str(&mut buf, name);
    }
    buf.put_u32_le(symbols.len() as u32);
    for name in symbols {
        put_str(&mut buf, name);
    }

    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);

    buf.put_u32_le(fixups.len() as u32);
    for &position in fixups {
        buf.put_u32_le(position);
    }
    buf
}

// ----------------------------------------------------------------------
// Reading
// ----------------------------------------------------------------------

/// Bounds-checked little-endian reader
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, needed: usize) -> DecodeResult<()> {
        if self.buf.remaining() < needed {
            return Err(EnvelopeError::Truncated {
                needed,
                remaining: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> DecodeResult<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> DecodeResult<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u32(&mut self) -> DecodeResult<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn u64(&mut self) -> DecodeResult<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn slice(&mut self, len: usize) -> DecodeResult<&'a [u8]> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    pub fn string(&mut self) -> DecodeResult<String> {
        let len = self.u16()? as usize;
        let bytes = self.slice(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| EnvelopeError::Malformed("string is not UTF-8".to_string()))
    }

    /// Element count, refusing counts the remaining bytes cannot hold
    fn count(&mut self, min_element: usize) -> DecodeResult<usize> {
        let count = self.u32()? as usize;
        let needed = count.saturating_mul(min_element);
        if needed > self.remaining() {
            return Err(EnvelopeError::Truncated {
                needed,
                remaining: self.remaining(),
            });
        }
        Ok(count)
    }
}

/// Parse the fixed header; stops before the name tables
pub fn read_header(reader: &mut Reader<'_>) -> DecodeResult<EnvelopeHeader> {
    if reader.slice(MAGIC.len())? != MAGIC {
        return Err(EnvelopeError::BadMagic);
    }
    let format_version = reader.u32()?;
    if format_version != FORMAT_VERSION {
        return Err(EnvelopeError::VersionMismatch {
            expected: FORMAT_VERSION.to_string(),
            found: format_version.to_string(),
        });
    }
    let interpreter_version = reader.string()?;
    let mode = EnvelopeMode::from_u8(reader.u8()?)
        .ok_or_else(|| EnvelopeError::Malformed("unknown envelope mode".to_string()))?;
    Ok(EnvelopeHeader {
        format_version,
        interpreter_version,
        mode,
        fingerprint: reader.u64()?,
        object_count: reader.u32()?,
        root: RefWord::decode(reader.u64()?)?,
    })
}

/// Parse a complete envelope, checking its internal consistency.
///
/// `max_objects` bounds the announced object count; `max_bytes` bounds the
/// charged size of any single record so a forged table cannot demand an
/// allocation larger than the memory could ever hold.
pub fn decode(buf: &[u8], max_objects: usize, max_bytes: usize) -> DecodeResult<Decoded> {
    let mut reader = Reader::new(buf);
    let header = read_header(&mut reader)?;
    if header.object_count as usize > max_objects {
        return Err(EnvelopeError::Malformed(format!(
            "{} objects exceed the limit of {}",
            header.object_count, max_objects
        )));
    }

    let behaviors = (0..reader.count(2)?)
        .map(|_| reader.string())
        .collect::<DecodeResult<Vec<_>>>()?;
    let symbols = (0..reader.count(2)?)
        .map(|_| reader.string())
        .collect::<DecodeResult<Vec<_>>>()?;

    let payload_len = reader.u32()? as usize;
    let payload = reader.slice(payload_len)?;
    let (records, sites) = decode_payload(payload, &behaviors, &symbols, max_bytes)?;

    let fixups = (0..reader.count(4)?)
        .map(|_| reader.u32())
        .collect::<DecodeResult<Vec<_>>>()?;
    if reader.remaining() != 0 {
        return Err(EnvelopeError::Malformed(format!(
            "{} trailing bytes",
            reader.remaining()
        )));
    }

    if records.len() != header.object_count as usize {
        return Err(EnvelopeError::Malformed(format!(
            "header announces {} objects, payload holds {}",
            header.object_count,
            records.len()
        )));
    }

    let decoded = Decoded {
        header,
        behaviors,
        symbols,
        records,
        sites,
        fixups,
        payload_len,
        payload_hash: payload_fingerprint(payload),
    };
    check_references(&decoded)?;
    Ok(decoded)
}

fn decode_payload(
    payload: &[u8],
    behaviors: &[String],
    symbols: &[String],
    max_bytes: usize,
) -> DecodeResult<(Vec<Record>, Vec<WordSite>)> {
    let mut reader = Reader::new(payload);
    let mut records = Vec::new();
    let mut sites = Vec::new();

    while reader.remaining() > 0 {
        let offset = (payload.len() - reader.remaining()) as u32;
        let record = records.len();
        let behavior = reader.u16()?;
        if behavior as usize >= behaviors.len() {
            return Err(EnvelopeError::Malformed(format!(
                "record at {} names behavior #{}",
                offset, behavior
            )));
        }
        let kind = reader.u8()?;
        let size = reader.u32()?;

        let mut word = |reader: &mut Reader<'_>, site: Site| -> DecodeResult<()> {
            let position = (payload.len() - reader.remaining()) as u32;
            let word = RefWord::decode(reader.u64()?)?;
            sites.push(WordSite {
                position,
                record,
                site,
                word,
            });
            Ok(())
        };

        let body = match kind {
            KIND_FIELDS => {
                let slots = reader.u32()?;
                let cached = reader.u64()?;
                let map = ReferenceMap::from_raw(slots, cached).ok_or_else(|| {
                    EnvelopeError::Malformed(format!("record at {}: bad cached bitmap", offset))
                })?;
                let len = reader.u32()? as usize;
                let bytes = reader.slice(len)?.to_vec();
                if (slots as usize).saturating_mul(8) > reader.remaining() {
                    return Err(EnvelopeError::Truncated {
                        needed: slots as usize * 8,
                        remaining: reader.remaining(),
                    });
                }
                for slot in 0..slots {
                    word(&mut reader, Site::Slot(slot))?;
                }
                RecordBody::Fields { map, bytes }
            }
            KIND_TABLE => {
                let policy = IndexPolicy::from_u8(reader.u8()?).ok_or_else(|| {
                    EnvelopeError::Malformed(format!("record at {}: bad index policy", offset))
                })?;
                let buckets = reader.u32()?;
                let entries = reader.u32()?;
                if buckets == 0 || entries as u64 > buckets as u64 * 2 {
                    return Err(EnvelopeError::Malformed(format!(
                        "record at {}: {} entries in {} buckets",
                        offset, entries, buckets
                    )));
                }
                if buckets as usize > MAX_BUCKETS {
                    return Err(EnvelopeError::Malformed(format!(
                        "record at {}: {} buckets exceed the limit of {}",
                        offset, buckets, MAX_BUCKETS
                    )));
                }
                for entry in 0..entries {
                    word(&mut reader, Site::EntryIndex(entry))?;
                    word(&mut reader, Site::EntryValue(entry))?;
                }
                RecordBody::Table {
                    policy,
                    buckets,
                    entries,
                }
            }
            KIND_PROXY => {
                let symbol = reader.u32()?;
                if symbol as usize >= symbols.len() {
                    return Err(EnvelopeError::Malformed(format!(
                        "proxy at {} names symbol #{}",
                        offset, symbol
                    )));
                }
                RecordBody::Proxy { symbol }
            }
            other => {
                return Err(EnvelopeError::Malformed(format!(
                    "record at {}: unknown kind {}",
                    offset, other
                )))
            }
        };
        if body.charged_bytes() > max_bytes as u64 {
            return Err(EnvelopeError::Malformed(format!(
                "record at {}: {} bytes exceed the heap of {}",
                offset,
                body.charged_bytes(),
                max_bytes
            )));
        }

        records.push(Record {
            offset,
            behavior,
            size,
            body,
        });
    }

    Ok((records, sites))
}

/// Offsets must name record starts, symbols must exist, table indices must
/// not be null, and the fix-up table must list exactly the offset words.
fn check_references(decoded: &Decoded) -> DecodeResult<()> {
    let starts = |offset: u32| {
        decoded
            .records
            .binary_search_by_key(&offset, |record| record.offset)
            .is_ok()
    };
    let valid = |word: RefWord| match word {
        RefWord::Null => true,
        RefWord::Offset(offset) => starts(offset),
        RefWord::Symbol(symbol) => (symbol as usize) < decoded.symbols.len(),
    };

    if !valid(decoded.header.root) || decoded.header.root == RefWord::Null {
        return Err(EnvelopeError::Malformed("bad root reference".to_string()));
    }

    let mut fixups = decoded.fixups.iter();
    for site in &decoded.sites {
        if !valid(site.word) {
            return Err(EnvelopeError::Malformed(format!(
                "dangling reference at {}",
                site.position
            )));
        }
        if matches!(site.site, Site::EntryIndex(_)) && site.word == RefWord::Null {
            return Err(EnvelopeError::Malformed(format!(
                "null table index at {}",
                site.position
            )));
        }
        if let RefWord::Offset(_) = site.word {
            if fixups.next() != Some(&site.position) {
                return Err(EnvelopeError::Malformed(format!(
                    "fix-up table does not list position {}",
                    site.position
                )));
            }
        }
    }
    if fixups.next().is_some() {
        return Err(EnvelopeError::Malformed(
            "fix-up table lists extra positions".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(object_count: u32) -> EnvelopeHeader {
        EnvelopeHeader {
            format_version: FORMAT_VERSION,
            interpreter_version: "0.1.0".to_string(),
            mode: EnvelopeMode::Envelope,
            fingerprint: 0,
            object_count,
            root: RefWord::Offset(0),
        }
    }

    /// A string record followed by an array pointing at it twice
    fn sample() -> BytesMut {
        let mut payload = PayloadWriter::new();
        payload.record_header(0, RecordKind::Fields, 2);
        payload.put_u32(0);
        payload.put_u64(0);
        payload.put_u32(2);
        payload.put_slice(b"hi");
        let array = payload.position();
        payload.record_header(1, RecordKind::Fields, 16);
        payload.put_u32(2);
        payload.put_u64(0);
        payload.put_u32(0);
        payload.put_word(RefWord::Offset(0));
        payload.put_word(RefWord::Offset(0));
        assert_eq!(array, 25);

        let (payload, fixups) = payload.finish();
        write_envelope(
            &header(2),
            &["String".to_string(), "Array".to_string()],
            &[],
            &payload,
            &fixups,
        )
    }

    #[test]
    fn test_word_tags() {
        assert_eq!(RefWord::decode(0).unwrap(), RefWord::Null);
        assert_eq!(
            RefWord::decode(RefWord::Offset(0).encode()).unwrap(),
            RefWord::Offset(0)
        );
        assert_eq!(
            RefWord::decode(RefWord::Symbol(7).encode()).unwrap(),
            RefWord::Symbol(7)
        );
        assert!(RefWord::decode(3 << 62).is_err());
        assert!(RefWord::decode(5).is_err());
    }

    #[test]
    fn test_decode_sample() {
        let buf = sample();
        let decoded = decode(&buf, 16, 1 << 20).unwrap();
        assert_eq!(decoded.records.len(), 2);
        assert_eq!(decoded.records[1].offset, 25);
        assert_eq!(decoded.fixups, vec![48, 56]);
        assert_eq!(decoded.sites.len(), 2);
        assert!(decoded.sites.iter().all(|s| s.record == 1));
    }

    #[test]
    fn test_bad_magic() {
        let mut buf = sample();
        buf[0] = b'X';
        assert!(matches!(decode(&buf, 16, 1 << 20), Err(EnvelopeError::BadMagic)));
    }

    #[test]
    fn test_format_version_mismatch() {
        let mut buf = sample();
        buf[4] = 99;
        assert!(matches!(
            decode(&buf, 16, 1 << 20),
            Err(EnvelopeError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn test_every_truncation_rejected() {
        let buf = sample();
        for len in 0..buf.len() {
            assert!(decode(&buf[..len], 16, 1 << 20).is_err(), "prefix {} accepted", len);
        }
    }

    #[test]
    fn test_object_limit() {
        let buf = sample();
        assert!(matches!(decode(&buf, 1, 1 << 20), Err(EnvelopeError::Malformed(_))));
    }

    #[test]
    fn test_oversized_table_rejected() {
        let table = |buckets: u32| {
            let mut payload = PayloadWriter::new();
            payload.record_header(0, RecordKind::Table, 0);
            payload.put_u8(0);
            payload.put_u32(buckets);
            payload.put_u32(0);
            let (payload, fixups) = payload.finish();
            write_envelope(
                &header(1),
                &["HashContents".to_string()],
                &[],
                &payload,
                &fixups,
            )
        };

        assert!(decode(&table(8), 16, 1 << 20).is_ok());
        // 2 * 32_768 * 32 bytes plus the header is past 2 MB
        assert!(matches!(
            decode(&table(32_768), 16, 2 << 20),
            Err(EnvelopeError::Malformed(_))
        ));
        assert!(matches!(
            decode(&table(0x7fff_ffff), 16, usize::MAX),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn test_dangling_offset_rejected() {
        let mut payload = PayloadWriter::new();
        payload.record_header(0, RecordKind::Fields, 8);
        payload.put_u32(1);
        payload.put_u64(0);
        payload.put_u32(0);
        payload.put_word(RefWord::Offset(3));
        let (payload, fixups) = payload.finish();
        let buf = write_envelope(&header(1), &["Array".to_string()], &[], &payload, &fixups);
        assert!(matches!(decode(&buf, 16, 1 << 20), Err(EnvelopeError::Malformed(_))));
    }
}
