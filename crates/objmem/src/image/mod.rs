//! Image Module - persisted startup images
//!
//! An image file freezes every global root and everything reachable from
//! it. Loading one fills the image region, which is never collected.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ "OMIMAGE\0" │ format u32 │ interpreter version │
//! │ payload size u64                              │
//! ├───────────────────────────────────────────────┤
//! │ envelope (image mode)                         │
//! ├───────────────────────────────────────────────┤
//! │ "OMIMGEND"                                    │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! The envelope's root is a `Directory` mapping each global name to its
//! value. After loading, the globals are registered again and every global
//! value becomes a named image object, so envelopes exchanged between
//! memories that loaded the same image can refer to it by name.

pub mod space;

pub use space::ImageSpace;

use crate::envelope::codec::{Reader, FORMAT_VERSION};
use crate::envelope::restore::GlobalsOnly;
use crate::envelope::{EnvelopeMode, ProxyResolver};
use crate::error::{EnvelopeError, MemoryError, Result};
use crate::logging::GcEvent;
use crate::memory::{CollectionKind, ObjectMemory};
use crate::object::ObjRef;
use bytes::{BufMut, BytesMut};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

pub const IMAGE_MAGIC: &[u8; 8] = b"OMIMAGE\0";
pub const IMAGE_TRAILER: &[u8; 8] = b"OMIMGEND";

/// What a load brought in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSummary {
    /// Objects placed in the image region
    pub objects: usize,
    /// Global roots registered
    pub globals: usize,
    pub fingerprint: u64,
}

impl ObjectMemory {
    /// Serialize every global root into image file bytes
    pub fn save_image_bytes(&mut self) -> Result<Vec<u8>> {
        let globals: Vec<(String, ObjRef)> = self
            .roots
            .globals()
            .map(|(name, value)| (name.to_string(), value))
            .collect();

        let directory = self.allocate_collection(CollectionKind::Directory)?;
        let envelope = self.with_rooted(&[directory], |memory| {
            for (name, value) in &globals {
                memory.directory_put_str(directory, name, *value)?;
            }
            memory.flatten_as(directory, EnvelopeMode::Image)
        })?;

        let version = self.config.interpreter_version.as_bytes();
        let mut buf = BytesMut::with_capacity(envelope.len() + version.len() + 40);
        buf.put_slice(IMAGE_MAGIC);
        buf.put_u32_le(FORMAT_VERSION);
        buf.put_u16_le(version.len() as u16);
        buf.put_slice(version);
        buf.put_u64_le(envelope.len() as u64);
        buf.put_slice(envelope.as_bytes());
        buf.put_slice(IMAGE_TRAILER);

        log::debug!(
            "saved image: {} globals, {} bytes",
            globals.len(),
            buf.len()
        );
        Ok(buf.to_vec())
    }

    /// Write an image file
    pub fn save_image(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.save_image_bytes()?;
        std::fs::write(path.as_ref(), bytes)?;
        Ok(())
    }

    /// Load an image file, mapping it rather than reading it
    pub fn load_image(&mut self, path: impl AsRef<Path>) -> Result<ImageSummary> {
        self.load_image_with(path, &GlobalsOnly)
    }

    pub fn load_image_with(
        &mut self,
        path: impl AsRef<Path>,
        resolver: &dyn ProxyResolver,
    ) -> Result<ImageSummary> {
        let file = File::open(path.as_ref())?;
        if file.metadata()?.len() == 0 {
            return Err(EnvelopeError::Truncated {
                needed: IMAGE_MAGIC.len(),
                remaining: 0,
            }
            .into());
        }
        // SAFETY: the mapping is read-only and dropped before returning;
        // image files are not modified while an interpreter loads them.
        let map = unsafe { Mmap::map(&file)? };
        self.load_image_bytes_with(&map, resolver)
    }

    pub fn load_image_bytes(&mut self, bytes: &[u8]) -> Result<ImageSummary> {
        self.load_image_bytes_with(bytes, &GlobalsOnly)
    }

    /// Load image bytes into the image region; allowed once per memory
    pub fn load_image_bytes_with(
        &mut self,
        bytes: &[u8],
        resolver: &dyn ProxyResolver,
    ) -> Result<ImageSummary> {
        if self.image.is_loaded() {
            return Err(MemoryError::ImageAlreadyLoaded);
        }

        let payload = match unframe(bytes, &self.config.interpreter_version) {
            Ok(payload) => payload,
            Err(err) => {
                self.logger.log(GcEvent::RestoreFailed {
                    reason: err.to_string(),
                });
                return Err(err.into());
            }
        };

        let restored = self.restore_as(payload, EnvelopeMode::Image, resolver)?;
        let entries = self.collection_entries(restored.root)?;
        for (key, value) in &entries {
            let name = self.string_value(*key)?;
            self.roots.set_global(&name, *value);
            if value.is_image() && !self.image.set_name(&name, *value) {
                log::debug!("image global {} keeps its positional symbol", name);
            }
        }
        self.image.mark_loaded(restored.fingerprint);

        log::debug!(
            "loaded image {:#x}: {} objects, {} globals",
            restored.fingerprint,
            restored.objects,
            entries.len()
        );
        Ok(ImageSummary {
            objects: restored.objects,
            globals: entries.len(),
            fingerprint: restored.fingerprint,
        })
    }
}

/// Check the file framing and return the envelope it carries
fn unframe<'a>(
    bytes: &'a [u8],
    interpreter_version: &str,
) -> std::result::Result<&'a [u8], EnvelopeError> {
    let mut reader = Reader::new(bytes);
    if reader.slice(IMAGE_MAGIC.len())? != IMAGE_MAGIC {
        return Err(EnvelopeError::BadMagic);
    }
    let format = reader.u32()?;
    if format != FORMAT_VERSION {
        return Err(EnvelopeError::VersionMismatch {
            expected: FORMAT_VERSION.to_string(),
            found: format.to_string(),
        });
    }
    let version = reader.string()?;
    if version != interpreter_version {
        return Err(EnvelopeError::VersionMismatch {
            expected: interpreter_version.to_string(),
            found: version,
        });
    }

    let size = usize::try_from(reader.u64()?)
        .map_err(|_| EnvelopeError::Malformed("payload size".to_string()))?;
    if reader.remaining() < size.saturating_add(IMAGE_TRAILER.len()) {
        return Err(EnvelopeError::MissingTrailer);
    }
    let payload = reader.slice(size)?;
    if reader.slice(IMAGE_TRAILER.len())? != IMAGE_TRAILER || reader.remaining() != 0 {
        return Err(EnvelopeError::MissingTrailer);
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;

    fn memory() -> ObjectMemory {
        ObjectMemory::new(MemoryConfig::default()).unwrap()
    }

    fn saved() -> Vec<u8> {
        let mut memory = memory();
        let greeting = memory.allocate_string("hello").unwrap();
        memory.set_global("greeting", greeting).unwrap();
        memory.save_image_bytes().unwrap()
    }

    #[test]
    fn test_framing() {
        let bytes = saved();
        assert_eq!(&bytes[..8], IMAGE_MAGIC);
        assert_eq!(&bytes[bytes.len() - 8..], IMAGE_TRAILER);
        assert!(unframe(&bytes, crate::VERSION).is_ok());
    }

    #[test]
    fn test_load_registers_globals_in_image() {
        let bytes = saved();
        let mut fresh = memory();
        let summary = fresh.load_image_bytes(&bytes).unwrap();
        assert_eq!(summary.globals, 1);

        let greeting = fresh.global("greeting").unwrap();
        assert!(greeting.is_image());
        assert_eq!(fresh.string_value(greeting).unwrap(), "hello");
        assert_eq!(fresh.image().symbol(greeting), "greeting");
        assert_eq!(fresh.image().fingerprint(), summary.fingerprint);
    }

    #[test]
    fn test_second_load_rejected() {
        let bytes = saved();
        let mut fresh = memory();
        fresh.load_image_bytes(&bytes).unwrap();
        assert!(matches!(
            fresh.load_image_bytes(&bytes),
            Err(MemoryError::ImageAlreadyLoaded)
        ));
    }

    #[test]
    fn test_truncated_file_missing_trailer() {
        let bytes = saved();
        let mut fresh = memory();
        assert!(matches!(
            fresh.load_image_bytes(&bytes[..bytes.len() - 3]),
            Err(MemoryError::Envelope(EnvelopeError::MissingTrailer))
        ));
        assert!(fresh.image().is_empty());
        assert!(!fresh.image().is_loaded());
    }

    #[test]
    fn test_format_version_rejected() {
        let mut bytes = saved();
        bytes[8] = bytes[8].wrapping_add(1);
        let mut fresh = memory();
        assert!(matches!(
            fresh.load_image_bytes(&bytes),
            Err(MemoryError::Envelope(EnvelopeError::VersionMismatch { .. }))
        ));
    }

    #[test]
    fn test_corrupted_payload_rejected() {
        let mut bytes = saved();
        // Flip a byte of the string "hello" inside the payload
        let at = bytes.windows(5).position(|w| w == b"hello").unwrap();
        bytes[at] = b'j';
        let mut fresh = memory();
        assert!(matches!(
            fresh.load_image_bytes(&bytes),
            Err(MemoryError::Envelope(EnvelopeError::ImageMismatch { .. }))
        ));
        assert!(fresh.image().is_empty());
    }
}
