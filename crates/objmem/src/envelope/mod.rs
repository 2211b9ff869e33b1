//! Envelope Module - flatten and restore object graphs
//!
//! An [`Envelope`] is a relocatable copy of everything reachable from one
//! root. Each object appears once, however many fields point at it;
//! references inside the payload are payload offsets, listed in a fix-up
//! table so restore can rewrite them in one linear pass.
//!
//! ```text
//! flatten(root)                         restore(envelope)
//! ─────────────                         ─────────────────
//! general marking from root             validate header, names, records
//! copy each object once, by offset      resolve proxies and image symbols
//! image objects → symbols               allocate every record
//! native handles → proxies              fix-up pass over offset words
//!                                       rebuild tables, return root
//! ```
//!
//! Envelopes in image mode are the payload of image files (see
//! [`crate::image`]); they copy image objects instead of naming them.

pub mod codec;
pub mod flatten;
pub mod restore;

pub use codec::{EnvelopeHeader, EnvelopeMode, RefWord, FORMAT_VERSION, MAGIC};
pub use restore::{ProxyResolver, Restored};

use crate::error::EnvelopeError;
use bytes::Bytes;

/// A flattened object graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    data: Bytes,
}

impl Envelope {
    /// Wrap bytes received from elsewhere; nothing is validated until restore
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Parse only the fixed header
    pub fn header(&self) -> Result<EnvelopeHeader, EnvelopeError> {
        codec::read_header(&mut codec::Reader::new(&self.data))
    }
}

impl AsRef<[u8]> for Envelope {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
