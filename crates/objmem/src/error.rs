//! Error Module - object memory error types
//!
//! # Error Categories
//!
//! ## Fatal
//! - `OutOfMemory` - heap exhaustion
//! - `Envelope` - malformed or version-mismatched envelope / image
//! - `ImageAlreadyLoaded` - a second image load into the same memory
//!
//! ## Contract violations
//! - `StaleReference` - handle to a reclaimed object
//! - `InvalidState` - collector state machine violation
//! - `WrongKind` / `FieldOutOfBounds` - access that does not fit the object
//!
//! ## Recoverable
//! - `TableFull` - resolved by the owner growing the table and merging
//!
//! Absent table indices are not errors; lookups return `Option`.

use crate::config::ConfigError;
use crate::object::ObjRef;
use thiserror::Error;

/// Main error type for all object memory operations
///
/// # Examples
///
/// ```rust
/// use objmem::error::MemoryError;
///
/// fn report(err: MemoryError) {
///     match err {
///         MemoryError::OutOfMemory { requested, available } => {
///             eprintln!("OOM: requested {}, available {}", requested, available);
///         }
///         other if other.is_bug() => eprintln!("bug: {}", other),
///         other => eprintln!("error: {}", other),
///     }
/// }
/// ```
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Out of memory - heap exhaustion
    ///
    /// **When returned:** the request does not fit under `max_heap_bytes`,
    /// even after a collection when `collect_on_exhaustion` is set
    ///
    /// **Recovery strategy:** none; the caller has no storage to proceed with
    #[error("Out of memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory { requested: usize, available: usize },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Handle to an object whose slot has been reclaimed
    ///
    /// **When returned:** a reference was kept outside the root set across a
    /// collection and used afterwards
    ///
    /// **Recovery strategy:** cannot recover - register the object as a root
    #[error("Stale reference: {reference:?} no longer names a live object")]
    StaleReference { reference: ObjRef },

    #[error("Field {index} out of bounds for object with {length} reference fields")]
    FieldOutOfBounds { index: usize, length: usize },

    /// Operation does not apply to this kind of object
    ///
    /// **Example scenario:** `table_get` on a string
    #[error("Wrong object kind: expected {expected}, got {actual}")]
    WrongKind { expected: String, actual: String },

    #[error("Unknown behavior: {0}")]
    UnknownBehavior(String),

    #[error("Behavior {0} already registered with a different layout")]
    DuplicateBehavior(String),

    #[error("Invalid behavior id: {0}")]
    InvalidBehavior(u16),

    /// Hash table has no free entry
    ///
    /// **When returned:** `put`/`add` on raw contents with an empty free chain
    ///
    /// **Recovery strategy:** allocate larger contents and `merge`; the
    /// collection operations do this automatically
    #[error("Hash table full: capacity {capacity}")]
    TableFull { capacity: usize },

    /// Invalid state
    ///
    /// **When returned:** collector state machine violation, e.g. a
    /// collection requested while one is already running
    ///
    /// **Recovery strategy:** cannot recover - indicates bug
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Root not found: {0}")]
    RootNotFound(String),

    #[error("An image has already been loaded into this memory")]
    ImageAlreadyLoaded,

    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(self, MemoryError::TableFull { .. })
    }

    /// Check if this error indicates a bug in the calling code
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            MemoryError::StaleReference { .. } | MemoryError::InvalidState { .. }
        )
    }

    pub(crate) fn wrong_kind(expected: &str, actual: &str) -> Self {
        MemoryError::WrongKind {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Errors decoding an envelope or image file.
///
/// All of them reject the whole buffer: no partially restored graph is
/// left reachable.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("Bad magic number")]
    BadMagic,

    /// Producer and consumer disagree on the format version
    ///
    /// **Recovery strategy:** none; no forward/backward compatibility
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: String, found: String },

    #[error("Truncated buffer: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Malformed envelope: {0}")]
    Malformed(String),

    #[error("Envelope names unknown behavior {0}")]
    UnknownBehavior(String),

    /// A native-handle proxy that the receiving side could not resolve
    #[error("Unresolved proxy: {0}")]
    UnresolvedProxy(String),

    #[error("Unresolved image symbol: {0}")]
    UnresolvedSymbol(String),

    #[error("Image fingerprint mismatch: expected {expected:#x}, found {found:#x}")]
    ImageMismatch { expected: u64, found: u64 },

    #[error("Envelope mode does not match the requested operation")]
    WrongMode,

    #[error("Missing trailer: image file truncated")]
    MissingTrailer,
}

/// Result type alias for object memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;
