//! Configuration Module - object memory tuning parameters
//!
//! Configuration can be built in code, read from `OBJMEM_*` environment
//! variables, or parsed from JSON.

use serde::{Deserialize, Serialize};

/// Main configuration for an [`ObjectMemory`](crate::memory::ObjectMemory)
///
/// # Examples
///
/// ```rust
/// use objmem::MemoryConfig;
///
/// let config = MemoryConfig {
///     max_heap_bytes: 8 * 1024 * 1024,
///     verbose: true,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Upper bound on bytes charged to live heap objects
    ///
    /// Allocation beyond this fails with `OutOfMemory`.
    /// Default: 64MB
    pub max_heap_bytes: usize,

    /// Byte budget of one allocation segment
    ///
    /// Objects larger than a segment get a dedicated segment.
    /// Default: 64 OS pages
    pub segment_bytes: usize,

    /// Run one collection and retry when an allocation does not fit
    ///
    /// Default: true
    pub collect_on_exhaustion: bool,

    /// Bucket count for newly created collections
    ///
    /// Default: 17
    pub default_bucket_count: usize,

    /// Log every collection cycle at info level
    ///
    /// Default: false
    pub verbose: bool,

    /// Number of GC events kept in the in-memory history
    ///
    /// Default: 64
    pub event_history: usize,

    /// Interpreter version written into envelopes and image files
    ///
    /// Readers reject files written by a different interpreter version.
    /// Default: crate version
    pub interpreter_version: String,

    /// Upper bound on objects accepted from one envelope
    ///
    /// Default: 1M objects
    pub max_envelope_objects: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            max_heap_bytes: 64 * MB,
            segment_bytes: page_size::get() * 64,
            collect_on_exhaustion: true,
            default_bucket_count: 17,
            verbose: false,
            event_history: 64,
            interpreter_version: crate::VERSION.to_string(),
            max_envelope_objects: 1 << 20,
        }
    }
}

impl MemoryConfig {
    /// Validate configuration
    ///
    /// # Examples
    ///
    /// ```rust
    /// use objmem::MemoryConfig;
    ///
    /// let config = MemoryConfig {
    ///     max_heap_bytes: 0,
    ///     ..Default::default()
    /// };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_heap_bytes == 0 {
            return Err(ConfigError::InvalidHeapSize(
                "max_heap_bytes must be > 0".to_string(),
            ));
        }

        if self.segment_bytes < KB {
            return Err(ConfigError::InvalidSegmentSize(
                "segment_bytes must be at least 1KB".to_string(),
            ));
        }

        if self.segment_bytes > self.max_heap_bytes {
            return Err(ConfigError::InvalidSegmentSize(
                "segment_bytes cannot exceed max_heap_bytes".to_string(),
            ));
        }

        if self.default_bucket_count == 0 || self.default_bucket_count > MAX_BUCKETS {
            return Err(ConfigError::InvalidBucketCount(format!(
                "default_bucket_count must be between 1 and {}",
                MAX_BUCKETS
            )));
        }

        if self.interpreter_version.is_empty() || self.interpreter_version.len() > 255 {
            return Err(ConfigError::InvalidVersion(
                "interpreter_version must be 1..=255 bytes".to_string(),
            ));
        }

        Ok(())
    }

    /// Build configuration from environment variables
    ///
    /// Overrides defaults with environment variables:
    /// - OBJMEM_MAX_HEAP
    /// - OBJMEM_SEGMENT_BYTES
    /// - OBJMEM_COLLECT_ON_EXHAUSTION
    /// - OBJMEM_BUCKETS
    /// - OBJMEM_VERBOSE
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("OBJMEM_MAX_HEAP") {
            if let Ok(size) = val.parse::<usize>() {
                config.max_heap_bytes = size;
            }
        }

        if let Ok(val) = std::env::var("OBJMEM_SEGMENT_BYTES") {
            if let Ok(size) = val.parse::<usize>() {
                config.segment_bytes = size;
            }
        }

        if let Ok(val) = std::env::var("OBJMEM_COLLECT_ON_EXHAUSTION") {
            config.collect_on_exhaustion = parse_flag(&val);
        }

        if let Ok(val) = std::env::var("OBJMEM_BUCKETS") {
            if let Ok(buckets) = val.parse::<usize>() {
                config.default_bucket_count = buckets;
            }
        }

        if let Ok(val) = std::env::var("OBJMEM_VERBOSE") {
            config.verbose = parse_flag(&val);
        }

        config
    }

    /// Parse configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: MemoryConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid heap size: {0}")]
    InvalidHeapSize(String),

    #[error("Invalid segment size: {0}")]
    InvalidSegmentSize(String),

    #[error("Invalid bucket count: {0}")]
    InvalidBucketCount(String),

    #[error("Invalid interpreter version: {0}")]
    InvalidVersion(String),

    #[error("Configuration parse error: {0}")]
    Parse(String),
}

// ============================================================================
// CONSTANTS & HELPERS
// ============================================================================

pub(crate) const KB: usize = 1024;
pub(crate) const MB: usize = 1024 * 1024;

/// Largest bucket count a table may be created with
pub const MAX_BUCKETS: usize = 1 << 24;

fn parse_flag(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}
