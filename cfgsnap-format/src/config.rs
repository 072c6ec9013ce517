//! Transcoding configuration

use crate::error::{Result, SnapError};
use crate::limits::ScanLimits;
use serde::{Deserialize, Serialize};

/// Field extracted from AWS Config snapshots
pub const DEFAULT_TARGET_KEY: &str = "configurationItems";

/// Default bounded buffer between the transform and delivery threads
pub const DEFAULT_COUPLER_CAPACITY: usize = 64 * 1024;

/// Default gzip level for the output stream
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Pre-allocation used when a request carries no usable size
pub const DEFAULT_SIZE_HINT: usize = 60_000_000;

/// Largest pre-allocation honoured from a request's declared size
pub const MAX_SIZE_HINT: usize = 1024 * 1024 * 1024;

/// How captured array elements are written out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementFormat {
    /// Exact source bytes of each element
    #[default]
    Original,
    /// Source bytes with insignificant whitespace removed
    Compact,
}

/// Configuration for one transcoder instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TranscodeConfig {
    /// Top-level field whose array elements become output lines
    pub target_key: String,
    /// Element rendering
    pub element_format: ElementFormat,
    /// Transfer coupler capacity in bytes
    pub coupler_capacity: usize,
    /// gzip level (0-9)
    pub compression_level: u32,
    /// Bucket that receives transcoded objects
    pub output_bucket: Option<String>,
    /// Prefix prepended to the source key to form the destination key
    pub output_prefix: String,
    /// Pre-allocation used when a request declares no size
    pub default_size_hint: usize,
    /// Sample peak RSS while a run is in flight
    pub measure_memory: bool,
    /// Scanner resource limits
    pub limits: ScanLimits,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            target_key: DEFAULT_TARGET_KEY.to_string(),
            element_format: ElementFormat::Original,
            coupler_capacity: DEFAULT_COUPLER_CAPACITY,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            output_bucket: None,
            output_prefix: String::new(),
            default_size_hint: DEFAULT_SIZE_HINT,
            measure_memory: false,
            limits: ScanLimits::default(),
        }
    }
}

impl TranscodeConfig {
    /// Check every field, returning the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.target_key.is_empty() {
            return Err(SnapError::Config("target_key must not be empty".to_string()));
        }
        if self.coupler_capacity == 0 {
            return Err(SnapError::Config(
                "coupler_capacity must be greater than zero".to_string(),
            ));
        }
        if self.compression_level > 9 {
            return Err(SnapError::Config(format!(
                "compression_level {} is outside 0-9",
                self.compression_level
            )));
        }
        if let Some(bucket) = &self.output_bucket {
            if bucket.trim().is_empty() {
                return Err(SnapError::Config(
                    "output_bucket must not be blank when set".to_string(),
                ));
            }
        }
        self.limits.validate()
    }

    /// Pre-allocation to use for a request that declared `expected_size` bytes
    pub fn size_hint(&self, expected_size: u64) -> usize {
        if expected_size == 0 {
            return self.default_size_hint.min(MAX_SIZE_HINT);
        }
        usize::try_from(expected_size)
            .unwrap_or(MAX_SIZE_HINT)
            .min(MAX_SIZE_HINT)
    }

    /// Destination key for a source key: `output_prefix + key` with
    /// surrounding slashes trimmed
    pub fn destination_key(&self, source_key: &str) -> String {
        let prefix = self.output_prefix.trim_matches('/');
        format!("{}{}", prefix, source_key)
            .trim_matches('/')
            .to_string()
    }
}
