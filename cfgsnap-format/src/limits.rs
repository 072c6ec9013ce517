//! Scanner resource limits

use crate::error::{Result, SnapError};
use serde::{Deserialize, Serialize};

/// Resource limits applied while walking a snapshot document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanLimits {
    /// Maximum container nesting depth, counting the top-level object (default: 128, hard: 1,024)
    pub max_nesting_depth: usize,
    /// Maximum raw bytes in a single array element (default: 16 MiB, hard: 256 MiB)
    pub max_element_bytes: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            max_nesting_depth: 128,
            max_element_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ScanLimits {
    /// Hard maximum limits that cannot be exceeded
    pub fn hard_maximums() -> Self {
        Self {
            max_nesting_depth: 1_024,
            max_element_bytes: 256 * 1024 * 1024,
        }
    }

    /// Validate limits against hard maximums
    pub fn validate(&self) -> Result<()> {
        let hard = Self::hard_maximums();

        if self.max_nesting_depth < 2 {
            return Err(SnapError::Config(format!(
                "max_nesting_depth {} must allow the top-level object and its array",
                self.max_nesting_depth
            )));
        }

        if self.max_nesting_depth > hard.max_nesting_depth {
            return Err(SnapError::Config(format!(
                "max_nesting_depth {} exceeds hard limit {}",
                self.max_nesting_depth, hard.max_nesting_depth
            )));
        }

        if self.max_element_bytes == 0 {
            return Err(SnapError::Config(
                "max_element_bytes must be greater than zero".to_string(),
            ));
        }

        if self.max_element_bytes > hard.max_element_bytes {
            return Err(SnapError::Config(format!(
                "max_element_bytes {} exceeds hard limit {}",
                self.max_element_bytes, hard.max_element_bytes
            )));
        }

        Ok(())
    }
}
