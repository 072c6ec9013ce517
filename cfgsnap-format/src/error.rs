//! Error types for cfgsnap

use std::fmt;
use std::io;
use thiserror::Error;

/// cfgsnap error types
#[derive(Debug, Error)]
pub enum SnapError {
    /// The source object could not be retrieved.
    #[error("Source unavailable: {locator}: {source}")]
    SourceUnavailable {
        /// Locator of the object that failed to load
        locator: String,
        /// Underlying transport error
        #[source]
        source: io::Error,
    },
    /// The source object does not exist.
    #[error("Object not found: {locator}")]
    NotFound {
        /// Locator of the missing object
        locator: String,
    },
    /// Compressed input is corrupt or truncated.
    #[error("Decompression error: {0}")]
    Decompression(#[source] io::Error),
    /// Decoded input is not a well-formed snapshot document.
    #[error("Malformed input at byte {offset}: {reason}")]
    MalformedInput {
        /// Absolute offset in the decoded stream where the problem was detected
        offset: u64,
        /// What was wrong
        reason: MalformedReason,
    },
    /// The read side of the transfer coupler went away before the writer finished.
    #[error("Transfer coupling closed")]
    CouplingClosed,
    /// The destination rejected or failed to commit the output.
    #[error("Destination error: {locator}: {source}")]
    Destination {
        /// Locator of the destination object
        locator: String,
        /// Underlying transport error
        #[source]
        source: io::Error,
    },
    /// The run was cancelled because a sibling task failed.
    #[error("Pipeline cancelled")]
    Cancelled,
    /// The producing side of the coupler aborted with the given reason.
    #[error("Upstream aborted: {0}")]
    Aborted(String),
    /// A configured resource limit was exceeded.
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),
    /// Configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),
    /// I/O operation failed while reading or writing data.
    #[error("I/O error: {0}")]
    Io(io::Error),
    /// JSON parsing or serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Internal invariant was violated.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SnapError {
    /// Build a malformed-input error at `offset`.
    pub fn malformed(offset: u64, reason: MalformedReason) -> Self {
        SnapError::MalformedInput { offset, reason }
    }

    /// True for errors a task only observes because its peer failed first
    /// or the run was cancelled.
    pub fn is_consequential(&self) -> bool {
        matches!(
            self,
            SnapError::CouplingClosed | SnapError::Cancelled | SnapError::Aborted(_)
        )
    }
}

/// Why a document was rejected by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    /// Top-level value is not an object.
    NotAnObject,
    /// Target key is present but its value is not an array.
    TargetNotArray {
        /// The key that was matched
        key: String,
    },
    /// Stream ended inside a value or before the top-level object closed.
    UnexpectedEof,
    /// An unexpected byte was found.
    UnexpectedByte {
        /// The offending byte
        found: u8,
        /// What the scanner expected at this point
        expected: &'static str,
    },
    /// A string contained an invalid escape or control character.
    InvalidString(&'static str),
    /// A number did not follow the JSON grammar.
    InvalidNumber,
    /// A `true`, `false` or `null` literal was misspelled.
    InvalidLiteral,
    /// Non-whitespace bytes follow the top-level object.
    TrailingData,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedReason::NotAnObject => write!(f, "top-level value is not an object"),
            MalformedReason::TargetNotArray { key } => {
                write!(f, "value of '{}' is not an array", key)
            }
            MalformedReason::UnexpectedEof => write!(f, "unexpected end of input"),
            MalformedReason::UnexpectedByte { found, expected } => {
                if found.is_ascii_graphic() {
                    write!(f, "found '{}', expected {}", *found as char, expected)
                } else {
                    write!(f, "found byte 0x{:02x}, expected {}", found, expected)
                }
            }
            MalformedReason::InvalidString(detail) => write!(f, "invalid string: {}", detail),
            MalformedReason::InvalidNumber => write!(f, "invalid number"),
            MalformedReason::InvalidLiteral => write!(f, "invalid literal"),
            MalformedReason::TrailingData => write!(f, "trailing data after top-level object"),
        }
    }
}

/// Marker carried inside an [`io::Error`] so adapter failures keep their
/// classification when they cross a `Read`/`Write` boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFault {
    /// The compressed stream could not be decoded.
    Corrupt(String),
    /// The peer half of the coupler is gone.
    Closed,
    /// The run was cancelled.
    Cancelled,
    /// The producer closed the coupler with an error.
    Aborted(String),
}

impl fmt::Display for StreamFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFault::Corrupt(detail) => write!(f, "corrupt compressed stream: {}", detail),
            StreamFault::Closed => write!(f, "transfer coupling closed"),
            StreamFault::Cancelled => write!(f, "pipeline cancelled"),
            StreamFault::Aborted(reason) => write!(f, "upstream aborted: {}", reason),
        }
    }
}

impl std::error::Error for StreamFault {}

impl StreamFault {
    /// Wrap this fault in an [`io::Error`] of the given kind.
    pub fn into_io(self, kind: io::ErrorKind) -> io::Error {
        io::Error::new(kind, self)
    }

    /// Recover a fault previously wrapped with [`StreamFault::into_io`].
    pub fn from_io(err: &io::Error) -> Option<&StreamFault> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<StreamFault>())
    }
}

impl From<io::Error> for SnapError {
    fn from(err: io::Error) -> Self {
        match StreamFault::from_io(&err) {
            Some(StreamFault::Corrupt(_)) => SnapError::Decompression(err),
            Some(StreamFault::Closed) => SnapError::CouplingClosed,
            Some(StreamFault::Cancelled) => SnapError::Cancelled,
            Some(StreamFault::Aborted(reason)) => SnapError::Aborted(reason.clone()),
            None => SnapError::Io(err),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SnapError>;
