//! cfgsnap Format - Core primitives for snapshot-to-JSON-Lines transcoding
//!
//! This crate provides the parts of the transcoder that need nothing beyond
//! `std::io` traits:
//!
//! - Error taxonomy and `io::Error` classification markers
//! - Scanner resource limits and transcoder configuration
//! - Token-level scanner for one top-level array
//! - JSON-Lines emitter
//! - Cancellation token shared by pipeline tasks

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod config;
pub mod emitter;
pub mod error;
pub mod limits;
pub mod scanner;

// Re-export commonly used types
pub use cancel::CancelToken;
pub use config::{ElementFormat, TranscodeConfig};
pub use emitter::LineEmitter;
pub use error::{MalformedReason, Result, SnapError, StreamFault};
pub use limits::ScanLimits;
pub use scanner::{ArrayScanner, ElementBoundary, Elements, ScanOptions};
