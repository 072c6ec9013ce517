//! cfgsnap I/O - Streaming transcoding pipeline and its collaborators
//!
//! This crate wires the primitives from `cfgsnap-format` into a complete
//! gzip JSON → gzip JSON-Lines transcoder:
//!
//! - gzip reader/writer adapters
//! - Bounded transfer coupler between the transform and delivery threads
//! - Object source/sink interfaces with filesystem and in-memory stores
//! - Pipeline coordinator running one request at a time
//! - Work intake (snapshot key filter, queue messages)

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod compression;
pub mod coupler;
pub mod intake;
pub mod pipeline;
mod runtime;
pub mod store;

// Re-export commonly used types
pub use cfgsnap_format::{ElementFormat, Result, ScanLimits, SnapError, TranscodeConfig};
pub use compression::{GzipReader, GzipWriter};
pub use coupler::{transfer_coupler, CouplerHandle, CouplerReader, CouplerStats, CouplerWriter};
pub use intake::{
    CompletedRequest, IntakeError, IntakeReport, ObjectEvent, SnapshotKeyFilter, WorkIntake,
    WorkMessage,
};
pub use pipeline::{
    PipelineState, ProcessingRequest, Stage, TranscodeError, TranscodeResult, Transcoder,
};
pub use runtime::RunMeasurement;
pub use store::{FsObjectStore, MemoryObjectStore, ObjectLocator, ObjectSink, ObjectSource, RawDocument};

use std::path::Path;

/// Locator addressing a local file through an [`FsObjectStore`] rooted at `""`:
/// the parent directory is the bucket and the file name the key.
pub fn file_locator(path: &Path) -> ObjectLocator {
    let bucket = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_string_lossy().into_owned(),
        _ => ".".to_string(),
    };
    let key = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    ObjectLocator::new(bucket, key)
}

/// Transcode one local gzip JSON file into a gzip JSON-Lines file.
///
/// The output is written next to its final name and only renamed into place
/// once the whole stream succeeded.
pub fn transcode_file(
    input: &Path,
    output: &Path,
    config: TranscodeConfig,
) -> std::result::Result<TranscodeResult, TranscodeError> {
    let request = ProcessingRequest {
        source: file_locator(input),
        destination: file_locator(output),
        expected_size: std::fs::metadata(input).map(|m| m.len()).unwrap_or(0),
    };

    let store = FsObjectStore::new("");
    let mut transcoder =
        Transcoder::new(&store, &store, config).map_err(|source| TranscodeError {
            stage: Stage::Fetch,
            locator: request.source.clone(),
            source,
        })?;
    transcoder.run(&request)
}
