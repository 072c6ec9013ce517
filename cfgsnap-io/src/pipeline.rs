//! Concurrent fetch → transform → deliver pipeline for one snapshot
//!
//! A run fetches the compressed source into memory, then starts two scoped
//! threads joined by a [`transfer_coupler`]:
//!
//! - `cfgsnap-transform`: gunzip → [`ArrayScanner`] → [`LineEmitter`] → gzip → coupler
//! - `cfgsnap-deliver`: coupler → [`ObjectSink::deliver`]
//!
//! The first failure raises the shared [`CancelToken`] and closes its side of
//! the coupler so the peer unblocks. Both threads are always joined before
//! [`Transcoder::run`] returns.

use crate::compression::{GzipReader, GzipWriter};
use crate::coupler::{transfer_coupler, CouplerReader, CouplerWriter};
use crate::runtime::RunTimer;
use crate::store::{ObjectLocator, ObjectSink, ObjectSource, RawDocument};
use cfgsnap_format::{
    ArrayScanner, CancelToken, LineEmitter, ScanOptions, SnapError, TranscodeConfig,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// One unit of work: transcode `source` into `destination`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingRequest {
    /// Compressed snapshot to read
    pub source: ObjectLocator,
    /// Where the compressed JSON-Lines output is committed
    pub destination: ObjectLocator,
    /// Declared source size, used as a pre-allocation hint
    pub expected_size: u64,
}

/// Outcome of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeResult {
    /// Lines written to the output
    pub item_count: u64,
    /// Wall-clock time of the whole run, fetch included
    pub duration: Duration,
    /// Compressed bytes committed at the destination
    pub compressed_bytes: u64,
    /// Largest number of bytes held by the transfer coupler at once
    pub peak_buffered_bytes: usize,
    /// Peak process RSS, when memory measurement is enabled
    pub peak_rss_bytes: Option<u64>,
}

impl TranscodeResult {
    /// Duration in whole milliseconds
    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Pipeline stage that produced an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Retrieving the source object
    Fetch,
    /// Decompressing, scanning, emitting and recompressing
    Transform,
    /// Streaming output to the sink
    Deliver,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Fetch => "fetch",
            Stage::Transform => "transform",
            Stage::Deliver => "deliver",
        })
    }
}

/// Terminal error of a run, with the stage and locator it concerns
#[derive(Debug, Error)]
#[error("{stage} failed for {locator}: {source}")]
pub struct TranscodeError {
    /// Stage that failed
    pub stage: Stage,
    /// Source locator for fetch/transform failures, destination for delivery
    pub locator: ObjectLocator,
    /// Classified cause
    #[source]
    pub source: SnapError,
}

impl TranscodeError {
    /// Classified cause
    pub fn kind(&self) -> &SnapError {
        &self.source
    }
}

/// Lifecycle of a [`Transcoder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No run started yet
    Idle,
    /// A run is in progress
    Running,
    /// The last run succeeded
    Succeeded,
    /// The last run failed
    Failed,
}

/// Keeps the error that explains a run's failure.
///
/// The first error recorded wins, except that a consequential error (one a
/// task sees only because its peer already failed) is replaced by the first
/// primary error that follows it.
#[derive(Default)]
struct FirstFailure {
    slot: Mutex<Option<(Stage, SnapError)>>,
}

impl FirstFailure {
    fn record(&self, stage: Stage, err: SnapError) {
        let mut slot = self
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let replace = match &*slot {
            None => true,
            Some((_, existing)) => existing.is_consequential() && !err.is_consequential(),
        };
        if replace {
            *slot = Some((stage, err));
        } else {
            debug!(stage = %stage, error = %err, "secondary failure suppressed");
        }
    }

    fn take(self) -> Option<(Stage, SnapError)> {
        self.slot
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Runs processing requests one at a time against a source and a sink
pub struct Transcoder<'a> {
    source: &'a dyn ObjectSource,
    sink: &'a dyn ObjectSink,
    config: TranscodeConfig,
    state: PipelineState,
}

impl<'a> Transcoder<'a> {
    /// Create a transcoder after validating `config`
    pub fn new(
        source: &'a dyn ObjectSource,
        sink: &'a dyn ObjectSink,
        config: TranscodeConfig,
    ) -> Result<Self, SnapError> {
        config.validate()?;
        Ok(Self {
            source,
            sink,
            config,
            state: PipelineState::Idle,
        })
    }

    /// Active configuration
    pub fn config(&self) -> &TranscodeConfig {
        &self.config
    }

    /// State after the most recent call to [`Transcoder::run`]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Process `request` to a terminal result.
    pub fn run(&mut self, request: &ProcessingRequest) -> Result<TranscodeResult, TranscodeError> {
        self.state = PipelineState::Running;
        let outcome = self.execute(request);
        self.state = match outcome {
            Ok(_) => PipelineState::Succeeded,
            Err(_) => PipelineState::Failed,
        };
        outcome
    }

    fn execute(&self, request: &ProcessingRequest) -> Result<TranscodeResult, TranscodeError> {
        let timer = RunTimer::start(self.config.measure_memory);

        info!(
            source = %request.source,
            destination = %request.destination,
            key = %self.config.target_key,
            size = request.expected_size,
            "start processing"
        );

        let raw = self
            .source
            .fetch(&request.source, self.config.size_hint(request.expected_size))
            .map_err(|source| {
                warn!(source_locator = %request.source, error = %source, "fetch failed");
                TranscodeError {
                    stage: Stage::Fetch,
                    locator: request.source.clone(),
                    source,
                }
            })?;

        let cancel = CancelToken::new();
        let failures = FirstFailure::default();
        let (writer, reader) = transfer_coupler(self.config.coupler_capacity, cancel.clone());
        let coupler = writer.handle();
        let options = ScanOptions::from_config(&self.config);
        let level = self.config.compression_level;

        let (items, delivered) = {
            let cancel = &cancel;
            let failures = &failures;
            let sink = self.sink;
            let destination = &request.destination;

            thread::scope(|scope| {
                let producer = thread::Builder::new()
                    .name("cfgsnap-transform".to_string())
                    .spawn_scoped(scope, move || {
                        transform(raw, writer, options, level, cancel, failures)
                    });
                let consumer = thread::Builder::new()
                    .name("cfgsnap-deliver".to_string())
                    .spawn_scoped(scope, move || {
                        deliver(sink, destination, reader, cancel, failures)
                    });

                let items = join_task(producer, Stage::Transform, cancel, failures);
                let delivered = join_task(consumer, Stage::Deliver, cancel, failures);
                (items, delivered)
            })
        };

        if let Some((stage, source)) = failures.take() {
            let locator = match stage {
                Stage::Deliver => request.destination.clone(),
                Stage::Fetch | Stage::Transform => request.source.clone(),
            };
            warn!(
                stage = %stage,
                source_locator = %request.source,
                destination = %request.destination,
                elapsed_ms = u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX),
                error = %source,
                "processing failed"
            );
            return Err(TranscodeError {
                stage,
                locator,
                source,
            });
        }

        let (Some(item_count), Some(compressed_bytes)) = (items, delivered) else {
            return Err(TranscodeError {
                stage: Stage::Transform,
                locator: request.source.clone(),
                source: SnapError::Internal("pipeline finished without a result".to_string()),
            });
        };

        let measurement = timer.finish();
        let result = TranscodeResult {
            item_count,
            duration: measurement.wall_time,
            compressed_bytes,
            peak_buffered_bytes: coupler.stats().high_water,
            peak_rss_bytes: measurement.peak_rss_bytes,
        };

        info!(
            source = %request.source,
            destination = %request.destination,
            count = result.item_count,
            duration_ms = result.duration_ms(),
            compressed_bytes = result.compressed_bytes,
            "finished processing"
        );

        Ok(result)
    }
}

/// Producer task. Returns the element count, or `None` after recording a failure.
fn transform(
    raw: RawDocument,
    writer: CouplerWriter,
    options: ScanOptions,
    level: u32,
    cancel: &CancelToken,
    failures: &FirstFailure,
) -> Option<u64> {
    let coupler = writer.handle();
    let mut scanner = ArrayScanner::new(GzipReader::new(raw.into_reader()), options);
    let mut emitter = LineEmitter::new(GzipWriter::new(writer, level));

    let outcome = match emitter.emit_all(&mut scanner, cancel) {
        Ok(count) => emitter
            .into_inner()
            .finish()
            .map(|writer| {
                writer.close();
                count
            }),
        Err(err) => Err(err),
    };

    match outcome {
        Ok(count) => Some(count),
        Err(err) => {
            let reason = err.to_string();
            failures.record(Stage::Transform, err);
            cancel.cancel();
            // Abort before the encoder is dropped so its final flush can
            // never be mistaken for a complete stream.
            coupler.abort(reason);
            None
        }
    }
}

/// Consumer task. Returns the committed byte count, or `None` after recording a failure.
fn deliver(
    sink: &dyn ObjectSink,
    destination: &ObjectLocator,
    mut reader: CouplerReader,
    cancel: &CancelToken,
    failures: &FirstFailure,
) -> Option<u64> {
    match sink.deliver(destination, &mut reader) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            failures.record(Stage::Deliver, err);
            cancel.cancel();
            None
        }
    }
}

fn join_task<T>(
    spawned: std::io::Result<ScopedJoinHandle<'_, Option<T>>>,
    stage: Stage,
    cancel: &CancelToken,
    failures: &FirstFailure,
) -> Option<T> {
    let failure = match spawned {
        Ok(handle) => match handle.join() {
            Ok(value) => return value,
            Err(_) => SnapError::Internal(format!("{} thread panicked", stage)),
        },
        Err(err) => SnapError::Internal(format!("failed to spawn {} thread: {}", stage, err)),
    };
    failures.record(stage, failure);
    cancel.cancel();
    None
}
