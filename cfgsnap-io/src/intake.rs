//! Work intake: snapshot key filtering, queue messages and sequential processing

use crate::pipeline::{ProcessingRequest, TranscodeError, TranscodeResult, Transcoder};
use crate::store::ObjectLocator;
use cfgsnap_format::{Result, SnapError, TranscodeConfig};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Keys AWS Config uses for delivered configuration snapshots
pub const DEFAULT_SNAPSHOT_KEY_PATTERN: &str =
    r"AWSLogs/\d+/Config/[^/]+/\d+/\d+/\d+/ConfigSnapshot/.+";

/// Notification that an object was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectEvent {
    /// Bucket the object was written to
    pub bucket: String,
    /// Object key
    pub key: String,
    /// Object size in bytes
    #[serde(default)]
    pub size: u64,
}

/// Queue body describing one snapshot to transcode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WorkMessage {
    /// Source bucket
    pub bucket: String,
    /// Source key
    pub key: String,
    /// Declared source size in bytes
    #[serde(default)]
    pub size: u64,
}

impl WorkMessage {
    /// Parse a queue body
    pub fn from_json(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }

    /// Queue body for this message
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Route this message to a destination using `config`'s output bucket and prefix
    pub fn into_request(self, config: &TranscodeConfig) -> Result<ProcessingRequest> {
        let bucket = config
            .output_bucket
            .as_deref()
            .ok_or_else(|| SnapError::Config("output_bucket is not configured".to_string()))?;
        let destination = ObjectLocator::new(bucket, config.destination_key(&self.key));
        Ok(ProcessingRequest {
            source: ObjectLocator::new(self.bucket, self.key),
            destination,
            expected_size: self.size,
        })
    }
}

/// Decides which written objects are configuration snapshots
#[derive(Debug, Clone)]
pub struct SnapshotKeyFilter {
    pattern: Regex,
}

impl SnapshotKeyFilter {
    /// Filter matching [`DEFAULT_SNAPSHOT_KEY_PATTERN`]
    pub fn snapshots() -> Result<Self> {
        Self::new(DEFAULT_SNAPSHOT_KEY_PATTERN)
    }

    /// Filter with a custom pattern (unanchored)
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|err| SnapError::Config(format!("invalid key pattern: {}", err)))?;
        Ok(Self { pattern })
    }

    /// Whether `key` names a snapshot
    pub fn is_eligible(&self, key: &str) -> bool {
        self.pattern.is_match(key)
    }

    /// Work message for `event`, or `None` if its key is not a snapshot
    pub fn route(&self, event: &ObjectEvent) -> Option<WorkMessage> {
        if !self.is_eligible(&event.key) {
            debug!(bucket = %event.bucket, key = %event.key, "skipping ineligible key");
            return None;
        }
        Some(WorkMessage {
            bucket: event.bucket.clone(),
            key: event.key.clone(),
            size: event.size,
        })
    }
}

/// A request that ran to success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedRequest {
    /// What was processed
    pub request: ProcessingRequest,
    /// How it went
    pub result: TranscodeResult,
}

/// Why a batch stopped
#[derive(Debug, Error)]
pub enum IntakeError {
    /// Queue body did not parse
    #[error("message {index} is not a valid work message: {source}")]
    Parse {
        /// Position in the batch
        index: usize,
        /// Parse failure
        #[source]
        source: SnapError,
    },

    /// Message could not be turned into a request
    #[error("message {index} cannot be routed: {source}")]
    Route {
        /// Position in the batch
        index: usize,
        /// Routing failure
        #[source]
        source: SnapError,
    },

    /// The request itself failed
    #[error("message {index}: {source}")]
    Transcode {
        /// Position in the batch
        index: usize,
        /// Pipeline failure
        #[source]
        source: TranscodeError,
    },
}

impl IntakeError {
    /// Position of the failing message in its batch
    pub fn index(&self) -> usize {
        match self {
            IntakeError::Parse { index, .. }
            | IntakeError::Route { index, .. }
            | IntakeError::Transcode { index, .. } => *index,
        }
    }
}

/// Everything a batch did before it finished or stopped
#[derive(Debug)]
pub struct IntakeReport {
    /// Requests that succeeded, in order
    pub completed: Vec<CompletedRequest>,
    /// First failure; nothing after it was attempted
    pub failure: Option<IntakeError>,
}

impl IntakeReport {
    /// Completed requests, or the failure that stopped the batch
    pub fn into_result(self) -> std::result::Result<Vec<CompletedRequest>, IntakeError> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self.completed),
        }
    }
}

/// Runs queue messages through one [`Transcoder`], strictly one at a time
pub struct WorkIntake<'a> {
    transcoder: Transcoder<'a>,
}

impl<'a> WorkIntake<'a> {
    /// Intake driving `transcoder`
    pub fn new(transcoder: Transcoder<'a>) -> Self {
        Self { transcoder }
    }

    /// The transcoder in use
    pub fn transcoder(&self) -> &Transcoder<'a> {
        &self.transcoder
    }

    /// Parse and run each message in turn. Every request reaches a terminal
    /// result before the next starts, and the first failure ends the batch.
    pub fn process<I, S>(&mut self, messages: I) -> IntakeReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut completed = Vec::new();
        for (index, body) in messages.into_iter().enumerate() {
            match self.process_one(index, body.as_ref()) {
                Ok(done) => completed.push(done),
                Err(err) => {
                    return IntakeReport {
                        completed,
                        failure: Some(err),
                    }
                }
            }
        }

        info!(processed = completed.len(), "batch finished");
        IntakeReport {
            completed,
            failure: None,
        }
    }

    fn process_one(
        &mut self,
        index: usize,
        body: &str,
    ) -> std::result::Result<CompletedRequest, IntakeError> {
        let message =
            WorkMessage::from_json(body).map_err(|source| IntakeError::Parse { index, source })?;
        let request = message
            .into_request(self.transcoder.config())
            .map_err(|source| IntakeError::Route { index, source })?;
        let result = self
            .transcoder
            .run(&request)
            .map_err(|source| IntakeError::Transcode { index, source })?;
        Ok(CompletedRequest { request, result })
    }
}
