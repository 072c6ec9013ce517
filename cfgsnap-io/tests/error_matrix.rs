//! Error test matrix: every failure is reported with the stage and locator it belongs to

use cfgsnap_format::MalformedReason;
use cfgsnap_io::{
    MemoryObjectStore, ObjectLocator, ObjectSink, ObjectSource, PipelineState, ProcessingRequest,
    RawDocument, Result, ScanLimits, SnapError, Stage, TranscodeConfig, TranscodeError, Transcoder,
};
use cfgsnap_test_utils::{gzip, SnapshotBuilder, TestDataGenerator};
use std::io::{self, Read};

fn request() -> ProcessingRequest {
    ProcessingRequest {
        source: ObjectLocator::new("in", "snapshot.json.gz"),
        destination: ObjectLocator::new("out", "snapshot.jsonl.gz"),
        expected_size: 1024,
    }
}

/// Source that refuses every fetch
struct UnreachableSource;

impl ObjectSource for UnreachableSource {
    fn fetch(&self, locator: &ObjectLocator, _size_hint: usize) -> Result<RawDocument> {
        Err(SnapError::SourceUnavailable {
            locator: locator.to_string(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "access denied"),
        })
    }
}

/// Sink that reads a little, then fails as a storage backend would
struct RejectingSink {
    read_first: usize,
}

impl ObjectSink for RejectingSink {
    fn deliver(&self, locator: &ObjectLocator, body: &mut dyn Read) -> Result<u64> {
        let mut scratch = vec![0u8; self.read_first];
        body.read_exact(&mut scratch)?;
        Err(SnapError::Destination {
            locator: locator.to_string(),
            source: io::Error::new(io::ErrorKind::Other, "upload rejected"),
        })
    }
}

/// Sink that panics mid-stream
struct PanickingSink;

impl ObjectSink for PanickingSink {
    fn deliver(&self, _locator: &ObjectLocator, _body: &mut dyn Read) -> Result<u64> {
        panic!("sink bug");
    }
}

/// Sink that returns early without reading to end-of-stream
struct ImpatientSink;

impl ObjectSink for ImpatientSink {
    fn deliver(&self, _locator: &ObjectLocator, body: &mut dyn Read) -> Result<u64> {
        let mut first = [0u8; 1];
        body.read_exact(&mut first)?;
        Ok(1)
    }
}

fn transform_failure(document: Vec<u8>, config: TranscodeConfig) -> TranscodeError {
    let store = MemoryObjectStore::new();
    store.put(request().source, document);
    let mut transcoder = Transcoder::new(&store, &store, config).unwrap();
    let err = transcoder.run(&request()).unwrap_err();
    assert_eq!(transcoder.state(), PipelineState::Failed);
    assert!(store.get(&request().destination).is_none(), "partial output committed");
    err
}

fn malformed_reason(err: &TranscodeError) -> &MalformedReason {
    assert_eq!(err.stage, Stage::Transform);
    match err.kind() {
        SnapError::MalformedInput { reason, .. } => reason,
        other => panic!("expected malformed input, got {:?}", other),
    }
}

#[test]
fn source_unavailable_is_a_fetch_error() {
    let sink = MemoryObjectStore::new();
    let mut transcoder = Transcoder::new(&UnreachableSource, &sink, TranscodeConfig::default())
        .unwrap();
    let err = transcoder.run(&request()).unwrap_err();

    assert_eq!(err.stage, Stage::Fetch);
    assert_eq!(err.locator, request().source);
    assert!(matches!(err.kind(), SnapError::SourceUnavailable { .. }));
    assert!(sink.is_empty());
}

#[test]
fn missing_source_is_not_found() {
    let store = MemoryObjectStore::new();
    let mut transcoder = Transcoder::new(&store, &store, TranscodeConfig::default()).unwrap();
    let err = transcoder.run(&request()).unwrap_err();
    assert_eq!(err.stage, Stage::Fetch);
    assert!(matches!(err.kind(), SnapError::NotFound { .. }));
    assert!(err.to_string().contains("in/snapshot.json.gz"));
}

#[test]
fn corrupt_gzip_is_a_decompression_error() {
    let err = transform_failure(b"definitely not gzip".to_vec(), TranscodeConfig::default());
    assert_eq!(err.stage, Stage::Transform);
    assert_eq!(err.locator, request().source);
    assert!(matches!(err.kind(), SnapError::Decompression(_)));
}

#[test]
fn truncated_gzip_is_a_decompression_error() {
    let document = SnapshotBuilder::new()
        .items(TestDataGenerator::configuration_items(200))
        .build_gz();
    let err = transform_failure(
        document[..document.len() / 2].to_vec(),
        TranscodeConfig::default(),
    );
    assert!(matches!(err.kind(), SnapError::Decompression(_)));
}

#[test]
fn non_object_document_is_malformed() {
    let err = transform_failure(gzip(b"[1,2,3]"), TranscodeConfig::default());
    assert_eq!(malformed_reason(&err), &MalformedReason::NotAnObject);
}

#[test]
fn non_array_target_is_malformed() {
    let err = transform_failure(
        gzip(br#"{"configurationItems": {"a": 1}}"#),
        TranscodeConfig::default(),
    );
    assert!(matches!(
        malformed_reason(&err),
        MalformedReason::TargetNotArray { .. }
    ));
}

#[test]
fn trailing_data_is_malformed() {
    let err = transform_failure(
        gzip(br#"{"configurationItems": []} {}"#),
        TranscodeConfig::default(),
    );
    assert_eq!(malformed_reason(&err), &MalformedReason::TrailingData);
}

#[test]
fn truncated_json_reports_unexpected_eof() {
    let err = transform_failure(
        gzip(br#"{"configurationItems": [{"a": 1}, {"a""#),
        TranscodeConfig::default(),
    );
    assert_eq!(malformed_reason(&err), &MalformedReason::UnexpectedEof);
}

#[test]
fn oversized_element_exceeds_limits() {
    let config = TranscodeConfig {
        limits: ScanLimits {
            max_element_bytes: 64,
            ..ScanLimits::default()
        },
        ..TranscodeConfig::default()
    };
    let document = SnapshotBuilder::new()
        .item(serde_json::json!({ "blob": "x".repeat(500) }))
        .build_gz();
    let err = transform_failure(document, config);
    assert_eq!(err.stage, Stage::Transform);
    assert!(matches!(err.kind(), SnapError::LimitExceeded(_)));
}

#[test]
fn deep_nesting_exceeds_limits() {
    let config = TranscodeConfig {
        limits: ScanLimits {
            max_nesting_depth: 8,
            ..ScanLimits::default()
        },
        ..TranscodeConfig::default()
    };
    let nested = format!(
        r#"{{"configurationItems": [{}{}]}}"#,
        "[".repeat(20),
        "]".repeat(20)
    );
    let err = transform_failure(gzip(nested.as_bytes()), config);
    assert!(matches!(err.kind(), SnapError::LimitExceeded(_)));
}

#[test]
fn sink_failure_is_a_deliver_error() {
    let source = MemoryObjectStore::new();
    source.put(
        request().source,
        SnapshotBuilder::new()
            .items(TestDataGenerator::configuration_items(5_000))
            .build_gz(),
    );

    for read_first in [0, 1, 100] {
        let sink = RejectingSink { read_first };
        let mut transcoder = Transcoder::new(&source, &sink, TranscodeConfig::default()).unwrap();
        let err = transcoder.run(&request()).unwrap_err();

        assert_eq!(err.stage, Stage::Deliver);
        assert_eq!(err.locator, request().destination);
        assert!(
            matches!(err.kind(), SnapError::Destination { .. }),
            "unexpected {:?}",
            err.kind()
        );
    }
}

#[test]
fn sink_panic_is_an_internal_deliver_error() {
    let source = MemoryObjectStore::new();
    source.put(request().source, SnapshotBuilder::new().build_gz());

    let mut transcoder =
        Transcoder::new(&source, &PanickingSink, TranscodeConfig::default()).unwrap();
    let err = transcoder.run(&request()).unwrap_err();
    assert_eq!(err.stage, Stage::Deliver);
    assert!(matches!(err.kind(), SnapError::Internal(_)));
}

#[test]
fn sink_that_stops_reading_early_fails_the_run() {
    let source = MemoryObjectStore::new();
    source.put(
        request().source,
        SnapshotBuilder::new()
            .items(TestDataGenerator::configuration_items(20_000))
            .build_gz(),
    );

    let config = TranscodeConfig {
        coupler_capacity: 256,
        ..TranscodeConfig::default()
    };
    let mut transcoder = Transcoder::new(&source, &ImpatientSink, config).unwrap();
    let err = transcoder.run(&request()).unwrap_err();
    assert_eq!(err.stage, Stage::Transform);
    assert!(matches!(err.kind(), SnapError::CouplingClosed));
}

#[test]
fn errors_chain_to_their_cause() {
    use std::error::Error;

    let sink = MemoryObjectStore::new();
    let mut transcoder = Transcoder::new(&UnreachableSource, &sink, TranscodeConfig::default())
        .unwrap();
    let err = transcoder.run(&request()).unwrap_err();

    let cause = err.source().expect("transcode error has a source");
    assert!(cause.to_string().contains("in/snapshot.json.gz"));
    assert!(cause.source().is_some());
}
