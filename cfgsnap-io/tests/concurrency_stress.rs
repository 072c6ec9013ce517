use cfgsnap_io::{
    MemoryObjectStore, ObjectLocator, ObjectSink, ProcessingRequest, Result, SnapError, Stage,
    TranscodeConfig, Transcoder,
};
use cfgsnap_test_utils::{gunzip, gzip, jsonl_lines, SnapshotBuilder, TestDataGenerator};
use std::io::{self, Read};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn request() -> ProcessingRequest {
    ProcessingRequest {
        source: ObjectLocator::new("in", "large.json.gz"),
        destination: ObjectLocator::new("out", "large.jsonl.gz"),
        expected_size: 0,
    }
}

fn empty_objects(count: usize) -> Vec<u8> {
    let mut document = b"{\"configurationItems\":[".to_vec();
    for i in 0..count {
        if i > 0 {
            document.push(b',');
        }
        document.extend_from_slice(b"{}");
    }
    document.extend_from_slice(b"]}");
    gzip(&document)
}

/// Sink that drains in tiny reads with pauses, keeping the producer under backpressure
struct SlowSink {
    chunk: usize,
    pause_every: usize,
    received: AtomicU64,
}

impl ObjectSink for SlowSink {
    fn deliver(&self, _locator: &ObjectLocator, body: &mut dyn Read) -> Result<u64> {
        let mut buf = vec![0u8; self.chunk];
        let mut total = 0u64;
        let mut reads = 0usize;
        loop {
            let n = body.read(&mut buf)?;
            if n == 0 {
                break;
            }
            total += n as u64;
            reads += 1;
            if reads % self.pause_every == 0 {
                thread::sleep(Duration::from_micros(200));
            }
        }
        self.received.store(total, Ordering::SeqCst);
        Ok(total)
    }
}

/// Sink that fails before reading anything
struct FailingSink;

impl ObjectSink for FailingSink {
    fn deliver(&self, locator: &ObjectLocator, _body: &mut dyn Read) -> Result<u64> {
        Err(SnapError::Destination {
            locator: locator.to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"),
        })
    }
}

#[test]
fn hundred_thousand_elements_stay_within_capacity() {
    let source = MemoryObjectStore::new();
    source.put(request().source, empty_objects(100_000));

    let capacity = 64;
    let config = TranscodeConfig {
        coupler_capacity: capacity,
        ..TranscodeConfig::default()
    };
    let sink = MemoryObjectStore::new();
    let mut transcoder = Transcoder::new(&source, &sink, config).unwrap();
    let result = transcoder.run(&request()).unwrap();

    assert_eq!(result.item_count, 100_000);
    assert!(
        result.peak_buffered_bytes <= capacity,
        "peak {} exceeds capacity {}",
        result.peak_buffered_bytes,
        capacity
    );

    let output = gunzip(&sink.get(&request().destination).unwrap());
    let lines = jsonl_lines(&output);
    assert_eq!(lines.len(), 100_000);
    assert!(lines.iter().all(|line| *line == b"{}"));
}

#[test]
fn slow_consumer_applies_backpressure_without_loss() {
    let items = TestDataGenerator::configuration_items(5_000);
    let source = MemoryObjectStore::new();
    source.put(request().source, SnapshotBuilder::new().items(items).build_gz());

    let config = TranscodeConfig {
        coupler_capacity: 512,
        ..TranscodeConfig::default()
    };
    let sink = SlowSink {
        chunk: 37,
        pause_every: 64,
        received: AtomicU64::new(0),
    };
    let mut transcoder = Transcoder::new(&source, &sink, config).unwrap();
    let result = transcoder.run(&request()).unwrap();

    assert_eq!(result.item_count, 5_000);
    assert_eq!(result.compressed_bytes, sink.received.load(Ordering::SeqCst));
    assert!(result.peak_buffered_bytes <= 512);
}

#[test]
fn immediate_sink_failure_stops_the_producer() {
    let source = MemoryObjectStore::new();
    source.put(request().source, empty_objects(1_000_000));
    let config = TranscodeConfig {
        coupler_capacity: 128,
        ..TranscodeConfig::default()
    };

    // Baseline: the same document transcoded to completion.
    let sink = MemoryObjectStore::new();
    let mut transcoder = Transcoder::new(&source, &sink, config.clone()).unwrap();
    let started = Instant::now();
    let result = transcoder.run(&request()).unwrap();
    let full_run = started.elapsed();
    assert_eq!(result.item_count, 1_000_000);

    let mut transcoder = Transcoder::new(&source, &FailingSink, config).unwrap();
    let started = Instant::now();
    let err = transcoder.run(&request()).unwrap_err();
    let failed_run = started.elapsed();

    assert_eq!(err.stage, Stage::Deliver);
    assert!(matches!(err.kind(), SnapError::Destination { .. }));
    // A producer that kept scanning after the sink went away would take
    // about as long as the full run.
    assert!(
        failed_run * 20 < full_run,
        "failed run took {:?}, full run {:?}",
        failed_run,
        full_run
    );
}

#[test]
fn sequential_runs_reuse_one_transcoder() {
    let store = MemoryObjectStore::new();
    let config = TranscodeConfig {
        coupler_capacity: 1_024,
        ..TranscodeConfig::default()
    };
    let mut transcoder = Transcoder::new(&store, &store, config).unwrap();

    for count in [0usize, 1, 10, 1_000] {
        let req = ProcessingRequest {
            source: ObjectLocator::new("in", format!("{}.json.gz", count)),
            destination: ObjectLocator::new("out", format!("{}.jsonl.gz", count)),
            expected_size: 0,
        };
        store.put(req.source.clone(), empty_objects(count));
        let result = transcoder.run(&req).unwrap();
        assert_eq!(result.item_count, count as u64);
    }
}

#[test]
fn parallel_transcoders_do_not_interfere() {
    let store = MemoryObjectStore::new();
    for worker in 0..4 {
        store.put(
            ObjectLocator::new("in", format!("w{}.json.gz", worker)),
            empty_objects(10_000 + worker),
        );
    }

    thread::scope(|scope| {
        for worker in 0..4usize {
            let store = &store;
            scope.spawn(move || {
                let config = TranscodeConfig {
                    coupler_capacity: 97,
                    ..TranscodeConfig::default()
                };
                let mut transcoder = Transcoder::new(store, store, config).unwrap();
                let result = transcoder
                    .run(&ProcessingRequest {
                        source: ObjectLocator::new("in", format!("w{}.json.gz", worker)),
                        destination: ObjectLocator::new("out", format!("w{}.jsonl.gz", worker)),
                        expected_size: 0,
                    })
                    .unwrap();
                assert_eq!(result.item_count, (10_000 + worker) as u64);
            });
        }
    });

    assert_eq!(store.len(), 8);
}
