//! Object retrieval and delivery interfaces, with filesystem and in-memory stores

use bytes::{Buf, Bytes};
use cfgsnap_format::{Result, SnapError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

const PUMP_CHUNK_BYTES: usize = 64 * 1024;
const PARTIAL_SUFFIX: &str = ".partial";

/// Location of an object: a bucket and a key within it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocator {
    /// Bucket (or top-level namespace) holding the object
    pub bucket: String,
    /// Key of the object within the bucket
    pub key: String,
}

impl ObjectLocator {
    /// Build a locator
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Fully buffered compressed source object
#[derive(Debug, Clone)]
pub struct RawDocument {
    bytes: Bytes,
}

impl RawDocument {
    /// Wrap retrieved bytes
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the object is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consume the document as a reader over its bytes
    pub fn into_reader(self) -> bytes::buf::Reader<Bytes> {
        self.bytes.reader()
    }
}

/// Retrieves complete objects
pub trait ObjectSource: Send + Sync {
    /// Fetch the whole object at `locator`. `size_hint` is only a
    /// pre-allocation hint.
    fn fetch(&self, locator: &ObjectLocator, size_hint: usize) -> Result<RawDocument>;
}

/// Commits objects from an incrementally read stream
pub trait ObjectSink: Send + Sync {
    /// Read `body` to its end and commit it at `locator`, returning the number
    /// of bytes committed. Nothing is committed unless `body` ends cleanly.
    fn deliver(&self, locator: &ObjectLocator, body: &mut dyn Read) -> Result<u64>;
}

/// Copy `body` into `out` until end-of-stream.
///
/// Read failures keep their own classification; write failures become
/// `SnapError::Destination` for `locator`.
pub fn pump(body: &mut dyn Read, out: &mut dyn Write, locator: &ObjectLocator) -> Result<u64> {
    let mut chunk = vec![0u8; PUMP_CHUNK_BYTES];
    let mut total = 0u64;
    loop {
        let n = match body.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        out.write_all(&chunk[..n])
            .map_err(|source| destination_error(locator, source))?;
        total += n as u64;
    }
    out.flush()
        .map_err(|source| destination_error(locator, source))?;
    Ok(total)
}

fn destination_error(locator: &ObjectLocator, source: io::Error) -> SnapError {
    SnapError::Destination {
        locator: locator.to_string(),
        source,
    }
}

/// Object store backed by a directory tree: `root/bucket/key`
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path for `locator`. Keys may not escape their bucket.
    pub fn resolve(&self, locator: &ObjectLocator) -> io::Result<PathBuf> {
        let key = Path::new(locator.key.trim_start_matches('/'));
        if key.as_os_str().is_empty()
            || key
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid object key '{}'", locator.key),
            ));
        }
        Ok(self.root.join(&locator.bucket).join(key))
    }
}

impl ObjectSource for FsObjectStore {
    fn fetch(&self, locator: &ObjectLocator, size_hint: usize) -> Result<RawDocument> {
        let unavailable = |source: io::Error| SnapError::SourceUnavailable {
            locator: locator.to_string(),
            source,
        };

        let path = self.resolve(locator).map_err(unavailable)?;
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(SnapError::NotFound {
                    locator: locator.to_string(),
                })
            }
            Err(err) => return Err(unavailable(err)),
        };

        let mut buf = Vec::with_capacity(size_hint);
        file.read_to_end(&mut buf).map_err(unavailable)?;
        debug!(locator = %locator, bytes = buf.len(), "fetched object");
        Ok(RawDocument::new(buf))
    }
}

impl ObjectSink for FsObjectStore {
    fn deliver(&self, locator: &ObjectLocator, body: &mut dyn Read) -> Result<u64> {
        let path = self
            .resolve(locator)
            .map_err(|source| destination_error(locator, source))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| destination_error(locator, source))?;
        }

        let mut partial = path.clone().into_os_string();
        partial.push(PARTIAL_SUFFIX);
        let partial = PathBuf::from(partial);

        let file = File::create(&partial).map_err(|source| destination_error(locator, source))?;
        let mut out = BufWriter::new(file);

        let outcome = pump(body, &mut out, locator).and_then(|total| {
            let file = out
                .into_inner()
                .map_err(|err| destination_error(locator, err.into_error()))?;
            file.sync_all()
                .map_err(|source| destination_error(locator, source))?;
            fs::rename(&partial, &path).map_err(|source| destination_error(locator, source))?;
            Ok(total)
        });

        match outcome {
            Ok(total) => {
                debug!(locator = %locator, bytes = total, "committed object");
                Ok(total)
            }
            Err(err) => {
                let _ = fs::remove_file(&partial);
                Err(err)
            }
        }
    }
}

/// Object store held in memory
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<ObjectLocator, Bytes>>,
}

impl MemoryObjectStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object
    pub fn put(&self, locator: ObjectLocator, bytes: impl Into<Bytes>) {
        self.lock().insert(locator, bytes.into());
    }

    /// Committed bytes at `locator`, if any
    pub fn get(&self, locator: &ObjectLocator) -> Option<Bytes> {
        self.lock().get(locator).cloned()
    }

    /// Number of committed objects
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no object has been committed
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ObjectLocator, Bytes>> {
        self.objects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ObjectSource for MemoryObjectStore {
    fn fetch(&self, locator: &ObjectLocator, _size_hint: usize) -> Result<RawDocument> {
        self.get(locator)
            .map(RawDocument::new)
            .ok_or_else(|| SnapError::NotFound {
                locator: locator.to_string(),
            })
    }
}

impl ObjectSink for MemoryObjectStore {
    fn deliver(&self, locator: &ObjectLocator, body: &mut dyn Read) -> Result<u64> {
        let mut buf = Vec::new();
        let total = pump(body, &mut buf, locator)?;
        self.put(locator.clone(), buf);
        Ok(total)
    }
}
