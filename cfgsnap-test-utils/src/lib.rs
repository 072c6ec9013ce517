//! cfgsnap Test Utilities
//!
//! Shared fixtures for snapshot documents, gzip helpers and JSON-Lines checks.

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{Map, Value};
use std::io::{Read, Write};

/// Builder for snapshot documents shaped like AWS Config deliveries
pub struct SnapshotBuilder {
    fields: Map<String, Value>,
    target_key: String,
    items: Option<Vec<Value>>,
    pretty: bool,
}

impl SnapshotBuilder {
    /// Snapshot with the usual header fields and no items yet
    pub fn new() -> Self {
        let mut fields = Map::new();
        fields.insert("fileVersion".to_string(), Value::from("1.0"));
        fields.insert(
            "configSnapshotId".to_string(),
            Value::from("00000000-0000-0000-0000-000000000000"),
        );
        Self {
            fields,
            target_key: "configurationItems".to_string(),
            items: Some(Vec::new()),
            pretty: false,
        }
    }

    /// Use a different name for the item array
    pub fn target_key(mut self, key: &str) -> Self {
        self.target_key = key.to_string();
        self
    }

    /// Add a top-level field next to the item array
    pub fn field(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Append one item
    pub fn item(mut self, item: Value) -> Self {
        self.items.get_or_insert_with(Vec::new).push(item);
        self
    }

    /// Append many items
    pub fn items(mut self, items: impl IntoIterator<Item = Value>) -> Self {
        self.items.get_or_insert_with(Vec::new).extend(items);
        self
    }

    /// Leave the item array out entirely
    pub fn without_items(mut self) -> Self {
        self.items = None;
        self
    }

    /// Serialize with indentation
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    /// Document as a JSON value
    pub fn build_value(self) -> Value {
        let mut fields = self.fields;
        if let Some(items) = self.items {
            fields.insert(self.target_key, Value::Array(items));
        }
        Value::Object(fields)
    }

    /// Serialized document
    pub fn build(self) -> Vec<u8> {
        let pretty = self.pretty;
        let value = self.build_value();
        if pretty {
            serde_json::to_vec_pretty(&value).unwrap()
        } else {
            serde_json::to_vec(&value).unwrap()
        }
    }

    /// Serialized and gzipped document
    pub fn build_gz(self) -> Vec<u8> {
        gzip(&self.build())
    }
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate configuration items with various patterns
pub struct TestDataGenerator;

impl TestDataGenerator {
    /// `count` configuration items with distinct resource ids
    pub fn configuration_items(count: usize) -> Vec<Value> {
        (0..count)
            .map(|i| {
                serde_json::json!({
                    "resourceType": match i % 3 {
                        0 => "AWS::EC2::Instance",
                        1 => "AWS::S3::Bucket",
                        _ => "AWS::IAM::Role",
                    },
                    "resourceId": format!("res-{:06}", i),
                    "awsRegion": "us-east-1",
                    "configurationItemStatus": "OK",
                    "tags": { "index": i.to_string() },
                    "relationships": [],
                    "configuration": { "size": i, "enabled": i % 2 == 0, "owner": null }
                })
            })
            .collect()
    }

    /// Items whose strings need escaping or carry non-ASCII text
    pub fn unicode_items() -> Vec<Value> {
        vec![
            serde_json::json!({ "resourceId": "quote\"and\\backslash" }),
            serde_json::json!({ "resourceId": "Hello, 世界! 🌍" }),
            serde_json::json!({ "resourceId": "line\nbreak\ttab" }),
            serde_json::json!({ "resourceId": "[not] {an} \"array\"" }),
        ]
    }

    /// Scalars, empties and nesting as array elements
    pub fn mixed_elements() -> Vec<Value> {
        vec![
            Value::Null,
            Value::Bool(true),
            Value::from(-12),
            Value::from(3.5),
            Value::from("text"),
            Value::Array(Vec::new()),
            Value::Object(Map::new()),
            serde_json::json!([[1, [2, [3]]], { "a": { "b": [] } }]),
        ]
    }

    /// Document with a nested field of the same name that must be ignored
    pub fn nested_decoy_document() -> &'static [u8] {
        br#"{"resourceId":"x","configurationItems":[{"a":1},{"a":2}],"nested":{"configurationItems":[{"a":999}]}}"#
    }
}

/// gzip `data` at the default level
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Decompress every gzip member in `data`
pub fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    MultiGzDecoder::new(data).read_to_end(&mut out).unwrap();
    out
}

/// Split JSON-Lines output into its lines, requiring a terminator on each
pub fn jsonl_lines(data: &[u8]) -> Vec<&[u8]> {
    if data.is_empty() {
        return Vec::new();
    }
    assert_eq!(data.last(), Some(&b'\n'), "output must end with a newline");
    data[..data.len() - 1].split(|b| *b == b'\n').collect()
}

/// Utility functions for test assertions
pub mod assertions {
    use serde_json::Value;

    /// Assert that every line parses and equals the matching expected value
    pub fn assert_lines_match(lines: &[&[u8]], expected: &[Value]) {
        assert_eq!(
            lines.len(),
            expected.len(),
            "line count differs from element count"
        );
        for (i, (line, want)) in lines.iter().zip(expected).enumerate() {
            let got: Value = serde_json::from_slice(line).unwrap_or_else(|err| {
                panic!(
                    "line {} is not valid JSON ({}): {}",
                    i,
                    err,
                    String::from_utf8_lossy(line)
                )
            });
            if &got != want {
                panic!(
                    "line {} differs:\nExpected: {}\nActual: {}",
                    i,
                    serde_json::to_string_pretty(want).unwrap(),
                    serde_json::to_string_pretty(&got).unwrap()
                );
            }
        }
    }
}
