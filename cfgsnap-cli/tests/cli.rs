use cfgsnap_test_utils::{gunzip, gzip, jsonl_lines, SnapshotBuilder, TestDataGenerator};
use predicates::prelude::*;
use serde_json::Value;
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const SNAPSHOT_KEY: &str =
    "AWSLogs/123456789012/Config/us-east-1/2024/1/15/ConfigSnapshot/123456789012_Config_us-east-1_ConfigSnapshot_20240115T000000Z_abc.json.gz";

struct SampleFile {
    _dir: TempDir,
    input: PathBuf,
    output: PathBuf,
}

fn build_sample_file(document: Vec<u8>) -> Result<SampleFile, Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("snapshot.json.gz");
    let output = dir.path().join("snapshot.jsonl.gz");
    fs::write(&input, document)?;
    Ok(SampleFile {
        _dir: dir,
        input,
        output,
    })
}

fn cfgsnap() -> Result<assert_cmd::Command, Box<dyn Error>> {
    let mut cmd = assert_cmd::Command::cargo_bin("cfgsnap")?;
    cmd.env_remove("OUTPUT_BUCKET")
        .env_remove("OUTPUT_PREFIX")
        .env("RUST_LOG", "warn");
    Ok(cmd)
}

#[test]
fn transcode_writes_one_line_per_item() -> Result<(), Box<dyn Error>> {
    let items = TestDataGenerator::configuration_items(25);
    let sample = build_sample_file(SnapshotBuilder::new().items(items.clone()).build_gz())?;

    cfgsnap()?
        .args([
            "transcode",
            sample.input.to_str().unwrap(),
            "-o",
            sample.output.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("items: 25"));

    let output = gunzip(&fs::read(&sample.output)?);
    let lines = jsonl_lines(&output);
    assert_eq!(lines.len(), 25);
    for (line, item) in lines.iter().zip(&items) {
        assert_eq!(&serde_json::from_slice::<Value>(line)?, item);
    }
    Ok(())
}

#[test]
fn transcode_compact_flattens_pretty_input() -> Result<(), Box<dyn Error>> {
    let items = TestDataGenerator::configuration_items(4);
    let sample = build_sample_file(
        SnapshotBuilder::new()
            .items(items.clone())
            .pretty()
            .build_gz(),
    )?;

    cfgsnap()?
        .args([
            "transcode",
            sample.input.to_str().unwrap(),
            "-o",
            sample.output.to_str().unwrap(),
            "--compact",
        ])
        .assert()
        .success();

    let output = gunzip(&fs::read(&sample.output)?);
    assert_eq!(jsonl_lines(&output).len(), 4);
    Ok(())
}

#[test]
fn element_format_flag_overrides_compact_config() -> Result<(), Box<dyn Error>> {
    let sample = build_sample_file(
        SnapshotBuilder::new()
            .items(TestDataGenerator::configuration_items(4))
            .pretty()
            .build_gz(),
    )?;
    let config = sample.input.with_file_name("cfgsnap.toml");
    fs::write(&config, "element_format = \"compact\"\n")?;

    cfgsnap()?
        .args([
            "--config",
            config.to_str().unwrap(),
            "transcode",
            sample.input.to_str().unwrap(),
            "-o",
            sample.output.to_str().unwrap(),
            "--element-format",
            "original",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("items: 4"));

    // Pretty-printed elements keep their inner newlines.
    let output = gunzip(&fs::read(&sample.output)?);
    assert!(jsonl_lines(&output).len() > 4);
    Ok(())
}

#[test]
fn transcode_malformed_input_fails_without_output() -> Result<(), Box<dyn Error>> {
    let sample = build_sample_file(gzip(br#"{"configurationItems":[{"a":1},"#))?;

    cfgsnap()?
        .args([
            "transcode",
            sample.input.to_str().unwrap(),
            "-o",
            sample.output.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("MalformedInput"));

    assert!(!sample.output.exists());
    Ok(())
}

#[test]
fn transcode_missing_input_fails() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    cfgsnap()?
        .args([
            "transcode",
            dir.path().join("absent.json.gz").to_str().unwrap(),
            "-o",
            dir.path().join("out.jsonl.gz").to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("NotFound"));
    Ok(())
}

#[test]
fn config_file_sets_target_key() -> Result<(), Box<dyn Error>> {
    let sample = build_sample_file(
        SnapshotBuilder::new()
            .target_key("resources")
            .items(TestDataGenerator::configuration_items(3))
            .build_gz(),
    )?;
    let config = sample.input.with_file_name("cfgsnap.toml");
    fs::write(&config, "target_key = \"resources\"\n")?;

    cfgsnap()?
        .args([
            "--config",
            config.to_str().unwrap(),
            "transcode",
            sample.input.to_str().unwrap(),
            "-o",
            sample.output.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("items: 3"));
    Ok(())
}

#[test]
fn json_logs_carry_processing_events() -> Result<(), Box<dyn Error>> {
    let sample = build_sample_file(SnapshotBuilder::new().build_gz())?;

    let output = cfgsnap()?
        .env("RUST_LOG", "info")
        .args([
            "--log-format",
            "json",
            "transcode",
            sample.input.to_str().unwrap(),
            "-o",
            sample.output.to_str().unwrap(),
        ])
        .assert()
        .success()
        .get_output()
        .stderr
        .clone();

    let stderr = String::from_utf8(output)?;
    let events: Vec<Value> = stderr
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    let messages: Vec<&str> = events
        .iter()
        .filter_map(|event| event["fields"]["message"].as_str())
        .collect();
    assert!(messages.contains(&"start processing"));
    assert!(messages.contains(&"finished processing"));
    Ok(())
}

#[test]
fn enqueue_filters_snapshot_events() -> Result<(), Box<dyn Error>> {
    let events = format!(
        "{}\n{}\n",
        serde_json::json!({"bucket": "logs", "key": SNAPSHOT_KEY, "size": 2048}),
        serde_json::json!({"bucket": "logs", "key": "AWSLogs/123456789012/Config/ConfigWritabilityCheckFile", "size": 0}),
    );

    let output = cfgsnap()?
        .arg("enqueue")
        .write_stdin(events)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(output)?;
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1);
    let message: Value = serde_json::from_str(lines[0])?;
    assert_eq!(message["Bucket"], "logs");
    assert_eq!(message["Key"], SNAPSHOT_KEY);
    assert_eq!(message["Size"], 2048);
    Ok(())
}

#[test]
fn intake_processes_queued_messages() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let source = dir.path().join("logs").join(SNAPSHOT_KEY);
    fs::create_dir_all(source.parent().unwrap())?;
    fs::write(
        &source,
        SnapshotBuilder::new()
            .items(TestDataGenerator::configuration_items(8))
            .build_gz(),
    )?;

    let message = format!("{{\"Bucket\":\"logs\",\"Key\":\"{}\",\"Size\":0}}\n", SNAPSHOT_KEY);
    let output = cfgsnap()?
        .env("OUTPUT_BUCKET", "converted")
        .env("OUTPUT_PREFIX", "/jsonl/")
        .args(["intake", "--root", dir.path().to_str().unwrap()])
        .write_stdin(message)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let summary: Value = serde_json::from_slice(&output)?;
    assert_eq!(summary["count"], 8);

    // The trimmed prefix is prepended to the key as-is.
    let committed = dir
        .path()
        .join("converted")
        .join(format!("jsonl{}", SNAPSHOT_KEY));
    assert_eq!(jsonl_lines(&gunzip(&fs::read(committed)?)).len(), 8);
    Ok(())
}

#[test]
fn intake_without_output_bucket_fails() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    cfgsnap()?
        .args(["intake", "--root", dir.path().to_str().unwrap()])
        .write_stdin("{\"Bucket\":\"logs\",\"Key\":\"k\"}\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("output_bucket"));
    Ok(())
}
