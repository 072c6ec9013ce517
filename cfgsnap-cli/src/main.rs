//! cfgsnap CLI - Command-line tool for configuration snapshot transcoding
//!
//! This binary provides command-line interfaces for:
//! - transcode: gzip JSON snapshot → gzip JSON-Lines
//! - enqueue: object events → work messages for snapshot keys
//! - intake: process work messages against a directory-backed object store

use cfgsnap_io::{
    transcode_file, CompletedRequest, ElementFormat, FsObjectStore, ObjectEvent,
    SnapshotKeyFilter, TranscodeConfig, TranscodeResult, Transcoder, WorkIntake,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::error::Error;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cfgsnap")]
#[command(about = "Configuration snapshot to JSON-Lines transcoder")]
#[command(version)]
struct Cli {
    /// TOML file with transcoder settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log output format (written to stderr)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transcode a local gzip JSON snapshot into gzip JSON-Lines
    ///
    /// Examples:
    ///   cfgsnap transcode snapshot.json.gz -o snapshot.jsonl.gz
    ///   cfgsnap transcode snapshot.json.gz -o out.jsonl.gz --compact --progress
    Transcode {
        /// Input file (gzip-compressed JSON object)
        input: PathBuf,
        /// Output file (gzip-compressed JSON-Lines)
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        settings: ConfigArgs,
        /// Show progress spinner while transcoding
        #[arg(long)]
        progress: bool,
    },
    /// Turn object events (JSON lines on stdin) into work messages on stdout
    Enqueue {
        /// Key pattern overriding the AWS Config snapshot pattern
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Process work messages from stdin, one at a time, against a directory store
    ///
    /// Buckets map to directories under ROOT. One JSON summary line is written
    /// to stdout per completed request; the first failure stops the batch.
    Intake {
        /// Directory holding one subdirectory per bucket
        #[arg(long)]
        root: PathBuf,
        #[command(flatten)]
        settings: ConfigArgs,
        /// Show progress spinner while processing
        #[arg(long)]
        progress: bool,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum ElementFormatArg {
    /// Exact source bytes
    Original,
    /// Insignificant whitespace removed
    Compact,
}

impl From<ElementFormatArg> for ElementFormat {
    fn from(arg: ElementFormatArg) -> Self {
        match arg {
            ElementFormatArg::Original => ElementFormat::Original,
            ElementFormatArg::Compact => ElementFormat::Compact,
        }
    }
}

/// Command-line overrides, applied on top of the config file
#[derive(Args, Debug, Default, Clone)]
struct ConfigArgs {
    /// Top-level field whose array elements become lines
    #[arg(long)]
    target_key: Option<String>,
    /// How each element is written, overriding the config file
    #[arg(long, value_enum)]
    element_format: Option<ElementFormatArg>,
    /// Shorthand for `--element-format compact`
    #[arg(long, conflicts_with = "element_format")]
    compact: bool,
    /// Bytes buffered between the transform and delivery threads
    #[arg(long)]
    coupler_capacity: Option<usize>,
    /// gzip level for the output (0-9)
    #[arg(long)]
    compression_level: Option<u32>,
    /// Bucket receiving transcoded objects
    #[arg(long, env = "OUTPUT_BUCKET")]
    output_bucket: Option<String>,
    /// Prefix prepended to source keys to form destination keys
    #[arg(long, env = "OUTPUT_PREFIX")]
    output_prefix: Option<String>,
    /// Maximum JSON nesting depth
    #[arg(long)]
    max_depth: Option<usize>,
    /// Maximum bytes per array element
    #[arg(long)]
    max_element_bytes: Option<usize>,
    /// Report peak resident memory
    #[arg(long)]
    measure_memory: bool,
}

impl ConfigArgs {
    fn apply(&self, config: &mut TranscodeConfig) {
        if let Some(key) = &self.target_key {
            config.target_key = key.clone();
        }
        if let Some(format) = self.element_format {
            config.element_format = format.into();
        } else if self.compact {
            config.element_format = ElementFormat::Compact;
        }
        if let Some(capacity) = self.coupler_capacity {
            config.coupler_capacity = capacity;
        }
        if let Some(level) = self.compression_level {
            config.compression_level = level;
        }
        if let Some(bucket) = &self.output_bucket {
            config.output_bucket = Some(bucket.clone());
        }
        if let Some(prefix) = &self.output_prefix {
            config.output_prefix = prefix.clone();
        }
        if let Some(depth) = self.max_depth {
            config.limits.max_nesting_depth = depth;
        }
        if let Some(bytes) = self.max_element_bytes {
            config.limits.max_element_bytes = bytes;
        }
        if self.measure_memory {
            config.measure_memory = true;
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("failed to read config file {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config file {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("stdin line {line} is not a valid object event: {source}")]
    Event {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// One stdout line per completed intake request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RequestSummary {
    source: String,
    destination: String,
    count: u64,
    duration_ms: u64,
    compressed_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    peak_rss_bytes: Option<u64>,
}

impl From<&CompletedRequest> for RequestSummary {
    fn from(done: &CompletedRequest) -> Self {
        Self {
            source: done.request.source.to_string(),
            destination: done.request.destination.to_string(),
            count: done.result.item_count,
            duration_ms: done.result.duration_ms(),
            compressed_bytes: done.result.compressed_bytes,
            peak_rss_bytes: done.result.peak_rss_bytes,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.command {
        Commands::Transcode {
            input,
            output,
            settings,
            progress,
        } => {
            let config = load_config(cli.config.as_deref(), &settings)?;
            handle_transcode(&input, &output, config, progress)?;
        }
        Commands::Enqueue { pattern } => {
            let filter = match pattern {
                Some(pattern) => SnapshotKeyFilter::new(&pattern)?,
                None => SnapshotKeyFilter::snapshots()?,
            };
            let stdin = io::stdin();
            let stdout = io::stdout();
            handle_enqueue(&filter, stdin.lock(), &mut stdout.lock())?;
        }
        Commands::Intake {
            root,
            settings,
            progress,
        } => {
            let config = load_config(cli.config.as_deref(), &settings)?;
            let stdin = io::stdin();
            let stdout = io::stdout();
            handle_intake(&root, config, stdin.lock(), &mut stdout.lock(), progress)?;
        }
    }

    Ok(())
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    // A subscriber may already be installed when embedded; keep it.
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// Defaults, then the TOML file, then environment and flags
fn load_config(
    path: Option<&Path>,
    overrides: &ConfigArgs,
) -> Result<TranscodeConfig, Box<dyn Error>> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => TranscodeConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<TranscodeConfig, CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| CliError::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

fn handle_transcode(
    input: &Path,
    output: &Path,
    config: TranscodeConfig,
    show_progress: bool,
) -> Result<TranscodeResult, Box<dyn Error>> {
    let mut progress_bar = show_progress.then(|| create_spinner("Transcoding snapshot"));
    let outcome = transcode_file(input, output, config);
    if let Some(pb) = progress_bar.take() {
        match &outcome {
            Ok(result) => pb.finish_with_message(format!(
                "Transcoded {} items in {:.2?}",
                result.item_count, result.duration
            )),
            Err(_) => pb.abandon_with_message("Transcoding failed"),
        }
    }

    let result = outcome?;
    report_transcode_summary(&result, output)?;
    Ok(result)
}

fn report_transcode_summary(result: &TranscodeResult, output: &Path) -> io::Result<()> {
    let secs = result.duration.as_secs_f64().max(f64::EPSILON);
    let mut stderr = io::stderr().lock();
    write!(
        &mut stderr,
        "Transcoded to {} (items: {}, compressed bytes: {}, elapsed: {:.2?}, {:.1} items/s",
        output.display(),
        result.item_count,
        result.compressed_bytes,
        result.duration,
        result.item_count as f64 / secs
    )?;
    if let Some(rss) = result.peak_rss_bytes {
        write!(&mut stderr, ", peak RSS: {:.1} MiB", rss as f64 / (1024.0 * 1024.0))?;
    }
    writeln!(&mut stderr, ")")
}

fn handle_enqueue<R: BufRead, W: Write>(
    filter: &SnapshotKeyFilter,
    input: R,
    output: &mut W,
) -> Result<usize, Box<dyn Error>> {
    let mut queued = 0usize;
    for (index, line) in input.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: ObjectEvent = serde_json::from_str(&line).map_err(|source| CliError::Event {
            line: index + 1,
            source,
        })?;
        if let Some(message) = filter.route(&event) {
            writeln!(output, "{}", message.to_json()?)?;
            info!(bucket = %message.bucket, key = %message.key, "queued work message");
            queued += 1;
        }
    }
    output.flush()?;
    Ok(queued)
}

fn handle_intake<R: BufRead, W: Write>(
    root: &Path,
    config: TranscodeConfig,
    input: R,
    output: &mut W,
    show_progress: bool,
) -> Result<usize, Box<dyn Error>> {
    let mut messages = Vec::new();
    for line in input.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            messages.push(line);
        }
    }

    let store = FsObjectStore::new(root);
    let transcoder = Transcoder::new(&store, &store, config)?;
    let mut intake = WorkIntake::new(transcoder);

    let mut progress_bar =
        show_progress.then(|| create_spinner(&format!("Processing {} messages", messages.len())));
    let report = intake.process(&messages);
    if let Some(pb) = progress_bar.take() {
        pb.finish_with_message(format!(
            "Processed {} of {} messages",
            report.completed.len(),
            messages.len()
        ));
    }

    for done in &report.completed {
        serde_json::to_writer(&mut *output, &RequestSummary::from(done))?;
        writeln!(output)?;
    }
    output.flush()?;

    Ok(report.into_result()?.len())
}

fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) =
        ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}")
    {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
