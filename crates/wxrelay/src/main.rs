// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! wxrelay CLI
//!
//! Runs the radio decoder and relays the tracked sensor's records to the
//! configured sink.
//!
//! # Usage
//!
//! ```bash
//! # Spawn rtl_433 and relay with the given configuration
//! wxrelay --config wxrelay.toml
//!
//! # Replay a recorded stream, printing instead of storing
//! wxrelay --config wxrelay.toml --input readings.jsonl --dry-run
//!
//! # Read readings from stdin
//! rtl_433 -F json | wxrelay --input -
//!
//! # Log every decoded reading to rtl433_log_<timestamp>.jsonl
//! wxrelay capture -o captures/
//!
//! # Generate and check a configuration file
//! wxrelay gen-config -o wxrelay.toml
//! wxrelay validate -c wxrelay.toml
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;
use wxrelay::capture::CaptureWriter;
use wxrelay::config::SinkKind;
use wxrelay::decoder::DecoderProcess;
use wxrelay::sink::StdoutSink;
use wxrelay::{AsyncJsonLines, ConfiguredSink, Pipeline, PipelineStats, RelayConfig, Sink};

#[derive(Parser, Debug)]
#[command(name = "wxrelay")]
#[command(author = "naskel.com")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Relay rtl_433 sensor readings with change detection and daily quotas")]
struct Cli {
    /// Configuration file path (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Read readings from a file instead of spawning the decoder (use - for stdin)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Print emitted records to stdout instead of the configured sink
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Verbose mode (debug logs)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "wxrelay.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Log every decoded reading, unfiltered
    Capture {
        /// Directory for the capture file
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

/// Where readings come from.
enum Input {
    Decoder(DecoderProcess),
    File(AsyncJsonLines<BufReader<tokio::fs::File>>),
    Stdin(AsyncJsonLines<BufReader<tokio::io::Stdin>>),
}

impl Input {
    async fn open(config: &RelayConfig, input: Option<&Path>) -> Result<Self> {
        match input {
            Some(path) if path == Path::new("-") => {
                Ok(Input::Stdin(AsyncJsonLines::new(BufReader::new(tokio::io::stdin()))))
            }
            Some(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("Failed to open input {}", path.display()))?;
                Ok(Input::File(AsyncJsonLines::new(BufReader::new(file))))
            }
            None => {
                let decoder =
                    DecoderProcess::spawn(&config.decoder).context("Failed to start decoder")?;
                Ok(Input::Decoder(decoder))
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries records in dry runs
    let level = if cli.verbose { "wxrelay=debug" } else { cli.log_level.as_str() };
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Some(cmd) = &cli.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
            Commands::Capture { output } => {
                let config = load_config(cli.config.as_deref())?;
                cmd_capture(&config, cli.input.as_deref(), output).await
            }
        };
    }

    let config = load_config(cli.config.as_deref())?;

    let stats = if cli.dry_run {
        tracing::info!(sensor = %config.sensor.model, sink = "stdout", "Starting relay (dry run)");
        relay(&config, cli.input.as_deref(), StdoutSink).await?
    } else {
        let sink = ConfiguredSink::from_config(&config.sink)
            .await
            .context("Failed to open sink")?;
        tracing::info!(
            sensor = %config.sensor.model,
            sink = %sink.describe(),
            "Starting relay"
        );
        relay(&config, cli.input.as_deref(), sink).await?
    };

    tracing::info!(
        received = stats.received,
        malformed = stats.malformed,
        discarded = stats.discarded,
        skipped = stats.skipped,
        emitted_changed = stats.emitted_changed,
        emitted_heartbeat = stats.emitted_heartbeat,
        sink_failures = stats.sink_failures,
        "Relay stopped"
    );

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RelayConfig> {
    match path {
        Some(path) => RelayConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display())),
        None => {
            tracing::info!("No --config given, using built-in defaults");
            Ok(RelayConfig::default())
        }
    }
}

async fn relay<S: Sink>(
    config: &RelayConfig,
    input: Option<&Path>,
    sink: S,
) -> Result<PipelineStats> {
    let mut pipeline = Pipeline::from_config(config, sink);

    match Input::open(config, input).await? {
        Input::Decoder(mut decoder) => {
            let result = pipeline
                .run_until(decoder.readings(), shutdown_signal())
                .await
                .map(|_| ());
            decoder.shutdown().await.context("Failed to stop decoder")?;
            result.context("Failed to read decoder output")?;
        }
        Input::File(mut source) => {
            pipeline
                .run_until(&mut source, shutdown_signal())
                .await
                .context("Failed to read input")?;
        }
        Input::Stdin(mut source) => {
            pipeline
                .run_until(&mut source, shutdown_signal())
                .await
                .context("Failed to read stdin")?;
        }
    }

    Ok(pipeline.stats().clone())
}

/// Resolves on Ctrl+C. Pends forever if the handler cannot be installed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

async fn cmd_capture(config: &RelayConfig, input: Option<&Path>, dir: &Path) -> Result<()> {
    let mut writer = CaptureWriter::create(dir, Utc::now())
        .with_context(|| format!("Failed to create capture file in {}", dir.display()))?;
    tracing::info!(path = %writer.path().display(), "Capturing raw readings");

    // Echo each captured reading on stdout
    let echo = |reading: &wxrelay::RawReading| match serde_json::to_string(reading.fields()) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::warn!(error = %e, "Cannot print reading"),
    };

    let result = match Input::open(config, input).await? {
        Input::Decoder(mut decoder) => {
            let result = writer
                .record_stream(decoder.readings(), shutdown_signal(), echo)
                .await;
            decoder.shutdown().await.context("Failed to stop decoder")?;
            result
        }
        Input::File(mut source) => {
            writer.record_stream(&mut source, shutdown_signal(), echo).await
        }
        Input::Stdin(mut source) => {
            writer.record_stream(&mut source, shutdown_signal(), echo).await
        }
    };
    result.context("Failed to capture readings")?;

    writer.flush().context("Failed to flush capture file")?;
    tracing::info!(
        path = %writer.path().display(),
        readings = writer.written(),
        "Capture stopped"
    );
    Ok(())
}

fn cmd_gen_config(output: &Path) -> Result<()> {
    std::fs::write(output, RelayConfig::example())
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(path: &Path) -> Result<()> {
    match RelayConfig::from_file(path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Sensor:    {}", config.sensor.model);
            println!("Identity:  {}", config.sensor.identity_field);
            println!("Required:  {}", config.sensor.required_fields.join(", "));
            println!("Detector:  {:?}", config.detector.strategy);
            println!(
                "Gate:      {} changes/day, heartbeat every {}s",
                config.gate.daily_quota, config.gate.min_interval_secs
            );
            match config.sink.kind {
                SinkKind::Jsonl => {
                    let path = config.sink.path.as_deref().unwrap_or(Path::new("?"));
                    println!("Sink:      jsonl {}", path.display());
                }
                SinkKind::Http => {
                    println!("Sink:      http {}", config.sink.url.as_deref().unwrap_or("?"))
                }
                SinkKind::Stdout => println!("Sink:      stdout"),
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
