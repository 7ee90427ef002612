// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sink adapters: where emitted records go.
//!
//! - [`JsonlSink`]: append one JSON object per line to a file
//! - [`HttpSink`]: POST each record as JSON to a remote collection endpoint
//! - [`StdoutSink`]: print records (dry runs)
//! - [`MemorySink`]: keep records in memory, optionally failing on demand
//!
//! [`ConfiguredSink`] picks one of the first three from [`SinkConfig`].

use crate::config::{SinkConfig, SinkKind};
use crate::gate::EmitReason;
use crate::reading::Fields;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

/// Sink errors. None of them stop the relay.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("sink rejected record with HTTP status {status}")]
    Rejected { status: u16 },

    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("invalid sink configuration: {0}")]
    Config(String),
}

/// A finalized record handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedRecord {
    /// Sensor identity (`model/id`).
    pub identity: String,
    /// Sensor model.
    pub model: String,
    /// When the gate accepted the record.
    pub emitted_at: DateTime<Utc>,
    /// Which gate path fired.
    pub reason: EmitReason,
    /// Composite fields of the record.
    pub fields: Fields,
}

/// Durable destination for emitted records.
pub trait Sink: Send + Sync {
    /// Append one record.
    fn append(
        &self,
        record: &EmittedRecord,
    ) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// JSON-lines file sink.
pub struct JsonlSink {
    path: PathBuf,
    file: tokio::sync::Mutex<tokio::fs::File>,
}

impl JsonlSink {
    /// Open (or create) `path` for appending.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: tokio::sync::Mutex::new(file),
        })
    }

    /// Target file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for JsonlSink {
    async fn append(&self, record: &EmittedRecord) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// HTTP sink: `POST <url>` with the record as JSON body.
///
/// Any non-2xx response is a failure.
pub struct HttpSink {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl HttpSink {
    /// Build a sink with a per-request timeout.
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Sink for HttpSink {
    async fn append(&self, record: &EmittedRecord) -> Result<(), SinkError> {
        let mut request = self.client.post(&self.url).json(record);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Prints each record as one JSON line on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl Sink for StdoutSink {
    async fn append(&self, record: &EmittedRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(record)?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

/// In-memory sink. Clones share the same storage.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<EmittedRecord>>>,
    failing: Arc<AtomicBool>,
}

impl MemorySink {
    /// Empty, healthy sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent appends fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of stored records.
    pub fn records(&self) -> Vec<EmittedRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// True when nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Sink for MemorySink {
    async fn append(&self, record: &EmittedRecord) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Unavailable("memory sink set to fail".into()));
        }
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

/// Sink selected at runtime from configuration.
pub enum ConfiguredSink {
    Jsonl(JsonlSink),
    Http(HttpSink),
    Stdout(StdoutSink),
}

impl ConfiguredSink {
    /// Build the sink described by `config`.
    pub async fn from_config(config: &SinkConfig) -> Result<Self, SinkError> {
        match config.kind {
            SinkKind::Jsonl => {
                let path = config
                    .path
                    .as_ref()
                    .ok_or_else(|| SinkError::Config("jsonl sink requires `path`".into()))?;
                Ok(ConfiguredSink::Jsonl(JsonlSink::open(path).await?))
            }
            SinkKind::Http => {
                let url = config
                    .url
                    .as_ref()
                    .ok_or_else(|| SinkError::Config("http sink requires `url`".into()))?;
                Ok(ConfiguredSink::Http(HttpSink::new(
                    url.clone(),
                    config.token.clone(),
                    Duration::from_secs(config.timeout_secs),
                )?))
            }
            SinkKind::Stdout => Ok(ConfiguredSink::Stdout(StdoutSink)),
        }
    }

    /// Short description for startup logs.
    pub fn describe(&self) -> String {
        match self {
            ConfiguredSink::Jsonl(s) => format!("jsonl:{}", s.path().display()),
            ConfiguredSink::Http(s) => format!("http:{}", s.url()),
            ConfiguredSink::Stdout(_) => "stdout".to_string(),
        }
    }
}

impl Sink for ConfiguredSink {
    async fn append(&self, record: &EmittedRecord) -> Result<(), SinkError> {
        match self {
            ConfiguredSink::Jsonl(s) => s.append(record).await,
            ConfiguredSink::Http(s) => s.append(record).await,
            ConfiguredSink::Stdout(s) => s.append(record).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn record(identity: &str, t: f64) -> EmittedRecord {
        let serde_json::Value::Object(fields) = json!({"model": "m", "temperature_C": t}) else {
            unreachable!()
        };
        EmittedRecord {
            identity: identity.to_string(),
            model: "m".to_string(),
            emitted_at: Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap(),
            reason: EmitReason::Changed,
            fields,
        }
    }

    #[tokio::test]
    async fn test_memory_sink_stores_and_fails_on_demand() {
        let sink = MemorySink::new();
        let handle = sink.clone();

        sink.append(&record("m/1", 20.0)).await.expect("append");
        assert_eq!(handle.len(), 1);

        handle.set_failing(true);
        let err = sink.append(&record("m/1", 21.0)).await.unwrap_err();
        assert!(matches!(err, SinkError::Unavailable(_)));
        assert_eq!(handle.len(), 1);

        handle.set_failing(false);
        sink.append(&record("m/1", 22.0)).await.expect("append");
        assert_eq!(handle.records()[1].fields["temperature_C"], json!(22.0));
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.jsonl");

        {
            let sink = JsonlSink::open(&path).await.expect("open");
            sink.append(&record("m/1", 20.0)).await.expect("append");
        }
        {
            // Reopening appends rather than truncates
            let sink = JsonlSink::open(&path).await.expect("reopen");
            sink.append(&record("m/2", 21.0)).await.expect("append");
        }

        let content = std::fs::read_to_string(&path).expect("read");
        let lines: Vec<EmittedRecord> = content
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], record("m/1", 20.0));
        assert_eq!(lines[1].identity, "m/2");
    }

    #[test]
    fn test_emitted_record_wire_format() {
        let value = serde_json::to_value(record("m/1", 20.5)).expect("serialize");
        assert_eq!(value["identity"], json!("m/1"));
        assert_eq!(value["reason"], json!("changed"));
        assert_eq!(value["emitted_at"], json!("2026-05-01T10:00:00Z"));
        assert_eq!(value["fields"]["temperature_C"], json!(20.5));
    }

    #[tokio::test]
    async fn test_configured_sink_requires_path_or_url() {
        let mut config = SinkConfig {
            kind: SinkKind::Jsonl,
            ..SinkConfig::default()
        };
        config.path = None;
        assert!(matches!(
            ConfiguredSink::from_config(&config).await,
            Err(SinkError::Config(_))
        ));

        config.kind = SinkKind::Http;
        config.url = None;
        assert!(matches!(
            ConfiguredSink::from_config(&config).await,
            Err(SinkError::Config(_))
        ));

        config.kind = SinkKind::Stdout;
        let sink = ConfiguredSink::from_config(&config).await.expect("stdout");
        assert_eq!(sink.describe(), "stdout");
    }

    #[tokio::test]
    async fn test_configured_sink_builds_http() {
        let config = SinkConfig {
            kind: SinkKind::Http,
            url: Some("http://127.0.0.1:9/weather_logs".to_string()),
            token: Some("secret".to_string()),
            ..SinkConfig::default()
        };
        let sink = ConfiguredSink::from_config(&config).await.expect("http");
        assert_eq!(sink.describe(), "http:http://127.0.0.1:9/weather_logs");
    }
}
