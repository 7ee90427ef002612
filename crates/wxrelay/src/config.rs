// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! TOML configuration for the relay.

use crate::detector::ChangeDetector;
use crate::gate::{GatePolicy, MAX_INTERVAL_SECS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Which sensor to track and when its record is complete.
    #[serde(default)]
    pub sensor: SensorConfig,

    /// Change detection strategy.
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Quota and heartbeat interval.
    #[serde(default)]
    pub gate: GateConfig,

    /// Record cache bound.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Destination for emitted records.
    #[serde(default)]
    pub sink: SinkConfig,

    /// External decoder process.
    #[serde(default)]
    pub decoder: DecoderConfig,
}

/// Tracked sensor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Exact `model` value of the tracked sensor.
    #[serde(default = "default_model")]
    pub model: String,

    /// Field correlating partial readings of one sensor.
    #[serde(default = "default_identity_field")]
    pub identity_field: String,

    /// Fields that must all be present before a record is evaluated.
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<String>,
}

fn default_model() -> String {
    "LaCrosse-TX141Bv3".to_string()
}

fn default_identity_field() -> String {
    "id".to_string()
}

fn default_required_fields() -> Vec<String> {
    vec!["temperature_C".to_string()]
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            identity_field: default_identity_field(),
            required_fields: default_required_fields(),
        }
    }
}

/// Change detection strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorStrategy {
    /// Per-field delta thresholds.
    #[default]
    Threshold,
    /// Content hash of the whole record.
    Fingerprint,
}

/// Change detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default)]
    pub strategy: DetectorStrategy,

    /// Field -> maximum tolerated absolute delta (threshold strategy).
    #[serde(default = "default_thresholds")]
    pub thresholds: BTreeMap<String, f64>,

    /// Fields left out of the content hash (fingerprint strategy).
    #[serde(default = "default_ignore_fields")]
    pub ignore_fields: Vec<String>,
}

fn default_thresholds() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("temperature_C".to_string(), 0.5),
        ("wind_avg_km_h".to_string(), 0.5),
        ("wind_dir_deg".to_string(), 10.0),
    ])
}

fn default_ignore_fields() -> Vec<String> {
    vec!["time".to_string()]
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            strategy: DetectorStrategy::default(),
            thresholds: default_thresholds(),
            ignore_fields: default_ignore_fields(),
        }
    }
}

impl DetectorConfig {
    /// Build the configured detector.
    pub fn build(&self) -> ChangeDetector {
        match self.strategy {
            DetectorStrategy::Threshold => ChangeDetector::Threshold {
                thresholds: self.thresholds.clone(),
            },
            DetectorStrategy::Fingerprint => {
                ChangeDetector::hashed(self.ignore_fields.iter().cloned())
            }
        }
    }
}

/// Emission gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Heartbeat interval in seconds (0 = emit every complete record).
    #[serde(default = "default_min_interval")]
    pub min_interval_secs: u64,

    /// Change-triggered emissions allowed per UTC day.
    #[serde(default = "default_daily_quota")]
    pub daily_quota: u32,
}

fn default_min_interval() -> u64 {
    3 * 3600
}

fn default_daily_quota() -> u32 {
    20
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: default_min_interval(),
            daily_quota: default_daily_quota(),
        }
    }
}

impl GateConfig {
    /// Gate policy for these settings.
    pub fn policy(&self) -> GatePolicy {
        GatePolicy::new(self.min_interval_secs, self.daily_quota)
    }
}

/// Record cache settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cached identities (unset = unbounded).
    #[serde(default)]
    pub capacity: Option<usize>,
}

/// Sink kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Append JSON lines to a file.
    #[default]
    Jsonl,
    /// POST JSON to an HTTP endpoint.
    Http,
    /// Print to stdout.
    Stdout,
}

/// Sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub kind: SinkKind,

    /// Output file (jsonl).
    #[serde(default = "default_sink_path")]
    pub path: Option<PathBuf>,

    /// Endpoint (http).
    #[serde(default)]
    pub url: Option<String>,

    /// Bearer token (http).
    #[serde(default)]
    pub token: Option<String>,

    /// Request timeout in seconds (http).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_sink_path() -> Option<PathBuf> {
    Some(PathBuf::from("weather_logs.jsonl"))
}

fn default_timeout() -> u64 {
    10
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            path: default_sink_path(),
            url: None,
            token: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// External decoder command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    #[serde(default = "default_decoder_command")]
    pub command: String,

    #[serde(default = "default_decoder_args")]
    pub args: Vec<String>,
}

fn default_decoder_command() -> String {
    "rtl_433".to_string()
}

fn default_decoder_args() -> Vec<String> {
    vec!["-F".to_string(), "json".to_string()]
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            command: default_decoder_command(),
            args: default_decoder_args(),
        }
    }
}

impl RelayConfig {
    /// Load and validate a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensor.model.trim().is_empty() {
            return Err(ConfigError::Invalid("sensor.model is empty".into()));
        }
        if self.sensor.identity_field.trim().is_empty() {
            return Err(ConfigError::Invalid("sensor.identity_field is empty".into()));
        }
        if self.sensor.required_fields.is_empty() {
            return Err(ConfigError::Invalid(
                "sensor.required_fields must name at least one field".into(),
            ));
        }
        if let Some(empty) = self
            .sensor
            .required_fields
            .iter()
            .position(|f| f.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "sensor.required_fields[{}] is empty",
                empty
            )));
        }

        if self.detector.strategy == DetectorStrategy::Threshold {
            if self.detector.thresholds.is_empty() {
                return Err(ConfigError::Invalid(
                    "threshold strategy needs at least one detector.thresholds entry".into(),
                ));
            }
            for (field, limit) in &self.detector.thresholds {
                if !limit.is_finite() || *limit < 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "threshold for '{}' must be a finite, non-negative number (got {})",
                        field, limit
                    )));
                }
            }
        }

        if let Some(empty) = self
            .detector
            .ignore_fields
            .iter()
            .position(|f| f.trim().is_empty())
        {
            return Err(ConfigError::Invalid(format!(
                "detector.ignore_fields[{}] is empty",
                empty
            )));
        }

        if self.gate.min_interval_secs > MAX_INTERVAL_SECS {
            return Err(ConfigError::Invalid(format!(
                "gate.min_interval_secs exceeds {}",
                MAX_INTERVAL_SECS
            )));
        }

        if self.cache.capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "cache.capacity must be positive (omit it for an unbounded cache)".into(),
            ));
        }

        match self.sink.kind {
            SinkKind::Jsonl if self.sink.path.is_none() => {
                return Err(ConfigError::Invalid("jsonl sink requires sink.path".into()));
            }
            SinkKind::Http => match self.sink.url.as_deref() {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
                Some(url) => {
                    return Err(ConfigError::Invalid(format!(
                        "sink.url must be an http(s) URL (got '{}')",
                        url
                    )));
                }
                None => {
                    return Err(ConfigError::Invalid("http sink requires sink.url".into()));
                }
            },
            _ => {}
        }

        if self.decoder.command.trim().is_empty() {
            return Err(ConfigError::Invalid("decoder.command is empty".into()));
        }

        Ok(())
    }

    /// Commented example configuration.
    pub fn example() -> &'static str {
        EXAMPLE_CONFIG
    }
}

const EXAMPLE_CONFIG: &str = r#"# wxrelay configuration

[sensor]
# Exact `model` of the tracked sensor; other models are discarded
model = "LaCrosse-TX141Bv3"
# Field correlating partial readings of one sensor
identity_field = "id"
# A record is evaluated only once all of these are present
required_fields = ["temperature_C"]

[detector]
# "threshold" (per-field deltas) or "fingerprint" (content hash)
strategy = "threshold"
# Per-transmission fields left out of the fingerprint
ignore_fields = ["time"]

[detector.thresholds]
temperature_C = 0.5
wind_avg_km_h = 0.5
wind_dir_deg = 10.0

[gate]
# Heartbeat: emit at least this often regardless of quota
min_interval_secs = 10800
# Change-triggered emissions per UTC day
daily_quota = 20

[cache]
# capacity = 256

[sink]
# "jsonl", "http" or "stdout"
kind = "jsonl"
path = "weather_logs.jsonl"
# url = "https://example.invalid/weather_logs"
# token = "..."
timeout_secs = 10

[decoder]
command = "rtl_433"
args = ["-F", "json"]
"#;
