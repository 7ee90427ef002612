// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! wxrelay
//!
//! Relays readings from an rtl_433-style radio decoder to a durable store,
//! emitting a sensor's record only when it changed materially or when a
//! heartbeat interval elapsed, under a per-day quota.
//!
//! This crate provides:
//! - Decoding of newline-delimited JSON readings
//! - Merging of partial readings into one composite record per sensor
//! - Change detection by per-field thresholds or content fingerprint
//! - An emission gate with daily quota and heartbeat interval
//! - JSON-lines, HTTP and stdout sinks
//! - Raw capture of every decoded reading
//!
//! # Overview
//!
//! ```text
//! decoder stdout --> AsyncJsonLines --> Pipeline --> RecordMerger --> EmissionGate --> Sink
//!                                       |                              |
//!                                  model filter                ChangeDetector
//! ```
//!
//! Everything runs on one logical task; readings are processed strictly in
//! arrival order.

pub mod capture;
pub mod config;
pub mod decoder;
pub mod detector;
pub mod gate;
pub mod merger;
pub mod pipeline;
pub mod reading;
pub mod sink;
pub mod source;

pub use config::{ConfigError, RelayConfig};
pub use detector::ChangeDetector;
pub use gate::{Decision, EmissionGate, EmitReason, GatePolicy};
pub use merger::RecordMerger;
pub use pipeline::{Outcome, Pipeline, PipelineStats, TrackedSensor};
pub use reading::{RawReading, SensorRecord};
pub use sink::{ConfiguredSink, EmittedRecord, Sink, SinkError};
pub use source::{decode_bytes, decode_line, AsyncJsonLines, DecodeError, JsonLines};
