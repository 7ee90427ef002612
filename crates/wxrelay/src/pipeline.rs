// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Relay pipeline orchestrator.
//!
//! Owns the record cache, the emission gate and the sink, and pushes each
//! decoded reading through them strictly in arrival order:
//!
//! ```text
//! reading --> model filter --> RecordMerger --> completeness --> EmissionGate --> Sink
//!                                                                    |
//!                                                      evict on successful append
//! ```
//!
//! A sink failure keeps the cached record so the next qualifying reading can
//! retry, but the gate state is not rolled back: the failed emission still
//! counts against the quota and resets the heartbeat timer.

use crate::config::RelayConfig;
use crate::gate::{Decision, EmissionGate, EmitReason};
use crate::merger::RecordMerger;
use crate::reading::RawReading;
use crate::sink::{EmittedRecord, Sink};
use crate::source::{AsyncJsonLines, DecodeError};
use chrono::{DateTime, Utc};
use std::future::Future;
use tokio::io::AsyncBufRead;

/// Which sensor the pipeline tracks.
#[derive(Debug, Clone)]
pub struct TrackedSensor {
    /// Exact `model` value to accept.
    pub model: String,
    /// Field correlating partial readings.
    pub identity_field: String,
    /// Completeness predicate.
    pub required_fields: Vec<String>,
}

impl TrackedSensor {
    /// Tracked sensor from the `[sensor]` section.
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            model: config.sensor.model.clone(),
            identity_field: config.sensor.identity_field.clone(),
            required_fields: config.sensor.required_fields.clone(),
        }
    }
}

/// What happened to one input item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Line could not be decoded.
    Malformed,
    /// Reading from an untracked model.
    Discarded,
    /// Merged; record still misses required fields.
    Incomplete,
    /// Complete record refused by the gate.
    Skipped,
    /// Record appended to the sink and evicted from the cache.
    Emitted(EmitReason),
    /// Gate accepted but the sink failed; record kept for retry.
    SinkFailed,
}

/// Pipeline counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    /// Items handed to the pipeline (readings and decode failures).
    pub received: u64,
    /// Lines that failed to decode.
    pub malformed: u64,
    /// Readings from other models.
    pub discarded: u64,
    /// Readings that left their record incomplete.
    pub incomplete: u64,
    /// Complete records refused by the gate.
    pub skipped: u64,
    /// Change-triggered emissions delivered.
    pub emitted_changed: u64,
    /// Heartbeat emissions delivered.
    pub emitted_heartbeat: u64,
    /// Emissions the sink failed to store.
    pub sink_failures: u64,
}

impl PipelineStats {
    /// Total emissions delivered to the sink.
    pub fn emitted(&self) -> u64 {
        self.emitted_changed + self.emitted_heartbeat
    }

    fn count(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Malformed => self.malformed += 1,
            Outcome::Discarded => self.discarded += 1,
            Outcome::Incomplete => self.incomplete += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Emitted(EmitReason::Changed) => self.emitted_changed += 1,
            Outcome::Emitted(EmitReason::Heartbeat) => self.emitted_heartbeat += 1,
            Outcome::SinkFailed => self.sink_failures += 1,
        }
    }
}

/// Stream-to-sink decision engine with its sink.
pub struct Pipeline<S: Sink> {
    sensor: TrackedSensor,
    merger: RecordMerger,
    gate: EmissionGate,
    sink: S,
    stats: PipelineStats,
}

impl<S: Sink> Pipeline<S> {
    /// Assemble a pipeline from its parts.
    pub fn new(sensor: TrackedSensor, merger: RecordMerger, gate: EmissionGate, sink: S) -> Self {
        Self {
            sensor,
            merger,
            gate,
            sink,
            stats: PipelineStats::default(),
        }
    }

    /// Build a pipeline from configuration.
    pub fn from_config(config: &RelayConfig, sink: S) -> Self {
        Self::new(
            TrackedSensor::from_config(config),
            RecordMerger::with_capacity(config.cache.capacity),
            EmissionGate::new(config.gate.policy(), config.detector.build()),
            sink,
        )
    }

    /// Process one decoded reading at time `now`.
    pub async fn process(&mut self, reading: RawReading, now: DateTime<Utc>) -> Outcome {
        self.stats.received += 1;
        let outcome = self.process_reading(reading, now).await;
        self.stats.count(outcome);
        outcome
    }

    /// Process one item of a decoded reading source.
    ///
    /// Decode failures are logged and counted; they never end the stream.
    pub async fn handle_decoded(
        &mut self,
        item: Result<RawReading, DecodeError>,
        now: DateTime<Utc>,
    ) -> Outcome {
        match item {
            Ok(reading) => self.process(reading, now).await,
            Err(e) => {
                tracing::warn!(error = %e, "Skipped malformed line");
                self.stats.received += 1;
                self.stats.count(Outcome::Malformed);
                Outcome::Malformed
            }
        }
    }

    /// Drain a reading source, stamping each item with the wall clock.
    pub async fn run<I>(&mut self, source: I) -> &PipelineStats
    where
        I: IntoIterator<Item = Result<RawReading, DecodeError>>,
    {
        for item in source {
            self.handle_decoded(item, Utc::now()).await;
        }
        &self.stats
    }

    /// Drain an async reading source until it ends or `shutdown` resolves.
    ///
    /// Malformed lines are counted and skipped; only a read error from the
    /// underlying reader stops the run early.
    pub async fn run_until<R, F>(
        &mut self,
        source: &mut AsyncJsonLines<R>,
        shutdown: F,
    ) -> std::io::Result<&PipelineStats>
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            let item = tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                item = source.next() => item?,
            };

            match item {
                Some(item) => {
                    self.handle_decoded(item, Utc::now()).await;
                }
                None => {
                    tracing::info!(lines = source.line_no(), "Input closed");
                    break;
                }
            }
        }

        Ok(&self.stats)
    }

    async fn process_reading(&mut self, reading: RawReading, now: DateTime<Utc>) -> Outcome {
        if reading.model() != self.sensor.model {
            tracing::trace!(model = reading.model(), "Discarding untracked model");
            return Outcome::Discarded;
        }

        let identity = reading.identity(&self.sensor.identity_field);
        let record = self.merger.merge(&identity, &reading);

        if !record.is_complete(&self.sensor.required_fields) {
            tracing::debug!(
                identity = %identity,
                missing = ?record.missing(&self.sensor.required_fields),
                "Record incomplete, waiting for more readings"
            );
            return Outcome::Incomplete;
        }

        let reason = match self.gate.evaluate(record.fields(), now) {
            Decision::Skip => {
                tracing::debug!(identity = %identity, "Skipped (no significant change within interval)");
                return Outcome::Skipped;
            }
            Decision::Emit(reason) => reason,
        };

        let emitted = EmittedRecord {
            identity: identity.clone(),
            model: reading.model().to_string(),
            emitted_at: now,
            reason,
            fields: record.fields().clone(),
        };

        match self.sink.append(&emitted).await {
            Ok(()) => {
                self.merger.evict(&identity);
                tracing::info!(
                    identity = %identity,
                    ?reason,
                    emits_today = self.gate.emits_today(),
                    "Record emitted"
                );
                Outcome::Emitted(reason)
            }
            Err(e) => {
                tracing::warn!(
                    identity = %identity,
                    error = %e,
                    "Sink append failed, keeping record for retry"
                );
                Outcome::SinkFailed
            }
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Emission gate (read-only).
    pub fn gate(&self) -> &EmissionGate {
        &self.gate
    }

    /// Record cache (read-only).
    pub fn merger(&self) -> &RecordMerger {
        &self.merger
    }

    /// The sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Tracked sensor settings.
    pub fn sensor(&self) -> &TrackedSensor {
        &self.sensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ChangeDetector;
    use crate::gate::GatePolicy;
    use crate::sink::MemorySink;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    const MODEL: &str = "LaCrosse-TX141Bv3";

    fn reading(value: Value) -> RawReading {
        RawReading::try_from(value).expect("valid reading")
    }

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, hour, min, 0).unwrap()
    }

    fn pipeline(sink: MemorySink) -> Pipeline<MemorySink> {
        Pipeline::new(
            TrackedSensor {
                model: MODEL.to_string(),
                identity_field: "id".to_string(),
                required_fields: vec!["temperature_C".to_string(), "humidity".to_string()],
            },
            RecordMerger::new(),
            EmissionGate::new(
                GatePolicy::new(3600, 20),
                ChangeDetector::threshold([("temperature_C", 0.5), ("humidity", 2.0)]),
            ),
            sink,
        )
    }

    #[tokio::test]
    async fn test_untracked_model_discarded() {
        let sink = MemorySink::new();
        let mut p = pipeline(sink.clone());

        let outcome = p
            .process(reading(json!({"model": "Acurite-Tower", "id": 1, "temperature_C": 1.0, "humidity": 1})), at(8, 0))
            .await;

        assert_eq!(outcome, Outcome::Discarded);
        assert!(p.merger().is_empty());
        assert!(sink.is_empty());
        assert_eq!(p.stats().discarded, 1);
    }

    #[tokio::test]
    async fn test_partial_readings_merge_then_emit_and_evict() {
        let sink = MemorySink::new();
        let mut p = pipeline(sink.clone());

        let first = p
            .process(reading(json!({"model": MODEL, "id": 7, "temperature_C": 19.5})), at(8, 0))
            .await;
        assert_eq!(first, Outcome::Incomplete);
        assert_eq!(p.merger().len(), 1);

        let second = p
            .process(reading(json!({"model": MODEL, "id": 7, "humidity": 61})), at(8, 0))
            .await;
        assert_eq!(second, Outcome::Emitted(EmitReason::Changed));
        assert!(p.merger().is_empty());

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity, format!("{}/7", MODEL));
        assert_eq!(records[0].fields["temperature_C"], json!(19.5));
        assert_eq!(records[0].fields["humidity"], json!(61));
        assert_eq!(records[0].emitted_at, at(8, 0));
    }

    #[tokio::test]
    async fn test_unchanged_record_skipped_and_kept() {
        let sink = MemorySink::new();
        let mut p = pipeline(sink.clone());
        let full = json!({"model": MODEL, "id": 7, "temperature_C": 19.5, "humidity": 61});

        assert!(matches!(p.process(reading(full.clone()), at(8, 0)).await, Outcome::Emitted(_)));
        assert_eq!(p.process(reading(full), at(8, 5)).await, Outcome::Skipped);

        // Skipped record stays cached
        assert_eq!(p.merger().len(), 1);
        assert_eq!(sink.len(), 1);
        assert_eq!(p.stats().skipped, 1);
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_record_and_state() {
        let sink = MemorySink::new();
        let mut p = pipeline(sink.clone());

        sink.set_failing(true);
        let outcome = p
            .process(
                reading(json!({"model": MODEL, "id": 3, "temperature_C": 10.0, "humidity": 50})),
                at(9, 0),
            )
            .await;
        assert_eq!(outcome, Outcome::SinkFailed);
        assert_eq!(p.merger().len(), 1);
        // Gate state is not rolled back
        assert_eq!(p.gate().emits_today(), 1);
        assert_eq!(p.gate().state().last_emit_at(), Some(at(9, 0)));

        // Same values again, inside the interval: not retried
        sink.set_failing(false);
        let retry = p
            .process(reading(json!({"model": MODEL, "id": 3, "humidity": 50})), at(9, 1))
            .await;
        assert_eq!(retry, Outcome::Skipped);

        // A material change goes through and evicts
        let changed = p
            .process(reading(json!({"model": MODEL, "id": 3, "humidity": 60})), at(9, 2))
            .await;
        assert_eq!(changed, Outcome::Emitted(EmitReason::Changed));
        assert!(p.merger().is_empty());
        assert_eq!(sink.len(), 1);
        assert_eq!(p.stats().sink_failures, 1);
    }

    #[tokio::test]
    async fn test_malformed_items_counted_and_stream_continues() {
        let sink = MemorySink::new();
        let mut p = pipeline(sink.clone());

        let items = vec![
            Err(DecodeError::NotAnObject),
            Ok(reading(json!({"model": MODEL, "id": 1, "temperature_C": 1.0, "humidity": 1}))),
            Err(DecodeError::MissingModel),
        ];
        let stats = p.run(items).await.clone();

        assert_eq!(stats.received, 3);
        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.emitted(), 1);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_from_config_uses_sensor_section() {
        let mut config = RelayConfig::default();
        config.sensor.model = "Fineoffset-WH24".to_string();
        config.sensor.required_fields = vec!["temperature_C".to_string()];
        config.gate.min_interval_secs = 0;

        let sink = MemorySink::new();
        let mut p = Pipeline::from_config(&config, sink.clone());
        assert_eq!(p.sensor().model, "Fineoffset-WH24");

        let outcome = p
            .process(reading(json!({"model": "Fineoffset-WH24", "id": 5, "temperature_C": 4.2})), at(10, 0))
            .await;
        assert!(matches!(outcome, Outcome::Emitted(_)));
        assert_eq!(sink.records()[0].model, "Fineoffset-WH24");
    }

    #[tokio::test]
    async fn test_run_until_survives_invalid_utf8_line() {
        let sink = MemorySink::new();
        let mut p = pipeline(sink.clone());

        let mut input = br#"{"model":"LaCrosse-TX141Bv3","id":2,"name":""#.to_vec();
        input.extend_from_slice(&[0xff, 0xfe]);
        input.extend_from_slice(b"\"}\n");
        input.extend_from_slice(
            br#"{"model":"LaCrosse-TX141Bv3","id":2,"temperature_C":12.0,"humidity":55}"#,
        );
        input.push(b'\n');

        let mut source = AsyncJsonLines::new(&input[..]);
        let stats = p
            .run_until(&mut source, std::future::pending())
            .await
            .expect("run")
            .clone();

        assert_eq!(stats.received, 2);
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.emitted(), 1);
        assert_eq!(sink.records()[0].fields["temperature_C"], json!(12.0));
    }

    #[tokio::test]
    async fn test_run_until_stops_on_shutdown() {
        let sink = MemorySink::new();
        let mut p = pipeline(sink.clone());

        // Reader that never produces data
        let (_writer, reader) = tokio::io::duplex(64);
        let mut source = AsyncJsonLines::new(tokio::io::BufReader::new(reader));

        let stats = p
            .run_until(&mut source, std::future::ready(()))
            .await
            .expect("run")
            .clone();
        assert_eq!(stats.received, 0);
        assert!(sink.is_empty());
    }
}
