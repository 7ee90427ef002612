// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw capture: log every decoded reading, unfiltered, to a timestamped
//! JSON-lines file.
//!
//! Each line is `{"timestamp": "<RFC 3339>", "data": <reading>}`. Useful for
//! discovering which sensors are in range and replaying them later with
//! `wxrelay --input`.

use crate::reading::RawReading;
use crate::source::AsyncJsonLines;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use tokio::io::AsyncBufRead;

#[derive(Serialize)]
struct CaptureEntry<'a> {
    timestamp: String,
    data: &'a serde_json::Map<String, serde_json::Value>,
}

/// Capture file writer.
pub struct CaptureWriter {
    path: PathBuf,
    out: LineWriter<File>,
    written: u64,
}

impl CaptureWriter {
    /// Create `rtl433_log_<timestamp>.jsonl` inside `dir`.
    pub fn create(dir: impl AsRef<Path>, started: DateTime<Utc>) -> io::Result<Self> {
        let path = dir.as_ref().join(capture_file_name(started));
        Self::open(path)
    }

    /// Append to an explicit file.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            out: LineWriter::new(file),
            written: 0,
        })
    }

    /// Write one reading received at `at`.
    pub fn write(&mut self, reading: &RawReading, at: DateTime<Utc>) -> io::Result<()> {
        let entry = CaptureEntry {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            data: reading.fields(),
        };
        serde_json::to_writer(&mut self.out, &entry)?;
        self.out.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    /// Record every reading from `source` until it ends or `shutdown`
    /// resolves, calling `on_reading` after each one is written.
    ///
    /// Malformed lines are logged and skipped. Returns the number of
    /// readings written by this call.
    pub async fn record_stream<R, F, C>(
        &mut self,
        source: &mut AsyncJsonLines<R>,
        shutdown: F,
        mut on_reading: C,
    ) -> io::Result<u64>
    where
        R: AsyncBufRead + Unpin,
        F: Future<Output = ()>,
        C: FnMut(&RawReading),
    {
        tokio::pin!(shutdown);
        let before = self.written;

        loop {
            let item = tokio::select! {
                _ = &mut shutdown => break,
                item = source.next() => item?,
            };
            match item {
                Some(Ok(reading)) => {
                    self.write(&reading, Utc::now())?;
                    on_reading(&reading);
                }
                Some(Err(e)) => {
                    tracing::warn!(line = source.line_no(), error = %e, "Skipped malformed line");
                }
                None => break,
            }
        }

        Ok(self.written - before)
    }

    /// Flush buffered output.
    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    /// Capture file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Readings written so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

/// `rtl433_log_2026-05-01T10-00-00-000Z.jsonl` for a capture started at
/// 2026-05-01 10:00:00 UTC.
pub fn capture_file_name(started: DateTime<Utc>) -> String {
    let stamp = started
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("rtl433_log_{}.jsonl", stamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::decode_line;
    use chrono::TimeZone;

    #[test]
    fn test_capture_file_name() {
        let started = Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(
            capture_file_name(started),
            "rtl433_log_2026-05-01T10-00-00-000Z.jsonl"
        );
    }

    #[test]
    fn test_capture_writes_timestamped_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let started = Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap();
        let mut writer = CaptureWriter::create(dir.path(), started).expect("create");

        let a = decode_line(r#"{"model":"a","id":1,"temperature_C":20.1}"#).expect("a");
        let b = decode_line(r#"{"model":"b","channel":2}"#).expect("b");
        writer.write(&a, started).expect("write a");
        writer.write(&b, started + chrono::Duration::milliseconds(1500)).expect("write b");
        writer.flush().expect("flush");
        assert_eq!(writer.written(), 2);

        let content = std::fs::read_to_string(writer.path()).expect("read");
        let entries: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).expect("json"))
            .collect();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["timestamp"], "2026-05-01T10:00:00.000Z");
        assert_eq!(entries[0]["data"]["temperature_C"], 20.1);
        assert_eq!(entries[1]["timestamp"], "2026-05-01T10:00:01.500Z");
        assert_eq!(entries[1]["data"]["model"], "b");
    }

    #[tokio::test]
    async fn test_record_stream_skips_invalid_utf8_line() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut writer = CaptureWriter::open(dir.path().join("capture.jsonl")).expect("open");

        let mut input = b"{\"model\":\"a\",\"name\":\"\xff\xfe\"}\n".to_vec();
        input.extend_from_slice(b"\n{\"model\":\"b\",\"id\":3}\n");
        let mut source = AsyncJsonLines::new(&input[..]);

        let mut seen = Vec::new();
        let written = writer
            .record_stream(&mut source, std::future::pending(), |r| {
                seen.push(r.model().to_string())
            })
            .await
            .expect("record");
        writer.flush().expect("flush");

        assert_eq!(written, 1);
        assert_eq!(seen, vec!["b".to_string()]);
        let content = std::fs::read_to_string(writer.path()).expect("read");
        let entry: serde_json::Value =
            serde_json::from_str(content.trim_end()).expect("single entry");
        assert_eq!(entry["data"]["id"], 3);
    }
}
