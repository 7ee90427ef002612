// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decoded reading sources.
//!
//! The radio decoder prints one JSON object per line. [`decode_line`] turns a
//! single line into a [`RawReading`]. Two pull-based sources sit on top of it:
//! [`JsonLines`] iterates a blocking reader, [`AsyncJsonLines`] a tokio one.
//! Lines are read as raw bytes, so a line that is not valid UTF-8 is just
//! another malformed item. A malformed line yields one `Err` item and the
//! sequence continues with the next line; only an I/O error ends it.

use crate::reading::RawReading;
use std::io::{self, BufRead};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Why a line could not be turned into a reading.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty line")]
    Empty,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("reading is not a JSON object")]
    NotAnObject,

    #[error("reading has no string `model` field")]
    MissingModel,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Decode one line of decoder output.
pub fn decode_line(line: &str) -> Result<RawReading, DecodeError> {
    decode_bytes(line.as_bytes())
}

/// Decode one raw line; invalid UTF-8 is reported as a JSON error.
pub fn decode_bytes(line: &[u8]) -> Result<RawReading, DecodeError> {
    let line = trim_line(line);
    if line.is_empty() {
        return Err(DecodeError::Empty);
    }
    let value: serde_json::Value = serde_json::from_slice(line)?;
    RawReading::try_from(value)
}

fn trim_line(line: &[u8]) -> &[u8] {
    let start = line
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(line.len());
    let end = line
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &line[start..end]
}

/// Iterator of decoded readings over a blocking line-oriented reader.
///
/// Blank lines are skipped. The iterator ends with the reader, or right after
/// yielding a `DecodeError::Io` item.
pub struct JsonLines<R> {
    reader: R,
    buf: Vec<u8>,
    line_no: u64,
    done: bool,
}

impl<R: BufRead> JsonLines<R> {
    /// Wrap a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line_no: 0,
            done: false,
        }
    }

    /// Number of lines consumed so far (including blank and malformed ones).
    pub fn line_no(&self) -> u64 {
        self.line_no
    }
}

impl<R: BufRead> Iterator for JsonLines<R> {
    type Item = Result<RawReading, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line_no += 1;
                    if trim_line(&self.buf).is_empty() {
                        continue;
                    }
                    return Some(decode_bytes(&self.buf));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(DecodeError::Io(e)));
                }
            }
        }
        None
    }
}

/// Async counterpart of [`JsonLines`] over a tokio reader.
///
/// [`next`](Self::next) separates fatal read errors (outer `Err`) from
/// per-line decode failures (inner `Err`).
pub struct AsyncJsonLines<R> {
    reader: R,
    buf: Vec<u8>,
    line_no: u64,
    exhausted: bool,
}

impl<R: AsyncBufRead + Unpin> AsyncJsonLines<R> {
    /// Wrap a buffered async reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line_no: 0,
            exhausted: false,
        }
    }

    /// Next decoded item, or `None` at end of input.
    ///
    /// Cancel safe: bytes of a partially read line stay buffered for the
    /// next call.
    pub async fn next(&mut self) -> io::Result<Option<Result<RawReading, DecodeError>>> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.buf).await?;
            if read == 0 && self.buf.is_empty() {
                self.exhausted = true;
                return Ok(None);
            }

            self.line_no += 1;
            let item = if trim_line(&self.buf).is_empty() {
                None
            } else {
                Some(decode_bytes(&self.buf))
            };
            self.buf.clear();

            if let Some(item) = item {
                return Ok(Some(item));
            }
        }
    }

    /// Number of lines consumed so far (including blank and malformed ones).
    pub fn line_no(&self) -> u64 {
        self.line_no
    }

    /// True once [`next`](Self::next) has reported end of input.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
