// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Record merger: keyed accumulation of partial readings.
//!
//! Entries live until the pipeline evicts them after a successful emission.
//! An identity that never becomes complete stays cached forever unless a
//! capacity is configured, in which case the least recently merged identity
//! is dropped to make room.

use crate::reading::{RawReading, SensorRecord};
use lru::LruCache;
use std::num::NonZeroUsize;

/// Cache of in-progress composite records keyed by sensor identity.
pub struct RecordMerger {
    records: LruCache<String, SensorRecord>,
}

impl RecordMerger {
    /// Unbounded merger (no expiry, no capacity limit).
    pub fn new() -> Self {
        Self {
            records: LruCache::unbounded(),
        }
    }

    /// Merger holding at most `capacity` identities.
    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            records: LruCache::new(capacity),
        }
    }

    /// Bounded when `capacity` is a positive number, unbounded otherwise.
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        match capacity.and_then(NonZeroUsize::new) {
            Some(cap) => Self::bounded(cap),
            None => Self::new(),
        }
    }

    /// Fold `reading` into the record for `identity`, creating it if needed.
    ///
    /// Returns the updated composite; the cache stays the source of truth.
    pub fn merge(&mut self, identity: &str, reading: &RawReading) -> &SensorRecord {
        if !self.records.contains(identity) && self.records.len() == self.records.cap().get() {
            if let Some((dropped, _)) = self.records.peek_lru() {
                tracing::debug!(
                    identity = %dropped,
                    capacity = self.records.cap().get(),
                    "Record cache full, dropping least recently merged sensor"
                );
            }
        }

        let record = self
            .records
            .get_or_insert_mut(identity.to_string(), SensorRecord::default);
        record.absorb(reading);
        record
    }

    /// Remove the record for `identity` (called after a successful emission).
    pub fn evict(&mut self, identity: &str) -> Option<SensorRecord> {
        self.records.pop(identity)
    }

    /// Peek at a cached record without touching recency.
    pub fn get(&self, identity: &str) -> Option<&SensorRecord> {
        self.records.peek(identity)
    }

    /// Number of cached identities.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for RecordMerger {
    fn default() -> Self {
        Self::new()
    }
}
