// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Change detection between a candidate record and the last emitted one.
//!
//! Two strategies are available:
//! - **Threshold**: per-field absolute delta limits on numeric fields
//! - **Fingerprint**: SHA-256 of the canonical JSON form of the record,
//!   minus per-transmission fields such as rtl_433's `time`
//!
//! Detectors never mutate state; the gate stores [`ChangeDetector::fingerprint`]
//! of each emitted record in its [`EmissionState`].

use crate::gate::EmissionState;
use crate::reading::{numeric_field, Fields};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// What the gate remembers about the last emitted record.
#[derive(Debug, Clone, PartialEq)]
pub enum Fingerprint {
    /// Field values of the last emitted record (threshold strategy).
    Snapshot(Fields),
    /// Hex SHA-256 of the canonical record (fingerprint strategy).
    Hash(String),
}

/// Materiality test for candidate records.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeDetector {
    /// Different when any configured field moved strictly more than its limit.
    Threshold {
        /// Field name -> maximum tolerated absolute delta.
        thresholds: BTreeMap<String, f64>,
    },
    /// Different when the content hash changed.
    Fingerprint {
        /// Top-level fields left out of the hash.
        ignored: BTreeSet<String>,
    },
}

impl ChangeDetector {
    /// Threshold detector from `(field, max_delta)` pairs.
    pub fn threshold<I, K>(thresholds: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        ChangeDetector::Threshold {
            thresholds: thresholds.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Fingerprint detector hashing everything except `ignored` fields.
    pub fn hashed<I, K>(ignored: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        ChangeDetector::Fingerprint {
            ignored: ignored.into_iter().map(Into::into).collect(),
        }
    }

    /// Does `candidate` differ materially from the last emitted record?
    ///
    /// Always true when nothing has been emitted yet.
    pub fn is_different(&self, candidate: &Fields, state: &EmissionState) -> bool {
        let Some(last) = state.last_fingerprint() else {
            return true;
        };

        match (self, last) {
            (ChangeDetector::Threshold { thresholds }, Fingerprint::Snapshot(previous)) => {
                thresholds.iter().any(|(field, max_delta)| {
                    let delta =
                        (numeric_field(candidate, field) - numeric_field(previous, field)).abs();
                    delta > *max_delta
                })
            }
            (ChangeDetector::Fingerprint { ignored }, Fingerprint::Hash(previous)) => {
                content_hash(candidate, ignored) != *previous
            }
            // Stored fingerprint came from the other strategy
            _ => true,
        }
    }

    /// Value to remember for `candidate` once it has been emitted.
    pub fn fingerprint(&self, candidate: &Fields) -> Fingerprint {
        match self {
            ChangeDetector::Threshold { .. } => Fingerprint::Snapshot(candidate.clone()),
            ChangeDetector::Fingerprint { ignored } => {
                Fingerprint::Hash(content_hash(candidate, ignored))
            }
        }
    }
}

/// Hex-encoded SHA-256 over the canonical JSON form of `fields`.
///
/// Keys are sorted at every nesting level, so insertion order never affects
/// the result. Top-level keys in `ignored` are left out.
pub fn content_hash(fields: &Fields, ignored: &BTreeSet<String>) -> String {
    let canonical = canonicalize_map(fields, ignored);
    hex::encode(Sha256::digest(canonical.to_string().as_bytes()))
}

fn canonicalize_map(map: &Map<String, Value>, ignored: &BTreeSet<String>) -> Value {
    let mut keys: Vec<&String> = map.keys().filter(|k| !ignored.contains(*k)).collect();
    keys.sort();

    let mut sorted = Map::with_capacity(map.len());
    for key in keys {
        sorted.insert(key.clone(), canonicalize(&map[key]));
    }
    Value::Object(sorted)
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => canonicalize_map(map, &BTreeSet::new()),
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
