// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Emission gate: change detection combined with a daily quota and a
//! heartbeat interval.
//!
//! A complete record is emitted when either
//! - it changed materially and fewer than `daily_quota` emissions happened
//!   today (change-triggered path), or
//! - at least `min_interval` passed since the last emission (heartbeat path).
//!
//! The quota only throttles the change-triggered path. The heartbeat path
//! fires regardless of quota so the sink never goes silent for longer than
//! `min_interval`. Both paths count towards `emits_today`.

use crate::detector::{ChangeDetector, Fingerprint};
use crate::reading::Fields;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Why a record was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmitReason {
    /// Material change with quota remaining.
    Changed,
    /// Minimum interval elapsed since the last emission.
    Heartbeat,
}

/// Outcome of one gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Do not emit; state untouched (apart from the day rollover).
    Skip,
    /// Emit; state already updated.
    Emit(EmitReason),
}

impl Decision {
    /// True for [`Decision::Emit`].
    pub fn is_emit(&self) -> bool {
        matches!(self, Decision::Emit(_))
    }

    /// Emission reason, if any.
    pub fn reason(&self) -> Option<EmitReason> {
        match self {
            Decision::Emit(reason) => Some(*reason),
            Decision::Skip => None,
        }
    }
}

/// Longest accepted heartbeat interval (100 years).
pub const MAX_INTERVAL_SECS: u64 = 100 * 365 * 86_400;

/// Quota and interval settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatePolicy {
    /// Heartbeat interval; zero makes every evaluation emit.
    pub min_interval: Duration,
    /// Maximum change-triggered emissions per UTC calendar day.
    pub daily_quota: u32,
}

impl GatePolicy {
    /// Policy with the interval given in whole seconds (capped at
    /// [`MAX_INTERVAL_SECS`]).
    pub fn new(min_interval_secs: u64, daily_quota: u32) -> Self {
        let secs = min_interval_secs.min(MAX_INTERVAL_SECS) as i64;
        Self {
            min_interval: Duration::seconds(secs),
            daily_quota,
        }
    }
}

/// Bookkeeping mutated once per emission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmissionState {
    last_fingerprint: Option<Fingerprint>,
    last_emit_at: Option<DateTime<Utc>>,
    last_emit_day: Option<NaiveDate>,
    emits_today: u32,
}

impl EmissionState {
    /// Fingerprint of the last emitted record.
    pub fn last_fingerprint(&self) -> Option<&Fingerprint> {
        self.last_fingerprint.as_ref()
    }

    /// Time of the last emission.
    pub fn last_emit_at(&self) -> Option<DateTime<Utc>> {
        self.last_emit_at
    }

    /// UTC calendar day of the last emission.
    pub fn last_emit_day(&self) -> Option<NaiveDate> {
        self.last_emit_day
    }

    /// Emissions counted for the current day.
    pub fn emits_today(&self) -> u32 {
        self.emits_today
    }

    /// Reset the daily counter if `today` differs from the last emission day.
    fn observe_day(&mut self, today: NaiveDate) {
        if let Some(day) = self.last_emit_day {
            if day != today && self.emits_today != 0 {
                tracing::debug!(
                    previous_day = %day,
                    emits = self.emits_today,
                    "Calendar day rolled over, resetting daily emission count"
                );
                self.emits_today = 0;
            }
        }
    }

    pub(crate) fn record_emission(&mut self, fingerprint: Fingerprint, now: DateTime<Utc>) {
        self.last_fingerprint = Some(fingerprint);
        self.last_emit_at = Some(now);
        self.last_emit_day = Some(now.date_naive());
        self.emits_today = self.emits_today.saturating_add(1);
    }
}

/// Stateful emit/skip decision for complete records.
pub struct EmissionGate {
    policy: GatePolicy,
    detector: ChangeDetector,
    state: EmissionState,
}

impl EmissionGate {
    /// Create a gate with empty state.
    pub fn new(policy: GatePolicy, detector: ChangeDetector) -> Self {
        Self {
            policy,
            detector,
            state: EmissionState::default(),
        }
    }

    /// Decide whether `candidate` should be emitted at `now`.
    ///
    /// Updates the state only when the answer is true.
    pub fn should_emit(&mut self, candidate: &Fields, now: DateTime<Utc>) -> bool {
        self.evaluate(candidate, now).is_emit()
    }

    /// Like [`should_emit`](Self::should_emit), reporting which path fired.
    pub fn evaluate(&mut self, candidate: &Fields, now: DateTime<Utc>) -> Decision {
        let today = now.date_naive();
        self.state.observe_day(today);

        let interval_elapsed = self.interval_elapsed(now);
        let changed = self.detector.is_different(candidate, &self.state);
        let under_quota = self.state.emits_today < self.policy.daily_quota;

        let decision = if changed && under_quota {
            Decision::Emit(EmitReason::Changed)
        } else if interval_elapsed {
            Decision::Emit(EmitReason::Heartbeat)
        } else {
            Decision::Skip
        };

        tracing::trace!(
            changed,
            interval_elapsed,
            emits_today = self.state.emits_today,
            quota = self.policy.daily_quota,
            ?decision,
            "Gate evaluated"
        );

        if decision.is_emit() {
            let fingerprint = self.detector.fingerprint(candidate);
            self.state.record_emission(fingerprint, now);
        }

        decision
    }

    fn interval_elapsed(&self, now: DateTime<Utc>) -> bool {
        if self.policy.min_interval <= Duration::zero() {
            return true;
        }
        match self.state.last_emit_at {
            None => true,
            Some(last) => now.signed_duration_since(last) >= self.policy.min_interval,
        }
    }

    /// Current bookkeeping.
    pub fn state(&self) -> &EmissionState {
        &self.state
    }

    /// Emissions counted for the current day.
    pub fn emits_today(&self) -> u32 {
        self.state.emits_today
    }

    /// Configured policy.
    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    /// Configured change detector.
    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }
}
