// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Record types written and read by a [`MetricsStore`](crate::MetricsStore).

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Phase name → elapsed seconds, as persisted in one result row.
pub type PhaseMap = BTreeMap<String, f64>;

/// Opaque identifier of a benchmark run, assigned by the store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct RunId(i64);

impl RunId {
    /// Wraps a raw store key.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw store key.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fields supplied by the caller when registering a benchmark run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NewBenchmarkRun {
    pub branch: String,
    pub commit_id: String,
    pub commit_message: String,
    pub accelerator_name: String,
}

/// A registered benchmark run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BenchmarkRun {
    pub run_id: RunId,
    pub branch: String,
    pub commit_id: String,
    pub commit_message: String,
    pub accelerator_name: String,
    /// Unix milliseconds at registration.
    pub created_at_ms: i64,
}

/// The four figures recorded per sampler iteration.
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub struct DeviceReading {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub accelerator_percent: f64,
    pub accelerator_memory_mb: f64,
}

/// A persisted device reading.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DeviceSample {
    /// Store-assigned key; increases with insertion order.
    pub sample_id: i64,
    pub run_id: RunId,
    pub reading: DeviceReading,
    pub recorded_at_ms: i64,
}

/// The single timing row written at the end of a run.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PhaseResult {
    pub run_id: RunId,
    pub measurements: PhaseMap,
    pub recorded_at_ms: i64,
}

/// Current Unix time in milliseconds.
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_display() {
        assert_eq!(RunId::new(42).to_string(), "42");
        assert_eq!(RunId::new(42).get(), 42);
    }

    #[test]
    fn test_run_id_serialises_transparently() {
        let json = serde_json::to_string(&RunId::new(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn test_now_ms_is_recent() {
        // 2023-11-14 or later.
        assert!(now_ms() > 1_700_000_000_000);
    }
}
