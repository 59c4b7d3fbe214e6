// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The fixed phase battery and the elapsed time recorded for each phase.
//!
//! Every run records exactly thirteen phases. Their persisted key names are
//! stable across revisions so results stay comparable over history.

use crate::BenchError;
use metrics_store::PhaseMap;
use std::collections::BTreeMap;
use std::time::Duration;

/// One timed checkpoint of a benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub enum Phase {
    ModelLoad,
    FirstEagerForward,
    SecondEagerForward,
    FirstEagerGenerate,
    SecondEagerGenerate,
    TimeToFirstToken,
    TimeToSecondToken,
    TimeToThirdToken,
    TimeToNextTokenMean,
    FirstCompileGenerate,
    SecondCompileGenerate,
    ThirdCompileGenerate,
    FourthCompileGenerate,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 13] = [
        Phase::ModelLoad,
        Phase::FirstEagerForward,
        Phase::FirstEagerGenerate,
        Phase::SecondEagerForward,
        Phase::SecondEagerGenerate,
        Phase::TimeToFirstToken,
        Phase::TimeToSecondToken,
        Phase::TimeToThirdToken,
        Phase::TimeToNextTokenMean,
        Phase::FirstCompileGenerate,
        Phase::SecondCompileGenerate,
        Phase::ThirdCompileGenerate,
        Phase::FourthCompileGenerate,
    ];

    /// Prefill forwards of the two eager rounds.
    pub const EAGER_FORWARD: [Phase; 2] = [Phase::FirstEagerForward, Phase::SecondEagerForward];

    /// Greedy generates of the two eager rounds.
    pub const EAGER_GENERATE: [Phase; 2] = [Phase::FirstEagerGenerate, Phase::SecondEagerGenerate];

    /// The compiled generate battery.
    pub const COMPILE_GENERATE: [Phase; 4] = [
        Phase::FirstCompileGenerate,
        Phase::SecondCompileGenerate,
        Phase::ThirdCompileGenerate,
        Phase::FourthCompileGenerate,
    ];

    /// The persisted key for this phase.
    pub const fn key(self) -> &'static str {
        match self {
            Phase::ModelLoad => "model_load_time",
            Phase::FirstEagerForward => "first_eager_forward_pass_time_secs",
            Phase::SecondEagerForward => "second_eager_forward_pass_time_secs",
            Phase::FirstEagerGenerate => "first_eager_generate_time_secs",
            Phase::SecondEagerGenerate => "second_eager_generate_time_secs",
            Phase::TimeToFirstToken => "time_to_first_token_secs",
            Phase::TimeToSecondToken => "time_to_second_token_secs",
            Phase::TimeToThirdToken => "time_to_third_token_secs",
            Phase::TimeToNextTokenMean => "time_to_next_token_mean_secs",
            Phase::FirstCompileGenerate => "first_compile_generate_time_secs",
            Phase::SecondCompileGenerate => "second_compile_generate_time_secs",
            Phase::ThirdCompileGenerate => "third_compile_generate_time_secs",
            Phase::FourthCompileGenerate => "fourth_compile_generate_time_secs",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Elapsed time per phase for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhaseTimings {
    entries: BTreeMap<Phase, Duration>,
}

impl PhaseTimings {
    /// Creates an empty set of timings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the elapsed time of `phase`, replacing any earlier value.
    pub fn record(&mut self, phase: Phase, elapsed: Duration) {
        tracing::info!("{phase}: {:.6}s", elapsed.as_secs_f64());
        self.entries.insert(phase, elapsed);
    }

    /// Returns the recorded time of `phase`.
    pub fn get(&self, phase: Phase) -> Option<Duration> {
        self.entries.get(&phase).copied()
    }

    /// Number of recorded phases.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` once all thirteen phases have a value.
    pub fn is_complete(&self) -> bool {
        self.entries.len() == Phase::ALL.len()
    }

    /// Phases without a recorded value, in execution order.
    pub fn missing(&self) -> Vec<Phase> {
        Phase::ALL
            .iter()
            .copied()
            .filter(|p| !self.entries.contains_key(p))
            .collect()
    }

    /// Converts to the persisted key → seconds map.
    ///
    /// Refuses to produce a partial map.
    pub fn to_phase_map(&self) -> Result<PhaseMap, BenchError> {
        let missing = self.missing();
        if !missing.is_empty() {
            return Err(BenchError::IncompletePhases(missing));
        }
        Ok(self
            .entries
            .iter()
            .map(|(phase, elapsed)| (phase.key().to_string(), elapsed.as_secs_f64()))
            .collect())
    }

    /// Returns a human-readable summary suitable for CLI output.
    ///
    /// # Example output
    /// ```text
    /// load 12.41s | eager fwd 0.0821s/0.0410s | eager gen 1.03s/0.98s | ttft 31.2s | tpot 0.0123s | compile gen 28.1s/0.61s/0.60s/0.60s
    /// ```
    pub fn summary(&self) -> String {
        let secs = |p: Phase| {
            self.get(p)
                .map(|d| format!("{:.4}s", d.as_secs_f64()))
                .unwrap_or_else(|| "-".to_string())
        };
        let joined = |phases: &[Phase]| {
            phases.iter().map(|&p| secs(p)).collect::<Vec<_>>().join("/")
        };

        format!(
            "load {} | eager fwd {} | eager gen {} | ttft {} | tpot {} | compile gen {}",
            secs(Phase::ModelLoad),
            joined(&Phase::EAGER_FORWARD),
            joined(&Phase::EAGER_GENERATE),
            secs(Phase::TimeToFirstToken),
            secs(Phase::TimeToNextTokenMean),
            joined(&Phase::COMPILE_GENERATE),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn complete() -> PhaseTimings {
        let mut t = PhaseTimings::new();
        for (i, phase) in Phase::ALL.iter().enumerate() {
            t.record(*phase, Duration::from_millis(i as u64 + 1));
        }
        t
    }

    #[test]
    fn test_keys_unique() {
        let keys: HashSet<_> = Phase::ALL.iter().map(|p| p.key()).collect();
        assert_eq!(keys.len(), 13);
    }

    #[test]
    fn test_groups_cover_all_generate_and_forward_phases() {
        let grouped: HashSet<_> = Phase::EAGER_FORWARD
            .iter()
            .chain(&Phase::EAGER_GENERATE)
            .chain(&Phase::COMPILE_GENERATE)
            .collect();
        assert_eq!(grouped.len(), 8);
    }

    #[test]
    fn test_missing_in_execution_order() {
        let mut t = PhaseTimings::new();
        t.record(Phase::ModelLoad, Duration::from_secs(1));
        t.record(Phase::FirstEagerForward, Duration::from_millis(80));

        let missing = t.missing();
        assert_eq!(missing.len(), 11);
        assert_eq!(missing[0], Phase::FirstEagerGenerate);
        assert!(!t.is_complete());
    }

    #[test]
    fn test_partial_map_refused() {
        let mut t = PhaseTimings::new();
        t.record(Phase::ModelLoad, Duration::from_secs(1));
        match t.to_phase_map() {
            Err(BenchError::IncompletePhases(missing)) => assert_eq!(missing.len(), 12),
            other => panic!("expected IncompletePhases, got {other:?}"),
        }
    }

    #[test]
    fn test_complete_map() {
        let map = complete().to_phase_map().unwrap();
        assert_eq!(map.len(), 13);
        assert_eq!(map["model_load_time"], 0.001);
        assert!(map.values().all(|v| *v > 0.0));
    }

    #[test]
    fn test_record_replaces() {
        let mut t = PhaseTimings::new();
        t.record(Phase::ModelLoad, Duration::from_secs(1));
        t.record(Phase::ModelLoad, Duration::from_secs(2));
        assert_eq!(t.len(), 1);
        assert_eq!(t.get(Phase::ModelLoad), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_summary_marks_missing() {
        let s = PhaseTimings::new().summary();
        assert!(s.starts_with("load - |"));
        assert!(complete().summary().contains("ttft 0.0060s"));
    }
}
