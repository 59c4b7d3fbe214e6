// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Process-local store with the same constraints as the SQLite schema.
//!
//! Used for dry runs (`database_path = ":memory:"`) and in tests. All
//! handles produced by [`InMemoryConnector::connect`] share one state, so
//! the orchestrator and the sampler see each other's writes exactly as two
//! SQLite connections would.

use crate::record::now_ms;
use crate::{
    BenchmarkRun, DeviceReading, DeviceSample, MetricsStore, NewBenchmarkRun, PhaseMap,
    PhaseResult, RunId, StoreConnector, StoreError,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    runs: BTreeMap<RunId, BenchmarkRun>,
    samples: Vec<DeviceSample>,
    results: BTreeMap<RunId, PhaseResult>,
    next_run_id: i64,
    next_sample_id: i64,
}

/// A handle onto a shared in-memory store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered runs.
    pub fn run_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.runs.len())
    }

    /// Number of phase results across all runs.
    pub fn result_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.results.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl MetricsStore for InMemoryStore {
    fn create_benchmark_run(&mut self, run: &NewBenchmarkRun) -> Result<RunId, StoreError> {
        let mut state = self.lock()?;
        state.next_run_id += 1;
        let run_id = RunId::new(state.next_run_id);
        state.runs.insert(
            run_id,
            BenchmarkRun {
                run_id,
                branch: run.branch.clone(),
                commit_id: run.commit_id.clone(),
                commit_message: run.commit_message.clone(),
                accelerator_name: run.accelerator_name.clone(),
                created_at_ms: now_ms(),
            },
        );
        Ok(run_id)
    }

    fn insert_device_sample(
        &mut self,
        run_id: RunId,
        reading: &DeviceReading,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if !state.runs.contains_key(&run_id) {
            return Err(StoreError::UnknownRun(run_id));
        }
        state.next_sample_id += 1;
        let sample_id = state.next_sample_id;
        state.samples.push(DeviceSample {
            sample_id,
            run_id,
            reading: *reading,
            recorded_at_ms: now_ms(),
        });
        Ok(())
    }

    fn insert_phase_result(
        &mut self,
        run_id: RunId,
        measurements: &PhaseMap,
    ) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if !state.runs.contains_key(&run_id) {
            return Err(StoreError::UnknownRun(run_id));
        }
        if state.results.contains_key(&run_id) {
            return Err(StoreError::DuplicateResult(run_id));
        }
        state.results.insert(
            run_id,
            PhaseResult {
                run_id,
                measurements: measurements.clone(),
                recorded_at_ms: now_ms(),
            },
        );
        Ok(())
    }

    fn benchmark_run(&self, run_id: RunId) -> Result<Option<BenchmarkRun>, StoreError> {
        Ok(self.lock()?.runs.get(&run_id).cloned())
    }

    fn phase_result(&self, run_id: RunId) -> Result<Option<PhaseResult>, StoreError> {
        Ok(self.lock()?.results.get(&run_id).cloned())
    }

    fn device_samples(&self, run_id: RunId) -> Result<Vec<DeviceSample>, StoreError> {
        Ok(self
            .lock()?
            .samples
            .iter()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect())
    }

    fn count_device_samples(&self, run_id: RunId) -> Result<u64, StoreError> {
        let state = self.lock()?;
        Ok(state.samples.iter().filter(|s| s.run_id == run_id).count() as u64)
    }
}

/// Hands out handles onto one shared [`InMemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnector {
    store: InMemoryStore,
}

impl InMemoryConnector {
    /// Creates a connector over a fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle for inspecting what was written.
    pub fn store(&self) -> InMemoryStore {
        self.store.clone()
    }
}

impl StoreConnector for InMemoryConnector {
    type Store = InMemoryStore;

    fn connect(&self) -> Result<InMemoryStore, StoreError> {
        Ok(self.store.clone())
    }
}
