// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # metrics-store
//!
//! Persistence for benchmark history: one row per benchmark run, a stream
//! of device samples per run, and one phase-timing row per run.
//!
//! # Contract
//! - [`MetricsStore::create_benchmark_run`] commits before returning, so a
//!   run id handed to another connection is immediately visible there.
//! - Device samples must reference an existing run
//!   ([`StoreError::UnknownRun`] otherwise).
//! - A run has at most one phase result
//!   ([`StoreError::DuplicateResult`] on a second write).
//!
//! # Concurrency
//! A store value is one connection. Concurrent writers each obtain their own
//! via [`StoreConnector::connect`]; nothing is shared in memory between them
//! except through the database itself.

mod error;
mod memory;
mod record;
mod schema;
mod sqlite;

pub use error::StoreError;
pub use memory::{InMemoryConnector, InMemoryStore};
pub use record::{
    BenchmarkRun, DeviceReading, DeviceSample, NewBenchmarkRun, PhaseMap, PhaseResult, RunId,
};
pub use sqlite::{SqliteConnector, SqliteStore};

/// One connection to the benchmark history.
pub trait MetricsStore {
    /// Registers a run and returns its freshly assigned id.
    fn create_benchmark_run(&mut self, run: &NewBenchmarkRun) -> Result<RunId, StoreError>;

    /// Appends one device reading for `run_id`.
    fn insert_device_sample(
        &mut self,
        run_id: RunId,
        reading: &DeviceReading,
    ) -> Result<(), StoreError>;

    /// Writes the phase timings for `run_id`. Allowed once per run.
    fn insert_phase_result(
        &mut self,
        run_id: RunId,
        measurements: &PhaseMap,
    ) -> Result<(), StoreError>;

    /// Looks up a registered run.
    fn benchmark_run(&self, run_id: RunId) -> Result<Option<BenchmarkRun>, StoreError>;

    /// Looks up the phase result of a run.
    fn phase_result(&self, run_id: RunId) -> Result<Option<PhaseResult>, StoreError>;

    /// All device samples of a run in insertion order.
    fn device_samples(&self, run_id: RunId) -> Result<Vec<DeviceSample>, StoreError>;

    /// Number of device samples recorded for a run.
    fn count_device_samples(&self, run_id: RunId) -> Result<u64, StoreError>;
}

/// Opens independent [`MetricsStore`] connections, one per execution context.
pub trait StoreConnector: Send + Sync {
    /// The connection type; movable onto the sampler thread.
    type Store: MetricsStore + Send + 'static;

    /// Opens a new connection.
    fn connect(&self) -> Result<Self::Store, StoreError>;
}
