// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! SQLite-backed store.
//!
//! Every connection enables foreign keys (so a sample can never reference a
//! run that has not been committed) and shares a WAL-journalled database
//! file with a busy timeout, which lets the orchestrator and the sampler
//! write concurrently through their own connections.

use crate::record::now_ms;
use crate::schema;
use crate::{
    BenchmarkRun, DeviceReading, DeviceSample, MetricsStore, NewBenchmarkRun, PhaseMap,
    PhaseResult, RunId, StoreConnector, StoreError,
};
use rusqlite::{ffi, params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a writer waits for the other connection's lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// One connection to the metrics database.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path` and bootstraps the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!("sqlite journal mode: {mode}");
        conn.execute_batch(schema::SCHEMA)?;
        Ok(Self { conn })
    }
}

impl MetricsStore for SqliteStore {
    fn create_benchmark_run(&mut self, run: &NewBenchmarkRun) -> Result<RunId, StoreError> {
        self.conn.execute(
            schema::INSERT_RUN,
            params![
                run.branch,
                run.commit_id,
                run.commit_message,
                run.accelerator_name,
                now_ms()
            ],
        )?;
        Ok(RunId::new(self.conn.last_insert_rowid()))
    }

    fn insert_device_sample(
        &mut self,
        run_id: RunId,
        reading: &DeviceReading,
    ) -> Result<(), StoreError> {
        self.conn
            .execute(
                schema::INSERT_SAMPLE,
                params![
                    run_id.get(),
                    reading.cpu_percent,
                    reading.memory_mb,
                    reading.accelerator_percent,
                    reading.accelerator_memory_mb,
                    now_ms()
                ],
            )
            .map_err(|e| classify(e, run_id))?;
        Ok(())
    }

    fn insert_phase_result(
        &mut self,
        run_id: RunId,
        measurements: &PhaseMap,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(measurements)?;
        self.conn
            .execute(schema::INSERT_RESULT, params![run_id.get(), json, now_ms()])
            .map_err(|e| classify(e, run_id))?;
        Ok(())
    }

    fn benchmark_run(&self, run_id: RunId) -> Result<Option<BenchmarkRun>, StoreError> {
        let run = self
            .conn
            .query_row(schema::SELECT_RUN, params![run_id.get()], |row| {
                Ok(BenchmarkRun {
                    run_id: RunId::new(row.get(0)?),
                    branch: row.get(1)?,
                    commit_id: row.get(2)?,
                    commit_message: row.get(3)?,
                    accelerator_name: row.get(4)?,
                    created_at_ms: row.get(5)?,
                })
            })
            .optional()?;
        Ok(run)
    }

    fn phase_result(&self, run_id: RunId) -> Result<Option<PhaseResult>, StoreError> {
        let row = self
            .conn
            .query_row(schema::SELECT_RESULT, params![run_id.get()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .optional()?;

        match row {
            Some((raw_id, json, recorded_at_ms)) => Ok(Some(PhaseResult {
                run_id: RunId::new(raw_id),
                measurements: serde_json::from_str(&json)?,
                recorded_at_ms,
            })),
            None => Ok(None),
        }
    }

    fn device_samples(&self, run_id: RunId) -> Result<Vec<DeviceSample>, StoreError> {
        let mut stmt = self.conn.prepare(schema::SELECT_SAMPLES)?;
        let rows = stmt.query_map(params![run_id.get()], |row| {
            Ok(DeviceSample {
                sample_id: row.get(0)?,
                run_id: RunId::new(row.get(1)?),
                reading: DeviceReading {
                    cpu_percent: row.get(2)?,
                    memory_mb: row.get(3)?,
                    accelerator_percent: row.get(4)?,
                    accelerator_memory_mb: row.get(5)?,
                },
                recorded_at_ms: row.get(6)?,
            })
        })?;
        let samples = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(samples)
    }

    fn count_device_samples(&self, run_id: RunId) -> Result<u64, StoreError> {
        let count: i64 = self
            .conn
            .query_row(schema::COUNT_SAMPLES, params![run_id.get()], |row| row.get(0))?;
        u64::try_from(count).map_err(|_| StoreError::Corrupt {
            column: "COUNT(*)",
            detail: format!("negative sample count {count}"),
        })
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.conn.path())
            .finish()
    }
}

/// Opens a fresh [`SqliteStore`] per execution context.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    /// Creates a connector and bootstraps the schema once up front, so
    /// schema errors surface before any benchmark work starts.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        SqliteStore::open(&path)?;
        tracing::info!("metrics database: {}", path.display());
        Ok(Self { path })
    }

    /// Returns the database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreConnector for SqliteConnector {
    type Store = SqliteStore;

    fn connect(&self) -> Result<SqliteStore, StoreError> {
        SqliteStore::open(&self.path)
    }
}

/// Maps constraint violations onto the store's domain errors.
fn classify(err: rusqlite::Error, run_id: RunId) -> StoreError {
    if let rusqlite::Error::SqliteFailure(code, _) = &err {
        match code.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE => return StoreError::DuplicateResult(run_id),
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => return StoreError::UnknownRun(run_id),
            _ => {}
        }
    }
    StoreError::Sqlite(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("metrics.db")).unwrap();
        (dir, store)
    }

    fn new_run(branch: &str) -> NewBenchmarkRun {
        NewBenchmarkRun {
            branch: branch.into(),
            commit_id: "0123abcd".into(),
            commit_message: "Fix static cache".into(),
            accelerator_name: "NVIDIA A10G".into(),
        }
    }

    #[test]
    fn test_create_and_read_run() {
        let (_dir, mut store) = temp_store();
        let id = store.create_benchmark_run(&new_run("main")).unwrap();

        let run = store.benchmark_run(id).unwrap().unwrap();
        assert_eq!(run.run_id, id);
        assert_eq!(run.branch, "main");
        assert_eq!(run.accelerator_name, "NVIDIA A10G");
        assert!(run.created_at_ms > 0);
    }

    #[test]
    fn test_run_ids_are_fresh() {
        let (_dir, mut store) = temp_store();
        let a = store.create_benchmark_run(&new_run("main")).unwrap();
        let b = store.create_benchmark_run(&new_run("main")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_missing_run() {
        let (_dir, store) = temp_store();
        assert!(store.benchmark_run(RunId::new(99)).unwrap().is_none());
        assert!(store.phase_result(RunId::new(99)).unwrap().is_none());
        assert_eq!(store.count_device_samples(RunId::new(99)).unwrap(), 0);
    }

    #[test]
    fn test_samples_in_insertion_order() {
        let (_dir, mut store) = temp_store();
        let id = store.create_benchmark_run(&new_run("main")).unwrap();
        for i in 0..3 {
            let reading = DeviceReading {
                cpu_percent: f64::from(i),
                memory_mb: 100.0,
                accelerator_percent: 50.0,
                accelerator_memory_mb: 2048.0,
            };
            store.insert_device_sample(id, &reading).unwrap();
        }

        let samples = store.device_samples(id).unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(store.count_device_samples(id).unwrap(), 3);
        assert!(samples.windows(2).all(|w| w[0].sample_id < w[1].sample_id));
        assert_eq!(samples[2].reading.cpu_percent, 2.0);
        assert!(samples.iter().all(|s| s.run_id == id));
    }

    #[test]
    fn test_sample_for_unknown_run_rejected() {
        let (_dir, mut store) = temp_store();
        let err = store
            .insert_device_sample(RunId::new(404), &DeviceReading::default())
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownRun(id) if id == RunId::new(404)));
    }

    #[test]
    fn test_phase_result_written_once() {
        let (_dir, mut store) = temp_store();
        let id = store.create_benchmark_run(&new_run("main")).unwrap();

        let mut map = PhaseMap::new();
        map.insert("model_load_time".into(), 12.5);
        store.insert_phase_result(id, &map).unwrap();

        let stored = store.phase_result(id).unwrap().unwrap();
        assert_eq!(stored.measurements, map);

        let err = store.insert_phase_result(id, &map).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateResult(_)));
    }

    #[test]
    fn test_connector_bootstraps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let connector = SqliteConnector::new(dir.path().join("m.db")).unwrap();
        let mut a = connector.connect().unwrap();
        let b = connector.connect().unwrap();

        let id = a.create_benchmark_run(&new_run("feature")).unwrap();
        // Committed writes on one connection are visible on the other.
        assert_eq!(b.benchmark_run(id).unwrap().unwrap().branch, "feature");
    }
}
