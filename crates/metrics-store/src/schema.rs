// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! SQLite schema for benchmark runs, device samples and phase results.
//!
//! ```text
//! benchmarks 1 ──< device_measurements
//!            1 ──? model_measurements   (UNIQUE benchmark_id)
//! ```

/// Idempotent schema bootstrap.
pub(crate) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS benchmarks (
    benchmark_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    branch         TEXT    NOT NULL,
    commit_id      TEXT    NOT NULL,
    commit_message TEXT    NOT NULL,
    gpu_name       TEXT    NOT NULL,
    created_at_ms  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS device_measurements (
    measurement_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    benchmark_id      INTEGER NOT NULL REFERENCES benchmarks (benchmark_id),
    cpu_util          REAL    NOT NULL,
    mem_megabytes     REAL    NOT NULL,
    gpu_util          REAL    NOT NULL,
    gpu_mem_megabytes REAL    NOT NULL,
    recorded_at_ms    INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS device_measurements_benchmark_id
    ON device_measurements (benchmark_id);

CREATE TABLE IF NOT EXISTS model_measurements (
    measurement_id INTEGER PRIMARY KEY AUTOINCREMENT,
    benchmark_id   INTEGER NOT NULL UNIQUE REFERENCES benchmarks (benchmark_id),
    measurements   TEXT    NOT NULL,
    recorded_at_ms INTEGER NOT NULL
);
";

pub(crate) const INSERT_RUN: &str = "
INSERT INTO benchmarks (branch, commit_id, commit_message, gpu_name, created_at_ms)
VALUES (?1, ?2, ?3, ?4, ?5)";

pub(crate) const INSERT_SAMPLE: &str = "
INSERT INTO device_measurements
    (benchmark_id, cpu_util, mem_megabytes, gpu_util, gpu_mem_megabytes, recorded_at_ms)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

pub(crate) const INSERT_RESULT: &str = "
INSERT INTO model_measurements (benchmark_id, measurements, recorded_at_ms)
VALUES (?1, ?2, ?3)";

pub(crate) const SELECT_RUN: &str = "
SELECT benchmark_id, branch, commit_id, commit_message, gpu_name, created_at_ms
FROM benchmarks
WHERE benchmark_id = ?1";

pub(crate) const SELECT_SAMPLES: &str = "
SELECT measurement_id, benchmark_id, cpu_util, mem_megabytes, gpu_util, gpu_mem_megabytes, recorded_at_ms
FROM device_measurements
WHERE benchmark_id = ?1
ORDER BY measurement_id ASC";

pub(crate) const COUNT_SAMPLES: &str = "
SELECT COUNT(*) FROM device_measurements WHERE benchmark_id = ?1";

pub(crate) const SELECT_RESULT: &str = "
SELECT benchmark_id, measurements, recorded_at_ms
FROM model_measurements
WHERE benchmark_id = ?1";
