// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Two connections writing to one database file at the same time.

use metrics_store::{
    DeviceReading, MetricsStore, NewBenchmarkRun, PhaseMap, SqliteConnector, StoreConnector,
};
use std::thread;

fn new_run() -> NewBenchmarkRun {
    NewBenchmarkRun {
        branch: "main".into(),
        commit_id: "cafebabe".into(),
        commit_message: "Compile decode step".into(),
        accelerator_name: "NVIDIA A10G".into(),
    }
}

#[test]
fn test_sampler_and_orchestrator_connections_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let connector = SqliteConnector::new(dir.path().join("metrics.db")).unwrap();

    let mut orchestrator = connector.connect().unwrap();
    let run_id = orchestrator.create_benchmark_run(&new_run()).unwrap();

    let mut sampler = connector.connect().unwrap();
    let writer = thread::spawn(move || {
        for i in 0..200u32 {
            let reading = DeviceReading {
                cpu_percent: f64::from(i % 100),
                memory_mb: 512.0,
                accelerator_percent: 75.0,
                accelerator_memory_mb: 13_000.0,
            };
            sampler.insert_device_sample(run_id, &reading).unwrap();
        }
    });

    let mut map = PhaseMap::new();
    map.insert("model_load_time".into(), 3.25);
    map.insert("time_to_first_token_secs".into(), 0.041);
    orchestrator.insert_phase_result(run_id, &map).unwrap();

    writer.join().unwrap();

    let reader = connector.connect().unwrap();
    assert_eq!(reader.count_device_samples(run_id).unwrap(), 200);
    assert_eq!(reader.phase_result(run_id).unwrap().unwrap().measurements, map);
}

#[test]
fn test_runs_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let connector = SqliteConnector::new(dir.path().join("metrics.db")).unwrap();
    let mut store = connector.connect().unwrap();

    let first = store.create_benchmark_run(&new_run()).unwrap();
    let second = store.create_benchmark_run(&new_run()).unwrap();
    store
        .insert_device_sample(first, &DeviceReading::default())
        .unwrap();

    assert_eq!(store.count_device_samples(first).unwrap(), 1);
    assert_eq!(store.count_device_samples(second).unwrap(), 0);
    assert!(store.phase_result(second).unwrap().is_none());
}
