// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Wires config, probe, store and backend together and runs one benchmark.

use crate::setup;
use anyhow::Context;
use bench_runtime::{
    BackendKind, BenchConfig, CommitInfo, DeviceKind, InferenceBackend, Orchestrator,
    SyntheticBackend,
};
use device_monitor::{AcceleratorProbe, NoAccelerator, NvmlProbe};
use metrics_store::{InMemoryConnector, SqliteConnector, StoreConnector};
use std::sync::Arc;

/// Runs one benchmark attempt for `commit`.
///
/// Errors are setup failures only; a failed run is reported through the log.
pub fn execute(commit: &CommitInfo) -> anyhow::Result<()> {
    let config = setup::load_config()?;
    setup::apply_process_env(&config);

    // ── Accelerator probe ──────────────────────────────────────
    let probe: Arc<dyn AcceleratorProbe> = match config.device {
        DeviceKind::Cuda => Arc::new(
            NvmlProbe::new(config.accelerator_index)
                .context("cannot query the accelerator; set device = \"cpu\" to run without one")?,
        ),
        DeviceKind::Cpu => Arc::new(NoAccelerator),
    };

    // ── Store ──────────────────────────────────────────────────
    if config.uses_in_memory_store() {
        tracing::warn!("using an in-memory store; results are discarded at exit");
        with_store(config, probe, InMemoryConnector::new(), commit)
    } else {
        let connector = SqliteConnector::new(&config.database_path)
            .with_context(|| format!("opening {}", config.database_path.display()))?;
        with_store(config, probe, connector, commit)
    }
}

fn with_store<C: StoreConnector>(
    config: BenchConfig,
    probe: Arc<dyn AcceleratorProbe>,
    connector: C,
    commit: &CommitInfo,
) -> anyhow::Result<()> {
    match config.backend {
        BackendKind::Synthetic => {
            let backend = SyntheticBackend::new(config.synthetic);
            benchmark(config, backend, connector, probe, commit)
        }
        #[cfg(feature = "candle")]
        BackendKind::Candle => {
            let backend = bench_runtime::CandleBackend::new(
                config.device,
                config.accelerator_index,
                config.tokenizer_parallelism,
            )?;
            benchmark(config, backend, connector, probe, commit)
        }
        #[cfg(not(feature = "candle"))]
        BackendKind::Candle => {
            anyhow::bail!("backend \"candle\" needs llm-bench built with `--features candle`")
        }
    }
}

fn benchmark<B: InferenceBackend, C: StoreConnector>(
    config: BenchConfig,
    backend: B,
    connector: C,
    probe: Arc<dyn AcceleratorProbe>,
    commit: &CommitInfo,
) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::new(config, backend, connector, probe)?;
    let report = orchestrator.run(commit);
    if report.succeeded() {
        tracing::info!("{}", report.summary());
    } else {
        tracing::warn!("{}", report.summary());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit() -> CommitInfo {
        CommitInfo {
            branch: "main".into(),
            commit_id: "0a1b2c".into(),
            commit_message: "Tune sampler".into(),
        }
    }

    #[cfg(not(feature = "candle"))]
    #[test]
    fn test_default_backend_needs_candle_feature() {
        let err = with_store(
            BenchConfig::default(),
            Arc::new(NoAccelerator),
            InMemoryConnector::new(),
            &commit(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("--features candle"), "{err}");
    }

    #[test]
    fn test_synthetic_into_history_refused() {
        let dir = tempfile::tempdir().unwrap();
        let config = BenchConfig {
            backend: BackendKind::Synthetic,
            database_path: dir.path().join("history.db"),
            ..Default::default()
        };
        let connector = SqliteConnector::new(&config.database_path).unwrap();
        let err = with_store(config, Arc::new(NoAccelerator), connector, &commit()).unwrap_err();
        assert!(err.to_string().contains("record_synthetic"), "{err}");
    }
}
