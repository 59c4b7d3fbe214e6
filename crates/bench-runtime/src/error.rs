// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the benchmark runtime.

use crate::Phase;
use device_monitor::MonitorError;
use metrics_store::StoreError;

/// Errors raised by a model or tokenizer backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Fetching or loading a checkpoint failed.
    #[error("failed to load checkpoint '{checkpoint}': {detail}")]
    Load { checkpoint: String, detail: String },

    /// A model call failed while running.
    #[error("{op} failed: {detail}")]
    Runtime { op: &'static str, detail: String },

    /// A call would write past the end of a bounded KV cache.
    #[error("KV cache overflow: {required} positions needed, capacity {capacity}")]
    CacheOverflow { required: usize, capacity: usize },

    /// Encoding or decoding text failed.
    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    /// The compute device could not be opened or synchronised.
    #[error("device error: {0}")]
    Device(String),

    /// A forward pass produced no logits.
    #[error("forward pass returned empty logits")]
    EmptyLogits,
}

/// Failure that ends the device-sampler loop.
#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    /// Reading the process or accelerator failed.
    #[error("device probe failed after {samples} samples: {source}")]
    Probe {
        samples: u64,
        #[source]
        source: MonitorError,
    },

    /// Writing a sample to the store failed.
    #[error("sample write failed after {samples} samples: {source}")]
    Store {
        samples: u64,
        #[source]
        source: StoreError,
    },
}

impl SamplerError {
    /// Number of samples written before the failure.
    pub fn samples(&self) -> u64 {
        match self {
            Self::Probe { samples, .. } | Self::Store { samples, .. } => *samples,
        }
    }
}

/// Errors that abort a benchmark run.
#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    /// The configuration is invalid or unreadable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Device monitoring could not be set up.
    #[error("monitor error: {0}")]
    Monitor(#[from] MonitorError),

    /// The metrics store rejected a read or write.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The model backend failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The sampler thread could not be spawned.
    #[error("failed to spawn device sampler: {0}")]
    SamplerSpawn(#[source] std::io::Error),

    /// Persistence was attempted with phases missing.
    #[error("phases not recorded: {}", format_phases(.0))]
    IncompletePhases(Vec<Phase>),
}

fn format_phases(phases: &[Phase]) -> String {
    phases
        .iter()
        .map(|p| p.key())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The orchestrator step a run was in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Setup,
    SamplerStart,
    ModelReady,
    EagerPhases,
    CompiledStepPhases,
    CompiledGeneratePhases,
    Persist,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Setup => "setup",
            Self::SamplerStart => "sampler start",
            Self::ModelReady => "model ready",
            Self::EagerPhases => "eager phases",
            Self::CompiledStepPhases => "compiled step phases",
            Self::CompiledGeneratePhases => "compiled generate phases",
            Self::Persist => "persist",
        };
        f.write_str(name)
    }
}

/// A [`BenchError`] tagged with the stage it aborted.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: BenchError,
}
