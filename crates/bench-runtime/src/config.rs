// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Benchmark configuration loaded from TOML files or constructed programmatically.
//!
//! Every field has a default, so an empty file (or no file) reproduces the
//! reference battery.
//!
//! # TOML Format
//! ```toml
//! database_path = "metrics.db"
//! backend = "candle"
//! checkpoint = "meta-llama/Llama-2-7b-hf"
//! dtype = "f16"
//! device = "cuda"
//! prompt = "Why dogs are so cute?"
//! num_tokens_to_generate = 20
//! sample_interval_ms = 10
//! temperature = 0.6
//! top_k = 5
//!
//! [synthetic]
//! forward_ms = 2
//! ```

use crate::sampling::SamplingConfig;
use crate::synthetic::SyntheticLatencies;
use crate::BenchError;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Database path that selects the in-process store.
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Which model backend drives the phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Fixed-latency stand-in; needs no weights or GPU.
    Synthetic,
    /// Llama checkpoints through candle (cargo feature `candle`).
    Candle,
}

/// Precision the weights are loaded in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightDType {
    F16,
    Bf16,
    F32,
}

/// Where the model runs and which probe reports accelerator usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cuda,
    Cpu,
}

/// Configuration for one benchmark invocation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// SQLite file for benchmark history, or `":memory:"`.
    pub database_path: PathBuf,
    pub backend: BackendKind,
    /// Hub repository id of the checkpoint.
    pub checkpoint: String,
    pub dtype: WeightDType,
    pub device: DeviceKind,
    /// Index of the accelerator to run on and to probe.
    pub accelerator_index: u32,
    pub prompt: String,
    /// New tokens per eager generate and per decode-step battery.
    pub num_tokens_to_generate: usize,
    /// Extra cache positions, beyond the prompt, for each compiled generate.
    pub compiled_generate_budget: usize,
    /// Slack beyond the positions the decode-step battery writes.
    pub compiled_cache_padding: usize,
    /// Device sampler period in milliseconds.
    pub sample_interval_ms: u64,
    pub temperature: f32,
    pub top_k: Option<usize>,
    /// Seed for decode-step sampling; entropy when unset.
    pub seed: Option<u64>,
    /// Enable accelerated hub downloads.
    pub fast_downloads: bool,
    /// Let the tokenizer use multiple threads.
    pub tokenizer_parallelism: bool,
    /// Allow synthetic timings into a persistent database.
    pub record_synthetic: bool,
    /// Latencies used by the synthetic backend.
    pub synthetic: SyntheticLatencies,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("metrics.db"),
            backend: BackendKind::Candle,
            checkpoint: "meta-llama/Llama-2-7b-hf".to_string(),
            dtype: WeightDType::F16,
            device: DeviceKind::Cuda,
            accelerator_index: 0,
            prompt: "Why dogs are so cute?".to_string(),
            num_tokens_to_generate: 20,
            compiled_generate_budget: 128,
            compiled_cache_padding: 10,
            sample_interval_ms: 10,
            temperature: 0.6,
            top_k: Some(5),
            seed: None,
            fast_downloads: true,
            tokenizer_parallelism: false,
            record_synthetic: false,
            synthetic: SyntheticLatencies::default(),
        }
    }
}

impl BenchConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, BenchError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BenchError::Config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, BenchError> {
        toml::from_str(toml_str).map_err(|e| BenchError::Config(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, BenchError> {
        toml::to_string_pretty(self)
            .map_err(|e| BenchError::Config(format!("TOML serialise error: {e}")))
    }

    /// Checks the values a run cannot proceed without.
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.prompt.is_empty() {
            return Err(BenchError::Config("prompt must not be empty".into()));
        }
        if self.num_tokens_to_generate == 0 {
            return Err(BenchError::Config(
                "num_tokens_to_generate must be at least 1".into(),
            ));
        }
        if self.compiled_generate_budget < self.num_tokens_to_generate {
            return Err(BenchError::Config(format!(
                "compiled_generate_budget ({}) is smaller than num_tokens_to_generate ({})",
                self.compiled_generate_budget, self.num_tokens_to_generate
            )));
        }
        if self.sample_interval_ms == 0 {
            return Err(BenchError::Config("sample_interval_ms must be at least 1".into()));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(BenchError::Config(format!(
                "temperature must be a non-negative number, got {}",
                self.temperature
            )));
        }
        if self.top_k == Some(0) {
            return Err(BenchError::Config("top_k must be at least 1 when set".into()));
        }
        if self.backend == BackendKind::Synthetic
            && !self.uses_in_memory_store()
            && !self.record_synthetic
        {
            return Err(BenchError::Config(format!(
                "synthetic timings would be written to '{}'; use database_path = \"{}\" \
                 or set record_synthetic = true",
                self.database_path.display(),
                IN_MEMORY_DATABASE
            )));
        }
        Ok(())
    }

    /// Returns `true` if results go to the in-process store.
    pub fn uses_in_memory_store(&self) -> bool {
        self.database_path.as_os_str() == IN_MEMORY_DATABASE
    }

    /// Decode-step sampling settings.
    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            temperature: self.temperature,
            top_k: self.top_k,
        }
    }

    /// Device sampler period.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}
