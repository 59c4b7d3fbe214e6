// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Model and tokenizer collaborators.
//!
//! The orchestrator only needs the control points that matter for timing:
//! fetch, load, prefill/decode forward, full generate, compile and device
//! synchronisation. Everything behind these traits is opaque.
//!
//! ```text
//! InferenceBackend ──fetch──▶ Artifacts ──load──▶ Model: CausalLm
//!                                      └─tokenizer─▶ Tokenizer: TextTokenizer
//! ```

use crate::sampling::{self, SamplingConfig};
use crate::{BackendError, WeightDType};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// A bounded key/value cache for one generation.
pub trait KvCache {
    /// Maximum number of positions the cache can hold.
    fn capacity(&self) -> usize;

    /// Number of positions currently filled.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positions still available.
    fn remaining(&self) -> usize {
        self.capacity().saturating_sub(self.len())
    }
}

/// Text ↔ token id conversion.
pub trait TextTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, BackendError>;
    fn decode(&self, tokens: &[u32]) -> Result<String, BackendError>;
}

/// Settings for a full `generate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationConfig {
    /// Total sequence length (prompt included) at which generation stops.
    pub max_length: usize,
    /// Sampled decoding when `true`, greedy otherwise.
    pub do_sample: bool,
    /// Run generation through the compiled forward path.
    pub compiled: bool,
}

impl GenerationConfig {
    /// Greedy generation on the eager path.
    pub fn greedy(max_length: usize) -> Self {
        Self {
            max_length,
            do_sample: false,
            compiled: false,
        }
    }

    /// Greedy generation on the compiled path.
    pub fn compiled(max_length: usize) -> Self {
        Self {
            compiled: true,
            ..Self::greedy(max_length)
        }
    }
}

/// A causal language model.
pub trait CausalLm {
    type Cache: KvCache;

    /// Moves the weights onto the compute device.
    fn to_device(&mut self) -> Result<(), BackendError>;

    /// Allocates an empty cache of `max_len` positions.
    fn new_cache(&self, batch_size: usize, max_len: usize) -> Result<Self::Cache, BackendError>;

    /// Runs `tokens` at positions `start..start + tokens.len()` and returns
    /// the logits of the last position.
    fn forward(
        &mut self,
        tokens: &[u32],
        start: usize,
        cache: &mut Self::Cache,
    ) -> Result<Vec<f32>, BackendError>;

    /// Generates until `config.max_length` or end-of-sequence and returns
    /// the full sequence, prompt included.
    fn generate(
        &mut self,
        prompt: &[u32],
        cache: &mut Self::Cache,
        config: &GenerationConfig,
    ) -> Result<Vec<u32>, BackendError>;

    /// Prepares the compiled single-token decode path. Compilation cost is
    /// paid on the first call that uses it.
    fn compile_decode_step(&mut self) -> Result<(), BackendError>;
}

/// Loads models and tokenizers and controls the compute device.
pub trait InferenceBackend {
    /// Whatever `fetch` downloads or locates (weights, configs, tokenizer).
    type Artifacts;
    type Model: CausalLm;
    type Tokenizer: TextTokenizer;

    /// Human-readable backend name for logs.
    fn name(&self) -> &str;

    /// Downloads or locates the checkpoint.
    fn fetch(&self, checkpoint: &str) -> Result<Self::Artifacts, BackendError>;

    /// Loads model weights from fetched artifacts.
    fn load(
        &self,
        artifacts: &Self::Artifacts,
        dtype: WeightDType,
    ) -> Result<Self::Model, BackendError>;

    /// Loads the tokenizer from fetched artifacts.
    fn tokenizer(&self, artifacts: &Self::Artifacts) -> Result<Self::Tokenizer, BackendError>;

    /// Blocks until all queued device work has finished.
    fn synchronize(&self) -> Result<(), BackendError>;

    /// Discards compiled state so the next compiled call compiles afresh.
    fn reset_compiled(&self, model: &mut Self::Model) -> Result<(), BackendError>;
}

/// Single-token decode step: one forward followed by sampling.
#[derive(Debug)]
pub struct DecodeStep {
    sampling: SamplingConfig,
    rng: StdRng,
}

impl DecodeStep {
    /// Creates a step with a seeded or entropy-seeded generator.
    pub fn new(sampling: SamplingConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { sampling, rng }
    }

    /// Runs `tokens` at `position` and samples the next token.
    pub fn call<M: CausalLm>(
        &mut self,
        model: &mut M,
        tokens: &[u32],
        position: usize,
        cache: &mut M::Cache,
    ) -> Result<u32, BackendError> {
        let logits = model.forward(tokens, position, cache)?;
        sampling::sample(&logits, &self.sampling, &mut self.rng)
    }
}
