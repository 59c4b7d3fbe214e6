// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Fixed-latency backend for dry runs and tests.
//!
//! Each control point sleeps for a configured time, so the value every
//! phase should report is known in advance (see
//! [`SyntheticLatencies::expected`]). Compilation is modelled as a one-off
//! cost paid by the first call through a freshly compiled path. Faults can
//! be injected at load, at the n-th forward or generate, or at compile.

use crate::backend::{CausalLm, GenerationConfig, InferenceBackend, KvCache, TextTokenizer};
use crate::sampling;
use crate::{BackendError, Phase, WeightDType};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Vocabulary size of [`ByteTokenizer`].
pub const BYTE_VOCAB: usize = 256;

/// Sleep time per control point, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SyntheticLatencies {
    pub fetch_ms: u64,
    pub load_ms: u64,
    pub to_device_ms: u64,
    /// Per forward call; a generate pays it once per new token.
    pub forward_ms: u64,
    /// First call through a freshly compiled path.
    pub compile_ms: u64,
}

impl Default for SyntheticLatencies {
    fn default() -> Self {
        Self {
            fetch_ms: 0,
            load_ms: 50,
            to_device_ms: 10,
            forward_ms: 2,
            compile_ms: 40,
        }
    }
}

impl SyntheticLatencies {
    /// No sleeping anywhere.
    pub const fn zero() -> Self {
        Self {
            fetch_ms: 0,
            load_ms: 0,
            to_device_ms: 0,
            forward_ms: 0,
            compile_ms: 0,
        }
    }

    /// Nominal duration of `phase` when generating `num_tokens` tokens.
    pub fn expected(&self, phase: Phase, num_tokens: usize) -> Duration {
        let ms = Duration::from_millis;
        let forward = ms(self.forward_ms);
        let generate = forward * num_tokens as u32;
        match phase {
            Phase::ModelLoad => ms(self.load_ms + self.to_device_ms),
            Phase::FirstEagerForward | Phase::SecondEagerForward => forward,
            Phase::FirstEagerGenerate | Phase::SecondEagerGenerate => generate,
            Phase::TimeToFirstToken => ms(self.compile_ms) + forward,
            Phase::TimeToSecondToken | Phase::TimeToThirdToken => forward,
            Phase::TimeToNextTokenMean => {
                forward * num_tokens.saturating_sub(1) as u32 / num_tokens.max(1) as u32
            }
            Phase::FirstCompileGenerate => ms(self.compile_ms) + generate,
            Phase::SecondCompileGenerate
            | Phase::ThirdCompileGenerate
            | Phase::FourthCompileGenerate => generate,
        }
    }
}

/// Where an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticFault {
    /// Every weight load fails.
    Load,
    /// The `nth` (1-based) direct forward call fails.
    Forward { nth: usize },
    /// The `nth` (1-based) generate call fails.
    Generate { nth: usize },
    /// Compiling the decode step fails.
    Compile,
}

#[derive(Debug, Default)]
struct Counters {
    syncs: AtomicUsize,
    loads: AtomicUsize,
    forwards: AtomicUsize,
    generates: AtomicUsize,
}

/// Backend whose models sleep instead of computing.
///
/// Clones share call counters, so a test can keep a handle after moving
/// the backend into an orchestrator.
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    latencies: SyntheticLatencies,
    fault: Option<SyntheticFault>,
    counters: Arc<Counters>,
}

impl SyntheticBackend {
    pub fn new(latencies: SyntheticLatencies) -> Self {
        Self {
            latencies,
            fault: None,
            counters: Arc::default(),
        }
    }

    /// Injects a failure.
    pub fn with_fault(mut self, fault: SyntheticFault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn latencies(&self) -> &SyntheticLatencies {
        &self.latencies
    }

    /// Number of `synchronize` calls so far.
    pub fn sync_count(&self) -> usize {
        self.counters.syncs.load(Ordering::SeqCst)
    }

    /// Number of weight loads so far, untimed warm-up included.
    pub fn load_count(&self) -> usize {
        self.counters.loads.load(Ordering::SeqCst)
    }
}

/// Checkpoint handle returned by [`SyntheticBackend::fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticArtifacts {
    pub checkpoint: String,
}

impl InferenceBackend for SyntheticBackend {
    type Artifacts = SyntheticArtifacts;
    type Model = SyntheticModel;
    type Tokenizer = ByteTokenizer;

    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(&self, checkpoint: &str) -> Result<SyntheticArtifacts, BackendError> {
        pause(self.latencies.fetch_ms);
        Ok(SyntheticArtifacts {
            checkpoint: checkpoint.to_string(),
        })
    }

    fn load(
        &self,
        artifacts: &SyntheticArtifacts,
        dtype: WeightDType,
    ) -> Result<SyntheticModel, BackendError> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        pause(self.latencies.load_ms);
        if self.fault == Some(SyntheticFault::Load) {
            return Err(BackendError::Load {
                checkpoint: artifacts.checkpoint.clone(),
                detail: "injected fault".into(),
            });
        }
        tracing::debug!("synthetic model '{}' loaded as {dtype:?}", artifacts.checkpoint);
        Ok(SyntheticModel {
            latencies: self.latencies,
            fault: self.fault,
            counters: Arc::clone(&self.counters),
            step: CompileState::Eager,
            generate_compiled: false,
            on_device: false,
        })
    }

    fn tokenizer(&self, _artifacts: &SyntheticArtifacts) -> Result<ByteTokenizer, BackendError> {
        Ok(ByteTokenizer)
    }

    fn synchronize(&self) -> Result<(), BackendError> {
        self.counters.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reset_compiled(&self, model: &mut SyntheticModel) -> Result<(), BackendError> {
        model.step = CompileState::Eager;
        model.generate_compiled = false;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompileState {
    Eager,
    /// Compiled but not yet traced; the next forward pays for it.
    Pending,
    Compiled,
}

/// A model that sleeps `forward_ms` per forward and predicts `last + 1`.
#[derive(Debug)]
pub struct SyntheticModel {
    latencies: SyntheticLatencies,
    fault: Option<SyntheticFault>,
    counters: Arc<Counters>,
    step: CompileState,
    generate_compiled: bool,
    on_device: bool,
}

impl SyntheticModel {
    pub fn is_on_device(&self) -> bool {
        self.on_device
    }

    fn run(
        &self,
        tokens: &[u32],
        start: usize,
        cache: &mut SyntheticCache,
    ) -> Result<Vec<f32>, BackendError> {
        let last = *tokens.last().ok_or_else(|| BackendError::Runtime {
            op: "forward",
            detail: "empty input".into(),
        })?;
        let required = start + tokens.len();
        if required > cache.capacity {
            return Err(BackendError::CacheOverflow {
                required,
                capacity: cache.capacity,
            });
        }
        pause(self.latencies.forward_ms);
        cache.len = cache.len.max(required);
        Ok(peaked_logits(last))
    }
}

impl CausalLm for SyntheticModel {
    type Cache = SyntheticCache;

    fn to_device(&mut self) -> Result<(), BackendError> {
        pause(self.latencies.to_device_ms);
        self.on_device = true;
        Ok(())
    }

    fn new_cache(&self, batch_size: usize, max_len: usize) -> Result<SyntheticCache, BackendError> {
        if batch_size == 0 || max_len == 0 {
            return Err(BackendError::Runtime {
                op: "new_cache",
                detail: format!("invalid cache shape {batch_size}x{max_len}"),
            });
        }
        Ok(SyntheticCache {
            capacity: max_len,
            len: 0,
        })
    }

    fn forward(
        &mut self,
        tokens: &[u32],
        start: usize,
        cache: &mut SyntheticCache,
    ) -> Result<Vec<f32>, BackendError> {
        let nth = self.counters.forwards.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fault == Some(SyntheticFault::Forward { nth }) {
            return Err(BackendError::Runtime {
                op: "forward",
                detail: format!("injected fault on call {nth}"),
            });
        }
        if self.step == CompileState::Pending {
            pause(self.latencies.compile_ms);
            self.step = CompileState::Compiled;
        }
        self.run(tokens, start, cache)
    }

    fn generate(
        &mut self,
        prompt: &[u32],
        cache: &mut SyntheticCache,
        config: &GenerationConfig,
    ) -> Result<Vec<u32>, BackendError> {
        let nth = self.counters.generates.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fault == Some(SyntheticFault::Generate { nth }) {
            return Err(BackendError::Runtime {
                op: "generate",
                detail: format!("injected fault on call {nth}"),
            });
        }
        if config.max_length > cache.capacity {
            return Err(BackendError::CacheOverflow {
                required: config.max_length,
                capacity: cache.capacity,
            });
        }
        if config.compiled && !self.generate_compiled {
            pause(self.latencies.compile_ms);
            self.generate_compiled = true;
        }

        let mut sequence = prompt.to_vec();
        if sequence.len() >= config.max_length {
            return Ok(sequence);
        }
        let logits = self.run(prompt, 0, cache)?;
        sequence.push(sampling::greedy(&logits)?);
        while sequence.len() < config.max_length {
            let position = sequence.len() - 1;
            let last = sequence[position];
            let logits = self.run(&[last], position, cache)?;
            sequence.push(sampling::greedy(&logits)?);
        }
        Ok(sequence)
    }

    fn compile_decode_step(&mut self) -> Result<(), BackendError> {
        if self.fault == Some(SyntheticFault::Compile) {
            return Err(BackendError::Runtime {
                op: "compile",
                detail: "injected fault".into(),
            });
        }
        self.step = CompileState::Pending;
        Ok(())
    }
}

/// Bounded cache that only tracks its fill level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticCache {
    capacity: usize,
    len: usize,
}

impl KvCache for SyntheticCache {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// One token per byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteTokenizer;

impl TextTokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, BackendError> {
        Ok(text.bytes().map(u32::from).collect())
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, BackendError> {
        let bytes = tokens
            .iter()
            .map(|&t| {
                u8::try_from(t)
                    .map_err(|_| BackendError::Tokenizer(format!("token {t} out of range")))
            })
            .collect::<Result<Vec<u8>, _>>()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Logits peaking at `(last + 1) % BYTE_VOCAB`, falling off linearly.
fn peaked_logits(last: u32) -> Vec<f32> {
    let target = (last as usize + 1) % BYTE_VOCAB;
    (0..BYTE_VOCAB)
        .map(|i| -(i.abs_diff(target) as f32))
        .collect()
}

fn pause(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn loaded(latencies: SyntheticLatencies) -> (SyntheticBackend, SyntheticModel) {
        let backend = SyntheticBackend::new(latencies);
        let artifacts = backend.fetch("synthetic/tiny").unwrap();
        let model = backend.load(&artifacts, WeightDType::F32).unwrap();
        (backend, model)
    }

    #[test]
    fn test_generate_greedy_sequence() {
        let (_, mut model) = loaded(SyntheticLatencies::zero());
        let mut cache = model.new_cache(1, 8).unwrap();
        let out = model
            .generate(&[97, 98], &mut cache, &GenerationConfig::greedy(5))
            .unwrap();
        assert_eq!(out, vec![97, 98, 99, 100, 101]);
        assert_eq!(ByteTokenizer.decode(&out).unwrap(), "abcde");
    }

    #[test]
    fn test_generate_overflow() {
        let (_, mut model) = loaded(SyntheticLatencies::zero());
        let mut cache = model.new_cache(1, 4).unwrap();
        let err = model
            .generate(&[1, 2], &mut cache, &GenerationConfig::greedy(6))
            .unwrap_err();
        assert!(matches!(err, BackendError::CacheOverflow { required: 6, capacity: 4 }));
    }

    #[test]
    fn test_forward_overflow() {
        let (_, mut model) = loaded(SyntheticLatencies::zero());
        let mut cache = model.new_cache(1, 2).unwrap();
        assert!(model.forward(&[1, 2, 3], 0, &mut cache).is_err());
    }

    #[test]
    fn test_compile_cost_paid_once() {
        let latencies = SyntheticLatencies {
            compile_ms: 30,
            ..SyntheticLatencies::zero()
        };
        let (backend, mut model) = loaded(latencies);
        let mut cache = model.new_cache(1, 8).unwrap();
        model.compile_decode_step().unwrap();

        let start = Instant::now();
        model.forward(&[1], 0, &mut cache).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));

        let start = Instant::now();
        model.forward(&[2], 1, &mut cache).unwrap();
        assert!(start.elapsed() < Duration::from_millis(30));

        backend.reset_compiled(&mut model).unwrap();
        let mut cache = model.new_cache(1, 8).unwrap();
        let start = Instant::now();
        model
            .generate(&[1], &mut cache, &GenerationConfig::compiled(2))
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_forward_fault_fires_on_nth_call() {
        let backend = SyntheticBackend::new(SyntheticLatencies::zero())
            .with_fault(SyntheticFault::Forward { nth: 2 });
        let artifacts = backend.fetch("x").unwrap();
        let mut model = backend.load(&artifacts, WeightDType::F16).unwrap();
        let mut cache = model.new_cache(1, 8).unwrap();
        assert!(model.forward(&[1], 0, &mut cache).is_ok());
        assert!(model.forward(&[1], 1, &mut cache).is_err());
    }

    #[test]
    fn test_load_fault_and_counters() {
        let backend =
            SyntheticBackend::new(SyntheticLatencies::zero()).with_fault(SyntheticFault::Load);
        let artifacts = backend.fetch("x").unwrap();
        assert!(matches!(
            backend.load(&artifacts, WeightDType::F16),
            Err(BackendError::Load { .. })
        ));
        assert_eq!(backend.load_count(), 1);

        let observer = backend.clone();
        backend.synchronize().unwrap();
        assert_eq!(observer.sync_count(), 1);
    }

    #[test]
    fn test_to_device() {
        let (_, mut model) = loaded(SyntheticLatencies::zero());
        assert!(!model.is_on_device());
        model.to_device().unwrap();
        assert!(model.is_on_device());
    }

    #[test]
    fn test_expected_mean_token_time() {
        let latencies = SyntheticLatencies {
            forward_ms: 4,
            ..SyntheticLatencies::zero()
        };
        assert_eq!(
            latencies.expected(Phase::TimeToNextTokenMean, 4),
            Duration::from_millis(3)
        );
        assert_eq!(
            latencies.expected(Phase::FirstEagerGenerate, 4),
            Duration::from_millis(16)
        );
    }
}
