// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The benchmark run protocol.
//!
//! ```text
//! Setup ─▶ SamplerStart ─▶ ModelReady ─▶ EagerPhases ×2
//!       ─▶ CompiledStepPhases ─▶ CompiledGeneratePhases ×4 ─▶ Persist
//!                                                       └──▶ Teardown (always)
//! ```
//!
//! Every timed interval is bracketed by device synchronisation so queued
//! kernels are charged to the phase that issued them. A fault in any stage
//! ends the run without a phase result; the sampler is stopped and joined
//! either way.

use crate::backend::{CausalLm, DecodeStep, GenerationConfig, InferenceBackend, TextTokenizer};
use crate::sampler::{Sampler, SamplerHandle, SamplerOutcome};
use crate::{BenchConfig, BenchError, Phase, PhaseTimings, Stage, StageError};
use device_monitor::AcceleratorProbe;
use metrics_store::{MetricsStore, NewBenchmarkRun, RunId, StoreConnector};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source-control identity of the code under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub branch: String,
    pub commit_id: String,
    pub commit_message: String,
}

/// What a benchmark attempt produced.
#[derive(Debug)]
pub struct RunReport {
    /// Assigned once Setup succeeded.
    pub run_id: Option<RunId>,
    /// Phases completed before the run ended.
    pub timings: PhaseTimings,
    /// `true` once the phase result row was written.
    pub persisted: bool,
    pub failure: Option<StageError>,
    pub sampler: SamplerOutcome,
    /// Device samples stored for the run after the sampler was joined.
    pub stored_samples: Option<u64>,
}

impl RunReport {
    /// `true` if the run persisted its result and the sampler stayed healthy.
    pub fn succeeded(&self) -> bool {
        self.persisted && self.failure.is_none() && self.sampler.is_healthy()
    }

    /// One-line summary for the final log line.
    pub fn summary(&self) -> String {
        let run = self
            .run_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        let status = match (&self.failure, self.persisted) {
            (Some(err), _) => format!("failed: {err}"),
            (None, true) => "persisted".to_string(),
            (None, false) => "not persisted".to_string(),
        };
        let samples = self
            .stored_samples
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string());
        format!(
            "run {run} {status}; sampler {}; {samples} device samples; {}",
            self.sampler,
            self.timings.summary()
        )
    }
}

/// Drives one backend through the phase battery and records the results.
pub struct Orchestrator<B, C> {
    config: BenchConfig,
    backend: B,
    connector: C,
    probe: Arc<dyn AcceleratorProbe>,
}

/// Per-run mutable state the teardown needs regardless of outcome.
struct Session {
    stage: Stage,
    run_id: Option<RunId>,
    sampler: Option<SamplerHandle>,
    sampler_warned: bool,
    timings: PhaseTimings,
    persisted: bool,
}

impl Session {
    fn new() -> Self {
        Self {
            stage: Stage::Setup,
            run_id: None,
            sampler: None,
            sampler_warned: false,
            timings: PhaseTimings::new(),
            persisted: false,
        }
    }

    fn enter(&mut self, stage: Stage) {
        self.check_sampler();
        tracing::debug!("entering stage: {stage}");
        self.stage = stage;
    }

    /// Warns once if the sampler thread has exited on its own.
    fn check_sampler(&mut self) {
        if self.sampler_warned {
            return;
        }
        if let Some(handle) = &self.sampler {
            if !handle.is_running() {
                self.sampler_warned = true;
                tracing::warn!(
                    "device sampler for run {} stopped early; continuing without device samples",
                    handle.run_id()
                );
            }
        }
    }
}

impl<B, C> Orchestrator<B, C>
where
    B: InferenceBackend,
    C: StoreConnector,
{
    /// Creates an orchestrator after validating `config`.
    pub fn new(
        config: BenchConfig,
        backend: B,
        connector: C,
        probe: Arc<dyn AcceleratorProbe>,
    ) -> Result<Self, BenchError> {
        config.validate()?;
        tracing::info!(
            "orchestrator ready: backend '{}', checkpoint '{}'",
            backend.name(),
            config.checkpoint
        );
        Ok(Self {
            config,
            backend,
            connector,
            probe,
        })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    /// Runs the full battery for `commit`.
    ///
    /// Never fails: faults are logged and reported in the returned
    /// [`RunReport`]. Each call registers a new run.
    pub fn run(&self, commit: &CommitInfo) -> RunReport {
        let mut session = Session::new();

        let failure = match self.execute(commit, &mut session) {
            Ok(()) => None,
            Err(source) => {
                let err = StageError {
                    stage: session.stage,
                    source,
                };
                tracing::error!("benchmark aborted: {err}");
                Some(err)
            }
        };

        let sampler = match session.sampler.take() {
            Some(handle) => handle.stop(),
            None => SamplerOutcome::NotStarted,
        };
        if let SamplerOutcome::Failed(_) | SamplerOutcome::Panicked(_) = &sampler {
            tracing::warn!("device sampler {sampler}");
        }

        let stored_samples = session.run_id.and_then(|run_id| {
            match self
                .connector
                .connect()
                .and_then(|store| store.count_device_samples(run_id))
            {
                Ok(count) => Some(count),
                Err(e) => {
                    tracing::warn!("could not count device samples for run {run_id}: {e}");
                    None
                }
            }
        });

        RunReport {
            run_id: session.run_id,
            timings: session.timings,
            persisted: session.persisted,
            failure,
            sampler,
            stored_samples,
        }
    }

    fn execute(&self, commit: &CommitInfo, session: &mut Session) -> Result<(), BenchError> {
        // ── Setup ──────────────────────────────────────────────
        let accelerator_name = self.probe.name()?;
        let mut store = self.connector.connect()?;
        let run_id = store.create_benchmark_run(&NewBenchmarkRun {
            branch: commit.branch.clone(),
            commit_id: commit.commit_id.clone(),
            commit_message: commit.commit_message.clone(),
            accelerator_name: accelerator_name.clone(),
        })?;
        session.run_id = Some(run_id);
        tracing::info!(
            "benchmark run {run_id} on {accelerator_name}: {}@{}",
            commit.branch,
            commit.commit_id
        );

        // ── Sampler ────────────────────────────────────────────
        session.enter(Stage::SamplerStart);
        let sampler = Sampler::new(run_id, Arc::clone(&self.probe), self.config.sample_interval());
        session.sampler = Some(sampler.spawn(&self.connector)?);

        // ── Model ──────────────────────────────────────────────
        session.enter(Stage::ModelReady);
        let artifacts = self.backend.fetch(&self.config.checkpoint)?;
        // Warm load so the timed load reads from a populated file cache.
        drop(self.backend.load(&artifacts, self.config.dtype)?);

        let (mut model, elapsed) = self.measure(|| {
            let mut model = self.backend.load(&artifacts, self.config.dtype)?;
            model.to_device()?;
            Ok(model)
        })?;
        session.timings.record(Phase::ModelLoad, elapsed);

        let tokenizer = self.backend.tokenizer(&artifacts)?;
        let prompt = tokenizer.encode(&self.config.prompt)?;
        let prompt_len = prompt.len();
        let num_tokens = self.config.num_tokens_to_generate;
        tracing::info!("prompt: {prompt_len} tokens, generating {num_tokens}");

        // ── Eager ──────────────────────────────────────────────
        session.enter(Stage::EagerPhases);
        let max_length = prompt_len + num_tokens;
        let eager_rounds = Phase::EAGER_FORWARD.into_iter().zip(Phase::EAGER_GENERATE);
        for (forward_phase, generate_phase) in eager_rounds {
            let mut cache = model.new_cache(1, max_length)?;
            let (_, elapsed) = self.measure(|| Ok(model.forward(&prompt, 0, &mut cache)?))?;
            session.timings.record(forward_phase, elapsed);

            let mut cache = model.new_cache(1, max_length)?;
            let generation = GenerationConfig::greedy(max_length);
            let (output, elapsed) =
                self.measure(|| Ok(model.generate(&prompt, &mut cache, &generation)?))?;
            session.timings.record(generate_phase, elapsed);
            log_generated(&tokenizer, &output);
            session.check_sampler();
        }

        // ── Compiled decode step ───────────────────────────────
        session.enter(Stage::CompiledStepPhases);
        self.backend.reset_compiled(&mut model)?;
        model.compile_decode_step()?;
        let mut step = DecodeStep::new(self.config.sampling(), self.config.seed);
        let mut cache = model.new_cache(
            1,
            decode_step_cache_len(prompt_len, num_tokens, self.config.compiled_cache_padding),
        )?;
        let mut generated = Vec::with_capacity(num_tokens + 2);

        let (mut token, elapsed) =
            self.measure(|| Ok(step.call(&mut model, &prompt, 0, &mut cache)?))?;
        session.timings.record(Phase::TimeToFirstToken, elapsed);
        generated.push(token);

        let mut position = prompt_len;
        for phase in [Phase::TimeToSecondToken, Phase::TimeToThirdToken] {
            let (next, elapsed) =
                self.measure(|| Ok(step.call(&mut model, &[token], position, &mut cache)?))?;
            session.timings.record(phase, elapsed);
            token = next;
            generated.push(token);
            position += 1;
        }

        let ((), elapsed) = self.measure(|| {
            for _ in 1..num_tokens {
                token = step.call(&mut model, &[token], position, &mut cache)?;
                generated.push(token);
                position += 1;
            }
            Ok(())
        })?;
        session
            .timings
            .record(Phase::TimeToNextTokenMean, mean_per_token(elapsed, num_tokens));
        log_generated(&tokenizer, &generated);

        // ── Compiled generate ──────────────────────────────────
        session.enter(Stage::CompiledGeneratePhases);
        self.backend.reset_compiled(&mut model)?;
        let generation = GenerationConfig::compiled(max_length);
        for phase in Phase::COMPILE_GENERATE {
            let mut cache = model.new_cache(1, prompt_len + self.config.compiled_generate_budget)?;
            let (output, elapsed) =
                self.measure(|| Ok(model.generate(&prompt, &mut cache, &generation)?))?;
            session.timings.record(phase, elapsed);
            log_generated(&tokenizer, &output);
        }

        // ── Persist ────────────────────────────────────────────
        session.enter(Stage::Persist);
        let measurements = session.timings.to_phase_map()?;
        store.insert_phase_result(run_id, &measurements)?;
        session.persisted = true;
        tracing::info!("phase result stored for run {run_id}");
        Ok(())
    }

    /// Runs `f` between two device synchronisations and times it.
    fn measure<T>(
        &self,
        f: impl FnOnce() -> Result<T, BenchError>,
    ) -> Result<(T, Duration), BenchError> {
        self.backend.synchronize()?;
        let start = Instant::now();
        let out = f()?;
        self.backend.synchronize()?;
        Ok((out, start.elapsed()))
    }
}

/// Cache positions the decode-step battery writes, plus `padding` slack.
///
/// The prompt, the second and third tokens, then `num_tokens - 1` loop steps.
fn decode_step_cache_len(prompt_len: usize, num_tokens: usize, padding: usize) -> usize {
    prompt_len + 2 + num_tokens.saturating_sub(1) + padding
}

/// Mean decode time over the loop, divided by the full token count.
fn mean_per_token(elapsed: Duration, num_tokens: usize) -> Duration {
    elapsed.div_f64(num_tokens.max(1) as f64)
}

fn log_generated<T: TextTokenizer>(tokenizer: &T, tokens: &[u32]) {
    match tokenizer.decode(tokens) {
        Ok(text) => tracing::info!("generated: {text:?}"),
        Err(e) => tracing::warn!("could not decode generated tokens: {e}"),
    }
}
