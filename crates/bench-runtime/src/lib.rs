// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # bench-runtime
//!
//! Latency benchmark for causal language models.
//!
//! An [`Orchestrator`] registers a benchmark run, starts a background
//! [`Sampler`] that records process and accelerator usage every few
//! milliseconds, then drives a model through a fixed battery of phases:
//!
//! | Stage | Phases |
//! |-------|--------|
//! | model ready | cold load + move to device |
//! | eager ×2 | prefill forward, greedy generate |
//! | compiled decode step | first, second, third token, mean next token |
//! | compiled generate ×4 | full generate through the compiled path |
//!
//! The thirteen timings are written as one row; the sampler is stopped and
//! joined whether or not the phases succeeded.
//!
//! # Backends
//! The model is reached through [`InferenceBackend`] / [`CausalLm`]. The
//! [`SyntheticBackend`] sleeps for configured latencies and needs no
//! weights; the `candle` feature adds `CandleBackend` for Llama
//! checkpoints from the Hugging Face hub.

pub mod backend;
#[cfg(feature = "candle")]
mod candle_backend;
mod config;
mod error;
mod orchestrator;
pub mod sampler;
pub mod sampling;
mod signal;
pub mod synthetic;
mod timings;

pub use backend::{
    CausalLm, DecodeStep, GenerationConfig, InferenceBackend, KvCache, TextTokenizer,
};
#[cfg(feature = "candle")]
pub use candle_backend::{CandleArtifacts, CandleBackend, CandleCache, CandleModel, HubTokenizer};
pub use config::{BackendKind, BenchConfig, DeviceKind, WeightDType, IN_MEMORY_DATABASE};
pub use error::{BackendError, BenchError, SamplerError, Stage, StageError};
pub use orchestrator::{CommitInfo, Orchestrator, RunReport};
pub use sampler::{Sampler, SamplerHandle, SamplerOutcome};
pub use sampling::SamplingConfig;
pub use signal::{StopListener, StopSignal};
pub use synthetic::{SyntheticBackend, SyntheticFault, SyntheticLatencies};
pub use timings::{Phase, PhaseTimings};
