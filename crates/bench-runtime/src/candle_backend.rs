// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Llama checkpoints through candle.
//!
//! Weights, config and tokenizer are fetched from the Hugging Face hub and
//! memory-mapped straight onto the target device, so `to_device` has
//! nothing left to move. candle has no graph compiler; the compiled paths
//! run the same kernels as the eager ones.

use crate::backend::{CausalLm, GenerationConfig, InferenceBackend, KvCache, TextTokenizer};
use crate::sampling;
use crate::{BackendError, DeviceKind, WeightDType};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::llama::{Cache, Config, Llama, LlamaConfig, LlamaEosToks};
use hf_hub::api::sync::{Api, ApiRepo};
use std::path::PathBuf;
use tokenizers::Tokenizer;

/// Backend bound to one candle device.
#[derive(Debug, Clone)]
pub struct CandleBackend {
    device: Device,
}

impl CandleBackend {
    /// Opens the device and applies the tokenizer threading policy.
    pub fn new(
        device: DeviceKind,
        index: u32,
        tokenizer_parallelism: bool,
    ) -> Result<Self, BackendError> {
        tokenizers::utils::parallelism::set_parallelism(tokenizer_parallelism);
        let device = match device {
            DeviceKind::Cuda => Device::new_cuda(index as usize)
                .map_err(|e| BackendError::Device(format!("cuda:{index}: {e}")))?,
            DeviceKind::Cpu => Device::Cpu,
        };
        tracing::info!("candle device: {device:?}");
        Ok(Self { device })
    }
}

/// Local paths of a fetched checkpoint.
#[derive(Debug, Clone)]
pub struct CandleArtifacts {
    pub checkpoint: String,
    pub config: Config,
    pub weights: Vec<PathBuf>,
    pub tokenizer: PathBuf,
}

impl InferenceBackend for CandleBackend {
    type Artifacts = CandleArtifacts;
    type Model = CandleModel;
    type Tokenizer = HubTokenizer;

    fn name(&self) -> &str {
        "candle"
    }

    fn fetch(&self, checkpoint: &str) -> Result<CandleArtifacts, BackendError> {
        let load_err = |detail: String| BackendError::Load {
            checkpoint: checkpoint.to_string(),
            detail,
        };
        let api = Api::new().map_err(|e| load_err(e.to_string()))?;
        let repo = api.model(checkpoint.to_string());

        let tokenizer = repo.get("tokenizer.json").map_err(|e| load_err(e.to_string()))?;
        let config_file = repo.get("config.json").map_err(|e| load_err(e.to_string()))?;
        let raw = std::fs::read(&config_file).map_err(|e| load_err(e.to_string()))?;
        let llama_config: LlamaConfig =
            serde_json::from_slice(&raw).map_err(|e| load_err(format!("config.json: {e}")))?;
        let weights = safetensors_files(&repo).map_err(load_err)?;

        tracing::info!("fetched '{checkpoint}': {} weight file(s)", weights.len());
        Ok(CandleArtifacts {
            checkpoint: checkpoint.to_string(),
            config: llama_config.into_config(false),
            weights,
            tokenizer,
        })
    }

    fn load(
        &self,
        artifacts: &CandleArtifacts,
        dtype: WeightDType,
    ) -> Result<CandleModel, BackendError> {
        let dtype = match dtype {
            WeightDType::F16 => DType::F16,
            WeightDType::Bf16 => DType::BF16,
            WeightDType::F32 => DType::F32,
        };
        let load_err = |e: candle_core::Error| BackendError::Load {
            checkpoint: artifacts.checkpoint.clone(),
            detail: e.to_string(),
        };
        // SAFETY: the weight files are not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&artifacts.weights, dtype, &self.device)
        }
        .map_err(load_err)?;
        let llama = Llama::load(vb, &artifacts.config).map_err(load_err)?;
        Ok(CandleModel {
            llama,
            config: artifacts.config.clone(),
            device: self.device.clone(),
            dtype,
        })
    }

    fn tokenizer(&self, artifacts: &CandleArtifacts) -> Result<HubTokenizer, BackendError> {
        Tokenizer::from_file(&artifacts.tokenizer)
            .map(|inner| HubTokenizer { inner })
            .map_err(|e| BackendError::Tokenizer(e.to_string()))
    }

    fn synchronize(&self) -> Result<(), BackendError> {
        self.device
            .synchronize()
            .map_err(|e| BackendError::Device(e.to_string()))
    }

    fn reset_compiled(&self, _model: &mut CandleModel) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Sharded checkpoints list their files in an index; others ship one file.
fn safetensors_files(repo: &ApiRepo) -> Result<Vec<PathBuf>, String> {
    let index = match repo.get("model.safetensors.index.json") {
        Ok(index) => index,
        Err(_) => return repo.get("model.safetensors").map(|p| vec![p]).map_err(|e| e.to_string()),
    };
    let raw = std::fs::read(&index).map_err(|e| e.to_string())?;
    let json: serde_json::Value = serde_json::from_slice(&raw).map_err(|e| e.to_string())?;
    let weight_map = json
        .get("weight_map")
        .and_then(|m| m.as_object())
        .ok_or_else(|| format!("no weight_map in {}", index.display()))?;

    let mut files: Vec<&str> = weight_map.values().filter_map(|v| v.as_str()).collect();
    files.sort_unstable();
    files.dedup();
    files
        .into_iter()
        .map(|f| repo.get(f).map_err(|e| e.to_string()))
        .collect()
}

/// A loaded Llama model.
pub struct CandleModel {
    llama: Llama,
    config: Config,
    device: Device,
    dtype: DType,
}

impl CandleModel {
    fn is_eos(&self, token: u32) -> bool {
        match &self.config.eos_token_id {
            Some(LlamaEosToks::Single(id)) => *id == token,
            Some(LlamaEosToks::Multiple(ids)) => ids.contains(&token),
            None => false,
        }
    }

    fn run(
        &self,
        tokens: &[u32],
        start: usize,
        cache: &mut CandleCache,
    ) -> Result<Vec<f32>, BackendError> {
        let required = start + tokens.len();
        if required > cache.capacity {
            return Err(BackendError::CacheOverflow {
                required,
                capacity: cache.capacity,
            });
        }
        let runtime = |e: candle_core::Error| BackendError::Runtime {
            op: "forward",
            detail: e.to_string(),
        };
        let input = Tensor::new(tokens, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(runtime)?;
        let logits = self
            .llama
            .forward(&input, start, &mut cache.inner)
            .and_then(|l| l.squeeze(0))
            .and_then(|l| l.to_dtype(DType::F32))
            .and_then(|l| l.to_vec1::<f32>())
            .map_err(runtime)?;
        cache.len = cache.len.max(required);
        Ok(logits)
    }
}

impl CausalLm for CandleModel {
    type Cache = CandleCache;

    fn to_device(&mut self) -> Result<(), BackendError> {
        tracing::debug!("weights already resident on {:?}", self.device);
        Ok(())
    }

    fn new_cache(&self, batch_size: usize, max_len: usize) -> Result<CandleCache, BackendError> {
        if batch_size != 1 {
            return Err(BackendError::Runtime {
                op: "new_cache",
                detail: format!("batch size {batch_size} unsupported"),
            });
        }
        if max_len > self.config.max_position_embeddings {
            return Err(BackendError::CacheOverflow {
                required: max_len,
                capacity: self.config.max_position_embeddings,
            });
        }
        let inner = Cache::new(true, self.dtype, &self.config, &self.device).map_err(|e| {
            BackendError::Runtime {
                op: "new_cache",
                detail: e.to_string(),
            }
        })?;
        Ok(CandleCache {
            inner,
            capacity: max_len,
            len: 0,
        })
    }

    fn forward(
        &mut self,
        tokens: &[u32],
        start: usize,
        cache: &mut CandleCache,
    ) -> Result<Vec<f32>, BackendError> {
        self.run(tokens, start, cache)
    }

    fn generate(
        &mut self,
        prompt: &[u32],
        cache: &mut CandleCache,
        config: &GenerationConfig,
    ) -> Result<Vec<u32>, BackendError> {
        if config.max_length > cache.capacity {
            return Err(BackendError::CacheOverflow {
                required: config.max_length,
                capacity: cache.capacity,
            });
        }
        let mut sequence = prompt.to_vec();
        if sequence.len() >= config.max_length {
            return Ok(sequence);
        }
        let mut next = sampling::greedy(&self.run(prompt, 0, cache)?)?;
        sequence.push(next);
        while sequence.len() < config.max_length && !self.is_eos(next) {
            let position = sequence.len() - 1;
            next = sampling::greedy(&self.run(&[next], position, cache)?)?;
            sequence.push(next);
        }
        Ok(sequence)
    }

    fn compile_decode_step(&mut self) -> Result<(), BackendError> {
        tracing::debug!("candle has no graph compiler; decode step runs eagerly");
        Ok(())
    }
}

/// candle's Llama cache with an explicit position bound.
pub struct CandleCache {
    inner: Cache,
    capacity: usize,
    len: usize,
}

impl KvCache for CandleCache {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.len
    }
}

/// A `tokenizers` tokenizer loaded from the hub.
pub struct HubTokenizer {
    inner: Tokenizer,
}

impl TextTokenizer for HubTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, BackendError> {
        self.inner
            .encode(text, true)
            .map(|enc| enc.get_ids().to_vec())
            .map_err(|e| BackendError::Tokenizer(e.to_string()))
    }

    fn decode(&self, tokens: &[u32]) -> Result<String, BackendError> {
        self.inner
            .decode(tokens, true)
            .map_err(|e| BackendError::Tokenizer(e.to_string()))
    }
}
