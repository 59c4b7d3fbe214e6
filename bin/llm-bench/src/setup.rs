// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Process-wide setup done once, before any thread is spawned.

use anyhow::Context;
use bench_runtime::BenchConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_ENV: &str = "LLM_BENCH_CONFIG";

/// Longest commit message stored with a run, in characters.
pub const MAX_COMMIT_MESSAGE_CHARS: usize = 70;

/// Installs the log subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Loads the config named by [`CONFIG_ENV`], or defaults.
pub fn load_config() -> anyhow::Result<BenchConfig> {
    let config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => {
            let path = PathBuf::from(path);
            tracing::info!("loading config from {}", path.display());
            BenchConfig::from_file(&path)
                .with_context(|| format!("{CONFIG_ENV}={}", path.display()))?
        }
        None => BenchConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Applies the environment toggles the backend libraries read.
///
/// Must run before any thread is spawned.
pub fn apply_process_env(config: &BenchConfig) {
    if config.fast_downloads {
        std::env::set_var("HF_HUB_ENABLE_HF_TRANSFER", "1");
    }
    std::env::set_var(
        "TOKENIZERS_PARALLELISM",
        if config.tokenizer_parallelism { "true" } else { "false" },
    );
}

/// Cuts `message` to [`MAX_COMMIT_MESSAGE_CHARS`] characters.
pub fn truncate_commit_message(message: &str) -> String {
    match message.char_indices().nth(MAX_COMMIT_MESSAGE_CHARS) {
        Some((cut, _)) => {
            tracing::warn!(
                "commit message longer than {MAX_COMMIT_MESSAGE_CHARS} characters; truncating"
            );
            message[..cut].to_string()
        }
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_message_unchanged() {
        assert_eq!(truncate_commit_message("Fix cache"), "Fix cache");
        let exact = "x".repeat(MAX_COMMIT_MESSAGE_CHARS);
        assert_eq!(truncate_commit_message(&exact), exact);
    }

    #[test]
    fn test_long_message_truncated() {
        let long = "a".repeat(100);
        assert_eq!(truncate_commit_message(&long).len(), MAX_COMMIT_MESSAGE_CHARS);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let long = "é".repeat(80);
        let cut = truncate_commit_message(&long);
        assert_eq!(cut.chars().count(), MAX_COMMIT_MESSAGE_CHARS);
        assert_eq!(cut.len(), MAX_COMMIT_MESSAGE_CHARS * 2);
    }
}
