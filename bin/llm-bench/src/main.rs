// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # llm-bench
//!
//! Runs the latency battery once for a code revision and records the
//! results in the metrics database.
//!
//! ## Usage
//! ```bash
//! llm-bench main 4f2e9c1 "Use static cache in generate"
//!
//! # Custom settings and verbose logs
//! LLM_BENCH_CONFIG=bench.toml RUST_LOG=debug llm-bench main 4f2e9c1 "..."
//! ```
//!
//! The process exits with status 0 once a benchmark was attempted; the
//! outcome is reported in the log.

mod run;
mod setup;

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "llm-bench",
    about = "Benchmark LLM inference latency and record it per commit",
    version,
    author
)]
struct Cli {
    /// Branch the benchmarked code is on.
    branch: String,

    /// Commit id of the benchmarked code.
    commit_id: String,

    /// Commit message (truncated to 70 characters).
    commit_message: String,
}

fn main() {
    let cli = Cli::parse();
    setup::init_tracing();

    let commit = bench_runtime::CommitInfo {
        branch: cli.branch,
        commit_id: cli.commit_id,
        commit_message: setup::truncate_commit_message(&cli.commit_message),
    };

    if let Err(e) = run::execute(&commit) {
        tracing::error!("benchmark not run: {e:#}");
    }
}
