// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the metrics store.

use crate::RunId;

/// Errors that can occur while writing or reading benchmark records.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The underlying SQLite call failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A record referenced a benchmark run that does not exist.
    #[error("benchmark run {0} does not exist")]
    UnknownRun(RunId),

    /// A phase result was already recorded for this run.
    #[error("benchmark run {0} already has a phase result")]
    DuplicateResult(RunId),

    /// A stored phase map could not be encoded or decoded.
    #[error("phase map (de)serialisation failed: {0}")]
    Json(#[from] serde_json::Error),

    /// A shared in-memory store was poisoned by a panicking writer.
    #[error("in-memory store poisoned by a panicked writer")]
    Poisoned,

    /// A stored value does not fit the Rust type it is read into.
    #[error("corrupt value in column '{column}': {detail}")]
    Corrupt { column: &'static str, detail: String },
}
