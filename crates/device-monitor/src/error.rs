// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for device monitoring.

/// Errors that can occur when reading process or accelerator state.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The operating system did not report the monitored process.
    #[error("process {pid} is not visible to the monitor")]
    ProcessNotFound { pid: u32 },

    /// The current process id could not be determined.
    #[error("cannot determine current process id: {detail}")]
    CurrentPid { detail: String },

    /// No accelerator answers at the requested index (absent or fallen off the bus).
    #[error("accelerator {index} not found ({available} visible)")]
    AcceleratorNotFound { index: u32, available: u32 },

    /// An NVML call failed (driver missing, device lost, ...).
    #[error("NVML {op} failed: {source}")]
    Nvml {
        op: &'static str,
        #[source]
        source: nvml_wrapper::error::NvmlError,
    },
}
