// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # device-monitor
//!
//! Reads the resource usage that the benchmark sampler records alongside
//! every run.
//!
//! # Monitored Metrics
//! - **Process CPU** — utilisation of the benchmarking process (`sysinfo`).
//! - **Process memory** — resident set size of the benchmarking process.
//! - **Accelerator utilisation** — GPU busy percentage (NVML).
//! - **Accelerator memory** — device memory in use (NVML).
//!
//! All reads are cheap enough for a 10 ms polling loop.
//!
//! # Example
//! ```no_run
//! use device_monitor::{DeviceSnapshot, NoAccelerator, ProcessMonitor};
//!
//! let mut process = ProcessMonitor::current().expect("no current pid");
//! let snap = DeviceSnapshot::capture(&mut process, &NoAccelerator).expect("read failed");
//! println!("{}", snap.summary());
//! ```

mod accelerator;
mod error;
mod process;
mod snapshot;

pub use accelerator::{AcceleratorProbe, AcceleratorUsage, NoAccelerator, NvmlProbe};
pub use error::MonitorError;
pub use process::{ProcessMonitor, ProcessUsage};
pub use snapshot::DeviceSnapshot;
