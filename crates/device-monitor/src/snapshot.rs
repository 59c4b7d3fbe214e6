// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Aggregated point-in-time device snapshot.
//!
//! A [`DeviceSnapshot`] combines a process reading and an accelerator
//! reading into the four figures the benchmark persists per sample.

use crate::{AcceleratorProbe, MonitorError, ProcessMonitor};

/// A complete point-in-time reading of process and accelerator usage.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct DeviceSnapshot {
    /// Process CPU utilisation in percent.
    pub cpu_percent: f64,
    /// Process resident memory in MB.
    pub memory_mb: f64,
    /// Accelerator utilisation in percent.
    pub accelerator_percent: f64,
    /// Accelerator memory in use, in MB.
    pub accelerator_memory_mb: f64,
}

impl DeviceSnapshot {
    /// Reads the process first, then the accelerator.
    ///
    /// Unlike the host readings, an accelerator failure is not papered over
    /// with defaults: the caller decides whether a missing GPU reading ends
    /// the sampling loop.
    pub fn capture(
        process: &mut ProcessMonitor,
        accelerator: &dyn AcceleratorProbe,
    ) -> Result<Self, MonitorError> {
        let host = process.read()?;
        let accel = accelerator.usage()?;

        Ok(Self {
            cpu_percent: f64::from(host.cpu_percent),
            memory_mb: host.resident_mb(),
            accelerator_percent: f64::from(accel.utilization_percent),
            accelerator_memory_mb: accel.memory_used_mb(),
        })
    }

    /// Returns a one-line summary suitable for debug logging.
    ///
    /// # Example output
    /// ```text
    /// CPU 98.0%, RSS 1534.2 MB, GPU 87% (13958.0 MB)
    /// ```
    pub fn summary(&self) -> String {
        format!(
            "CPU {:.1}%, RSS {:.1} MB, GPU {:.0}% ({:.1} MB)",
            self.cpu_percent, self.memory_mb, self.accelerator_percent, self.accelerator_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AcceleratorUsage, NoAccelerator};

    struct BusyGpu;

    impl AcceleratorProbe for BusyGpu {
        fn name(&self) -> Result<String, MonitorError> {
            Ok("test-gpu".into())
        }

        fn usage(&self) -> Result<AcceleratorUsage, MonitorError> {
            Ok(AcceleratorUsage {
                utilization_percent: 87,
                memory_used_bytes: 2048 * 1024 * 1024,
            })
        }
    }

    struct LostGpu;

    impl AcceleratorProbe for LostGpu {
        fn name(&self) -> Result<String, MonitorError> {
            Err(MonitorError::AcceleratorNotFound {
                index: 0,
                available: 0,
            })
        }

        fn usage(&self) -> Result<AcceleratorUsage, MonitorError> {
            Err(MonitorError::AcceleratorNotFound {
                index: 0,
                available: 0,
            })
        }
    }

    #[test]
    fn test_capture_host_only() {
        let mut process = ProcessMonitor::current().unwrap();
        let snap = DeviceSnapshot::capture(&mut process, &NoAccelerator).unwrap();
        assert!(snap.memory_mb > 0.0);
        assert_eq!(snap.accelerator_percent, 0.0);
        assert_eq!(snap.accelerator_memory_mb, 0.0);
    }

    #[test]
    fn test_capture_with_accelerator() {
        let mut process = ProcessMonitor::current().unwrap();
        let snap = DeviceSnapshot::capture(&mut process, &BusyGpu).unwrap();
        assert_eq!(snap.accelerator_percent, 87.0);
        assert!((snap.accelerator_memory_mb - 2048.0).abs() < 1e-9);
    }

    #[test]
    fn test_capture_propagates_probe_failure() {
        let mut process = ProcessMonitor::current().unwrap();
        assert!(DeviceSnapshot::capture(&mut process, &LostGpu).is_err());
    }

    #[test]
    fn test_summary_format() {
        let snap = DeviceSnapshot {
            cpu_percent: 98.0,
            memory_mb: 1534.25,
            accelerator_percent: 87.0,
            accelerator_memory_mb: 13958.0,
        };
        let summary = snap.summary();
        assert!(summary.contains("CPU 98.0%"));
        assert!(summary.contains("RSS 1534.2 MB"));
        assert!(summary.contains("GPU 87%"));
    }
}
