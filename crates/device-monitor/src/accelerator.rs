// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Accelerator (GPU) utilisation monitoring.
//!
//! The [`AcceleratorProbe`] trait is the seam between the sampler and the
//! vendor tooling. [`NvmlProbe`] talks to the NVIDIA driver through NVML
//! (loaded dynamically at runtime, so building does not require CUDA).
//! [`NoAccelerator`] is used on hosts that benchmark on the CPU only.

use crate::process::BYTES_PER_MB;
use crate::MonitorError;
use nvml_wrapper::Nvml;

/// Accelerator utilisation at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct AcceleratorUsage {
    /// Percent of time over the driver's sample period during which a
    /// kernel was executing, in `[0, 100]`.
    pub utilization_percent: u32,
    /// Device memory currently in use, in bytes.
    pub memory_used_bytes: u64,
}

impl AcceleratorUsage {
    /// Returns used device memory in megabytes.
    pub fn memory_used_mb(&self) -> f64 {
        self.memory_used_bytes as f64 / BYTES_PER_MB
    }
}

/// Source of accelerator identity and utilisation readings.
///
/// Implementations must be shareable across threads: the orchestrator
/// queries the name during setup while the sampler thread polls usage.
pub trait AcceleratorProbe: Send + Sync {
    /// Human-readable device name (e.g. `"NVIDIA A10G"`).
    fn name(&self) -> Result<String, MonitorError>;

    /// Current utilisation and memory usage.
    fn usage(&self) -> Result<AcceleratorUsage, MonitorError>;
}

/// NVML-backed probe for a single NVIDIA device.
pub struct NvmlProbe {
    nvml: Nvml,
    index: u32,
}

impl NvmlProbe {
    /// Initialises NVML and binds the probe to device `index`.
    ///
    /// Fails if the driver library cannot be loaded or the index does not
    /// exist, so configuration mistakes surface before a run starts.
    pub fn new(index: u32) -> Result<Self, MonitorError> {
        let nvml = Nvml::init().map_err(|source| MonitorError::Nvml {
            op: "init",
            source,
        })?;
        let available = nvml.device_count().map_err(|source| MonitorError::Nvml {
            op: "device_count",
            source,
        })?;
        if index >= available {
            return Err(MonitorError::AcceleratorNotFound { index, available });
        }
        let probe = Self { nvml, index };
        probe.device()?;
        tracing::debug!("NVML probe bound to device {index}");
        Ok(probe)
    }

    /// Returns the bound device index.
    pub fn index(&self) -> u32 {
        self.index
    }

    fn device(&self) -> Result<nvml_wrapper::Device<'_>, MonitorError> {
        self.nvml
            .device_by_index(self.index)
            .map_err(|source| MonitorError::Nvml {
                op: "device_by_index",
                source,
            })
    }
}

impl AcceleratorProbe for NvmlProbe {
    fn name(&self) -> Result<String, MonitorError> {
        self.device()?
            .name()
            .map_err(|source| MonitorError::Nvml { op: "name", source })
    }

    fn usage(&self) -> Result<AcceleratorUsage, MonitorError> {
        let device = self.device()?;
        let rates = device
            .utilization_rates()
            .map_err(|source| MonitorError::Nvml {
                op: "utilization_rates",
                source,
            })?;
        let memory = device.memory_info().map_err(|source| MonitorError::Nvml {
            op: "memory_info",
            source,
        })?;
        Ok(AcceleratorUsage {
            utilization_percent: rates.gpu,
            memory_used_bytes: memory.used,
        })
    }
}

impl std::fmt::Debug for NvmlProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NvmlProbe").field("index", &self.index).finish()
    }
}

/// Probe for hosts without an accelerator: reports `"cpu"` and zero usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAccelerator;

impl AcceleratorProbe for NoAccelerator {
    fn name(&self) -> Result<String, MonitorError> {
        Ok("cpu".to_string())
    }

    fn usage(&self) -> Result<AcceleratorUsage, MonitorError> {
        Ok(AcceleratorUsage::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_used_mb() {
        let usage = AcceleratorUsage {
            utilization_percent: 87,
            memory_used_bytes: 13_958 * 1024 * 1024,
        };
        assert!((usage.memory_used_mb() - 13_958.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_accelerator() {
        let probe = NoAccelerator;
        assert_eq!(probe.name().unwrap(), "cpu");
        assert_eq!(probe.usage().unwrap(), AcceleratorUsage::default());
    }

    #[test]
    fn test_probe_is_object_safe() {
        let probe: Box<dyn AcceleratorProbe> = Box::new(NoAccelerator);
        assert_eq!(probe.usage().unwrap().utilization_percent, 0);
    }

    #[test]
    fn test_nvml_when_available() {
        // Only meaningful on hosts with an NVIDIA driver; elsewhere init fails cleanly.
        match NvmlProbe::new(0) {
            Ok(probe) => {
                assert!(!probe.name().unwrap().is_empty());
                let usage = probe.usage().unwrap();
                assert!(usage.utilization_percent <= 100);
            }
            Err(e) => assert!(matches!(
                e,
                MonitorError::Nvml { .. } | MonitorError::AcceleratorNotFound { .. }
            )),
        }
    }

    #[test]
    fn test_out_of_range_index_rejected() {
        // Without a driver, init fails first; with one, no host has u32::MAX devices.
        match NvmlProbe::new(u32::MAX) {
            Err(MonitorError::AcceleratorNotFound { index, available }) => {
                assert_eq!(index, u32::MAX);
                assert!(available < u32::MAX);
            }
            Err(MonitorError::Nvml { op, .. }) => assert_eq!(op, "init"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
