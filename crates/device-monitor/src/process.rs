// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Host-side process monitoring: CPU utilisation and resident memory.
//!
//! Backed by `sysinfo`. CPU utilisation is the process's CPU time over the
//! elapsed system CPU time between two CPU refreshes, and sysinfo will not
//! advance its global CPU counters more often than
//! [`sysinfo::MINIMUM_CPU_UPDATE_INTERVAL`]. [`ProcessMonitor::read`]
//! therefore refreshes memory on every call but CPU only once that interval
//! has passed, repeating the last CPU figure in between. The first reading
//! of a fresh monitor reports `0.0` CPU.

use crate::MonitorError;
use std::time::Instant;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, MINIMUM_CPU_UPDATE_INTERVAL};

/// Bytes per megabyte (MiB), used for every MB figure in this crate.
pub(crate) const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One reading of a process's resource usage.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ProcessUsage {
    /// CPU utilisation in percent. Can exceed 100 on multi-core hosts.
    pub cpu_percent: f32,
    /// Resident set size in bytes.
    pub resident_bytes: u64,
}

impl ProcessUsage {
    /// Returns resident memory in megabytes.
    pub fn resident_mb(&self) -> f64 {
        self.resident_bytes as f64 / BYTES_PER_MB
    }
}

/// Polls CPU and memory usage of a single process.
pub struct ProcessMonitor {
    system: System,
    pid: Pid,
    last_cpu_refresh: Option<Instant>,
    cpu_percent: f32,
}

impl ProcessMonitor {
    /// Creates a monitor for the calling process.
    pub fn current() -> Result<Self, MonitorError> {
        let pid = sysinfo::get_current_pid().map_err(|e| MonitorError::CurrentPid {
            detail: e.to_string(),
        })?;
        Ok(Self::for_pid(pid))
    }

    /// Creates a monitor for an arbitrary process id.
    pub fn for_pid(pid: Pid) -> Self {
        Self {
            system: System::new(),
            pid,
            last_cpu_refresh: None,
            cpu_percent: 0.0,
        }
    }

    /// Returns the monitored process id.
    pub fn pid(&self) -> u32 {
        self.pid.as_u32()
    }

    /// Refreshes and reads the process's current usage.
    pub fn read(&mut self) -> Result<ProcessUsage, MonitorError> {
        let refresh_cpu = self
            .last_cpu_refresh
            .map_or(true, |at| at.elapsed() > MINIMUM_CPU_UPDATE_INTERVAL);
        let kind = if refresh_cpu {
            ProcessRefreshKind::nothing().with_memory().with_cpu()
        } else {
            ProcessRefreshKind::nothing().with_memory()
        };
        self.system
            .refresh_processes_specifics(ProcessesToUpdate::Some(&[self.pid]), true, kind);

        let process = self
            .system
            .process(self.pid)
            .ok_or(MonitorError::ProcessNotFound {
                pid: self.pid.as_u32(),
            })?;

        if refresh_cpu {
            self.cpu_percent = process.cpu_usage();
            self.last_cpu_refresh = Some(Instant::now());
        }

        Ok(ProcessUsage {
            cpu_percent: self.cpu_percent,
            resident_bytes: process.memory(),
        })
    }
}

impl std::fmt::Debug for ProcessMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMonitor")
            .field("pid", &self.pid.as_u32())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_resident_mb() {
        let usage = ProcessUsage {
            cpu_percent: 12.5,
            resident_bytes: 512 * 1024 * 1024,
        };
        assert!((usage.resident_mb() - 512.0).abs() < 1e-9);
    }

    #[test]
    fn test_read_current_process() {
        let mut monitor = ProcessMonitor::current().unwrap();
        assert_eq!(monitor.pid(), std::process::id());

        let first = monitor.read().unwrap();
        assert!(first.resident_bytes > 0);
        assert!(first.cpu_percent >= 0.0);

        // A second refresh must keep working (the sampler calls this in a loop).
        let second = monitor.read().unwrap();
        assert!(second.resident_bytes > 0);
    }

    #[test]
    fn test_busy_process_reports_cpu_at_fast_polling() {
        let stop = Arc::new(AtomicBool::new(false));
        let spinner = {
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut x = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    x = std::hint::black_box(x.wrapping_add(1));
                }
            })
        };

        // Poll at the sampler's default 10 ms period for just over a second.
        let mut monitor = ProcessMonitor::current().unwrap();
        let mut readings = Vec::new();
        let start = Instant::now();
        while start.elapsed() < Duration::from_millis(1100) {
            readings.push(monitor.read().unwrap().cpu_percent);
            std::thread::sleep(Duration::from_millis(10));
        }
        stop.store(true, Ordering::Relaxed);
        spinner.join().unwrap();

        let peak = readings.iter().copied().fold(0.0f32, f32::max);
        assert!(peak > 30.0, "busy core read as {peak}% over {} polls", readings.len());
        // Between CPU refreshes the last figure is repeated, not reset.
        let last = *readings.last().unwrap();
        assert!(last > 0.0, "last reading was {last}");
    }

    #[test]
    fn test_missing_process() {
        // PIDs this large are not handed out on Linux (pid_max <= 2^22).
        let mut monitor = ProcessMonitor::for_pid(Pid::from_u32(u32::MAX - 1));
        let result = monitor.read();
        assert!(matches!(result, Err(MonitorError::ProcessNotFound { .. })));
    }

    #[test]
    fn test_debug_format() {
        let monitor = ProcessMonitor::current().unwrap();
        let debug = format!("{monitor:?}");
        assert!(debug.contains("ProcessMonitor"));
        assert!(debug.contains(&std::process::id().to_string()));
    }
}
