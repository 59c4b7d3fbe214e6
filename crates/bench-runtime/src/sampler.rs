// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Background device sampler.
//!
//! ```text
//! loop {
//!     snapshot = process + accelerator readings
//!     store.insert_device_sample(run_id, snapshot)
//!     if stop.wait(interval) { break }
//! }
//! ```
//!
//! The sampler owns its own store connection and process monitor; the only
//! thing it shares with the orchestrator is the run id (copied in) and the
//! accelerator probe (read-only). The first error ends the loop and is
//! handed back through [`SamplerHandle::stop`].

use crate::signal::{StopListener, StopSignal};
use crate::{BenchError, SamplerError};
use device_monitor::{AcceleratorProbe, DeviceSnapshot, ProcessMonitor};
use metrics_store::{DeviceReading, MetricsStore, RunId, StoreConnector};
use std::any::Any;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Name of the sampler thread.
pub const SAMPLER_THREAD_NAME: &str = "device-sampler";

/// How the sampler thread ended.
#[derive(Debug)]
pub enum SamplerOutcome {
    /// The run failed before the sampler was spawned.
    NotStarted,
    /// Stopped on request.
    Completed { samples: u64 },
    /// Ended early on a probe or store error.
    Failed(SamplerError),
    /// The thread panicked.
    Panicked(String),
}

impl SamplerOutcome {
    /// `false` if the sampler ended on its own.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::NotStarted | Self::Completed { .. })
    }

    /// Samples written by the thread, when known.
    pub fn samples(&self) -> Option<u64> {
        match self {
            Self::Completed { samples } => Some(*samples),
            Self::Failed(err) => Some(err.samples()),
            Self::NotStarted | Self::Panicked(_) => None,
        }
    }
}

impl std::fmt::Display for SamplerOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not started"),
            Self::Completed { samples } => write!(f, "completed ({samples} samples)"),
            Self::Failed(err) => write!(f, "failed: {err}"),
            Self::Panicked(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// Configuration for one sampler thread.
pub struct Sampler {
    run_id: RunId,
    probe: Arc<dyn AcceleratorProbe>,
    interval: Duration,
}

impl Sampler {
    pub fn new(run_id: RunId, probe: Arc<dyn AcceleratorProbe>, interval: Duration) -> Self {
        Self {
            run_id,
            probe,
            interval,
        }
    }

    /// Opens a dedicated store connection and starts sampling.
    ///
    /// Returns once the thread is running; it does not wait for a first
    /// sample.
    pub fn spawn<C: StoreConnector>(self, connector: &C) -> Result<SamplerHandle, BenchError> {
        let store = connector.connect()?;
        let process = ProcessMonitor::current()?;
        let (signal, listener) = StopSignal::pair();
        let run_id = self.run_id;

        let thread = thread::Builder::new()
            .name(SAMPLER_THREAD_NAME.to_string())
            .spawn(move || self.sample_loop(store, process, listener))
            .map_err(BenchError::SamplerSpawn)?;

        tracing::info!("device sampler started for run {run_id}");
        Ok(SamplerHandle {
            run_id,
            signal: Some(signal),
            thread: Some(thread),
        })
    }

    fn sample_loop<S: MetricsStore>(
        self,
        mut store: S,
        mut process: ProcessMonitor,
        mut stop: StopListener,
    ) -> Result<u64, SamplerError> {
        let mut samples = 0u64;
        while !stop.is_stopped() {
            let snapshot = DeviceSnapshot::capture(&mut process, self.probe.as_ref())
                .map_err(|source| SamplerError::Probe { samples, source })?;
            let reading = DeviceReading {
                cpu_percent: snapshot.cpu_percent,
                memory_mb: snapshot.memory_mb,
                accelerator_percent: snapshot.accelerator_percent,
                accelerator_memory_mb: snapshot.accelerator_memory_mb,
            };
            store
                .insert_device_sample(self.run_id, &reading)
                .map_err(|source| SamplerError::Store { samples, source })?;
            samples += 1;
            tracing::debug!("sample {samples}: {}", snapshot.summary());

            if stop.wait(self.interval) {
                break;
            }
        }
        Ok(samples)
    }
}

/// Owner of a running sampler thread.
///
/// Dropping the handle stops and joins the thread.
#[derive(Debug)]
pub struct SamplerHandle {
    run_id: RunId,
    signal: Option<StopSignal>,
    thread: Option<JoinHandle<Result<u64, SamplerError>>>,
}

impl SamplerHandle {
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// `true` while the thread has not exited.
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Signals the thread, joins it and reports how it ended.
    pub fn stop(mut self) -> SamplerOutcome {
        self.shutdown()
    }

    fn shutdown(&mut self) -> SamplerOutcome {
        if let Some(signal) = self.signal.take() {
            signal.stop();
        }
        let Some(thread) = self.thread.take() else {
            return SamplerOutcome::NotStarted;
        };
        let outcome = match thread.join() {
            Ok(Ok(samples)) => SamplerOutcome::Completed { samples },
            Ok(Err(err)) => SamplerOutcome::Failed(err),
            Err(payload) => SamplerOutcome::Panicked(panic_message(payload.as_ref())),
        };
        tracing::info!("device sampler for run {} {outcome}", self.run_id);
        outcome
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.shutdown();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
