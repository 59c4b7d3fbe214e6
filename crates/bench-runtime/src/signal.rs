// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! One-shot stop signal between the orchestrator and the sampler thread.
//!
//! The listener's timed wait is both the sampling period and the
//! cancellation point, so a stop is observed without waiting out the
//! remainder of an interval. Dropping the [`StopSignal`] without calling
//! [`StopSignal::stop`] also stops the listener.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::Duration;

/// Sending half; consumed by [`stop`](Self::stop).
#[derive(Debug)]
pub struct StopSignal {
    tx: SyncSender<()>,
}

/// Receiving half, owned by the sampler thread.
#[derive(Debug)]
pub struct StopListener {
    rx: Receiver<()>,
    stopped: bool,
}

impl StopSignal {
    /// Creates a connected signal/listener pair.
    pub fn pair() -> (StopSignal, StopListener) {
        let (tx, rx) = mpsc::sync_channel(1);
        (StopSignal { tx }, StopListener { rx, stopped: false })
    }

    /// Signals the listener. Never blocks.
    pub fn stop(self) {
        // Listener may already have exited.
        let _ = self.tx.try_send(());
    }
}

impl StopListener {
    /// Returns `true` once a stop was sent or the signal was dropped.
    pub fn is_stopped(&mut self) -> bool {
        if !self.stopped {
            self.stopped = match self.rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => true,
                Err(TryRecvError::Empty) => false,
            };
        }
        self.stopped
    }

    /// Waits up to `timeout` for a stop; returns `true` if stopped.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        if !self.stopped {
            self.stopped = match self.rx.recv_timeout(timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                Err(RecvTimeoutError::Timeout) => false,
            };
        }
        self.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_wait_times_out() {
        let (_signal, mut listener) = StopSignal::pair();
        let start = Instant::now();
        assert!(!listener.wait(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(!listener.is_stopped());
    }

    #[test]
    fn test_stop_is_latched() {
        let (signal, mut listener) = StopSignal::pair();
        signal.stop();
        assert!(listener.is_stopped());
        assert!(listener.wait(Duration::from_secs(5)));
        assert!(listener.is_stopped());
    }

    #[test]
    fn test_drop_stops() {
        let (signal, mut listener) = StopSignal::pair();
        drop(signal);
        assert!(listener.wait(Duration::from_secs(5)));
    }

    #[test]
    fn test_stop_wakes_waiter_early() {
        let (signal, mut listener) = StopSignal::pair();
        let waiter = thread::spawn(move || {
            let start = Instant::now();
            let stopped = listener.wait(Duration::from_secs(30));
            (stopped, start.elapsed())
        });
        thread::sleep(Duration::from_millis(10));
        signal.stop();
        let (stopped, elapsed) = waiter.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(5));
    }
}
