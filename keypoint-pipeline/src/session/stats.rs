//! Per-session counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters, updated by the session's driver.
#[derive(Debug, Default)]
pub struct SessionCounters {
    frames_dispatched: AtomicU64,
    results_received: AtomicU64,
    frames_discarded: AtomicU64,
    acquisition_failures: AtomicU64,
    sink_drops: AtomicU64,
}

impl SessionCounters {
    pub fn record_dispatch(&self) {
        self.frames_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result(&self) {
        self.results_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discard(&self) {
        self.frames_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_acquisition_failure(&self) {
        self.acquisition_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_drop(&self) {
        self.sink_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_dispatched: self.frames_dispatched.load(Ordering::Relaxed),
            results_received: self.results_received.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
            acquisition_failures: self.acquisition_failures.load(Ordering::Relaxed),
            sink_drops: self.sink_drops.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SessionCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// `Detect` requests sent to the worker.
    pub frames_dispatched: u64,
    /// `Result` responses routed.
    pub results_received: u64,
    /// Frames acquired after the session was disabled.
    pub frames_discarded: u64,
    pub acquisition_failures: u64,
    /// Sink messages dropped because the sink was closed or full.
    pub sink_drops: u64,
}
