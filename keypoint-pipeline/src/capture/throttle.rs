//! Dispatch rate limiting.

use std::time::Duration;

use tokio::time::Instant;

/// Enforces a minimum spacing between dispatched frames.
#[derive(Debug, Clone)]
pub struct FpsThrottle {
    min_interval: Duration,
    last_dispatch: Option<Instant>,
}

impl FpsThrottle {
    /// `target_fps` must be positive; the config layer validates it.
    pub fn new(target_fps: f64) -> Self {
        let nanos = (1_000_000_000.0 / target_fps).round() as u64;
        Self {
            min_interval: Duration::from_nanos(nanos),
            last_dispatch: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Too soon since the last dispatch.
    pub fn should_skip(&self, now: Instant) -> bool {
        match self.last_dispatch {
            Some(last) => now.saturating_duration_since(last) < self.min_interval,
            None => false,
        }
    }

    pub fn mark_dispatched(&mut self, now: Instant) {
        self.last_dispatch = Some(now);
    }
}
