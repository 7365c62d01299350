//! Per-session capture loop decisions.
//!
//! The scheduler itself never waits on a timer: the session driver feeds it
//! ticks and acquisition completions and forwards whatever request comes out.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use worker_protocol::{Frame, WorkerRequest};

use super::gate::BackpressureGate;
use super::source::{AcquireError, FrameSource};
use super::throttle::FpsThrottle;
use crate::session::SessionCounters;

/// What a single tick decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The session was disabled; stop ticking.
    Stopped,
    /// Less than one frame interval since the last dispatch.
    Throttled,
    /// A `Detect` is still in flight.
    Gated,
    /// An acquisition from an earlier tick has not finished yet.
    AcquisitionPending,
    SourceNotReady,
    AcquisitionStarted,
}

/// Completion of a background acquisition.
#[derive(Debug)]
pub enum Acquired {
    Frame(Frame),
    Failed(AcquireError),
    /// The session was disabled before the frame arrived; it has been dropped.
    Discarded,
}

pub struct CaptureScheduler {
    source: Arc<dyn FrameSource>,
    throttle: FpsThrottle,
    gate: BackpressureGate,
    acquisition: Option<JoinHandle<Acquired>>,
    cancel: CancellationToken,
    counters: Arc<SessionCounters>,
    epoch: Instant,
}

impl CaptureScheduler {
    pub fn new(
        source: Arc<dyn FrameSource>,
        target_fps: f64,
        cancel: CancellationToken,
        counters: Arc<SessionCounters>,
    ) -> Self {
        Self {
            source,
            throttle: FpsThrottle::new(target_fps),
            gate: BackpressureGate::new(),
            acquisition: None,
            cancel,
            counters,
            epoch: Instant::now(),
        }
    }

    pub fn gate(&self) -> &BackpressureGate {
        &self.gate
    }

    pub fn gate_mut(&mut self) -> &mut BackpressureGate {
        &mut self.gate
    }

    pub fn is_acquiring(&self) -> bool {
        self.acquisition.is_some()
    }

    /// Run one capture tick.
    pub fn tick(&mut self, now: Instant) -> TickOutcome {
        if self.cancel.is_cancelled() {
            return TickOutcome::Stopped;
        }
        if self.throttle.should_skip(now) {
            return TickOutcome::Throttled;
        }
        if self.gate.is_pending() {
            return TickOutcome::Gated;
        }
        if self.acquisition.is_some() {
            return TickOutcome::AcquisitionPending;
        }
        if !self.source.is_ready() {
            return TickOutcome::SourceNotReady;
        }

        let source = Arc::clone(&self.source);
        let cancel = self.cancel.clone();
        let counters = Arc::clone(&self.counters);
        self.acquisition = Some(tokio::spawn(async move {
            match source.acquire().await {
                Ok(frame) if cancel.is_cancelled() => {
                    trace!(?frame, "Dropping frame acquired after disable");
                    drop(frame);
                    counters.record_discard();
                    Acquired::Discarded
                }
                Ok(frame) => Acquired::Frame(frame),
                Err(e) => Acquired::Failed(e),
            }
        }));
        TickOutcome::AcquisitionStarted
    }

    /// Wait for the outstanding acquisition. Pending forever if there is none.
    ///
    /// Cancel safe: if the returned future is dropped the acquisition stays
    /// outstanding.
    pub async fn acquired(&mut self) -> Acquired {
        let Some(handle) = self.acquisition.as_mut() else {
            return std::future::pending().await;
        };
        let result = handle.await;
        self.acquisition = None;
        match result {
            Ok(acquired) => acquired,
            Err(e) => Acquired::Failed(AcquireError::Failed(format!(
                "acquisition task failed: {e}"
            ))),
        }
    }

    /// Turn a finished acquisition into a `Detect` request, if it should go out.
    ///
    /// Sets the gate and restarts the throttle interval when it does.
    pub fn on_acquired(&mut self, acquired: Acquired) -> Option<WorkerRequest> {
        match acquired {
            Acquired::Frame(frame) if self.cancel.is_cancelled() => {
                trace!(?frame, "Dropping frame acquired after disable");
                self.counters.record_discard();
                None
            }
            Acquired::Frame(frame) => {
                let now = Instant::now();
                self.gate.set();
                self.throttle.mark_dispatched(now);
                self.counters.record_dispatch();
                let timestamp_ms = now.duration_since(self.epoch).as_millis() as u64;
                Some(WorkerRequest::Detect {
                    frame,
                    timestamp_ms,
                })
            }
            Acquired::Failed(e) => {
                debug!(error = %e, "Frame acquisition failed, retrying next tick");
                self.counters.record_acquisition_failure();
                None
            }
            Acquired::Discarded => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct FakeSource {
        ready: AtomicBool,
        fail: AtomicBool,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                ready: AtomicBool::new(true),
                fail: AtomicBool::new(false),
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl FrameSource for FakeSource {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        async fn acquire(&self) -> Result<Frame, AcquireError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(AcquireError::Failed("decoder error".into()));
            }
            Ok(Frame::solid(2, 2, [0, 0, 0, 255], 0))
        }
    }

    fn scheduler(source: Arc<FakeSource>) -> (CaptureScheduler, CancellationToken) {
        let cancel = CancellationToken::new();
        let scheduler = CaptureScheduler::new(
            source,
            20.0,
            cancel.clone(),
            Arc::new(SessionCounters::default()),
        );
        (scheduler, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_sets_gate_and_blocks_next_tick() {
        let source = FakeSource::new(Duration::ZERO);
        let (mut scheduler, _cancel) = scheduler(source.clone());

        assert_eq!(scheduler.tick(Instant::now()), TickOutcome::AcquisitionStarted);
        let acquired = scheduler.acquired().await;
        let request = scheduler.on_acquired(acquired);
        assert!(matches!(request, Some(WorkerRequest::Detect { .. })));
        assert!(scheduler.gate().is_pending());

        tokio::time::advance(Duration::from_millis(60)).await;
        assert_eq!(scheduler.tick(Instant::now()), TickOutcome::Gated);

        scheduler.gate_mut().release();
        assert_eq!(scheduler.tick(Instant::now()), TickOutcome::AcquisitionStarted);
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_acquisition_not_duplicated() {
        let source = FakeSource::new(Duration::from_millis(100));
        let (mut scheduler, _cancel) = scheduler(source.clone());

        assert_eq!(scheduler.tick(Instant::now()), TickOutcome::AcquisitionStarted);
        tokio::time::advance(Duration::from_millis(16)).await;
        assert_eq!(scheduler.tick(Instant::now()), TickOutcome::AcquisitionPending);
        tokio::time::advance(Duration::from_millis(16)).await;
        assert_eq!(scheduler.tick(Instant::now()), TickOutcome::AcquisitionPending);

        let acquired = scheduler.acquired().await;
        assert!(matches!(acquired, Acquired::Frame(_)));
        assert!(!scheduler.is_acquiring());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_and_readiness() {
        let source = FakeSource::new(Duration::ZERO);
        let (mut scheduler, _cancel) = scheduler(source.clone());

        source.ready.store(false, Ordering::SeqCst);
        assert_eq!(scheduler.tick(Instant::now()), TickOutcome::SourceNotReady);
        source.ready.store(true, Ordering::SeqCst);

        scheduler.tick(Instant::now());
        let acquired = scheduler.acquired().await;
        scheduler.on_acquired(acquired);
        scheduler.gate_mut().release();

        tokio::time::advance(Duration::from_millis(49)).await;
        assert_eq!(scheduler.tick(Instant::now()), TickOutcome::Throttled);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(scheduler.tick(Instant::now()), TickOutcome::AcquisitionStarted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_leaves_gate_clear() {
        let source = FakeSource::new(Duration::ZERO);
        source.fail.store(true, Ordering::SeqCst);
        let (mut scheduler, _cancel) = scheduler(source.clone());

        scheduler.tick(Instant::now());
        let acquired = scheduler.acquired().await;
        assert!(scheduler.on_acquired(acquired).is_none());
        assert!(!scheduler.gate().is_pending());

        // Nothing was dispatched, so the throttle does not hold the retry back.
        source.fail.store(false, Ordering::SeqCst);
        assert_eq!(scheduler.tick(Instant::now()), TickOutcome::AcquisitionStarted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_discarded_after_cancel() {
        let source = FakeSource::new(Duration::from_millis(30));
        let (mut scheduler, cancel) = scheduler(source.clone());

        scheduler.tick(Instant::now());
        cancel.cancel();
        let acquired = scheduler.acquired().await;
        assert!(matches!(acquired, Acquired::Discarded));
        assert!(scheduler.on_acquired(acquired).is_none());
        assert!(!scheduler.gate().is_pending());
        assert_eq!(scheduler.tick(Instant::now()), TickOutcome::Stopped);
        assert_eq!(scheduler.counters.snapshot().frames_discarded, 1);
    }
}
