use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::transport::WorkerControl;
use crate::session::SessionId;

/// How a worker's execution context was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// The worker exited on its own after `Stop` (or before it).
    Graceful,
    /// The grace period ran out and the worker was killed.
    Forced,
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Graceful => "graceful",
            Self::Forced => "forced",
        }
    }
}

struct Inner {
    session_id: SessionId,
    control: Mutex<Option<Box<dyn WorkerControl>>>,
    releases: AtomicUsize,
}

/// Exclusive ownership of one worker's execution context.
///
/// Clones refer to the same worker; whichever clone calls
/// [`release`](Self::release) first does the work, every later call is a
/// no-op.
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<Inner>,
}

impl WorkerHandle {
    pub fn new(session_id: SessionId, control: Box<dyn WorkerControl>) -> Self {
        Self {
            inner: Arc::new(Inner {
                session_id,
                control: Mutex::new(Some(control)),
                releases: AtomicUsize::new(0),
            }),
        }
    }

    /// Release the worker. Returns `false` if it was already released.
    pub fn release(&self, reason: ReleaseReason) -> bool {
        let Some(control) = self.inner.control.lock().take() else {
            debug!(
                session_id = %self.inner.session_id,
                reason = reason.as_str(),
                "Worker already released"
            );
            return false;
        };

        if reason == ReleaseReason::Forced {
            control.terminate();
        }
        self.inner.releases.fetch_add(1, Ordering::SeqCst);
        info!(
            session_id = %self.inner.session_id,
            reason = reason.as_str(),
            "Worker released"
        );
        true
    }

    pub fn is_released(&self) -> bool {
        self.inner.control.lock().is_none()
    }

    /// Times the release actually ran. Never more than one.
    pub fn release_count(&self) -> usize {
        self.inner.releases.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("session_id", &self.inner.session_id)
            .field("released", &self.is_released())
            .finish()
    }
}
