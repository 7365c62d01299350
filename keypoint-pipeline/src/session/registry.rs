//! The canonical per-session records and the public pipeline API.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::driver::SessionDriver;
use super::{SessionCounters, SessionEvent, SessionId, SessionState, SessionStats};
use crate::capture::{CaptureScheduler, FrameSource};
use crate::config::PipelineConfig;
use crate::error::Result;
use crate::router::{KeypointEvent, RenderTarget, ResultRouter, ResultSink};
use crate::worker::{ReleaseReason, SupervisorConfig, Teardown, WorkerLauncher, WorkerSupervisor};

/// Everything one session owns. All fields travel together.
struct SessionRecord {
    state: SessionState,
    generation: u64,
    cancel: CancellationToken,
    driver: Option<JoinHandle<Option<Teardown>>>,
    counters: Arc<SessionCounters>,
}

/// Collaborators a session is bound to.
pub struct SessionBinding {
    pub source: Arc<dyn FrameSource>,
    pub sink: Option<Arc<dyn ResultSink>>,
    pub target: Option<Arc<dyn RenderTarget>>,
    /// Overrides the configured rate for this session.
    pub target_fps: Option<f64>,
}

impl SessionBinding {
    pub fn new(source: Arc<dyn FrameSource>) -> Self {
        Self {
            source,
            sink: None,
            target: None,
            target_fps: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_target(mut self, target: Arc<dyn RenderTarget>) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_target_fps(mut self, fps: f64) -> Self {
        self.target_fps = Some(fps);
        self
    }
}

/// Outcome of [`SessionRegistry::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub total_sessions: usize,
    pub graceful_stops: usize,
    pub forced_terminations: usize,
    /// Sessions whose worker could not be sent `Stop`.
    pub stop_message_failures: usize,
}

impl ShutdownReport {
    pub fn all_graceful(&self) -> bool {
        self.forced_terminations == 0 && self.stop_message_failures == 0
    }
}

/// Writes state on behalf of one driver, for one generation only.
#[derive(Clone)]
pub(crate) struct SessionReporter {
    sessions: Arc<DashMap<SessionId, SessionRecord>>,
    id: SessionId,
    generation: u64,
}

impl SessionReporter {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Apply `event` if the record still belongs to this generation.
    pub(crate) fn apply(&self, event: SessionEvent) -> bool {
        let Some(mut record) = self.sessions.get_mut(&self.id) else {
            debug!(session_id = %self.id, ?event, "Session gone, ignoring stale event");
            return false;
        };
        if record.generation != self.generation {
            debug!(
                session_id = %self.id,
                ?event,
                stale = self.generation,
                current = record.generation,
                "Ignoring event from previous generation"
            );
            return false;
        }

        match record.state.apply(event) {
            Ok(next) => {
                info!(
                    session_id = %self.id,
                    from = %record.state,
                    to = %next,
                    "Session state changed"
                );
                record.state = next;
                true
            }
            Err(e) => {
                warn!(session_id = %self.id, ?event, error = %e, "Rejected session event");
                false
            }
        }
    }
}

struct DriverDefaults {
    target_fps: f64,
    tick_interval: Duration,
    background: [u8; 4],
}

/// Entry point for enabling, disabling and inspecting sessions.
///
/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, SessionRecord>>,
    generation: Arc<AtomicU64>,
    supervisor: Arc<WorkerSupervisor>,
    listeners: broadcast::Sender<KeypointEvent>,
    defaults: Arc<DriverDefaults>,
}

impl SessionRegistry {
    /// Fails if `config` does not validate.
    pub fn new(config: &PipelineConfig, launcher: Arc<dyn WorkerLauncher>) -> Result<Self> {
        config.validate()?;
        let (listeners, _) = broadcast::channel(config.listener_capacity);
        Ok(Self {
            sessions: Arc::new(DashMap::new()),
            generation: Arc::new(AtomicU64::new(0)),
            supervisor: Arc::new(WorkerSupervisor::new(
                launcher,
                SupervisorConfig::from(config),
            )),
            listeners,
            defaults: Arc::new(DriverDefaults {
                target_fps: config.target_fps,
                tick_interval: config.tick_interval(),
                background: config.background,
            }),
        })
    }

    /// Start a pipeline for `id`.
    ///
    /// No-op if the session already exists (loading, running or failed), if
    /// `source` is not ready, or if the binding's rate override is not a
    /// positive number.
    pub fn enable(
        &self,
        id: &SessionId,
        source: Arc<dyn FrameSource>,
        sink: Option<Arc<dyn ResultSink>>,
    ) {
        let mut binding = SessionBinding::new(source);
        binding.sink = sink;
        self.enable_with(id, binding);
    }

    pub fn enable_with(&self, id: &SessionId, binding: SessionBinding) {
        if !binding.source.is_ready() {
            debug!(session_id = %id, "Frame source not ready, ignoring enable");
            return;
        }
        if let Some(fps) = binding.target_fps.filter(|fps| !(fps.is_finite() && *fps > 0.0)) {
            warn!(session_id = %id, fps, "Invalid target fps, ignoring enable");
            return;
        }

        let entry = match self.sessions.entry(id.clone()) {
            Entry::Occupied(entry) => {
                let state = entry.get().state;
                debug!(
                    session_id = %id,
                    %state,
                    active = state.is_active(),
                    "Session already enabled"
                );
                return;
            }
            Entry::Vacant(entry) => entry,
        };

        let state = match SessionState::Idle.apply(SessionEvent::Enable) {
            Ok(state) => state,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Cannot enable session");
                return;
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let counters = Arc::new(SessionCounters::default());

        let driver = SessionDriver {
            id: id.clone(),
            reporter: SessionReporter {
                sessions: Arc::clone(&self.sessions),
                id: id.clone(),
                generation,
            },
            supervisor: Arc::clone(&self.supervisor),
            scheduler: CaptureScheduler::new(
                binding.source,
                binding.target_fps.unwrap_or(self.defaults.target_fps),
                cancel.clone(),
                Arc::clone(&counters),
            ),
            router: ResultRouter::new(
                id.clone(),
                binding.target,
                binding.sink,
                self.listeners.clone(),
                self.defaults.background,
                Arc::clone(&counters),
            ),
            cancel: cancel.clone(),
            tick_interval: self.defaults.tick_interval,
        };

        entry.insert(SessionRecord {
            state,
            generation,
            cancel,
            driver: Some(tokio::spawn(driver.run())),
            counters,
        });
        info!(session_id = %id, generation, "Session enabled");
    }

    /// Stop the pipeline for `id`. The session reads as IDLE as soon as
    /// this is called; the worker gets its grace period in the background.
    pub async fn disable(&self, id: &SessionId) {
        self.stop_session(id).await;
    }

    async fn stop_session(&self, id: &SessionId) -> Option<Teardown> {
        let Some((_, record)) = self.sessions.remove(id) else {
            debug!(session_id = %id, "Session not enabled, nothing to disable");
            return None;
        };

        info!(
            session_id = %id,
            from = %record.state,
            generation = record.generation,
            "Disabling session"
        );
        record.cancel.cancel();

        match record.driver?.await {
            Ok(teardown) => teardown,
            Err(e) => {
                warn!(session_id = %id, error = %e, "Session driver ended abnormally");
                None
            }
        }
    }

    /// IDLE for unknown sessions.
    pub fn state(&self, id: &SessionId) -> SessionState {
        self.sessions
            .get(id)
            .map(|record| record.state)
            .unwrap_or_default()
    }

    pub fn stats(&self, id: &SessionId) -> Option<SessionStats> {
        self.sessions
            .get(id)
            .map(|record| record.counters.snapshot())
    }

    /// Current generation of `id`, if it is enabled.
    pub fn generation(&self, id: &SessionId) -> Option<u64> {
        self.sessions.get(id).map(|record| record.generation)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Raw keypoints from every session. Lagging receivers lose events.
    pub fn subscribe(&self) -> broadcast::Receiver<KeypointEvent> {
        self.listeners.subscribe()
    }

    /// Disable every session and wait for all workers to be released.
    pub async fn shutdown(&self) -> ShutdownReport {
        let ids = self.session_ids();
        info!(sessions = ids.len(), "Shutting down all sessions");

        let mut report = ShutdownReport {
            total_sessions: ids.len(),
            ..Default::default()
        };

        let teardowns = join_all(ids.iter().map(|id| self.stop_session(id))).await;
        let mut pending = Vec::new();
        for teardown in teardowns.into_iter().flatten() {
            if !teardown.stop_delivered() {
                report.stop_message_failures += 1;
            }
            pending.push(teardown.wait());
        }

        for reason in join_all(pending).await {
            match reason {
                ReleaseReason::Graceful => report.graceful_stops += 1,
                ReleaseReason::Forced => report.forced_terminations += 1,
            }
        }

        info!(
            graceful = report.graceful_stops,
            forced = report.forced_terminations,
            "Shutdown complete"
        );
        report
    }
}
