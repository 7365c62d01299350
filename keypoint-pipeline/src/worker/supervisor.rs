//! Worker lifecycle: spawn, handshake, teardown with forced termination.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use worker_protocol::{InitOptions, WorkerRequest, WorkerResponse};

use super::handle::{ReleaseReason, WorkerHandle};
use super::transport::{WorkerEvent, WorkerLauncher};
use crate::config::PipelineConfig;
use crate::session::SessionId;

/// Why a worker stopped being usable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkerFault {
    #[error("failed to launch worker: {0}")]
    Launch(String),
    #[error("worker failed to initialize: {0}")]
    InitializationFailure(String),
    #[error("worker did not become ready within {0:?}")]
    InitTimeout(Duration),
    #[error("worker reported an error: {0}")]
    Runtime(String),
    #[error("worker terminated unexpectedly ({0})")]
    UnexpectedTermination(String),
    #[error("worker channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Time a worker gets to exit after `Stop` before it is killed.
    pub grace_period: Duration,
    /// Bound on the `Init` handshake. `None` waits forever.
    pub init_timeout: Option<Duration>,
    pub init: InitOptions,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for SupervisorConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            grace_period: config.grace_period(),
            init_timeout: config.init_timeout(),
            init: config.init_options(),
        }
    }
}

/// A launched worker owned by one session.
pub struct SpawnedWorker {
    session_id: SessionId,
    requests: mpsc::Sender<WorkerRequest>,
    events: mpsc::Receiver<WorkerEvent>,
    handle: WorkerHandle,
    exited: Option<String>,
}

impl SpawnedWorker {
    pub fn handle(&self) -> &WorkerHandle {
        &self.handle
    }

    /// Queue a request for the worker.
    pub async fn send(&self, request: WorkerRequest) -> Result<(), WorkerFault> {
        self.requests
            .send(request)
            .await
            .map_err(|_| WorkerFault::ChannelClosed)
    }

    /// Next event from the worker. Cancel safe.
    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        let event = self.events.recv().await;
        if let Some(WorkerEvent::Exited { status }) = &event {
            self.exited = Some(status.clone());
        }
        event
    }
}

impl std::fmt::Debug for SpawnedWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedWorker")
            .field("session_id", &self.session_id)
            .field("exited", &self.exited)
            .finish()
    }
}

enum ReleaseWait {
    Done(ReleaseReason),
    Pending(JoinHandle<ReleaseReason>),
}

/// An in-progress teardown.
pub struct Teardown {
    stop_delivered: bool,
    release: ReleaseWait,
}

impl Teardown {
    /// `Stop` made it into the worker's queue.
    pub fn stop_delivered(&self) -> bool {
        self.stop_delivered
    }

    /// Wait until the worker has been released.
    pub async fn wait(self) -> ReleaseReason {
        match self.release {
            ReleaseWait::Done(reason) => reason,
            ReleaseWait::Pending(task) => task.await.unwrap_or(ReleaseReason::Forced),
        }
    }
}

/// Owns worker lifecycles for all sessions.
pub struct WorkerSupervisor {
    launcher: Arc<dyn WorkerLauncher>,
    config: SupervisorConfig,
}

impl WorkerSupervisor {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, config: SupervisorConfig) -> Self {
        Self { launcher, config }
    }

    /// Launch a worker for `session_id` and send it `Init`.
    pub async fn spawn(&self, session_id: &SessionId) -> Result<SpawnedWorker, WorkerFault> {
        let link = self
            .launcher
            .launch(session_id)
            .await
            .map_err(|e| WorkerFault::Launch(e.to_string()))?;

        let worker = SpawnedWorker {
            session_id: session_id.clone(),
            requests: link.requests,
            events: link.events,
            handle: WorkerHandle::new(session_id.clone(), link.control),
            exited: None,
        };

        debug!(session_id = %session_id, task = %self.config.init.task, "Sending Init");
        worker
            .send(WorkerRequest::Init(self.config.init.clone()))
            .await?;
        Ok(worker)
    }

    /// Wait for the worker's answer to `Init`.
    pub async fn await_ready(&self, worker: &mut SpawnedWorker) -> Result<(), WorkerFault> {
        let handshake = async {
            loop {
                match worker.next_event().await {
                    Some(WorkerEvent::Response(WorkerResponse::Ready)) => return Ok(()),
                    Some(WorkerEvent::Response(WorkerResponse::Error { message })) => {
                        return Err(WorkerFault::InitializationFailure(message));
                    }
                    Some(WorkerEvent::Response(other)) => {
                        debug!(kind = other.kind(), "Ignoring message before Ready");
                    }
                    Some(WorkerEvent::Exited { status }) => {
                        return Err(WorkerFault::UnexpectedTermination(status));
                    }
                    None => return Err(WorkerFault::ChannelClosed),
                }
            }
        };

        match self.config.init_timeout {
            Some(limit) => tokio::time::timeout(limit, handshake)
                .await
                .map_err(|_| WorkerFault::InitTimeout(limit))?,
            None => handshake.await,
        }
    }

    /// Stop the worker in `slot`, if any.
    ///
    /// `Stop` is sent best-effort. The worker is released when it exits or
    /// when the grace period runs out, whichever happens first; in the
    /// latter case it is killed. Calling this again on the emptied slot
    /// does nothing.
    pub fn teardown(&self, slot: &mut Option<SpawnedWorker>) -> Option<Teardown> {
        let SpawnedWorker {
            session_id,
            requests,
            mut events,
            handle,
            exited,
        } = slot.take()?;

        let stop_delivered = match requests.try_send(WorkerRequest::Stop) {
            Ok(()) => true,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "Stop not delivered");
                false
            }
        };
        drop(requests);

        if let Some(status) = exited {
            debug!(session_id = %session_id, status = %status, "Worker already exited");
            handle.release(ReleaseReason::Graceful);
            return Some(Teardown {
                stop_delivered,
                release: ReleaseWait::Done(ReleaseReason::Graceful),
            });
        }

        let deadline = Instant::now() + self.config.grace_period;
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(WorkerEvent::Response(response)) => {
                            debug!(
                                session_id = %session_id,
                                kind = response.kind(),
                                "Discarding message from stopping worker"
                            );
                        }
                        Some(WorkerEvent::Exited { status }) => {
                            info!(session_id = %session_id, status = %status, "Worker stopped");
                            handle.release(ReleaseReason::Graceful);
                            return ReleaseReason::Graceful;
                        }
                        None => {
                            handle.release(ReleaseReason::Graceful);
                            return ReleaseReason::Graceful;
                        }
                    },
                    _ = tokio::time::sleep_until(deadline) => {
                        warn!(session_id = %session_id, "Worker did not stop in time, terminating");
                        handle.release(ReleaseReason::Forced);
                        return ReleaseReason::Forced;
                    }
                }
            }
        });

        Some(Teardown {
            stop_delivered,
            release: ReleaseWait::Pending(task),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::worker::transport::{TokenControl, WorkerLink};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;

    /// Hands out links whose worker side the test drives by hand.
    #[derive(Default)]
    struct ManualLauncher {
        sides: Mutex<Vec<WorkerSide>>,
        fail: bool,
    }

    struct WorkerSide {
        requests: mpsc::Receiver<WorkerRequest>,
        events: mpsc::Sender<WorkerEvent>,
        kill: CancellationToken,
    }

    #[async_trait]
    impl WorkerLauncher for ManualLauncher {
        async fn launch(&self, _session_id: &SessionId) -> Result<WorkerLink> {
            if self.fail {
                return Err(Error::worker_launch("no such binary"));
            }
            let (req_tx, req_rx) = mpsc::channel(8);
            let (evt_tx, evt_rx) = mpsc::channel(8);
            let kill = CancellationToken::new();
            self.sides.lock().push(WorkerSide {
                requests: req_rx,
                events: evt_tx,
                kill: kill.clone(),
            });
            Ok(WorkerLink {
                requests: req_tx,
                events: evt_rx,
                control: Box::new(TokenControl::new(kill)),
            })
        }
    }

    fn supervisor(launcher: Arc<ManualLauncher>, init_timeout: Option<Duration>) -> WorkerSupervisor {
        WorkerSupervisor::new(
            launcher,
            SupervisorConfig {
                grace_period: Duration::from_millis(500),
                init_timeout,
                init: InitOptions::default(),
            },
        )
    }

    fn take_side(launcher: &ManualLauncher) -> WorkerSide {
        launcher.sides.lock().pop().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_sends_init_and_waits_for_ready() {
        let launcher = Arc::new(ManualLauncher::default());
        let supervisor = supervisor(launcher.clone(), None);
        let id = SessionId::from("a");

        let mut worker = supervisor.spawn(&id).await.unwrap();
        let mut side = take_side(&launcher);
        assert!(matches!(
            side.requests.recv().await,
            Some(WorkerRequest::Init(_))
        ));

        side.events
            .send(WorkerEvent::Response(WorkerResponse::Ready))
            .await
            .unwrap();
        assert_eq!(supervisor.await_ready(&mut worker).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_error_and_timeout() {
        let launcher = Arc::new(ManualLauncher::default());
        let supervisor = supervisor(launcher.clone(), Some(Duration::from_secs(2)));
        let id = SessionId::from("a");

        let mut worker = supervisor.spawn(&id).await.unwrap();
        let side = take_side(&launcher);
        side.events
            .send(WorkerEvent::Response(WorkerResponse::Error {
                message: "model missing".into(),
            }))
            .await
            .unwrap();
        assert_eq!(
            supervisor.await_ready(&mut worker).await,
            Err(WorkerFault::InitializationFailure("model missing".into()))
        );

        let mut silent = supervisor.spawn(&id).await.unwrap();
        let _side = take_side(&launcher);
        let started = Instant::now();
        assert_eq!(
            supervisor.await_ready(&mut silent).await,
            Err(WorkerFault::InitTimeout(Duration::from_secs(2)))
        );
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_failure() {
        let launcher = Arc::new(ManualLauncher {
            fail: true,
            ..Default::default()
        });
        let supervisor = supervisor(launcher, None);
        let err = supervisor.spawn(&SessionId::from("a")).await.unwrap_err();
        assert!(matches!(err, WorkerFault::Launch(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_forces_after_grace_once() {
        let launcher = Arc::new(ManualLauncher::default());
        let supervisor = supervisor(launcher.clone(), None);
        let mut slot = Some(supervisor.spawn(&SessionId::from("a")).await.unwrap());
        let mut side = take_side(&launcher);
        let handle = slot.as_ref().unwrap().handle().clone();

        let started = Instant::now();
        let teardown = supervisor.teardown(&mut slot).unwrap();
        assert!(teardown.stop_delivered());
        assert!(supervisor.teardown(&mut slot).is_none());

        // Init then Stop, in order.
        assert!(matches!(side.requests.recv().await, Some(WorkerRequest::Init(_))));
        assert!(matches!(side.requests.recv().await, Some(WorkerRequest::Stop)));

        assert_eq!(teardown.wait().await, ReleaseReason::Forced);
        assert_eq!(started.elapsed(), Duration::from_millis(500));
        assert!(side.kill.is_cancelled());
        assert_eq!(handle.release_count(), 1);
        assert!(!handle.release(ReleaseReason::Forced));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_graceful_on_exit() {
        let launcher = Arc::new(ManualLauncher::default());
        let supervisor = supervisor(launcher.clone(), None);
        let mut slot = Some(supervisor.spawn(&SessionId::from("a")).await.unwrap());
        let side = take_side(&launcher);
        let handle = slot.as_ref().unwrap().handle().clone();

        let teardown = supervisor.teardown(&mut slot).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        side.events
            .send(WorkerEvent::Exited {
                status: "exit code 0".into(),
            })
            .await
            .unwrap();

        assert_eq!(teardown.wait().await, ReleaseReason::Graceful);
        assert!(!side.kill.is_cancelled());
        assert_eq!(handle.release_count(), 1);
    }
}
