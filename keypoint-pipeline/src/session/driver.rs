//! One task per session: spawn the worker, run the capture loop, tear down.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use super::registry::SessionReporter;
use super::{SessionEvent, SessionId};
use crate::capture::{Acquired, CaptureScheduler, TickOutcome};
use crate::router::{ResultRouter, RouteOutcome};
use crate::worker::{SpawnedWorker, Teardown, WorkerEvent, WorkerFault, WorkerSupervisor};

enum Step {
    Cancelled,
    Event(Option<WorkerEvent>),
    Acquired(Acquired),
    Tick(Instant),
}

pub(crate) struct SessionDriver {
    pub(crate) id: SessionId,
    pub(crate) reporter: SessionReporter,
    pub(crate) supervisor: Arc<WorkerSupervisor>,
    pub(crate) scheduler: CaptureScheduler,
    pub(crate) router: ResultRouter,
    pub(crate) cancel: CancellationToken,
    pub(crate) tick_interval: Duration,
}

impl SessionDriver {
    /// Drive the session until it is disabled or its worker faults, then
    /// tear the worker down.
    pub(crate) async fn run(mut self) -> Option<Teardown> {
        let mut worker = None;
        if let Some(fault) = self.drive(&mut worker).await {
            error!(
                session_id = %self.id,
                generation = self.reporter.generation(),
                error = %fault,
                "Session faulted"
            );
            self.reporter.apply(SessionEvent::WorkerFault);
        }
        self.supervisor.teardown(&mut worker)
    }

    /// Returns the fault that ended the session, or `None` if it was
    /// cancelled.
    async fn drive(&mut self, slot: &mut Option<SpawnedWorker>) -> Option<WorkerFault> {
        let worker = match self.supervisor.spawn(&self.id).await {
            Ok(worker) => slot.insert(worker),
            Err(fault) => return Some(fault),
        };

        let ready = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            ready = self.supervisor.await_ready(worker) => ready,
        };
        if let Err(fault) = ready {
            return Some(fault);
        }
        if !self.reporter.apply(SessionEvent::WorkerReady) {
            debug!(session_id = %self.id, "Session no longer current, dropping Ready");
            return None;
        }
        info!(session_id = %self.id, generation = self.reporter.generation(), "Session running");

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let step = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Step::Cancelled,
                event = worker.next_event() => Step::Event(event),
                acquired = self.scheduler.acquired() => Step::Acquired(acquired),
                now = ticker.tick() => Step::Tick(now),
            };

            match step {
                Step::Cancelled => return None,
                Step::Event(Some(WorkerEvent::Response(response))) => {
                    match self.router.route(response, self.scheduler.gate_mut()) {
                        RouteOutcome::Fault(message) => return Some(WorkerFault::Runtime(message)),
                        outcome => trace!(session_id = %self.id, ?outcome, "Response routed"),
                    }
                }
                Step::Event(Some(WorkerEvent::Exited { status })) => {
                    return Some(WorkerFault::UnexpectedTermination(status));
                }
                Step::Event(None) => return Some(WorkerFault::ChannelClosed),
                Step::Acquired(acquired) => {
                    if let Some(request) = self.scheduler.on_acquired(acquired) {
                        trace!(session_id = %self.id, "Dispatching frame");
                        if let Err(fault) = worker.send(request).await {
                            return Some(fault);
                        }
                    }
                }
                Step::Tick(now) => match self.scheduler.tick(now) {
                    TickOutcome::Stopped => return None,
                    outcome => trace!(session_id = %self.id, ?outcome, "Tick"),
                },
            }
        }
    }
}
