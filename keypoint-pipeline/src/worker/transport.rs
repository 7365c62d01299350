//! Message transport between a session and its isolated worker.
//!
//! Every worker, whether a child process or an in-process task, is reached
//! through the same [`WorkerLink`]: a request channel in, an event channel
//! out, and a control to kill it.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use process_utils::{describe_exit, piped_worker_command};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use worker_protocol::{HostCodec, WorkerRequest, WorkerResponse};

use super::detector::Detector;
use super::runtime::serve;
use crate::config::WorkerCommandConfig;
use crate::error::{Error, Result};
use crate::session::SessionId;

/// Requests are single-in-flight plus control messages.
const REQUEST_CAPACITY: usize = 8;
const EVENT_CAPACITY: usize = 16;

/// Something the worker side produced.
#[derive(Debug)]
pub enum WorkerEvent {
    Response(WorkerResponse),
    /// The worker is gone. Always the last event on a link.
    Exited { status: String },
}

/// Kill switch for a running worker.
pub trait WorkerControl: Send + Sync + 'static {
    /// Forcibly stop the worker. Must be safe to call after it exited.
    fn terminate(&self);
}

/// Channels to one running worker.
pub struct WorkerLink {
    pub requests: mpsc::Sender<WorkerRequest>,
    pub events: mpsc::Receiver<WorkerEvent>,
    pub control: Box<dyn WorkerControl>,
}

/// Creates isolated workers.
#[async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
    async fn launch(&self, session_id: &SessionId) -> Result<WorkerLink>;
}

/// [`WorkerControl`] that cancels a token watched by the link's exit task.
#[derive(Debug, Clone)]
pub struct TokenControl {
    token: CancellationToken,
}

impl TokenControl {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl WorkerControl for TokenControl {
    fn terminate(&self) {
        self.token.cancel();
    }
}

/// Wire a framed byte stream pair to a [`WorkerLink`].
///
/// `exit` resolves with a description of how the worker ended; it must watch
/// `kill` and stop the worker when it fires. Responses read before the exit
/// is observed are delivered before [`WorkerEvent::Exited`].
pub fn spawn_link<R, W, F>(
    session_id: SessionId,
    reader: R,
    writer: W,
    kill: CancellationToken,
    exit: F,
) -> WorkerLink
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    F: Future<Output = String> + Send + 'static,
{
    let (req_tx, mut req_rx) = mpsc::channel::<WorkerRequest>(REQUEST_CAPACITY);
    let (evt_tx, evt_rx) = mpsc::channel(EVENT_CAPACITY);

    let writer_id = session_id.clone();
    tokio::spawn(async move {
        let mut framed = FramedWrite::new(writer, HostCodec::default());
        while let Some(request) = req_rx.recv().await {
            let kind = request.kind();
            if let Err(e) = framed.send(request).await {
                debug!(session_id = %writer_id, kind, error = %e, "Worker pipe closed");
                break;
            }
        }
        // Dropping the writer closes the worker's input.
    });

    let reader_id = session_id.clone();
    let reader_tx = evt_tx.clone();
    let reader = tokio::spawn(async move {
        let mut framed = FramedRead::new(reader, HostCodec::default());
        while let Some(frame) = framed.next().await {
            match frame {
                Ok(response) => {
                    if reader_tx.send(WorkerEvent::Response(response)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(session_id = %reader_id, error = %e, "Undecodable worker output");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        let status = exit.await;
        let _ = reader.await;
        debug!(session_id = %session_id, status = %status, "Worker exited");
        let _ = evt_tx.send(WorkerEvent::Exited { status }).await;
    });

    WorkerLink {
        requests: req_tx,
        events: evt_rx,
        control: Box::new(TokenControl::new(kill)),
    }
}

/// Runs each worker as a child process speaking the protocol on stdio.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: WorkerCommandConfig,
}

impl ProcessLauncher {
    pub fn new(command: WorkerCommandConfig) -> Self {
        Self { command }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn launch(&self, session_id: &SessionId) -> Result<WorkerLink> {
        let mut child = piped_worker_command(&self.command.program, &self.command.args)
            .spawn()
            .map_err(|e| Error::worker_launch(format!("{}: {e}", self.command.program)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::worker_launch("worker stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::worker_launch("worker stdout not captured"))?;

        info!(
            session_id = %session_id,
            program = %self.command.program,
            pid = child.id(),
            "Worker process started"
        );

        let kill = CancellationToken::new();
        let watch = kill.clone();
        let exit = async move {
            tokio::select! {
                _ = watch.cancelled() => {
                    if let Err(e) = child.kill().await {
                        error!(error = %e, "Failed to kill worker process");
                    }
                    match child.try_wait() {
                        Ok(Some(status)) => describe_exit(&status),
                        _ => "terminated".to_string(),
                    }
                }
                status = child.wait() => match status {
                    Ok(status) => describe_exit(&status),
                    Err(e) => format!("wait failed: {e}"),
                },
            }
        };

        Ok(spawn_link(session_id.clone(), stdout, stdin, kill, exit))
    }
}

/// Runs each worker as a task on this runtime, connected by an in-memory
/// pipe. It shares nothing with the session except the byte stream.
pub struct InProcessLauncher<F> {
    factory: Arc<F>,
    buffer_size: usize,
}

impl<F, D> InProcessLauncher<F>
where
    F: Fn() -> D + Send + Sync + 'static,
    D: Detector,
{
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            buffer_size: 256 * 1024,
        }
    }
}

#[async_trait]
impl<F, D> WorkerLauncher for InProcessLauncher<F>
where
    F: Fn() -> D + Send + Sync + 'static,
    D: Detector,
{
    async fn launch(&self, session_id: &SessionId) -> Result<WorkerLink> {
        let (host_io, worker_io) = tokio::io::duplex(self.buffer_size);
        let (host_read, host_write) = tokio::io::split(host_io);
        let (worker_read, worker_write) = tokio::io::split(worker_io);

        let detector = (self.factory)();
        let mut task = tokio::spawn(serve(detector, worker_read, worker_write));
        debug!(session_id = %session_id, "In-process worker started");

        let kill = CancellationToken::new();
        let watch = kill.clone();
        let exit = async move {
            tokio::select! {
                _ = watch.cancelled() => {
                    task.abort();
                    "terminated".to_string()
                }
                joined = &mut task => match joined {
                    Ok(Ok(())) => "exit code 0".to_string(),
                    Ok(Err(e)) => format!("failed: {e}"),
                    Err(e) => format!("crashed: {e}"),
                },
            }
        };

        Ok(spawn_link(session_id.clone(), host_read, host_write, kill, exit))
    }
}
