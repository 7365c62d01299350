//! Routing of worker responses: gate release, rendering, forwarding.

pub mod render;
pub mod sink;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use worker_protocol::{DetectionResponse, Keypoint, WorkerResponse};

use crate::capture::BackpressureGate;
use crate::session::{SessionCounters, SessionId};

pub use render::{Canvas, LetterboxRect, RenderTarget, compose_letterboxed, letterbox};
pub use sink::{ChannelSink, ResultSink, SinkMessage};

/// Raw keypoints published to local listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct KeypointEvent {
    pub session_id: SessionId,
    pub keypoints: Vec<Keypoint>,
    pub timestamp_ms: u64,
}

/// What [`ResultRouter::route`] did with a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered {
        rendered: bool,
        /// Keypoints reached the sink.
        forwarded: bool,
    },
    /// The worker reported an error; the session must fault.
    Fault(String),
    /// Not meaningful once running (a repeated `Ready`).
    Ignored,
}

/// Per-session consumer of worker responses.
pub struct ResultRouter {
    session_id: SessionId,
    target: Option<Arc<dyn RenderTarget>>,
    sink: Option<Arc<dyn ResultSink>>,
    listeners: broadcast::Sender<KeypointEvent>,
    background: [u8; 4],
    counters: Arc<SessionCounters>,
}

impl ResultRouter {
    pub fn new(
        session_id: SessionId,
        target: Option<Arc<dyn RenderTarget>>,
        sink: Option<Arc<dyn ResultSink>>,
        listeners: broadcast::Sender<KeypointEvent>,
        background: [u8; 4],
        counters: Arc<SessionCounters>,
    ) -> Self {
        Self {
            session_id,
            target,
            sink,
            listeners,
            background,
            counters,
        }
    }

    pub fn route(&self, response: WorkerResponse, gate: &mut BackpressureGate) -> RouteOutcome {
        match response {
            WorkerResponse::Result(result) => {
                // Before anything that could fail, so the next tick can proceed.
                gate.release();
                self.counters.record_result();
                self.deliver(result)
            }
            WorkerResponse::Error { message } => RouteOutcome::Fault(message),
            WorkerResponse::Ready => {
                debug!(session_id = %self.session_id, "Ignoring extra Ready from worker");
                RouteOutcome::Ignored
            }
        }
    }

    fn deliver(&self, result: DetectionResponse) -> RouteOutcome {
        let DetectionResponse {
            keypoints,
            composited,
            width,
            height,
            timestamp_ms,
        } = result;

        let rendered = match (composited, &self.target) {
            (Some(frame), Some(target)) => {
                match compose_letterboxed(frame, target.size(), self.background) {
                    Some(image) => {
                        target.present(image);
                        true
                    }
                    None => {
                        trace!(session_id = %self.session_id, "Nothing to render into");
                        false
                    }
                }
            }
            // Frame dropped here if there is no target.
            _ => false,
        };

        let Some(keypoints) = keypoints else {
            return RouteOutcome::Delivered {
                rendered,
                forwarded: false,
            };
        };

        let forwarded = match &self.sink {
            Some(sink) if sink.is_open() => {
                let delivered = sink.deliver(SinkMessage::Keypoints {
                    landmarks: keypoints.clone(),
                    width,
                    height,
                    timestamp: timestamp_ms,
                });
                if !delivered {
                    warn!(session_id = %self.session_id, "Sink rejected keypoints, dropping");
                    self.counters.record_sink_drop();
                }
                delivered
            }
            Some(_) => {
                self.counters.record_sink_drop();
                false
            }
            None => false,
        };

        // No receivers is fine.
        let _ = self.listeners.send(KeypointEvent {
            session_id: self.session_id.clone(),
            keypoints,
            timestamp_ms,
        });

        RouteOutcome::Delivered {
            rendered,
            forwarded,
        }
    }
}
