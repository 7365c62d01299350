//! Downstream delivery of detection results.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;
use worker_protocol::Keypoint;

/// Message forwarded to the downstream consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkMessage {
    Keypoints {
        landmarks: Vec<Keypoint>,
        width: u32,
        height: u32,
        timestamp: u64,
    },
}

/// Best-effort receiver of [`SinkMessage`]s.
pub trait ResultSink: Send + Sync + 'static {
    fn is_open(&self) -> bool;

    /// Hand over a message without waiting. Returns `false` if it was dropped.
    fn deliver(&self, message: SinkMessage) -> bool;
}

/// [`ResultSink`] over a bounded channel. Drops when full or closed.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkMessage>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<SinkMessage>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SinkMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl ResultSink for ChannelSink {
    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    fn deliver(&self, message: SinkMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Sink full, dropping keypoints");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}
