//! The frame source a session pulls from.

use async_trait::async_trait;
use thiserror::Error;
use worker_protocol::Frame;

/// Why a frame could not be acquired this cycle.
#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("source not ready")]
    NotReady,
    #[error("acquisition failed: {0}")]
    Failed(String),
}

/// Something that produces owned frames on demand (a camera, a decoder, a
/// test pattern).
#[async_trait]
pub trait FrameSource: Send + Sync + 'static {
    /// Not paused and a decodable frame is available.
    fn is_ready(&self) -> bool;

    /// Produce the next frame. May take longer than one capture tick.
    async fn acquire(&self) -> Result<Frame, AcquireError>;
}
