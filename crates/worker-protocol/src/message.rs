//! Messages exchanged between a session and its worker.
//!
//! The contract is fixed:
//! - `Init` is answered with `Ready` or `Error`
//! - `Detect` is answered with `Result`, or not at all
//! - `Stop` needs no acknowledgment

use serde::{Deserialize, Serialize};

use crate::frame::Frame;

fn default_visibility() -> f32 {
    1.0
}

fn default_draw_overlay() -> bool {
    true
}

/// A single detected landmark in normalized `[0, 1]` image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
    /// Absent on the wire means fully visible.
    #[serde(default = "default_visibility")]
    pub visibility: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility,
        }
    }
}

/// What the worker should look for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionTask {
    /// Full-body skeleton.
    #[default]
    Pose,
    /// Face mesh landmarks.
    Face,
    /// Hand landmarks.
    Hands,
}

impl DetectionTask {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pose => "pose",
            Self::Face => "face",
            Self::Hands => "hands",
        }
    }
}

impl std::fmt::Display for DetectionTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options carried by `Init`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitOptions {
    #[serde(default)]
    pub task: DetectionTask,
    /// Draw detected landmarks into the returned composited frame.
    #[serde(default = "default_draw_overlay")]
    pub draw_overlay: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            task: DetectionTask::default(),
            draw_overlay: default_draw_overlay(),
        }
    }
}

/// Host → worker.
#[derive(Debug)]
pub enum WorkerRequest {
    Init(InitOptions),
    Detect { frame: Frame, timestamp_ms: u64 },
    Stop,
}

impl WorkerRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Detect { .. } => "detect",
            Self::Stop => "stop",
        }
    }
}

/// Worker → host.
#[derive(Debug)]
pub enum WorkerResponse {
    Ready,
    Error { message: String },
    Result(DetectionResponse),
}

impl WorkerResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Error { .. } => "error",
            Self::Result(_) => "result",
        }
    }
}

/// Outcome of one `Detect` round trip.
///
/// `keypoints` is `None` when nothing was detected or detection failed for
/// this frame; the composited frame still comes back so the display keeps
/// moving.
#[derive(Debug)]
pub struct DetectionResponse {
    pub keypoints: Option<Vec<Keypoint>>,
    pub composited: Option<Frame>,
    pub width: u32,
    pub height: u32,
    /// The request's `timestamp_ms` plus the time the worker spent on it,
    /// i.e. when the result was ready on the host's session clock.
    pub timestamp_ms: u64,
}
