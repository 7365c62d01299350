//! # Worker Protocol
//!
//! Types and framing shared by the keypoint pipeline and the isolated
//! inference worker it drives.
//!
//! - [`Frame`]: a move-only RGBA8 image buffer
//! - [`WorkerRequest`] / [`WorkerResponse`]: the fixed message contract
//! - [`HostCodec`] / [`WorkerCodec`]: `tokio_util` codecs for each end of the pipe
//!
//! ## License
//!
//! MIT License

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use crate::{
    codec::{DEFAULT_MAX_FRAME_LEN, HostCodec, WorkerCodec},
    error::{CodecError, FrameError},
    frame::{BYTES_PER_PIXEL, Frame},
    message::{
        DetectionResponse, DetectionTask, InitOptions, Keypoint, WorkerRequest, WorkerResponse,
    },
};
