//! Length-prefixed binary framing for worker messages.
//!
//! Every message on the pipe is
//!
//! ```text
//! u32 BE body length | u8 tag | body
//! ```
//!
//! Control messages carry a JSON body. Messages that carry pixels use a
//! JSON header followed by the raw RGBA bytes:
//!
//! ```text
//! u32 BE header length | header JSON | pixels
//! ```
//!
//! [`HostCodec`] sits on the pipeline side (encodes requests, decodes
//! responses); [`WorkerCodec`] is its mirror image inside the worker.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;
use crate::frame::Frame;
use crate::message::{DetectionResponse, Keypoint, WorkerRequest, WorkerResponse};

/// Default upper bound on a single message body (64 MiB, enough for 4K RGBA).
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

const TAG_INIT: u8 = 0x01;
const TAG_DETECT: u8 = 0x02;
const TAG_STOP: u8 = 0x03;
const TAG_READY: u8 = 0x81;
const TAG_ERROR: u8 = 0x82;
const TAG_RESULT: u8 = 0x83;

#[derive(Serialize, Deserialize)]
struct FrameHeader {
    width: u32,
    height: u32,
    timestamp_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct DetectHeader {
    frame: FrameHeader,
    timestamp_ms: u64,
}

#[derive(Serialize, Deserialize)]
struct ResultHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    keypoints: Option<Vec<Keypoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    composited: Option<FrameHeader>,
    width: u32,
    height: u32,
    timestamp_ms: u64,
}

fn frame_header(frame: &Frame) -> FrameHeader {
    FrameHeader {
        width: frame.width(),
        height: frame.height(),
        timestamp_ms: frame.timestamp_ms(),
    }
}

fn put_frame(
    dst: &mut BytesMut,
    tag: u8,
    header: Option<&[u8]>,
    payload: &[u8],
    max: usize,
) -> Result<(), CodecError> {
    let header_len = header.map_or(0, |h| LEN_PREFIX + h.len());
    let body_len = 1 + header_len + payload.len();
    if body_len > max {
        return Err(CodecError::FrameTooLarge { len: body_len, max });
    }

    dst.reserve(LEN_PREFIX + body_len);
    dst.put_u32(body_len as u32);
    dst.put_u8(tag);
    if let Some(header) = header {
        dst.put_u32(header.len() as u32);
        dst.put_slice(header);
    }
    dst.put_slice(payload);
    Ok(())
}

/// Split one complete message off `src`, returning its tag and body.
fn split_frame(src: &mut BytesMut, max: usize) -> Result<Option<(u8, BytesMut)>, CodecError> {
    if src.len() < LEN_PREFIX {
        return Ok(None);
    }

    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if len == 0 {
        return Err(CodecError::EmptyFrame);
    }
    if len > max {
        return Err(CodecError::FrameTooLarge { len, max });
    }
    if src.len() < LEN_PREFIX + len {
        src.reserve(LEN_PREFIX + len - src.len());
        return Ok(None);
    }

    src.advance(LEN_PREFIX);
    let mut body = src.split_to(len);
    let tag = body.get_u8();
    Ok(Some((tag, body)))
}

fn take_header<T: DeserializeOwned>(body: &mut BytesMut) -> Result<T, CodecError> {
    if body.len() < LEN_PREFIX {
        return Err(CodecError::Truncated("header length"));
    }
    let len = body.get_u32() as usize;
    if body.len() < len {
        return Err(CodecError::Truncated("header"));
    }
    let raw = body.split_to(len);
    Ok(serde_json::from_slice(&raw)?)
}

fn take_frame(header: FrameHeader, body: BytesMut) -> Result<Frame, CodecError> {
    Ok(Frame::new(
        body.to_vec(),
        header.width,
        header.height,
        header.timestamp_ms,
    )?)
}

/// Pipeline-side codec: writes [`WorkerRequest`]s, reads [`WorkerResponse`]s.
#[derive(Debug, Clone)]
pub struct HostCodec {
    max_frame_len: usize,
}

impl HostCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Default for HostCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Encoder<WorkerRequest> for HostCodec {
    type Error = CodecError;

    fn encode(&mut self, item: WorkerRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            WorkerRequest::Init(options) => {
                let body = serde_json::to_vec(&options)?;
                put_frame(dst, TAG_INIT, None, &body, self.max_frame_len)
            }
            WorkerRequest::Detect {
                frame,
                timestamp_ms,
            } => {
                let header = serde_json::to_vec(&DetectHeader {
                    frame: frame_header(&frame),
                    timestamp_ms,
                })?;
                put_frame(
                    dst,
                    TAG_DETECT,
                    Some(&header),
                    frame.data(),
                    self.max_frame_len,
                )
            }
            WorkerRequest::Stop => put_frame(dst, TAG_STOP, None, &[], self.max_frame_len),
        }
    }
}

impl Decoder for HostCodec {
    type Item = WorkerResponse;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((tag, mut body)) = split_frame(src, self.max_frame_len)? else {
            return Ok(None);
        };

        let response = match tag {
            TAG_READY => WorkerResponse::Ready,
            TAG_ERROR => WorkerResponse::Error {
                message: String::from_utf8(body.to_vec())?,
            },
            TAG_RESULT => {
                let header: ResultHeader = take_header(&mut body)?;
                let composited = match header.composited {
                    Some(frame) => Some(take_frame(frame, body)?),
                    None => None,
                };
                WorkerResponse::Result(DetectionResponse {
                    keypoints: header.keypoints,
                    composited,
                    width: header.width,
                    height: header.height,
                    timestamp_ms: header.timestamp_ms,
                })
            }
            other => return Err(CodecError::UnknownTag(other)),
        };
        Ok(Some(response))
    }
}

/// Worker-side codec: reads [`WorkerRequest`]s, writes [`WorkerResponse`]s.
#[derive(Debug, Clone)]
pub struct WorkerCodec {
    max_frame_len: usize,
}

impl WorkerCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Default for WorkerCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl Encoder<WorkerResponse> for WorkerCodec {
    type Error = CodecError;

    fn encode(&mut self, item: WorkerResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            WorkerResponse::Ready => put_frame(dst, TAG_READY, None, &[], self.max_frame_len),
            WorkerResponse::Error { message } => {
                put_frame(dst, TAG_ERROR, None, message.as_bytes(), self.max_frame_len)
            }
            WorkerResponse::Result(result) => {
                let DetectionResponse {
                    keypoints,
                    composited,
                    width,
                    height,
                    timestamp_ms,
                } = result;
                let header = serde_json::to_vec(&ResultHeader {
                    keypoints,
                    composited: composited.as_ref().map(frame_header),
                    width,
                    height,
                    timestamp_ms,
                })?;
                let pixels = composited.as_ref().map_or(&[][..], |f| f.data());
                put_frame(dst, TAG_RESULT, Some(&header), pixels, self.max_frame_len)
            }
        }
    }
}

impl Decoder for WorkerCodec {
    type Item = WorkerRequest;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some((tag, mut body)) = split_frame(src, self.max_frame_len)? else {
            return Ok(None);
        };

        let request = match tag {
            TAG_INIT => WorkerRequest::Init(serde_json::from_slice(&body)?),
            TAG_DETECT => {
                let header: DetectHeader = take_header(&mut body)?;
                WorkerRequest::Detect {
                    frame: take_frame(header.frame, body)?,
                    timestamp_ms: header.timestamp_ms,
                }
            }
            TAG_STOP => WorkerRequest::Stop,
            other => return Err(CodecError::UnknownTag(other)),
        };
        Ok(Some(request))
    }
}
