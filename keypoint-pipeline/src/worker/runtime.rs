//! The worker side of the protocol.

use std::panic::{AssertUnwindSafe, catch_unwind};

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};
use worker_protocol::{
    CodecError, DetectionResponse, Frame, InitOptions, WorkerCodec, WorkerRequest, WorkerResponse,
};

use super::detector::{Detector, draw_keypoints};
use crate::panic_hook::payload_to_string;

/// Answer requests from `reader` on `writer` until `Stop` or end of input.
///
/// A failing or panicking detection never ends the loop; it turns into a
/// `Result` without keypoints. Results are stamped with the request's
/// timestamp advanced by the detection time.
pub async fn serve<D, R, W>(mut detector: D, reader: R, writer: W) -> Result<(), CodecError>
where
    D: Detector,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut requests = FramedRead::new(reader, WorkerCodec::default());
    let mut responses = FramedWrite::new(writer, WorkerCodec::default());
    let mut options: Option<InitOptions> = None;

    while let Some(request) = requests.next().await {
        match request? {
            WorkerRequest::Init(init) => {
                let reply = match detector.initialize(&init) {
                    Ok(()) => {
                        info!(task = %init.task, overlay = init.draw_overlay, "Worker ready");
                        options = Some(init);
                        WorkerResponse::Ready
                    }
                    Err(e) => {
                        warn!(error = %e, "Worker initialization failed");
                        WorkerResponse::Error {
                            message: e.to_string(),
                        }
                    }
                };
                responses.send(reply).await?;
            }
            WorkerRequest::Detect {
                frame,
                timestamp_ms,
            } => {
                let Some(init) = &options else {
                    responses
                        .send(WorkerResponse::Error {
                            message: "detect received before init".to_string(),
                        })
                        .await?;
                    continue;
                };
                let started = Instant::now();
                let mut result =
                    run_detection(&mut detector, frame, timestamp_ms, init.draw_overlay);
                result.timestamp_ms =
                    timestamp_ms.saturating_add(started.elapsed().as_millis() as u64);
                responses.send(WorkerResponse::Result(result)).await?;
            }
            WorkerRequest::Stop => {
                info!("Stop received, worker exiting");
                return Ok(());
            }
        }
    }

    debug!("Input closed, worker exiting");
    Ok(())
}

fn run_detection<D: Detector>(
    detector: &mut D,
    frame: Frame,
    timestamp_ms: u64,
    draw_overlay: bool,
) -> DetectionResponse {
    let (width, height) = (frame.width(), frame.height());

    let keypoints = match catch_unwind(AssertUnwindSafe(|| detector.detect(&frame))) {
        Ok(Ok(keypoints)) => keypoints,
        Ok(Err(e)) => {
            warn!(timestamp_ms, error = %e, "Detection failed for frame");
            None
        }
        Err(payload) => {
            let message = payload_to_string(&*payload).unwrap_or_default();
            warn!(timestamp_ms, panic = %message, "Detector panicked on frame");
            None
        }
    };

    let composited = match &keypoints {
        Some(keypoints) if draw_overlay => draw_keypoints(frame, keypoints),
        _ => frame,
    };

    DetectionResponse {
        keypoints,
        composited: Some(composited),
        width,
        height,
        timestamp_ms,
    }
}
