//! Inference backends that run inside a worker.

use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_filled_circle_mut;
use thiserror::Error;
use worker_protocol::{BYTES_PER_PIXEL, DetectionTask, Frame, InitOptions, Keypoint};

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("task {0} is not supported by this detector")]
    Unsupported(DetectionTask),
    #[error("detector not initialized")]
    NotInitialized,
    #[error("detection failed: {0}")]
    Failed(String),
}

/// Frame in, optional ordered keypoints out.
pub trait Detector: Send + 'static {
    /// Load whatever the task needs. Called once per `Init`.
    fn initialize(&mut self, options: &InitOptions) -> Result<(), DetectorError>;

    /// `Ok(None)` means nothing was detected in this frame.
    fn detect(&mut self, frame: &Frame) -> Result<Option<Vec<Keypoint>>, DetectorError>;
}

/// Reference detector: a single keypoint at the centroid of the bright
/// pixels in the frame.
#[derive(Debug, Clone)]
pub struct LumaCentroidDetector {
    threshold: u8,
    initialized: bool,
}

impl LumaCentroidDetector {
    pub fn new(threshold: u8) -> Self {
        Self {
            threshold,
            initialized: false,
        }
    }
}

impl Default for LumaCentroidDetector {
    fn default() -> Self {
        Self::new(200)
    }
}

/// BT.601 luma.
fn luma(px: &[u8]) -> u8 {
    let y = 299 * u32::from(px[0]) + 587 * u32::from(px[1]) + 114 * u32::from(px[2]);
    (y / 1000) as u8
}

impl Detector for LumaCentroidDetector {
    fn initialize(&mut self, options: &InitOptions) -> Result<(), DetectorError> {
        if options.task != DetectionTask::Pose {
            return Err(DetectorError::Unsupported(options.task));
        }
        self.initialized = true;
        Ok(())
    }

    fn detect(&mut self, frame: &Frame) -> Result<Option<Vec<Keypoint>>, DetectorError> {
        if !self.initialized {
            return Err(DetectorError::NotInitialized);
        }

        let width = frame.width() as usize;
        let (mut sum_x, mut sum_y, mut count) = (0u64, 0u64, 0u64);
        for (i, px) in frame.data().chunks_exact(BYTES_PER_PIXEL).enumerate() {
            if luma(px) >= self.threshold {
                sum_x += (i % width) as u64;
                sum_y += (i / width) as u64;
                count += 1;
            }
        }

        if count == 0 {
            return Ok(None);
        }

        let cx = (sum_x as f64 / count as f64 + 0.5) / frame.width() as f64;
        let cy = (sum_y as f64 / count as f64 + 0.5) / frame.height() as f64;
        Ok(Some(vec![Keypoint::new(cx as f32, cy as f32, 0.0, 1.0)]))
    }
}

const OVERLAY_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);

/// Draw a dot for every visible keypoint. Consumes and returns the frame
/// without copying its pixels.
pub fn draw_keypoints(frame: Frame, keypoints: &[Keypoint]) -> Frame {
    let (width, height, timestamp_ms) = (frame.width(), frame.height(), frame.timestamp_ms());
    let Some(mut image) = RgbaImage::from_raw(width, height, frame.into_data()) else {
        // Frame guarantees the buffer length, so this does not happen.
        return Frame::solid(width, height, [0, 0, 0, 255], timestamp_ms);
    };

    let radius = (width.min(height) / 60).max(2) as i32;
    for kp in keypoints.iter().filter(|kp| kp.visibility >= 0.5) {
        let x = (kp.x * width as f32).round() as i32;
        let y = (kp.y * height as f32).round() as i32;
        draw_filled_circle_mut(&mut image, (x, y), radius, OVERLAY_COLOR);
    }

    match Frame::new(image.into_raw(), width, height, timestamp_ms) {
        Ok(frame) => frame,
        Err(_) => Frame::solid(width, height, [0, 0, 0, 255], timestamp_ms),
    }
}
