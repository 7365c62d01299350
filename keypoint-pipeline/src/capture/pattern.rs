//! Synthetic frame source used by `keypointd` and tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::time::Instant;
use worker_protocol::{BYTES_PER_PIXEL, Frame};

use super::source::{AcquireError, FrameSource};

const BACKGROUND: [u8; 4] = [16, 16, 16, 255];
const MARKER: [u8; 4] = [255, 255, 255, 255];

/// A dark frame with a bright square that moves one step per acquisition.
///
/// Timestamps are milliseconds since the source was created.
#[derive(Debug)]
pub struct TestPatternSource {
    width: u32,
    height: u32,
    marker_size: u32,
    epoch: Instant,
    frames: AtomicU64,
    paused: AtomicBool,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            marker_size: (width.min(height) / 8).max(1),
            epoch: Instant::now(),
            frames: AtomicU64::new(0),
            paused: AtomicBool::new(false),
        }
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Top-left corner of the marker in frame `index`.
    pub fn marker_origin(&self, index: u64) -> (u32, u32) {
        let span_x = u64::from(self.width.saturating_sub(self.marker_size).max(1));
        let span_y = u64::from(self.height.saturating_sub(self.marker_size).max(1));
        let x = (index * 7) % span_x;
        let y = (index * 3) % span_y;
        (x as u32, y as u32)
    }

    fn render(&self, index: u64, timestamp_ms: u64) -> Frame {
        let mut frame = Frame::solid(self.width, self.height, BACKGROUND, timestamp_ms);
        let (ox, oy) = self.marker_origin(index);
        let stride = self.width as usize * BYTES_PER_PIXEL;
        let data = frame.data_mut();

        for y in oy..(oy + self.marker_size).min(self.height) {
            for x in ox..(ox + self.marker_size).min(self.width) {
                let offset = y as usize * stride + x as usize * BYTES_PER_PIXEL;
                data[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&MARKER);
            }
        }
        frame
    }
}

#[async_trait]
impl FrameSource for TestPatternSource {
    fn is_ready(&self) -> bool {
        !self.paused.load(Ordering::Acquire) && self.width > 0 && self.height > 0
    }

    async fn acquire(&self) -> Result<Frame, AcquireError> {
        if !self.is_ready() {
            return Err(AcquireError::NotReady);
        }
        let index = self.frames.fetch_add(1, Ordering::Relaxed);
        let timestamp_ms = self.epoch.elapsed().as_millis() as u64;
        Ok(self.render(index, timestamp_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_marker_is_drawn() {
        let source = TestPatternSource::new(64, 48);
        let frame = source.acquire().await.unwrap();
        assert_eq!((frame.width(), frame.height()), (64, 48));

        let (ox, oy) = source.marker_origin(0);
        assert_eq!(frame.pixel(ox, oy), Some(MARKER));
        assert_eq!(frame.pixel(63, 47), Some(BACKGROUND));
        assert_eq!(source.frames_produced(), 1);
    }

    #[tokio::test]
    async fn test_paused_source_not_ready() {
        let source = TestPatternSource::new(16, 16);
        source.pause();
        assert!(!source.is_ready());
        assert!(matches!(
            source.acquire().await,
            Err(AcquireError::NotReady)
        ));
        source.resume();
        assert!(source.is_ready());
    }

    #[test]
    fn test_marker_moves() {
        let source = TestPatternSource::new(64, 64);
        assert_ne!(source.marker_origin(0), source.marker_origin(1));
    }
}
