//! Letterboxed presentation of composited frames.

use std::sync::Arc;

use image::{Rgba, RgbaImage, imageops};
use parking_lot::Mutex;
use worker_protocol::Frame;

/// A caller-owned display surface.
pub trait RenderTarget: Send + Sync + 'static {
    /// Current `(width, height)` of the surface.
    fn size(&self) -> (u32, u32);

    /// Replace the surface contents.
    fn present(&self, image: RgbaImage);
}

/// Placement of a scaled frame inside a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LetterboxRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Fit `src` inside `dst` preserving aspect ratio, centered.
///
/// Returns `None` if either size has a zero dimension.
pub fn letterbox(src: (u32, u32), dst: (u32, u32)) -> Option<LetterboxRect> {
    let (src_w, src_h) = src;
    let (dst_w, dst_h) = dst;
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return None;
    }

    let scale = (f64::from(dst_w) / f64::from(src_w)).min(f64::from(dst_h) / f64::from(src_h));
    let width = ((f64::from(src_w) * scale).round() as u32).clamp(1, dst_w);
    let height = ((f64::from(src_h) * scale).round() as u32).clamp(1, dst_h);

    Some(LetterboxRect {
        x: (dst_w - width) / 2,
        y: (dst_h - height) / 2,
        width,
        height,
    })
}

/// Scale `frame` into a `target`-sized image, filling the margins with
/// `background`. Consumes the frame.
pub fn compose_letterboxed(
    frame: Frame,
    target: (u32, u32),
    background: [u8; 4],
) -> Option<RgbaImage> {
    let rect = letterbox((frame.width(), frame.height()), target)?;
    let source = RgbaImage::from_raw(frame.width(), frame.height(), frame.into_data())?;

    let scaled = if (rect.width, rect.height) == source.dimensions() {
        source
    } else {
        imageops::resize(
            &source,
            rect.width,
            rect.height,
            imageops::FilterType::Triangle,
        )
    };

    let mut canvas = RgbaImage::from_pixel(target.0, target.1, Rgba(background));
    imageops::replace(&mut canvas, &scaled, i64::from(rect.x), i64::from(rect.y));
    Some(canvas)
}

#[derive(Debug)]
struct CanvasInner {
    width: u32,
    height: u32,
    last: Option<RgbaImage>,
    presented: u64,
}

/// In-memory [`RenderTarget`]. Clones share the same surface.
#[derive(Debug, Clone)]
pub struct Canvas {
    inner: Arc<Mutex<CanvasInner>>,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CanvasInner {
                width,
                height,
                last: None,
                presented: 0,
            })),
        }
    }

    pub fn resize(&self, width: u32, height: u32) {
        let mut inner = self.inner.lock();
        inner.width = width;
        inner.height = height;
    }

    /// Copy of the most recently presented image.
    pub fn snapshot(&self) -> Option<RgbaImage> {
        self.inner.lock().last.clone()
    }

    pub fn presented_count(&self) -> u64 {
        self.inner.lock().presented
    }
}

impl RenderTarget for Canvas {
    fn size(&self) -> (u32, u32) {
        let inner = self.inner.lock();
        (inner.width, inner.height)
    }

    fn present(&self, image: RgbaImage) {
        let mut inner = self.inner.lock();
        inner.last = Some(image);
        inner.presented += 1;
    }
}
