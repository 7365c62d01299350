//! Frame acquisition, throttling and single-in-flight dispatch.

pub mod gate;
pub mod pattern;
pub mod scheduler;
pub mod source;
pub mod throttle;

pub use gate::BackpressureGate;
pub use pattern::TestPatternSource;
pub use scheduler::{Acquired, CaptureScheduler, TickOutcome};
pub use source::{AcquireError, FrameSource};
pub use throttle::FpsThrottle;
