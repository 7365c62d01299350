//! Per-session keypoint detection pipeline.
//!
//! Each enabled session gets its own isolated worker (a child process or an
//! in-process task reached only through the worker protocol) and a capture
//! loop that feeds it frames one at a time, throttled to a target rate.
//! Results are rendered onto a caller-owned target, forwarded to a sink and
//! published to local listeners.
//!
//! ```no_run
//! use std::sync::Arc;
//! use keypoint_pipeline::{PipelineConfig, SessionId, SessionRegistry};
//! use keypoint_pipeline::capture::TestPatternSource;
//! use keypoint_pipeline::worker::ProcessLauncher;
//!
//! # async fn run() -> keypoint_pipeline::Result<()> {
//! let config = PipelineConfig::default();
//! let launcher = Arc::new(ProcessLauncher::new(config.worker.clone()));
//! let registry = SessionRegistry::new(&config, launcher)?;
//!
//! let id = SessionId::from("camera-1");
//! registry.enable(&id, Arc::new(TestPatternSource::new(640, 480)), None);
//! // ...
//! registry.disable(&id).await;
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod config;
pub mod error;
pub mod logging;
pub mod panic_hook;
pub mod router;
pub mod session;
pub mod worker;

pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use session::{SessionId, SessionRegistry, SessionState, SessionStats, ShutdownReport};
