//! Pipeline configuration.
//!
//! Loaded from a TOML file when one is given (or found in the user config
//! directory), otherwise every field falls back to its default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use worker_protocol::{DetectionTask, InitOptions};

use crate::error::{Error, Result};

/// File name looked up under the platform config directory.
pub const CONFIG_FILE_NAME: &str = "keypoint-pipeline.toml";

fn default_target_fps() -> f64 {
    20.0
}

fn default_tick_interval_ms() -> u64 {
    16
}

fn default_grace_period_ms() -> u64 {
    500
}

fn default_init_timeout_ms() -> Option<u64> {
    Some(10_000)
}

fn default_background() -> [u8; 4] {
    [0, 0, 0, 255]
}

fn default_draw_overlay() -> bool {
    true
}

fn default_listener_capacity() -> usize {
    64
}

fn default_worker_program() -> String {
    "keypoint-worker".to_string()
}

/// How to start the worker executable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommandConfig {
    #[serde(default = "default_worker_program")]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for WorkerCommandConfig {
    fn default() -> Self {
        Self {
            program: default_worker_program(),
            args: Vec::new(),
        }
    }
}

/// Per-process pipeline settings shared by every session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound on frames dispatched to a worker per second.
    #[serde(default = "default_target_fps")]
    pub target_fps: f64,
    /// Period of the capture tick; the loop self-throttles on top of it.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// How long a worker gets to exit after `Stop` before it is killed.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Bound on the `Init` handshake. `None` waits forever.
    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: Option<u64>,
    /// RGBA fill for letterbox margins.
    #[serde(default = "default_background")]
    pub background: [u8; 4],
    #[serde(default)]
    pub task: DetectionTask,
    #[serde(default = "default_draw_overlay")]
    pub draw_overlay: bool,
    /// Buffer size of the local keypoint listener channel.
    #[serde(default = "default_listener_capacity")]
    pub listener_capacity: usize,
    #[serde(default)]
    pub worker: WorkerCommandConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            tick_interval_ms: default_tick_interval_ms(),
            grace_period_ms: default_grace_period_ms(),
            init_timeout_ms: default_init_timeout_ms(),
            background: default_background(),
            task: DetectionTask::default(),
            draw_overlay: default_draw_overlay(),
            listener_capacity: default_listener_capacity(),
            worker: WorkerCommandConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from `path`, or from the default location if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|p| p.exists()),
        };

        let config = match path {
            Some(path) => {
                debug!(path = %path.display(), "Loading pipeline config");
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    Error::config(format!("failed to read {}: {e}", path.display()))
                })?;
                Self::from_toml(&content)?
            }
            None => {
                let config = Self::default();
                config.validate()?;
                config
            }
        };

        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::config(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.target_fps.is_finite() || self.target_fps <= 0.0 {
            return Err(Error::config(format!(
                "target_fps must be positive, got {}",
                self.target_fps
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::config("tick_interval_ms must be greater than zero"));
        }
        if self.grace_period_ms == 0 {
            return Err(Error::config("grace_period_ms must be greater than zero"));
        }
        if self.init_timeout_ms == Some(0) {
            return Err(Error::config(
                "init_timeout_ms must be greater than zero (omit it to wait forever)",
            ));
        }
        if self.listener_capacity == 0 {
            return Err(Error::config("listener_capacity must be greater than zero"));
        }
        if self.worker.program.trim().is_empty() {
            return Err(Error::config("worker.program must not be empty"));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn init_timeout(&self) -> Option<Duration> {
        self.init_timeout_ms.map(Duration::from_millis)
    }

    pub fn init_options(&self) -> InitOptions {
        InitOptions {
            task: self.task,
            draw_overlay: self.draw_overlay,
        }
    }
}

/// `<config dir>/keypoint-pipeline.toml`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
}
