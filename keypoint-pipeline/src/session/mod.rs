//! Session registry, state machine and per-session driver.

mod driver;
pub mod registry;
pub mod state;
pub mod stats;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use registry::{SessionBinding, SessionRegistry, ShutdownReport};
pub use state::{SessionEvent, SessionState};
pub use stats::{SessionCounters, SessionStats};

/// Opaque session identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
