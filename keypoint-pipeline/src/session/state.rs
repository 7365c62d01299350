//! Session state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    /// No pipeline. Also reported for unknown sessions.
    #[default]
    Idle,
    /// Worker spawned, waiting for `Ready`.
    Loading,
    /// Capture loop active.
    Running,
    /// Worker failed. Stays here until disabled.
    Error,
}

/// Inputs that drive [`SessionState`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEvent {
    Enable,
    WorkerReady,
    /// Init error, runtime error, or unexpected exit.
    WorkerFault,
    Disable,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Loading => "LOADING",
            Self::Running => "RUNNING",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "IDLE" => Some(Self::Idle),
            "LOADING" => Some(Self::Loading),
            "RUNNING" => Some(Self::Running),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    /// A worker exists (or is being started) for this session.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Loading | Self::Running)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, target),
            (Idle, Loading)
                | (Loading, Running)
                | (Loading | Running, Error)
                | (Loading | Running | Error, Idle)
        )
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: SessionState) -> Result<SessionState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.as_str().to_string(),
                to: target.as_str().to_string(),
            })
        }
    }

    /// Resolve `event` against the transition table.
    pub fn apply(&self, event: SessionEvent) -> Result<SessionState, Error> {
        let target = match event {
            SessionEvent::Enable => Self::Loading,
            SessionEvent::WorkerReady => Self::Running,
            SessionEvent::WorkerFault => Self::Error,
            SessionEvent::Disable => Self::Idle,
        };
        self.transition_to(target)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
