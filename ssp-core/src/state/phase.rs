//! Protocol client lifecycle state machine.
//!
//! Provides a `ClientPhase` enum that models the lifecycle of one
//! helper-process session, with validated transitions that return
//! `Result` instead of panicking.

use std::time::Instant;

use crate::error::SspError;

// ── ClientPhase ──────────────────────────────────────────────────

/// The current phase of a protocol client.
///
/// ```text
///  Idle ──► Starting ──► Running ──► Stopping ──► Stopped
///              │                        ▲            │
///              └──────── (launch failed)─┼──────────►│
///                                        │           ▼
///                                        └──── Starting (restart)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ClientPhase {
    /// Never started.
    #[default]
    Idle,

    /// Helper process is being launched.
    Starting,

    /// Helper is up and the receive loop is active.
    Running {
        /// When the client entered the `Running` state.
        since: Instant,
    },

    /// Receive loop is being joined and the helper terminated.
    Stopping,

    /// Terminal state; the client may be started again.
    Stopped,
}

impl std::fmt::Display for ClientPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Running { .. } => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

impl ClientPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Returns `true` when `stop()` has nothing to do.
    pub fn is_inactive(&self) -> bool {
        matches!(self, Self::Idle | Self::Stopped)
    }

    /// How long the client has been in the `Running` state.
    pub fn running_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Running { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`, `Stopped`.
    pub fn begin_start(&mut self) -> Result<(), SspError> {
        match self {
            Self::Idle | Self::Stopped => {
                *self = Self::Starting;
                Ok(())
            }
            _ => Err(SspError::InvalidTransition(
                "cannot start: not in Idle or Stopped state",
            )),
        }
    }

    /// Valid from: `Starting`.
    pub fn launched(&mut self) -> Result<(), SspError> {
        match self {
            Self::Starting => {
                *self = Self::Running {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(SspError::InvalidTransition(
                "cannot enter Running: not in Starting state",
            )),
        }
    }

    /// Launch failed; valid from: `Starting`.
    pub fn launch_failed(&mut self) -> Result<(), SspError> {
        match self {
            Self::Starting => {
                *self = Self::Stopped;
                Ok(())
            }
            _ => Err(SspError::InvalidTransition(
                "cannot fail launch: not in Starting state",
            )),
        }
    }

    /// Valid from: `Starting`, `Running`.
    pub fn begin_stop(&mut self) -> Result<(), SspError> {
        match self {
            Self::Starting | Self::Running { .. } => {
                *self = Self::Stopping;
                Ok(())
            }
            _ => Err(SspError::InvalidTransition(
                "cannot stop: not in Starting or Running state",
            )),
        }
    }

    /// Valid from: `Stopping`.
    pub fn finish_stop(&mut self) -> Result<(), SspError> {
        match self {
            Self::Stopping => {
                *self = Self::Stopped;
                Ok(())
            }
            _ => Err(SspError::InvalidTransition(
                "cannot finish stop: not in Stopping state",
            )),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
