//! Errors surfaced by detach and attach.

use player_handoff_core::{ControllerError, PlaybackLocation, WindowError};
use player_handoff_transport::TransportError;
use thiserror::Error;

/// A single unmet precondition of `detach()` or `attach()`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Precondition {
    #[error("playback is {0}, not attached")]
    NotAttached(PlaybackLocation),
    #[error("playback is {0}, not detached")]
    NotDetached(PlaybackLocation),
    #[error("a detach is already in progress")]
    DetachInProgress,
    #[error("an attach is already in progress")]
    AttachInProgress,
    #[error("no detached window url configured")]
    DetachNotConfigured,
    #[error("no video loaded")]
    NoVideoLoaded,
    #[error("player did not leave seeking/buffering in time")]
    TransientStateTimeout,
}

/// Handshake failure on the well-known channel.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("No detached window answered proxy '{proxy_id}' within {timeout_ms}ms")]
    NoCounterpart { proxy_id: String, timeout_ms: u64 },
    #[error("Reply for proxy '{actual}' while connecting '{expected}'")]
    ProxyMismatch { expected: String, actual: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Handshake superseded")]
    Cancelled,
}

/// Restore failure that aborts the restore. Post-load steps never do.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("Failed to restore {operation} before load: {source}")]
    PreLoad {
        operation: &'static str,
        #[source]
        source: ControllerError,
    },
    #[error("Failed to load video: {0}")]
    Load(#[source] ControllerError),
}

/// Why a detach or attach did not happen.
#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("Preconditions not met: {}", list(.0))]
    Precondition(Vec<Precondition>),
    #[error("Failed to open detached window: {0}")]
    Window(#[from] WindowError),
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("Failed to capture player state: {0}")]
    Capture(#[source] ControllerError),
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error("Handoff cancelled")]
    Cancelled,
}

impl HandoffError {
    /// Stable error name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Precondition(_) => "PreconditionError",
            Self::Window(_) => "WindowError",
            Self::Handshake(HandshakeError::Transport(TransportError::Timeout { .. })) => {
                "TimeoutError"
            }
            Self::Handshake(_) => "HandshakeError",
            Self::Capture(_) => "CaptureError",
            Self::Restore(_) => "RestoreError",
            Self::Cancelled => "CancelledError",
        }
    }

    /// Unmet preconditions, empty for other failures.
    #[must_use]
    pub fn preconditions(&self) -> &[Precondition] {
        match self {
            Self::Precondition(unmet) => unmet,
            _ => &[],
        }
    }
}

fn list(unmet: &[Precondition]) -> String {
    unmet
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
