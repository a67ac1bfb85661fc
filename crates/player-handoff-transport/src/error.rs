//! Transport error taxonomy.

use player_handoff_core::ControllerError;
use thiserror::Error;

use crate::protocol::ErrorPayload;

/// Errors that reject a single in-flight call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Posting the message failed.
    #[error("Failed to post on channel '{channel}': {reason}")]
    Post { channel: String, reason: String },

    /// No correlated response arrived in time.
    #[error("No response to '{action}' within {timeout_ms}ms")]
    Timeout { action: String, timeout_ms: u64 },

    /// Malformed or unexpected message.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The counterpart reported a failure.
    #[error("{name}: {message}")]
    Remote { name: String, message: String },

    /// The channel was destroyed while the call was pending.
    #[error("Channel '{0}' destroyed")]
    Destroyed(String),
}

impl TransportError {
    /// Stable error name, reused when the error crosses the wire.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Post { .. } | Self::Destroyed(_) => "TransportError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Protocol(_) => "ProtocolError",
            Self::Remote { name, .. } => name,
        }
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl From<ErrorPayload> for TransportError {
    fn from(payload: ErrorPayload) -> Self {
        Self::Remote {
            name: payload.name,
            message: payload.message,
        }
    }
}

impl From<TransportError> for ControllerError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { .. } => Self::Timeout(err.to_string()),
            TransportError::Protocol(message) => Self::Protocol(message),
            TransportError::Remote { name, message } => Self::Remote { name, message },
            TransportError::Post { .. } | TransportError::Destroyed(_) => {
                Self::Transport(err.to_string())
            }
        }
    }
}

impl From<&ControllerError> for ErrorPayload {
    fn from(err: &ControllerError) -> Self {
        Self::new(err.name(), err.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_survives_a_round_trip() {
        let original = ControllerError::NotFound("subtitle track x".to_string());
        let payload = ErrorPayload::from(&original);
        let rebuilt = ControllerError::from(TransportError::from(payload));

        assert_eq!(rebuilt.name(), "NotFound");
        assert_eq!(rebuilt.message(), "Not found: subtitle track x");
    }

    #[test]
    fn timeouts_map_to_controller_timeouts() {
        let err = ControllerError::from(TransportError::Timeout {
            action: "player.play".to_string(),
            timeout_ms: 20_000,
        });
        assert_eq!(err.name(), "TimeoutError");
    }
}
