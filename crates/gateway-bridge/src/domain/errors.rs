//! Gateway bridge error types.
//!
//! Per-message errors (`Unauthorized`, `InvalidTopic`, `InvalidPayload` on the
//! inbound path) are contained by the session. Per-session errors
//! (`AuthenticationFailed`, `TransportFailure`) end only that session.

use shared_types::{CodecError, DownlinkValidationError, GatewayIdentity};
use thiserror::Error;

/// Errors surfaced by the gateway bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Bad or unknown credentials; the session is refused.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Identity collision under the reject policy.
    #[error("Gateway {0} is already connected")]
    AlreadyConnected(GatewayIdentity),

    /// Topic, identity or direction mismatch on a single message.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Malformed topic string.
    #[error("Invalid topic: {0:?}")]
    InvalidTopic(String),

    /// Payload failed to decode or failed semantic validation.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Operation attempted after session teardown.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No live session for the identity.
    #[error("Gateway {0} is not connected")]
    NotConnected(GatewayIdentity),

    /// Underlying I/O or protocol failure; fatal to the session.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Whether the error ends the session that raised it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_)
                | Self::AlreadyConnected(_)
                | Self::ConnectionClosed
                | Self::TransportFailure(_)
        )
    }
}

impl From<CodecError> for GatewayError {
    fn from(e: CodecError) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

impl From<DownlinkValidationError> for GatewayError {
    fn from(e: DownlinkValidationError) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        Self::TransportFailure(e.to_string())
    }
}
