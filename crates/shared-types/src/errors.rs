//! # Error Types
//!
//! Errors raised while validating identifiers and decoding wire payloads.

use thiserror::Error;

/// Errors produced by the wire codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Payload shorter than the wire header.
    #[error("Truncated payload: {len} bytes")]
    Truncated { len: usize },

    /// Wire version not supported.
    #[error("Unsupported wire version: received {received}, supported {supported}")]
    UnsupportedVersion { received: u8, supported: u8 },

    /// Payload carries a different message kind than requested.
    #[error("Unexpected message kind: expected {expected}, received tag {received:#04x}")]
    UnexpectedKind {
        expected: &'static str,
        received: u8,
    },

    /// Body failed to (de)serialize.
    #[error("Malformed {kind} body: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

/// Errors produced when parsing a gateway identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Identity is empty.
    #[error("Gateway identity is empty")]
    Empty,

    /// Identity exceeds the maximum length.
    #[error("Gateway identity too long: {len} bytes (max: {max})")]
    TooLong { len: usize, max: usize },

    /// Identity contains a reserved topic character or whitespace.
    #[error("Gateway identity contains forbidden character {0:?}")]
    ForbiddenCharacter(char),
}

/// Semantic validation failures for downlink messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownlinkValidationError {
    /// Transmission settings are missing.
    #[error("Transmission settings missing")]
    MissingSettings,

    /// Frequency not set.
    #[error("Transmission frequency missing")]
    MissingFrequency,

    /// LoRa bandwidth not set.
    #[error("LoRa bandwidth missing")]
    MissingBandwidth,

    /// LoRa spreading factor out of range.
    #[error("Invalid LoRa spreading factor: {0}")]
    InvalidSpreadingFactor(u32),

    /// FSK bit rate not set.
    #[error("FSK bit rate missing")]
    MissingBitRate,

    /// Nothing to transmit.
    #[error("Downlink payload is empty")]
    EmptyPayload,
}
