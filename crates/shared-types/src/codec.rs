//! # Wire Codec
//!
//! Deterministic binary encoding of gateway messages.
//!
//! ## Frame Layout
//!
//! ```text
//! ┌─────────┬──────┬──────────────────────────┐
//! │ version │ kind │ bincode body (fixint)    │
//! │  1 byte │ 1 b  │ ...                      │
//! └─────────┴──────┴──────────────────────────┘
//! ```
//!
//! The kind tag makes decoding a payload as the wrong message type an error
//! rather than a silent reinterpretation of its fields.

use crate::errors::CodecError;
use crate::messages::{DownlinkMessage, GatewayDown, GatewayStatus, UplinkMessage};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Upper bound on an encoded message body (1 MiB).
pub const MAX_WIRE_MESSAGE_SIZE: u64 = 1024 * 1024;

const HEADER_LEN: usize = 2;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_WIRE_MESSAGE_SIZE)
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// A message that can travel over a gateway topic.
pub trait WireMessage: Serialize + DeserializeOwned + Sized {
    /// Human-readable kind, used in errors.
    const KIND: &'static str;
    /// Kind tag written after the version byte.
    const TAG: u8;

    /// Encode into a self-describing frame.
    fn marshal(&self) -> Result<Vec<u8>, CodecError> {
        let body = options().serialize(self).map_err(|e| CodecError::Malformed {
            kind: Self::KIND,
            reason: e.to_string(),
        })?;
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.push(WIRE_VERSION);
        out.push(Self::TAG);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode a frame produced by [`WireMessage::marshal`].
    fn unmarshal(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_LEN {
            return Err(CodecError::Truncated { len: bytes.len() });
        }
        if bytes[0] != WIRE_VERSION {
            return Err(CodecError::UnsupportedVersion {
                received: bytes[0],
                supported: WIRE_VERSION,
            });
        }
        if bytes[1] != Self::TAG {
            return Err(CodecError::UnexpectedKind {
                expected: Self::KIND,
                received: bytes[1],
            });
        }
        options()
            .deserialize(&bytes[HEADER_LEN..])
            .map_err(|e| CodecError::Malformed {
                kind: Self::KIND,
                reason: e.to_string(),
            })
    }
}

impl WireMessage for UplinkMessage {
    const KIND: &'static str = "UplinkMessage";
    const TAG: u8 = 0x01;
}

impl WireMessage for GatewayStatus {
    const KIND: &'static str = "GatewayStatus";
    const TAG: u8 = 0x02;
}

impl WireMessage for DownlinkMessage {
    const KIND: &'static str = "DownlinkMessage";
    const TAG: u8 = 0x03;
}

impl WireMessage for GatewayDown {
    const KIND: &'static str = "GatewayDown";
    const TAG: u8 = 0x10;
}
