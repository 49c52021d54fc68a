//! # Gateway Identifiers
//!
//! `GatewayIdentity` is the sole key used to bind a transport session, a
//! registry entry and a topic together. It is validated once, at the edge,
//! so every holder can rely on it being safe to embed in a topic.

use crate::errors::IdentityError;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Maximum length of a gateway identity in bytes.
pub const MAX_GATEWAY_ID_LEN: usize = 64;

/// Unique, immutable identifier of a physical gateway.
///
/// Matching is case-sensitive. Topic separators (`/`), MQTT wildcards
/// (`+`, `#`), whitespace and control characters are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GatewayIdentity(String);

impl GatewayIdentity {
    /// Parse and validate a gateway identity.
    pub fn new(id: impl Into<String>) -> Result<Self, IdentityError> {
        let id = id.into();
        if id.is_empty() {
            return Err(IdentityError::Empty);
        }
        if id.len() > MAX_GATEWAY_ID_LEN {
            return Err(IdentityError::TooLong {
                len: id.len(),
                max: MAX_GATEWAY_ID_LEN,
            });
        }
        if let Some(c) = id
            .chars()
            .find(|c| matches!(c, '/' | '+' | '#') || c.is_whitespace() || c.is_control())
        {
            return Err(IdentityError::ForbiddenCharacter(c));
        }
        Ok(Self(id))
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GatewayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GatewayIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for GatewayIdentity {
    type Error = IdentityError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<GatewayIdentity> for String {
    fn from(id: GatewayIdentity) -> Self {
        id.0
    }
}

impl AsRef<str> for GatewayIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A gateway secret (API key). Redacted in `Debug`, wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Borrow the secret for comparison.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Credentials presented by a gateway when it connects.
///
/// Lives only for the duration of the authentication call.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub gateway: GatewayIdentity,
    pub secret: Secret,
}

impl Credentials {
    pub fn new(gateway: GatewayIdentity, secret: Secret) -> Self {
        Self { gateway, secret }
    }
}
