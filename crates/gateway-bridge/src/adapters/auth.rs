//! Static key validator.
//!
//! Holds a fixed table of gateway keys, e.g. loaded from the runtime's config
//! file. Unknown gateways are compared against a dummy key so that lookup
//! misses and key mismatches take the same time.

use crate::ports::{AuthError, AuthValidator};
use async_trait::async_trait;
use shared_types::{Credentials, GatewayIdentity, Secret};
use std::collections::HashMap;
use subtle::ConstantTimeEq;

/// Validator backed by an in-memory key table.
#[derive(Debug, Default)]
pub struct StaticKeyValidator {
    keys: HashMap<GatewayIdentity, Secret>,
}

impl StaticKeyValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the key of a gateway.
    pub fn with_key(mut self, gateway: GatewayIdentity, key: Secret) -> Self {
        self.keys.insert(gateway, key);
        self
    }

    pub fn from_keys(keys: impl IntoIterator<Item = (GatewayIdentity, Secret)>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[async_trait]
impl AuthValidator for StaticKeyValidator {
    async fn validate(&self, credentials: &Credentials) -> Result<bool, AuthError> {
        let presented = credentials.secret.expose();
        match self.keys.get(&credentials.gateway) {
            Some(expected) if !expected.is_empty() => {
                Ok(constant_time_compare(presented, expected.expose()))
            }
            _ => {
                let _ = constant_time_compare(presented, presented);
                Ok(false)
            }
        }
    }
}

/// Constant-time string comparison.
///
/// Both inputs are padded to the same length with different pad bytes, so
/// neither the content nor the length of the expected key leaks.
pub fn constant_time_compare(a: &str, b: &str) -> bool {
    let max_len = std::cmp::max(a.len(), b.len());

    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0xFFu8; max_len];
    a_padded[..a.len()].copy_from_slice(a.as_bytes());
    b_padded[..b.len()].copy_from_slice(b.as_bytes());

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);
    (lengths_equal & contents_equal).into()
}
