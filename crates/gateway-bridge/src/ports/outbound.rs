//! Outbound ports for the gateway bridge.

use async_trait::async_trait;
use shared_types::Credentials;
use thiserror::Error;

/// Failures of the rights backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The backend could not be reached.
    #[error("Rights backend unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with an error.
    #[error("Rights backend error: {0}")]
    Backend(String),
}

/// Rights backend deciding whether a gateway may connect.
///
/// Any error or `Ok(false)` rejects the session. Calls are bounded by the
/// session's auth timeout and dropped if it expires.
#[async_trait]
pub trait AuthValidator: Send + Sync {
    async fn validate(&self, credentials: &Credentials) -> Result<bool, AuthError>;
}
