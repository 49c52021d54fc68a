//! # Inbound Port - ConnectionDirectory
//!
//! Driving port used by upstream network components to find live gateway
//! sessions and push downlinks to them.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | `lookup` | Live connection of a gateway |
//! | `send_down` | Route a downlink to a gateway |
//! | `connected_gateways` | Identities with a live session |
//! | `subscribe` | Connect/disconnect notifications |

use crate::domain::{Connection, ConnectionFeed, ConnectionRegistry, GatewayError};
use async_trait::async_trait;
use shared_types::{DownlinkMessage, GatewayIdentity};
use std::sync::Arc;

/// Read and routing access to live gateway sessions.
///
/// # Example
///
/// ```rust,ignore
/// async fn forward(
///     directory: &dyn ConnectionDirectory,
///     gw: &GatewayIdentity,
///     msg: DownlinkMessage,
/// ) {
///     match directory.send_down(gw, msg).await {
///         Err(GatewayError::NotConnected(_)) => { /* gateway offline */ }
///         other => other.unwrap(),
///     }
/// }
/// ```
#[async_trait]
pub trait ConnectionDirectory: Send + Sync {
    /// Live connection of a gateway, if any.
    fn lookup(&self, gateway: &GatewayIdentity) -> Option<Arc<Connection>>;

    /// Queue a downlink for a gateway.
    ///
    /// # Errors
    /// - `NotConnected`: no live session for the gateway
    /// - `InvalidPayload`: settings missing or invalid
    /// - `ConnectionClosed`: the session ended while queueing
    async fn send_down(
        &self,
        gateway: &GatewayIdentity,
        message: DownlinkMessage,
    ) -> Result<(), GatewayError>;

    /// Identities with a live session.
    fn connected_gateways(&self) -> Vec<GatewayIdentity>;

    /// Subscribe to connect/disconnect notifications.
    fn subscribe(&self) -> ConnectionFeed;
}

#[async_trait]
impl ConnectionDirectory for ConnectionRegistry {
    fn lookup(&self, gateway: &GatewayIdentity) -> Option<Arc<Connection>> {
        ConnectionRegistry::lookup(self, gateway)
    }

    async fn send_down(
        &self,
        gateway: &GatewayIdentity,
        message: DownlinkMessage,
    ) -> Result<(), GatewayError> {
        ConnectionRegistry::send_down(self, gateway, message).await
    }

    fn connected_gateways(&self) -> Vec<GatewayIdentity> {
        self.gateways()
    }

    fn subscribe(&self) -> ConnectionFeed {
        ConnectionRegistry::subscribe(self)
    }
}
