//! # Gateway Bridge
//!
//! Gateway-facing MQTT transport bridge of a LoRaWAN network backend.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          GATEWAY BRIDGE                              │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │   TcpListener / external TLS stream                                  │
//! │          │                                                           │
//! │  ┌───────┴─────────┐   CONNECT    ┌────────────────┐                 │
//! │  │   MqttSession   │─────────────▶│ AuthValidator  │ (outbound port) │
//! │  │ (one task each) │              └────────────────┘                 │
//! │  └───────┬─────────┘                                                 │
//! │          │ PUBLISH v3/<id>/up|status    ┌─────────────┐              │
//! │          ├─────────────────────────────▶│ TopicRouter │              │
//! │          │                              └─────────────┘              │
//! │  ┌───────┴─────────┐  register/remove  ┌────────────────────┐        │
//! │  │   Connection    │◀─────────────────▶│ ConnectionRegistry │        │
//! │  │ up/status/down  │                   └─────────┬──────────┘        │
//! │  └───────┬─────────┘                             │                   │
//! └──────────┼───────────────────────────────────────┼───────────────────┘
//!            ▼                                       ▼
//!   upstream consumers                 ConnectionDirectory (inbound port)
//! ```
//!
//! # Guarantees
//!
//! - A gateway only publishes uplink/status for its own identity and never
//!   publishes to a `down` topic; it only subscribes to its own `down` topic.
//! - At most one live connection per gateway identity.
//! - Per-connection FIFO order in both directions.
//! - Closing a session unblocks every waiter on its connection and removes
//!   its registry entry.
//!
//! # Usage
//!
//! ```ignore
//! use gateway_bridge::{BridgeConfig, GatewayBridgeService, StaticKeyValidator, TransportKind};
//!
//! let validator = Arc::new(validator);
//! let service = Arc::new(GatewayBridgeService::new(BridgeConfig::default(), validator)?);
//! let listener = TcpListener::bind("0.0.0.0:1882").await?;
//! tokio::spawn({
//!     let service = Arc::clone(&service);
//!     async move { service.start(listener, TransportKind::Mqtt).await }
//! });
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

pub use adapters::StaticKeyValidator;
pub use domain::{
    BridgeConfig, CloseReason, ConfigError, Connection, ConnectionEvent, ConnectionFeed,
    ConnectionRegistry, ConnectionStats, DuplicatePolicy, GatewayError, Operation, QueueConfig,
    SessionConfig, TopicMatch, TopicRouter, TransportKind,
};
pub use ports::{AuthError, AuthValidator, ConnectionDirectory};
pub use service::GatewayBridgeService;
