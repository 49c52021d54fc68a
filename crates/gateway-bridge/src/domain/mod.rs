//! Domain layer: connections, registry, topic routing and session lifecycle.

pub mod config;
pub mod connection;
pub mod errors;
pub mod lifecycle;
pub mod registry;
pub mod topic;

pub use config::{BridgeConfig, ConfigError, DuplicatePolicy, QueueConfig, SessionConfig};
pub use connection::{Connection, ConnectionStats, DownlinkStream, TransportKind};
pub use errors::GatewayError;
pub use lifecycle::{CloseReason, SessionEvent, SessionLifecycle, SessionState};
pub use registry::{ConnectionEvent, ConnectionFeed, ConnectionRegistry};
pub use topic::{Operation, TopicMatch, TopicRouter};
