//! Ports layer for the gateway bridge.
//!
//! - Inbound (Driving) port: `ConnectionDirectory`, used by upstream components
//! - Outbound (Driven) port: `AuthValidator`, the rights backend

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
