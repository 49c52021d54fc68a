//! # Shared Types Crate
//!
//! Gateway wire messages, gateway identifiers and the wire codec used on both
//! sides of the gateway bridge.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every payload a gateway can publish or receive
//!   is defined here.
//! - **Opaque to the transport**: the bridge only needs `marshal`/`unmarshal`;
//!   it never inspects radio fields beyond downlink settings validation.
//! - **Deterministic encoding**: `unmarshal(marshal(m)) == m`, byte for byte,
//!   and a payload of one kind never decodes as another.

pub mod codec;
pub mod errors;
pub mod identifiers;
pub mod messages;

pub use codec::{WireMessage, MAX_WIRE_MESSAGE_SIZE, WIRE_VERSION};
pub use errors::*;
pub use identifiers::{Credentials, GatewayIdentity, Secret, MAX_GATEWAY_ID_LEN};
pub use messages::*;
