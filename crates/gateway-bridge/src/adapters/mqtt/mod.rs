//! MQTT transport adapter: packet codec and per-client session driver.

pub mod codec;
pub mod session;

pub use codec::{MqttCodec, MqttCodecError, Packet, QoS};
pub use session::{MqttSession, SessionContext};
