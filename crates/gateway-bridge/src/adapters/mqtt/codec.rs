//! MQTT 3.1.1 framing.
//!
//! Packet parsing and serialization come from `rumqttc`'s `mqttbytes` v4
//! model; this module adapts it to a tokio-util `Decoder`/`Encoder` so a
//! session can drive any byte stream through `Framed`.

use crate::domain::config::MQTT_MAX_PACKET_SIZE;
use crate::domain::GatewayError;
use bytes::BytesMut;
use rumqttc::mqttbytes;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

pub use rumqttc::mqttbytes::v4::{
    ConnAck, Connect, ConnectReturnCode, Login, Packet, PubAck, PubComp, PubRec, PubRel, Publish,
    SubAck, Subscribe, SubscribeFilter, SubscribeReasonCode, UnsubAck, Unsubscribe,
};
pub use rumqttc::{Protocol, QoS};

/// MQTT framing and parsing errors
#[derive(Debug, Error)]
pub enum MqttCodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MQTT protocol error: {0}")]
    Protocol(#[from] mqttbytes::Error),
}

impl MqttCodecError {
    /// The peer asked for a protocol name or level other than MQTT 3.1.1.
    pub fn is_unsupported_protocol(&self) -> bool {
        matches!(
            self,
            Self::Protocol(mqttbytes::Error::InvalidProtocol)
                | Self::Protocol(mqttbytes::Error::InvalidProtocolLevel(_))
        )
    }
}

impl From<MqttCodecError> for GatewayError {
    fn from(e: MqttCodecError) -> Self {
        GatewayError::TransportFailure(e.to_string())
    }
}

/// Short packet name for logs.
pub fn packet_name(packet: &Packet) -> &'static str {
    match packet {
        Packet::Connect(_) => "CONNECT",
        Packet::ConnAck(_) => "CONNACK",
        Packet::Publish(_) => "PUBLISH",
        Packet::PubAck(_) => "PUBACK",
        Packet::PubRec(_) => "PUBREC",
        Packet::PubRel(_) => "PUBREL",
        Packet::PubComp(_) => "PUBCOMP",
        Packet::Subscribe(_) => "SUBSCRIBE",
        Packet::SubAck(_) => "SUBACK",
        Packet::Unsubscribe(_) => "UNSUBSCRIBE",
        Packet::UnsubAck(_) => "UNSUBACK",
        Packet::PingReq => "PINGREQ",
        Packet::PingResp => "PINGRESP",
        Packet::Disconnect => "DISCONNECT",
    }
}

/// tokio-util codec over `mqttbytes` v4 packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MqttCodec {
    max_packet_size: usize,
}

impl MqttCodec {
    /// Codec rejecting inbound packets larger than `max_packet_size`.
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            max_packet_size: max_packet_size.min(MQTT_MAX_PACKET_SIZE),
        }
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for MqttCodec {
    fn default() -> Self {
        Self::new(MQTT_MAX_PACKET_SIZE)
    }
}

impl Decoder for MqttCodec {
    type Item = Packet;
    type Error = MqttCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, MqttCodecError> {
        match Packet::read(src, self.max_packet_size) {
            Ok(packet) => Ok(Some(packet)),
            Err(mqttbytes::Error::InsufficientBytes(required)) => {
                src.reserve(required);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Encoder<Packet> for MqttCodec {
    type Error = MqttCodecError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), MqttCodecError> {
        packet.write(dst, MQTT_MAX_PACKET_SIZE)?;
        Ok(())
    }
}
