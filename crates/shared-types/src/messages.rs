//! # Gateway Wire Messages
//!
//! Payloads exchanged with gateways over the publish/subscribe transport.
//!
//! ## Directions
//!
//! - **Uplink** (`UplinkMessage`): gateway → network, published on `.../up`
//! - **Status** (`GatewayStatus`): gateway → network, published on `.../status`
//! - **Downlink** (`GatewayDown` wrapping `DownlinkMessage`): network → gateway,
//!   delivered on `.../down`
//!
//! Maps use `BTreeMap` so that encoding is independent of insertion order.

use crate::errors::DownlinkValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Valid LoRa spreading factors.
pub const LORA_SPREADING_FACTORS: std::ops::RangeInclusive<u32> = 5..=12;

/// Radio modulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Modulation {
    #[default]
    Lora,
    Fsk,
}

/// Transmission (or reception) settings of a radio frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxSettings {
    pub modulation: Modulation,
    /// Bandwidth in Hz (LoRa).
    pub bandwidth: u32,
    /// Spreading factor (LoRa).
    pub spreading_factor: u32,
    /// Bit rate in bps (FSK).
    pub bit_rate: u32,
    /// LoRa coding rate, e.g. "4/5".
    pub coding_rate: String,
    /// Frequency in Hz.
    pub frequency: u64,
    /// Transmit power in dBm.
    pub tx_power: i32,
    pub invert_polarization: bool,
    pub channel_index: u32,
    /// Concentrator timestamp for timed transmission.
    pub timestamp: Option<u32>,
}

impl TxSettings {
    /// LoRa settings with the given radio parameters.
    pub fn lora(frequency: u64, bandwidth: u32, spreading_factor: u32, coding_rate: &str) -> Self {
        Self {
            modulation: Modulation::Lora,
            bandwidth,
            spreading_factor,
            coding_rate: coding_rate.to_string(),
            frequency,
            ..Self::default()
        }
    }

    /// FSK settings with the given bit rate.
    pub fn fsk(frequency: u64, bit_rate: u32) -> Self {
        Self {
            modulation: Modulation::Fsk,
            bit_rate,
            frequency,
            ..Self::default()
        }
    }

    /// Check that the settings describe a transmittable frame.
    pub fn validate(&self) -> Result<(), DownlinkValidationError> {
        if self.frequency == 0 {
            return Err(DownlinkValidationError::MissingFrequency);
        }
        match self.modulation {
            Modulation::Lora => {
                if self.bandwidth == 0 {
                    return Err(DownlinkValidationError::MissingBandwidth);
                }
                if !LORA_SPREADING_FACTORS.contains(&self.spreading_factor) {
                    return Err(DownlinkValidationError::InvalidSpreadingFactor(
                        self.spreading_factor,
                    ));
                }
            }
            Modulation::Fsk => {
                if self.bit_rate == 0 {
                    return Err(DownlinkValidationError::MissingBitRate);
                }
            }
        }
        Ok(())
    }
}

/// Reception metadata attached by the gateway to an uplink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RxMetadata {
    pub antenna_index: u32,
    /// Concentrator timestamp.
    pub timestamp: u32,
    pub rssi: f32,
    pub snr: f32,
    pub channel_index: u32,
}

/// An uplink frame received by a gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UplinkMessage {
    pub raw_payload: Vec<u8>,
    pub settings: Option<TxSettings>,
    pub rx_metadata: Vec<RxMetadata>,
    /// Unix time in milliseconds, as reported by the gateway.
    pub received_at: Option<u64>,
}

impl UplinkMessage {
    /// Uplink carrying only a raw payload.
    pub fn with_payload(raw_payload: impl Into<Vec<u8>>) -> Self {
        Self {
            raw_payload: raw_payload.into(),
            ..Self::default()
        }
    }
}

/// Antenna location reported in a status message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: i32,
    pub accuracy: i32,
}

/// Periodic gateway health report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct GatewayStatus {
    /// Unix time in milliseconds.
    pub time: u64,
    pub boot_time: Option<u64>,
    pub versions: BTreeMap<String, String>,
    pub antenna_locations: Vec<Location>,
    pub ip: Vec<String>,
    pub metrics: BTreeMap<String, f32>,
}

/// A downlink frame to be transmitted by a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DownlinkMessage {
    pub raw_payload: Vec<u8>,
    /// Required; a downlink without settings cannot be transmitted.
    pub settings: Option<TxSettings>,
    pub correlation_ids: Vec<String>,
}

impl DownlinkMessage {
    pub fn new(raw_payload: impl Into<Vec<u8>>, settings: TxSettings) -> Self {
        Self {
            raw_payload: raw_payload.into(),
            settings: Some(settings),
            correlation_ids: Vec::new(),
        }
    }

    /// Semantic validation performed before a downlink is handed to a session.
    pub fn validate(&self) -> Result<(), DownlinkValidationError> {
        let settings = self
            .settings
            .as_ref()
            .ok_or(DownlinkValidationError::MissingSettings)?;
        settings.validate()?;
        if self.raw_payload.is_empty() {
            return Err(DownlinkValidationError::EmptyPayload);
        }
        Ok(())
    }
}

/// Envelope published to a gateway's downlink topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GatewayDown {
    pub downlink_message: Option<DownlinkMessage>,
}

impl From<DownlinkMessage> for GatewayDown {
    fn from(down: DownlinkMessage) -> Self {
        Self {
            downlink_message: Some(down),
        }
    }
}
