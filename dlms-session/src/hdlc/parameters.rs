//! HDLC link settings and parameter negotiation
//!
//! [`HdlcSettings`] is the configuration surface of one link. [`LinkParameters`]
//! is the negotiation block exchanged in the information field of SNRM and UA
//! (IEC 62056-46 6.4.4.4.3.2):
//!
//! ```text
//! 81 80 len | 05 l max_info_tx | 06 l max_info_rx | 07 l window_tx | 08 l window_rx
//! ```

use crate::error::{DlmsError, DlmsResult};
use crate::hdlc::address::{reserved, AddressWidth, HdlcAddressPair, ServerAddress};
use crate::hdlc::frame::{FrameLimits, MAX_FRAME_LENGTH};
use crate::hdlc::window::MAX_WINDOW_SIZE;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default information field length in both directions
pub const DEFAULT_MAX_INFORMATION_FIELD_LENGTH: u16 = 128;

/// Default window size in both directions
pub const DEFAULT_WINDOW_SIZE: u8 = 1;

/// Default reassembly limit for one message
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 64 * 1024;

const FORMAT_IDENTIFIER: u8 = 0x81;
const GROUP_IDENTIFIER: u8 = 0x80;
const MAX_INFO_TX_ID: u8 = 0x05;
const MAX_INFO_RX_ID: u8 = 0x06;
const WINDOW_TX_ID: u8 = 0x07;
const WINDOW_RX_ID: u8 = 0x08;

/// Settings of one HDLC link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HdlcSettings {
    /// How long to wait for the peer before a wait counts as a timeout
    pub response_timeout: Duration,
    pub address_width: AddressWidth,
    /// Upper bound for information fields read from the peer
    pub max_information_field_length_rx: u16,
    /// Upper bound for information fields sent to the peer
    pub max_information_field_length_tx: u16,
    /// Outstanding I-frames allowed before waiting for an acknowledgement (1..=7)
    pub window_size: u8,
    /// Consecutive timeouts tolerated before the link is declared lost
    pub max_retries: u32,
    pub client_address: u8,
    pub server_address: ServerAddress,
    /// Frames address a physical device; enables the event-reporting address
    pub calling_physical_device: bool,
    /// Terminate every frame with a flag
    pub closing_flag: bool,
    /// Exchange [`LinkParameters`] in SNRM/UA
    pub negotiate_parameters: bool,
    /// Largest reassembled message accepted from the peer
    pub max_message_length: usize,
}

impl HdlcSettings {
    pub fn new(client_address: u8, server_address: ServerAddress) -> Self {
        Self {
            client_address,
            server_address,
            ..Self::default()
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_address_width(mut self, width: AddressWidth) -> Self {
        self.address_width = width;
        self
    }

    /// Set the receive and transmit information field limits
    pub fn with_max_information_field_length(mut self, rx: u16, tx: u16) -> Self {
        self.max_information_field_length_rx = rx;
        self.max_information_field_length_tx = tx;
        self
    }

    pub fn with_window_size(mut self, window_size: u8) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_calling_physical_device(mut self, calling_physical_device: bool) -> Self {
        self.calling_physical_device = calling_physical_device;
        self
    }

    pub fn with_closing_flag(mut self, closing_flag: bool) -> Self {
        self.closing_flag = closing_flag;
        self
    }

    pub fn with_negotiation(mut self, negotiate_parameters: bool) -> Self {
        self.negotiate_parameters = negotiate_parameters;
        self
    }

    pub fn with_max_message_length(mut self, max_message_length: usize) -> Self {
        self.max_message_length = max_message_length;
        self
    }

    /// Largest information field that fits the 11-bit length field under the
    /// configured address width
    pub fn information_field_ceiling(&self) -> u16 {
        let overhead = 2 + self.address_width.octets() + 1 + 1 + 2 + 2;
        (MAX_FRAME_LENGTH - overhead) as u16
    }

    /// Check the settings for consistency
    ///
    /// # Errors
    /// `DlmsError::Configuration` describing the first offending value
    pub fn validate(&self) -> DlmsResult<()> {
        if self.response_timeout.is_zero() {
            return Err(DlmsError::Configuration(
                "response timeout must be greater than zero".to_string(),
            ));
        }
        if self.window_size == 0 || self.window_size > MAX_WINDOW_SIZE {
            return Err(DlmsError::Configuration(format!(
                "window size must be 1..={}, got {}",
                MAX_WINDOW_SIZE, self.window_size
            )));
        }
        let ceiling = self.information_field_ceiling();
        for (name, value) in [
            ("receive", self.max_information_field_length_rx),
            ("transmit", self.max_information_field_length_tx),
        ] {
            if value == 0 || value > ceiling {
                return Err(DlmsError::Configuration(format!(
                    "max {} information field length must be 1..={}, got {}",
                    name, ceiling, value
                )));
            }
        }
        if self.client_address > 0x7F {
            return Err(DlmsError::Configuration(format!(
                "client address 0x{:02X} exceeds 0x7F",
                self.client_address
            )));
        }
        self.server_address
            .encode(self.address_width, self.calling_physical_device)
            .map_err(|e| DlmsError::Configuration(format!("server address: {}", e)))?;
        if self.max_message_length == 0 {
            return Err(DlmsError::Configuration(
                "max message length must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Values the frame codec needs
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            address_width: self.address_width,
            max_information_rx: self.max_information_field_length_rx as usize,
            max_information_tx: self.max_information_field_length_tx as usize,
            calling_physical_device: self.calling_physical_device,
        }
    }

    pub fn address_pair(&self) -> HdlcAddressPair {
        HdlcAddressPair::new(self.client_address, self.server_address)
    }

    /// Parameters this side proposes (or starts from) in a negotiation
    pub fn link_parameters(&self) -> LinkParameters {
        LinkParameters {
            max_information_field_length_tx: self.max_information_field_length_tx,
            max_information_field_length_rx: self.max_information_field_length_rx,
            window_size_tx: self.window_size,
            window_size_rx: self.window_size,
        }
    }
}

impl Default for HdlcSettings {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(5),
            address_width: AddressWidth::One,
            max_information_field_length_rx: DEFAULT_MAX_INFORMATION_FIELD_LENGTH,
            max_information_field_length_tx: DEFAULT_MAX_INFORMATION_FIELD_LENGTH,
            window_size: DEFAULT_WINDOW_SIZE,
            max_retries: 3,
            client_address: reserved::CLIENT_PUBLIC_CLIENT,
            server_address: ServerAddress::new(reserved::SERVER_UPPER_MANAGEMENT_LOGICAL_DEVICE),
            calling_physical_device: false,
            closing_flag: true,
            negotiate_parameters: true,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }
}

/// Negotiable link parameters, seen from the side that sends them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkParameters {
    pub max_information_field_length_tx: u16,
    pub max_information_field_length_rx: u16,
    pub window_size_tx: u8,
    pub window_size_rx: u8,
}

impl LinkParameters {
    /// Combine local parameters with the peer's
    ///
    /// The peer's receive limits bound what this side may send and vice versa;
    /// the result never exceeds either side.
    pub fn negotiate(&self, peer: &LinkParameters) -> LinkParameters {
        LinkParameters {
            max_information_field_length_tx: self
                .max_information_field_length_tx
                .min(peer.max_information_field_length_rx),
            max_information_field_length_rx: self
                .max_information_field_length_rx
                .min(peer.max_information_field_length_tx),
            window_size_tx: self.window_size_tx.min(peer.window_size_rx),
            window_size_rx: self.window_size_rx.min(peer.window_size_tx),
        }
    }

    /// Encode the negotiation block
    pub fn encode(&self) -> Vec<u8> {
        let mut group = Vec::with_capacity(20);
        put_length(&mut group, MAX_INFO_TX_ID, self.max_information_field_length_tx);
        put_length(&mut group, MAX_INFO_RX_ID, self.max_information_field_length_rx);
        put_window(&mut group, WINDOW_TX_ID, self.window_size_tx);
        put_window(&mut group, WINDOW_RX_ID, self.window_size_rx);

        let mut result = Vec::with_capacity(group.len() + 3);
        result.push(FORMAT_IDENTIFIER);
        result.push(GROUP_IDENTIFIER);
        result.push(group.len() as u8);
        result.extend_from_slice(&group);
        result
    }

    /// Decode a negotiation block
    ///
    /// Parameters the peer leaves out keep their IEC 62056-46 defaults and
    /// unknown parameters are skipped.
    ///
    /// # Errors
    /// `DlmsError::Protocol` if the block is truncated, carries the wrong
    /// identifiers, or proposes a zero length or window.
    pub fn decode(info_field: &[u8]) -> DlmsResult<Self> {
        if info_field.len() < 3 {
            return Err(DlmsError::Protocol(format!(
                "negotiation block too short: {} bytes",
                info_field.len()
            )));
        }
        if info_field[0] != FORMAT_IDENTIFIER || info_field[1] != GROUP_IDENTIFIER {
            return Err(DlmsError::Protocol(format!(
                "invalid negotiation identifiers: 0x{:02X} 0x{:02X}",
                info_field[0], info_field[1]
            )));
        }
        let group_length = info_field[2] as usize;
        let mut rest = info_field.get(3..3 + group_length).ok_or_else(|| {
            DlmsError::Protocol(format!(
                "negotiation group of {} bytes truncated to {}",
                group_length,
                info_field.len() - 3
            ))
        })?;

        let mut params = LinkParameters::default();
        while !rest.is_empty() {
            let (id, length) = match rest {
                [id, length, ..] => (*id, *length as usize),
                _ => {
                    return Err(DlmsError::Protocol(
                        "negotiation parameter header truncated".to_string(),
                    ));
                }
            };
            let value_bytes = rest.get(2..2 + length).ok_or_else(|| {
                DlmsError::Protocol(format!("negotiation parameter 0x{:02X} truncated", id))
            })?;
            rest = &rest[2 + length..];

            let known = matches!(id, MAX_INFO_TX_ID | MAX_INFO_RX_ID | WINDOW_TX_ID | WINDOW_RX_ID);
            if !known {
                log::debug!("Skipping unknown negotiation parameter 0x{:02X}", id);
                continue;
            }
            if !(1..=4).contains(&length) {
                return Err(DlmsError::Protocol(format!(
                    "negotiation parameter 0x{:02X} has length {}",
                    id, length
                )));
            }
            let value = value_bytes
                .iter()
                .fold(0u32, |acc, &b| (acc << 8) | b as u32);
            if value == 0 {
                return Err(DlmsError::Protocol(format!(
                    "negotiation parameter 0x{:02X} is zero",
                    id
                )));
            }

            let length_value = value.min(u16::MAX as u32) as u16;
            let window_value = value.min(MAX_WINDOW_SIZE as u32) as u8;
            match id {
                MAX_INFO_TX_ID => params.max_information_field_length_tx = length_value,
                MAX_INFO_RX_ID => params.max_information_field_length_rx = length_value,
                WINDOW_TX_ID => params.window_size_tx = window_value,
                _ => params.window_size_rx = window_value,
            }
        }
        Ok(params)
    }
}

impl Default for LinkParameters {
    fn default() -> Self {
        Self {
            max_information_field_length_tx: DEFAULT_MAX_INFORMATION_FIELD_LENGTH,
            max_information_field_length_rx: DEFAULT_MAX_INFORMATION_FIELD_LENGTH,
            window_size_tx: DEFAULT_WINDOW_SIZE,
            window_size_rx: DEFAULT_WINDOW_SIZE,
        }
    }
}

fn put_length(buf: &mut Vec<u8>, id: u8, value: u16) {
    buf.push(id);
    if value <= 0xFF {
        buf.push(1);
        buf.push(value as u8);
    } else {
        buf.push(2);
        buf.extend_from_slice(&value.to_be_bytes());
    }
}

fn put_window(buf: &mut Vec<u8>, id: u8, value: u8) {
    buf.push(id);
    buf.push(4);
    buf.extend_from_slice(&(value as u32).to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::value::{Error as ValueError, U8Deserializer};
    use serde::de::IntoDeserializer;

    #[test]
    fn test_defaults_are_valid() {
        let settings = HdlcSettings::default();
        settings.validate().unwrap();
        assert_eq!(settings.response_timeout, Duration::from_secs(5));
        assert_eq!(settings.window_size, 1);
        assert_eq!(settings.max_information_field_length_rx, 128);
        assert_eq!(settings.client_address, 0x10);
        assert_eq!(settings.address_pair().server(), ServerAddress::new(0x01));
        assert!(settings.closing_flag);
    }

    #[test]
    fn test_validation_failures() {
        let bad = [
            HdlcSettings::default().with_window_size(0),
            HdlcSettings::default().with_window_size(8),
            HdlcSettings::default().with_max_information_field_length(0, 128),
            HdlcSettings::default().with_max_information_field_length(128, 2040),
            HdlcSettings::default().with_response_timeout(Duration::ZERO),
            HdlcSettings::default().with_max_message_length(0),
            HdlcSettings::new(0x80, ServerAddress::new(0x01)),
            HdlcSettings::new(0x10, ServerAddress::with_physical(0x01, 0x11)),
            HdlcSettings::new(0x10, ServerAddress::new(0x01)).with_address_width(AddressWidth::Two),
        ];
        for settings in bad {
            assert!(
                matches!(settings.validate(), Err(DlmsError::Configuration(_))),
                "{:?}",
                settings
            );
        }
    }

    #[test]
    fn test_information_field_ceiling() {
        let settings = HdlcSettings::default();
        assert_eq!(settings.information_field_ceiling(), 2038);
        let settings = settings.with_address_width(AddressWidth::Four);
        assert_eq!(settings.information_field_ceiling(), 2035);
    }

    #[test]
    fn test_address_width_deserializes_from_octets() {
        let width: U8Deserializer<ValueError> = 2u8.into_deserializer();
        assert_eq!(AddressWidth::deserialize(width).unwrap(), AddressWidth::Two);

        let width: U8Deserializer<ValueError> = 3u8.into_deserializer();
        assert!(AddressWidth::deserialize(width).is_err());
    }

    #[test]
    fn test_encode_default_block() {
        let encoded = LinkParameters::default().encode();
        assert_eq!(
            encoded,
            vec![
                0x81, 0x80, 0x12, 0x05, 0x01, 0x80, 0x06, 0x01, 0x80, 0x07, 0x04, 0x00, 0x00,
                0x00, 0x01, 0x08, 0x04, 0x00, 0x00, 0x00, 0x01,
            ]
        );
        assert_eq!(LinkParameters::decode(&encoded).unwrap(), LinkParameters::default());
    }

    #[test]
    fn test_two_byte_lengths() {
        let params = LinkParameters {
            max_information_field_length_tx: 0x0400,
            max_information_field_length_rx: 0x00F0,
            window_size_tx: 7,
            window_size_rx: 3,
        };
        let encoded = params.encode();
        assert_eq!(&encoded[3..7], &[0x05, 0x02, 0x04, 0x00]);
        assert_eq!(encoded[2] as usize, encoded.len() - 3);
        assert_eq!(LinkParameters::decode(&encoded).unwrap(), params);
    }

    #[test]
    fn test_decode_skips_unknown_and_keeps_defaults() {
        let block = [0x81, 0x80, 0x07, 0x09, 0x02, 0xAA, 0xBB, 0x06, 0x01, 0x40];
        let params = LinkParameters::decode(&block).unwrap();
        assert_eq!(params.max_information_field_length_rx, 0x40);
        assert_eq!(params.max_information_field_length_tx, 128);
        assert_eq!(params.window_size_tx, 1);
    }

    #[test]
    fn test_decode_rejects_bad_blocks() {
        assert!(LinkParameters::decode(&[0x81]).is_err());
        assert!(LinkParameters::decode(&[0x82, 0x80, 0x00]).is_err());
        assert!(LinkParameters::decode(&[0x81, 0x80, 0x05, 0x05, 0x01]).is_err());
        assert!(LinkParameters::decode(&[0x81, 0x80, 0x03, 0x05, 0x01, 0x00]).is_err());
        assert!(LinkParameters::decode(&[0x81, 0x80, 0x07, 0x05, 0x05, 1, 2, 3, 4, 5]).is_err());
    }

    #[test]
    fn test_negotiate_takes_minimum() {
        let client = LinkParameters {
            max_information_field_length_tx: 512,
            max_information_field_length_rx: 256,
            window_size_tx: 7,
            window_size_rx: 7,
        };
        let server = LinkParameters {
            max_information_field_length_tx: 128,
            max_information_field_length_rx: 1024,
            window_size_tx: 1,
            window_size_rx: 3,
        };
        let answer = server.negotiate(&client);
        assert_eq!(answer.max_information_field_length_tx, 128);
        assert_eq!(answer.max_information_field_length_rx, 512);
        assert_eq!(answer.window_size_tx, 1);
        assert_eq!(answer.window_size_rx, 3);

        let applied = client.negotiate(&answer);
        assert_eq!(applied.max_information_field_length_tx, 512);
        assert_eq!(applied.max_information_field_length_rx, 128);
        assert_eq!(applied.window_size_tx, 3);
        assert_eq!(applied.window_size_rx, 1);
    }
}
