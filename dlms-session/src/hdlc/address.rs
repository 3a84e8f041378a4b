//! HDLC address types
//!
//! A server (meter) address is a logical device id plus an optional physical
//! device id and takes 1, 2 or 4 octets on the wire. A client address is always
//! one octet. Every octet carries seven address bits shifted left by one; the
//! low bit is set only on the final octet of an address.

use crate::error::{DlmsError, DlmsResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved HDLC addresses
pub mod reserved {
    /// Guaranteed to be received by no one
    pub const NO_STATION: u16 = 0x00;

    /// Client management process
    pub const CLIENT_MANAGEMENT_PROCESS: u8 = 0x01;

    /// Client public client
    pub const CLIENT_PUBLIC_CLIENT: u8 = 0x10;

    /// Server upper management logical device
    pub const SERVER_UPPER_MANAGEMENT_LOGICAL_DEVICE: u16 = 0x01;

    /// Server all stations (1 byte form)
    pub const SERVER_ALL_STATIONS_1BYTE: u16 = 0x7F;

    /// Server all stations (2 byte form)
    pub const SERVER_ALL_STATIONS_2BYTE: u16 = 0x3FFF;

    /// Physical part of the event-reporting address
    pub const SERVER_EVENT_REPORTING_PHYSICAL: u16 = 0x0001;
}

const ONE_BYTE_UPPER_BOUND: u16 = 0x7F;
const TWO_BYTE_UPPER_BOUND: u16 = 0x3FFF;

/// Negotiated width of the server address, fixed for the lifetime of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AddressWidth {
    /// Logical device id only
    #[default]
    One,
    /// 7-bit logical + 7-bit physical id
    Two,
    /// 14-bit logical + 14-bit physical id
    Four,
}

impl AddressWidth {
    /// Number of octets this width occupies on the wire
    pub fn octets(self) -> usize {
        match self {
            AddressWidth::One => 1,
            AddressWidth::Two => 2,
            AddressWidth::Four => 4,
        }
    }

    fn component_bound(self) -> u16 {
        match self {
            AddressWidth::One | AddressWidth::Two => ONE_BYTE_UPPER_BOUND,
            AddressWidth::Four => TWO_BYTE_UPPER_BOUND,
        }
    }
}

impl TryFrom<u8> for AddressWidth {
    type Error = DlmsError;

    fn try_from(value: u8) -> DlmsResult<Self> {
        match value {
            1 => Ok(AddressWidth::One),
            2 => Ok(AddressWidth::Two),
            4 => Ok(AddressWidth::Four),
            other => Err(DlmsError::Configuration(format!(
                "server address width must be 1, 2 or 4 bytes, got {}",
                other
            ))),
        }
    }
}

impl From<AddressWidth> for u8 {
    fn from(width: AddressWidth) -> u8 {
        width.octets() as u8
    }
}

/// Server (meter side) HDLC address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerAddress {
    logical_id: u16,
    physical_id: Option<u16>,
}

impl ServerAddress {
    /// Address with a logical device id only (1 byte form)
    pub fn new(logical_id: u16) -> Self {
        Self {
            logical_id,
            physical_id: None,
        }
    }

    /// Address with logical and physical device id (2 or 4 byte form)
    pub fn with_physical(logical_id: u16, physical_id: u16) -> Self {
        Self {
            logical_id,
            physical_id: Some(physical_id),
        }
    }

    /// All-station broadcast address for the given width
    pub fn broadcast(width: AddressWidth) -> Self {
        match width {
            AddressWidth::One => Self::new(reserved::SERVER_ALL_STATIONS_1BYTE),
            AddressWidth::Two | AddressWidth::Four => Self::with_physical(
                reserved::SERVER_ALL_STATIONS_2BYTE,
                reserved::SERVER_ALL_STATIONS_2BYTE,
            ),
        }
    }

    /// Event-reporting address (only valid towards a physical device)
    pub fn event_reporting() -> Self {
        Self::with_physical(
            reserved::SERVER_ALL_STATIONS_2BYTE,
            reserved::SERVER_EVENT_REPORTING_PHYSICAL,
        )
    }

    pub fn logical_id(&self) -> u16 {
        self.logical_id
    }

    pub fn physical_id(&self) -> Option<u16> {
        self.physical_id
    }

    /// Check if this is an all-station (broadcast) address
    pub fn is_all_station(&self) -> bool {
        match self.physical_id {
            None => self.logical_id == reserved::SERVER_ALL_STATIONS_1BYTE,
            Some(physical) => {
                self.logical_id == reserved::SERVER_ALL_STATIONS_2BYTE
                    && physical == reserved::SERVER_ALL_STATIONS_2BYTE
            }
        }
    }

    pub fn is_event_reporting(&self) -> bool {
        self.logical_id == reserved::SERVER_ALL_STATIONS_2BYTE
            && self.physical_id == Some(reserved::SERVER_EVENT_REPORTING_PHYSICAL)
    }

    /// Special addresses that always travel in the 4-byte form, even when the
    /// link is configured for a narrower width
    fn uses_long_form(&self, width: AddressWidth) -> bool {
        width != AddressWidth::Four
            && (self.is_event_reporting()
                || (self.physical_id.is_some() && self.is_all_station()))
    }

    /// Number of octets [`encode`](Self::encode) produces under `width`
    pub fn encoded_len(&self, width: AddressWidth) -> usize {
        if self.uses_long_form(width) {
            4
        } else {
            width.octets()
        }
    }

    /// Encode address to bytes
    ///
    /// # Errors
    /// `DlmsError::InvalidValue` when a component does not fit the width, when a
    /// physical id is given for width 1 or missing for width 2/4, or when the
    /// event-reporting address is used without `calling_physical_device`.
    pub fn encode(&self, width: AddressWidth, calling_physical_device: bool) -> DlmsResult<Vec<u8>> {
        let event_allowed = width == AddressWidth::Four
            || (width == AddressWidth::Two && calling_physical_device);
        if self.is_event_reporting() && !event_allowed {
            return Err(DlmsError::InvalidValue(
                "event-reporting address requires a 2-byte frame calling a physical device"
                    .to_string(),
            ));
        }
        if self.uses_long_form(width) {
            let physical = self.physical_id.unwrap_or(reserved::SERVER_ALL_STATIONS_2BYTE);
            return Ok(four_octets(self.logical_id, physical).to_vec());
        }

        let bound = width.component_bound();
        if self.logical_id > bound {
            return Err(DlmsError::InvalidValue(format!(
                "logical device id 0x{:X} exceeds 0x{:X} for {}-byte addresses",
                self.logical_id,
                bound,
                width.octets()
            )));
        }

        match (width, self.physical_id) {
            (AddressWidth::One, None) => Ok(vec![((self.logical_id as u8) << 1) | 0x01]),
            (AddressWidth::One, Some(_)) => Err(DlmsError::InvalidValue(
                "physical device id given for a 1-byte server address".to_string(),
            )),
            (_, None) => Err(DlmsError::InvalidValue(format!(
                "physical device id missing for a {}-byte server address",
                width.octets()
            ))),
            (_, Some(physical)) if physical > bound => Err(DlmsError::InvalidValue(format!(
                "physical device id 0x{:X} exceeds 0x{:X} for {}-byte addresses",
                physical,
                bound,
                width.octets()
            ))),
            (AddressWidth::Two, Some(physical)) => Ok(vec![
                ((self.logical_id as u8) << 1) | 0x01,
                ((physical as u8) << 1) | 0x01,
            ]),
            (AddressWidth::Four, Some(physical)) => {
                Ok(four_octets(self.logical_id, physical).to_vec())
            }
        }
    }

    /// Decode an address from the octets read off the wire
    ///
    /// The 2-byte form sets the low bit on both octets; every other form
    /// carries it on the last octet only.
    ///
    /// # Errors
    /// `DlmsError::MalformedSegment` on any terminator pattern inconsistent
    /// with `width`.
    pub fn decode(octets: &[u8], width: AddressWidth, calling_physical_device: bool) -> DlmsResult<Self> {
        let seven = |b: u8| ((b & 0xFE) >> 1) as u16;
        if width == AddressWidth::Two && octets.len() == 2 {
            if octets.iter().any(|b| b & 0x01 == 0) {
                return Err(DlmsError::MalformedSegment(format!(
                    "2-byte server address without terminator bits: {:02X?}",
                    octets
                )));
            }
            return Ok(Self::with_physical(seven(octets[0]), seven(octets[1])));
        }

        let terminated = octets.last().is_some_and(|b| b & 0x01 != 0);
        let inner_clear = octets
            .iter()
            .take(octets.len().saturating_sub(1))
            .all(|b| b & 0x01 == 0);
        if !terminated || !inner_clear {
            return Err(DlmsError::MalformedSegment(format!(
                "server address without terminator: {:02X?}",
                octets
            )));
        }

        match (octets.len(), width) {
            (1, AddressWidth::One) => Ok(Self::new(seven(octets[0]))),
            (1, _) => Err(DlmsError::MalformedSegment("short server address".to_string())),
            (2, AddressWidth::One) => {
                let lower = seven(octets[1]);
                if lower == reserved::SERVER_ALL_STATIONS_1BYTE {
                    Ok(Self::new(lower))
                } else {
                    Err(DlmsError::MalformedSegment("long server address".to_string()))
                }
            }
            (2, _) => Ok(Self::with_physical(seven(octets[0]), seven(octets[1]))),
            (4, width) => {
                let upper = (seven(octets[0]) << 7) | seven(octets[1]);
                let lower = (seven(octets[2]) << 7) | seven(octets[3]);
                let address = Self::with_physical(upper, lower);
                match width {
                    AddressWidth::Four => Ok(address),
                    _ if address.is_all_station() => Ok(address),
                    AddressWidth::Two if address.is_event_reporting() && calling_physical_device => {
                        Ok(address)
                    }
                    _ => Err(DlmsError::MalformedSegment("long server address".to_string())),
                }
            }
            (n, _) => Err(DlmsError::MalformedSegment(format!(
                "server address of {} octets",
                n
            ))),
        }
    }
}

fn four_octets(logical: u16, physical: u16) -> [u8; 4] {
    [
        (((logical >> 7) & 0x7F) as u8) << 1,
        ((logical & 0x7F) as u8) << 1,
        (((physical >> 7) & 0x7F) as u8) << 1,
        (((physical & 0x7F) as u8) << 1) | 0x01,
    ]
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.logical_id)?;
        if let Some(physical) = self.physical_id {
            write!(f, "-{:04X}", physical)?;
        }
        Ok(())
    }
}

/// Encode a one-octet client address
pub fn encode_client_address(client_id: u8) -> DlmsResult<u8> {
    if client_id as u16 > ONE_BYTE_UPPER_BOUND {
        return Err(DlmsError::InvalidValue(format!(
            "client id 0x{:02X} exceeds 0x7F",
            client_id
        )));
    }
    Ok((client_id << 1) | 0x01)
}

/// Decode a one-octet client address
pub fn decode_client_address(octet: u8) -> DlmsResult<u8> {
    if octet & 0x01 == 0 {
        return Err(DlmsError::MalformedSegment("long client address".to_string()));
    }
    Ok(octet >> 1)
}

/// Client and server address of one link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HdlcAddressPair {
    client: u8,
    server: ServerAddress,
}

impl HdlcAddressPair {
    /// Create a new address pair
    pub fn new(client: u8, server: ServerAddress) -> Self {
        Self { client, server }
    }

    pub fn client(&self) -> u8 {
        self.client
    }

    pub fn server(&self) -> ServerAddress {
        self.server
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_from_u8() {
        assert_eq!(AddressWidth::try_from(2).unwrap(), AddressWidth::Two);
        assert_eq!(u8::from(AddressWidth::Four), 4);
        assert!(matches!(
            AddressWidth::try_from(3),
            Err(DlmsError::Configuration(_))
        ));
    }

    #[test]
    fn test_one_byte_boundary() {
        let encoded = ServerAddress::new(0x7F).encode(AddressWidth::One, false).unwrap();
        assert_eq!(encoded, vec![0xFF]);

        let err = ServerAddress::new(0x80).encode(AddressWidth::One, false).unwrap_err();
        assert!(matches!(err, DlmsError::InvalidValue(_)));
    }

    #[test]
    fn test_two_byte_boundary() {
        let encoded = ServerAddress::with_physical(0x7F, 0x7F)
            .encode(AddressWidth::Two, false)
            .unwrap();
        assert_eq!(encoded, vec![0xFF, 0xFF]);

        assert!(matches!(
            ServerAddress::with_physical(0x80, 0x01).encode(AddressWidth::Two, false),
            Err(DlmsError::InvalidValue(_))
        ));
        assert!(matches!(
            ServerAddress::with_physical(0x01, 0x80).encode(AddressWidth::Two, false),
            Err(DlmsError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_physical_presence_must_match_width() {
        assert!(ServerAddress::with_physical(1, 2)
            .encode(AddressWidth::One, false)
            .is_err());
        assert!(ServerAddress::new(1).encode(AddressWidth::Two, false).is_err());
        assert!(ServerAddress::new(1).encode(AddressWidth::Four, false).is_err());
    }

    #[test]
    fn test_four_byte_encode_decode() {
        let addr = ServerAddress::with_physical(0x1234, 0x3FFE);
        let encoded = addr.encode(AddressWidth::Four, false).unwrap();
        assert_eq!(encoded, vec![0x48, 0x68, 0xFE, 0xFD]);
        assert_eq!(
            ServerAddress::decode(&encoded, AddressWidth::Four, false).unwrap(),
            addr
        );
    }

    #[test]
    fn test_two_byte_form_terminates_both_octets() {
        let addr = ServerAddress::with_physical(0x01, 0x11);
        let encoded = addr.encode(AddressWidth::Two, false).unwrap();
        assert_eq!(encoded, vec![0x03, 0x23]);
        assert_eq!(
            ServerAddress::decode(&[0x03, 0x23], AddressWidth::Two, false).unwrap(),
            addr
        );

        assert!(ServerAddress::decode(&[0x02, 0x23], AddressWidth::Two, false)
            .unwrap_err()
            .is_malformed());
        assert!(ServerAddress::decode(&[0x03, 0x22], AddressWidth::Two, false)
            .unwrap_err()
            .is_malformed());
    }

    #[test]
    fn test_short_and_long_addresses_rejected() {
        assert!(ServerAddress::decode(&[0x03], AddressWidth::Two, false)
            .unwrap_err()
            .is_malformed());
        assert!(ServerAddress::decode(&[0x02, 0x23], AddressWidth::One, false)
            .unwrap_err()
            .is_malformed());
        assert!(ServerAddress::decode(&[0x02, 0x04, 0x23], AddressWidth::Four, false)
            .unwrap_err()
            .is_malformed());
        assert!(ServerAddress::decode(&[0x02, 0x04, 0x06, 0x08], AddressWidth::Four, false)
            .unwrap_err()
            .is_malformed());
    }

    #[test]
    fn test_broadcast_under_narrow_widths() {
        let decoded = ServerAddress::decode(&[0x00, 0xFF], AddressWidth::One, false).unwrap();
        assert_eq!(decoded, ServerAddress::broadcast(AddressWidth::One));

        let broadcast = ServerAddress::broadcast(AddressWidth::Two);
        let encoded = broadcast.encode(AddressWidth::Two, false).unwrap();
        assert_eq!(encoded, vec![0xFE, 0xFE, 0xFE, 0xFF]);
        assert_eq!(broadcast.encoded_len(AddressWidth::Two), 4);
        assert_eq!(
            ServerAddress::decode(&encoded, AddressWidth::Two, false).unwrap(),
            broadcast
        );
        assert_eq!(
            ServerAddress::decode(&encoded, AddressWidth::One, false).unwrap(),
            broadcast
        );
    }

    #[test]
    fn test_event_reporting_needs_physical_device_call() {
        let event = ServerAddress::event_reporting();
        assert!(event.encode(AddressWidth::Two, false).is_err());

        let encoded = event.encode(AddressWidth::Two, true).unwrap();
        assert_eq!(encoded, vec![0xFE, 0xFE, 0x00, 0x03]);
        assert_eq!(
            ServerAddress::decode(&encoded, AddressWidth::Two, true).unwrap(),
            event
        );
        assert!(ServerAddress::decode(&encoded, AddressWidth::Two, false)
            .unwrap_err()
            .is_malformed());
    }

    #[test]
    fn test_client_address() {
        assert_eq!(encode_client_address(0x10).unwrap(), 0x21);
        assert_eq!(decode_client_address(0x21).unwrap(), 0x10);
        assert!(encode_client_address(0x80).is_err());
        assert!(decode_client_address(0x20).unwrap_err().is_malformed());
    }

    #[test]
    fn test_display() {
        assert_eq!(ServerAddress::new(0x01).to_string(), "0001");
        assert_eq!(ServerAddress::with_physical(0x01, 0x11).to_string(), "0001-0011");
    }
}
