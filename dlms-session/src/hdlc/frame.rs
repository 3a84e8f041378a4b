//! HDLC frame structure and encoding/decoding
//!
//! Wire layout (flags are handled by the scanner and writer):
//!
//! ```text
//! A0|seg<<3|len_hi  len_lo | dst | src | control | HCS | [info | FCS]
//! ```

use crate::error::{DlmsError, DlmsResult};
use crate::hdlc::address::{
    decode_client_address, encode_client_address, AddressWidth, HdlcAddressPair, ServerAddress,
};
use crate::hdlc::control::{ControlField, FrameType};
use crate::hdlc::fcs::FcsCalc;
use bytes::{BufMut, BytesMut};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};

/// HDLC frame flag
pub const FLAG: u8 = 0x7E;

/// Frame format type 3 (high nibble of the first format octet)
pub const FORMAT_TYPE: u8 = 0xA0;

/// Segmentation bit in the first format octet
pub const SEGMENTATION_BIT: u8 = 0x08;

/// Largest value the 11-bit length field can hold
pub const MAX_FRAME_LENGTH: usize = 0x07FF;

const LENGTH_MASK: u16 = 0x07FF;
const MAX_ADDRESS_OCTETS: usize = 4;

/// Who built the frame and which way it travels
///
/// The destination address always comes first on the wire, and inbound frames
/// are bounded by the receive maximum while outbound frames are bounded by the
/// transmit maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameDirection {
    /// Written by a client, addressed to the server
    ClientOutbound,
    /// Read by a client, sent by the server
    ClientInbound,
    /// Written by a server, addressed to the client
    ServerOutbound,
    /// Read by a server, sent by the client
    ServerInbound,
}

impl FrameDirection {
    /// Check if the server address is the destination (first on the wire)
    pub fn server_address_first(self) -> bool {
        matches!(
            self,
            FrameDirection::ClientOutbound | FrameDirection::ServerInbound
        )
    }

    pub fn is_inbound(self) -> bool {
        matches!(
            self,
            FrameDirection::ClientInbound | FrameDirection::ServerInbound
        )
    }
}

/// Link-wide values the frame codec depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub address_width: AddressWidth,
    pub max_information_rx: usize,
    pub max_information_tx: usize,
    /// Frames address a physical device (enables the event-reporting address)
    pub calling_physical_device: bool,
}

impl FrameLimits {
    /// Maximum information field length for frames travelling in `direction`
    pub fn max_information(&self, direction: FrameDirection) -> usize {
        if direction.is_inbound() {
            self.max_information_rx
        } else {
            self.max_information_tx
        }
    }
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            address_width: AddressWidth::One,
            max_information_rx: 128,
            max_information_tx: 128,
            calling_physical_device: false,
        }
    }
}

/// HDLC frame
///
/// Equality compares what goes on the wire: the declared length of a decoded
/// frame is ignored, and directions are equal when they order the addresses
/// the same way (a `ClientOutbound` frame decodes as `ServerInbound`).
#[derive(Debug, Clone)]
pub struct HdlcFrame {
    direction: FrameDirection,
    control: ControlField,
    segmented: bool,
    length: Option<u16>,
    address_pair: HdlcAddressPair,
    information_field: Vec<u8>,
}

impl HdlcFrame {
    /// Create a new HDLC frame without information field
    pub fn new(direction: FrameDirection, address_pair: HdlcAddressPair, control: ControlField) -> Self {
        Self {
            direction,
            control,
            segmented: false,
            length: None,
            address_pair,
            information_field: Vec::new(),
        }
    }

    /// Create an I-frame
    pub fn new_information(
        direction: FrameDirection,
        address_pair: HdlcAddressPair,
        send_sequence: u8,
        receive_sequence: u8,
        poll_final: bool,
        information_field: Vec<u8>,
        segmented: bool,
    ) -> Self {
        Self::new(
            direction,
            address_pair,
            ControlField::information(send_sequence, receive_sequence, poll_final),
        )
        .with_information(information_field)
        .with_segmented(segmented)
    }

    /// Attach an information field
    pub fn with_information(mut self, information_field: Vec<u8>) -> Self {
        self.information_field = information_field;
        self
    }

    /// Set the segmentation flag
    pub fn with_segmented(mut self, segmented: bool) -> Self {
        self.segmented = segmented;
        self
    }

    pub fn direction(&self) -> FrameDirection {
        self.direction
    }

    pub fn control(&self) -> ControlField {
        self.control
    }

    /// Get frame type
    pub fn frame_type(&self) -> FrameType {
        self.control.frame_type()
    }

    pub fn poll_final(&self) -> bool {
        self.control.poll_final()
    }

    /// Get send sequence number
    pub fn send_sequence(&self) -> Option<u8> {
        self.control.send_sequence()
    }

    /// Get receive sequence number
    pub fn receive_sequence(&self) -> Option<u8> {
        self.control.receive_sequence()
    }

    /// Check if frame is segmented
    pub fn is_segmented(&self) -> bool {
        self.segmented
    }

    /// Declared length of a decoded frame
    pub fn length(&self) -> Option<u16> {
        self.length
    }

    /// Get address pair
    pub fn address_pair(&self) -> HdlcAddressPair {
        self.address_pair
    }

    /// Get information field
    pub fn information_field(&self) -> &[u8] {
        &self.information_field
    }

    pub fn into_information_field(self) -> Vec<u8> {
        self.information_field
    }

    /// Encode the frame without flags
    ///
    /// Every field is validated before anything is produced.
    ///
    /// # Errors
    /// `DlmsError::InvalidValue` if an address or sequence number does not fit,
    /// the information field is not allowed for the frame kind, an I or UI
    /// field exceeds the transmit or receive maximum for the direction, or the
    /// whole frame is longer than 2047 octets.
    pub fn encode(&self, limits: &FrameLimits) -> DlmsResult<BytesMut> {
        let frame_type = self.control.frame_type();
        let has_information = !self.information_field.is_empty();
        if has_information && !frame_type.carries_information() {
            return Err(DlmsError::InvalidValue(format!(
                "{} frames carry no information field",
                frame_type
            )));
        }
        let max_information = limits.max_information(self.direction);
        if frame_type.carries_user_data() && self.information_field.len() > max_information {
            return Err(DlmsError::InvalidValue(format!(
                "information field of {} bytes exceeds the maximum of {}",
                self.information_field.len(),
                max_information
            )));
        }

        let server = self
            .address_pair
            .server()
            .encode(limits.address_width, limits.calling_physical_device)?;
        let client = encode_client_address(self.address_pair.client())?;
        let control = self.control.encode()?;

        let mut length = 2 + server.len() + 1 + 1 + 2;
        if has_information {
            length += self.information_field.len() + 2;
        }
        if length > MAX_FRAME_LENGTH {
            return Err(DlmsError::InvalidValue(format!(
                "frame length {} exceeds {}",
                length, MAX_FRAME_LENGTH
            )));
        }

        let mut buf = BytesMut::with_capacity(length);
        let segmentation = if self.segmented { SEGMENTATION_BIT } else { 0 };
        buf.put_u8(FORMAT_TYPE | segmentation | ((length >> 8) as u8 & 0x07));
        buf.put_u8((length & 0xFF) as u8);
        if self.direction.server_address_first() {
            buf.put_slice(&server);
            buf.put_u8(client);
        } else {
            buf.put_u8(client);
            buf.put_slice(&server);
        }
        buf.put_u8(control);

        let mut fcs = FcsCalc::new();
        fcs.update_bytes(&buf);
        let hcs = fcs.fcs_value_bytes();
        buf.put_slice(&hcs);

        if has_information {
            fcs.update_bytes(&hcs);
            fcs.update_bytes(&self.information_field);
            buf.put_slice(&self.information_field);
            buf.put_slice(&fcs.fcs_value_bytes());
        }
        Ok(buf)
    }

    /// Decode one frame from `reader`, positioned just after the opening flag
    ///
    /// # Errors
    /// `DlmsError::MalformedSegment` for anything wrong with the frame itself,
    /// `DlmsError::Connection` when the channel fails or ends mid-frame.
    pub async fn decode<R>(
        reader: &mut R,
        direction: FrameDirection,
        limits: &FrameLimits,
    ) -> DlmsResult<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut fcs = FcsCalc::new();

        let mut format = [0u8; 2];
        reader.read_exact(&mut format).await?;
        if format[0] & 0xF0 != FORMAT_TYPE {
            return Err(DlmsError::MalformedSegment(format!(
                "illegal frame format 0x{:02X}",
                format[0]
            )));
        }
        fcs.update_bytes(&format);
        let segmented = format[0] & SEGMENTATION_BIT != 0;
        let length = u16::from_be_bytes(format) & LENGTH_MASK;

        let two_octet_server = limits.address_width == AddressWidth::Two;
        let (server_octets, client_octets) = if direction.server_address_first() {
            let server = Self::read_address(reader, &mut fcs, two_octet_server).await?;
            (server, Self::read_address(reader, &mut fcs, false).await?)
        } else {
            let client = Self::read_address(reader, &mut fcs, false).await?;
            (Self::read_address(reader, &mut fcs, two_octet_server).await?, client)
        };
        if client_octets.len() != 1 {
            return Err(DlmsError::MalformedSegment(format!(
                "client address of {} octets",
                client_octets.len()
            )));
        }
        let client = decode_client_address(client_octets[0])?;
        let server = ServerAddress::decode(
            &server_octets,
            limits.address_width,
            limits.calling_physical_device,
        )?;

        let control_octet = reader.read_u8().await?;
        fcs.update(control_octet);
        let control = ControlField::decode(control_octet)?;

        let mut hcs = [0u8; 2];
        reader.read_exact(&mut hcs).await?;
        fcs.update_bytes(&hcs);
        fcs.validate("HCS")?;

        let consumed = 2 + server_octets.len() + client_octets.len() + 1 + 2;
        let declared = length as usize;
        if declared < consumed {
            return Err(DlmsError::MalformedSegment(format!(
                "declared length {} shorter than the {} header octets",
                declared, consumed
            )));
        }

        let remaining = declared - consumed;
        let information_field = if remaining == 0 {
            Vec::new()
        } else {
            if remaining <= 2 {
                return Err(DlmsError::MalformedSegment(format!(
                    "{} trailing octets cannot hold information and FCS",
                    remaining
                )));
            }
            if !control.frame_type().carries_information() {
                return Err(DlmsError::MalformedSegment(format!(
                    "{} frame with information field",
                    control.frame_type()
                )));
            }
            let information_length = remaining - 2;
            let max_information = limits.max_information(direction);
            if control.frame_type().carries_user_data() && information_length > max_information {
                return Err(DlmsError::MalformedSegment(format!(
                    "information field of {} bytes exceeds the maximum of {}",
                    information_length, max_information
                )));
            }

            let mut tail = vec![0u8; remaining];
            reader.read_exact(&mut tail).await?;
            fcs.update_bytes(&tail);
            fcs.validate("FCS")?;
            tail.truncate(information_length);
            tail
        };

        Ok(Self {
            direction,
            control,
            segmented,
            length: Some(length),
            address_pair: HdlcAddressPair::new(client, server),
            information_field,
        })
    }

    /// Read address octets up to the terminator bit, at most four
    ///
    /// With `two_octet_form`, a terminated first octet is followed by exactly
    /// one more (the 2-byte server address terminates both octets).
    async fn read_address<R>(
        reader: &mut R,
        fcs: &mut FcsCalc,
        two_octet_form: bool,
    ) -> DlmsResult<Vec<u8>>
    where
        R: AsyncRead + Unpin,
    {
        let mut octets = Vec::with_capacity(MAX_ADDRESS_OCTETS);
        let first = reader.read_u8().await?;
        fcs.update(first);
        octets.push(first);
        if first & 0x01 != 0 {
            if two_octet_form {
                let second = reader.read_u8().await?;
                fcs.update(second);
                octets.push(second);
            }
            return Ok(octets);
        }

        while octets.len() < MAX_ADDRESS_OCTETS {
            let octet = reader.read_u8().await?;
            fcs.update(octet);
            octets.push(octet);
            if octet & 0x01 != 0 {
                return Ok(octets);
            }
        }
        Err(DlmsError::MalformedSegment(
            "HDLC address is illegal in frame".to_string(),
        ))
    }
}

impl PartialEq for HdlcFrame {
    fn eq(&self, other: &Self) -> bool {
        self.direction.server_address_first() == other.direction.server_address_first()
            && self.control == other.control
            && self.segmented == other.segmented
            && self.address_pair == other.address_pair
            && self.information_field == other.information_field
    }
}

impl Eq for HdlcFrame {}

impl fmt::Display for HdlcFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} client={:02X} server={}",
            self.frame_type(),
            self.address_pair.client(),
            self.address_pair.server()
        )?;
        if let Some(ns) = self.send_sequence() {
            write!(f, " N(S)={}", ns)?;
        }
        if let Some(nr) = self.receive_sequence() {
            write!(f, " N(R)={}", nr)?;
        }
        if self.poll_final() {
            f.write_str(" P/F")?;
        }
        if self.segmented {
            f.write_str(" seg")?;
        }
        write!(f, " info={}", self.information_field.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hdlc::fcs::GOOD_FCS;

    fn pair() -> HdlcAddressPair {
        HdlcAddressPair::new(0x10, ServerAddress::new(0x01))
    }

    #[test]
    fn test_encode_snrm() {
        let frame = HdlcFrame::new(
            FrameDirection::ClientOutbound,
            pair(),
            ControlField::unnumbered(FrameType::SetNormalResponseMode, true),
        );
        let encoded = frame.encode(&FrameLimits::default()).unwrap();
        assert_eq!(&encoded[..], &[0xA0, 0x07, 0x03, 0x21, 0x93, 0x0F, 0x01]);
    }

    #[test]
    fn test_server_outbound_puts_client_first() {
        let frame = HdlcFrame::new(
            FrameDirection::ServerOutbound,
            pair(),
            ControlField::unnumbered(FrameType::UnnumberedAcknowledge, true),
        );
        let encoded = frame.encode(&FrameLimits::default()).unwrap();
        assert_eq!(&encoded[..5], &[0xA0, 0x07, 0x21, 0x03, 0x73]);
    }

    #[test]
    fn test_checksums_validate() {
        let frame = HdlcFrame::new_information(
            FrameDirection::ClientOutbound,
            pair(),
            2,
            5,
            true,
            vec![0xE6, 0xE6, 0x00, 0x01, 0x02, 0x03],
            false,
        );
        let encoded = frame.encode(&FrameLimits::default()).unwrap();
        assert_eq!(encoded.len(), 2 + 1 + 1 + 1 + 2 + 6 + 2);
        assert_eq!(encoded[1] as usize, encoded.len());

        let mut hcs = FcsCalc::new();
        hcs.update_bytes(&encoded[..7]);
        assert_eq!(hcs.value(), GOOD_FCS);

        let mut whole = FcsCalc::new();
        whole.update_bytes(&encoded);
        assert_eq!(whole.value(), GOOD_FCS);
    }

    #[tokio::test]
    async fn test_round_trip_fields() {
        let limits = FrameLimits {
            address_width: AddressWidth::Four,
            ..FrameLimits::default()
        };
        let address_pair = HdlcAddressPair::new(0x7F, ServerAddress::with_physical(0x1234, 0x0011));
        let frame = HdlcFrame::new_information(
            FrameDirection::ClientOutbound,
            address_pair,
            7,
            3,
            false,
            (0..128u8).collect(),
            true,
        );
        let encoded = frame.encode(&limits).unwrap();

        let mut reader = &encoded[..];
        let decoded = HdlcFrame::decode(&mut reader, FrameDirection::ServerInbound, &limits)
            .await
            .unwrap();
        assert!(reader.is_empty());
        assert_eq!(decoded, frame);
        assert!(decoded.is_segmented());
        assert_eq!(decoded.length(), Some(encoded.len() as u16));
        assert_eq!(frame.length(), None);
    }

    #[tokio::test]
    async fn test_round_trip_without_information() {
        let limits = FrameLimits {
            address_width: AddressWidth::Two,
            ..FrameLimits::default()
        };
        let address_pair = HdlcAddressPair::new(0x01, ServerAddress::with_physical(0x01, 0x11));
        let frame = HdlcFrame::new(
            FrameDirection::ServerOutbound,
            address_pair,
            ControlField::receive_ready(4, true),
        );
        let encoded = frame.encode(&limits).unwrap();

        let mut reader = &encoded[..];
        let decoded = HdlcFrame::decode(&mut reader, FrameDirection::ClientInbound, &limits)
            .await
            .unwrap();
        assert_eq!(decoded.frame_type(), FrameType::ReceiveReady);
        assert_eq!(decoded.receive_sequence(), Some(4));
        assert!(decoded.poll_final());
        assert!(!decoded.is_segmented());
        assert_eq!(decoded.address_pair(), address_pair);
        assert!(decoded.information_field().is_empty());
    }

    #[tokio::test]
    async fn test_parameter_block_ignores_information_limit() {
        let limits = FrameLimits {
            max_information_rx: 16,
            max_information_tx: 16,
            ..FrameLimits::default()
        };
        let snrm = HdlcFrame::new(
            FrameDirection::ClientOutbound,
            pair(),
            ControlField::unnumbered(FrameType::SetNormalResponseMode, true),
        )
        .with_information(vec![0x5A; 23]);
        let encoded = snrm.encode(&limits).unwrap();

        let decoded = HdlcFrame::decode(&mut &encoded[..], FrameDirection::ServerInbound, &limits)
            .await
            .unwrap();
        assert_eq!(decoded.information_field(), snrm.information_field());

        let ui = HdlcFrame::new(
            FrameDirection::ClientOutbound,
            pair(),
            ControlField::unnumbered(FrameType::UnnumberedInformation, false),
        )
        .with_information(vec![0x5A; 23]);
        assert!(matches!(ui.encode(&limits), Err(DlmsError::InvalidValue(_))));
    }

    #[tokio::test]
    async fn test_two_byte_server_address_on_the_wire() {
        let limits = FrameLimits {
            address_width: AddressWidth::Two,
            ..FrameLimits::default()
        };
        let address_pair = HdlcAddressPair::new(0x10, ServerAddress::with_physical(0x01, 0x11));
        let frame = HdlcFrame::new(
            FrameDirection::ClientOutbound,
            address_pair,
            ControlField::unnumbered(FrameType::SetNormalResponseMode, true),
        );
        let encoded = frame.encode(&limits).unwrap();
        assert_eq!(&encoded[..5], &[0xA0, 0x08, 0x03, 0x23, 0x21]);

        let decoded = HdlcFrame::decode(&mut &encoded[..], FrameDirection::ServerInbound, &limits)
            .await
            .unwrap();
        assert_eq!(decoded, frame);

        let broadcast = HdlcAddressPair::new(0x10, ServerAddress::broadcast(AddressWidth::Two));
        let frame = HdlcFrame::new(
            FrameDirection::ClientOutbound,
            broadcast,
            ControlField::unnumbered(FrameType::UnnumberedInformation, false),
        );
        let encoded = frame.encode(&limits).unwrap();
        let decoded = HdlcFrame::decode(&mut &encoded[..], FrameDirection::ServerInbound, &limits)
            .await
            .unwrap();
        assert_eq!(decoded.address_pair(), broadcast);
    }

    #[test]
    fn test_information_on_disc_rejected() {
        let frame = HdlcFrame::new(
            FrameDirection::ClientOutbound,
            pair(),
            ControlField::unnumbered(FrameType::Disconnect, true),
        )
        .with_information(vec![0x01]);
        assert!(matches!(
            frame.encode(&FrameLimits::default()),
            Err(DlmsError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_information_limit_depends_on_direction() {
        let limits = FrameLimits {
            max_information_rx: 16,
            max_information_tx: 8,
            ..FrameLimits::default()
        };
        let frame = |direction| {
            HdlcFrame::new_information(direction, pair(), 0, 0, true, vec![0xAA; 12], false)
        };
        assert!(matches!(
            frame(FrameDirection::ClientOutbound).encode(&limits),
            Err(DlmsError::InvalidValue(_))
        ));
        assert!(frame(FrameDirection::ClientInbound).encode(&limits).is_ok());
    }

    #[test]
    fn test_frame_longer_than_length_field_rejected() {
        let limits = FrameLimits {
            max_information_tx: 4096,
            ..FrameLimits::default()
        };
        let frame = HdlcFrame::new_information(
            FrameDirection::ClientOutbound,
            pair(),
            0,
            0,
            true,
            vec![0x00; 2100],
            false,
        );
        assert!(matches!(
            frame.encode(&limits),
            Err(DlmsError::InvalidValue(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_information_is_malformed() {
        let sender = FrameLimits {
            max_information_tx: 64,
            ..FrameLimits::default()
        };
        let receiver = FrameLimits {
            max_information_rx: 32,
            ..FrameLimits::default()
        };
        let frame = HdlcFrame::new_information(
            FrameDirection::ServerOutbound,
            pair(),
            0,
            0,
            true,
            vec![0x55; 64],
            false,
        );
        let encoded = frame.encode(&sender).unwrap();
        let err = HdlcFrame::decode(&mut &encoded[..], FrameDirection::ClientInbound, &receiver)
            .await
            .unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn test_short_declared_length_is_malformed() {
        let mut bytes = vec![0xA0, 0x03, 0x03, 0x21, 0x93];
        let mut fcs = FcsCalc::new();
        fcs.update_bytes(&bytes);
        bytes.extend_from_slice(&fcs.fcs_value_bytes());

        let err = HdlcFrame::decode(
            &mut &bytes[..],
            FrameDirection::ServerInbound,
            &FrameLimits::default(),
        )
        .await
        .unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn test_bad_hcs_is_malformed() {
        let bytes = [0xA0, 0x07, 0x03, 0x21, 0x93, 0x0F, 0x02];
        let err = HdlcFrame::decode(
            &mut &bytes[..],
            FrameDirection::ServerInbound,
            &FrameLimits::default(),
        )
        .await
        .unwrap_err();
        assert!(err.is_malformed());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_fatal() {
        let bytes = [0xA0, 0x07, 0x03];
        let err = HdlcFrame::decode(
            &mut &bytes[..],
            FrameDirection::ServerInbound,
            &FrameLimits::default(),
        )
        .await
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_display() {
        let frame = HdlcFrame::new(
            FrameDirection::ClientOutbound,
            pair(),
            ControlField::receive_ready(3, true),
        );
        assert_eq!(frame.to_string(), "RR client=10 server=0001 N(R)=3 P/F info=0");
    }
}
