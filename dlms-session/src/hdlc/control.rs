//! HDLC control field
//!
//! The control octet identifies the frame kind and carries the poll/final bit
//! and, depending on the kind, the send and receive sequence numbers.

use crate::error::{DlmsError, DlmsResult};
use std::fmt;

/// Poll/final bit
pub const POLL_FINAL: u8 = 0x10;

const UNNUMBERED_MASK: u8 = 0xEF;
const SEQUENCE_MODULUS: u8 = 8;

/// HDLC frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// I-frame, numbered data
    Information,
    /// RR, supervisory acknowledgement
    ReceiveReady,
    /// RNR, supervisory busy indication
    ReceiveNotReady,
    /// SNRM, link establishment request
    SetNormalResponseMode,
    /// DISC, link release request
    Disconnect,
    /// UA
    UnnumberedAcknowledge,
    /// DM
    DisconnectMode,
    /// FRMR
    FrameReject,
    /// UI
    UnnumberedInformation,
}

impl FrameType {
    /// Check whether frames of this kind may carry an information field
    pub fn carries_information(self) -> bool {
        matches!(
            self,
            FrameType::Information
                | FrameType::SetNormalResponseMode
                | FrameType::UnnumberedAcknowledge
                | FrameType::UnnumberedInformation
                | FrameType::FrameReject
        )
    }

    /// Check whether the information field holds upper-layer data
    ///
    /// Only such fields are bounded by the negotiated information length;
    /// SNRM/UA parameter blocks and FRMR diagnostics are not.
    pub fn carries_user_data(self) -> bool {
        matches!(
            self,
            FrameType::Information | FrameType::UnnumberedInformation
        )
    }

    /// Check whether frames of this kind carry N(R)
    pub fn has_receive_sequence(self) -> bool {
        matches!(
            self,
            FrameType::Information | FrameType::ReceiveReady | FrameType::ReceiveNotReady
        )
    }

    fn unnumbered_code(self) -> Option<u8> {
        match self {
            FrameType::SetNormalResponseMode => Some(0x83),
            FrameType::Disconnect => Some(0x43),
            FrameType::UnnumberedAcknowledge => Some(0x63),
            FrameType::DisconnectMode => Some(0x0F),
            FrameType::FrameReject => Some(0x87),
            FrameType::UnnumberedInformation => Some(0x03),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::Information => "I",
            FrameType::ReceiveReady => "RR",
            FrameType::ReceiveNotReady => "RNR",
            FrameType::SetNormalResponseMode => "SNRM",
            FrameType::Disconnect => "DISC",
            FrameType::UnnumberedAcknowledge => "UA",
            FrameType::DisconnectMode => "DM",
            FrameType::FrameReject => "FRMR",
            FrameType::UnnumberedInformation => "UI",
        }
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded control field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlField {
    frame_type: FrameType,
    send_sequence: u8,
    receive_sequence: u8,
    poll_final: bool,
}

impl ControlField {
    /// Control field of an I-frame
    pub fn information(send_sequence: u8, receive_sequence: u8, poll_final: bool) -> Self {
        Self {
            frame_type: FrameType::Information,
            send_sequence,
            receive_sequence,
            poll_final,
        }
    }

    /// Control field of an RR frame
    pub fn receive_ready(receive_sequence: u8, poll_final: bool) -> Self {
        Self {
            frame_type: FrameType::ReceiveReady,
            send_sequence: 0,
            receive_sequence,
            poll_final,
        }
    }

    /// Control field of an RNR frame
    pub fn receive_not_ready(receive_sequence: u8, poll_final: bool) -> Self {
        Self {
            frame_type: FrameType::ReceiveNotReady,
            send_sequence: 0,
            receive_sequence,
            poll_final,
        }
    }

    /// Control field of a frame that carries no sequence numbers
    pub fn unnumbered(frame_type: FrameType, poll_final: bool) -> Self {
        Self {
            frame_type,
            send_sequence: 0,
            receive_sequence: 0,
            poll_final,
        }
    }

    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    pub fn poll_final(&self) -> bool {
        self.poll_final
    }

    /// N(S), present on I-frames only
    pub fn send_sequence(&self) -> Option<u8> {
        (self.frame_type == FrameType::Information).then_some(self.send_sequence)
    }

    /// N(R), present on I, RR and RNR frames
    pub fn receive_sequence(&self) -> Option<u8> {
        self.frame_type
            .has_receive_sequence()
            .then_some(self.receive_sequence)
    }

    /// Encode the control octet
    ///
    /// # Errors
    /// `DlmsError::InvalidValue` when a sequence number is not in `0..8`.
    pub fn encode(&self) -> DlmsResult<u8> {
        if self.send_sequence >= SEQUENCE_MODULUS || self.receive_sequence >= SEQUENCE_MODULUS {
            return Err(DlmsError::InvalidValue(format!(
                "sequence numbers must be below {}, got N(S)={} N(R)={}",
                SEQUENCE_MODULUS, self.send_sequence, self.receive_sequence
            )));
        }
        let pf = if self.poll_final { POLL_FINAL } else { 0 };
        let nr = self.receive_sequence << 5;

        let octet = match self.frame_type {
            FrameType::Information => nr | pf | (self.send_sequence << 1),
            FrameType::ReceiveReady => nr | pf | 0x01,
            FrameType::ReceiveNotReady => nr | pf | 0x05,
            other => other.unnumbered_code().unwrap_or_default() | pf,
        };
        Ok(octet)
    }

    /// Decode a control octet
    ///
    /// # Errors
    /// `DlmsError::MalformedSegment` for an octet that names no known frame kind.
    pub fn decode(octet: u8) -> DlmsResult<Self> {
        let poll_final = octet & POLL_FINAL != 0;
        let nr = octet >> 5;

        if octet & 0x01 == 0 {
            return Ok(Self::information((octet >> 1) & 0x07, nr, poll_final));
        }
        match octet & 0x0F {
            0x01 => return Ok(Self::receive_ready(nr, poll_final)),
            0x05 => return Ok(Self::receive_not_ready(nr, poll_final)),
            _ => {}
        }

        let frame_type = match octet & UNNUMBERED_MASK {
            0x83 => FrameType::SetNormalResponseMode,
            0x43 => FrameType::Disconnect,
            0x63 => FrameType::UnnumberedAcknowledge,
            0x0F => FrameType::DisconnectMode,
            0x87 => FrameType::FrameReject,
            0x03 => FrameType::UnnumberedInformation,
            _ => {
                return Err(DlmsError::MalformedSegment(format!(
                    "control field unknown: 0x{:02X}",
                    octet
                )));
            }
        };
        Ok(Self::unnumbered(frame_type, poll_final))
    }
}
