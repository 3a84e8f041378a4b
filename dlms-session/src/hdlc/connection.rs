//! HDLC connections: windowed, segmented data transfer over an established link
//!
//! Both ends share one engine ([`Link`]) holding V(S), V(R), the send window
//! and the reassembly buffer. Outbound payloads are cut into I-frames of at
//! most the negotiated transmit length; all but the last carry the
//! segmentation bit. A response timeout retransmits every outstanding I-frame
//! (go-back-N) until the retry budget is spent, after which the link is
//! declared lost.

use crate::error::{DlmsError, DlmsResult};
use crate::hdlc::address::HdlcAddressPair;
use crate::hdlc::control::{ControlField, FrameType};
use crate::hdlc::frame::HdlcFrame;
use crate::hdlc::parameters::LinkParameters;
use crate::hdlc::statistics::HdlcStatistics;
use crate::hdlc::transport::{HdlcTransport, LinkRole};
use crate::hdlc::window::{PendingFrame, ReceiveWindow, SendWindow, SequenceCheck};
use std::collections::VecDeque;

/// Reassembles segmented messages
#[derive(Debug)]
struct SegmentReassembler {
    buffer: Vec<u8>,
    active: bool,
    max_message_length: usize,
}

impl SegmentReassembler {
    fn new(max_message_length: usize) -> Self {
        Self {
            buffer: Vec::new(),
            active: false,
            max_message_length,
        }
    }

    /// Append one segment; returns the message once a frame without the
    /// segmentation bit completes it
    fn push(&mut self, segment: Vec<u8>, segmented: bool) -> DlmsResult<Option<Vec<u8>>> {
        if self.buffer.len() + segment.len() > self.max_message_length {
            let total = self.buffer.len() + segment.len();
            self.reset();
            return Err(DlmsError::Protocol(format!(
                "segmented message too large: {} bytes (max: {})",
                total, self.max_message_length
            )));
        }

        if self.buffer.is_empty() {
            self.buffer = segment;
        } else {
            self.buffer.extend_from_slice(&segment);
        }

        if segmented {
            self.active = true;
            Ok(None)
        } else {
            self.active = false;
            Ok(Some(std::mem::take(&mut self.buffer)))
        }
    }

    /// Check if a message is partially received
    fn is_active(&self) -> bool {
        self.active
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.active = false;
    }
}

/// Data-transfer state of one established link
struct Link<'t> {
    transport: &'t mut HdlcTransport,
    address_pair: HdlcAddressPair,
    parameters: LinkParameters,
    send_window: SendWindow,
    receive_window: ReceiveWindow,
    reassembler: SegmentReassembler,
    /// Messages completed while a transmission was waiting for acknowledgement
    delivered: VecDeque<Vec<u8>>,
    retries: u32,
}

impl<'t> Link<'t> {
    fn new(
        transport: &'t mut HdlcTransport,
        address_pair: HdlcAddressPair,
        parameters: LinkParameters,
    ) -> DlmsResult<Self> {
        let send_window = SendWindow::new(parameters.window_size_tx)?;
        let reassembler = SegmentReassembler::new(transport.settings().max_message_length);
        Ok(Self {
            transport,
            address_pair,
            parameters,
            send_window,
            receive_window: ReceiveWindow::new(),
            reassembler,
            delivered: VecDeque::new(),
            retries: 0,
        })
    }

    fn role(&self) -> LinkRole {
        self.transport.role()
    }

    fn ensure_connected(&self) -> DlmsResult<()> {
        if self.transport.is_connected() {
            Ok(())
        } else {
            Err(DlmsError::NotConnected)
        }
    }

    fn information_frame(
        &self,
        send_sequence: u8,
        segmented: bool,
        poll_final: bool,
        information: Vec<u8>,
    ) -> HdlcFrame {
        HdlcFrame::new_information(
            self.role().outbound(),
            self.address_pair,
            send_sequence,
            self.receive_window.expected_sequence(),
            poll_final,
            information,
            segmented,
        )
    }

    /// I and UI fields longer than the negotiated receive length are dropped
    /// like any other malformed frame
    fn exceeds_receive_limit(&self, frame: &HdlcFrame) -> bool {
        let limit = self.parameters.max_information_field_length_rx as usize;
        if frame.frame_type().carries_user_data() && frame.information_field().len() > limit {
            log::warn!(
                "Discarding {} with {} information bytes (negotiated maximum {})",
                frame.frame_type(),
                frame.information_field().len(),
                limit
            );
            self.transport.record(HdlcStatistics::increment_malformed_frames);
            true
        } else {
            false
        }
    }

    async fn send_receive_ready(&mut self, poll_final: bool) -> DlmsResult<()> {
        let frame = HdlcFrame::new(
            self.role().outbound(),
            self.address_pair,
            ControlField::receive_ready(self.receive_window.expected_sequence(), poll_final),
        );
        self.transport.write_frame(&frame).await
    }

    /// Send `payload` as one or more I-frames
    async fn transmit(&mut self, payload: &[u8]) -> DlmsResult<()> {
        self.ensure_connected()?;

        let segment_length = self.parameters.max_information_field_length_tx as usize;
        let segments: Vec<&[u8]> = if payload.is_empty() {
            vec![payload]
        } else {
            payload.chunks(segment_length).collect()
        };
        let count = segments.len();

        for (index, segment) in segments.into_iter().enumerate() {
            while !self.send_window.can_send() {
                self.await_acknowledgement().await?;
            }

            let last = index + 1 == count;
            let window_filled =
                self.send_window.outstanding() + 1 == self.send_window.window_size() as usize;
            let frame = self.information_frame(
                self.send_window.peek_next_sequence(),
                !last,
                last || window_filled,
                segment.to_vec(),
            );
            self.transport.write_frame(&frame).await?;
            self.send_window.record(segment.to_vec(), !last)?;
        }
        Ok(())
    }

    /// Handle one event while the send window is full
    async fn await_acknowledgement(&mut self) -> DlmsResult<()> {
        let Some(frame) = self.next_response().await? else {
            return Ok(());
        };
        if self.exceeds_receive_limit(&frame) {
            return Ok(());
        }

        match frame.frame_type() {
            FrameType::Information => {
                if let Some(message) = self.accept_information(frame).await? {
                    self.delivered.push_back(message);
                }
                Ok(())
            }
            FrameType::ReceiveReady => {
                let acknowledged = self.acknowledge(&frame)?;
                if acknowledged == 0 && !self.send_window.is_empty() {
                    log::warn!("Peer acknowledged nothing, retransmitting");
                    self.recover(DlmsError::Protocol(
                        "peer keeps rejecting I-frames".to_string(),
                    ))
                    .await?;
                }
                Ok(())
            }
            FrameType::ReceiveNotReady => {
                self.acknowledge(&frame)?;
                log::debug!("Peer is busy");
                Ok(())
            }
            other => self.unexpected(other),
        }
    }

    /// Receive the next complete message
    ///
    /// With `patient` set, the wait for the first frame of a message has no
    /// deadline. Returns `None` when a client released the link.
    async fn receive_message(&mut self, patient: bool) -> DlmsResult<Option<Vec<u8>>> {
        if let Some(message) = self.delivered.pop_front() {
            return Ok(Some(message));
        }
        self.ensure_connected()?;

        loop {
            let frame = if patient && !self.reassembler.is_active() {
                self.transport.next_frame().await?
            } else {
                match self.next_response().await? {
                    Some(frame) => frame,
                    None => continue,
                }
            };
            if self.exceeds_receive_limit(&frame) {
                continue;
            }

            match frame.frame_type() {
                FrameType::Information => {
                    if let Some(message) = self.accept_information(frame).await? {
                        return Ok(Some(message));
                    }
                }
                FrameType::ReceiveReady | FrameType::ReceiveNotReady => {
                    self.acknowledge(&frame)?;
                    if frame.poll_final() && self.role() == LinkRole::Server {
                        self.answer_poll().await?;
                    }
                }
                FrameType::Disconnect if self.role() == LinkRole::Server => {
                    self.transport
                        .send_unnumbered(self.address_pair, FrameType::UnnumberedAcknowledge)
                        .await?;
                    self.transport.link_down();
                    log::debug!("HDLC link released by client");
                    return Ok(None);
                }
                FrameType::SetNormalResponseMode if self.role() == LinkRole::Server => {
                    log::warn!("SNRM on an established link, resetting sequence state");
                    self.transport
                        .send_unnumbered(self.address_pair, FrameType::UnnumberedAcknowledge)
                        .await?;
                    self.send_window.reset();
                    self.receive_window.reset();
                    self.reassembler.reset();
                }
                other => self.unexpected(other)?,
            }
        }
    }

    /// Process an incoming I-frame
    async fn accept_information(&mut self, frame: HdlcFrame) -> DlmsResult<Option<Vec<u8>>> {
        self.acknowledge(&frame)?;

        let send_sequence = frame.send_sequence().unwrap_or_default();
        match self.receive_window.check(send_sequence) {
            SequenceCheck::Expected => {
                self.receive_window.accept(send_sequence)?;
                self.retries = 0;
                let segmented = frame.is_segmented();
                let poll_final = frame.poll_final();
                let complete = self
                    .reassembler
                    .push(frame.into_information_field(), segmented)?;
                if complete.is_none() && poll_final {
                    self.send_receive_ready(true).await?;
                }
                Ok(complete)
            }
            SequenceCheck::Duplicate => {
                log::warn!("Discarding duplicate I-frame N(S)={}", send_sequence);
                self.transport.record(HdlcStatistics::increment_sequence_errors);
                self.answer_poll().await?;
                Ok(None)
            }
            SequenceCheck::OutOfOrder => {
                self.transport.record(HdlcStatistics::increment_sequence_errors);
                Err(DlmsError::Protocol(format!(
                    "out of order I-frame: N(S)={}, expected {}",
                    send_sequence,
                    self.receive_window.expected_sequence()
                )))
            }
        }
    }

    /// Frames other than I, RR and RNR during data transfer
    fn unexpected(&mut self, frame_type: FrameType) -> DlmsResult<()> {
        match frame_type {
            FrameType::UnnumberedAcknowledge | FrameType::UnnumberedInformation => {
                log::warn!("Discarding stale {} frame", frame_type);
                self.transport.record(HdlcStatistics::increment_stale_frames);
                Ok(())
            }
            FrameType::DisconnectMode | FrameType::Disconnect => {
                self.transport.link_down();
                Err(DlmsError::Protocol(format!(
                    "peer disconnected ({})",
                    frame_type
                )))
            }
            FrameType::FrameReject => Err(DlmsError::Protocol("frame rejected by peer".to_string())),
            other => Err(DlmsError::Protocol(format!(
                "unexpected {} frame during data transfer",
                other
            ))),
        }
    }

    /// Apply N(R) from an I, RR or RNR frame
    fn acknowledge(&mut self, frame: &HdlcFrame) -> DlmsResult<usize> {
        let receive_sequence = frame.receive_sequence().unwrap_or_default();
        match self.send_window.acknowledge(receive_sequence) {
            Ok(acknowledged) => {
                if acknowledged > 0 {
                    self.retries = 0;
                }
                Ok(acknowledged)
            }
            Err(e) => {
                self.transport.record(HdlcStatistics::increment_sequence_errors);
                Err(e)
            }
        }
    }

    /// Wait one response timeout for a frame; `None` after a timeout was
    /// handled by retransmitting or polling
    async fn next_response(&mut self) -> DlmsResult<Option<HdlcFrame>> {
        let timeout = self.transport.settings().response_timeout;
        match self.transport.next_frame_within(timeout).await {
            Ok(frame) => Ok(Some(frame)),
            Err(DlmsError::Timeout) => {
                self.recover(DlmsError::Timeout).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Spend one retry: retransmit or poll, or give the link up with `cause`
    async fn recover(&mut self, cause: DlmsError) -> DlmsResult<()> {
        self.retries += 1;
        let max_retries = self.transport.settings().max_retries;
        if self.retries > max_retries {
            log::warn!("HDLC link lost after {} retries: {}", max_retries, cause);
            self.transport.link_down();
            return Err(cause);
        }
        self.answer_poll().await
    }

    /// Retransmit every outstanding I-frame, or send RR when none is
    async fn answer_poll(&mut self) -> DlmsResult<()> {
        if self.send_window.is_empty() {
            return self.send_receive_ready(true).await;
        }

        let pending: Vec<PendingFrame> = self.send_window.pending().cloned().collect();
        let last = pending.len() - 1;
        for (index, pending) in pending.into_iter().enumerate() {
            let frame = self.information_frame(
                pending.sequence(),
                pending.is_segmented(),
                index == last,
                pending.information().to_vec(),
            );
            self.transport.write_frame(&frame).await?;
            self.transport.record(HdlcStatistics::increment_retransmissions);
        }
        Ok(())
    }
}

/// Client end of an established link
pub struct ClientConnection<'t> {
    link: Link<'t>,
}

impl<'t> ClientConnection<'t> {
    pub(crate) fn new(
        transport: &'t mut HdlcTransport,
        address_pair: HdlcAddressPair,
        parameters: LinkParameters,
    ) -> DlmsResult<Self> {
        Ok(Self {
            link: Link::new(transport, address_pair, parameters)?,
        })
    }

    /// Send a request and wait for the complete response
    ///
    /// # Errors
    /// - `DlmsError::NotConnected` if the link is down
    /// - `DlmsError::Timeout` when the retry budget is spent; the link is down
    /// - `DlmsError::Protocol` on a sequence error or a DM/FRMR from the server
    pub async fn send(&mut self, payload: &[u8]) -> DlmsResult<Vec<u8>> {
        self.link.transmit(payload).await?;
        self.link
            .receive_message(false)
            .await?
            .ok_or(DlmsError::NotConnected)
    }

    /// Release the link with DISC
    ///
    /// The transport is disconnected afterwards whatever the outcome.
    pub async fn disconnect(self) -> DlmsResult<()> {
        let address_pair = self.link.address_pair;
        self.link.transport.release(address_pair).await
    }

    /// V(S), the N(S) of the next I-frame
    pub fn send_sequence(&self) -> u8 {
        self.link.send_window.peek_next_sequence()
    }

    /// V(R), the N(S) expected next from the server
    pub fn receive_sequence(&self) -> u8 {
        self.link.receive_window.expected_sequence()
    }

    /// Parameters in force after negotiation
    pub fn parameters(&self) -> &LinkParameters {
        &self.link.parameters
    }

    pub fn address_pair(&self) -> HdlcAddressPair {
        self.link.address_pair
    }
}

/// Server end of an established link
pub struct ServerConnection<'t> {
    link: Link<'t>,
}

impl<'t> ServerConnection<'t> {
    pub(crate) fn new(
        transport: &'t mut HdlcTransport,
        address_pair: HdlcAddressPair,
        parameters: LinkParameters,
    ) -> DlmsResult<Self> {
        Ok(Self {
            link: Link::new(transport, address_pair, parameters)?,
        })
    }

    /// Wait for the next complete request
    ///
    /// The first frame of a request is awaited without a deadline.
    ///
    /// # Returns
    /// `None` once the client released the link with DISC
    pub async fn receive(&mut self) -> DlmsResult<Option<Vec<u8>>> {
        self.link.receive_message(true).await
    }

    /// Send a response
    pub async fn send(&mut self, payload: &[u8]) -> DlmsResult<()> {
        self.link.transmit(payload).await
    }

    /// Send RR with the current N(R) and the final bit set
    pub async fn acknowledge(&mut self) -> DlmsResult<()> {
        self.link.ensure_connected()?;
        self.link.send_receive_ready(true).await
    }

    /// V(S), the N(S) of the next I-frame
    pub fn send_sequence(&self) -> u8 {
        self.link.send_window.peek_next_sequence()
    }

    /// V(R), the N(S) expected next from the client
    pub fn receive_sequence(&self) -> u8 {
        self.link.receive_window.expected_sequence()
    }

    /// Parameters in force after negotiation
    pub fn parameters(&self) -> &LinkParameters {
        &self.link.parameters
    }

    /// Addresses learned from the client's SNRM
    pub fn address_pair(&self) -> HdlcAddressPair {
        self.link.address_pair
    }
}
