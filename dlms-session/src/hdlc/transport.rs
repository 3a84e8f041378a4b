//! HDLC transport: one logical link over one byte channel
//!
//! The transport owns the channel, the settings and the link state. Connections
//! mutably borrow it, so at most one connection per transport can be alive.

use crate::error::{DlmsError, DlmsResult};
use crate::hdlc::address::HdlcAddressPair;
use crate::hdlc::connection::{ClientConnection, ServerConnection};
use crate::hdlc::control::{ControlField, FrameType};
use crate::hdlc::dispatcher::HdlcDispatcher;
use crate::hdlc::frame::{FrameDirection, HdlcFrame};
use crate::hdlc::parameters::{HdlcSettings, LinkParameters};
use crate::hdlc::scanner::FrameWriter;
use crate::hdlc::state::HdlcConnectionState;
use crate::hdlc::statistics::{HdlcStatistics, SharedStatistics};
use dlms_transport::{ByteChannel, TransportLayer};
use std::time::Duration;
use tokio::io::AsyncWrite;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Which end of the link this transport drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Primary station (DLMS client)
    Client,
    /// Secondary station (meter)
    Server,
}

impl LinkRole {
    pub fn inbound(self) -> FrameDirection {
        match self {
            LinkRole::Client => FrameDirection::ClientInbound,
            LinkRole::Server => FrameDirection::ServerInbound,
        }
    }

    pub fn outbound(self) -> FrameDirection {
        match self {
            LinkRole::Client => FrameDirection::ClientOutbound,
            LinkRole::Server => FrameDirection::ServerOutbound,
        }
    }
}

/// HDLC transport
pub struct HdlcTransport {
    settings: HdlcSettings,
    role: LinkRole,
    writer: FrameWriter<BoxedWriter>,
    dispatcher: HdlcDispatcher,
    statistics: SharedStatistics,
    state: HdlcConnectionState,
}

impl HdlcTransport {
    /// Create a transport over `channel`
    ///
    /// The channel is split; its read half moves into a reader task spawned on
    /// the current tokio runtime.
    ///
    /// # Errors
    /// `DlmsError::Configuration` if `settings` do not validate
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn new<C: ByteChannel>(channel: C, settings: HdlcSettings, role: LinkRole) -> DlmsResult<Self> {
        settings.validate()?;

        let (reader, writer) = tokio::io::split(channel);
        let statistics = SharedStatistics::new();
        let limits = settings.frame_limits();
        let dispatcher = HdlcDispatcher::spawn(reader, role.inbound(), limits, statistics.clone());
        let writer: BoxedWriter = Box::new(writer);
        let writer = FrameWriter::new(writer, limits, settings.closing_flag, statistics.clone());

        Ok(Self {
            settings,
            role,
            writer,
            dispatcher,
            statistics,
            state: HdlcConnectionState::Idle,
        })
    }

    /// Create a client transport
    pub fn client<C: ByteChannel>(channel: C, settings: HdlcSettings) -> DlmsResult<Self> {
        Self::new(channel, settings, LinkRole::Client)
    }

    /// Create a server transport
    pub fn server<C: ByteChannel>(channel: C, settings: HdlcSettings) -> DlmsResult<Self> {
        Self::new(channel, settings, LinkRole::Server)
    }

    /// Open a channel with `opener` and create a transport over it
    pub async fn open<T: TransportLayer>(
        opener: &mut T,
        settings: HdlcSettings,
        role: LinkRole,
    ) -> DlmsResult<Self> {
        settings.validate()?;
        let channel = opener.open().await?;
        Self::new(channel, settings, role)
    }

    pub fn settings(&self) -> &HdlcSettings {
        &self.settings
    }

    pub fn role(&self) -> LinkRole {
        self.role
    }

    pub fn state(&self) -> HdlcConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_ready()
    }

    /// Copy of the link statistics
    pub fn statistics(&self) -> HdlcStatistics {
        self.statistics.snapshot()
    }

    /// Forget a link that was abandoned without DISC
    pub fn reset(&mut self) {
        if self.state != HdlcConnectionState::Idle {
            log::debug!("Resetting HDLC link in state {}", self.state.as_str());
        }
        self.state = HdlcConnectionState::Idle;
    }

    /// Establish a link as client (SNRM/UA handshake)
    ///
    /// # Errors
    /// - `DlmsError::AlreadyConnected` if the link is up
    /// - `DlmsError::Timeout` if the server does not answer in time or answers DM
    /// - `DlmsError::Protocol` for any other answer
    pub async fn connect(&mut self) -> DlmsResult<ClientConnection<'_>> {
        if self.role != LinkRole::Client {
            return Err(DlmsError::Protocol(
                "connect requires a client transport".to_string(),
            ));
        }
        if self.is_connected() {
            return Err(DlmsError::AlreadyConnected);
        }

        self.state.transition(HdlcConnectionState::Connecting)?;
        let parameters = match self.request_link().await {
            Ok(parameters) => parameters,
            Err(e) => {
                self.state = HdlcConnectionState::Idle;
                return Err(e);
            }
        };
        self.state.transition(HdlcConnectionState::Connected)?;
        log::debug!(
            "HDLC link to server {} established: {:?}",
            self.settings.server_address,
            parameters
        );

        let address_pair = self.settings.address_pair();
        ClientConnection::new(self, address_pair, parameters)
    }

    async fn request_link(&mut self) -> DlmsResult<LinkParameters> {
        self.dispatcher.drain_stale()?;

        let proposal = self.settings.link_parameters();
        let mut snrm = HdlcFrame::new(
            FrameDirection::ClientOutbound,
            self.settings.address_pair(),
            ControlField::unnumbered(FrameType::SetNormalResponseMode, true),
        );
        if self.settings.negotiate_parameters {
            snrm = snrm.with_information(proposal.encode());
        }
        self.writer.write_frame(&snrm).await?;

        let reply = self
            .dispatcher
            .next_frame_within(self.settings.response_timeout)
            .await?;
        match reply.frame_type() {
            FrameType::UnnumberedAcknowledge => {
                if reply.information_field().is_empty() {
                    Ok(proposal)
                } else {
                    let answer = LinkParameters::decode(reply.information_field())?;
                    Ok(proposal.negotiate(&answer))
                }
            }
            FrameType::DisconnectMode => {
                log::warn!("Server answered SNRM with DM");
                Err(DlmsError::Timeout)
            }
            other => Err(DlmsError::Protocol(format!(
                "unexpected {} in reply to SNRM",
                other
            ))),
        }
    }

    /// Wait for a client to establish a link (server side)
    ///
    /// Waits without a deadline. A DISC is answered with DM.
    ///
    /// # Errors
    /// - `DlmsError::AlreadyConnected` if the link is up
    /// - `DlmsError::Protocol` if the first frame is not SNRM
    pub async fn listen(&mut self) -> DlmsResult<ServerConnection<'_>> {
        if self.role != LinkRole::Server {
            return Err(DlmsError::Protocol(
                "listen requires a server transport".to_string(),
            ));
        }
        if self.is_connected() {
            return Err(DlmsError::AlreadyConnected);
        }

        let request = self.dispatcher.next_frame().await?;
        let address_pair = request.address_pair();
        match request.frame_type() {
            FrameType::SetNormalResponseMode => {}
            FrameType::Disconnect => {
                self.send_unnumbered(address_pair, FrameType::DisconnectMode)
                    .await?;
                return Err(DlmsError::Protocol("DISC received while listening".to_string()));
            }
            other => {
                return Err(DlmsError::Protocol(format!(
                    "expected SNRM, got {}",
                    other
                )));
            }
        }

        if address_pair.server() != self.settings.server_address {
            log::debug!(
                "SNRM addressed to {} (configured {})",
                address_pair.server(),
                self.settings.server_address
            );
        }

        self.state.transition(HdlcConnectionState::Connecting)?;
        let parameters = match self.accept_link(&request).await {
            Ok(parameters) => parameters,
            Err(e) => {
                self.state = HdlcConnectionState::Idle;
                return Err(e);
            }
        };
        self.state.transition(HdlcConnectionState::Connected)?;
        log::debug!(
            "HDLC link from client {:02X} established: {:?}",
            address_pair.client(),
            parameters
        );

        ServerConnection::new(self, address_pair, parameters)
    }

    async fn accept_link(&mut self, request: &HdlcFrame) -> DlmsResult<LinkParameters> {
        let local = self.settings.link_parameters();
        let negotiated = !request.information_field().is_empty() && self.settings.negotiate_parameters;
        let parameters = if negotiated {
            local.negotiate(&LinkParameters::decode(request.information_field())?)
        } else {
            local
        };

        let mut ua = HdlcFrame::new(
            FrameDirection::ServerOutbound,
            request.address_pair(),
            ControlField::unnumbered(FrameType::UnnumberedAcknowledge, true),
        );
        if negotiated {
            ua = ua.with_information(parameters.encode());
        }
        self.writer.write_frame(&ua).await?;
        Ok(parameters)
    }

    /// Release the link (client side DISC exchange)
    ///
    /// The link counts as down afterwards whatever the outcome.
    pub(crate) async fn release(&mut self, address_pair: HdlcAddressPair) -> DlmsResult<()> {
        if self.state == HdlcConnectionState::Connected {
            self.state.transition(HdlcConnectionState::Disconnecting)?;
        }
        let result = self.exchange_disc(address_pair).await;
        self.state = HdlcConnectionState::Idle;
        result
    }

    async fn exchange_disc(&mut self, address_pair: HdlcAddressPair) -> DlmsResult<()> {
        self.dispatcher.drain_stale()?;
        self.send_unnumbered(address_pair, FrameType::Disconnect)
            .await?;

        let reply = self
            .dispatcher
            .next_frame_within(self.settings.response_timeout)
            .await?;
        match reply.frame_type() {
            FrameType::UnnumberedAcknowledge | FrameType::DisconnectMode => {
                log::debug!("HDLC link released ({})", reply.frame_type());
                Ok(())
            }
            other => Err(DlmsError::Protocol(format!(
                "unexpected {} in reply to DISC",
                other
            ))),
        }
    }

    /// Send an unnumbered frame with P/F set
    pub(crate) async fn send_unnumbered(
        &mut self,
        address_pair: HdlcAddressPair,
        frame_type: FrameType,
    ) -> DlmsResult<()> {
        let frame = HdlcFrame::new(
            self.role.outbound(),
            address_pair,
            ControlField::unnumbered(frame_type, true),
        );
        self.writer.write_frame(&frame).await
    }

    pub(crate) async fn write_frame(&mut self, frame: &HdlcFrame) -> DlmsResult<()> {
        self.writer.write_frame(frame).await
    }

    pub(crate) async fn next_frame(&mut self) -> DlmsResult<HdlcFrame> {
        self.dispatcher.next_frame().await
    }

    pub(crate) async fn next_frame_within(&mut self, timeout: Duration) -> DlmsResult<HdlcFrame> {
        self.dispatcher.next_frame_within(timeout).await
    }

    pub(crate) fn record(&self, f: impl FnOnce(&mut HdlcStatistics)) {
        self.statistics.update(f);
    }

    /// Mark the link as lost
    pub(crate) fn link_down(&mut self) {
        self.state = HdlcConnectionState::Idle;
    }
}

impl std::fmt::Debug for HdlcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdlcTransport")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("settings", &self.settings)
            .finish()
    }
}
