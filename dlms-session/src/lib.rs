//! Session layer for DLMS/COSEM: the HDLC data link
//!
//! An [`HdlcTransport`] wraps any duplex byte channel (see `dlms-transport`)
//! and establishes one link over it, either as client ([`HdlcTransport::connect`])
//! or as server ([`HdlcTransport::listen`]). The returned connection moves
//! opaque payloads; segmentation, windowing and retransmission stay inside.
//!
//! ```no_run
//! use dlms_session::{HdlcSettings, HdlcTransport};
//! use dlms_transport::{TcpTransport, TransportLayer};
//!
//! # async fn example() -> dlms_session::DlmsResult<()> {
//! let mut tcp = TcpTransport::from_address("192.168.1.100:4059")?;
//! let mut transport = HdlcTransport::client(tcp.open().await?, HdlcSettings::default())?;
//! let mut connection = transport.connect().await?;
//! let response = connection.send(&[0xE6, 0xE6, 0x00]).await?;
//! connection.disconnect().await?;
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

pub mod error {
    pub use dlms_core::{DlmsError, DlmsResult};
}
pub mod hdlc;

pub use error::{DlmsError, DlmsResult};
pub use hdlc::*;
