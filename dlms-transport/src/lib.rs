//! Transport layer module for the DLMS/COSEM HDLC link
//!
//! This crate opens the physical connections (TCP, serial) an HDLC link runs on.
//! Every opener hands out a [`ByteChannel`], the only thing the session layer
//! needs from below.

pub mod stream;
pub mod tcp;
pub mod serial;

pub use dlms_core::{DlmsError, DlmsResult};
pub use stream::{ByteChannel, TransportLayer};
pub use tcp::{TcpTransport, TcpSettings};
pub use serial::{SerialTransport, SerialSettings};
