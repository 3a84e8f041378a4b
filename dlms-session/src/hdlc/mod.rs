//! HDLC data-link layer (IEC 62056-46)

pub mod address;
pub mod connection;
pub mod control;
pub mod dispatcher;
pub mod fcs;
pub mod frame;
pub mod parameters;
pub mod scanner;
pub mod state;
pub mod statistics;
pub mod transport;
pub mod window;

pub use address::{reserved, AddressWidth, HdlcAddressPair, ServerAddress};
pub use connection::{ClientConnection, ServerConnection};
pub use control::{ControlField, FrameType};
pub use dispatcher::HdlcDispatcher;
pub use fcs::FcsCalc;
pub use frame::{FrameDirection, FrameLimits, HdlcFrame, FLAG};
pub use parameters::{HdlcSettings, LinkParameters};
pub use scanner::{FrameScanner, FrameWriter};
pub use state::HdlcConnectionState;
pub use statistics::HdlcStatistics;
pub use transport::{HdlcTransport, LinkRole};
pub use window::{ReceiveWindow, SendWindow, SequenceCheck};
