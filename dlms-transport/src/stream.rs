//! Byte channel traits for the transport layer

use async_trait::async_trait;
use dlms_core::DlmsResult;
use tokio::io::{AsyncRead, AsyncWrite};

/// Duplex byte-oriented channel to a remote station
///
/// Anything that can be read from and written to asynchronously qualifies:
/// a `TcpStream`, a `SerialStream`, or an in-memory `tokio::io::DuplexStream`.
/// The session layer splits the channel into one read half, owned by a
/// dedicated reader task, and one write half.
pub trait ByteChannel: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteChannel for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Opener for a physical connection
#[async_trait]
pub trait TransportLayer: Send {
    /// Channel produced by a successful open
    type Channel: ByteChannel;

    /// Open the physical layer connection
    ///
    /// # Errors
    /// `DlmsError::Timeout` when the connection attempt exceeds the configured
    /// timeout, `DlmsError::Connection` for any I/O failure.
    async fn open(&mut self) -> DlmsResult<Self::Channel>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_channel<C: ByteChannel>() {}

    #[test]
    fn test_common_streams_are_channels() {
        assert_channel::<tokio::io::DuplexStream>();
        assert_channel::<tokio::net::TcpStream>();
        assert_channel::<tokio_serial::SerialStream>();
    }
}
