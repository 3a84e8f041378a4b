//! TCP transport implementation

use crate::stream::TransportLayer;
use async_trait::async_trait;
use dlms_core::{DlmsError, DlmsResult};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// TCP transport layer settings
#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub address: SocketAddr,
    /// Connection establishment timeout. `None` waits for the OS.
    pub timeout: Option<Duration>,
    pub nodelay: bool,
}

impl TcpSettings {
    /// Create new TCP settings
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            timeout: Some(Duration::from_secs(30)),
            nodelay: true,
        }
    }

    /// Create TCP settings with timeout
    pub fn with_timeout(address: SocketAddr, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::new(address)
        }
    }
}

/// TCP opener for HDLC-over-TCP tunnels (usually port 4059)
#[derive(Debug, Clone)]
pub struct TcpTransport {
    settings: TcpSettings,
}

impl TcpTransport {
    /// Create a new TCP transport layer
    pub fn new(settings: TcpSettings) -> Self {
        Self { settings }
    }

    /// Create TCP transport from address string
    pub fn from_address(address: &str) -> DlmsResult<Self> {
        let addr: SocketAddr = address.parse().map_err(|e| {
            DlmsError::Configuration(format!("Invalid TCP address {}: {}", address, e))
        })?;
        Ok(Self::new(TcpSettings::new(addr)))
    }

    pub fn settings(&self) -> &TcpSettings {
        &self.settings
    }
}

#[async_trait]
impl TransportLayer for TcpTransport {
    type Channel = TcpStream;

    async fn open(&mut self) -> DlmsResult<TcpStream> {
        let stream = if let Some(timeout) = self.settings.timeout {
            tokio::time::timeout(timeout, TcpStream::connect(self.settings.address))
                .await
                .map_err(|_| DlmsError::Timeout)??
        } else {
            TcpStream::connect(self.settings.address).await?
        };

        stream.set_nodelay(self.settings.nodelay)?;
        log::debug!("TCP channel open to {}", self.settings.address);
        Ok(stream)
    }
}
