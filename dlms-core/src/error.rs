use thiserror::Error;

/// Error type shared by every layer of the HDLC link stack
#[derive(Error, Debug)]
pub enum DlmsError {
    /// Failure of the underlying byte channel. Always fatal for the link.
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A frame on the wire could not be decoded (bad checksum, inconsistent
    /// address terminator bits, unknown control octet, oversized information field).
    #[error("Malformed segment: {0}")]
    MalformedSegment(String),

    /// A caller supplied a value that cannot be encoded.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Timeout")]
    Timeout,

    /// A well-formed frame arrived that is not acceptable in the current state.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Link is already connected")]
    AlreadyConnected,

    #[error("Link is not connected")]
    NotConnected,

    /// Invalid settings, detected when a transport is constructed.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DlmsError {
    /// `true` for errors the frame scanner recovers from by resynchronizing
    pub fn is_malformed(&self) -> bool {
        matches!(self, DlmsError::MalformedSegment(_))
    }

    /// `true` for errors after which the byte channel cannot be used any more
    pub fn is_fatal(&self) -> bool {
        matches!(self, DlmsError::Connection(_))
    }
}

/// Result type alias for DLMS link operations
pub type DlmsResult<T> = Result<T, DlmsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let malformed = DlmsError::MalformedSegment("wrong HCS".to_string());
        assert!(malformed.is_malformed());
        assert!(!malformed.is_fatal());

        let io = DlmsError::from(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "eof",
        ));
        assert!(io.is_fatal());
        assert!(!io.is_malformed());
        assert!(!DlmsError::Timeout.is_fatal());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(DlmsError::Timeout.to_string(), "Timeout");
        assert_eq!(
            DlmsError::InvalidValue("N(S) exceeds 7".to_string()).to_string(),
            "Invalid value: N(S) exceeds 7"
        );
    }
}
