//! HDLC link state machine

use crate::error::{DlmsError, DlmsResult};

/// HDLC link state
///
/// ```text
/// Idle -> Connecting      (SNRM sent / awaited)
/// Connecting -> Connected (UA received / sent)
/// Connecting -> Idle      (DM, timeout or error)
/// Connected -> Disconnecting (DISC sent)
/// Connected -> Idle       (DISC received, link failure)
/// Disconnecting -> Idle   (UA/DM received or timeout)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HdlcConnectionState {
    /// No link (initial state)
    #[default]
    Idle,
    /// Handshake in progress
    Connecting,
    /// Normal response mode established, I-frames may flow
    Connected,
    /// DISC sent, waiting for UA or DM
    Disconnecting,
}

impl HdlcConnectionState {
    /// Check if the link is ready for data transmission
    pub fn is_ready(&self) -> bool {
        matches!(self, HdlcConnectionState::Connected)
    }

    /// Validate state transition
    ///
    /// # Errors
    /// `DlmsError::Protocol` for a transition outside the diagram above
    pub fn validate_transition(&self, new_state: HdlcConnectionState) -> DlmsResult<()> {
        use HdlcConnectionState::*;

        let valid = matches!(
            (*self, new_state),
            (Idle, Connecting)
                | (Connecting, Connected)
                | (Connecting, Idle)
                | (Connected, Disconnecting)
                | (Connected, Idle)
                | (Disconnecting, Idle)
                | (Idle, Idle)
                | (Connected, Connected)
        );

        if valid {
            Ok(())
        } else {
            Err(DlmsError::Protocol(format!(
                "invalid state transition: {} -> {}",
                self.as_str(),
                new_state.as_str()
            )))
        }
    }

    /// Move to `new_state` if the transition is allowed
    pub fn transition(&mut self, new_state: HdlcConnectionState) -> DlmsResult<()> {
        self.validate_transition(new_state)?;
        log::debug!("HDLC link state {} -> {}", self.as_str(), new_state.as_str());
        *self = new_state;
        Ok(())
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            HdlcConnectionState::Idle => "Idle",
            HdlcConnectionState::Connecting => "Connecting",
            HdlcConnectionState::Connected => "Connected",
            HdlcConnectionState::Disconnecting => "Disconnecting",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_cycle() {
        let mut state = HdlcConnectionState::default();
        assert_eq!(state, HdlcConnectionState::Idle);
        state.transition(HdlcConnectionState::Connecting).unwrap();
        state.transition(HdlcConnectionState::Connected).unwrap();
        assert!(state.is_ready());
        state.transition(HdlcConnectionState::Disconnecting).unwrap();
        state.transition(HdlcConnectionState::Idle).unwrap();
        assert!(!state.is_ready());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut state = HdlcConnectionState::Idle;
        assert!(matches!(
            state.transition(HdlcConnectionState::Connected),
            Err(DlmsError::Protocol(_))
        ));
        assert_eq!(state, HdlcConnectionState::Idle);
        assert!(HdlcConnectionState::Disconnecting
            .validate_transition(HdlcConnectionState::Connected)
            .is_err());
        assert!(HdlcConnectionState::Idle
            .validate_transition(HdlcConnectionState::Disconnecting)
            .is_err());
    }
}
