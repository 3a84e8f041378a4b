//! HDLC window management
//!
//! Sequence numbers are 3 bits wide, so every counter here runs modulo 8 and at
//! most seven I-frames can be outstanding without ambiguity.

use crate::error::{DlmsError, DlmsResult};
use std::collections::VecDeque;

/// Sequence numbers wrap at this value
pub const SEQUENCE_MODULUS: u8 = 8;

/// Largest usable window
pub const MAX_WINDOW_SIZE: u8 = 7;

/// Successor of a sequence number
pub fn next_sequence(sequence: u8) -> u8 {
    (sequence + 1) % SEQUENCE_MODULUS
}

/// Sent I-frame waiting for acknowledgement
///
/// Only the payload is kept; a retransmission rebuilds the frame with the
/// original N(S) and the N(R) current at that moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFrame {
    sequence: u8,
    information: Vec<u8>,
    segmented: bool,
}

impl PendingFrame {
    /// N(S) the frame was sent with
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn information(&self) -> &[u8] {
        &self.information
    }

    pub fn is_segmented(&self) -> bool {
        self.segmented
    }
}

/// Send window for sliding window protocol
///
/// Holds V(S) and the I-frames sent but not yet acknowledged, oldest first.
#[derive(Debug)]
pub struct SendWindow {
    unacked_frames: VecDeque<PendingFrame>,
    window_size: u8,
    next_sequence: u8,
}

impl SendWindow {
    /// Create a new send window
    ///
    /// # Errors
    /// `DlmsError::Configuration` if `window_size` is not in `1..=7`
    pub fn new(window_size: u8) -> DlmsResult<Self> {
        if window_size == 0 || window_size > MAX_WINDOW_SIZE {
            return Err(DlmsError::Configuration(format!(
                "window size must be 1..={}, got {}",
                MAX_WINDOW_SIZE, window_size
            )));
        }
        Ok(Self {
            unacked_frames: VecDeque::new(),
            window_size,
            next_sequence: 0,
        })
    }

    pub fn window_size(&self) -> u8 {
        self.window_size
    }

    /// Check if window has space for a new frame
    pub fn can_send(&self) -> bool {
        self.unacked_frames.len() < self.window_size as usize
    }

    /// Peek at V(S), the N(S) the next frame will carry
    pub fn peek_next_sequence(&self) -> u8 {
        self.next_sequence
    }

    /// Record a sent I-frame and advance V(S)
    ///
    /// # Returns
    /// The N(S) assigned to the frame
    ///
    /// # Errors
    /// `DlmsError::Protocol` if the window is full
    pub fn record(&mut self, information: Vec<u8>, segmented: bool) -> DlmsResult<u8> {
        if !self.can_send() {
            return Err(DlmsError::Protocol(format!(
                "send window is full: {} frames pending (window size: {})",
                self.unacked_frames.len(),
                self.window_size
            )));
        }
        let sequence = self.next_sequence;
        self.unacked_frames.push_back(PendingFrame {
            sequence,
            information,
            segmented,
        });
        self.next_sequence = next_sequence(sequence);
        Ok(sequence)
    }

    /// Acknowledge every frame before N(R)
    ///
    /// N(R) names the next frame the peer expects, so it must lie between the
    /// oldest outstanding N(S) and V(S) inclusive.
    ///
    /// # Returns
    /// Number of frames acknowledged
    ///
    /// # Errors
    /// `DlmsError::Protocol` if N(R) is outside that range
    pub fn acknowledge(&mut self, receive_sequence: u8) -> DlmsResult<usize> {
        let oldest = self.oldest_sequence().unwrap_or(self.next_sequence);
        let count = ((receive_sequence % SEQUENCE_MODULUS) + SEQUENCE_MODULUS - oldest)
            % SEQUENCE_MODULUS;
        let count = count as usize;
        if count > self.unacked_frames.len() {
            return Err(DlmsError::Protocol(format!(
                "N(R)={} outside the outstanding range {}..={}",
                receive_sequence, oldest, self.next_sequence
            )));
        }
        self.unacked_frames.drain(..count);
        Ok(count)
    }

    /// Oldest unacknowledged N(S)
    pub fn oldest_sequence(&self) -> Option<u8> {
        self.unacked_frames.front().map(|p| p.sequence)
    }

    /// Number of frames awaiting acknowledgement
    pub fn outstanding(&self) -> usize {
        self.unacked_frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unacked_frames.is_empty()
    }

    /// Outstanding frames, oldest first
    pub fn pending(&self) -> impl Iterator<Item = &PendingFrame> {
        self.unacked_frames.iter()
    }

    /// Clear outstanding frames and reset V(S) to 0
    pub fn reset(&mut self) {
        self.unacked_frames.clear();
        self.next_sequence = 0;
    }
}

/// Result of checking an incoming N(S)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// N(S) equals V(R)
    Expected,
    /// N(S) equals V(R) - 1: the peer repeated the last frame
    Duplicate,
    OutOfOrder,
}

/// Receive window: tracks V(R), the next N(S) expected from the peer
#[derive(Debug, Default)]
pub struct ReceiveWindow {
    expected_sequence: u8,
}

impl ReceiveWindow {
    /// Create a new receive window
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a received N(S)
    pub fn check(&self, sequence: u8) -> SequenceCheck {
        if sequence == self.expected_sequence {
            SequenceCheck::Expected
        } else if next_sequence(sequence) == self.expected_sequence {
            SequenceCheck::Duplicate
        } else {
            SequenceCheck::OutOfOrder
        }
    }

    /// Accept a frame with the expected sequence number
    ///
    /// # Errors
    /// `DlmsError::Protocol` on a sequence mismatch
    pub fn accept(&mut self, sequence: u8) -> DlmsResult<()> {
        if self.check(sequence) != SequenceCheck::Expected {
            return Err(DlmsError::Protocol(format!(
                "sequence number mismatch: expected {}, got {}",
                self.expected_sequence, sequence
            )));
        }
        self.expected_sequence = next_sequence(self.expected_sequence);
        Ok(())
    }

    /// V(R), the value to send in N(R)
    pub fn expected_sequence(&self) -> u8 {
        self.expected_sequence
    }

    pub fn reset(&mut self) {
        self.expected_sequence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_size_bounds() {
        assert!(matches!(SendWindow::new(0), Err(DlmsError::Configuration(_))));
        assert!(matches!(SendWindow::new(8), Err(DlmsError::Configuration(_))));
        assert_eq!(SendWindow::new(7).unwrap().window_size(), 7);
    }

    #[test]
    fn test_eight_frames_visit_every_sequence() {
        let mut window = SendWindow::new(1).unwrap();
        let mut seen = Vec::new();
        for _ in 0..8 {
            let ns = window.record(vec![0x01], false).unwrap();
            seen.push(ns);
            assert_eq!(window.acknowledge(next_sequence(ns)).unwrap(), 1);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(window.peek_next_sequence(), 0);
    }

    #[test]
    fn test_full_window_refuses_frames() {
        let mut window = SendWindow::new(2).unwrap();
        window.record(vec![], true).unwrap();
        window.record(vec![], false).unwrap();
        assert!(!window.can_send());
        assert!(matches!(
            window.record(vec![], false),
            Err(DlmsError::Protocol(_))
        ));
    }

    #[test]
    fn test_acknowledge_across_wraparound() {
        let mut window = SendWindow::new(7).unwrap();
        for _ in 0..5 {
            let ns = window.record(vec![], false).unwrap();
            window.acknowledge(next_sequence(ns)).unwrap();
        }
        // V(S) = 5; send 5, 6, 7, 0, 1
        for _ in 0..5 {
            window.record(vec![], true).unwrap();
        }
        assert_eq!(window.oldest_sequence(), Some(5));
        assert_eq!(window.acknowledge(0).unwrap(), 3);
        assert_eq!(window.oldest_sequence(), Some(0));
        assert_eq!(window.acknowledge(2).unwrap(), 2);
        assert!(window.is_empty());
    }

    #[test]
    fn test_acknowledge_nothing_and_out_of_range() {
        let mut window = SendWindow::new(3).unwrap();
        assert_eq!(window.acknowledge(0).unwrap(), 0);

        window.record(vec![0xAA], false).unwrap();
        window.record(vec![0xBB], false).unwrap();
        assert_eq!(window.acknowledge(0).unwrap(), 0);
        assert_eq!(window.outstanding(), 2);

        assert!(matches!(window.acknowledge(5), Err(DlmsError::Protocol(_))));
        assert_eq!(window.acknowledge(1).unwrap(), 1);
        let remaining: Vec<u8> = window.pending().map(PendingFrame::sequence).collect();
        assert_eq!(remaining, vec![1]);
        assert_eq!(window.pending().next().unwrap().information(), &[0xBB]);
    }

    #[test]
    fn test_receive_window_classification() {
        let mut window = ReceiveWindow::new();
        assert_eq!(window.check(0), SequenceCheck::Expected);
        assert_eq!(window.check(7), SequenceCheck::Duplicate);
        assert_eq!(window.check(3), SequenceCheck::OutOfOrder);

        window.accept(0).unwrap();
        assert_eq!(window.expected_sequence(), 1);
        assert_eq!(window.check(0), SequenceCheck::Duplicate);
        assert!(matches!(window.accept(2), Err(DlmsError::Protocol(_))));

        for ns in 1..8 {
            window.accept(ns).unwrap();
        }
        assert_eq!(window.expected_sequence(), 0);
        window.reset();
        assert_eq!(window.expected_sequence(), 0);
    }
}
