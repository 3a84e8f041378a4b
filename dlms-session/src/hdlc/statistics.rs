//! HDLC statistics collection

use std::sync::{Arc, Mutex, PoisonError};

/// HDLC link statistics
///
/// Counters are updated by the frame reader task and by the connection
/// driving the link; query them at any time through
/// [`HdlcTransport::statistics`](crate::hdlc::transport::HdlcTransport::statistics).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HdlcStatistics {
    /// Total number of frames sent
    pub frames_sent: u64,
    /// Total number of frames decoded successfully
    pub frames_received: u64,
    /// Frames discarded by the scanner (bad checksum, bad address, unknown
    /// control octet, oversized information field)
    pub malformed_frames: u64,
    /// Number of expired response waits
    pub timeouts: u64,
    /// Duplicate or out-of-order N(S) and out-of-range N(R) values
    pub sequence_errors: u64,
    /// Number of retransmitted I-frames
    pub retransmissions: u64,
    /// Frames that arrived after their wait expired and were thrown away
    pub stale_frames: u64,
}

impl HdlcStatistics {
    /// Create new statistics with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all statistics counters
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn increment_frames_sent(&mut self) {
        self.frames_sent += 1;
    }

    pub fn increment_frames_received(&mut self) {
        self.frames_received += 1;
    }

    pub fn increment_malformed_frames(&mut self) {
        self.malformed_frames += 1;
    }

    pub fn increment_timeouts(&mut self) {
        self.timeouts += 1;
    }

    pub fn increment_sequence_errors(&mut self) {
        self.sequence_errors += 1;
    }

    pub fn increment_retransmissions(&mut self) {
        self.retransmissions += 1;
    }

    pub fn increment_stale_frames(&mut self) {
        self.stale_frames += 1;
    }

    /// Share of malformed frames among everything read off the wire, in percent
    ///
    /// Returns 0.0 if nothing has been read yet.
    pub fn error_rate(&self) -> f64 {
        let total = self.frames_received + self.malformed_frames;
        if total == 0 {
            0.0
        } else {
            (self.malformed_frames as f64 / total as f64) * 100.0
        }
    }
}

/// Statistics handle shared between the reader task and the link
#[derive(Debug, Clone, Default)]
pub struct SharedStatistics(Arc<Mutex<HdlcStatistics>>);

impl SharedStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to the counters
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut HdlcStatistics),
    {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    /// Copy of the current counters
    pub fn snapshot(&self) -> HdlcStatistics {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.update(HdlcStatistics::clear);
    }
}
