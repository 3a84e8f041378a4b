//! HDLC frame dispatcher
//!
//! A dedicated task owns the read half of the channel, runs the scanner in a
//! loop and queues every decoded frame (or the fatal error that ended it) on a
//! bounded channel. Waiting for a frame is then a plain `recv()`, which can be
//! raced against a timer without losing a half-read frame.

use crate::error::{DlmsError, DlmsResult};
use crate::hdlc::frame::{FrameDirection, FrameLimits, HdlcFrame};
use crate::hdlc::scanner::FrameScanner;
use crate::hdlc::statistics::{HdlcStatistics, SharedStatistics};
use std::io;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;

/// Frames buffered between the reader task and the link
pub const QUEUE_CAPACITY: usize = 32;

/// Receiving side of the reader task
#[derive(Debug)]
pub struct HdlcDispatcher {
    receiver: mpsc::Receiver<DlmsResult<HdlcFrame>>,
    task: JoinHandle<()>,
    statistics: SharedStatistics,
}

impl HdlcDispatcher {
    /// Spawn the reader task on the current tokio runtime
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn spawn<R>(
        reader: R,
        direction: FrameDirection,
        limits: FrameLimits,
        statistics: SharedStatistics,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
        let mut scanner = FrameScanner::new(reader, direction, limits, statistics.clone());

        let task = tokio::spawn(async move {
            loop {
                let result = scanner.read_frame().await;
                let failed = result.is_err();
                if let Err(e) = &result {
                    log::error!("HDLC reader stopped: {}", e);
                }
                if sender.send(result).await.is_err() || failed {
                    break;
                }
            }
        });

        Self {
            receiver,
            task,
            statistics,
        }
    }

    /// Wait for the next frame, without a deadline
    ///
    /// # Errors
    /// The fatal channel error that stopped the reader, or
    /// `DlmsError::Connection` once the reader is gone.
    pub async fn next_frame(&mut self) -> DlmsResult<HdlcFrame> {
        match self.receiver.recv().await {
            Some(result) => result,
            None => Err(reader_gone()),
        }
    }

    /// Wait for the next frame for at most `timeout`
    ///
    /// A frame arriving after the deadline stays queued.
    ///
    /// # Errors
    /// `DlmsError::Timeout` when the deadline passes, otherwise as
    /// [`next_frame`](Self::next_frame).
    pub async fn next_frame_within(&mut self, timeout: Duration) -> DlmsResult<HdlcFrame> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(result)) => result,
            Ok(None) => Err(reader_gone()),
            Err(_) => {
                self.statistics.update(HdlcStatistics::increment_timeouts);
                Err(DlmsError::Timeout)
            }
        }
    }

    /// Discard every frame already queued
    ///
    /// # Returns
    /// Number of frames discarded
    ///
    /// # Errors
    /// A queued fatal channel error
    pub fn drain_stale(&mut self) -> DlmsResult<usize> {
        let mut discarded = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(Ok(frame)) => {
                    log::warn!("Discarding stale HDLC frame: {}", frame);
                    self.statistics.update(HdlcStatistics::increment_stale_frames);
                    discarded += 1;
                }
                Ok(Err(e)) => return Err(e),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    return Ok(discarded);
                }
            }
        }
    }
}

impl Drop for HdlcDispatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn reader_gone() -> DlmsError {
    DlmsError::Connection(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "HDLC reader has stopped",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    const SNRM: [u8; 9] = [0x7E, 0xA0, 0x07, 0x03, 0x21, 0x93, 0x0F, 0x01, 0x7E];

    fn dispatcher(reader: tokio::io::DuplexStream) -> (HdlcDispatcher, SharedStatistics) {
        let statistics = SharedStatistics::new();
        let dispatcher = HdlcDispatcher::spawn(
            reader,
            FrameDirection::ServerInbound,
            FrameLimits::default(),
            statistics.clone(),
        );
        (dispatcher, statistics)
    }

    #[tokio::test]
    async fn test_frames_are_queued() {
        let (mut peer, local) = tokio::io::duplex(256);
        let (mut dispatcher, statistics) = dispatcher(local);

        peer.write_all(&SNRM).await.unwrap();
        let frame = dispatcher
            .next_frame_within(Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(frame.address_pair().client(), 0x10);
        assert_eq!(statistics.snapshot().frames_received, 1);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (_peer, local) = tokio::io::duplex(256);
        let (mut dispatcher, statistics) = dispatcher(local);

        let err = dispatcher
            .next_frame_within(Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, DlmsError::Timeout));
        assert_eq!(statistics.snapshot().timeouts, 1);
    }

    #[tokio::test]
    async fn test_drain_stale() {
        let (mut peer, local) = tokio::io::duplex(256);
        let (mut dispatcher, statistics) = dispatcher(local);

        peer.write_all(&SNRM).await.unwrap();
        peer.write_all(&SNRM).await.unwrap();
        dispatcher.next_frame().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(dispatcher.drain_stale().unwrap(), 1);
        assert_eq!(dispatcher.drain_stale().unwrap(), 0);
        assert_eq!(statistics.snapshot().stale_frames, 1);
    }

    #[tokio::test]
    async fn test_closed_channel_is_fatal() {
        let (peer, local) = tokio::io::duplex(256);
        let (mut dispatcher, _) = dispatcher(local);
        drop(peer);

        assert!(dispatcher.next_frame().await.unwrap_err().is_fatal());
        assert!(dispatcher.next_frame().await.unwrap_err().is_fatal());
    }
}
