//! Byte-stream scanner and frame writer
//!
//! The scanner hunts for the 0x7E flag, collapses runs of flags and decodes
//! the frame that follows. Frames that fail to decode are logged, counted and
//! skipped; the scanner then resynchronizes on the next flag. Only channel
//! failures reach the caller.

use crate::error::DlmsResult;
use crate::hdlc::frame::{FrameDirection, FrameLimits, HdlcFrame, FLAG};
use crate::hdlc::statistics::{HdlcStatistics, SharedStatistics};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads frames off a byte stream
#[derive(Debug)]
pub struct FrameScanner<R> {
    reader: R,
    direction: FrameDirection,
    limits: FrameLimits,
    statistics: SharedStatistics,
}

impl<R> FrameScanner<R>
where
    R: AsyncRead + Unpin,
{
    /// Create a scanner for frames travelling in `direction`
    pub fn new(
        reader: R,
        direction: FrameDirection,
        limits: FrameLimits,
        statistics: SharedStatistics,
    ) -> Self {
        Self {
            reader,
            direction,
            limits,
            statistics,
        }
    }

    /// Read the next well-formed frame
    ///
    /// # Errors
    /// Only `DlmsError::Connection`: a read failure or the end of the stream.
    pub async fn read_frame(&mut self) -> DlmsResult<HdlcFrame> {
        loop {
            let format = self.hunt().await?;
            let prefix = [format];
            let mut reader = (&prefix[..]).chain(&mut self.reader);

            match HdlcFrame::decode(&mut reader, self.direction, &self.limits).await {
                Ok(frame) => {
                    log::debug!("HDLC <- {}", frame);
                    self.statistics
                        .update(HdlcStatistics::increment_frames_received);
                    return Ok(frame);
                }
                Err(e) if e.is_malformed() => {
                    log::warn!("Discarding HDLC frame: {}", e);
                    self.statistics
                        .update(HdlcStatistics::increment_malformed_frames);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Skip to a flag, then past any further flags
    ///
    /// Returns the first octet of the frame body.
    async fn hunt(&mut self) -> DlmsResult<u8> {
        let mut skipped = 0usize;
        while self.reader.read_u8().await? != FLAG {
            skipped += 1;
        }
        if skipped > 0 {
            log::debug!("Skipped {} octets while hunting for a flag", skipped);
        }

        loop {
            let octet = self.reader.read_u8().await?;
            if octet != FLAG {
                return Ok(octet);
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes flag-delimited frames to a byte stream
#[derive(Debug)]
pub struct FrameWriter<W> {
    writer: W,
    limits: FrameLimits,
    closing_flag: bool,
    statistics: SharedStatistics,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W, limits: FrameLimits, closing_flag: bool, statistics: SharedStatistics) -> Self {
        Self {
            writer,
            limits,
            closing_flag,
            statistics,
        }
    }

    /// Encode and write one frame
    ///
    /// Nothing is written when encoding fails.
    ///
    /// # Errors
    /// `DlmsError::InvalidValue` from encoding, `DlmsError::Connection` on a
    /// write failure
    pub async fn write_frame(&mut self, frame: &HdlcFrame) -> DlmsResult<()> {
        let body = frame.encode(&self.limits)?;

        let mut buf = BytesMut::with_capacity(body.len() + 2);
        buf.put_u8(FLAG);
        buf.put_slice(&body);
        if self.closing_flag {
            buf.put_u8(FLAG);
        }

        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;

        log::debug!("HDLC -> {}", frame);
        self.statistics.update(HdlcStatistics::increment_frames_sent);
        Ok(())
    }

    pub fn limits(&self) -> &FrameLimits {
        &self.limits
    }
}
