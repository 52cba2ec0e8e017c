//! Frame synchronization over the TCP byte stream.
//!
//! Messages are variable-length and framed only by the magic and payload
//! size in the 16-byte header, so reception alternates two exact reads:
//! first `HEADER_SIZE` bytes, then exactly `payload_size` bytes. A header
//! that fails validation means the reader is looking at the middle of a
//! frame; the discarded window is scanned for the magic byte pair and the
//! reader re-aligns on the first candidate, falling back to a fresh header
//! read when no candidate exists. Byte-stream order is preserved by the
//! kernel, so realignment always converges on the next genuine header.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::error::{ProtocolError, Result, TransportError};

use super::message::RawMessage;
use super::wire::{MessageHeader, HEADER_SIZE};
use super::MESSAGE_MAGIC;

/// Upper bound on a single frame; a larger announced payload is treated as
/// a desync rather than honored with an allocation.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Frame reader over any byte stream.
pub struct FrameReader<R> {
    reader: R,
    desyncs: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, desyncs: 0 }
    }

    /// Number of resynchronizations performed so far.
    pub fn desync_count(&self) -> u64 {
        self.desyncs
    }

    /// Read the next valid frame.
    ///
    /// `expected_src` is the session's learned sonar id; a header whose
    /// source device differs fails validation. `None` skips the source
    /// check (no session bound yet).
    pub async fn next_frame(&mut self, expected_src: Option<u16>) -> Result<RawMessage> {
        let mut header_buf = [0u8; HEADER_SIZE];

        loop {
            self.read_exact(&mut header_buf).await?;

            // Revalidate in place while scanning forward through junk.
            loop {
                match validate_header(&header_buf, expected_src) {
                    Ok(header) => {
                        let payload_size = header.payload_size as usize;
                        let mut frame = vec![0u8; HEADER_SIZE + payload_size];
                        frame[..HEADER_SIZE].copy_from_slice(&header_buf);
                        self.read_exact(&mut frame[HEADER_SIZE..]).await?;
                        return Ok(RawMessage::new(header, frame));
                    }
                    Err(err) => {
                        self.desyncs += 1;
                        trace!(desyncs = self.desyncs, %err, "frame desync, re-aligning");

                        if let Some(pos) = scan_magic(&header_buf) {
                            // Shift the candidate to the front and top the
                            // window back up to a full header.
                            header_buf.copy_within(pos.., 0);
                            self.read_exact(&mut header_buf[HEADER_SIZE - pos..]).await?;
                        } else {
                            // Nothing resembling a header in the window;
                            // issue a fresh header read.
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.reader
            .read_exact(buf)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()).into())
    }
}

/// Decode and validate a header window.
fn validate_header(buf: &[u8; HEADER_SIZE], expected_src: Option<u16>) -> Result<MessageHeader> {
    let header = MessageHeader::decode(buf)?;

    if !header.magic_valid() {
        return Err(ProtocolError::InvalidMagic(header.magic).into());
    }

    if let Some(expected) = expected_src {
        if header.src_device != expected {
            return Err(ProtocolError::UnexpectedSource {
                expected,
                got: header.src_device,
            }
            .into());
        }
    }

    if header.frame_size() > MAX_FRAME_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: header.frame_size(),
            max: MAX_FRAME_SIZE,
        }
        .into());
    }

    Ok(header)
}

/// Find the first plausible header start past byte 0: the little-endian
/// magic appears on the wire as the byte pair `S`,`O`. A lone `S` at the
/// window's last byte is also a candidate (its partner has not been read
/// yet).
fn scan_magic(buf: &[u8; HEADER_SIZE]) -> Option<usize> {
    let lo = (MESSAGE_MAGIC & 0xFF) as u8;
    let hi = (MESSAGE_MAGIC >> 8) as u8;

    (1..HEADER_SIZE).find(|&i| buf[i] == lo && (i + 1 == HEADER_SIZE || buf[i + 1] == hi))
}

/// Read a single frame from a byte stream. One-shot convenience over
/// [`FrameReader`].
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    expected_src: Option<u16>,
) -> Result<RawMessage> {
    FrameReader::new(reader).next_frame(expected_src).await
}
