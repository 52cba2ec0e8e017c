//! Received message containers.

use std::sync::Arc;
use std::time::SystemTime;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{ProtocolError, Result};

use super::wire::{MessageHeader, PingHeader, HEADER_SIZE};
use super::MessageId;

/// A complete framed message as received from the sonar: the 16-byte header
/// followed by exactly `payload_size` payload bytes.
///
/// Clones share the underlying bytes.
#[derive(Debug, Clone)]
pub struct RawMessage {
    header: MessageHeader,
    bytes: Arc<[u8]>,
    timestamp: SystemTime,
}

impl RawMessage {
    /// Wrap a received frame. `bytes` must hold header + payload.
    pub fn new(header: MessageHeader, bytes: Vec<u8>) -> Self {
        Self {
            header,
            bytes: bytes.into(),
            timestamp: SystemTime::now(),
        }
    }

    /// Parse a frame from raw bytes, validating length against the header.
    pub fn parse(bytes: Vec<u8>) -> Result<Self> {
        let header = MessageHeader::decode(&bytes)?;
        let announced = header.frame_size();
        if bytes.len() != announced {
            return Err(ProtocolError::TruncatedPayload {
                size: bytes.len(),
                announced,
            }
            .into());
        }
        Ok(Self::new(header, bytes))
    }

    /// The frame header.
    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    /// Message id shorthand.
    pub fn message_id(&self) -> MessageId {
        self.header.message_id
    }

    /// The complete frame: header bytes followed by the payload.
    pub fn data(&self) -> &[u8] {
        &self.bytes
    }

    /// The payload bytes (header excluded).
    pub fn payload(&self) -> &[u8] {
        &self.bytes[HEADER_SIZE..]
    }

    /// Total frame length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a header-only frame.
    pub fn is_empty(&self) -> bool {
        self.bytes.len() <= HEADER_SIZE
    }

    /// Reception time of the frame's header.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// True iff this frame is a ping result.
    pub fn is_ping(&self) -> bool {
        self.header.magic_valid() && self.header.message_id == MessageId::SimplePingResult
    }
}

/// Typed view over a ping-result frame.
///
/// Carries the parsed fixed part and exposes the trailing bearings array and
/// the opaque image bytes. The raw frame is shared, not copied.
#[derive(Debug, Clone)]
pub struct PingMessage {
    raw: RawMessage,
    head: PingHeader,
}

impl PingMessage {
    /// Parse a ping result out of a raw frame.
    pub fn from_raw(raw: RawMessage) -> Result<Self> {
        if raw.message_id() != MessageId::SimplePingResult {
            return Err(ProtocolError::UnexpectedMessage {
                expected: "SimplePingResult".into(),
                got: format!("{:?}", raw.message_id()),
            }
            .into());
        }
        let head = PingHeader::decode(raw.data())?;
        Ok(Self { raw, head })
    }

    /// The parsed fixed part.
    pub fn head(&self) -> &PingHeader {
        &self.head
    }

    /// The underlying frame.
    pub fn raw(&self) -> &RawMessage {
        &self.raw
    }

    /// Beam bearings in centi-degrees, one per beam.
    pub fn bearings(&self) -> Vec<i16> {
        let offset = self.head.bearings_offset();
        let count = self.head.beam_count as usize;
        let data = self.raw.data();
        let end = (offset + 2 * count).min(data.len());

        data[offset..end]
            .chunks_exact(2)
            .map(LittleEndian::read_i16)
            .collect()
    }

    /// The opaque image bytes.
    pub fn image(&self) -> &[u8] {
        let data = self.raw.data();
        let start = (self.head.image_offset as usize).min(data.len());
        let end = (start + self.head.image_size as usize).min(data.len());
        &data[start..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire::{FireConfig, PING_HEADER_SIZE_V2};
    use crate::protocol::MESSAGE_MAGIC;

    fn ping_frame(beams: u16, image: &[u8]) -> Vec<u8> {
        let bearings_len = 2 * beams as usize;
        let image_offset = PING_HEADER_SIZE_V2 + bearings_len;
        let total = image_offset + image.len();

        let mut head = PingHeader {
            fire: FireConfig::default(),
            ping_id: 1,
            status: 0,
            frequency: 0.0,
            temperature: 0.0,
            pressure: 0.0,
            heading: 0.0,
            pitch: 0.0,
            roll: 0.0,
            speed_of_sound_used: 1500.0,
            ping_start_time: 0.0,
            data_size: 0,
            range_resolution: 0.01,
            range_count: 1,
            beam_count: beams,
            image_offset: image_offset as u32,
            image_size: image.len() as u32,
            message_size: total as u32,
        };
        head.fire.header.magic = MESSAGE_MAGIC;
        head.fire.header.message_id = MessageId::SimplePingResult;
        head.fire.header.version = 2;
        head.fire.header.src_device = 17;
        head.fire.header.payload_size = (total - HEADER_SIZE) as u32;

        let mut frame = head.encode_v2();
        for i in 0..beams {
            let mut b = [0u8; 2];
            LittleEndian::write_i16(&mut b, i as i16 * 100);
            frame.extend_from_slice(&b);
        }
        frame.extend_from_slice(image);
        frame
    }

    #[test]
    fn test_parse_validates_length() {
        let frame = ping_frame(4, b"img!");
        let msg = RawMessage::parse(frame.clone()).unwrap();
        assert_eq!(msg.len(), frame.len());
        assert_eq!(msg.payload().len(), frame.len() - HEADER_SIZE);
        assert!(msg.is_ping());

        let mut short = frame;
        short.pop();
        assert!(RawMessage::parse(short).is_err());
    }

    #[test]
    fn test_ping_message_views() {
        let image = [7u8; 64];
        let msg = RawMessage::parse(ping_frame(4, &image)).unwrap();
        let ping = PingMessage::from_raw(msg).unwrap();

        assert_eq!(ping.head().beam_count, 4);
        assert_eq!(ping.bearings(), vec![0, 100, 200, 300]);
        assert_eq!(ping.image(), &image[..]);
    }

    #[test]
    fn test_ping_message_rejects_other_ids() {
        let header = MessageHeader {
            message_id: MessageId::Dummy,
            payload_size: 0,
            ..Default::default()
        };
        let mut bytes = vec![0u8; HEADER_SIZE];
        header.encode(&mut bytes).unwrap();
        let raw = RawMessage::parse(bytes).unwrap();
        assert!(PingMessage::from_raw(raw).is_err());
    }
}
