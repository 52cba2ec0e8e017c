//! Wire protocol for the sonar's network surfaces.
//!
//! Every TCP message begins with a 16-byte header:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Magic (2) │ Src (2) │ Dst (2) │ MsgId (2) │ Version (2)          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │ PayloadSize (4) │ PartNumber (2) │ Payload (PayloadSize bytes)…  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian, all records single-byte packed, doubles
//! are IEEE-754. Records are encoded and decoded at explicit offsets; no
//! struct is ever reinterpreted from raw memory. Enumerations travel as
//! their underlying integer and unknown values are preserved verbatim.

mod framing;
mod message;
mod wire;

pub use framing::{read_frame, FrameReader, MAX_FRAME_SIZE};
pub use message::{PingMessage, RawMessage};
pub use wire::{
    FireConfig, MessageHeader, PingHeader, StatusMessage, UserConfig, VersionInfo,
    FIRE_CONFIG_SIZE_V1, FIRE_CONFIG_SIZE_V2, HEADER_SIZE, PING_HEADER_SIZE_V1,
    PING_HEADER_SIZE_V2, STATUS_MESSAGE_SIZE, USER_CONFIG_SIZE,
};

/// Message magic: the ASCII byte pair `SO` read as a little-endian u16.
pub const MESSAGE_MAGIC: u16 = 0x4F53;

/// Message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    Status,
    SimpleFire,
    PingResult,
    SimplePingResult,
    UserConfig,
    BootInfo,
    Dummy,
    /// Unknown id, preserved verbatim.
    Other(u16),
}

impl MessageId {
    pub fn from_u16(v: u16) -> Self {
        match v {
            1 => Self::Status,
            21 => Self::SimpleFire,
            34 => Self::PingResult,
            35 => Self::SimplePingResult,
            85 => Self::UserConfig,
            128 => Self::BootInfo,
            255 => Self::Dummy,
            other => Self::Other(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Self::Status => 1,
            Self::SimpleFire => 21,
            Self::PingResult => 34,
            Self::SimplePingResult => 35,
            Self::UserConfig => 85,
            Self::BootInfo => 128,
            Self::Dummy => 255,
            Self::Other(v) => v,
        }
    }
}

/// Maximum ping rate demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PingRate {
    /// 10 Hz max ping rate (default).
    Normal,
    /// 15 Hz max ping rate.
    High,
    /// 40 Hz max ping rate.
    Highest,
    /// 5 Hz max ping rate.
    Low,
    /// 2 Hz max ping rate.
    Lowest,
    /// Pinging disabled; the sonar emits dummy messages instead.
    Standby,
    /// Unknown rate, preserved verbatim.
    Other(u8),
}

impl PingRate {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Normal,
            1 => Self::High,
            2 => Self::Highest,
            3 => Self::Low,
            4 => Self::Lowest,
            5 => Self::Standby,
            other => Self::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::High => 1,
            Self::Highest => 2,
            Self::Low => 3,
            Self::Lowest => 4,
            Self::Standby => 5,
            Self::Other(v) => v,
        }
    }

    /// Nominal maximum rate in Hz, if known.
    pub fn frequency_hz(self) -> Option<f64> {
        match self {
            Self::Normal => Some(10.0),
            Self::High => Some(15.0),
            Self::Highest => Some(40.0),
            Self::Low => Some(5.0),
            Self::Lowest => Some(2.0),
            Self::Standby => Some(0.0),
            Self::Other(_) => None,
        }
    }
}

/// Width of one image data entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataSize {
    Bits8,
    Bits16,
    Bits24,
    Bits32,
    /// Unknown width, preserved verbatim.
    Other(u8),
}

impl DataSize {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Bits8,
            1 => Self::Bits16,
            2 => Self::Bits24,
            3 => Self::Bits32,
            other => Self::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Bits8 => 0,
            Self::Bits16 => 1,
            Self::Bits24 => 2,
            Self::Bits32 => 3,
            Self::Other(v) => v,
        }
    }

    /// Bytes per image entry, if known.
    pub fn entry_bytes(self) -> Option<usize> {
        match self {
            Self::Bits8 => Some(1),
            Self::Bits16 => Some(2),
            Self::Bits24 => Some(3),
            Self::Bits32 => Some(4),
            Self::Other(_) => None,
        }
    }
}

/// Device model, announced in status beacons and message headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartNumber {
    Undefined,
    M370s,
    Mt370s,
    Md370s,
    Mf370s,
    Ma370s,
    M750d,
    Mt750d,
    Md750d,
    Mf750d,
    Ma750d,
    M1200d,
    Mt1200d,
    Md1200d,
    Mf1200d,
    Ma1200d,
    M3000d,
    Mt3000d,
    Mf3000d,
    Ma3000d,
    /// Unknown model, preserved verbatim.
    Other(u16),
}

impl PartNumber {
    pub fn from_u16(v: u16) -> Self {
        match v {
            0 => Self::Undefined,
            1041 => Self::M370s,
            2418 => Self::Mt370s,
            1433 => Self::Md370s,
            1436 => Self::Mf370s,
            1229 => Self::Ma370s,
            1032 => Self::M750d,
            2419 => Self::Mt750d,
            1434 => Self::Md750d,
            1134 => Self::Mf750d,
            1135 => Self::Ma750d,
            1042 => Self::M1200d,
            2420 => Self::Mt1200d,
            1435 => Self::Md1200d,
            1437 => Self::Mf1200d,
            1228 => Self::Ma1200d,
            2203 => Self::M3000d,
            2599 => Self::Mt3000d,
            2466 => Self::Mf3000d,
            2924 => Self::Ma3000d,
            other => Self::Other(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Self::Undefined => 0,
            Self::M370s => 1041,
            Self::Mt370s => 2418,
            Self::Md370s => 1433,
            Self::Mf370s => 1436,
            Self::Ma370s => 1229,
            Self::M750d => 1032,
            Self::Mt750d => 2419,
            Self::Md750d => 1434,
            Self::Mf750d => 1134,
            Self::Ma750d => 1135,
            Self::M1200d => 1042,
            Self::Mt1200d => 2420,
            Self::Md1200d => 1435,
            Self::Mf1200d => 1437,
            Self::Ma1200d => 1228,
            Self::M3000d => 2203,
            Self::Mt3000d => 2599,
            Self::Mf3000d => 2466,
            Self::Ma3000d => 2924,
            Self::Other(v) => v,
        }
    }
}

/// Fire descriptor flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FireFlags(u8);

impl FireFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// Range demand is in metres (else percent of the maximum).
    pub const RANGE_IN_METERS: u8 = 1 << 0;

    /// 16-bit image entries (else 8-bit).
    pub const IMAGE_16BIT: u8 = 1 << 1;

    /// Return the gain at the start of each range line.
    pub const GAIN_SEND: u8 = 1 << 2;

    /// Output simple ping returns.
    pub const SIMPLE_RETURN: u8 = 1 << 3;

    /// Gain assist disabled.
    pub const GAIN_ASSIST_OFF: u8 = 1 << 4;

    /// Low power mode.
    pub const LOW_POWER: u8 = 1 << 5;

    /// Use 512 beams (else 256).
    pub const FULL_BEAMS: u8 = 1 << 6;

    /// Fire only when instructed (else automatically at the ping rate).
    pub const NETWORK_TRIGGER: u8 = 1 << 7;

    /// Create new flags.
    pub fn new(bits: u8) -> Self {
        Self(bits)
    }

    /// Check if a flag is set.
    pub fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    /// Set a flag.
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Clear a flag.
    pub fn clear(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    /// Get raw bits.
    pub fn bits(self) -> u8 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_roundtrip() {
        for v in [1u16, 21, 34, 35, 85, 128, 255, 7, 40000] {
            assert_eq!(MessageId::from_u16(v).as_u16(), v);
        }
        assert_eq!(MessageId::from_u16(35), MessageId::SimplePingResult);
        assert_eq!(MessageId::from_u16(7), MessageId::Other(7));
    }

    #[test]
    fn test_ping_rate_roundtrip() {
        for v in 0..=u8::MAX {
            assert_eq!(PingRate::from_u8(v).as_u8(), v);
        }
        assert_eq!(PingRate::from_u8(5), PingRate::Standby);
    }

    #[test]
    fn test_data_size_entry_bytes() {
        assert_eq!(DataSize::from_u8(0).entry_bytes(), Some(1));
        assert_eq!(DataSize::from_u8(3).entry_bytes(), Some(4));
        assert_eq!(DataSize::from_u8(9).entry_bytes(), None);
    }

    #[test]
    fn test_fire_flags() {
        let mut flags = FireFlags::new(0b0001_1101);
        assert!(flags.has(FireFlags::RANGE_IN_METERS));
        assert!(!flags.has(FireFlags::IMAGE_16BIT));
        assert!(flags.has(FireFlags::GAIN_SEND));
        assert!(flags.has(FireFlags::SIMPLE_RETURN));
        assert!(flags.has(FireFlags::GAIN_ASSIST_OFF));
        assert!(!flags.has(FireFlags::NETWORK_TRIGGER));

        flags.set(FireFlags::LOW_POWER);
        assert!(flags.has(FireFlags::LOW_POWER));
        flags.clear(FireFlags::LOW_POWER);
        assert!(!flags.has(FireFlags::LOW_POWER));
        assert_eq!(flags.bits(), 0b0001_1101);
    }
}
