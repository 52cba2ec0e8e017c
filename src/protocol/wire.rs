//! Byte-exact wire records.
//!
//! Every record is read and written at explicit offsets with little-endian
//! byte order. Nothing here relies on in-memory struct layout: the wire form
//! is single-byte packed and mixes 8/16/32-bit integers with IEEE-754
//! doubles, so records are treated as opaque byte windows of the declared
//! size.

use std::net::Ipv4Addr;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{ProtocolError, Result};

use super::{FireFlags, MessageId, PingRate, MESSAGE_MAGIC};

/// Message header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Size of a v1 fire descriptor (header included).
pub const FIRE_CONFIG_SIZE_V1: usize = 53;

/// Size of a v2 fire descriptor (header included).
pub const FIRE_CONFIG_SIZE_V2: usize = 89;

/// Size of the fixed part of a v1 ping result (header included).
pub const PING_HEADER_SIZE_V1: usize = 122;

/// Size of the fixed part of a v2 ping result (header included).
pub const PING_HEADER_SIZE_V2: usize = 202;

/// Exact size of a status beacon datagram.
pub const STATUS_MESSAGE_SIZE: usize = 142;

/// Size of a user configuration message (header included).
pub const USER_CONFIG_SIZE: usize = 28;

/// The 16-byte header that frames every TCP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Wire magic; `MESSAGE_MAGIC` on every valid frame.
    pub magic: u16,
    /// Device id of the sender (the sonar on inbound frames, 0 outbound).
    pub src_device: u16,
    /// Device id of the addressee.
    pub dst_device: u16,
    /// Message identifier.
    pub message_id: MessageId,
    /// Message layout version.
    pub version: u16,
    /// Number of payload bytes following the header.
    pub payload_size: u32,
    /// Device model of the sender.
    pub part_number: u16,
}

impl MessageHeader {
    /// Decode a header from the first 16 bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::ShortMessage {
                size: buf.len(),
                need: HEADER_SIZE,
            }
            .into());
        }

        Ok(Self {
            magic: LittleEndian::read_u16(&buf[0..2]),
            src_device: LittleEndian::read_u16(&buf[2..4]),
            dst_device: LittleEndian::read_u16(&buf[4..6]),
            message_id: MessageId::from_u16(LittleEndian::read_u16(&buf[6..8])),
            version: LittleEndian::read_u16(&buf[8..10]),
            payload_size: LittleEndian::read_u32(&buf[10..14]),
            part_number: LittleEndian::read_u16(&buf[14..16]),
        })
    }

    /// Encode the header into the first 16 bytes of `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::ShortMessage {
                size: buf.len(),
                need: HEADER_SIZE,
            }
            .into());
        }

        LittleEndian::write_u16(&mut buf[0..2], self.magic);
        LittleEndian::write_u16(&mut buf[2..4], self.src_device);
        LittleEndian::write_u16(&mut buf[4..6], self.dst_device);
        LittleEndian::write_u16(&mut buf[6..8], self.message_id.as_u16());
        LittleEndian::write_u16(&mut buf[8..10], self.version);
        LittleEndian::write_u32(&mut buf[10..14], self.payload_size);
        LittleEndian::write_u16(&mut buf[14..16], self.part_number);
        Ok(())
    }

    /// True iff the wire magic matches.
    pub fn magic_valid(&self) -> bool {
        self.magic == MESSAGE_MAGIC
    }

    /// Total frame size (header + payload).
    pub fn frame_size(&self) -> usize {
        HEADER_SIZE + self.payload_size as usize
    }
}

impl Default for MessageHeader {
    fn default() -> Self {
        Self {
            magic: MESSAGE_MAGIC,
            src_device: 0,
            dst_device: 0,
            message_id: MessageId::Other(0),
            version: 0,
            payload_size: 0,
            part_number: 0,
        }
    }
}

/// Fire descriptor: the parameter block that commands the sonar to ping at
/// a given rate and configuration.
///
/// Two wire versions exist; the logical struct covers both. The v2 form is
/// what the driver sends (89 bytes, `version` 2); v1 (53 bytes, `version` 0)
/// is still decoded from older devices' ping results.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FireConfig {
    pub header: MessageHeader,
    /// Acoustic regime: 1 low-frequency wide aperture, 2 high-frequency
    /// narrow aperture.
    pub master_mode: u8,
    pub ping_rate: PingRate,
    /// Network speed cap in Mb/s; 0x00 or 0xFF = use link speed.
    pub network_speed: u8,
    /// Gamma correction; 0 and 0xFF = 1.0, 127 = 0.5.
    pub gamma: u8,
    pub flags: FireFlags,
    /// Range demand in metres or percent, per `FireFlags::RANGE_IN_METERS`.
    pub range: f64,
    /// Gain demand in percent.
    pub gain: f64,
    /// m/s; zero means "derive from salinity".
    pub speed_of_sound: f64,
    /// ppt; zero for fresh water.
    pub salinity: f64,
    /// Extended flags (v2 only; zero on v1 wire).
    pub ext_flags: u32,
}

impl FireConfig {
    /// Decode a fire descriptor starting at byte 0 of `buf` (header
    /// included). `version` selects the wire layout: 2 is the extended
    /// form, anything else the older 53-byte form.
    pub fn decode(buf: &[u8], version: u16) -> Result<Self> {
        let need = if version == 2 {
            FIRE_CONFIG_SIZE_V2
        } else {
            FIRE_CONFIG_SIZE_V1
        };
        if buf.len() < need {
            return Err(ProtocolError::ShortMessage {
                size: buf.len(),
                need,
            }
            .into());
        }

        let header = MessageHeader::decode(buf)?;
        let ext_flags = if version == 2 {
            LittleEndian::read_u32(&buf[53..57])
        } else {
            0
        };

        Ok(Self {
            header,
            master_mode: buf[16],
            ping_rate: PingRate::from_u8(buf[17]),
            network_speed: buf[18],
            gamma: buf[19],
            flags: FireFlags::new(buf[20]),
            range: LittleEndian::read_f64(&buf[21..29]),
            gain: LittleEndian::read_f64(&buf[29..37]),
            speed_of_sound: LittleEndian::read_f64(&buf[37..45]),
            salinity: LittleEndian::read_f64(&buf[45..53]),
            ext_flags,
        })
    }

    /// Encode as the v2 wire form (89 bytes). Reserved words are zero.
    pub fn encode_v2(&self) -> Vec<u8> {
        let mut buf = vec![0u8; FIRE_CONFIG_SIZE_V2];
        // encode() cannot fail on a buffer of the declared size
        let _ = self.header.encode(&mut buf);
        self.encode_body(&mut buf);
        LittleEndian::write_u32(&mut buf[53..57], self.ext_flags);
        buf
    }

    /// Encode as the older v1 wire form (53 bytes).
    pub fn encode_v1(&self) -> Vec<u8> {
        let mut buf = vec![0u8; FIRE_CONFIG_SIZE_V1];
        let _ = self.header.encode(&mut buf);
        self.encode_body(&mut buf);
        buf
    }

    fn encode_body(&self, buf: &mut [u8]) {
        buf[16] = self.master_mode;
        buf[17] = self.ping_rate.as_u8();
        buf[18] = self.network_speed;
        buf[19] = self.gamma;
        buf[20] = self.flags.bits();
        LittleEndian::write_f64(&mut buf[21..29], self.range);
        LittleEndian::write_f64(&mut buf[29..37], self.gain);
        LittleEndian::write_f64(&mut buf[37..45], self.speed_of_sound);
        LittleEndian::write_f64(&mut buf[45..53], self.salinity);
    }
}

impl Default for FireConfig {
    /// The factory fire configuration: high-frequency mode at the normal
    /// rate, 2.54 m range, 50 % gain, speed of sound derived from salinity.
    fn default() -> Self {
        Self {
            header: MessageHeader {
                magic: MESSAGE_MAGIC,
                src_device: 0,
                dst_device: 0,
                message_id: MessageId::SimpleFire,
                version: 2,
                payload_size: (FIRE_CONFIG_SIZE_V2 - HEADER_SIZE) as u32,
                part_number: 0,
            },
            master_mode: 2,
            ping_rate: PingRate::Normal,
            network_speed: 0xFF,
            gamma: 127,
            flags: FireFlags::new(0b0001_1101),
            range: 2.54,
            gain: 50.0,
            speed_of_sound: 0.0,
            salinity: 0.0,
            ext_flags: 0,
        }
    }
}

/// Fixed part of a ping result, merged over both wire versions.
///
/// Attitude fields (`heading`, `pitch`, `roll`) only exist on the v2 wire
/// and read as zero from v1 devices. `ping_start_time` is seconds since
/// sonar power-up; the v1 wire carries whole seconds only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PingHeader {
    /// The fire descriptor echoed back by the sonar.
    pub fire: FireConfig,
    /// Incrementing ping counter.
    pub ping_id: u32,
    pub status: u32,
    /// Acoustic frequency in Hz.
    pub frequency: f64,
    /// External temperature in °C.
    pub temperature: f64,
    /// External pressure in bar.
    pub pressure: f64,
    pub heading: f64,
    pub pitch: f64,
    pub roll: f64,
    /// Speed of sound actually used, m/s.
    pub speed_of_sound_used: f64,
    /// Seconds since sonar power-up.
    pub ping_start_time: f64,
    /// Raw data entry width; see [`super::DataSize`].
    pub data_size: u8,
    /// Metres covered by a single range line.
    pub range_resolution: f64,
    /// Number of range lines in the image.
    pub range_count: u16,
    /// Number of beams in the image.
    pub beam_count: u16,
    /// Image byte offset from the start of the message.
    pub image_offset: u32,
    /// Image size in bytes.
    pub image_size: u32,
    /// Total message size in bytes.
    pub message_size: u32,
}

impl PingHeader {
    /// Decode from a full message frame (header included). The layout is
    /// selected by the frame header's `version` field.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = MessageHeader::decode(buf)?;
        if header.version == 2 {
            Self::decode_v2(buf)
        } else {
            Self::decode_v1(buf)
        }
    }

    fn decode_v1(buf: &[u8]) -> Result<Self> {
        if buf.len() < PING_HEADER_SIZE_V1 {
            return Err(ProtocolError::ShortMessage {
                size: buf.len(),
                need: PING_HEADER_SIZE_V1,
            }
            .into());
        }

        Ok(Self {
            fire: FireConfig::decode(buf, 0)?,
            ping_id: LittleEndian::read_u32(&buf[53..57]),
            status: LittleEndian::read_u32(&buf[57..61]),
            frequency: LittleEndian::read_f64(&buf[61..69]),
            temperature: LittleEndian::read_f64(&buf[69..77]),
            pressure: LittleEndian::read_f64(&buf[77..85]),
            heading: 0.0,
            pitch: 0.0,
            roll: 0.0,
            speed_of_sound_used: LittleEndian::read_f64(&buf[85..93]),
            ping_start_time: f64::from(LittleEndian::read_u32(&buf[93..97])),
            data_size: buf[97],
            range_resolution: LittleEndian::read_f64(&buf[98..106]),
            range_count: LittleEndian::read_u16(&buf[106..108]),
            beam_count: LittleEndian::read_u16(&buf[108..110]),
            image_offset: LittleEndian::read_u32(&buf[110..114]),
            image_size: LittleEndian::read_u32(&buf[114..118]),
            message_size: LittleEndian::read_u32(&buf[118..122]),
        })
    }

    fn decode_v2(buf: &[u8]) -> Result<Self> {
        if buf.len() < PING_HEADER_SIZE_V2 {
            return Err(ProtocolError::ShortMessage {
                size: buf.len(),
                need: PING_HEADER_SIZE_V2,
            }
            .into());
        }

        Ok(Self {
            fire: FireConfig::decode(buf, 2)?,
            ping_id: LittleEndian::read_u32(&buf[89..93]),
            status: LittleEndian::read_u32(&buf[93..97]),
            frequency: LittleEndian::read_f64(&buf[97..105]),
            temperature: LittleEndian::read_f64(&buf[105..113]),
            pressure: LittleEndian::read_f64(&buf[113..121]),
            heading: LittleEndian::read_f64(&buf[121..129]),
            pitch: LittleEndian::read_f64(&buf[129..137]),
            roll: LittleEndian::read_f64(&buf[137..145]),
            speed_of_sound_used: LittleEndian::read_f64(&buf[145..153]),
            ping_start_time: LittleEndian::read_f64(&buf[153..161]),
            data_size: buf[161],
            range_resolution: LittleEndian::read_f64(&buf[162..170]),
            range_count: LittleEndian::read_u16(&buf[170..172]),
            beam_count: LittleEndian::read_u16(&buf[172..174]),
            // four spare words at 174..190
            image_offset: LittleEndian::read_u32(&buf[190..194]),
            image_size: LittleEndian::read_u32(&buf[194..198]),
            message_size: LittleEndian::read_u32(&buf[198..202]),
        })
    }

    /// Encode the fixed part as the v2 wire form (202 bytes).
    pub fn encode_v2(&self) -> Vec<u8> {
        let mut buf = self.fire.encode_v2();
        buf.resize(PING_HEADER_SIZE_V2, 0);
        LittleEndian::write_u32(&mut buf[89..93], self.ping_id);
        LittleEndian::write_u32(&mut buf[93..97], self.status);
        LittleEndian::write_f64(&mut buf[97..105], self.frequency);
        LittleEndian::write_f64(&mut buf[105..113], self.temperature);
        LittleEndian::write_f64(&mut buf[113..121], self.pressure);
        LittleEndian::write_f64(&mut buf[121..129], self.heading);
        LittleEndian::write_f64(&mut buf[129..137], self.pitch);
        LittleEndian::write_f64(&mut buf[137..145], self.roll);
        LittleEndian::write_f64(&mut buf[145..153], self.speed_of_sound_used);
        LittleEndian::write_f64(&mut buf[153..161], self.ping_start_time);
        buf[161] = self.data_size;
        LittleEndian::write_f64(&mut buf[162..170], self.range_resolution);
        LittleEndian::write_u16(&mut buf[170..172], self.range_count);
        LittleEndian::write_u16(&mut buf[172..174], self.beam_count);
        LittleEndian::write_u32(&mut buf[190..194], self.image_offset);
        LittleEndian::write_u32(&mut buf[194..198], self.image_size);
        LittleEndian::write_u32(&mut buf[198..202], self.message_size);
        buf
    }

    /// Width of one image data entry.
    pub fn entry_size(&self) -> super::DataSize {
        super::DataSize::from_u8(self.data_size)
    }

    /// Byte offset of the bearings array within the message.
    pub fn bearings_offset(&self) -> usize {
        if self.fire.header.version == 2 {
            PING_HEADER_SIZE_V2
        } else {
            PING_HEADER_SIZE_V1
        }
    }
}

/// Firmware version block carried in status beacons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionInfo {
    pub arm0_version: u32,
    pub arm0_date: u32,
    pub arm1_version: u32,
    pub arm1_date: u32,
    pub core_version: u32,
    pub core_date: u32,
}

impl VersionInfo {
    fn decode(buf: &[u8]) -> Self {
        Self {
            arm0_version: LittleEndian::read_u32(&buf[0..4]),
            arm0_date: LittleEndian::read_u32(&buf[4..8]),
            arm1_version: LittleEndian::read_u32(&buf[8..12]),
            arm1_date: LittleEndian::read_u32(&buf[12..16]),
            core_version: LittleEndian::read_u32(&buf[16..20]),
            core_date: LittleEndian::read_u32(&buf[20..24]),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(&mut buf[0..4], self.arm0_version);
        LittleEndian::write_u32(&mut buf[4..8], self.arm0_date);
        LittleEndian::write_u32(&mut buf[8..12], self.arm1_version);
        LittleEndian::write_u32(&mut buf[12..16], self.arm1_date);
        LittleEndian::write_u32(&mut buf[16..20], self.core_version);
        LittleEndian::write_u32(&mut buf[20..24], self.core_date);
    }

    /// Render a packed version word as `major.minor.build`.
    pub fn format_version(version: u32) -> String {
        format!(
            "{}.{}.{}",
            version & 0xFF,
            (version >> 8) & 0xFF,
            version >> 16
        )
    }
}

/// Status beacon: periodic UDP broadcast advertising identity and health.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusMessage {
    pub header: MessageHeader,
    pub device_id: u32,
    pub device_type: u16,
    pub part_number: u16,
    pub status: u32,
    pub version_info: VersionInfo,
    /// Sonar IP, stored in packet byte order (first octet first).
    pub ip_addr: u32,
    pub ip_mask: u32,
    /// The client IP the sonar currently sees.
    pub client_addr: u32,
    pub mac: [u8; 6],
    /// Eight temperature channels, °C.
    pub temperatures: [f64; 8],
    /// External pressure, bar.
    pub pressure: f64,
}

impl StatusMessage {
    /// Decode from an exact-size status datagram.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < STATUS_MESSAGE_SIZE {
            return Err(ProtocolError::ShortMessage {
                size: buf.len(),
                need: STATUS_MESSAGE_SIZE,
            }
            .into());
        }

        let mut mac = [0u8; 6];
        mac.copy_from_slice(&buf[64..70]);

        let mut temperatures = [0f64; 8];
        for (i, slot) in temperatures.iter_mut().enumerate() {
            *slot = LittleEndian::read_f64(&buf[70 + 8 * i..78 + 8 * i]);
        }

        Ok(Self {
            header: MessageHeader::decode(buf)?,
            device_id: LittleEndian::read_u32(&buf[16..20]),
            device_type: LittleEndian::read_u16(&buf[20..22]),
            part_number: LittleEndian::read_u16(&buf[22..24]),
            status: LittleEndian::read_u32(&buf[24..28]),
            version_info: VersionInfo::decode(&buf[28..52]),
            ip_addr: LittleEndian::read_u32(&buf[52..56]),
            ip_mask: LittleEndian::read_u32(&buf[56..60]),
            client_addr: LittleEndian::read_u32(&buf[60..64]),
            mac,
            temperatures,
            pressure: LittleEndian::read_f64(&buf[134..142]),
        })
    }

    /// Encode into an exact-size status datagram.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; STATUS_MESSAGE_SIZE];
        let _ = self.header.encode(&mut buf);
        LittleEndian::write_u32(&mut buf[16..20], self.device_id);
        LittleEndian::write_u16(&mut buf[20..22], self.device_type);
        LittleEndian::write_u16(&mut buf[22..24], self.part_number);
        LittleEndian::write_u32(&mut buf[24..28], self.status);
        self.version_info.encode(&mut buf[28..52]);
        LittleEndian::write_u32(&mut buf[52..56], self.ip_addr);
        LittleEndian::write_u32(&mut buf[56..60], self.ip_mask);
        LittleEndian::write_u32(&mut buf[60..64], self.client_addr);
        buf[64..70].copy_from_slice(&self.mac);
        for (i, t) in self.temperatures.iter().enumerate() {
            LittleEndian::write_f64(&mut buf[70 + 8 * i..78 + 8 * i], *t);
        }
        LittleEndian::write_f64(&mut buf[134..142], self.pressure);
        buf
    }

    /// Announced sonar IP address.
    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip_addr.to_le_bytes())
    }

    /// Announced network mask.
    pub fn mask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip_mask.to_le_bytes())
    }

    /// The client address the sonar currently sees.
    pub fn client_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.client_addr.to_le_bytes())
    }

    /// Device model.
    pub fn part(&self) -> super::PartNumber {
        super::PartNumber::from_u16(self.part_number)
    }

    /// MAC address in conventional notation.
    pub fn mac_string(&self) -> String {
        let m = &self.mac;
        format!(
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }

    /// Build an IP helper from octets, for tests and tooling.
    pub fn pack_ip(addr: Ipv4Addr) -> u32 {
        u32::from_le_bytes(addr.octets())
    }
}

impl Default for StatusMessage {
    fn default() -> Self {
        Self {
            header: MessageHeader {
                message_id: MessageId::Status,
                payload_size: (STATUS_MESSAGE_SIZE - HEADER_SIZE) as u32,
                ..Default::default()
            },
            device_id: 0,
            device_type: 0,
            part_number: 0,
            status: 0,
            version_info: VersionInfo::default(),
            ip_addr: 0,
            ip_mask: 0,
            client_addr: 0,
            mac: [0; 6],
            temperatures: [0.0; 8],
            pressure: 0.0,
        }
    }
}

/// Network configuration record carried in a UserConfig message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserConfig {
    pub ip_addr: u32,
    pub ip_mask: u32,
    pub dhcp_enable: u32,
}

impl UserConfig {
    /// Decode from a full UserConfig message frame (header included).
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < USER_CONFIG_SIZE {
            return Err(ProtocolError::ShortMessage {
                size: buf.len(),
                need: USER_CONFIG_SIZE,
            }
            .into());
        }

        Ok(Self {
            ip_addr: LittleEndian::read_u32(&buf[16..20]),
            ip_mask: LittleEndian::read_u32(&buf[20..24]),
            dhcp_enable: LittleEndian::read_u32(&buf[24..28]),
        })
    }
}
