//! In-process mock sonar used by the integration tests: a TCP listener
//! standing in for the device's data channel and a UDP socket producing
//! status beacons.

#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, UdpSocket};

use vodnik::config::DriverConfig;
use vodnik::protocol::{
    FireConfig, MessageHeader, MessageId, PingHeader, StatusMessage, HEADER_SIZE,
    PING_HEADER_SIZE_V2, STATUS_MESSAGE_SIZE,
};

pub const DEVICE_ID: u16 = 17;

pub struct MockSonar {
    pub device_id: u16,
    listener: TcpListener,
    udp: UdpSocket,
}

impl MockSonar {
    pub async fn start(device_id: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Self {
            device_id,
            listener,
            udp,
        }
    }

    pub fn data_port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    /// Driver config pointing at this mock, with timeouts scaled down so
    /// watchdog scenarios finish quickly.
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            status_port: 0,
            data_port: self.data_port(),
            checker_period: Duration::from_millis(100),
            status_timeout: Duration::from_millis(500),
            message_timeout: Duration::from_millis(1200),
            connect_timeout: Duration::from_secs(2),
            feedback_timeout: Duration::from_millis(500),
            max_config_requests: 3,
            ..Default::default()
        }
    }

    pub fn status(&self) -> StatusMessage {
        let mut status = StatusMessage {
            device_id: u32::from(self.device_id),
            device_type: 1,
            part_number: 1032,
            ip_addr: StatusMessage::pack_ip(Ipv4Addr::new(127, 0, 0, 1)),
            ip_mask: StatusMessage::pack_ip(Ipv4Addr::new(255, 255, 255, 0)),
            ..Default::default()
        };
        status.header.src_device = self.device_id;
        status.header.message_id = MessageId::Status;
        status.header.payload_size = (STATUS_MESSAGE_SIZE - HEADER_SIZE) as u32;
        status
    }

    /// Broadcast one status beacon to the driver's status port.
    pub async fn send_status(&self, status_port: u16) {
        self.udp
            .send_to(&self.status().encode(), ("127.0.0.1", status_port))
            .await
            .unwrap();
    }

    /// Wait for the driver's TCP connection.
    pub async fn accept(&self) -> TcpStream {
        tokio::time::timeout(Duration::from_secs(5), self.listener.accept())
            .await
            .expect("driver did not connect")
            .unwrap()
            .0
    }
}

/// A header-only dummy frame, as the sonar emits in standby.
pub fn dummy_frame(device_id: u16) -> Vec<u8> {
    let header = MessageHeader {
        src_device: device_id,
        message_id: MessageId::Dummy,
        payload_size: 0,
        ..Default::default()
    };
    let mut bytes = vec![0u8; HEADER_SIZE];
    header.encode(&mut bytes).unwrap();
    bytes
}

/// A minimal SimplePingResult frame (v2 fixed part, no bearings, no image)
/// echoing `fire`.
pub fn ping_frame(device_id: u16, fire: FireConfig) -> Vec<u8> {
    let mut head = PingHeader {
        fire,
        ping_id: 1,
        status: 0,
        frequency: 750_000.0,
        temperature: 10.0,
        pressure: 1.0,
        heading: 0.0,
        pitch: 0.0,
        roll: 0.0,
        speed_of_sound_used: 1500.0,
        ping_start_time: 0.0,
        data_size: 0,
        range_resolution: 0.01,
        range_count: 0,
        beam_count: 0,
        image_offset: PING_HEADER_SIZE_V2 as u32,
        image_size: 0,
        message_size: PING_HEADER_SIZE_V2 as u32,
    };
    head.fire.header.src_device = device_id;
    head.fire.header.dst_device = 0;
    head.fire.header.message_id = MessageId::SimplePingResult;
    head.fire.header.version = 2;
    head.fire.header.payload_size = (PING_HEADER_SIZE_V2 - HEADER_SIZE) as u32;
    head.encode_v2()
}

/// Poll `cond` until it holds or a 5 s deadline passes.
pub async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
