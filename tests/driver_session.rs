//! End-to-end session tests against an in-process mock sonar.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use vodnik::driver::check_config_feedback;
use vodnik::protocol::{
    FireConfig, FireFlags, MessageHeader, MessageId, PingRate, FIRE_CONFIG_SIZE_V2, HEADER_SIZE,
};
use vodnik::SonarDriver;

use common::{dummy_frame, ping_frame, wait_for, MockSonar, DEVICE_ID};

/// Run the discovery dance: reset, broadcast a status, accept the TCP
/// connection, wait until the driver reports `Connected`.
async fn connect_driver(sonar: &MockSonar) -> (SonarDriver, TcpStream) {
    let driver = SonarDriver::new(sonar.driver_config()).await.unwrap();
    let status_port = driver.status_listener().local_addr().port();

    driver.reset_connection();
    sonar.send_status(status_port).await;

    let stream = sonar.accept().await;
    wait_for("driver connected", || driver.connected()).await;

    (driver, stream)
}

#[tokio::test]
async fn test_discovery_learns_peer_and_connects() {
    let sonar = MockSonar::start(DEVICE_ID).await;
    let driver = SonarDriver::new(sonar.driver_config()).await.unwrap();
    let status_port = driver.status_listener().local_addr().port();

    let status_hits = Arc::new(AtomicUsize::new(0));
    let connect_hits = Arc::new(AtomicUsize::new(0));
    {
        let status_hits = Arc::clone(&status_hits);
        driver.status_callbacks().append(move |_| {
            status_hits.fetch_add(1, Ordering::SeqCst);
        });
        let connect_hits = Arc::clone(&connect_hits);
        driver.connect_callbacks().append(move |_| {
            connect_hits.fetch_add(1, Ordering::SeqCst);
        });
    }

    driver.reset_connection();
    sonar.send_status(status_port).await;
    let _stream = sonar.accept().await;
    wait_for("driver connected", || driver.connected()).await;

    assert_eq!(driver.sonar_id(), DEVICE_ID);
    let remote = driver.remote().unwrap();
    assert_eq!(remote.port(), sonar.data_port());
    assert_eq!(remote.ip().to_string(), "127.0.0.1");

    // The snapshot re-dispatch precedes the connect event, so once the
    // connect observer ran the status observer must have run twice: the
    // datagram itself, plus the on-connect re-dispatch.
    wait_for("connect event", || connect_hits.load(Ordering::SeqCst) == 1).await;
    assert_eq!(status_hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_frame_reception() {
    let sonar = MockSonar::start(DEVICE_ID).await;
    let (driver, mut stream) = connect_driver(&sonar).await;

    let lengths = Arc::new(Mutex::new(Vec::new()));
    {
        let lengths = Arc::clone(&lengths);
        driver.message_callbacks().append(move |msg| {
            lengths.lock().push(msg.len());
        });
    }

    // A 260-byte payload behind a valid header: exactly one 276-byte event.
    let header = MessageHeader {
        src_device: DEVICE_ID,
        message_id: MessageId::SimplePingResult,
        version: 2,
        payload_size: 260,
        ..Default::default()
    };
    let mut frame = vec![0u8; HEADER_SIZE];
    header.encode(&mut frame).unwrap();
    frame.extend_from_slice(&[0u8; 260]);
    stream.write_all(&frame).await.unwrap();

    wait_for("one message", || !lengths.lock().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*lengths.lock(), vec![276]);
}

#[tokio::test]
async fn test_desync_recovers_at_next_header() {
    let sonar = MockSonar::start(DEVICE_ID).await;
    let (driver, mut stream) = connect_driver(&sonar).await;

    let messages = Arc::new(Mutex::new(Vec::new()));
    {
        let messages = Arc::clone(&messages);
        driver.message_callbacks().append(move |msg| {
            messages.lock().push((*msg.header(), msg.len()));
        });
    }

    // Four junk bytes, then two valid frames. The junk must yield zero
    // events; reception realigns on the next header magic.
    let mut bytes = vec![0xDE, 0xAD, 0xBE, 0xEF];
    bytes.extend(ping_frame(DEVICE_ID, FireConfig::default()));
    bytes.extend(dummy_frame(DEVICE_ID));
    stream.write_all(&bytes).await.unwrap();

    wait_for("both frames", || messages.lock().len() >= 2).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let messages = messages.lock();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].0.message_id, MessageId::SimplePingResult);
    assert_eq!(messages[1].0.message_id, MessageId::Dummy);
    assert_eq!(messages[1].1, HEADER_SIZE);
    assert!(driver.desync_count() > 0);
}

#[tokio::test]
async fn test_standby_roundtrip() {
    let sonar = MockSonar::start(DEVICE_ID).await;
    let (driver, mut stream) = connect_driver(&sonar).await;

    let changes = Arc::new(Mutex::new(Vec::new()));
    let dummies = Arc::new(AtomicUsize::new(0));
    {
        let changes = Arc::clone(&changes);
        driver.config_callbacks().append(move |(prev, next)| {
            changes.lock().push((*prev, *next));
        });
        let dummies = Arc::clone(&dummies);
        driver.dummy_callbacks().append(move |_| {
            dummies.fetch_add(1, Ordering::SeqCst);
        });
    }

    assert!(driver.standby().await);

    // The wire carries a v2 fire descriptor addressed to the sonar.
    let mut buf = [0u8; FIRE_CONFIG_SIZE_V2];
    stream.read_exact(&mut buf).await.unwrap();
    let sent = FireConfig::decode(&buf, 2).unwrap();
    assert_eq!(sent.header.message_id, MessageId::SimpleFire);
    assert_eq!(sent.header.dst_device, DEVICE_ID);
    assert_eq!(sent.header.src_device, 0);
    assert_eq!(sent.ping_rate, PingRate::Standby);
    assert_eq!(sent.network_speed, 0xFF);

    // The sonar acknowledges standby with dummy messages.
    stream.write_all(&dummy_frame(DEVICE_ID)).await.unwrap();
    wait_for("dummy received", || dummies.load(Ordering::SeqCst) == 1).await;

    let mut dummy_feedback = driver.last_fire_config();
    dummy_feedback.header.message_id = MessageId::Dummy;
    assert!(check_config_feedback(&sent, &dummy_feedback));

    let changes = changes.lock();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].1.ping_rate, PingRate::Standby);
    assert_eq!(driver.last_fire_config().ping_rate, PingRate::Standby);
}

#[tokio::test]
async fn test_resume_returns_to_last_rate() {
    let sonar = MockSonar::start(DEVICE_ID).await;
    let (driver, mut stream) = connect_driver(&sonar).await;

    let mut fast = FireConfig::default();
    fast.ping_rate = PingRate::Highest;
    assert!(driver.send_fire_config(fast).await);
    let mut buf = [0u8; FIRE_CONFIG_SIZE_V2];
    stream.read_exact(&mut buf).await.unwrap();

    assert!(driver.standby().await);
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(driver.last_fire_config().ping_rate, PingRate::Standby);

    assert!(driver.resume().await);
    stream.read_exact(&mut buf).await.unwrap();
    let resumed = FireConfig::decode(&buf, 2).unwrap();
    assert_eq!(resumed.ping_rate, PingRate::Highest);
    assert_eq!(driver.last_fire_config().ping_rate, PingRate::Highest);
}

#[tokio::test]
async fn test_mode2_gain_rescale() {
    let sonar = MockSonar::start(DEVICE_ID).await;
    let (driver, mut stream) = connect_driver(&sonar).await;

    let request = FireConfig {
        master_mode: 2,
        gain: 50.0,
        ..Default::default()
    };
    assert!(driver.send_fire_config(request).await);
    let mut buf = [0u8; FIRE_CONFIG_SIZE_V2];
    stream.read_exact(&mut buf).await.unwrap();

    // The sonar clamps mode-2 gain to [40, 100]: a 50 % request is echoed
    // as 70. The driver rescales it back to the client-side scale.
    let echoed = FireConfig {
        master_mode: 2,
        gain: 70.0,
        ..Default::default()
    };
    stream.write_all(&ping_frame(DEVICE_ID, echoed)).await.unwrap();

    wait_for("gain rescaled", || {
        (driver.last_fire_config().gain - 50.0).abs() < 1e-9
    })
    .await;
}

#[tokio::test]
async fn test_dispatch_order_config_message_ping() {
    let sonar = MockSonar::start(DEVICE_ID).await;
    let (driver, mut stream) = connect_driver(&sonar).await;

    let order = Arc::new(Mutex::new(Vec::new()));
    {
        let order2 = Arc::clone(&order);
        driver.config_callbacks().append(move |_| {
            order2.lock().push("config");
        });
        let order2 = Arc::clone(&order);
        driver.message_callbacks().append(move |_| {
            order2.lock().push("message");
        });
        let order2 = Arc::clone(&order);
        driver.ping_callbacks().append(move |_| {
            order2.lock().push("ping");
        });
    }

    // A descriptor differing in gamma: the change is detectable.
    let echoed = FireConfig {
        gamma: 200,
        ..Default::default()
    };
    stream.write_all(&ping_frame(DEVICE_ID, echoed)).await.unwrap();

    wait_for("all three events", || order.lock().len() >= 3).await;
    assert_eq!(*order.lock(), vec!["config", "message", "ping"]);
}

#[tokio::test]
async fn test_reconnect_idempotence() {
    let sonar = MockSonar::start(DEVICE_ID).await;
    let driver = SonarDriver::new(sonar.driver_config()).await.unwrap();
    let status_port = driver.status_listener().local_addr().port();

    let connects = Arc::new(AtomicUsize::new(0));
    {
        let connects = Arc::clone(&connects);
        driver.connect_callbacks().append(move |_| {
            connects.fetch_add(1, Ordering::SeqCst);
        });
    }

    // Repeated resets before any status: only one discovery stays armed.
    for _ in 0..5 {
        driver.reset_connection();
    }
    sonar.send_status(status_port).await;
    let _first = sonar.accept().await;
    wait_for("first connect", || driver.connected()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connects.load(Ordering::SeqCst), 1);

    // A full reconnect cycle: one more handshake, one more dispatch.
    driver.reset_connection();
    assert!(!driver.connected());
    sonar.send_status(status_port).await;
    let _second = sonar.accept().await;
    wait_for("second connect", || driver.connected()).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(connects.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_request_fire_config_reaches_coherence() {
    let sonar = MockSonar::start(DEVICE_ID).await;
    let (driver, stream) = connect_driver(&sonar).await;

    // Echo server: answer every fire command with a ping result carrying
    // the requested descriptor, briefly delayed so the feedback
    // subscription is armed.
    let echo = tokio::spawn(async move {
        let mut stream = stream;
        let mut buf = [0u8; FIRE_CONFIG_SIZE_V2];
        loop {
            if stream.read_exact(&mut buf).await.is_err() {
                return;
            }
            let request = FireConfig::decode(&buf, 2).unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            let frame = ping_frame(DEVICE_ID, request);
            if stream.write_all(&frame).await.is_err() {
                return;
            }
        }
    });

    let request = FireConfig {
        master_mode: 1,
        gamma: 150,
        range: 10.0,
        gain: 60.0,
        ..Default::default()
    };
    let feedback = driver.request_fire_config(request).await;

    assert_eq!(feedback.header.message_id, MessageId::SimplePingResult);
    assert_eq!(feedback.gamma, 150);
    assert_eq!(feedback.range, 10.0);
    assert!(feedback.flags.has(FireFlags::GAIN_SEND));

    echo.abort();
}

#[tokio::test]
async fn test_request_fire_config_sentinel_on_silence() {
    let sonar = MockSonar::start(DEVICE_ID).await;
    let (driver, _stream) = connect_driver(&sonar).await;

    // The mock never answers: after max_config_requests attempts the
    // request comes back with a zeroed message id.
    let request = FireConfig::default();
    let feedback = driver.request_fire_config(request).await;
    assert_eq!(feedback.header.message_id.as_u16(), 0);
}

#[tokio::test]
async fn test_send_while_disconnected() {
    let sonar = MockSonar::start(DEVICE_ID).await;
    let driver = SonarDriver::new(sonar.driver_config()).await.unwrap();

    assert_eq!(driver.send(b"anything").await.unwrap(), 0);
    assert!(!driver.send_fire_config(FireConfig::default()).await);

    // The requested rate is recorded even though nothing went out.
    let mut standby = FireConfig::default();
    standby.ping_rate = PingRate::Standby;
    assert!(!driver.send_fire_config(standby).await);
    assert_eq!(driver.last_fire_config().ping_rate, PingRate::Standby);
}

#[tokio::test]
async fn test_close_connection_returns_to_initializing() {
    let sonar = MockSonar::start(DEVICE_ID).await;
    let (driver, _stream) = connect_driver(&sonar).await;

    driver.close_connection();
    assert!(!driver.connected());
    assert_eq!(driver.send(b"x").await.unwrap(), 0);
}

#[tokio::test]
async fn test_recorder_captures_raw_frames() {
    use vodnik::recorder::FileRecorder;

    let sonar = MockSonar::start(DEVICE_ID).await;
    let (driver, mut stream) = connect_driver(&sonar).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("session.raw");
    let recorder = Arc::new(FileRecorder::new());
    recorder.open(&path, false).unwrap();
    FileRecorder::attach(&recorder, &driver);

    let ping = ping_frame(DEVICE_ID, FireConfig::default());
    let dummy = dummy_frame(DEVICE_ID);
    stream.write_all(&ping).await.unwrap();
    stream.write_all(&dummy).await.unwrap();

    wait_for("frames recorded", || recorder.frames_written() == 2).await;
    recorder.close();

    let mut expected = ping.clone();
    expected.extend_from_slice(&dummy);
    assert_eq!(std::fs::read(&path).unwrap(), expected);
}
