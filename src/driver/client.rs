//! Connection state machine and frame reception.
//!
//! The client owns the TCP half of a sonar session. Socket reads all happen
//! on the reception task, so read never contends with anything; the write
//! half sits behind a mutex because `send` may race `reset_connection` /
//! `close_connection` from arbitrary threads. TCP is full-duplex, so the
//! reception task and a concurrent `send` never block each other.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::clock::Clock;
use crate::config::DriverConfig;
use crate::error::{Error, Result, TransportError};
use crate::event::{CallbackId, CallbackList};
use crate::protocol::{FrameReader, RawMessage, StatusMessage, VersionInfo};

use super::status::{StatusListener, StatusShared};

/// Session connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session; nothing armed.
    Initializing,
    /// Waiting for a status beacon to learn the peer, or connecting to it.
    Attempt,
    /// TCP session established, reception loop running.
    Connected,
    /// Demoted by the watchdog; the caller decides whether to reset.
    Lost,
}

struct Session {
    connection: ConnectionState,
    sonar_id: u16,
    remote: Option<SocketAddr>,
}

type SharedWriter = Arc<tokio::sync::Mutex<OwnedWriteHalf>>;

pub(crate) struct ClientShared {
    config: DriverConfig,
    runtime: Handle,
    status: Arc<StatusShared>,
    session: Mutex<Session>,
    writer: RwLock<Option<SharedWriter>>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
    pending_attempt: Mutex<Option<CallbackId>>,
    clock: Clock,
    desyncs: AtomicU64,
    connect_callbacks: CallbackList<()>,
    error_callbacks: CallbackList<Error>,
    message_callbacks: CallbackList<RawMessage>,
}

/// TCP session to a sonar: discovery, connection, framed reception.
pub struct SonarClient {
    shared: Arc<ClientShared>,
    status: StatusListener,
    watchdog: JoinHandle<()>,
}

impl SonarClient {
    /// Create a client: binds the status listener and starts the watchdog.
    /// No connection is attempted until [`reset_connection`] is called.
    ///
    /// [`reset_connection`]: SonarClient::reset_connection
    pub async fn new(config: DriverConfig) -> Result<Self> {
        config.validate()?;

        let status = StatusListener::new(config.status_port).await?;

        let shared = Arc::new(ClientShared {
            runtime: Handle::current(),
            status: status.shared(),
            session: Mutex::new(Session {
                connection: ConnectionState::Initializing,
                sonar_id: 0,
                remote: None,
            }),
            writer: RwLock::new(None),
            recv_task: Mutex::new(None),
            pending_attempt: Mutex::new(None),
            clock: Clock::new(),
            desyncs: AtomicU64::new(0),
            connect_callbacks: CallbackList::new(),
            error_callbacks: CallbackList::new(),
            message_callbacks: CallbackList::new(),
            config,
        });

        let watchdog = tokio::spawn(watchdog_loop(Arc::clone(&shared)));

        Ok(Self {
            shared,
            status,
            watchdog,
        })
    }

    /// Driver configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.shared.config
    }

    /// True once the TCP session is established.
    pub fn connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Current state of the connection state machine.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.session.lock().connection
    }

    /// The device id learned from the first status beacon (0 before that).
    pub fn sonar_id(&self) -> u16 {
        self.shared.session.lock().sonar_id
    }

    /// The resolved peer endpoint, once discovered.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.shared.session.lock().remote
    }

    /// Time since the last complete message arrived on the TCP stream.
    pub fn time_since_last_message(&self) -> Duration {
        self.shared.clock.elapsed()
    }

    /// Time since the last status beacon.
    pub fn time_since_last_status(&self) -> Duration {
        self.status.time_since_last_status()
    }

    /// The most recent cached status snapshot.
    pub fn latest_status(&self) -> Option<StatusMessage> {
        self.status.latest()
    }

    /// Number of frame desynchronizations recovered so far.
    pub fn desync_count(&self) -> u64 {
        self.shared.desyncs.load(Ordering::Relaxed)
    }

    /// The underlying status listener.
    pub fn status_listener(&self) -> &StatusListener {
        &self.status
    }

    /// Status observer registry.
    pub fn status_callbacks(&self) -> &CallbackList<StatusMessage> {
        self.status.callbacks()
    }

    /// Dispatched once per successful transition to `Connected`.
    pub fn connect_callbacks(&self) -> &CallbackList<()> {
        &self.shared.connect_callbacks
    }

    /// Dispatched on transport failures and watchdog demotions.
    pub fn error_callbacks(&self) -> &CallbackList<Error> {
        &self.shared.error_callbacks
    }

    /// Dispatched with every complete raw frame.
    pub fn message_callbacks(&self) -> &CallbackList<RawMessage> {
        &self.shared.message_callbacks
    }

    /// Write bytes to the sonar. Serialized against concurrent open/close;
    /// returns `Ok(0)` when there is no established session.
    pub async fn send(&self, data: &[u8]) -> Result<usize> {
        self.shared.send(data).await
    }

    /// Tear down any current session and arm a fresh discovery: the next
    /// status beacon provides the peer address and device id, then the TCP
    /// connection is initiated.
    pub fn reset_connection(&self) {
        self.close_connection();

        self.shared.session.lock().connection = ConnectionState::Attempt;

        let mut pending = self.shared.pending_attempt.lock();
        if let Some(id) = pending.take() {
            self.status.callbacks().remove(id);
        }

        let shared = Arc::clone(&self.shared);
        let id = self
            .status
            .callbacks()
            .append_counted(1, move |status| ClientShared::on_first_status(&shared, status));
        *pending = Some(id);
    }

    /// Shut the session down and return to `Initializing`.
    pub fn close_connection(&self) {
        self.shared.close_connection();

        // A discovery armed by an earlier reset must not connect afterwards.
        if let Some(id) = self.shared.pending_attempt.lock().take() {
            self.status.callbacks().remove(id);
        }
    }
}

impl Drop for SonarClient {
    fn drop(&mut self) {
        self.watchdog.abort();
        self.shared.close_connection();
    }
}

impl ClientShared {
    async fn send(&self, data: &[u8]) -> Result<usize> {
        if self.session.lock().connection != ConnectionState::Connected {
            return Ok(0);
        }

        let writer = self.writer.read().clone();
        let Some(writer) = writer else {
            return Ok(0);
        };

        let mut guard = writer.lock().await;
        guard
            .write_all(data)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        guard
            .flush()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        Ok(data.len())
    }

    fn close_connection(&self) {
        if let Some(task) = self.recv_task.lock().take() {
            task.abort();
        }

        // Dropping the write half shuts the socket down; close errors have
        // nowhere to surface and are intentionally swallowed.
        let had_socket = self.writer.write().take().is_some();
        if had_socket {
            info!("connection closed");
        }

        self.session.lock().connection = ConnectionState::Initializing;
    }

    /// First status after a reset: learn the device id, resolve the peer
    /// endpoint, start connecting.
    fn on_first_status(shared: &Arc<Self>, status: &StatusMessage) {
        let remote = SocketAddr::new(
            IpAddr::V4(status.ip()),
            shared.config.data_port,
        );

        {
            let mut session = shared.session.lock();
            session.sonar_id = status.header.src_device;
            session.remote = Some(remote);
        }

        info!(
            ip = %status.ip(),
            mask = %status.mask(),
            device = status.header.src_device,
            model = ?status.part(),
            firmware = %VersionInfo::format_version(status.version_info.arm0_version),
            "sonar discovered, attempting connection"
        );

        let shared = Arc::clone(shared);
        shared.runtime.clone().spawn(async move {
            shared.connect(remote).await;
        });
    }

    async fn connect(self: Arc<Self>, remote: SocketAddr) {
        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(remote)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                error!(%remote, %err, "connection failure");
                self.error_callbacks.dispatch(&Error::ConnectionFailed {
                    addr: remote,
                    reason: err.to_string(),
                });
                return;
            }
            Err(_) => {
                error!(%remote, "connection timed out");
                self.error_callbacks.dispatch(&Error::ConnectionTimeout);
                return;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            warn!(%err, "could not set TCP_NODELAY");
        }

        let (read_half, write_half) = stream.into_split();

        {
            let mut session = self.session.lock();
            if session.connection != ConnectionState::Attempt {
                // Closed or reset while the handshake was in flight.
                debug!("discarding connection established after close");
                return;
            }
            // The writer must be in place before the state flips: a caller
            // polling `connected` is allowed to `send` immediately.
            *self.writer.write() = Some(Arc::new(tokio::sync::Mutex::new(write_half)));
            self.clock.reset();
            session.connection = ConnectionState::Connected;
        }

        info!(%remote, "connection established");

        let shared = Arc::clone(&self);
        let task = self.runtime.spawn(async move {
            shared.reception_loop(read_half).await;
        });
        *self.recv_task.lock() = Some(task);

        // Late subscribers get a fresh snapshot before the connect event.
        // Copy the snapshot out so no lock is held across the dispatch.
        let latest = *self.status.latest.lock();
        if let Some(status) = latest {
            self.status.callbacks.dispatch(&status);
        }
        self.connect_callbacks.dispatch(&());
    }

    async fn reception_loop(self: Arc<Self>, read_half: OwnedReadHalf) {
        let expected_src = self.session.lock().sonar_id;
        let mut reader = FrameReader::new(read_half);

        loop {
            match reader.next_frame(Some(expected_src)).await {
                Ok(message) => {
                    self.desyncs.store(reader.desync_count(), Ordering::Relaxed);
                    self.clock.reset();
                    self.message_callbacks.dispatch(&message);
                }
                Err(err) => {
                    self.desyncs.store(reader.desync_count(), Ordering::Relaxed);
                    debug!(%err, "reception loop ended");
                    return;
                }
            }
        }
    }

    /// One watchdog tick: demote stale sessions to `Lost`.
    fn check_liveness(&self) {
        let connection = self.session.lock().connection;
        if matches!(
            connection,
            ConnectionState::Initializing | ConnectionState::Attempt
        ) {
            return;
        }

        let status_silence = self.status.clock.elapsed();
        if status_silence > self.config.status_timeout {
            // No beacon means no sonar on the network; the connection cannot
            // be recovered from here, the caller has to decide.
            if connection != ConnectionState::Lost {
                warn!(silence = ?status_silence, "no status beacon, sonar lost");
                self.session.lock().connection = ConnectionState::Lost;
                self.error_callbacks.dispatch(&Error::Transport(
                    TransportError::StatusSilence(status_silence.as_secs_f64()),
                ));
            }
            return;
        }

        let message_silence = self.clock.elapsed();
        if message_silence > self.config.message_timeout && connection != ConnectionState::Lost {
            // Beacons still arrive but the TCP stream went quiet: the
            // session is broken.
            warn!(silence = ?message_silence, "stale connection");
            self.session.lock().connection = ConnectionState::Lost;
            self.error_callbacks.dispatch(&Error::Transport(
                TransportError::MessageSilence(message_silence.as_secs_f64()),
            ));
        }
    }
}

async fn watchdog_loop(shared: Arc<ClientShared>) {
    let mut ticker = tokio::time::interval(shared.config.checker_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        trace!("watchdog tick");
        shared.check_liveness();
    }
}
