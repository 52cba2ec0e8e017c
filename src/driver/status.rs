//! UDP status beacon listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Result, TransportError};
use crate::event::CallbackList;
use crate::protocol::{StatusMessage, STATUS_MESSAGE_SIZE};

/// Listens for the sonar's periodic status broadcast.
///
/// Construction is the only fallible step; once the socket is bound, receive
/// errors are logged and the loop re-arms. A permanent receive failure
/// manifests as `time_since_last_status` growing without bound, which the
/// connection watchdog turns into a `Lost` transition.
pub struct StatusListener {
    shared: Arc<StatusShared>,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

pub(crate) struct StatusShared {
    pub(crate) clock: Clock,
    pub(crate) latest: Mutex<Option<StatusMessage>>,
    pub(crate) callbacks: CallbackList<StatusMessage>,
}

impl StatusListener {
    /// Bind `0.0.0.0:port` and start receiving datagrams.
    pub async fn new(port: u16) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let socket = bind_status_socket(addr)?;
        let socket = UdpSocket::from_std(socket.into())
            .map_err(|e| TransportError::SocketError(e.to_string()))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| TransportError::SocketError(e.to_string()))?;

        info!(%local_addr, "listening for status beacons");

        let shared = Arc::new(StatusShared {
            clock: Clock::new(),
            latest: Mutex::new(None),
            callbacks: CallbackList::new(),
        });

        let task = tokio::spawn(receive_loop(socket, Arc::clone(&shared)));

        Ok(Self {
            shared,
            local_addr,
            task,
        })
    }

    /// The bound address (useful when constructed on port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Status observer registry.
    pub fn callbacks(&self) -> &CallbackList<StatusMessage> {
        &self.shared.callbacks
    }

    /// The most recently received status, if any arrived yet.
    pub fn latest(&self) -> Option<StatusMessage> {
        *self.shared.latest.lock()
    }

    /// Time since the last status datagram (or since construction).
    pub fn time_since_last_status(&self) -> Duration {
        self.shared.clock.elapsed()
    }

    pub(crate) fn shared(&self) -> Arc<StatusShared> {
        Arc::clone(&self.shared)
    }
}

impl Drop for StatusListener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Bind the status socket with address reuse so several listeners can share
/// the well-known port on one host.
fn bind_status_socket(addr: SocketAddr) -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| TransportError::SocketError(e.to_string()))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| TransportError::SocketError(format!("set reuse addr: {e}")))?;

    socket
        .bind(&addr.into())
        .map_err(|e| TransportError::BindFailed {
            addr,
            reason: e.to_string(),
        })?;

    socket
        .set_nonblocking(true)
        .map_err(|e| TransportError::SocketError(e.to_string()))?;

    Ok(socket)
}

async fn receive_loop(socket: UdpSocket, shared: Arc<StatusShared>) {
    let mut buf = [0u8; 2048];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, peer)) => {
                if len != STATUS_MESSAGE_SIZE {
                    warn!(len, %peer, "dropping status datagram of unexpected size");
                    continue;
                }

                match StatusMessage::decode(&buf[..len]) {
                    Ok(status) => {
                        shared.clock.reset();
                        *shared.latest.lock() = Some(status);
                        shared.callbacks.dispatch(&status);
                    }
                    Err(err) => warn!(%err, %peer, "undecodable status datagram"),
                }
            }
            Err(err) => {
                // Not surfaced to callers; silence is what the watchdog sees.
                debug!(%err, "status receive error");
            }
        }
    }
}
