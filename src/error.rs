//! Error types for the sonar driver.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the driver.
#[derive(Error, Debug)]
pub enum Error {
    // Transport errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: SocketAddr, reason: String },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("connection timeout")]
    ConnectionTimeout,

    // Protocol errors
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Feedback errors
    #[error("timed out waiting for sonar feedback")]
    Timeout,

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Transport layer errors.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("bind failed on {addr}: {reason}")]
    BindFailed { addr: SocketAddr, reason: String },

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    #[error("socket error: {0}")]
    SocketError(String),

    #[error("not connected")]
    NotConnected,

    #[error("no status received for {0:.1}s, sonar not visible on the network")]
    StatusSilence(f64),

    #[error("no message received for {0:.1}s, connection is stale")]
    MessageSilence(f64),
}

/// Protocol parsing and framing errors.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid message magic: {0:#06x}")]
    InvalidMagic(u16),

    #[error("unexpected source device: expected {expected}, got {got}")]
    UnexpectedSource { expected: u16, got: u16 },

    #[error("malformed header")]
    MalformedHeader,

    #[error("message too short: {size} bytes (need {need})")]
    ShortMessage { size: usize, need: usize },

    #[error("unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage { expected: String, got: String },

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("truncated payload: {size} bytes (header announced {announced})")]
    TruncatedPayload { size: usize, announced: usize },
}

impl Error {
    /// Check if error is recoverable (caller may retry).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Timeout
                | Error::ConnectionTimeout
                | Error::Transport(
                    TransportError::SendFailed(_)
                        | TransportError::ReceiveFailed(_)
                        | TransportError::NotConnected
                )
                | Error::Io(_)
        )
    }

    /// Check if error indicates the session should be reset.
    pub fn should_reconnect(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed
                | Error::ConnectionFailed { .. }
                | Error::Transport(TransportError::MessageSilence(_))
        )
    }
}
