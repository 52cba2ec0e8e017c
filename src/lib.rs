//! # Vodnik
//!
//! Asynchronous network driver for multibeam imaging sonars.
//!
//! The sonar exposes two network surfaces: a UDP status beacon broadcast on
//! the local network, and a TCP command/data channel. The driver discovers a
//! sonar from its periodic status datagrams, opens a TCP session to it, sends
//! fire/configuration commands and receives the continuous stream of framed
//! binary messages (primarily ping results), dispatching each one to
//! registered observers.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Application observers                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │   SonarDriver   (fire control, feedback matching, events)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │   SonarClient   (connection state machine, frame reception) │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │   StatusListener (UDP 52102) │   TCP data channel (52100)   │
//! └──────────────────────────────┴──────────────────────────────┘
//!
//! All I/O runs on the tokio runtime the driver was created on. Observer
//! callbacks are invoked sequentially on the I/O task that produced the
//! event; `send`, `reset_connection`, `close_connection` and registry
//! mutation are safe from any thread.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]      // Many functions can't be const due to trait bounds
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::unreadable_literal)]        // Wire constants are clearer undelimited
#![allow(clippy::cast_possible_truncation)]  // Intentional in wire offset arithmetic
#![allow(clippy::cast_sign_loss)]            // Wire fields are unsigned
#![allow(clippy::cast_precision_loss)]       // Acceptable for elapsed-seconds conversions
#![allow(clippy::float_cmp)]                 // Feedback comparators are exact by contract
#![allow(clippy::similar_names)]             // prev/next configs are intentionally named
#![allow(clippy::cognitive_complexity)]      // Reception state machine
#![allow(clippy::too_many_lines)]            // Complete implementations
#![allow(clippy::future_not_send)]           // Async internals
#![allow(clippy::return_self_not_must_use)]  // Builder methods don't need must_use
#![allow(clippy::ignored_unit_patterns)]     // Ok(_) vs Ok(()) is stylistic

pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod protocol;
pub mod recorder;

pub use config::DriverConfig;
pub use driver::{SonarClient, SonarDriver, StatusListener};
pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// UDP port on which sonars broadcast their status beacon.
pub const DEFAULT_STATUS_PORT: u16 = 52102;

/// TCP port on which a sonar accepts the command/data connection.
pub const DEFAULT_DATA_PORT: u16 = 52100;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{DriverConfig, LoggingConfig};
    pub use crate::driver::{ConnectionState, SonarClient, SonarDriver, StatusListener};
    pub use crate::error::{Error, Result};
    pub use crate::event::{CallbackId, CallbackList};
    pub use crate::protocol::{
        FireConfig, FireFlags, MessageHeader, MessageId, PingMessage, PingRate, RawMessage,
        StatusMessage,
    };
    pub use crate::recorder::FileRecorder;
}
