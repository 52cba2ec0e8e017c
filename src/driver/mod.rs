//! The sonar driver: status discovery, session management, fire control.
//!
//! [`StatusListener`] receives the UDP status beacon. [`SonarClient`] owns
//! the TCP session and its reception state machine. [`SonarDriver`] layers
//! message semantics on top: fire commands, configuration feedback, and the
//! typed ping/dummy/config event surfaces.

mod client;
mod fire;
mod status;

pub use client::{ConnectionState, SonarClient};
pub use fire::{check_config_feedback, config_changed, SonarDriver};
pub use status::StatusListener;
