//! Fire control and configuration feedback.
//!
//! The sonar acknowledges configuration implicitly: the fire descriptor it
//! actually applied is echoed inside every ping result, and standby shows up
//! as dummy messages. The controller keeps `last_config` as its best notion
//! of the applied configuration, updates it from every inbound message, and
//! implements the send / observe / compare loop for callers that need to
//! know a request stuck.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::config::DriverConfig;
use crate::error::{Error, Result};
use crate::event::CallbackList;
use crate::protocol::{
    FireConfig, FireFlags, MessageHeader, MessageId, PingHeader, PingMessage, PingRate,
    RawMessage, UserConfig, FIRE_CONFIG_SIZE_V2, HEADER_SIZE, MESSAGE_MAGIC,
};

use super::client::SonarClient;

struct FireState {
    /// Best notion of the configuration currently applied by the sonar.
    last_config: FireConfig,
    /// The rate `resume` returns to after a standby.
    last_ping_rate: PingRate,
}

struct FireShared {
    state: Mutex<FireState>,
    message_callbacks: CallbackList<RawMessage>,
    ping_callbacks: CallbackList<PingMessage>,
    dummy_callbacks: CallbackList<MessageHeader>,
    config_callbacks: CallbackList<(FireConfig, FireConfig)>,
}

/// Sonar driver: a [`SonarClient`] plus fire/configuration semantics.
///
/// Derefs to the client, so connection management (`reset_connection`,
/// `close_connection`, `connected`, the connect/error/status registries) is
/// available directly on the driver.
pub struct SonarDriver {
    client: SonarClient,
    shared: Arc<FireShared>,
}

impl SonarDriver {
    /// Create a driver. Discovery starts with [`SonarClient::reset_connection`].
    pub async fn new(config: DriverConfig) -> Result<Self> {
        let client = SonarClient::new(config).await?;

        let shared = Arc::new(FireShared {
            state: Mutex::new(FireState {
                last_config: FireConfig::default(),
                last_ping_rate: PingRate::Normal,
            }),
            message_callbacks: CallbackList::new(),
            ping_callbacks: CallbackList::new(),
            dummy_callbacks: CallbackList::new(),
            config_callbacks: CallbackList::new(),
        });

        // The driver is the first subscriber of the raw frame stream; every
        // frame funnels through handle_message before anyone else sees it.
        let handler = Arc::clone(&shared);
        client
            .message_callbacks()
            .append(move |message| handler.handle_message(message));

        Ok(Self { client, shared })
    }

    /// The underlying session client.
    pub fn client(&self) -> &SonarClient {
        &self.client
    }

    /// The configuration last believed applied by the sonar.
    pub fn last_fire_config(&self) -> FireConfig {
        self.shared.state.lock().last_config
    }

    /// The last requested non-standby ping rate.
    pub fn last_ping_rate(&self) -> PingRate {
        self.shared.state.lock().last_ping_rate
    }

    /// Dispatched with every message, after `last_config` is updated and any
    /// `ConfigChanged` went out.
    pub fn message_callbacks(&self) -> &CallbackList<RawMessage> {
        &self.shared.message_callbacks
    }

    /// Dispatched with every ping result.
    pub fn ping_callbacks(&self) -> &CallbackList<PingMessage> {
        &self.shared.ping_callbacks
    }

    /// Dispatched with the header of every dummy message.
    pub fn dummy_callbacks(&self) -> &CallbackList<MessageHeader> {
        &self.shared.dummy_callbacks
    }

    /// Dispatched as `(previous, next)` whenever the applied configuration
    /// detectably changes.
    pub fn config_callbacks(&self) -> &CallbackList<(FireConfig, FireConfig)> {
        &self.shared.config_callbacks
    }

    /// Send a fire descriptor to the sonar.
    ///
    /// Returns false when fewer bytes than the descriptor went out. The
    /// requested ping rate is recorded either way: the firmware never echoes
    /// it back, so the request is the only trace of it.
    pub async fn send_fire_config(&self, mut config: FireConfig) -> bool {
        config.header.magic = MESSAGE_MAGIC;
        config.header.message_id = MessageId::SimpleFire;
        config.header.src_device = 0;
        config.header.dst_device = self.client.sonar_id();
        config.header.version = 2;
        config.header.payload_size = (FIRE_CONFIG_SIZE_V2 - HEADER_SIZE) as u32;
        config.network_speed = 0xFF;

        let bytes = config.encode_v2();
        let sent = match self.client.send(&bytes).await {
            Ok(sent) => sent,
            Err(err) => {
                error!(%err, "fire command send failed");
                0
            }
        };

        // The rate bookkeeping is itself a detectable configuration change:
        // pings never echo the rate, so this is the only place observers can
        // learn about it.
        let (prev, next) = {
            let state = self.shared.state.lock();
            let prev = state.last_config;
            let mut next = prev;
            next.ping_rate = config.ping_rate;
            (prev, next)
        };
        if config_changed(&prev, &next) {
            self.shared.config_callbacks.dispatch(&(prev, next));
        }
        {
            let mut state = self.shared.state.lock();
            state.last_config.ping_rate = config.ping_rate;
            if config.ping_rate != PingRate::Standby {
                state.last_ping_rate = config.ping_rate;
            }
        }

        if sent != bytes.len() {
            error!(sent, expected = bytes.len(), "incomplete fire command write");
            return false;
        }

        debug!(rate = ?config.ping_rate, range = config.range, "fire command sent");
        true
    }

    /// Wait for the next message and return the configuration it implies:
    /// `last_config` with that message's header.
    ///
    /// `last_config` is always updated before observers run, so one message
    /// is enough. Fails with [`Error::Timeout`] after the configured
    /// feedback window.
    pub async fn current_fire_config(&self) -> Result<FireConfig> {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));

        let shared = Arc::clone(&self.shared);
        let id = self.shared.message_callbacks.append_counted(1, move |message| {
            let mut config = shared.state.lock().last_config;
            config.header = *message.header();
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(config);
            }
        });

        match timeout(self.client.config().feedback_timeout, rx).await {
            Ok(Ok(config)) => Ok(config),
            _ => {
                self.shared.message_callbacks.remove(id);
                Err(Error::Timeout)
            }
        }
    }

    /// Send a fire request and keep at it until the sonar's feedback is
    /// coherent with it, up to the configured attempt limit.
    ///
    /// On exhaustion the request itself is returned with its header message
    /// id zeroed, which no genuine feedback ever carries.
    pub async fn request_fire_config(&self, mut request: FireConfig) -> FireConfig {
        // Gain reporting is what makes the echoed descriptor comparable.
        request.flags.set(FireFlags::GAIN_SEND);

        let attempts = self.client.config().max_config_requests;
        for attempt in 0..attempts {
            if self.send_fire_config(request).await {
                match self.current_fire_config().await {
                    Ok(feedback) => {
                        if check_config_feedback(&request, &feedback) {
                            return feedback;
                        }
                        trace!(attempt, "feedback not yet coherent with request");
                    }
                    Err(_) => warn!(attempt, "timed out waiting for config feedback"),
                }
            }
        }

        warn!(attempts, "no coherent feedback from the sonar");
        request.header.message_id = MessageId::Other(0);
        request
    }

    /// Stop pinging: send `last_config` at the standby rate.
    pub async fn standby(&self) -> bool {
        let mut config = self.last_fire_config();
        config.ping_rate = PingRate::Standby;
        self.send_fire_config(config).await
    }

    /// Return to the last non-standby rate.
    pub async fn resume(&self) -> bool {
        let (mut config, rate) = {
            let state = self.shared.state.lock();
            (state.last_config, state.last_ping_rate)
        };
        config.ping_rate = rate;
        self.send_fire_config(config).await
    }
}

impl std::ops::Deref for SonarDriver {
    type Target = SonarClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

impl FireShared {
    /// Called for every complete frame, before any external observer.
    fn handle_message(&self, message: &RawMessage) {
        let header = *message.header();
        let last = self.state.lock().last_config;
        let mut new_config = last;

        match header.message_id {
            MessageId::SimplePingResult => match PingHeader::decode(message.data()) {
                Ok(ping) => {
                    new_config = ping.fire;
                    // The firmware does not echo the requested rate; carry
                    // the requested value forward.
                    new_config.ping_rate = last.ping_rate;

                    // In master mode 2 the sonar clamps gain to [40, 100]
                    // and reports the clamped value. Rescale back to the
                    // client-side [0, 100] scale.
                    if new_config.master_mode == 2 {
                        new_config.gain = (new_config.gain - 40.0) * 100.0 / 60.0;
                    }
                }
                Err(err) => warn!(%err, "undecodable ping result"),
            },
            MessageId::Dummy => {
                trace!("dummy message, sonar is in standby");
                new_config.ping_rate = PingRate::Standby;
            }
            _ => {}
        }

        if config_changed(&last, &new_config) {
            self.config_callbacks.dispatch(&(last, new_config));
        }
        self.state.lock().last_config = new_config;

        // Generic observers first, then the specialized surface.
        self.message_callbacks.dispatch(message);

        match header.message_id {
            MessageId::SimplePingResult => match PingMessage::from_raw(message.clone()) {
                Ok(ping) => self.ping_callbacks.dispatch(&ping),
                Err(err) => warn!(%err, "ping result failed to parse"),
            },
            MessageId::Dummy => self.dummy_callbacks.dispatch(&header),
            MessageId::UserConfig => match UserConfig::decode(message.data()) {
                Ok(user) => debug!(?user, "user configuration received"),
                Err(err) => warn!(%err, "undecodable user config"),
            },
            MessageId::Status
            | MessageId::SimpleFire
            | MessageId::PingResult
            | MessageId::BootInfo => {
                debug!(id = ?header.message_id, "no handler for message type");
            }
            MessageId::Other(id) => trace!(id, "ignoring unknown message"),
        }
    }
}

/// True when `feedback` is coherent with the `requested` configuration.
///
/// A standby request is acknowledged by any dummy message. Anything else
/// needs a ping result whose echoed descriptor matches: master mode, gamma,
/// flags and range exactly, gain within 0.1, and either speed of sound or
/// salinity within 0.1 depending on which one the request relies on. The
/// ping rate is never compared.
pub fn check_config_feedback(requested: &FireConfig, feedback: &FireConfig) -> bool {
    if requested.ping_rate == PingRate::Standby {
        return feedback.header.message_id == MessageId::Dummy;
    }

    if feedback.header.message_id != MessageId::SimplePingResult
        || requested.master_mode != feedback.master_mode
        || requested.gamma != feedback.gamma
        || requested.flags != feedback.flags
        || requested.range != feedback.range
        || (requested.gain - feedback.gain).abs() >= 0.1
    {
        return false;
    }

    // Speed of sound zero means the sonar derives it from salinity; compare
    // whichever input is authoritative.
    if requested.speed_of_sound != 0.0 {
        (requested.speed_of_sound - feedback.speed_of_sound).abs() < 0.1
    } else {
        (requested.salinity - feedback.salinity).abs() < 0.1
    }
}

/// True when two fire descriptors detectably differ.
pub fn config_changed(previous: &FireConfig, next: &FireConfig) -> bool {
    previous.master_mode != next.master_mode
        || previous.ping_rate != next.ping_rate
        || previous.network_speed != next.network_speed
        || previous.gamma != next.gamma
        || previous.flags != next.flags
        || (previous.range - next.range).abs() > 0.001
        || (previous.gain - next.gain).abs() > 0.1
        || (previous.speed_of_sound - next.speed_of_sound).abs() > 0.1
        || (previous.salinity - next.salinity).abs() > 0.1
}
