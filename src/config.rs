// Run configuration. Everything is compiled in: no files, no environment variables.

use crate::error::SetupError;
use crate::peer::types::{ChannelOptions, IceServerConfig, IceServerKind};
use crate::utils::add_ice_url_scheme;
use std::time::Duration;
use tracing::Level;

#[cfg(debug_assertions)]
pub const LOG_LEVEL: Level = Level::DEBUG;

#[cfg(not(debug_assertions))]
pub const LOG_LEVEL: Level = Level::INFO;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const CHANNEL_LABEL: &str = "hello_channel";
pub const OFFERER_NAME: &str = "Peer1";
pub const ANSWERER_NAME: &str = "Peer2";

pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const OFFER_TIMEOUT: Duration = Duration::from_secs(5);
pub const ANSWER_TIMEOUT: Duration = Duration::from_secs(5);
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);
pub const GATHERING_TIMEOUT: Duration = Duration::from_secs(10);
pub const RELAY_INTERVAL: Duration = Duration::from_secs(1);
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const MESSAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Budgets and fixed parameters of one negotiation run.
///
/// `relay_interval` controls how often accumulated candidates are forwarded;
/// `gathering_timeout` bounds the whole candidate exchange. The two are
/// independent.
#[derive(Debug, Clone)]
pub struct NegotiationConfig {
    pub offerer_name: String,
    pub answerer_name: String,
    pub ice_servers: Vec<IceServerConfig>,
    pub channel_label: String,
    pub channel_options: ChannelOptions,
    /// Fallback re-check period for waits that are otherwise woken by callbacks
    pub poll_interval: Duration,
    pub offer_timeout: Duration,
    pub answer_timeout: Duration,
    pub settle_delay: Duration,
    pub gathering_timeout: Duration,
    pub relay_interval: Duration,
    pub connect_timeout: Duration,
    pub message_timeout: Duration,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            offerer_name: OFFERER_NAME.into(),
            answerer_name: ANSWERER_NAME.into(),
            ice_servers: vec![IceServerConfig::stun(DEFAULT_STUN_SERVER)],
            channel_label: CHANNEL_LABEL.into(),
            channel_options: ChannelOptions::default(),
            poll_interval: POLL_INTERVAL,
            offer_timeout: OFFER_TIMEOUT,
            answer_timeout: ANSWER_TIMEOUT,
            settle_delay: SETTLE_DELAY,
            gathering_timeout: GATHERING_TIMEOUT,
            relay_interval: RELAY_INTERVAL,
            connect_timeout: CONNECT_TIMEOUT,
            message_timeout: MESSAGE_TIMEOUT,
        }
    }
}

impl NegotiationConfig {
    /// Checks the ICE server list and fills in missing URL schemes
    pub fn validate(mut self) -> Result<Self, SetupError> {
        for server in &mut self.ice_servers {
            if server.url.trim().is_empty() {
                return Err(SetupError::InvalidIceServer {
                    url: server.url.clone(),
                    reason: "server URL cannot be empty".into(),
                });
            }

            if server.kind == IceServerKind::Turn
                && (server.username.is_none() || server.credential.is_none())
            {
                return Err(SetupError::InvalidIceServer {
                    url: server.url.clone(),
                    reason: "TURN servers require username and credential".into(),
                });
            }

            server.url = add_ice_url_scheme(server);
        }
        Ok(self)
    }
}
