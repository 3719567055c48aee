//! Pure connection state management for the MQTT broker link
//!
//! This module contains pure functions for connection state management,
//! broker option construction and client id generation.

use crate::config::BrokerSection;
use crate::protocol::TopicError;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state for the broker link
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - waiting for the first ConnAck
    Connecting,
    /// ConnAck received, publish and subscribe allowed
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
    /// Gave up; the link will not reconnect on its own
    PermanentlyDisconnected(String),
}

/// Reconnection configuration
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts (None = unlimited)
    pub max_attempts: Option<u32>,
    /// Backoff pattern in milliseconds
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_pattern: vec![25, 50, 100, 250],
            sustained_delay: 250,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for the given attempt: 25ms, 50ms, 100ms, 250ms, then 250ms forever
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        self.backoff_pattern
            .get(index)
            .copied()
            .unwrap_or(self.sustained_delay)
    }
}

/// Broker link errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription to '{topic}' failed")]
    SubscriptionFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Invalid topic filter: {0}")]
    InvalidTopicFilter(#[from] TopicError),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Broker link is already connected")]
    AlreadyConnected,
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Broker address resolved from a URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Resolve host, port and TLS from a broker URL (pure function)
///
/// `tcp://` and `mqtt://` default to port 1883, `ssl://` and `mqtts://` to 8883
/// with TLS enabled.
pub fn parse_broker_url(raw: &str) -> Result<BrokerAddress, MqttError> {
    let url = Url::parse(raw).map_err(|_| MqttError::InvalidBrokerUrl(raw.to_string()))?;

    let tls = match url.scheme() {
        "tcp" | "mqtt" => false,
        "ssl" | "mqtts" => true,
        _ => return Err(MqttError::InvalidBrokerUrl(raw.to_string())),
    };

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(raw.to_string()))?
        .to_string();
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerAddress { host, port, tls })
}

/// Client id with a random suffix so restarts never collide with a stale session
pub fn generate_client_id(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &suffix[..8])
}

/// Build MQTT options from broker parameters (pure function)
pub fn configure_mqtt_options(
    params: &BrokerSection,
    client_id: &str,
) -> Result<MqttOptions, MqttError> {
    let address = parse_broker_url(&params.url)?;
    let mut mqtt_options = MqttOptions::new(client_id, address.host, address.port);

    if address.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = params.resolved_username() {
        let password = params.resolved_password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(params.keep_alive_secs.max(5)));
    mqtt_options.set_clean_start(true);

    Ok(mqtt_options)
}
