//! Configuration for the proxy
//!
//! Every field has a default, so the proxy runs without a config file. Values
//! from a TOML file are applied first, then command line overrides.

use crate::protocol::{validate_channel_name, ChannelBinding, TopicLayout};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name looked up in the working directory, `config/` and `$HOME`
pub const CONFIG_FILE_NAME: &str = "meshtastic-client-proxy.toml";

/// Top-level proxy configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProxyConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub device: DeviceSection,
}

/// Broker connection parameters and the channels to proxy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL (`tcp://`, `mqtt://`, `ssl://` or `mqtts://`)
    #[serde(default = "default_broker_url")]
    pub url: String,
    #[serde(default = "default_username")]
    pub username: Option<String>,
    #[serde(default = "default_password")]
    pub password: Option<String>,
    /// Environment variable containing the username; wins over `username`
    #[serde(default)]
    pub username_env: Option<String>,
    /// Environment variable containing the password; wins over `password`
    #[serde(default)]
    pub password_env: Option<String>,
    /// Root of the Meshtastic topic tree
    #[serde(default = "default_root_topic")]
    pub root_topic: String,
    /// Level between the root and the channel name
    #[serde(default = "default_channel_segment")]
    pub channel_segment: String,
    /// Channel names to proxy in both directions
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long to wait for the broker's ConnAck at startup
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
}

fn default_broker_url() -> String {
    "tcp://mqtt.meshtastic.org:1883".to_string()
}

fn default_username() -> Option<String> {
    Some("meshdev".to_string())
}

fn default_password() -> Option<String> {
    Some("large4cats".to_string())
}

fn default_root_topic() -> String {
    "msh/2".to_string()
}

fn default_channel_segment() -> String {
    "c".to_string()
}

fn default_channels() -> Vec<String> {
    vec!["LongFast".to_string()]
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_client_id_prefix() -> String {
    "meshtastic-client-proxy".to_string()
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            username: default_username(),
            password: default_password(),
            username_env: None,
            password_env: None,
            root_topic: default_root_topic(),
            channel_segment: default_channel_segment(),
            channels: default_channels(),
            keep_alive_secs: default_keep_alive(),
            connect_timeout_secs: default_connect_timeout(),
            client_id_prefix: default_client_id_prefix(),
        }
    }
}

impl BrokerSection {
    /// Username, taken from `username_env` when that variable is set
    pub fn resolved_username(&self) -> Option<String> {
        Self::get_env_var_optional(self.username_env.as_ref()).or_else(|| self.username.clone())
    }

    /// Password, taken from `password_env` when that variable is set
    pub fn resolved_password(&self) -> Option<String> {
        Self::get_env_var_optional(self.password_env.as_ref()).or_else(|| self.password.clone())
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    pub fn topic_layout(&self) -> TopicLayout {
        TopicLayout::new(&self.root_topic, &self.channel_segment)
    }

    /// One binding per configured channel
    pub fn channel_bindings(&self) -> Vec<ChannelBinding> {
        self.topic_layout().bindings(&self.channels)
    }
}

/// Serial device settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Serial port; empty means auto-detect
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Report device events nobody handles at error level instead of dropping them quietly
    #[serde(default)]
    pub fail_if_no_handler: bool,
    /// Heartbeat period in seconds; 0 disables it
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_heartbeat_interval() -> u64 {
    300 // firmware drops idle serial clients after 15 minutes
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            fail_if_no_handler: false,
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

/// Values given on the command line; `None` keeps the configured value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub broker_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub root_topic: Option<String>,
    pub channels: Vec<String>,
    pub port: Option<String>,
    pub baud_rate: Option<u32>,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL '{0}'")]
    InvalidBrokerUrl(String),
    #[error("Invalid channel '{channel}': {reason}")]
    InvalidChannel { channel: String, reason: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ProxyConfig {
    /// Load configuration from a TOML file
    ///
    /// Values are checked by [`ProxyConfig::validate`] once command line
    /// overrides have been applied.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Places searched when no config file is given explicitly
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from(CONFIG_FILE_NAME),
            PathBuf::from("config").join(CONFIG_FILE_NAME),
        ];
        if let Ok(home) = std::env::var("HOME") {
            paths.push(PathBuf::from(home).join(format!(".{CONFIG_FILE_NAME}")));
        }
        paths
    }

    /// Apply command line overrides on top of file values
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(url) = overrides.broker_url {
            self.broker.url = url;
        }
        if let Some(username) = overrides.username {
            self.broker.username = Some(username);
        }
        if let Some(password) = overrides.password {
            self.broker.password = Some(password);
        }
        if let Some(root) = overrides.root_topic {
            self.broker.root_topic = root;
        }
        if !overrides.channels.is_empty() {
            self.broker.channels = overrides.channels;
        }
        if let Some(port) = overrides.port {
            self.device.port = port;
        }
        if let Some(baud_rate) = overrides.baud_rate {
            self.device.baud_rate = baud_rate;
        }
    }

    /// Check the values the proxy cannot run without
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.broker.url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(self.broker.url.clone()))?;
        if url.host_str().is_none() || !matches!(url.scheme(), "tcp" | "mqtt" | "ssl" | "mqtts") {
            return Err(ConfigError::InvalidBrokerUrl(self.broker.url.clone()));
        }

        if self.broker.topic_layout().root().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "broker.root_topic cannot be empty".to_string(),
            ));
        }

        if self.broker.channels.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one channel must be configured".to_string(),
            ));
        }
        for channel in &self.broker.channels {
            validate_channel_name(channel).map_err(|e| ConfigError::InvalidChannel {
                channel: channel.clone(),
                reason: e.to_string(),
            })?;
        }

        if self.device.baud_rate == 0 {
            return Err(ConfigError::InvalidConfig(
                "device.baud_rate must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Configuration used by unit tests
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[broker]
url = "mqtt://localhost:1883"
root_topic = "msh/2"
channels = ["a", "b", "c"]

[device]
port = "/dev/ttyUSB0"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
