//! meshtastic-client-proxy
//!
//! Bridges a Meshtastic node attached over a serial port with an MQTT broker.
//! Proxy messages the node emits are published to the broker, and messages on
//! the subscribed channel topics are sent to the node.
//!
//! # Overview
//!
//! - [`bridge`] - the bidirectional bridge and envelope translator
//! - [`transport`] - the device and broker link traits, with serial and MQTT implementations
//! - [`protocol`] - Meshtastic protobuf messages, proxy envelopes and topic layout
//! - [`config`] - TOML configuration with command line overrides
//! - [`observability`] - structured logging
//! - [`testing`] - mock links for tests
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use meshtastic_client_proxy::bridge::Bridge;
//! use meshtastic_client_proxy::config::ProxyConfig;
//! use meshtastic_client_proxy::transport::serial::SerialSettings;
//! use meshtastic_client_proxy::transport::{MqttTransport, SerialTransport};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProxyConfig::default();
//! let device = Arc::new(SerialTransport::new(SerialSettings::from(&config.device)));
//! let bridge = Bridge::new(device, Arc::new(MqttTransport::new()));
//!
//! bridge
//!     .connect_broker(&config.broker, &config.broker.channel_bindings())
//!     .await?;
//! bridge.connect_device("", false).await?;
//! // ... forward until told to stop
//! bridge.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use bridge::{Bridge, EnvelopeTranslator, ForwardOutcome, LinkState};
pub use config::*;
pub use error::{BridgeError, BridgeResult, ProxyError};
pub use protocol::*;
pub use transport::{BrokerLink, DeviceLink};
