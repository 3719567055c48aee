//! MQTT broker link
//!
//! The module separates pure functions from I/O:
//!
//! - [`connection`] - connection state, broker options and errors
//! - [`message_handler`] - event routing and subscription matching
//! - [`health_monitor`] - reconnection decisions and state transitions
//! - [`client`] - the rumqttc client and its supervisor task
//!
//! # Usage
//!
//! ```rust,no_run
//! use meshtastic_client_proxy::config::BrokerSection;
//! use meshtastic_client_proxy::transport::mqtt::MqttBrokerLink;
//! use meshtastic_client_proxy::transport::BrokerLink;
//!
//! # tokio_test::block_on(async {
//! let link = MqttBrokerLink::new();
//! link.connect(&BrokerSection::default()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttBrokerLink;
pub use connection::{ConnectionState, MqttError, ReconnectConfig};
pub use health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
pub use message_handler::{
    EventRoute, MessageHandler, Route, SubscribeOutcome, SubscriptionTracker,
};
