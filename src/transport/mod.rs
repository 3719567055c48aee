//! Transport layer for the two sides of the proxy
//!
//! The bridge only sees the [`DeviceLink`] and [`BrokerLink`] traits. The
//! concrete serial and MQTT implementations live in [`serial`] and [`mqtt`];
//! test doubles live in [`crate::testing`].

use crate::config::BrokerSection;
use crate::protocol::mesh::ToRadio;
use crate::protocol::{DeviceEvent, DeviceEventKind, ProxyMessage};
use std::sync::Arc;
use tokio::sync::watch;

pub mod mqtt;
pub mod serial;

/// Callback for events decoded from the device
#[async_trait::async_trait]
pub trait DeviceEventHandler: Send + Sync {
    async fn handle(&self, event: DeviceEvent);
}

/// Callback for messages received on a subscribed broker topic
#[async_trait::async_trait]
pub trait BrokerMessageHandler: Send + Sync {
    async fn handle(&self, message: ProxyMessage);
}

/// Link to the mesh radio
///
/// Framing, retries and reconnection are the link's business. Handlers are
/// registered before [`DeviceLink::connect`] and are fixed for the lifetime of
/// the connection.
#[async_trait::async_trait]
pub trait DeviceLink: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Ports a device could be attached to
    fn available_ports(&self) -> Vec<String>;

    /// Register the handler for one kind of device event
    fn register_handler(&self, kind: DeviceEventKind, handler: Arc<dyn DeviceEventHandler>);

    /// Open the link on the given port
    async fn connect(&self, port: &str, fail_if_no_handler: bool) -> Result<(), Self::Error>;

    /// Send an envelope to the radio
    async fn send(&self, envelope: ToRadio) -> Result<(), Self::Error>;

    /// Close the link; a no-op when not connected
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Reason the link failed on its own, e.g. the radio was unplugged
    ///
    /// Holds `None` while the link is healthy or closed on request.
    fn link_lost(&self) -> watch::Receiver<Option<String>>;
}

/// Link to the publish/subscribe broker
#[async_trait::async_trait]
pub trait BrokerLink: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open the broker session
    async fn connect(&self, params: &BrokerSection) -> Result<(), Self::Error>;

    /// Subscribe to a topic filter; the handler is only registered on success
    async fn subscribe(
        &self,
        topic_filter: &str,
        handler: Arc<dyn BrokerMessageHandler>,
    ) -> Result<(), Self::Error>;

    /// Publish topic, payload and retained flag of a message
    async fn publish(&self, message: &ProxyMessage) -> Result<(), Self::Error>;

    /// Close the broker session; a no-op when not connected
    async fn disconnect(&self) -> Result<(), Self::Error>;
}

/// Type alias for the MQTT broker link
pub type MqttTransport = mqtt::MqttBrokerLink;

/// Type alias for the serial device link
pub type SerialTransport = serial::SerialDeviceLink;
