//! Envelope types shared by both sides of the proxy
//!
//! [`ProxyMessage`] is the unit of cross-domain traffic. [`DeviceEvent`] is the
//! closed set of things the radio can tell us; the bridge matches on it
//! exhaustively so a new device event kind is a compile-time change.

use super::mesh::{from_radio, FromRadio, MeshPacket, MqttClientProxyMessage, MyNodeInfo};
use bytes::Bytes;
use std::fmt;

/// Payload-carrying message forwarded between the device and the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyMessage {
    /// Broker-side address
    pub topic: String,
    /// Device-side channel name; only known on the broker to device path
    pub channel: String,
    /// Raw payload, never inspected or mutated by the bridge
    pub payload: Bytes,
    /// Broker retained flag
    pub retained: bool,
}

impl ProxyMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, retained: bool) -> Self {
        Self {
            topic: topic.into(),
            channel: String::new(),
            payload: payload.into(),
            retained,
        }
    }

    /// Attach the channel binding the message arrived through
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Hex rendering of the payload for debug logs
    pub fn payload_hex(&self) -> String {
        hex::encode(&self.payload)
    }
}

/// Everything the radio can report over the serial stream
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// MQTT traffic the node wants published on its behalf
    MqttProxy(MqttClientProxyMessage),
    /// Mesh packet received by the node
    Packet(MeshPacket),
    /// Identity of the attached node
    MyInfo(MyNodeInfo),
    /// End of the configuration push requested with `want_config_id`
    ConfigComplete(u32),
    /// The node rebooted
    Rebooted(bool),
    /// A `FromRadio` whose payload variant the proxy does not model
    Other { id: u32 },
}

/// Discriminant of [`DeviceEvent`], used as the handler registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceEventKind {
    MqttProxy,
    Packet,
    MyInfo,
    ConfigComplete,
    Rebooted,
    Other,
}

impl DeviceEvent {
    pub fn kind(&self) -> DeviceEventKind {
        match self {
            DeviceEvent::MqttProxy(_) => DeviceEventKind::MqttProxy,
            DeviceEvent::Packet(_) => DeviceEventKind::Packet,
            DeviceEvent::MyInfo(_) => DeviceEventKind::MyInfo,
            DeviceEvent::ConfigComplete(_) => DeviceEventKind::ConfigComplete,
            DeviceEvent::Rebooted(_) => DeviceEventKind::Rebooted,
            DeviceEvent::Other { .. } => DeviceEventKind::Other,
        }
    }
}

impl From<FromRadio> for DeviceEvent {
    fn from(msg: FromRadio) -> Self {
        match msg.payload_variant {
            Some(from_radio::PayloadVariant::MqttClientProxyMessage(proxy)) => {
                DeviceEvent::MqttProxy(proxy)
            }
            Some(from_radio::PayloadVariant::Packet(packet)) => DeviceEvent::Packet(packet),
            Some(from_radio::PayloadVariant::MyInfo(info)) => DeviceEvent::MyInfo(info),
            Some(from_radio::PayloadVariant::ConfigCompleteId(id)) => {
                DeviceEvent::ConfigComplete(id)
            }
            Some(from_radio::PayloadVariant::Rebooted(rebooted)) => DeviceEvent::Rebooted(rebooted),
            None => DeviceEvent::Other { id: msg.id },
        }
    }
}

impl fmt::Display for DeviceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceEventKind::MqttProxy => "mqtt_client_proxy_message",
            DeviceEventKind::Packet => "packet",
            DeviceEventKind::MyInfo => "my_info",
            DeviceEventKind::ConfigComplete => "config_complete_id",
            DeviceEventKind::Rebooted => "rebooted",
            DeviceEventKind::Other => "other",
        };
        f.write_str(name)
    }
}
