//! Envelope translation between the device and broker domains
//!
//! Pure functions only. The payload bytes pass through untouched in both
//! directions; only the routing fields (topic, retained flag) are mapped.

use crate::protocol::mesh::{
    mqtt_client_proxy_message, node_id, to_radio, MqttClientProxyMessage, ServiceEnvelope,
    ToRadio,
};
use crate::protocol::{DeviceEvent, ProxyMessage};
use bytes::Bytes;
use prost::Message;

/// What a broker payload looks like when it parses as a service envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeSummary {
    pub channel_id: String,
    pub gateway_id: String,
    /// Sender node id, when the envelope carries a packet
    pub from: Option<String>,
    pub to: Option<String>,
    pub packet_id: Option<u32>,
}

/// Envelope translator (stateless)
pub struct EnvelopeTranslator;

impl EnvelopeTranslator {
    /// Broker message for a device event; `None` for anything but a proxy message
    pub fn to_broker(event: &DeviceEvent) -> Option<ProxyMessage> {
        match event {
            DeviceEvent::MqttProxy(proxy) => {
                let payload = match &proxy.payload_variant {
                    Some(mqtt_client_proxy_message::PayloadVariant::Data(data)) => {
                        Bytes::copy_from_slice(data)
                    }
                    Some(mqtt_client_proxy_message::PayloadVariant::Text(text)) => {
                        Bytes::copy_from_slice(text.as_bytes())
                    }
                    None => Bytes::new(),
                };
                Some(ProxyMessage::new(proxy.topic.clone(), payload, proxy.retained))
            }
            DeviceEvent::Packet(_)
            | DeviceEvent::MyInfo(_)
            | DeviceEvent::ConfigComplete(_)
            | DeviceEvent::Rebooted(_)
            | DeviceEvent::Other { .. } => None,
        }
    }

    /// Device-bound envelope for a broker message; the topic is carried verbatim
    pub fn to_device(message: &ProxyMessage) -> ToRadio {
        let proxy = MqttClientProxyMessage {
            topic: message.topic.clone(),
            payload_variant: Some(mqtt_client_proxy_message::PayloadVariant::Data(
                message.payload.to_vec(),
            )),
            retained: message.retained,
        };

        ToRadio {
            payload_variant: Some(to_radio::PayloadVariant::MqttClientProxyMessage(proxy)),
        }
    }

    /// Parse a broker payload as a service envelope, for logging only
    pub fn inspect_payload(payload: &[u8]) -> Result<EnvelopeSummary, prost::DecodeError> {
        let envelope = ServiceEnvelope::decode(payload)?;
        let packet = envelope.packet.as_ref();

        Ok(EnvelopeSummary {
            channel_id: envelope.channel_id,
            gateway_id: envelope.gateway_id,
            from: packet.map(|p| node_id(p.from)),
            to: packet.map(|p| node_id(p.to)),
            packet_id: packet.map(|p| p.id),
        })
    }
}
