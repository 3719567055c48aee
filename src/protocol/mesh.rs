//! Meshtastic protobuf wire types used by the proxy
//!
//! Only the messages and fields the proxy touches are declared here. Field tags
//! match the upstream `meshtastic/*.proto` definitions, so frames produced by
//! firmware decode cleanly: fields and `oneof` members that are not declared are
//! skipped by the decoder.

/// Message sent from the radio to the client over the serial stream API
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FromRadio {
    /// Monotonic packet id assigned by the radio
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(oneof = "from_radio::PayloadVariant", tags = "2, 3, 7, 8, 14")]
    pub payload_variant: Option<from_radio::PayloadVariant>,
}

pub mod from_radio {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "2")]
        Packet(super::MeshPacket),
        #[prost(message, tag = "3")]
        MyInfo(super::MyNodeInfo),
        #[prost(uint32, tag = "7")]
        ConfigCompleteId(u32),
        #[prost(bool, tag = "8")]
        Rebooted(bool),
        #[prost(message, tag = "14")]
        MqttClientProxyMessage(super::MqttClientProxyMessage),
    }
}

/// Message sent from the client to the radio over the serial stream API
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToRadio {
    #[prost(oneof = "to_radio::PayloadVariant", tags = "1, 3, 4, 6, 7")]
    pub payload_variant: Option<to_radio::PayloadVariant>,
}

pub mod to_radio {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "1")]
        Packet(super::MeshPacket),
        #[prost(uint32, tag = "3")]
        WantConfigId(u32),
        #[prost(bool, tag = "4")]
        Disconnect(bool),
        #[prost(message, tag = "6")]
        MqttClientProxyMessage(super::MqttClientProxyMessage),
        #[prost(message, tag = "7")]
        Heartbeat(super::Heartbeat),
    }
}

/// MQTT traffic tunnelled through the client when the node has no network of its own
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MqttClientProxyMessage {
    /// Fully qualified MQTT topic
    #[prost(string, tag = "1")]
    pub topic: String,
    #[prost(oneof = "mqtt_client_proxy_message::PayloadVariant", tags = "2, 3")]
    pub payload_variant: Option<mqtt_client_proxy_message::PayloadVariant>,
    /// MQTT retained flag
    #[prost(bool, tag = "4")]
    pub retained: bool,
}

pub mod mqtt_client_proxy_message {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(bytes, tag = "2")]
        Data(Vec<u8>),
        #[prost(string, tag = "3")]
        Text(String),
    }
}

/// Envelope the firmware wraps around mesh packets it publishes to MQTT
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServiceEnvelope {
    #[prost(message, optional, tag = "1")]
    pub packet: Option<MeshPacket>,
    /// Channel name the packet was heard on
    #[prost(string, tag = "2")]
    pub channel_id: String,
    /// Node id (`!xxxxxxxx`) of the gateway that published the packet
    #[prost(string, tag = "3")]
    pub gateway_id: String,
}

/// Routing header of a mesh packet; the payload variants are not decoded
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MeshPacket {
    #[prost(fixed32, tag = "1")]
    pub from: u32,
    #[prost(fixed32, tag = "2")]
    pub to: u32,
    #[prost(uint32, tag = "3")]
    pub channel: u32,
    #[prost(fixed32, tag = "6")]
    pub id: u32,
    #[prost(uint32, tag = "9")]
    pub hop_limit: u32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MyNodeInfo {
    #[prost(uint32, tag = "1")]
    pub my_node_num: u32,
}

/// Keep-alive for the serial client session
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Heartbeat {
    #[prost(uint32, tag = "1")]
    pub nonce: u32,
}

impl ToRadio {
    /// Request the node database and configuration push that starts a client session
    pub fn want_config(config_id: u32) -> Self {
        Self {
            payload_variant: Some(to_radio::PayloadVariant::WantConfigId(config_id)),
        }
    }

    pub fn heartbeat(nonce: u32) -> Self {
        Self {
            payload_variant: Some(to_radio::PayloadVariant::Heartbeat(Heartbeat { nonce })),
        }
    }

    /// Tell the radio the client is going away
    pub fn disconnect() -> Self {
        Self {
            payload_variant: Some(to_radio::PayloadVariant::Disconnect(true)),
        }
    }

    /// Proxy message carried by this envelope, if any
    pub fn proxy_message(&self) -> Option<&MqttClientProxyMessage> {
        match &self.payload_variant {
            Some(to_radio::PayloadVariant::MqttClientProxyMessage(msg)) => Some(msg),
            _ => None,
        }
    }
}

/// Format a node number the way Meshtastic prints node ids
pub fn node_id(num: u32) -> String {
    format!("!{num:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_from_radio_proxy_message_decodes() {
        let msg = FromRadio {
            id: 7,
            payload_variant: Some(from_radio::PayloadVariant::MqttClientProxyMessage(
                MqttClientProxyMessage {
                    topic: "msh/2/c/LongFast/!abcd0001".to_string(),
                    payload_variant: Some(mqtt_client_proxy_message::PayloadVariant::Data(
                        vec![1, 2, 3],
                    )),
                    retained: true,
                },
            )),
        };

        let bytes = msg.encode_to_vec();
        let decoded = FromRadio::decode(bytes.as_slice()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_undeclared_from_radio_variant_is_skipped() {
        // FromRadio.node_info (tag 4) carrying an empty NodeInfo message
        let bytes = [0x08, 0x05, 0x22, 0x00];
        let decoded = FromRadio::decode(&bytes[..]).unwrap();

        assert_eq!(decoded.id, 5);
        assert!(decoded.payload_variant.is_none());
    }

    #[test]
    fn test_to_radio_proxy_message_uses_tag_six() {
        let msg = ToRadio {
            payload_variant: Some(to_radio::PayloadVariant::MqttClientProxyMessage(
                MqttClientProxyMessage::default(),
            )),
        };
        let bytes = msg.encode_to_vec();

        // field 6, wire type 2 (length delimited), empty body
        assert_eq!(bytes, vec![0x32, 0x00]);
    }

    #[test]
    fn test_to_radio_constructors() {
        assert_eq!(
            ToRadio::want_config(42).payload_variant,
            Some(to_radio::PayloadVariant::WantConfigId(42))
        );
        assert_eq!(
            ToRadio::disconnect().payload_variant,
            Some(to_radio::PayloadVariant::Disconnect(true))
        );
        assert!(ToRadio::heartbeat(1).proxy_message().is_none());
    }

    #[test]
    fn test_node_id_formatting() {
        assert_eq!(node_id(0xabcd0001), "!abcd0001");
        assert_eq!(node_id(1), "!00000001");
    }
}
