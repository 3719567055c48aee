//! Integration Tests with a Real MQTT Broker
//!
//! Need a broker on localhost:1883 without authentication, e.g.
//! `docker run -p 1883:1883 eclipse-mosquitto:2 mosquitto -c /mosquitto-no-auth.conf`.
//! Run with `cargo test -- --ignored`.
//!
//! These tests validate:
//! - Connection to a real broker
//! - Publish and subscribe through the broker link
//! - The full bridge path from broker to a mock device


use async_trait::async_trait;
use meshtastic_client_proxy::protocol::ProxyMessage;
use meshtastic_client_proxy::testing::MockDeviceLink;
use meshtastic_client_proxy::transport::mqtt::{ConnectionState, MqttBrokerLink};
use meshtastic_client_proxy::transport::{BrokerLink, BrokerMessageHandler};
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{mock_bridge, proxy_event, test_broker_section};
use tokio::sync::mpsc;
use tokio::time::timeout;

struct Forward(mpsc::UnboundedSender<ProxyMessage>);

#[async_trait]
impl BrokerMessageHandler for Forward {
    async fn handle(&self, message: ProxyMessage) {
        let _ = self.0.send(message);
    }
}

fn unique_root() -> String {
    format!("test/{}", uuid::Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore = "requires an MQTT broker on localhost:1883"]
async fn test_connect_to_real_broker() {
    let link = MqttBrokerLink::new();
    let params = test_broker_section(&["LongFast"]);

    link.connect(&params).await.expect("Connection should succeed");
    assert_eq!(link.connection_state(), Some(ConnectionState::Connected));

    link.disconnect().await.unwrap();
    assert_eq!(link.connection_state(), None);
}

#[tokio::test]
#[ignore = "requires an MQTT broker on localhost:1883"]
async fn test_publish_and_receive() {
    let root = unique_root();
    let link = MqttBrokerLink::new();
    link.connect(&test_broker_section(&["a"])).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let filter = format!("{root}/c/a/+");
    link.subscribe(&filter, Arc::new(Forward(tx))).await.unwrap();

    let sent = ProxyMessage::new(format!("{root}/c/a/!0000beef"), vec![1, 2, 3], false);
    link.publish(&sent).await.unwrap();

    let received = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message within timeout")
        .expect("channel open");
    assert_eq!(received.topic, sent.topic);
    assert_eq!(received.payload, sent.payload);

    link.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore = "requires an MQTT broker on localhost:1883"]
async fn test_bridge_round_trip_through_broker() {
    let root = unique_root();
    let mut params = test_broker_section(&["LongFast"]);
    params.root_topic = root.clone();

    let broker = MqttBrokerLink::new();
    let (bridge, device, _broker) = mock_bridge(MockDeviceLink::new(), broker);
    bridge
        .connect_broker(&params, &params.channel_bindings())
        .await
        .unwrap();
    bridge.connect_device("/dev/ttyUSB0", false).await.unwrap();

    // what the node publishes comes back to it through the subscription
    let topic = format!("{root}/c/LongFast/!a1b2c3d4");
    assert!(device.emit(proxy_event(&topic, &[9, 9, 9], false)).await);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let sent = device.get_sent_proxy_messages().await;
        if let Some(message) = sent.first() {
            assert_eq!(message.topic, topic);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "message never reached the device"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    bridge.shutdown().await;
}
