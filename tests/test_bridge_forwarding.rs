//! Forwarding behavior of the bridge in both directions
//!
//! Messages travel through the real handler registration path: device events
//! are emitted by the mock device link and broker messages are delivered by the
//! mock broker link, exactly as the concrete links would call the bridge.


use meshtastic_client_proxy::bridge::{EnvelopeTranslator, ForwardOutcome};
use meshtastic_client_proxy::protocol::mesh::{mqtt_client_proxy_message, MeshPacket};
use meshtastic_client_proxy::protocol::{DeviceEvent, ProxyMessage};
use meshtastic_client_proxy::testing::{MockBrokerLink, MockDeviceLink};
use proptest::prelude::*;
use test_helpers::{mock_bridge, proxy_event, test_broker_section};

#[tokio::test]
async fn test_device_proxy_message_is_published_verbatim() {
    let (bridge, device, broker) = mock_bridge(MockDeviceLink::new(), MockBrokerLink::new());
    bridge.connect_device("/dev/ttyUSB0", false).await.unwrap();

    let handled = device
        .emit(proxy_event("msh/2/e/LongFast/!a1b2c3d4", &[0x08, 0x01, 0xff], true))
        .await;
    assert!(handled);

    let published = broker.get_published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "msh/2/e/LongFast/!a1b2c3d4");
    assert_eq!(published[0].payload.as_ref(), &[0x08, 0x01, 0xff]);
    assert!(published[0].retained);
}

#[tokio::test]
async fn test_non_proxy_event_produces_no_publish() {
    let (bridge, _device, broker) = mock_bridge(MockDeviceLink::new(), MockBrokerLink::new());

    let outcome = bridge
        .forward_device_to_broker(&DeviceEvent::Packet(MeshPacket::default()))
        .await;

    assert_eq!(outcome, ForwardOutcome::Ignored);
    assert!(broker.get_published().await.is_empty());
}

#[tokio::test]
async fn test_only_proxy_kind_is_handled_by_device_link() {
    let (bridge, device, broker) = mock_bridge(MockDeviceLink::new(), MockBrokerLink::new());
    bridge.connect_device("/dev/ttyUSB0", false).await.unwrap();

    assert!(!device.emit(DeviceEvent::ConfigComplete(7)).await);
    assert!(!device.emit(DeviceEvent::Rebooted(true)).await);
    assert!(broker.get_published().await.is_empty());
}

#[tokio::test]
async fn test_publish_failure_does_not_stop_next_event() {
    let (bridge, device, broker) = mock_bridge(MockDeviceLink::new(), MockBrokerLink::new());
    bridge.connect_device("/dev/ttyUSB0", false).await.unwrap();
    broker.fail_next_publishes(1);

    // first one is dropped inside the handler, nothing propagates
    assert!(device.emit(proxy_event("a/1", &[1], false)).await);
    assert!(device.emit(proxy_event("a/2", &[2], false)).await);

    let published = broker.get_published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "a/2");
}

#[tokio::test]
async fn test_broker_message_is_sent_to_device_verbatim() {
    let (bridge, device, broker) = mock_bridge(MockDeviceLink::new(), MockBrokerLink::new());
    let params = test_broker_section(&["LongFast"]);
    bridge
        .connect_broker(&params, &params.channel_bindings())
        .await
        .unwrap();

    let delivered = broker
        .deliver("msh/2/c/LongFast/!deadbeef", vec![0x00, 0x10, 0x20], true)
        .await;
    assert_eq!(delivered, 1);

    let sent = device.get_sent_proxy_messages().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, "msh/2/c/LongFast/!deadbeef");
    assert!(sent[0].retained);
    assert_eq!(
        sent[0].payload_variant,
        Some(mqtt_client_proxy_message::PayloadVariant::Data(vec![
            0x00, 0x10, 0x20
        ]))
    );
}

#[tokio::test]
async fn test_send_failure_is_dropped() {
    let (bridge, device, _broker) = mock_bridge(MockDeviceLink::new(), MockBrokerLink::new());
    device.set_send_failure(true);

    let message = ProxyMessage::new("msh/2/c/a/!1", vec![1, 2], false);
    assert_eq!(
        bridge.forward_broker_to_device(&message).await,
        ForwardOutcome::Dropped
    );

    device.set_send_failure(false);
    assert_eq!(
        bridge.forward_broker_to_device(&message).await,
        ForwardOutcome::Forwarded
    );
    assert_eq!(device.get_sent().await.len(), 1);
}

#[test]
fn test_forwarding_is_synchronous_per_event() {
    let (bridge, _device, broker) = mock_bridge(MockDeviceLink::new(), MockBrokerLink::new());
    let event = proxy_event("x/y", &[5], false);

    let outcome = tokio_test::block_on(bridge.forward_device_to_broker(&event));
    assert_eq!(outcome, ForwardOutcome::Forwarded);
    assert_eq!(tokio_test::block_on(broker.get_published()).len(), 1);
}

proptest! {
    #[test]
    fn device_to_broker_publish_equals_envelope(
        topic in "[A-Za-z0-9/!_-]{1,60}",
        data in proptest::collection::vec(any::<u8>(), 0..512),
        retained in any::<bool>(),
    ) {
        let (bridge, _device, broker) = mock_bridge(MockDeviceLink::new(), MockBrokerLink::new());
        let event = proxy_event(&topic, &data, retained);

        let outcome = tokio_test::block_on(bridge.forward_device_to_broker(&event));
        prop_assert_eq!(outcome, ForwardOutcome::Forwarded);

        let published = tokio_test::block_on(broker.get_published());
        prop_assert_eq!(published.len(), 1);
        prop_assert_eq!(&published[0].topic, &topic);
        prop_assert_eq!(published[0].payload.as_ref(), data.as_slice());
        prop_assert_eq!(published[0].retained, retained);
    }

    #[test]
    fn broker_to_device_send_equals_message(
        topic in "[A-Za-z0-9/!_-]{1,60}",
        data in proptest::collection::vec(any::<u8>(), 0..512),
        retained in any::<bool>(),
    ) {
        let (bridge, device, _broker) = mock_bridge(MockDeviceLink::new(), MockBrokerLink::new());
        let message = ProxyMessage::new(topic.clone(), data.clone(), retained);

        let outcome = tokio_test::block_on(bridge.forward_broker_to_device(&message));
        prop_assert_eq!(outcome, ForwardOutcome::Forwarded);

        let sent = tokio_test::block_on(device.get_sent_proxy_messages());
        prop_assert_eq!(sent.len(), 1);
        prop_assert_eq!(&sent[0].topic, &topic);
        prop_assert_eq!(sent[0].retained, retained);
        prop_assert_eq!(
            sent[0].payload_variant.clone(),
            Some(mqtt_client_proxy_message::PayloadVariant::Data(data))
        );
    }

    #[test]
    fn translation_round_trip_keeps_fields(
        topic in "[A-Za-z0-9/!_-]{1,60}",
        data in proptest::collection::vec(any::<u8>(), 0..512),
        retained in any::<bool>(),
    ) {
        let event = proxy_event(&topic, &data, retained);
        let message = EnvelopeTranslator::to_broker(&event).unwrap();
        let envelope = EnvelopeTranslator::to_device(&message);
        let proxy = envelope.proxy_message().unwrap();

        prop_assert_eq!(&proxy.topic, &topic);
        prop_assert_eq!(proxy.retained, retained);
        prop_assert_eq!(
            proxy.payload_variant.clone(),
            Some(mqtt_client_proxy_message::PayloadVariant::Data(data))
        );
    }
}
