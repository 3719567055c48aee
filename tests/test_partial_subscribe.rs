//! A failed channel subscription leaves the other channels proxied


use meshtastic_client_proxy::bridge::LinkState;
use meshtastic_client_proxy::testing::{MockBrokerLink, MockDeviceLink};
use test_helpers::{mock_bridge, test_broker_section};

#[tokio::test]
async fn test_subscribe_failure_skips_only_that_channel() {
    let broker = MockBrokerLink::new();
    broker.fail_subscribe_for("msh/2/c/b/+");
    let (bridge, device, broker) = mock_bridge(MockDeviceLink::new(), broker);

    let params = test_broker_section(&["a", "b", "c"]);
    bridge
        .connect_broker(&params, &params.channel_bindings())
        .await
        .expect("a single failed subscription is not fatal");

    assert_eq!(bridge.broker_state(), LinkState::Connected);
    assert_eq!(
        broker.get_subscribe_attempts().await,
        vec!["msh/2/c/a/+", "msh/2/c/b/+", "msh/2/c/c/+"]
    );
    let proxied: Vec<String> = bridge
        .proxied_channels()
        .into_iter()
        .map(|binding| binding.channel)
        .collect();
    assert_eq!(proxied, vec!["a", "c"]);

    // "a" still reaches the device
    assert_eq!(broker.deliver("msh/2/c/a/!0000abcd", vec![1], false).await, 1);
    // nothing is subscribed for "b"
    assert_eq!(broker.deliver("msh/2/c/b/!0000abcd", vec![2], false).await, 0);

    let sent = device.get_sent_proxy_messages().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, "msh/2/c/a/!0000abcd");
}

#[tokio::test]
async fn test_all_subscriptions_failing_is_not_fatal() {
    let broker = MockBrokerLink::new();
    broker.fail_subscribe_for("msh/2/c/a/+");
    let (bridge, _device, _broker) = mock_bridge(MockDeviceLink::new(), broker);

    let params = test_broker_section(&["a"]);
    bridge
        .connect_broker(&params, &params.channel_bindings())
        .await
        .unwrap();

    assert!(bridge.proxied_channels().is_empty());
}

#[tokio::test]
async fn test_custom_root_and_segment_filters() {
    let (bridge, _device, broker) = mock_bridge(MockDeviceLink::new(), MockBrokerLink::new());

    let mut params = test_broker_section(&["LongFast"]);
    params.root_topic = "/msh/US/".to_string();
    params.channel_segment = "e".to_string();

    bridge
        .connect_broker(&params, &params.channel_bindings())
        .await
        .unwrap();

    assert_eq!(broker.subscribed_filters().await, vec!["msh/US/e/LongFast/+"]);
}
