//! Bridge lifecycle: port selection, connecting both links, shutdown

use super::connection::{LinkEvent, LinkState, LinkTracker};
use super::forwarding::{
    forward_broker_to_device, forward_device_to_broker, BrokerToDevice, DeviceToBroker,
    ForwardOutcome,
};
use crate::config::BrokerSection;
use crate::error::{redact_url, BridgeError, BridgeResult};
use crate::protocol::{ChannelBinding, DeviceEvent, DeviceEventKind, ProxyMessage};
use crate::transport::{BrokerLink, DeviceLink};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info, warn, Instrument};

/// Bidirectional bridge between a device link and a broker link
pub struct Bridge<D, B>
where
    D: DeviceLink + 'static,
    B: BrokerLink + 'static,
{
    device: Arc<D>,
    broker: Arc<B>,
    device_state: LinkTracker,
    broker_state: LinkTracker,
    proxied: Mutex<Vec<ChannelBinding>>,
}

// ========== PURE HELPER FUNCTIONS ==========

/// The one port to use out of those discovered (pure function)
pub fn choose_single_port(mut ports: Vec<String>) -> BridgeResult<String> {
    match ports.len() {
        0 => Err(BridgeError::NoDeviceFound),
        1 => Ok(ports.remove(0)),
        _ => Err(BridgeError::AmbiguousDevice(ports)),
    }
}

impl<D, B> Bridge<D, B>
where
    D: DeviceLink + 'static,
    B: BrokerLink + 'static,
{
    pub fn new(device: Arc<D>, broker: Arc<B>) -> Self {
        Self {
            device,
            broker,
            device_state: LinkTracker::new("device"),
            broker_state: LinkTracker::new("broker"),
            proxied: Mutex::new(Vec::new()),
        }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    pub fn device_state(&self) -> LinkState {
        self.device_state.current()
    }

    pub fn broker_state(&self) -> LinkState {
        self.broker_state.current()
    }

    /// Channel bindings whose subscription succeeded
    pub fn proxied_channels(&self) -> Vec<ChannelBinding> {
        self.proxied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve the port to open; an empty request means auto-detect
    pub fn select_port(&self, requested: &str) -> BridgeResult<String> {
        if !requested.is_empty() {
            return Ok(requested.to_string());
        }

        let ports = self.device.available_ports();
        let port = choose_single_port(ports)?;
        info!(port = %port, "Auto-detected device port");
        Ok(port)
    }

    /// Register the proxy-message handler and open the device link
    pub async fn connect_device(&self, port: &str, fail_if_no_handler: bool) -> BridgeResult<()> {
        let port = self.select_port(port)?;

        let span = crate::bridge_span!(side = "device", port = %port);
        async {
            info!("Connecting to device");
            self.device_state.apply(LinkEvent::ConnectStarted);

            self.device.register_handler(
                DeviceEventKind::MqttProxy,
                Arc::new(DeviceToBroker::new(self.broker.clone())),
            );

            match self.device.connect(&port, fail_if_no_handler).await {
                Ok(()) => {
                    self.device_state.apply(LinkEvent::ConnectSucceeded);
                    info!("Device connected");
                    Ok(())
                }
                Err(e) => {
                    self.device_state
                        .apply(LinkEvent::ConnectFailed(e.to_string()));
                    error!(error = %e, "Device connection failed");
                    Err(BridgeError::device(e))
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Open the broker link and subscribe every channel binding
    ///
    /// A channel whose subscription fails is left out; the others are still proxied.
    pub async fn connect_broker(
        &self,
        params: &BrokerSection,
        bindings: &[ChannelBinding],
    ) -> BridgeResult<()> {
        let span = crate::bridge_span!(side = "broker", url = %redact_url(&params.url));
        async {
            info!("Connecting to broker");
            self.broker_state.apply(LinkEvent::ConnectStarted);

            if let Err(e) = self.broker.connect(params).await {
                self.broker_state
                    .apply(LinkEvent::ConnectFailed(e.to_string()));
                error!(error = %e, "Broker connection failed");
                return Err(BridgeError::broker(e));
            }
            self.broker_state.apply(LinkEvent::ConnectSucceeded);
            info!("Broker connected");

            for binding in bindings {
                let handler = Arc::new(BrokerToDevice::new(
                    self.device.clone(),
                    binding.channel.clone(),
                ));

                match self.broker.subscribe(&binding.topic_filter, handler).await {
                    Ok(()) => {
                        info!(
                            channel = %binding.channel,
                            filter = %binding.topic_filter,
                            "Proxying channel"
                        );
                        self.proxied
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .push(binding.clone());
                    }
                    Err(e) => {
                        error!(
                            channel = %binding.channel,
                            filter = %binding.topic_filter,
                            error = %e,
                            "Subscribe failed, channel will not be proxied"
                        );
                    }
                }
            }

            let proxied = self.proxied_channels().len();
            if proxied == 0 && !bindings.is_empty() {
                warn!("No channel subscriptions succeeded, broker to device path is idle");
            }
            info!(proxied, configured = bindings.len(), "Broker subscriptions done");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Resolve once the device link fails on its own; the device state goes to `Failed`
    pub async fn device_lost(&self) -> BridgeError {
        let mut lost = self.device.link_lost();
        let reason = match lost.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => "device link dropped".to_string(),
        };

        error!(reason = %reason, "Device link lost");
        self.device_state.apply(LinkEvent::Lost(reason.clone()));
        BridgeError::DeviceLost(reason)
    }

    pub async fn forward_device_to_broker(&self, event: &DeviceEvent) -> ForwardOutcome {
        forward_device_to_broker(self.broker.as_ref(), event).await
    }

    pub async fn forward_broker_to_device(&self, message: &ProxyMessage) -> ForwardOutcome {
        forward_broker_to_device(self.device.as_ref(), message).await
    }

    /// Disconnect both links; errors are logged, never returned
    pub async fn shutdown(&self) {
        info!("Shutting down bridge");

        if let Err(e) = self.device.disconnect().await {
            error!(error = %e, "Device disconnect failed");
        }
        self.device_state.apply(LinkEvent::Closed);

        if let Err(e) = self.broker.disconnect().await {
            error!(error = %e, "Broker disconnect failed");
        }
        self.broker_state.apply(LinkEvent::Closed);

        self.proxied
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        info!("Bridge shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerSection;
    use crate::testing::mocks::{MockBrokerLink, MockDeviceLink};

    fn bridge(
        device: MockDeviceLink,
        broker: MockBrokerLink,
    ) -> Bridge<MockDeviceLink, MockBrokerLink> {
        Bridge::new(Arc::new(device), Arc::new(broker))
    }

    #[test]
    fn test_choose_single_port() {
        assert!(matches!(
            choose_single_port(vec![]),
            Err(BridgeError::NoDeviceFound)
        ));
        assert_eq!(
            choose_single_port(vec!["/dev/ttyUSB0".into()]).unwrap(),
            "/dev/ttyUSB0"
        );
        match choose_single_port(vec!["a".into(), "b".into()]) {
            Err(BridgeError::AmbiguousDevice(ports)) => assert_eq!(ports, vec!["a", "b"]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_explicit_port_skips_discovery() {
        let bridge = bridge(MockDeviceLink::new(), MockBrokerLink::new());
        assert_eq!(bridge.select_port("COM7").unwrap(), "COM7");
    }

    #[tokio::test]
    async fn test_connect_device_registers_proxy_handler() {
        let bridge = bridge(MockDeviceLink::with_ports(&["/dev/ttyACM0"]), MockBrokerLink::new());

        bridge.connect_device("", true).await.unwrap();

        assert_eq!(bridge.device_state(), LinkState::Connected);
        assert_eq!(
            bridge.device().registered_kinds(),
            vec![DeviceEventKind::MqttProxy]
        );
        assert_eq!(
            bridge.device().get_connect_calls().await,
            vec![("/dev/ttyACM0".to_string(), true)]
        );
    }

    #[tokio::test]
    async fn test_connect_device_failure_marks_failed() {
        let bridge = bridge(MockDeviceLink::with_connect_failure(), MockBrokerLink::new());

        let err = bridge.connect_device("/dev/ttyUSB3", false).await.unwrap_err();
        assert!(matches!(err, BridgeError::DeviceConnection(_)));
        assert!(matches!(bridge.device_state(), LinkState::Failed(_)));
    }

    #[tokio::test]
    async fn test_connect_broker_failure_subscribes_nothing() {
        let bridge = bridge(MockDeviceLink::new(), MockBrokerLink::with_connect_failure());
        let params = BrokerSection::default();

        let err = bridge
            .connect_broker(&params, &params.channel_bindings())
            .await
            .unwrap_err();

        assert!(matches!(err, BridgeError::BrokerConnection(_)));
        assert!(bridge.broker().get_subscribe_attempts().await.is_empty());
        assert!(matches!(bridge.broker_state(), LinkState::Failed(_)));
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_both() {
        let bridge = bridge(MockDeviceLink::new(), MockBrokerLink::new());
        let params = BrokerSection::default();
        bridge
            .connect_broker(&params, &params.channel_bindings())
            .await
            .unwrap();
        bridge.connect_device("/dev/ttyUSB0", false).await.unwrap();

        bridge.shutdown().await;

        assert_eq!(bridge.device_state(), LinkState::Disconnected);
        assert_eq!(bridge.broker_state(), LinkState::Disconnected);
        assert!(bridge.proxied_channels().is_empty());
        assert_eq!(
            bridge
                .device()
                .disconnect_calls
                .load(std::sync::atomic::Ordering::SeqCst),
            1
        );
    }

    #[tokio::test]
    async fn test_device_lost_marks_device_failed() {
        let bridge = Arc::new(bridge(MockDeviceLink::new(), MockBrokerLink::new()));
        bridge.connect_device("/dev/ttyUSB0", false).await.unwrap();

        let waiter = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.device_lost().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        bridge.device().lose_link("Broken pipe");
        let err = waiter.await.unwrap();

        assert!(matches!(err, BridgeError::DeviceLost(ref reason) if reason == "Broken pipe"));
        assert_eq!(bridge.device_state(), LinkState::Failed("Broken pipe".into()));
    }
}
