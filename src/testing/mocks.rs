//! Mock device and broker links
//!
//! Both record every call so tests can assert on exactly what the bridge did,
//! and both can be told to fail at specific points.

use crate::config::BrokerSection;
use crate::protocol::mesh::{MqttClientProxyMessage, ToRadio};
use crate::protocol::{topic_matches, DeviceEvent, DeviceEventKind, ProxyMessage};
use crate::transport::{BrokerLink, BrokerMessageHandler, DeviceEventHandler, DeviceLink};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};

/// Error returned by the mock links
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("mock link error: {0}")]
pub struct MockLinkError(pub String);

/// Mock device link
pub struct MockDeviceLink {
    pub ports: Vec<String>,
    pub fail_connect: bool,
    fail_send: AtomicBool,
    pub connect_calls: Arc<Mutex<Vec<(String, bool)>>>,
    pub sent: Arc<Mutex<Vec<ToRadio>>>,
    pub disconnect_calls: AtomicUsize,
    handlers: std::sync::Mutex<HashMap<DeviceEventKind, Arc<dyn DeviceEventHandler>>>,
    lost: watch::Sender<Option<String>>,
}

impl Default for MockDeviceLink {
    fn default() -> Self {
        Self {
            ports: Vec::new(),
            fail_connect: false,
            fail_send: AtomicBool::new(false),
            connect_calls: Arc::default(),
            sent: Arc::default(),
            disconnect_calls: AtomicUsize::new(0),
            handlers: std::sync::Mutex::default(),
            lost: watch::channel(None).0,
        }
    }
}

impl MockDeviceLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ports(ports: &[&str]) -> Self {
        Self {
            ports: ports.iter().map(|p| p.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_connect_failure() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    pub fn set_send_failure(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    /// Fail the link as if the radio had been unplugged
    pub fn lose_link(&self, reason: &str) {
        self.lost.send_replace(Some(reason.to_string()));
    }

    /// Deliver an event as if the radio had sent it; false when nobody handles its kind
    pub async fn emit(&self, event: DeviceEvent) -> bool {
        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&event.kind())
            .cloned();

        match handler {
            Some(handler) => {
                handler.handle(event).await;
                true
            }
            None => false,
        }
    }

    pub fn registered_kinds(&self) -> Vec<DeviceEventKind> {
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub async fn get_connect_calls(&self) -> Vec<(String, bool)> {
        self.connect_calls.lock().await.clone()
    }

    pub async fn get_sent(&self) -> Vec<ToRadio> {
        self.sent.lock().await.clone()
    }

    /// Proxy messages among the sent envelopes
    pub async fn get_sent_proxy_messages(&self) -> Vec<MqttClientProxyMessage> {
        self.sent
            .lock()
            .await
            .iter()
            .filter_map(|envelope| envelope.proxy_message().cloned())
            .collect()
    }
}

#[async_trait]
impl DeviceLink for MockDeviceLink {
    type Error = MockLinkError;

    fn available_ports(&self) -> Vec<String> {
        self.ports.clone()
    }

    fn register_handler(&self, kind: DeviceEventKind, handler: Arc<dyn DeviceEventHandler>) {
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(kind, handler);
    }

    async fn connect(&self, port: &str, fail_if_no_handler: bool) -> Result<(), MockLinkError> {
        self.connect_calls
            .lock()
            .await
            .push((port.to_string(), fail_if_no_handler));

        if self.fail_connect {
            return Err(MockLinkError(format!("cannot open {port}")));
        }
        self.lost.send_replace(None);
        Ok(())
    }

    async fn send(&self, envelope: ToRadio) -> Result<(), MockLinkError> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(MockLinkError("send failed".to_string()));
        }
        self.sent.lock().await.push(envelope);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MockLinkError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn link_lost(&self) -> watch::Receiver<Option<String>> {
        self.lost.subscribe()
    }
}

type RouteEntry = (String, Arc<dyn BrokerMessageHandler>);

/// Mock broker link
#[derive(Default)]
pub struct MockBrokerLink {
    pub fail_connect: bool,
    failing_filters: std::sync::Mutex<HashSet<String>>,
    publish_failures_remaining: AtomicUsize,
    pub connect_calls: Arc<Mutex<Vec<BrokerSection>>>,
    pub subscribe_attempts: Arc<Mutex<Vec<String>>>,
    pub published: Arc<Mutex<Vec<ProxyMessage>>>,
    pub disconnect_calls: AtomicUsize,
    routes: Mutex<Vec<RouteEntry>>,
}

impl MockBrokerLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_failure() -> Self {
        Self {
            fail_connect: true,
            ..Default::default()
        }
    }

    /// Make subscriptions to this exact filter fail
    pub fn fail_subscribe_for(&self, filter: &str) {
        self.failing_filters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(filter.to_string());
    }

    /// Make the next `count` publishes fail
    pub fn fail_next_publishes(&self, count: usize) {
        self.publish_failures_remaining
            .store(count, Ordering::SeqCst);
    }

    pub async fn get_published(&self) -> Vec<ProxyMessage> {
        self.published.lock().await.clone()
    }

    pub async fn get_subscribe_attempts(&self) -> Vec<String> {
        self.subscribe_attempts.lock().await.clone()
    }

    /// Filters with a registered handler
    pub async fn subscribed_filters(&self) -> Vec<String> {
        self.routes
            .lock()
            .await
            .iter()
            .map(|(filter, _)| filter.clone())
            .collect()
    }

    /// Deliver a broker message to every matching subscription; returns how many handled it
    pub async fn deliver(&self, topic: &str, payload: impl Into<Bytes>, retained: bool) -> usize {
        let handlers: Vec<Arc<dyn BrokerMessageHandler>> = self
            .routes
            .lock()
            .await
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, handler)| handler.clone())
            .collect();

        let message = ProxyMessage::new(topic, payload, retained);
        for handler in &handlers {
            handler.handle(message.clone()).await;
        }
        handlers.len()
    }
}

#[async_trait]
impl BrokerLink for MockBrokerLink {
    type Error = MockLinkError;

    async fn connect(&self, params: &BrokerSection) -> Result<(), MockLinkError> {
        self.connect_calls.lock().await.push(params.clone());
        if self.fail_connect {
            return Err(MockLinkError(format!("cannot reach {}", params.url)));
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic_filter: &str,
        handler: Arc<dyn BrokerMessageHandler>,
    ) -> Result<(), MockLinkError> {
        self.subscribe_attempts
            .lock()
            .await
            .push(topic_filter.to_string());

        let refused = self
            .failing_filters
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(topic_filter);
        if refused {
            return Err(MockLinkError(format!("subscribe refused for {topic_filter}")));
        }

        self.routes
            .lock()
            .await
            .push((topic_filter.to_string(), handler));
        Ok(())
    }

    async fn publish(&self, message: &ProxyMessage) -> Result<(), MockLinkError> {
        let fail = self
            .publish_failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(MockLinkError("publish failed".to_string()));
        }

        self.published.lock().await.push(message.clone());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MockLinkError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Count(Arc<AtomicUsize>);

    #[async_trait]
    impl BrokerMessageHandler for Count {
        async fn handle(&self, _message: ProxyMessage) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_mock_device_link_loss_resets_on_connect() {
        let device = MockDeviceLink::new();
        let lost = device.link_lost();

        device.lose_link("unplugged");
        assert_eq!(lost.borrow().as_deref(), Some("unplugged"));

        device.connect("/dev/ttyUSB0", false).await.unwrap();
        assert!(lost.borrow().is_none());
    }

    #[tokio::test]
    async fn test_mock_broker_publish_failures_run_out() {
        let broker = MockBrokerLink::new();
        broker.fail_next_publishes(1);

        let message = ProxyMessage::new("t", vec![1], false);
        assert!(broker.publish(&message).await.is_err());
        assert!(broker.publish(&message).await.is_ok());
        assert_eq!(broker.get_published().await, vec![message]);
    }

    #[tokio::test]
    async fn test_mock_broker_delivers_by_filter() {
        let broker = MockBrokerLink::new();
        let count = Arc::new(AtomicUsize::new(0));
        broker
            .subscribe("msh/2/c/a/+", Arc::new(Count(count.clone())))
            .await
            .unwrap();

        assert_eq!(broker.deliver("msh/2/c/a/!1", vec![1], false).await, 1);
        assert_eq!(broker.deliver("msh/2/c/b/!1", vec![1], false).await, 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mock_broker_refused_subscription_not_routed() {
        let broker = MockBrokerLink::new();
        broker.fail_subscribe_for("x/+");

        let result = broker
            .subscribe("x/+", Arc::new(Count(Arc::new(AtomicUsize::new(0)))))
            .await;
        assert!(result.is_err());
        assert!(broker.subscribed_filters().await.is_empty());
        assert_eq!(broker.get_subscribe_attempts().await, vec!["x/+"]);
    }

    #[tokio::test]
    async fn test_mock_device_emit_without_handler() {
        let device = MockDeviceLink::new();
        assert!(!device.emit(DeviceEvent::Rebooted(true)).await);
    }

    #[tokio::test]
    async fn test_mock_device_send_failure_toggle() {
        let device = MockDeviceLink::new();
        device.set_send_failure(true);
        assert!(device.send(ToRadio::heartbeat(1)).await.is_err());

        device.set_send_failure(false);
        assert!(device.send(ToRadio::heartbeat(2)).await.is_ok());
        assert_eq!(device.get_sent().await.len(), 1);
    }
}
