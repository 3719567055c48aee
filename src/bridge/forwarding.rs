//! The two forwarding paths
//!
//! Each inbound event gets exactly one translate-and-forward attempt. Failures
//! are logged and the event is dropped; nothing is retried or buffered and no
//! error ever leaves a handler.

use super::translator::EnvelopeTranslator;
use crate::protocol::{DeviceEvent, ProxyMessage};
use crate::transport::{BrokerLink, BrokerMessageHandler, DeviceEventHandler, DeviceLink};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn, Instrument};

/// What happened to one inbound event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Handed to the opposite link
    Forwarded,
    /// Not something the bridge forwards
    Ignored,
    /// The opposite link rejected it
    Dropped,
}

/// Publish a device proxy message to the broker
pub async fn forward_device_to_broker<B>(broker: &B, event: &DeviceEvent) -> ForwardOutcome
where
    B: BrokerLink + ?Sized,
{
    let Some(message) = EnvelopeTranslator::to_broker(event) else {
        trace!(kind = %event.kind(), "Ignoring device event");
        return ForwardOutcome::Ignored;
    };

    let span = crate::forward_span!(direction = "device_to_broker", topic = %message.topic);
    async {
        debug!(
            retained = message.retained,
            payload = %message.payload_hex(),
            "Mesh to broker"
        );

        match broker.publish(&message).await {
            Ok(()) => {
                info!(topic = %message.topic, "Message published to broker");
                ForwardOutcome::Forwarded
            }
            Err(e) => {
                error!(topic = %message.topic, error = %e, "Failed publishing message, dropped");
                ForwardOutcome::Dropped
            }
        }
    }
    .instrument(span)
    .await
}

/// Send a broker message to the device
pub async fn forward_broker_to_device<D>(device: &D, message: &ProxyMessage) -> ForwardOutcome
where
    D: DeviceLink + ?Sized,
{
    let span = crate::forward_span!(
        direction = "broker_to_device",
        topic = %message.topic,
        channel = %message.channel
    );
    async {
        match EnvelopeTranslator::inspect_payload(&message.payload) {
            Ok(summary) => info!(
                envelope_channel = %summary.channel_id,
                gateway = %summary.gateway_id,
                from = summary.from.as_deref().unwrap_or("-"),
                packet_id = summary.packet_id.unwrap_or_default(),
                "Got packet from broker"
            ),
            Err(e) => warn!(
                error = %e,
                payload = %message.payload_hex(),
                "Broker payload is not a service envelope, forwarding anyway"
            ),
        }

        let envelope = EnvelopeTranslator::to_device(message);
        match device.send(envelope).await {
            Ok(()) => {
                info!("Message sent to device");
                ForwardOutcome::Forwarded
            }
            Err(e) => {
                error!(error = %e, "Failed sending to device, dropped");
                ForwardOutcome::Dropped
            }
        }
    }
    .instrument(span)
    .await
}

/// Device handler that publishes proxy messages to the broker
pub struct DeviceToBroker<B: BrokerLink> {
    broker: Arc<B>,
}

impl<B: BrokerLink> DeviceToBroker<B> {
    pub fn new(broker: Arc<B>) -> Self {
        Self { broker }
    }
}

#[async_trait]
impl<B: BrokerLink + 'static> DeviceEventHandler for DeviceToBroker<B> {
    async fn handle(&self, event: DeviceEvent) {
        forward_device_to_broker(self.broker.as_ref(), &event).await;
    }
}

/// Broker handler for one channel binding, sending to the device
pub struct BrokerToDevice<D: DeviceLink> {
    device: Arc<D>,
    channel: String,
}

impl<D: DeviceLink> BrokerToDevice<D> {
    pub fn new(device: Arc<D>, channel: impl Into<String>) -> Self {
        Self {
            device,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl<D: DeviceLink + 'static> BrokerMessageHandler for BrokerToDevice<D> {
    async fn handle(&self, message: ProxyMessage) {
        let message = message.with_channel(self.channel.clone());
        forward_broker_to_device(self.device.as_ref(), &message).await;
    }
}
