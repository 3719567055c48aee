//! Pure message routing for MQTT events
//!
//! This module turns rumqttc events into routing decisions, picks the
//! subscription handlers an inbound publish is delivered to and pairs SubAcks
//! with the subscribe calls waiting on them.

use crate::protocol::{topic_matches, ProxyMessage};
use crate::transport::BrokerMessageHandler;
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, SubscribeReasonCode};
use rumqttc::v5::Event;
use rumqttc::Outgoing;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

/// A subscribed filter and the handler its messages go to
#[derive(Clone)]
pub struct Route {
    pub filter: String,
    pub handler: Arc<dyn BrokerMessageHandler>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route").field("filter", &self.filter).finish()
    }
}

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) if connack.code == ConnectReturnCode::Success => {
                    EventRoute::ConnectionAcknowledged
                }
                Packet::ConnAck(connack) => {
                    EventRoute::ConnectionRefused(format!("{:?}", connack.code))
                }
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.clone(),
                    retain: publish.retain,
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                Packet::SubAck(suback) => match Self::suback_refusal(&suback.return_codes) {
                    None => EventRoute::SubscriptionConfirmed {
                        packet_id: suback.pkid,
                    },
                    Some(reason) => EventRoute::SubscriptionRefused {
                        packet_id: suback.pkid,
                        reason,
                    },
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Subscribe(packet_id)) => {
                EventRoute::SubscriptionSent(*packet_id)
            }
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// First failure reason in a SubAck, `None` when every filter was granted (pure function)
    pub fn suback_refusal(return_codes: &[SubscribeReasonCode]) -> Option<String> {
        if return_codes.is_empty() {
            return Some("empty SubAck".to_string());
        }
        return_codes
            .iter()
            .find(|code| !matches!(code, SubscribeReasonCode::Success(_)))
            .map(|code| format!("{code:?}"))
    }

    /// Handlers whose filter matches the topic, in subscription order (pure function)
    pub fn matching_handlers(routes: &[Route], topic: &str) -> Vec<Arc<dyn BrokerMessageHandler>> {
        routes
            .iter()
            .filter(|route| topic_matches(&route.filter, topic))
            .map(|route| route.handler.clone())
            .collect()
    }

    /// Build the message delivered to subscription handlers (pure function)
    pub fn to_proxy_message(topic: String, payload: Bytes, retain: bool) -> ProxyMessage {
        ProxyMessage::new(topic, payload, retain)
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Broker answered the connect with a failure code
    ConnectionRefused(String),
    /// Message received on subscribed topic
    MessageReceived {
        topic: String,
        payload: Bytes,
        retain: bool,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// Subscribe packet written to the broker
    SubscriptionSent(u16),
    /// Broker granted every filter of the subscribe
    SubscriptionConfirmed { packet_id: u16 },
    /// Broker answered the subscribe with a failure reason code
    SubscriptionRefused { packet_id: u16, reason: String },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Outcome delivered to a subscribe call waiting on its SubAck
pub type SubscribeOutcome = Result<(), String>;

/// Pairs SubAcks with the subscribe calls waiting on them
///
/// The event loop writes subscribes in request order, so waiters are queued
/// in that order, bound to a packet id when the subscribe goes out and
/// resolved by the SubAck carrying that id. Re-subscribes after a reconnect
/// queue an entry without a waiter to keep the order aligned.
#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    queued: VecDeque<Option<oneshot::Sender<SubscribeOutcome>>>,
    in_flight: HashMap<u16, Option<oneshot::Sender<SubscribeOutcome>>>,
}

impl SubscriptionTracker {
    /// Queue a subscribe request about to be handed to the event loop
    pub fn queue(&mut self, waiter: Option<oneshot::Sender<SubscribeOutcome>>) {
        self.queued.push_back(waiter);
    }

    /// Drop the most recent queued entry when its request never reached the event loop
    pub fn withdraw_last(&mut self) {
        self.queued.pop_back();
    }

    /// The oldest queued subscribe went out with this packet id
    pub fn sent(&mut self, packet_id: u16) {
        match self.queued.pop_front() {
            Some(waiter) => {
                self.in_flight.insert(packet_id, waiter);
            }
            None => debug!(packet_id, "Subscribe sent without a tracked request"),
        }
    }

    /// Resolve the waiter for a SubAck; false when the packet id is unknown
    pub fn acknowledged(&mut self, packet_id: u16, outcome: SubscribeOutcome) -> bool {
        match self.in_flight.remove(&packet_id) {
            Some(Some(waiter)) => {
                // The caller may have timed out already
                let _ = waiter.send(outcome);
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    /// Fail every subscribe that went out but will never be acknowledged
    ///
    /// Requests still queued stay: the event loop sends them after reconnecting.
    pub fn connection_lost(&mut self, reason: &str) {
        for (_, waiter) in self.in_flight.drain() {
            if let Some(waiter) = waiter {
                let _ = waiter.send(Err(format!("connection lost before SubAck: {reason}")));
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.queued.len() + self.in_flight.len()
    }
}
