//! Impure I/O for the MQTT broker link
//!
//! Owns the rumqttc client and a supervisor task that polls the event loop,
//! tracks connection state, reconnects after a lost connection, resolves
//! SubAcks and delivers inbound publishes to subscription handlers.

use super::connection::{
    configure_mqtt_options, generate_client_id, ConnectionState, MqttError, ReconnectConfig,
};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler, Route, SubscriptionTracker};
use crate::config::BrokerSection;
use crate::error::redact_url;
use crate::protocol::{valid_filter, ProxyMessage};
use crate::transport::{BrokerLink, BrokerMessageHandler};
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Capacity of the request channel between client handle and event loop
const REQUEST_CHANNEL_CAPACITY: usize = 64;

type SharedTracker = Arc<Mutex<SubscriptionTracker>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State of one connected broker session
struct Session {
    client: AsyncClient,
    subscriptions: SharedTracker,
    ack_timeout: Duration,
    state_rx: watch::Receiver<ConnectionState>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

/// What a request needs from the session, cloned out of the lock
struct Ready {
    client: AsyncClient,
    subscriptions: SharedTracker,
    ack_timeout: Duration,
}

/// Broker link over MQTT v5
pub struct MqttBrokerLink {
    routes: Arc<RwLock<Vec<Route>>>,
    reconnect_config: ReconnectConfig,
    session: Mutex<Option<Session>>,
}

impl MqttBrokerLink {
    pub fn new() -> Self {
        Self::with_reconnect_config(ReconnectConfig::default())
    }

    pub fn with_reconnect_config(reconnect_config: ReconnectConfig) -> Self {
        Self {
            routes: Arc::new(RwLock::new(Vec::new())),
            reconnect_config,
            session: Mutex::new(None),
        }
    }

    fn session(&self) -> MutexGuard<'_, Option<Session>> {
        lock(&self.session)
    }

    /// Current connection state; `None` before the first connect
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.session()
            .as_ref()
            .map(|session| session.state_rx.borrow().clone())
    }

    /// Filters currently routed to a handler
    pub async fn subscribed_filters(&self) -> Vec<String> {
        self.routes
            .read()
            .await
            .iter()
            .map(|route| route.filter.clone())
            .collect()
    }

    /// Session handles, only while the state allows the request
    fn ready(&self, allowed: fn(&ConnectionState) -> bool) -> Result<Ready, MqttError> {
        let guard = self.session();
        let session = guard.as_ref().ok_or_else(|| MqttError::NotConnected {
            state: ConnectionState::Disconnected("never connected".to_string()),
        })?;

        let current_state = session.state_rx.borrow().clone();
        if !allowed(&current_state) {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }

        Ok(Ready {
            client: session.client.clone(),
            subscriptions: session.subscriptions.clone(),
            ack_timeout: session.ack_timeout,
        })
    }

    /// Wait for the SubAck of a queued subscribe
    async fn wait_for_suback(
        ack_rx: oneshot::Receiver<Result<(), String>>,
        timeout: Duration,
    ) -> Result<(), String> {
        match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err("broker link closed before SubAck".to_string()),
            Err(_) => Err(format!("no SubAck within {}s", timeout.as_secs())),
        }
    }

    async fn remove_route(&self, filter: &str, handler: &Arc<dyn BrokerMessageHandler>) {
        self.routes
            .write()
            .await
            .retain(|route| !(route.filter == filter && Arc::ptr_eq(&route.handler, handler)));
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                match *state_rx.borrow_and_update() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(ref reason)
                    | ConnectionState::PermanentlyDisconnected(ref reason) => {
                        return Err(MqttError::ConnectionFailed(reason.clone()));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailed(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailed(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Apply a connection event to the shared state and log the transition
    fn transition(state_tx: &watch::Sender<ConnectionState>, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(event);
        let previous = state_tx.send_replace(next.clone());
        if previous != next {
            HealthMonitor::log_state_transition(&previous, &next);
        }
    }

    /// Supervisor task body: poll the event loop until shutdown or a fatal error
    async fn run_supervisor(
        mut event_loop: EventLoop,
        client: AsyncClient,
        state_tx: watch::Sender<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
        routes: Arc<RwLock<Vec<Route>>>,
        subscriptions: SharedTracker,
        reconnect_config: ReconnectConfig,
    ) {
        let mut ever_connected = false;
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Shutdown signal received, stopping broker supervisor");
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    let keep_running = match event_result {
                        Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                            EventRoute::ConnectionAcknowledged => {
                                Self::transition(&state_tx, ConnectionEvent::ConnAckReceived);
                                if ever_connected {
                                    Self::resubscribe_to_topics(&client, &routes, &subscriptions).await;
                                }
                                ever_connected = true;
                                reconnect_attempts = 0;
                                true
                            }
                            EventRoute::ConnectionRefused(reason) => {
                                Self::transition(&state_tx, ConnectionEvent::ConnAckRefused(reason));
                                false
                            }
                            EventRoute::MessageReceived { topic, payload, retain } => {
                                Self::deliver(&routes, topic, payload, retain).await;
                                true
                            }
                            EventRoute::Disconnected => {
                                Self::transition(&state_tx, ConnectionEvent::DisconnectedByBroker);
                                lock(&subscriptions).connection_lost("broker disconnected");
                                Self::handle_connection_loss(
                                    "Broker disconnected".to_string(),
                                    &state_tx,
                                    &mut reconnect_attempts,
                                    &reconnect_config,
                                    &shutdown_rx,
                                    ever_connected,
                                )
                                .await
                            }
                            EventRoute::SubscriptionSent(packet_id) => {
                                lock(&subscriptions).sent(packet_id);
                                true
                            }
                            EventRoute::SubscriptionConfirmed { packet_id } => {
                                if lock(&subscriptions).acknowledged(packet_id, Ok(())) {
                                    debug!(packet_id, "Subscription acknowledged");
                                } else {
                                    debug!(packet_id, "SubAck for an untracked subscribe");
                                }
                                true
                            }
                            EventRoute::SubscriptionRefused { packet_id, reason } => {
                                error!(packet_id, reason = %reason, "Broker refused subscription");
                                lock(&subscriptions).acknowledged(packet_id, Err(reason));
                                true
                            }
                            EventRoute::InfrastructureEvent(event_str) => {
                                trace!("MQTT event: {}", event_str);
                                true
                            }
                            EventRoute::OutgoingEvent => true,
                        },
                        Err(e) => {
                            let reason = e.to_string();
                            Self::transition(&state_tx, ConnectionEvent::NetworkError(reason.clone()));
                            lock(&subscriptions).connection_lost(&reason);
                            Self::handle_connection_loss(
                                reason,
                                &state_tx,
                                &mut reconnect_attempts,
                                &reconnect_config,
                                &shutdown_rx,
                                ever_connected,
                            )
                            .await
                        }
                    };

                    if !keep_running {
                        break;
                    }
                }
            }
        }

        debug!("Broker supervisor stopped");
    }

    /// Decide what happens after the connection dropped
    /// Returns true to keep polling (rumqttc reconnects on the next poll)
    async fn handle_connection_loss(
        reason: String,
        state_tx: &watch::Sender<ConnectionState>,
        reconnect_attempts: &mut u32,
        reconnect_config: &ReconnectConfig,
        shutdown_rx: &watch::Receiver<bool>,
        ever_connected: bool,
    ) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            *reconnect_attempts,
            reconnect_config,
            *shutdown_rx.borrow(),
            ever_connected,
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                *reconnect_attempts = attempt;
                Self::transition(state_tx, ConnectionEvent::ReconnectionStarted(attempt));
                debug!(attempt, delay_ms, "Waiting before broker reconnection");
                Self::interruptible_sleep(shutdown_rx.clone(), delay_ms).await
            }
            ReconnectionDecision::AbortShutdownRequested => false,
            ReconnectionDecision::AbortNeverConnected => {
                Self::transition(state_tx, ConnectionEvent::PermanentFailure(reason));
                false
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!(
                    "Max reconnection attempts ({}) exceeded",
                    reconnect_config.max_attempts.unwrap_or_default()
                );
                Self::transition(state_tx, ConnectionEvent::PermanentFailure(reason));
                false
            }
        }
    }

    /// Deliver an inbound publish to every matching subscription handler
    async fn deliver(routes: &Arc<RwLock<Vec<Route>>>, topic: String, payload: Bytes, retain: bool) {
        let handlers = {
            let guard = routes.read().await;
            MessageHandler::matching_handlers(&guard, &topic)
        };

        if handlers.is_empty() {
            debug!(topic = %topic, "No subscription handler for inbound message");
            return;
        }

        let message = MessageHandler::to_proxy_message(topic, payload, retain);
        for handler in handlers {
            handler.handle(message.clone()).await;
        }
    }

    /// Re-subscribe every routed filter after a reconnection
    ///
    /// Nobody waits on these SubAcks; a refusal is logged by the supervisor.
    async fn resubscribe_to_topics(
        client: &AsyncClient,
        routes: &Arc<RwLock<Vec<Route>>>,
        subscriptions: &SharedTracker,
    ) {
        let filters: Vec<String> = routes
            .read()
            .await
            .iter()
            .map(|route| route.filter.clone())
            .collect();

        let mut tracker = lock(subscriptions);
        for filter in filters {
            tracker.queue(None);
            if let Err(e) = client.try_subscribe(filter.clone(), QoS::AtMostOnce) {
                tracker.withdraw_last();
                error!(filter = %filter, "Failed to re-subscribe: {}", e);
            } else {
                debug!(filter = %filter, "Re-subscribed");
            }
        }
    }
}

impl Default for MqttBrokerLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerLink for MqttBrokerLink {
    type Error = MqttError;

    async fn connect(&self, params: &BrokerSection) -> Result<(), MqttError> {
        if let Some(state) = self.connection_state() {
            if !matches!(state, ConnectionState::PermanentlyDisconnected(_)) {
                return Err(MqttError::AlreadyConnected);
            }
        }

        let client_id = generate_client_id(&params.client_id_prefix);
        let mqtt_options = configure_mqtt_options(params, &client_id)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        info!(
            broker = %redact_url(&params.url),
            client_id = %client_id,
            "Connecting to broker"
        );

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let subscriptions = SharedTracker::default();

        let handle = tokio::spawn(Self::run_supervisor(
            event_loop,
            client.clone(),
            state_tx.clone(),
            shutdown_rx,
            self.routes.clone(),
            subscriptions.clone(),
            self.reconnect_config.clone(),
        ));

        let timeout = Duration::from_secs(params.connect_timeout_secs.max(1));
        if let Err(e) = Self::wait_for_connection_confirmation(state_rx.clone(), timeout).await {
            let _ = shutdown_tx.send(true);
            handle.abort();
            return Err(e);
        }

        *self.session() = Some(Session {
            client,
            subscriptions,
            ack_timeout: timeout,
            state_rx,
            state_tx,
            shutdown_tx,
            handle: Some(handle),
        });
        Ok(())
    }

    async fn subscribe(
        &self,
        topic_filter: &str,
        handler: Arc<dyn BrokerMessageHandler>,
    ) -> Result<(), MqttError> {
        valid_filter(topic_filter)?;
        let ready = self.ready(HealthMonitor::can_subscribe)?;

        // Routed before the request goes out so retained messages sent right
        // after the SubAck find their handler
        self.routes.write().await.push(Route {
            filter: topic_filter.to_string(),
            handler: handler.clone(),
        });

        let (ack_tx, ack_rx) = oneshot::channel();
        let queued = {
            let mut tracker = lock(&ready.subscriptions);
            tracker.queue(Some(ack_tx));
            let queued = ready.client.try_subscribe(topic_filter, QoS::AtMostOnce);
            if queued.is_err() {
                tracker.withdraw_last();
            }
            queued
        };

        let outcome = match queued {
            Ok(()) => Self::wait_for_suback(ack_rx, ready.ack_timeout)
                .await
                .map_err(Box::<dyn std::error::Error + Send + Sync>::from),
            Err(e) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
        };

        if let Err(source) = outcome {
            self.remove_route(topic_filter, &handler).await;
            return Err(MqttError::SubscriptionFailed {
                topic: topic_filter.to_string(),
                source,
            });
        }

        debug!(filter = %topic_filter, "Subscribed");
        Ok(())
    }

    async fn publish(&self, message: &ProxyMessage) -> Result<(), MqttError> {
        let ready = self.ready(HealthMonitor::can_publish)?;

        ready
            .client
            .publish(
                message.topic.clone(),
                QoS::AtMostOnce,
                message.retained,
                message.payload.clone(),
            )
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MqttError> {
        let session = self.session().take();
        let Some(mut session) = session else {
            return Ok(());
        };

        let _ = session.shutdown_tx.send(true);

        if let Err(e) = session.client.disconnect().await {
            // Event loop already gone after a fatal error
            debug!("Broker disconnect request not sent: {}", e);
        }

        Self::transition(&session.state_tx, ConnectionEvent::ClientDisconnected);

        if let Some(handle) = session.handle.take() {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => debug!("Broker supervisor shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Broker supervisor ended with error: {}", e);
                }
                Err(_) => warn!("Broker supervisor didn't shut down in time, aborting"),
                _ => {}
            }
        }

        info!("Disconnected from broker");
        Ok(())
    }
}

impl Drop for MqttBrokerLink {
    fn drop(&mut self) {
        let session = match self.session.get_mut() {
            Ok(session) => session,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(session) = session.as_mut() {
            let _ = session.shutdown_tx.send(true);
            if let Some(handle) = session.handle.take() {
                handle.abort();
            }
        }
    }
}
