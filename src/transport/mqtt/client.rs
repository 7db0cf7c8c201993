//! Impure I/O operations for the MQTT client
//!
//! Owns the rumqttc client and drives its event loop on a background task. The client
//! never reconnects on its own: once the event loop fails it is marked disconnected and
//! the loop ends, leaving recovery to the connection supervisor.

use super::connection::{configure_mqtt_options, ClientState, MqttError};
use super::message_handler::{EventRoute, MessageForwarder, MessageHandler};
use crate::config::ConnectionSection;
use crate::transport::{MessageSink, SubscriberFactory, Transport};
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 64;

/// Time the event loop gets to exit after DISCONNECT
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// MQTT transport backed by rumqttc
pub struct MqttClient {
    client: AsyncClient,
    /// Taken by `connect`; the mutex only makes the client `Sync`
    event_loop: Mutex<Option<EventLoop>>,
    connect_timeout: Duration,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ClientState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    subscribed_filters: Arc<Mutex<Vec<String>>>,
    forwarder: MessageForwarder,
}

impl MqttClient {
    /// Build a client for `connection`; nothing is sent until `connect`
    pub fn new(connection: &ConnectionSection, sink: MessageSink) -> Self {
        let mqtt_options = configure_mqtt_options(connection);
        info!(
            host = %connection.host_addr,
            port = connection.host_port,
            client_id = %mqtt_options.client_id(),
            "Creating MQTT client"
        );

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);

        Self {
            client,
            event_loop: Mutex::new(Some(event_loop)),
            connect_timeout: Duration::from_secs(connection.connect_timeout_secs),
            event_loop_handle: None,
            state_rx: None,
            shutdown_tx: None,
            subscribed_filters: Arc::new(Mutex::new(Vec::new())),
            forwarder: MessageForwarder::new(sink),
        }
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ClientState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                match &*state_rx.borrow_and_update() {
                    ClientState::Connected => return Ok(()),
                    ClientState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionFailed(reason.clone()));
                    }
                    ClientState::Connecting => {}
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

    /// Start the event loop and wait for the broker to acknowledge the connection
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let mut event_loop = self
            .event_loop
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| {
                MqttError::ConnectionFailed("Event loop already started".to_string())
            })?;

        let (state_tx, state_rx) = watch::channel(ClientState::Connecting);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.state_rx = Some(state_rx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let client = self.client.clone();
        let filters = self.subscribed_filters.clone();
        let forwarder = self.forwarder.clone();

        let handle = tokio::spawn(async move {
            info!("Starting MQTT event loop");
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Shutdown signal received, stopping MQTT event loop");
                            break;
                        }
                    }
                    event_result = event_loop.poll() => {
                        match event_result {
                            Ok(event) => {
                                let route = MessageHandler::route_mqtt_event(&event);
                                if !Self::process_event_route(route, &state_tx, &client, &filters, &forwarder).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                if !*shutdown_rx.borrow() {
                                    error!("MQTT event loop error: {}", e);
                                }
                                let _ = state_tx.send(ClientState::Disconnected(e.to_string()));
                                break;
                            }
                        }
                    }
                }
            }
            if state_tx.borrow().can_publish() {
                let _ = state_tx.send(ClientState::Disconnected("Event loop stopped".to_string()));
            }
            info!("MQTT event loop stopped");
        });

        self.event_loop_handle = Some(handle);

        Self::wait_for_connection_confirmation(state_rx, self.connect_timeout).await
    }

    /// Process routed MQTT event; returns false when the loop must end
    async fn process_event_route(
        route: EventRoute,
        state_tx: &watch::Sender<ClientState>,
        client: &AsyncClient,
        filters: &Arc<Mutex<Vec<String>>>,
        forwarder: &MessageForwarder,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged {
                code,
                session_present,
            } => {
                info!(result = %code, session_present, "Connected to MQTT broker");
                let _ = state_tx.send(ClientState::Connected);
                Self::resubscribe_to_filters(client, filters).await;
                true
            }
            EventRoute::MessageReceived { topic, payload } => {
                debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
                if let Err(e) = forwarder.forward(topic, payload).await {
                    warn!("Failed to forward message: {}", e);
                }
                true
            }
            EventRoute::Disconnected(reason) => {
                warn!(reason = %reason, "MQTT broker closed the connection");
                let _ = state_tx.send(ClientState::Disconnected(reason));
                false
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                return_codes,
            } => {
                debug!(target: "mqtt_transport", packet_id, "Subscription confirmed: {}", return_codes);
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    /// Re-issue every tracked subscription after a ConnAck
    async fn resubscribe_to_filters(
        client: &AsyncClient,
        filters: &Arc<Mutex<Vec<String>>>,
    ) {
        let filters = filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for filter in filters {
            if let Err(e) = client.subscribe(filter.as_str(), QoS::AtMostOnce).await {
                error!("Failed to re-subscribe to {}: {}", filter, e);
            } else {
                debug!(target: "mqtt_transport", "Re-subscribed to: {}", filter);
            }
        }
    }

    /// Current connection state, `None` before `connect`
    pub fn connection_state(&self) -> Option<ClientState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    fn check_connection_state(&self) -> Result<(), MqttError> {
        let state = self
            .connection_state()
            .unwrap_or_else(|| ClientState::Disconnected("Never connected".to_string()));

        if !state.can_publish() {
            return Err(MqttError::NotConnected { state });
        }
        Ok(())
    }

    /// Subscribe to `filter` and remember it for re-subscription
    pub async fn subscribe(&mut self, filter: &str) -> Result<(), MqttError> {
        self.check_connection_state()?;

        self.client
            .subscribe(filter, QoS::AtMostOnce)
            .await
            .map_err(|e| MqttError::SubscriptionFailed {
                filter: filter.to_string(),
                source: Box::new(e),
            })?;

        let mut filters = self
            .subscribed_filters
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !filters.iter().any(|f| f == filter) {
            filters.push(filter.to_string());
        }

        info!("Subscribed to: {}", filter);
        Ok(())
    }

    /// Queue one message without waiting for room in the request channel
    ///
    /// A full request channel fails the publish instead of blocking the caller, which
    /// may be the task draining this client's message sink.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), MqttError> {
        self.check_connection_state()?;

        self.client
            .try_publish(topic, QoS::AtMostOnce, retain, payload)
            .map_err(|e| MqttError::PublishFailed {
                topic: topic.to_string(),
                source: Box::new(e),
            })
    }

    /// Stop the event loop, sending DISCONNECT first when connected
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        let was_connected = self
            .connection_state()
            .is_some_and(|state| state.can_publish());

        if was_connected {
            if let Err(e) = self.client.disconnect().await {
                warn!("Failed to send DISCONNECT: {}", e);
            }
        }

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        if let Some(mut handle) = self.event_loop_handle.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!("Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e);
                }
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing abort");
                    handle.abort();
                    self.state_rx = None;
                }
                _ => {}
            }
        }

        info!("MQTT client disconnected");
        Ok(())
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn subscribe(&mut self, filter: &str) -> Result<(), Self::Error> {
        MqttClient::subscribe(self, filter).await
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), Self::Error> {
        MqttClient::publish(self, topic, payload, retain).await
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ClientState::Connected))
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        // Drop cannot await; an explicit disconnect is the graceful path
        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }
    }
}

/// Creates a fresh `MqttClient` for every (re)connection
#[derive(Debug, Clone)]
pub struct MqttClientFactory {
    connection: ConnectionSection,
}

impl MqttClientFactory {
    pub fn new(connection: ConnectionSection) -> Self {
        Self { connection }
    }
}

impl SubscriberFactory for MqttClientFactory {
    type Transport = MqttClient;

    fn create(&self, sink: MessageSink) -> MqttClient {
        MqttClient::new(&self.connection, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn connection() -> ConnectionSection {
        ConnectionSection {
            host_addr: "localhost".to_string(),
            host_port: 1883,
            connect_timeout_secs: 1,
            keep_alive_secs: 60,
            client_id_prefix: "sentinel-test".to_string(),
            username_env: None,
            password_env: None,
        }
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let (state_tx, state_rx) = watch::channel(ClientState::Connecting);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ClientState::Connected);
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let (_state_tx, state_rx) = watch::channel(ClientState::Connecting);

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(50))
                .await;
        assert!(matches!(result, Err(MqttError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_disconnected() {
        let (_state_tx, state_rx) =
            watch::channel(ClientState::Disconnected("refused".to_string()));

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;
        match result {
            Err(MqttError::ConnectionFailed(reason)) => assert_eq!(reason, "refused"),
            other => panic!("Expected connection failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_new_client_is_not_connected() {
        let (tx, _rx) = mpsc::channel(1);
        let client = MqttClient::new(&connection(), tx);

        assert!(client.connection_state().is_none());
        assert!(!Transport::is_connected(&client));
    }

    #[tokio::test]
    async fn test_publish_before_connect_is_rejected() {
        let (tx, _rx) = mpsc::channel(1);
        let client = MqttClient::new(&connection(), tx);

        let result = client.publish("a/b", b"x".to_vec(), false).await;
        assert!(matches!(result, Err(MqttError::NotConnected { .. })));
    }

    #[test]
    fn test_client_and_factory_satisfy_transport_bounds() {
        fn assert_transport<T: Transport + Send + Sync + 'static>() {}
        fn assert_factory<F: SubscriberFactory>() {}

        assert_transport::<MqttClient>();
        assert_factory::<MqttClientFactory>();
    }

    #[tokio::test]
    async fn test_disconnect_without_connect_is_ok() {
        let (tx, _rx) = mpsc::channel(1);
        let mut client = MqttClient::new(&connection(), tx);
        assert!(client.disconnect().await.is_ok());
    }
}
