//! Transport layer for the sentinel's bus connection
//!
//! The sentinel talks to the broker through the [`Transport`] trait so that the MQTT
//! client can be swapped for an in-memory fake in tests. A [`Subscriber`] wraps one
//! transport together with its topic filter, and a [`SubscriberFactory`] builds fresh
//! transports whenever the connection supervisor replaces a dead one.

use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub mod mqtt;

/// A message observed on the bus
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Where transports deliver inbound messages
pub type MessageSink = mpsc::Sender<InboundMessage>;

/// Transport trait for the sentinel's broker connection
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Connect to the broker; returns once the connection is acknowledged
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Disconnect from the broker
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Subscribe to a topic filter; matching messages go to the transport's sink
    async fn subscribe(&mut self, filter: &str) -> Result<(), Self::Error>;

    /// Publish a payload to a topic
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;
}

/// Builds a new, unconnected transport delivering into `sink`
pub trait SubscriberFactory: Send + Sync {
    type Transport: Transport + 'static;

    fn create(&self, sink: MessageSink) -> Self::Transport;
}

/// One transport bound to one topic filter
pub struct Subscriber<T: Transport> {
    transport: T,
    topic_filter: String,
}

impl<T: Transport> Subscriber<T> {
    pub fn new(transport: T, topic_filter: impl Into<String>) -> Self {
        Self {
            transport,
            topic_filter: topic_filter.into(),
        }
    }

    pub fn topic_filter(&self) -> &str {
        &self.topic_filter
    }

    /// Connect, then subscribe to the filter
    ///
    /// Failures are logged rather than returned; callers read the outcome from
    /// [`Subscriber::is_connected`].
    pub async fn start(&mut self) -> bool {
        if let Err(e) = self.transport.connect().await {
            warn!(filter = %self.topic_filter, error = %e, "MQTT connect failed");
            return false;
        }

        if let Err(e) = self.transport.subscribe(&self.topic_filter).await {
            error!(filter = %self.topic_filter, error = %e, "MQTT subscribe failed");
            return false;
        }

        info!(filter = %self.topic_filter, "Subscriber started");
        self.transport.is_connected()
    }

    /// Disconnect; errors are logged
    pub async fn stop(&mut self) {
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "MQTT disconnect failed");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Publish a non-retained payload
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), T::Error> {
        self.transport.publish(topic, payload, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;

    #[tokio::test]
    async fn test_start_connects_and_subscribes() {
        let (tx, _rx) = mpsc::channel(4);
        let transport = MockTransport::new(tx);
        let handle = transport.handle();
        let mut subscriber = Subscriber::new(transport, "#");

        assert!(subscriber.start().await);
        assert!(subscriber.is_connected());
        assert_eq!(handle.subscriptions(), vec!["#".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_connect_leaves_subscriber_disconnected() {
        let (tx, _rx) = mpsc::channel(4);
        let transport = MockTransport::new(tx).with_connect_outcomes(vec![false]);
        let handle = transport.handle();
        let mut subscriber = Subscriber::new(transport, "#");

        assert!(!subscriber.start().await);
        assert!(!subscriber.is_connected());
        assert!(handle.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_publish_and_stop() {
        let (tx, _rx) = mpsc::channel(4);
        let transport = MockTransport::new(tx);
        let handle = transport.handle();
        let mut subscriber = Subscriber::new(transport, "#");
        subscriber.start().await;

        subscriber.publish("base/leaf", b"{}".to_vec()).await.unwrap();
        subscriber.stop().await;

        assert_eq!(handle.published_topics(), vec!["base/leaf".to_string()]);
        assert!(!subscriber.is_connected());
    }
}
