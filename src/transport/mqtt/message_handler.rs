//! Pure message routing for MQTT events
//!
//! Turns rumqttc events into routing decisions and forwards inbound publishes to the
//! sentinel's message sink.

use crate::transport::{InboundMessage, MessageSink};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::v5::Event;
use tracing::debug;

/// Pure message routing decisions based on MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure function)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(connack) => EventRoute::ConnectionAcknowledged {
                    code: format!("{:?}", connack.code),
                    session_present: connack.session_present,
                },
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                },
                Packet::Disconnect(disconnect) => {
                    EventRoute::Disconnected(format!("{:?}", disconnect.reason_code))
                }
                Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                    packet_id: suback.pkid,
                    return_codes: format!("{:?}", suback.return_codes),
                },
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Whether a publish on `topic` reaches the sink (pure function)
    ///
    /// Empty topics cannot be recorded; everything else is forwarded, retained
    /// messages included, since they are the last known value of a topic.
    pub fn should_forward(topic: &str) -> bool {
        !topic.is_empty()
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connection
    ConnectionAcknowledged { code: String, session_present: bool },
    /// Message received on a subscribed filter
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Broker sent DISCONNECT
    Disconnected(String),
    /// Subscription confirmed with return codes
    SubscriptionConfirmed { packet_id: u16, return_codes: String },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Forwards inbound publishes to the sentinel (impure I/O)
#[derive(Clone)]
pub struct MessageForwarder {
    sink: MessageSink,
}

impl MessageForwarder {
    pub fn new(sink: MessageSink) -> Self {
        Self { sink }
    }

    /// Push one message into the sink, failing only when the receiver is gone
    pub async fn forward(&self, topic: String, payload: Vec<u8>) -> Result<(), String> {
        if !MessageHandler::should_forward(&topic) {
            debug!("Dropping publish with empty topic");
            return Ok(());
        }

        self.sink
            .send(InboundMessage { topic, payload })
            .await
            .map_err(|e| format!("Message sink closed: {e}"))
    }
}
