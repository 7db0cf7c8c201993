//! Pure connection state management for the MQTT client
//!
//! Connection states, transport errors and the mapping from configuration to
//! `MqttOptions`. Nothing here touches the network.

use crate::config::ConnectionSection;
use rumqttc::v5::MqttOptions;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Smallest keep-alive handed to rumqttc
pub const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Connection state for the MQTT client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientState {
    /// Event loop started, waiting for ConnAck
    Connecting,
    /// ConnAck received
    Connected,
    /// Connection lost or closed, with reason
    Disconnected(String),
}

impl ClientState {
    /// Publishing and subscribing are only allowed while connected (pure function)
    pub fn can_publish(&self) -> bool {
        matches!(self, ClientState::Connected)
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Publishing to {topic} failed")]
    PublishFailed {
        topic: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Subscribing to {filter} failed")]
    SubscriptionFailed {
        filter: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ClientState },
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Unique client id: `<prefix>-<uuid>` (pure function apart from the uuid)
pub fn build_client_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

/// Keep-alive clamped to what rumqttc accepts (pure function)
pub fn keep_alive_duration(keep_alive_secs: u64) -> Duration {
    Duration::from_secs(keep_alive_secs.max(MIN_KEEP_ALIVE_SECS))
}

/// Build `MqttOptions` from the connection section
///
/// Credentials are read from the environment variables the section names; a missing
/// username variable means anonymous login.
pub fn configure_mqtt_options(connection: &ConnectionSection) -> MqttOptions {
    let client_id = build_client_id(&connection.client_id_prefix);
    let mut mqtt_options =
        MqttOptions::new(client_id, connection.host_addr.clone(), connection.host_port);

    mqtt_options.set_keep_alive(keep_alive_duration(connection.keep_alive_secs));
    mqtt_options.set_clean_start(true);

    if let Some(username_env) = &connection.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = connection
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            mqtt_options.set_credentials(username, password);
        }
    }

    mqtt_options
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> ConnectionSection {
        ConnectionSection {
            host_addr: "broker.local".to_string(),
            host_port: 1884,
            connect_timeout_secs: 10,
            keep_alive_secs: 30,
            client_id_prefix: "sentinel-test".to_string(),
            username_env: None,
            password_env: None,
        }
    }

    #[test]
    fn test_client_ids_are_unique_and_prefixed() {
        let a = build_client_id("sentinel");
        let b = build_client_id("sentinel");
        assert!(a.starts_with("sentinel-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_keep_alive_is_clamped() {
        assert_eq!(keep_alive_duration(0), Duration::from_secs(MIN_KEEP_ALIVE_SECS));
        assert_eq!(keep_alive_duration(60), Duration::from_secs(60));
    }

    #[test]
    fn test_configure_mqtt_options() {
        let options = configure_mqtt_options(&connection());
        assert_eq!(
            options.broker_address(),
            ("broker.local".to_string(), 1884)
        );
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(options.client_id().starts_with("sentinel-test-"));
    }

    #[test]
    fn test_only_connected_can_publish() {
        assert!(ClientState::Connected.can_publish());
        assert!(!ClientState::Connecting.can_publish());
        assert!(!ClientState::Disconnected("gone".to_string()).can_publish());
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::PublishFailed {
                topic: "a/b".to_string(),
                source: "test".to_string().into(),
            },
            MqttError::SubscriptionFailed {
                filter: "#".to_string(),
                source: "test".to_string().into(),
            },
            MqttError::NotConnected {
                state: ClientState::Disconnected("test".to_string()),
            },
            MqttError::ConnectionFailed("test".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
