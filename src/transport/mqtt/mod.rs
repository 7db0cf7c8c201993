//! MQTT transport built on rumqttc
//!
//! The client is split the same way as the rest of the transport layer: pure
//! functions in [`connection`] and [`message_handler`], network I/O in [`client`].
//!
//! ```rust,no_run
//! use broker_sentinel::config::SentinelConfig;
//! use broker_sentinel::transport::mqtt::MqttClient;
//!
//! # tokio_test::block_on(async {
//! let config = SentinelConfig::default();
//! let (sink, _messages) = tokio::sync::mpsc::channel(256);
//!
//! let mut client = MqttClient::new(&config.mqtt_broker.connection, sink);
//! client.connect().await?;
//! client.subscribe("#").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::{MqttClient, MqttClientFactory};
pub use connection::{ClientState, MqttError};
pub use message_handler::{EventRoute, MessageHandler};
