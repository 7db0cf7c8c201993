//! MQTT client tests against a real broker
//!
//! The refused-connection test needs nothing listening on port 9999. The others need a
//! broker on localhost:1883 and are ignored by default:
//!
//! ```bash
//! docker run -d -p 1883:1883 eclipse-mosquitto:2 mosquitto -c /mosquitto-no-auth.conf
//! cargo test --test test_mqtt_broker_integration -- --ignored
//! ```

mod test_helpers;

use broker_sentinel::config::ConnectionSection;
use broker_sentinel::sentinel::{ConnectionState, Sentinel};
use broker_sentinel::testing::ScriptedProbe;
use broker_sentinel::transport::mqtt::{MqttClient, MqttClientFactory};
use broker_sentinel::transport::{InboundMessage, Transport};
use std::sync::Arc;
use std::time::{Duration, Instant};
use test_helpers::{test_config, wait_until};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn connection(port: u16) -> ConnectionSection {
    ConnectionSection {
        host_addr: "localhost".to_string(),
        host_port: port,
        connect_timeout_secs: 3,
        keep_alive_secs: 30,
        client_id_prefix: "sentinel-test".to_string(),
        username_env: None,
        password_env: None,
    }
}

#[tokio::test]
async fn test_connect_fails_when_broker_unavailable() {
    let (sink, _rx) = mpsc::channel(8);
    let mut client = MqttClient::new(&connection(9999), sink);

    let start = Instant::now();
    let result = timeout(Duration::from_secs(10), client.connect())
        .await
        .expect("connect must give up within its own timeout");

    assert!(result.is_err(), "connect should fail with nothing listening");
    assert!(start.elapsed() <= Duration::from_secs(4));
    assert!(!client.is_connected());

    // No internal reconnect: the client stays down
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!client.is_connected());
}

#[tokio::test]
#[ignore = "requires an MQTT broker on localhost:1883"]
async fn test_publish_reaches_wildcard_subscriber() {
    let (sink, mut rx) = mpsc::channel::<InboundMessage>(16);
    let mut subscriber = MqttClient::new(&connection(1883), sink);
    subscriber.connect().await.unwrap();
    Transport::subscribe(&mut subscriber, "sentinel-it/#")
        .await
        .unwrap();

    let (other_sink, _other_rx) = mpsc::channel(16);
    let mut publisher = MqttClient::new(&connection(1883), other_sink);
    publisher.connect().await.unwrap();

    // Give the SUBSCRIBE time to be acknowledged
    tokio::time::sleep(Duration::from_millis(200)).await;
    Transport::publish(&publisher, "sentinel-it/probe", b"hello".to_vec(), false)
        .await
        .unwrap();

    let message = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("message not delivered in time")
        .expect("sink closed");
    assert_eq!(message.topic, "sentinel-it/probe");
    assert_eq!(message.payload, b"hello");

    publisher.disconnect().await.unwrap();
    subscriber.disconnect().await.unwrap();
    assert!(!subscriber.is_connected());
}

#[tokio::test]
#[ignore = "requires an MQTT broker on localhost:1883"]
async fn test_sentinel_records_topics_from_real_broker() {
    let mut config = test_config(300);
    config.mqtt_broker.connection = connection(1883);
    config.publish.base_topic = "sentinel-it/reports".to_string();

    let mut sentinel = Sentinel::new(
        &config,
        MqttClientFactory::new(config.mqtt_broker.connection.clone()),
        Arc::new(ScriptedProbe::always(true)),
    )
    .unwrap()
    .with_tick_period(Duration::from_secs(3600));
    sentinel.start().await.unwrap();
    assert_eq!(sentinel.connection_state().await, ConnectionState::Connected);

    let (sink, _rx) = mpsc::channel(16);
    let mut publisher = MqttClient::new(&connection(1883), sink);
    publisher.connect().await.unwrap();
    Transport::publish(&publisher, "sentinel-it/device/1", b"on".to_vec(), false)
        .await
        .unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            sentinel.registry().get("sentinel-it/device/1").is_some()
        })
        .await
    );
    // The sentinel sees its own reports on `#` but never records them
    assert!(sentinel
        .registry()
        .topics()
        .iter()
        .all(|topic| !topic.starts_with("sentinel-it/reports/")));

    publisher.disconnect().await.unwrap();
    sentinel.stop().await;
}
