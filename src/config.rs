//! Sentinel configuration
//!
//! Read-only settings consumed by the sentinel: broker connection, broker process
//! supervision, topic watchdog rules and the status topics the sentinel publishes.
//! Files are TOML by default; a `.json` extension selects JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Key of the watchdog rule that applies to every topic without an override
pub const DEFAULT_RULE_KEY: &str = "all";

/// Main sentinel configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SentinelConfig {
    pub mqtt_broker: BrokerSection,
    /// `all` plus exact-topic overrides
    pub topic_watchdog: BTreeMap<String, WatchdogRule>,
    pub publish: PublishSection,
}

/// Broker section: where to connect and which process hosts the broker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    pub connection: ConnectionSection,
    pub process: ProcessSection,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionSection {
    /// Broker host name or address
    pub host_addr: String,
    /// Broker TCP port
    pub host_port: u16,
    /// Seconds to wait for ConnAck before a connection attempt counts as failed
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// MQTT keep-alive interval in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Client ID prefix; a random suffix is appended per connection
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Environment variable containing username
    #[serde(default)]
    pub username_env: Option<String>,
    /// Environment variable containing password
    #[serde(default)]
    pub password_env: Option<String>,
}

fn default_connect_timeout() -> u64 {
    60
}

fn default_keep_alive() -> u64 {
    60
}

fn default_client_id_prefix() -> String {
    "mqtt-broker-sentinel".to_string()
}

/// Broker process supervision settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessSection {
    /// Process or service name of the broker (e.g. "mosquitto")
    pub name: String,
    /// Period of the process check, which also drives every report and reconnect cycle
    pub service_wd_period_seconds: u64,
    /// How the process is probed
    #[serde(default)]
    pub probe: ProbeKind,
}

/// Process probe selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// systemd on Linux, the process table everywhere else
    #[default]
    Auto,
    /// `systemctl is-active <name>`
    Systemd,
    /// OS process table lookup by executable name
    ProcessTable,
}

/// A single watchdog threshold
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WatchdogRule {
    /// A topic silent for longer than this is in violation
    pub max_time_seconds: u64,
}

/// Status topics published by the sentinel, each below `base_topic`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishSection {
    pub base_topic: String,
    pub topic_list: String,
    pub process_stats: String,
    pub watchdog_topics: String,
}

impl PublishSection {
    /// Full topic for the topic list report
    pub fn topic_list_topic(&self) -> String {
        join_topic(&self.base_topic, &self.topic_list)
    }

    /// Full topic for the throughput/process report
    pub fn process_stats_topic(&self) -> String {
        join_topic(&self.base_topic, &self.process_stats)
    }

    /// Full topic for the watchdog violation report
    pub fn watchdog_topics_topic(&self) -> String {
        join_topic(&self.base_topic, &self.watchdog_topics)
    }

    /// Every topic the sentinel publishes to
    pub fn own_topics(&self) -> Vec<String> {
        vec![
            self.process_stats_topic(),
            self.topic_list_topic(),
            self.watchdog_topics_topic(),
        ]
    }
}

/// Join base and leaf with exactly one separator
pub fn join_topic(base: &str, leaf: &str) -> String {
    let base = base.trim_end_matches('/');
    let leaf = leaf.trim_start_matches('/');
    if base.is_empty() {
        leaf.to_string()
    } else {
        format!("{base}/{leaf}")
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Missing default watchdog rule: topic_watchdog.all.max_time_seconds")]
    MissingDefaultRule,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Default for SentinelConfig {
    fn default() -> Self {
        let mut topic_watchdog = BTreeMap::new();
        topic_watchdog.insert(
            DEFAULT_RULE_KEY.to_string(),
            WatchdogRule {
                max_time_seconds: 300,
            },
        );

        Self {
            mqtt_broker: BrokerSection {
                connection: ConnectionSection {
                    host_addr: "localhost".to_string(),
                    host_port: 1883,
                    connect_timeout_secs: default_connect_timeout(),
                    keep_alive_secs: default_keep_alive(),
                    client_id_prefix: default_client_id_prefix(),
                    username_env: None,
                    password_env: None,
                },
                process: ProcessSection {
                    name: "mosquitto".to_string(),
                    service_wd_period_seconds: 60,
                    probe: ProbeKind::Auto,
                },
            },
            topic_watchdog,
            publish: PublishSection {
                base_topic: "sc_mqtt_broker".to_string(),
                topic_list: "topic_list".to_string(),
                process_stats: "process_stats".to_string(),
                watchdog_topics: "watchdog_topics".to_string(),
            },
        }
    }
}

impl SentinelConfig {
    /// Load and validate configuration from a TOML or JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without validation
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Parse JSON without validation
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Check the invariants the sentinel relies on at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.topic_watchdog.contains_key(DEFAULT_RULE_KEY) {
            return Err(ConfigError::MissingDefaultRule);
        }

        let connection = &self.mqtt_broker.connection;
        if connection.host_addr.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt_broker.connection.host_addr must not be empty".to_string(),
            ));
        }
        if connection.host_port == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt_broker.connection.host_port must be greater than 0".to_string(),
            ));
        }
        if connection.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt_broker.connection.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        let process = &self.mqtt_broker.process;
        if process.name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt_broker.process.name must not be empty".to_string(),
            ));
        }
        if process.service_wd_period_seconds == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt_broker.process.service_wd_period_seconds must be greater than 0".to_string(),
            ));
        }

        let publish = &self.publish;
        for (key, value) in [
            ("topic_list", &publish.topic_list),
            ("process_stats", &publish.process_stats),
            ("watchdog_topics", &publish.watchdog_topics),
        ] {
            if value.trim_matches('/').is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "publish.{key} must not be empty"
                )));
            }
        }

        Ok(())
    }
}
