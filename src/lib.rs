//! MQTT broker sentinel
//!
//! A liveness watchdog for an MQTT bus. The sentinel subscribes to every topic,
//! remembers when each one was last seen, flags topics that stay silent past their
//! configured threshold and publishes its findings back onto the bus. A periodic
//! monitor also checks that the broker process itself is alive and drives the
//! reconnection of the sentinel's own subscriber.
//!
//! # Overview
//!
//! - [`registry::TopicRegistry`] - last-seen record per topic
//! - [`watchdog::WatchdogEvaluator`] - silence thresholds, `all` plus exact overrides
//! - [`stats::StatsAggregator`] - read-and-reset message rate
//! - [`monitor::ProcessHealthMonitor`] - periodic broker process probe, the sentinel's clock
//! - [`sentinel::Sentinel`] - wires the above to a [`transport::Subscriber`] and runs the
//!   [`sentinel::ConnectionSupervisor`]
//!
//! # Quick Start
//!
//! ```rust
//! use broker_sentinel::registry::TopicRegistry;
//! use broker_sentinel::watchdog::{WatchdogEvaluator, WatchdogRules};
//! use chrono::{Duration, Utc};
//!
//! let registry = TopicRegistry::new();
//! let start = Utc::now();
//! registry.record_at("home/garage/door", b"closed", start);
//! registry.record_at("home/kitchen/temp", b"21.5", start);
//!
//! let rules = WatchdogRules::with_default(300).with_override("home/garage/door", 30);
//! let snapshot = registry.snapshot_with_deltas(start + Duration::seconds(60));
//! let violations = WatchdogEvaluator::violations(&snapshot, &rules).unwrap();
//!
//! assert_eq!(violations.len(), 1);
//! assert_eq!(violations[0].topic, "home/garage/door");
//! ```

pub mod config;
pub mod error;
pub mod monitor;
pub mod observability;
pub mod probe;
pub mod registry;
pub mod sentinel;
pub mod stats;
pub mod testing;
pub mod transport;
pub mod watchdog;

pub use config::{ConfigError, SentinelConfig};
pub use error::{SentinelError, SentinelResult};
pub use monitor::{ProcessHealthMonitor, TickHandler};
pub use registry::{TopicRegistry, TopicSnapshot};
pub use sentinel::{ConnectionState, ConnectionSupervisor, Sentinel};
pub use stats::{ProcessStats, StatsAggregator};
pub use transport::mqtt::MqttClient;
pub use watchdog::{ViolationRecord, WatchdogEvaluator, WatchdogRules};
