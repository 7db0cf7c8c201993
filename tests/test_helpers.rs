//! Test helpers and utilities for integration tests

use broker_sentinel::config::{SentinelConfig, WatchdogRule};
use std::time::Duration;

/// Default configuration with the `all` threshold replaced
#[allow(dead_code)]
pub fn test_config(all_seconds: u64) -> SentinelConfig {
    let mut config = SentinelConfig::default();
    config
        .topic_watchdog
        .insert("all".to_string(), WatchdogRule { max_time_seconds: all_seconds });
    config
}

/// Add an exact-topic watchdog override
#[allow(dead_code)]
pub fn with_override(mut config: SentinelConfig, topic: &str, seconds: u64) -> SentinelConfig {
    config
        .topic_watchdog
        .insert(topic.to_string(), WatchdogRule { max_time_seconds: seconds });
    config
}

/// Poll `condition` until it holds or `timeout` elapses
#[allow(dead_code)]
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
