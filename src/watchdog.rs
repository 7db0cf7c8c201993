//! Topic watchdog evaluation
//!
//! Classifies registry snapshots against the configured silence thresholds. A topic
//! uses its exact-match override when one exists, otherwise the `all` rule, and is in
//! violation only when it has been silent for strictly longer than that threshold.

use crate::config::{ConfigError, WatchdogRule, DEFAULT_RULE_KEY};
use crate::registry::TopicSnapshot;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// A topic that has been silent for too long, as of the evaluation instant
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationRecord {
    pub topic: String,
    pub last_seen_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Threshold that was exceeded, in seconds
    pub threshold_seconds: u64,
    pub last_payload: Vec<u8>,
}

/// Watchdog thresholds keyed by topic, `all` being the default
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WatchdogRules {
    rules: BTreeMap<String, WatchdogRule>,
}

impl WatchdogRules {
    pub fn new(rules: BTreeMap<String, WatchdogRule>) -> Self {
        Self { rules }
    }

    /// Rules with only the default threshold
    pub fn with_default(max_time_seconds: u64) -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(
            DEFAULT_RULE_KEY.to_string(),
            WatchdogRule { max_time_seconds },
        );
        Self { rules }
    }

    /// Add or replace an exact-topic override
    pub fn with_override(mut self, topic: &str, max_time_seconds: u64) -> Self {
        self.rules
            .insert(topic.to_string(), WatchdogRule { max_time_seconds });
        self
    }

    /// The `all` threshold, if configured
    pub fn default_threshold(&self) -> Option<u64> {
        self.rules
            .get(DEFAULT_RULE_KEY)
            .map(|rule| rule.max_time_seconds)
    }

    /// Threshold for an exact topic match, ignoring `all`
    pub fn override_for(&self, topic: &str) -> Option<u64> {
        if topic == DEFAULT_RULE_KEY {
            return None;
        }
        self.rules.get(topic).map(|rule| rule.max_time_seconds)
    }
}

impl From<&BTreeMap<String, WatchdogRule>> for WatchdogRules {
    fn from(rules: &BTreeMap<String, WatchdogRule>) -> Self {
        Self::new(rules.clone())
    }
}

/// Pure watchdog evaluation
pub struct WatchdogEvaluator;

impl WatchdogEvaluator {
    /// Threshold that applies to `topic` (pure function)
    pub fn threshold_for(topic: &str, rules: &WatchdogRules) -> Result<u64, ConfigError> {
        let default = rules
            .default_threshold()
            .ok_or(ConfigError::MissingDefaultRule)?;
        Ok(rules.override_for(topic).unwrap_or(default))
    }

    /// Strict greater-than comparison against a whole-second threshold (pure function)
    pub fn is_violation(elapsed: Duration, threshold_seconds: u64) -> bool {
        elapsed > Duration::from_secs(threshold_seconds)
    }

    /// Every topic in `snapshot` that is silent past its threshold, in snapshot order
    ///
    /// Fails without a partial result when the `all` rule is missing.
    pub fn violations(
        snapshot: &TopicSnapshot,
        rules: &WatchdogRules,
    ) -> Result<Vec<ViolationRecord>, ConfigError> {
        if rules.default_threshold().is_none() {
            return Err(ConfigError::MissingDefaultRule);
        }

        let mut violations = Vec::new();
        for (topic, delta) in snapshot {
            let threshold_seconds = Self::threshold_for(topic, rules)?;
            if Self::is_violation(delta.elapsed, threshold_seconds) {
                violations.push(ViolationRecord {
                    topic: topic.clone(),
                    last_seen_at: delta.last_seen_at,
                    elapsed: delta.elapsed,
                    threshold_seconds,
                    last_payload: delta.last_payload.clone(),
                });
            }
        }

        Ok(violations)
    }
}
