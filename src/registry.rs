//! Topic registry
//!
//! Thread-safe record of every topic observed on the bus and when it was last seen.
//! Records are created on first observation and updated afterwards; they are never
//! evicted, so a topic that stops publishing keeps showing up as silent.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info};

/// Last observation of a single topic
#[derive(Debug, Clone, PartialEq)]
pub struct TopicRecord {
    pub topic: String,
    pub last_seen_at: DateTime<Utc>,
    /// Most recent payload, opaque to the sentinel
    pub last_payload: Vec<u8>,
}

/// Point-in-time view of one topic
#[derive(Debug, Clone, PartialEq)]
pub struct TopicDelta {
    pub last_seen_at: DateTime<Utc>,
    /// Time since `last_seen_at`, clamped at zero
    pub elapsed: Duration,
    pub last_payload: Vec<u8>,
}

impl TopicDelta {
    /// Payload rendered for logs and reports
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.last_payload).into_owned()
    }
}

/// Ordered topic -> delta mapping, iterated in lexicographic topic order
pub type TopicSnapshot = BTreeMap<String, TopicDelta>;

/// Registry of observed topics
#[derive(Debug, Clone, Default)]
pub struct TopicRegistry {
    topics: Arc<RwLock<BTreeMap<String, TopicRecord>>>,
}

impl TopicRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message for `topic` observed now
    ///
    /// Returns true if this is the first message ever seen for `topic`.
    pub fn record(&self, topic: &str, payload: &[u8]) -> bool {
        self.record_at(topic, payload, Utc::now())
    }

    /// Record a message for `topic` observed at `now`
    ///
    /// `last_seen_at` never moves backwards; the payload is always replaced.
    pub fn record_at(&self, topic: &str, payload: &[u8], now: DateTime<Utc>) -> bool {
        let is_new = {
            let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
            match topics.get_mut(topic) {
                Some(record) => {
                    if now > record.last_seen_at {
                        record.last_seen_at = now;
                    }
                    record.last_payload = payload.to_vec();
                    false
                }
                None => {
                    topics.insert(
                        topic.to_string(),
                        TopicRecord {
                            topic: topic.to_string(),
                            last_seen_at: now,
                            last_payload: payload.to_vec(),
                        },
                    );
                    true
                }
            }
        };

        // Logged after the write lock is released
        if is_new {
            info!(topic = %topic, "New topic received");
        }
        is_new
    }

    /// Copy every record together with its age as of `now`
    pub fn snapshot_with_deltas(&self, now: DateTime<Utc>) -> TopicSnapshot {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);

        let snapshot: TopicSnapshot = topics
            .values()
            .map(|record| {
                let elapsed = now
                    .signed_duration_since(record.last_seen_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                (
                    record.topic.clone(),
                    TopicDelta {
                        last_seen_at: record.last_seen_at,
                        elapsed,
                        last_payload: record.last_payload.clone(),
                    },
                )
            })
            .collect();
        drop(topics);

        debug!(topic_count = snapshot.len(), "Registry snapshot taken");
        snapshot
    }

    /// Get a copy of the record for `topic`
    pub fn get(&self, topic: &str) -> Option<TopicRecord> {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics.get(topic).cloned()
    }

    /// Names of every observed topic
    pub fn topics(&self) -> Vec<String> {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics.keys().cloned().collect()
    }

    /// Number of distinct topics observed
    pub fn count(&self) -> usize {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics.len()
    }
}
