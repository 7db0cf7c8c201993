//! JSON payloads published by the sentinel

use crate::registry::TopicSnapshot;
use crate::stats::ProcessStats;
use crate::watchdog::ViolationRecord;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// `[last_seen_rfc3339, elapsed_seconds, payload]`, serialized as a JSON array
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicEntry(pub String, pub f64, pub String);

impl TopicEntry {
    fn new(last_seen_at: DateTime<Utc>, elapsed: Duration, payload: &[u8]) -> Self {
        Self(
            last_seen_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            elapsed.as_secs_f64(),
            String::from_utf8_lossy(payload).into_owned(),
        )
    }
}

/// Topic → entry, the shape of both the topic list and the watchdog report
pub type TopicReport = BTreeMap<String, TopicEntry>;

/// `process_stats` payload
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsReport {
    #[serde(flatten)]
    pub stats: ProcessStats,
    pub process_running: bool,
}

/// Every topic in the snapshot
pub fn topic_list(snapshot: &TopicSnapshot) -> TopicReport {
    snapshot
        .iter()
        .map(|(topic, delta)| {
            (
                topic.clone(),
                TopicEntry::new(delta.last_seen_at, delta.elapsed, &delta.last_payload),
            )
        })
        .collect()
}

/// Only the violating topics
pub fn violation_list(violations: &[ViolationRecord]) -> TopicReport {
    violations
        .iter()
        .map(|violation| {
            (
                violation.topic.clone(),
                TopicEntry::new(
                    violation.last_seen_at,
                    violation.elapsed,
                    &violation.last_payload,
                ),
            )
        })
        .collect()
}

pub fn to_payload<T: Serialize>(report: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(report)
}
