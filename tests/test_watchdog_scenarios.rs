//! Watchdog, registry and stats behavior through the public API
//!
//! Every scenario injects its own clock so the thresholds are exercised exactly.

use broker_sentinel::config::ConfigError;
use broker_sentinel::registry::TopicRegistry;
use broker_sentinel::stats::StatsAggregator;
use broker_sentinel::watchdog::{WatchdogEvaluator, WatchdogRules};
use chrono::{DateTime, Duration, Utc};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

fn violating_topics(registry: &TopicRegistry, rules: &WatchdogRules, now: DateTime<Utc>) -> Vec<String> {
    let snapshot = registry.snapshot_with_deltas(now);
    WatchdogEvaluator::violations(&snapshot, rules)
        .unwrap()
        .into_iter()
        .map(|violation| violation.topic)
        .collect()
}

#[test]
fn test_override_flags_only_the_overridden_topic() {
    let registry = TopicRegistry::new();
    registry.record_at("A", b"a", at(115));
    registry.record_at("B", b"b", at(0));

    let rules = WatchdogRules::with_default(60).with_override("B", 30);
    assert_eq!(violating_topics(&registry, &rules, at(120)), vec!["B"]);
}

#[test]
fn test_looser_override_clears_the_violation() {
    let registry = TopicRegistry::new();
    registry.record_at("A", b"a", at(115));
    registry.record_at("B", b"b", at(0));

    let rules = WatchdogRules::with_default(60).with_override("B", 200);
    assert!(violating_topics(&registry, &rules, at(120)).is_empty());
}

#[test]
fn test_override_can_be_looser_than_all() {
    let registry = TopicRegistry::new();
    registry.record_at("slow/heartbeat", b"1", at(0));
    registry.record_at("fast/sensor", b"2", at(0));

    let rules = WatchdogRules::with_default(60).with_override("slow/heartbeat", 3600);
    assert_eq!(
        violating_topics(&registry, &rules, at(90)),
        vec!["fast/sensor"]
    );
}

#[test]
fn test_threshold_boundary_is_strict() {
    let registry = TopicRegistry::new();
    registry.record_at("edge", b"x", at(0));
    let rules = WatchdogRules::with_default(60);

    assert!(violating_topics(&registry, &rules, at(60)).is_empty());
    assert_eq!(violating_topics(&registry, &rules, at(61)), vec!["edge"]);
}

#[test]
fn test_new_message_clears_a_violation() {
    let registry = TopicRegistry::new();
    registry.record_at("door", b"open", at(0));
    let rules = WatchdogRules::with_default(30);

    assert_eq!(violating_topics(&registry, &rules, at(45)), vec!["door"]);

    registry.record_at("door", b"closed", at(50));
    assert!(violating_topics(&registry, &rules, at(55)).is_empty());
    assert_eq!(registry.get("door").unwrap().last_payload, b"closed");
}

#[test]
fn test_zero_threshold_flags_every_aged_topic() {
    let registry = TopicRegistry::new();
    registry.record_at("a", b"", at(0));
    registry.record_at("b", b"", at(0));
    let rules = WatchdogRules::with_default(0);

    assert!(violating_topics(&registry, &rules, at(0)).is_empty());
    assert_eq!(violating_topics(&registry, &rules, at(1)), vec!["a", "b"]);
}

#[test]
fn test_missing_all_rule_fails_evaluation() {
    let registry = TopicRegistry::new();
    registry.record_at("a", b"", at(0));
    let rules = WatchdogRules::new(BTreeMap::new()).with_override("a", 10);

    let snapshot = registry.snapshot_with_deltas(at(100));
    assert!(matches!(
        WatchdogEvaluator::violations(&snapshot, &rules),
        Err(ConfigError::MissingDefaultRule)
    ));
}

#[test]
fn test_stats_rate_over_two_second_window() {
    let stats = StatsAggregator::starting_at(at(0));
    for _ in 0..10 {
        stats.on_message();
    }

    let report = stats.read_and_reset(at(0) + Duration::seconds(2), 3);
    assert!((report.msgs_per_sec - 5.0).abs() < 1e-9);
    assert_eq!(report.topic_count, 3);

    let next = stats.read_and_reset(at(0) + Duration::seconds(4), 3);
    assert_eq!(next.msgs_per_sec, 0.0);
}

proptest! {
    #[test]
    fn prop_violation_matches_strict_comparison(
        elapsed_secs in 0i64..10_000,
        threshold in 0u64..10_000,
    ) {
        let registry = TopicRegistry::new();
        registry.record_at("t", b"", at(0));
        let rules = WatchdogRules::with_default(threshold);

        let flagged = !violating_topics(&registry, &rules, at(elapsed_secs)).is_empty();
        prop_assert_eq!(flagged, elapsed_secs as u64 > threshold);
    }

    #[test]
    fn prop_override_wins_over_all(all in 0u64..1_000, specific in 0u64..1_000) {
        let rules = WatchdogRules::with_default(all).with_override("x", specific);
        prop_assert_eq!(WatchdogEvaluator::threshold_for("x", &rules).unwrap(), specific);
        prop_assert_eq!(WatchdogEvaluator::threshold_for("y", &rules).unwrap(), all);
    }
}
