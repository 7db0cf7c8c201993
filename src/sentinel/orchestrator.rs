//! Sentinel orchestrator
//!
//! Wires the pieces together:
//!
//! - inbound messages flow from the subscriber's sink through a dispatch task into the
//!   registry and the stats window
//! - a new topic wakes the topic list task, which republishes the list; bursts of new
//!   topics coalesce into a few publishes and the dispatch task never waits on the broker
//! - every monitor tick snapshots the registry, evaluates the watchdog, publishes the
//!   three reports and then lets the supervisor repair the connection
//!
//! Messages on the sentinel's own report topics are ignored so they never show up in
//! the registry.

use super::report::{self, StatsReport};
use super::supervisor::{ConnectionState, ConnectionSupervisor};
use crate::config::{PublishSection, SentinelConfig};
use crate::error::{SentinelError, SentinelResult};
use crate::monitor::{ProcessHealthMonitor, TickHandler};
use crate::probe::ProcessProbe;
use crate::registry::TopicRegistry;
use crate::stats::StatsAggregator;
use crate::transport::{InboundMessage, MessageSink, Subscriber, SubscriberFactory};
use crate::watchdog::{WatchdogEvaluator, WatchdogRules};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Filter the sentinel subscribes with
pub const SUBSCRIBE_ALL: &str = "#";

/// Capacity of the inbound message channel
const INBOUND_CHANNEL_CAPACITY: usize = 1024;

/// State shared between the dispatch task and the monitor's tick
pub struct SentinelCore<F: SubscriberFactory> {
    registry: TopicRegistry,
    stats: StatsAggregator,
    rules: WatchdogRules,
    publish: PublishSection,
    own_topics: Vec<String>,
    factory: F,
    sink: MessageSink,
    subscriber: Mutex<Subscriber<F::Transport>>,
    supervisor: Mutex<ConnectionSupervisor>,
    topic_list_dirty: Notify,
}

impl<F: SubscriberFactory> SentinelCore<F> {
    /// True for topics the sentinel publishes itself
    pub fn is_own_topic(&self, topic: &str) -> bool {
        self.own_topics.iter().any(|own| own == topic)
    }

    /// Message path: record, count, and flag the topic list on a new topic
    ///
    /// Never waits on the subscriber, so the sink keeps draining while publishes are
    /// backed up.
    pub fn handle_message(&self, message: InboundMessage) {
        if self.is_own_topic(&message.topic) {
            debug!(topic = %message.topic, "Ignoring own report");
            return;
        }

        let is_new = self.registry.record(&message.topic, &message.payload);
        self.stats.on_message();

        if is_new {
            self.topic_list_dirty.notify_one();
        }
    }

    /// Publish the current topic list
    pub async fn publish_topic_list(&self) {
        let snapshot = self.registry.snapshot_with_deltas(Utc::now());
        let topic_list = report::topic_list(&snapshot);

        let subscriber = self.subscriber.lock().await;
        Self::publish_report(&subscriber, &self.publish.topic_list_topic(), &topic_list).await;
    }

    /// Tick path: report, evaluate, publish, then supervise the connection
    pub async fn run_tick(&self, process_running: bool) {
        let now = Utc::now();
        let snapshot = self.registry.snapshot_with_deltas(now);

        info!(topic_count = snapshot.len(), "Topic registry");
        for (topic, delta) in &snapshot {
            info!(
                topic = %topic,
                last_seen = %delta.last_seen_at.to_rfc3339(),
                elapsed_secs = delta.elapsed.as_secs_f64(),
                payload = %delta.payload_lossy(),
                "Topic"
            );
        }

        let violations = match WatchdogEvaluator::violations(&snapshot, &self.rules) {
            Ok(violations) => {
                info!(violation_count = violations.len(), "Watchdog evaluation");
                for violation in &violations {
                    warn!(
                        topic = %violation.topic,
                        last_seen = %violation.last_seen_at.to_rfc3339(),
                        elapsed_secs = violation.elapsed.as_secs_f64(),
                        threshold_secs = violation.threshold_seconds,
                        "Topic watchdog violation"
                    );
                }
                Some(violations)
            }
            Err(e) => {
                error!(error = %e, "Watchdog evaluation failed, skipping violation report");
                None
            }
        };

        let stats = StatsReport {
            stats: self.stats.read_and_reset(now, self.registry.count()),
            process_running,
        };
        info!(
            msgs_per_sec = stats.stats.msgs_per_sec,
            topic_count = stats.stats.topic_count,
            process_running,
            "Process stats"
        );

        let mut subscriber = self.subscriber.lock().await;

        Self::publish_report(&subscriber, &self.publish.process_stats_topic(), &stats).await;
        Self::publish_report(
            &subscriber,
            &self.publish.topic_list_topic(),
            &report::topic_list(&snapshot),
        )
        .await;
        if let Some(violations) = &violations {
            Self::publish_report(
                &subscriber,
                &self.publish.watchdog_topics_topic(),
                &report::violation_list(violations),
            )
            .await;
        }

        let mut supervisor = self.supervisor.lock().await;
        supervisor
            .check_and_recover(&mut *subscriber, &self.factory, &self.sink)
            .await;
    }

    async fn publish_report<T: Serialize + Sync>(
        subscriber: &Subscriber<F::Transport>,
        topic: &str,
        report: &T,
    ) {
        let payload = match report::to_payload(report) {
            Ok(payload) => payload,
            Err(e) => {
                error!(topic = %topic, error = %e, "Failed to serialize report");
                return;
            }
        };

        match subscriber.publish(topic, payload).await {
            Ok(()) => debug!(topic = %topic, "Published report"),
            Err(e) => error!(topic = %topic, error = %e, "Failed to publish report"),
        }
    }

    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }
}

#[async_trait]
impl<F: SubscriberFactory + 'static> TickHandler for SentinelCore<F> {
    async fn on_tick(&self, process_running: bool) {
        let span = crate::tick_span!(process_running);
        self.run_tick(process_running).instrument(span).await;
    }
}

/// The running sentinel
pub struct Sentinel<F: SubscriberFactory + 'static> {
    core: Arc<SentinelCore<F>>,
    process_name: String,
    tick_period: Duration,
    probe: Arc<dyn ProcessProbe>,
    monitor: Option<ProcessHealthMonitor>,
    inbound_rx: Option<mpsc::Receiver<InboundMessage>>,
    dispatch_shutdown: Option<watch::Sender<bool>>,
    dispatch_handle: Option<JoinHandle<()>>,
    topic_list_handle: Option<JoinHandle<()>>,
}

impl<F: SubscriberFactory + 'static> Sentinel<F> {
    /// Build a sentinel from validated configuration; nothing runs until `start`
    pub fn new(
        config: &SentinelConfig,
        factory: F,
        probe: Arc<dyn ProcessProbe>,
    ) -> SentinelResult<Self> {
        config.validate()?;

        let (sink, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let tick_period = Duration::from_secs(config.mqtt_broker.process.service_wd_period_seconds);
        let subscriber = Subscriber::new(factory.create(sink.clone()), SUBSCRIBE_ALL);

        let core = SentinelCore {
            registry: TopicRegistry::new(),
            stats: StatsAggregator::new(),
            rules: WatchdogRules::from(&config.topic_watchdog),
            publish: config.publish.clone(),
            own_topics: config.publish.own_topics(),
            factory,
            sink,
            subscriber: Mutex::new(subscriber),
            supervisor: Mutex::new(ConnectionSupervisor::new(
                ConnectionState::Disconnected,
                tick_period,
            )),
            topic_list_dirty: Notify::new(),
        };

        Ok(Self {
            core: Arc::new(core),
            process_name: config.mqtt_broker.process.name.clone(),
            tick_period,
            probe,
            monitor: None,
            inbound_rx: Some(inbound_rx),
            dispatch_shutdown: None,
            dispatch_handle: None,
            topic_list_handle: None,
        })
    }

    /// Override the tick period taken from configuration
    pub fn with_tick_period(mut self, tick_period: Duration) -> Self {
        self.tick_period = tick_period;
        if let Some(core) = Arc::get_mut(&mut self.core) {
            core.supervisor.get_mut().set_retry_period(tick_period);
        }
        self
    }

    pub fn core(&self) -> &Arc<SentinelCore<F>> {
        &self.core
    }

    pub fn registry(&self) -> &TopicRegistry {
        self.core.registry()
    }

    /// Connection state as of the last completed tick
    ///
    /// Waits for a tick in progress to finish.
    pub async fn connection_state(&self) -> ConnectionState {
        let _subscriber = self.core.subscriber.lock().await;
        self.core.supervisor.lock().await.state()
    }

    pub fn is_running(&self) -> bool {
        self.monitor.as_ref().is_some_and(|m| m.is_running())
    }

    /// Start message dispatch, the subscriber and the monitor
    ///
    /// A failed initial connection is not an error; the first tick retries it.
    pub async fn start(&mut self) -> SentinelResult<()> {
        let inbound_rx = self
            .inbound_rx
            .take()
            .ok_or_else(|| SentinelError::internal_error("Sentinel already started"))?;

        info!(
            process = %self.process_name,
            tick_period_secs = self.tick_period.as_secs_f64(),
            own_topics = ?self.core.own_topics,
            "Starting broker sentinel"
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.topic_list_handle = Some(tokio::spawn(Self::topic_list_loop(
            self.core.clone(),
            shutdown_rx.clone(),
        )));
        self.dispatch_handle = Some(tokio::spawn(Self::dispatch_loop(
            self.core.clone(),
            inbound_rx,
            shutdown_rx,
        )));
        self.dispatch_shutdown = Some(shutdown_tx);

        let connected = {
            let mut subscriber = self.core.subscriber.lock().await;
            let span = crate::mqtt_span!(operation = "start", filter = SUBSCRIBE_ALL);
            subscriber.start().instrument(span).await
        };
        self.core.supervisor.lock().await.observe_start(connected);

        let handler: Arc<dyn TickHandler> = self.core.clone();
        let mut monitor = ProcessHealthMonitor::new(
            self.process_name.clone(),
            self.tick_period,
            self.probe.clone(),
            handler,
        );
        monitor.start()?;
        self.monitor = Some(monitor);

        Ok(())
    }

    async fn dispatch_loop(
        core: Arc<SentinelCore<F>>,
        mut inbound_rx: mpsc::Receiver<InboundMessage>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                message = inbound_rx.recv() => match message {
                    Some(message) => core.handle_message(message),
                    None => break,
                },
            }
        }
        debug!("Message dispatch stopped");
    }

    async fn topic_list_loop(core: Arc<SentinelCore<F>>, mut shutdown_rx: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = core.topic_list_dirty.notified() => core.publish_topic_list().await,
            }
        }
        debug!("Topic list publisher stopped");
    }

    /// Stop the monitor, then message dispatch, then disconnect
    ///
    /// Nothing is recorded or published once this returns.
    pub async fn stop(&mut self) {
        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop().await;
        }

        if let Some(shutdown_tx) = self.dispatch_shutdown.take() {
            let _ = shutdown_tx.send(true);
        }
        for handle in [self.dispatch_handle.take(), self.topic_list_handle.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = handle.await {
                warn!("Sentinel task ended abnormally: {}", e);
            }
        }

        let mut subscriber = self.core.subscriber.lock().await;
        let span = crate::mqtt_span!(operation = "stop");
        subscriber.stop().instrument(span).await;

        info!("Broker sentinel stopped");
    }
}

impl<F: SubscriberFactory + 'static> Drop for Sentinel<F> {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.dispatch_shutdown.take() {
            let _ = shutdown_tx.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockSubscriberFactory, ScriptedProbe};

    fn sentinel(factory: MockSubscriberFactory) -> Sentinel<MockSubscriberFactory> {
        Sentinel::new(
            &SentinelConfig::default(),
            factory,
            Arc::new(ScriptedProbe::always(true)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_own_topics_are_not_recorded() {
        let sentinel = sentinel(MockSubscriberFactory::new());
        let core = sentinel.core();

        core.handle_message(InboundMessage {
            topic: "sc_mqtt_broker/process_stats".to_string(),
            payload: b"{}".to_vec(),
        });
        core.handle_message(InboundMessage {
            topic: "sensors/1".to_string(),
            payload: b"1".to_vec(),
        });

        assert_eq!(sentinel.registry().topics(), vec!["sensors/1".to_string()]);
        assert_eq!(core.stats().window().message_count, 1);
    }

    #[tokio::test]
    async fn test_only_new_topics_flag_the_topic_list() {
        let sentinel = sentinel(MockSubscriberFactory::new());
        let core = sentinel.core();
        let message = |payload: &[u8]| InboundMessage {
            topic: "sensors/1".to_string(),
            payload: payload.to_vec(),
        };

        core.handle_message(message(b"a"));
        let flagged =
            tokio::time::timeout(Duration::from_millis(50), core.topic_list_dirty.notified()).await;
        assert!(flagged.is_ok());

        core.handle_message(message(b"b"));
        let flagged =
            tokio::time::timeout(Duration::from_millis(50), core.topic_list_dirty.notified()).await;
        assert!(flagged.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = SentinelConfig::default();
        config.topic_watchdog.clear();

        let result = Sentinel::new(
            &config,
            MockSubscriberFactory::new(),
            Arc::new(ScriptedProbe::always(true)),
        );
        assert!(matches!(result, Err(SentinelError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_tick_publishes_three_reports_in_order() {
        let factory = MockSubscriberFactory::new();
        let handle = factory.handle();
        let sentinel = sentinel(factory);

        {
            let mut subscriber = sentinel.core.subscriber.lock().await;
            assert!(subscriber.start().await);
        }
        sentinel.core.supervisor.lock().await.observe_start(true);

        sentinel.core().run_tick(true).await;

        assert_eq!(
            handle.published_topics(),
            vec![
                "sc_mqtt_broker/process_stats",
                "sc_mqtt_broker/topic_list",
                "sc_mqtt_broker/watchdog_topics",
            ]
        );
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut sentinel = sentinel(MockSubscriberFactory::new())
            .with_tick_period(Duration::from_secs(3600));

        sentinel.start().await.unwrap();
        assert!(sentinel.start().await.is_err());
        sentinel.stop().await;
    }
}
