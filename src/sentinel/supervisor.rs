//! Connection supervisor
//!
//! Runs once per tick after the reports are published. A subscriber that is no longer
//! connected is replaced by a fresh one from the factory and started immediately. There
//! is no backoff and no retry limit; the monitor period is the retry interval.

use crate::transport::{MessageSink, Subscriber, SubscriberFactory};
use std::time::Duration;
use tracing::{info, warn};

/// Supervisor view of the subscriber connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// What a tick should do about the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorAction {
    /// Connected and known to be connected
    Hold,
    /// Connected again after being seen disconnected
    MarkRecovered,
    /// Not connected; replace the subscriber
    Restart,
}

/// Reconnection state machine for the sentinel's subscriber
#[derive(Debug)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    retry_period: Duration,
    restarts: u64,
    failed_restarts: u64,
    recoveries: u64,
}

impl ConnectionSupervisor {
    pub fn new(initial: ConnectionState, retry_period: Duration) -> Self {
        Self {
            state: initial,
            retry_period,
            restarts: 0,
            failed_restarts: 0,
            recoveries: 0,
        }
    }

    pub fn set_retry_period(&mut self, retry_period: Duration) {
        self.retry_period = retry_period;
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Restarts that ended connected
    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Restarts that ended disconnected
    pub fn failed_restarts(&self) -> u64 {
        self.failed_restarts
    }

    /// Disconnected-to-connected transitions seen without a restart
    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }

    /// Record the outcome of the initial subscriber start
    pub fn observe_start(&mut self, connected: bool) {
        if connected {
            self.state = ConnectionState::Connected;
        } else {
            self.state = ConnectionState::Disconnected;
            warn!(
                retry_secs = self.retry_period.as_secs(),
                "Initial MQTT connection failed. Will attempt again in {} seconds",
                self.retry_period.as_secs()
            );
        }
    }

    /// Decide the next step from the current state and the live connection flag (pure function)
    pub fn decide(state: ConnectionState, is_connected: bool) -> SupervisorAction {
        match (state, is_connected) {
            (ConnectionState::Connected, true) => SupervisorAction::Hold,
            (ConnectionState::Disconnected, true) => SupervisorAction::MarkRecovered,
            (_, false) => SupervisorAction::Restart,
        }
    }

    /// Check the subscriber and replace it when it is no longer connected
    ///
    /// The restart runs to completion, bounded only by the transport's connect timeout.
    pub async fn check_and_recover<F: SubscriberFactory>(
        &mut self,
        subscriber: &mut Subscriber<F::Transport>,
        factory: &F,
        sink: &MessageSink,
    ) -> ConnectionState {
        match Self::decide(self.state, subscriber.is_connected()) {
            SupervisorAction::Hold => {}
            SupervisorAction::MarkRecovered => {
                self.state = ConnectionState::Connected;
                self.recoveries += 1;
                info!("MQTT client connection recovered");
            }
            SupervisorAction::Restart => {
                self.state = ConnectionState::Disconnected;
                warn!("MQTT client is not connected. Restarting MQTT client");

                subscriber.stop().await;
                let topic_filter = subscriber.topic_filter().to_string();
                *subscriber = Subscriber::new(factory.create(sink.clone()), topic_filter);

                if subscriber.start().await {
                    self.state = ConnectionState::Connected;
                    self.restarts += 1;
                    info!("MQTT client successfully restarted");
                } else {
                    self.failed_restarts += 1;
                    warn!(
                        retry_secs = self.retry_period.as_secs(),
                        "Unable to restart MQTT client. Will attempt again in {} seconds",
                        self.retry_period.as_secs()
                    );
                }
            }
        }

        self.state
    }
}
