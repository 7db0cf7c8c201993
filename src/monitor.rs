//! Broker process health monitor
//!
//! A periodic task that probes whether the broker process is running and hands the
//! result to a [`TickHandler`]. The handler's tick is the sentinel's only clock: every
//! report, watchdog evaluation and reconnect attempt happens inside it.
//!
//! The first tick fires immediately on [`ProcessHealthMonitor::start`]; later ticks
//! follow every `period`. [`ProcessHealthMonitor::stop`] never interrupts a tick in
//! progress, it only cuts the sleep short, and returns once the task has exited.

use crate::error::{SentinelError, SentinelResult};
use crate::probe::ProcessProbe;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Receives one call per monitor period
#[async_trait]
pub trait TickHandler: Send + Sync {
    async fn on_tick(&self, process_running: bool);
}

/// Periodic process probe driving the sentinel's tick cycle
pub struct ProcessHealthMonitor {
    process_name: String,
    period: Duration,
    probe: Arc<dyn ProcessProbe>,
    handler: Arc<dyn TickHandler>,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl ProcessHealthMonitor {
    pub fn new(
        process_name: impl Into<String>,
        period: Duration,
        probe: Arc<dyn ProcessProbe>,
        handler: Arc<dyn TickHandler>,
    ) -> Self {
        Self {
            process_name: process_name.into(),
            period,
            probe,
            handler,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// True between `start` and `stop`
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Spawn the monitor loop
    pub fn start(&mut self) -> SentinelResult<()> {
        if self.handle.is_some() {
            return Err(SentinelError::internal_error(
                "Process health monitor already started",
            ));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let process_name = self.process_name.clone();
        let period = self.period;
        let probe = self.probe.clone();
        let handler = self.handler.clone();

        info!(
            process = %process_name,
            probe = %probe.probe_name(),
            period_secs = period.as_secs_f64(),
            "Starting process health monitor"
        );

        let handle = tokio::spawn(Self::run_loop(
            process_name,
            period,
            probe,
            handler,
            shutdown_rx,
        ));

        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(handle);
        Ok(())
    }

    /// Signal the loop to exit and wait until it has
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(()) => info!("Process health monitor stopped"),
                Err(e) if e.is_panic() => warn!("Process health monitor task panicked: {}", e),
                Err(e) => warn!("Process health monitor task ended abnormally: {}", e),
            }
        }
    }

    async fn run_loop(
        process_name: String,
        period: Duration,
        probe: Arc<dyn ProcessProbe>,
        handler: Arc<dyn TickHandler>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let running = Self::probe_once(probe.clone(), &process_name).await;
            info!(
                process = %process_name,
                running,
                sleep_secs = period.as_secs_f64(),
                "Broker process check"
            );

            handler.on_tick(running).await;

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(period) => {}
            }
        }
    }

    /// Run the probe on the blocking pool; any failure reads as "not running"
    pub async fn probe_once(probe: Arc<dyn ProcessProbe>, process_name: &str) -> bool {
        let name = process_name.to_string();
        let result = tokio::task::spawn_blocking(move || probe.is_running(&name)).await;

        match result {
            Ok(Ok(running)) => running,
            Ok(Err(e)) => {
                warn!(process = %process_name, error = %e, "Process probe failed, assuming not running");
                false
            }
            Err(e) => {
                warn!(process = %process_name, error = %e, "Process probe task failed, assuming not running");
                false
            }
        }
    }
}

impl Drop for ProcessHealthMonitor {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeError;
    use crate::testing::{RecordingTickHandler, ScriptedProbe};

    #[tokio::test]
    async fn test_first_tick_is_immediate() {
        let handler = Arc::new(RecordingTickHandler::new());
        let probe = Arc::new(ScriptedProbe::always(true));
        let mut monitor = ProcessHealthMonitor::new(
            "mosquitto",
            Duration::from_secs(3600),
            probe,
            handler.clone(),
        );

        monitor.start().unwrap();
        handler.wait_for_ticks(1, Duration::from_secs(2)).await;
        monitor.stop().await;

        assert_eq!(handler.ticks(), vec![true]);
        assert!(!monitor.is_running());
    }

    #[tokio::test]
    async fn test_ticks_follow_period() {
        let handler = Arc::new(RecordingTickHandler::new());
        let probe = Arc::new(ScriptedProbe::sequence(vec![Ok(true), Ok(false), Ok(true)]));
        let mut monitor = ProcessHealthMonitor::new(
            "mosquitto",
            Duration::from_millis(20),
            probe,
            handler.clone(),
        );

        monitor.start().unwrap();
        handler.wait_for_ticks(3, Duration::from_secs(2)).await;
        monitor.stop().await;

        let ticks = handler.ticks();
        assert!(ticks.len() >= 3);
        assert_eq!(&ticks[..3], &[true, false, true]);
    }

    #[tokio::test]
    async fn test_probe_error_reads_as_not_running() {
        let handler = Arc::new(RecordingTickHandler::new());
        let probe = Arc::new(ScriptedProbe::sequence(vec![Err(
            ProbeError::CommandFailed {
                command: "systemctl is-active mosquitto".to_string(),
                message: "not found".to_string(),
            },
        )]));
        let mut monitor = ProcessHealthMonitor::new(
            "mosquitto",
            Duration::from_secs(3600),
            probe,
            handler.clone(),
        );

        monitor.start().unwrap();
        handler.wait_for_ticks(1, Duration::from_secs(2)).await;
        monitor.stop().await;

        assert_eq!(handler.ticks(), vec![false]);
    }

    #[tokio::test]
    async fn test_no_ticks_after_stop() {
        let handler = Arc::new(RecordingTickHandler::new());
        let probe = Arc::new(ScriptedProbe::always(true));
        let mut monitor = ProcessHealthMonitor::new(
            "mosquitto",
            Duration::from_millis(10),
            probe,
            handler.clone(),
        );

        monitor.start().unwrap();
        handler.wait_for_ticks(2, Duration::from_secs(2)).await;
        monitor.stop().await;

        let count = handler.ticks().len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handler.ticks().len(), count);
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let handler = Arc::new(RecordingTickHandler::new());
        let mut monitor = ProcessHealthMonitor::new(
            "mosquitto",
            Duration::from_secs(3600),
            Arc::new(ScriptedProbe::always(false)),
            handler,
        );

        monitor.start().unwrap();
        assert!(monitor.start().is_err());
        monitor.stop().await;
    }
}
