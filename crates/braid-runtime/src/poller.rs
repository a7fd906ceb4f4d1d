//! Periodic telemetry fan-out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use braid_core::ports::{SnapshotEmitter, TelemetryProbe};
use braid_core::wire::Envelope;

/// Samples the host on an interval and pushes `system` envelopes through
/// the emitter, which fans them out to every connected client.
///
/// A failed sample is logged and skipped; the cadence is not disturbed.
pub struct StatsPoller {
    probe: Arc<dyn TelemetryProbe>,
    emitter: Arc<dyn SnapshotEmitter>,
    interval: Duration,
    running: Mutex<Option<CancellationToken>>,
}

impl StatsPoller {
    pub fn new(
        probe: Arc<dyn TelemetryProbe>,
        emitter: Arc<dyn SnapshotEmitter>,
        interval: Duration,
    ) -> Self {
        Self {
            probe,
            emitter,
            interval,
            running: Mutex::new(None),
        }
    }

    /// Start the loop. A second call while running is a no-op.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("stats poller already running");
            return;
        }

        let token = CancellationToken::new();
        *running = Some(token.clone());

        let probe = Arc::clone(&self.probe);
        let emitter = Arc::clone(&self.emitter);
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        debug!("stats poller stopped");
                        return;
                    }
                    _ = ticker.tick() => match probe.sample().await {
                        Ok(snapshot) => emitter.emit(Envelope::System(snapshot)).await,
                        Err(e) => warn!(error = %e, "telemetry sample failed, skipping tick"),
                    },
                }
            }
        });
    }

    /// Stop the loop. Idempotent.
    pub async fn stop(&self) {
        if let Some(token) = self.running.lock().await.take() {
            token.cancel();
        }
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use braid_core::error::TelemetryError;
    use braid_core::telemetry::{
        CpuStats, RamStats, ServiceStatus, StorageStats, SystemSnapshot,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProbe;

    #[async_trait]
    impl TelemetryProbe for StubProbe {
        async fn sample(&self) -> Result<SystemSnapshot, TelemetryError> {
            Ok(SystemSnapshot {
                ram: RamStats {
                    total: 1,
                    used: 0,
                    usage_pct: 0,
                },
                cpu: CpuStats { temperature_c: 0 },
                storage: StorageStats {
                    total: 0.0,
                    used: 0.0,
                    available: 0.0,
                    usage_pct: 0,
                },
                service_status: ServiceStatus::Stopped,
            })
        }
    }

    struct CountingEmitter(AtomicUsize);

    #[async_trait]
    impl SnapshotEmitter for CountingEmitter {
        async fn emit(&self, _envelope: Envelope) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn emits_on_cadence_until_stopped() {
        let emitter = Arc::new(CountingEmitter(AtomicUsize::new(0)));
        let poller = StatsPoller::new(
            Arc::new(StubProbe),
            emitter.clone(),
            Duration::from_millis(20),
        );

        poller.start().await;
        assert!(poller.is_running().await);
        tokio::time::sleep(Duration::from_millis(110)).await;
        poller.stop().await;
        assert!(!poller.is_running().await);

        let emitted = emitter.0.load(Ordering::SeqCst);
        assert!(emitted >= 3, "emitted {emitted} ticks");

        let after_stop = emitter.0.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(emitter.0.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test]
    async fn double_start_keeps_one_loop() {
        let emitter = Arc::new(CountingEmitter(AtomicUsize::new(0)));
        let poller = StatsPoller::new(
            Arc::new(StubProbe),
            emitter.clone(),
            Duration::from_millis(500),
        );

        poller.start().await;
        poller.start().await;
        poller.stop().await;
        // Second stop is a no-op.
        poller.stop().await;
    }
}
