//! Ports implemented by the runtime and web adapters.
//!
//! Core defines the trait, `braid-runtime` supplies the real
//! implementation, and `braid-axum` consumes it through `Arc<dyn _>` so
//! handlers and tests can swap in stubs.

use async_trait::async_trait;
use chrono::Utc;

use crate::error::TelemetryError;
use crate::telemetry::{CpuTemperature, RamUsage, SystemSnapshot, TelemetryTick};
use crate::wire::Envelope;

/// Probe for whether the inference service process is alive on the host.
#[async_trait]
pub trait ServiceProbe: Send + Sync {
    async fn is_running(&self) -> bool;
}

/// Source of host telemetry snapshots.
#[async_trait]
pub trait TelemetryProbe: Send + Sync {
    /// Take one full snapshot of RAM, CPU temperature, storage and
    /// service status.
    async fn sample(&self) -> Result<SystemSnapshot, TelemetryError>;

    /// Take one reduced, timestamped tick for periodic streaming.
    async fn tick(&self) -> Result<TelemetryTick, TelemetryError> {
        let snapshot = self.sample().await?;
        Ok(TelemetryTick {
            timestamp: Utc::now(),
            ram: RamUsage {
                usage: snapshot.ram.usage_pct,
            },
            cpu: CpuTemperature {
                temperature: snapshot.cpu.temperature_c,
            },
        })
    }
}

/// Sink for envelopes fanned out to connected clients.
///
/// The periodic stats poller pushes through this without knowing what a
/// WebSocket is.
#[async_trait]
pub trait SnapshotEmitter: Send + Sync {
    async fn emit(&self, envelope: Envelope);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{CpuStats, RamStats, ServiceStatus, StorageStats};

    struct FixedProbe;

    #[async_trait]
    impl TelemetryProbe for FixedProbe {
        async fn sample(&self) -> Result<SystemSnapshot, TelemetryError> {
            Ok(SystemSnapshot {
                ram: RamStats {
                    total: 8192,
                    used: 4096,
                    usage_pct: 50,
                },
                cpu: CpuStats { temperature_c: 61 },
                storage: StorageStats {
                    total: 100.0,
                    used: 40.0,
                    available: 60.0,
                    usage_pct: 40,
                },
                service_status: ServiceStatus::Running,
            })
        }
    }

    #[tokio::test]
    async fn tick_derives_from_snapshot() {
        let tick = FixedProbe.tick().await.unwrap();
        assert_eq!(tick.ram.usage, 50);
        assert_eq!(tick.cpu.temperature, 61);
    }
}
