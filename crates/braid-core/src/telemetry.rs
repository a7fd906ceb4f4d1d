//! Host telemetry shapes.
//!
//! Field names are camelCase on the wire for frontend consumption, the same
//! convention as the rest of the protocol. RAM figures are MiB, storage
//! figures are GiB.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether the inference service process is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamStats {
    /// Total RAM in MiB.
    pub total: u64,
    /// Used RAM in MiB.
    pub used: u64,
    #[serde(rename = "usagePct")]
    pub usage_pct: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuStats {
    /// CPU temperature in whole degrees Celsius; 0 when no sensor is
    /// readable.
    #[serde(rename = "temperatureC")]
    pub temperature_c: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    /// Total space in GiB.
    pub total: f64,
    /// Used space in GiB.
    pub used: f64,
    /// Available space in GiB.
    pub available: f64,
    #[serde(rename = "usagePct")]
    pub usage_pct: u8,
}

/// One full telemetry snapshot, as returned by the snapshot endpoint and
/// pushed over the WebSocket channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub ram: RamStats,
    pub cpu: CpuStats,
    pub storage: StorageStats,
    #[serde(rename = "serviceStatus")]
    pub service_status: ServiceStatus,
}

/// The reduced per-tick shape used by the telemetry SSE stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryTick {
    pub timestamp: DateTime<Utc>,
    pub ram: RamUsage,
    pub cpu: CpuTemperature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RamUsage {
    /// Used RAM as a clamped percentage.
    pub usage: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuTemperature {
    /// Whole degrees Celsius.
    pub temperature: u32,
}

/// Compute a usage percentage, rounded and clamped to `0..=100`.
///
/// Raw samples can momentarily show `used > total` when the two counters
/// are read under a race; the clamp keeps the surfaced value in range.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn usage_pct(used: f64, total: f64) -> u8 {
    if total <= 0.0 {
        return 0;
    }
    ((used / total) * 100.0).round().clamp(0.0, 100.0) as u8
}
