//! Host telemetry sampling via `sysinfo`.

use std::ffi::OsString;

use async_trait::async_trait;
use sysinfo::{Components, Disks, ProcessesToUpdate, System};
use tracing::debug;

use braid_core::error::TelemetryError;
use braid_core::ports::{ServiceProbe, TelemetryProbe};
use braid_core::telemetry::{
    usage_pct, CpuStats, RamStats, ServiceStatus, StorageStats, SystemSnapshot,
};

const MIB: u64 = 1024 * 1024;
const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Samples RAM, CPU temperature, storage and the inference service's
/// process table entry.
///
/// `sysinfo` calls are blocking, so every sample runs on the blocking
/// thread pool.
pub struct SysinfoProbe {
    service_name: String,
}

impl SysinfoProbe {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new("ollama")
    }
}

#[async_trait]
impl TelemetryProbe for SysinfoProbe {
    async fn sample(&self) -> Result<SystemSnapshot, TelemetryError> {
        let service_name = self.service_name.clone();
        tokio::task::spawn_blocking(move || sample_blocking(&service_name))
            .await
            .map_err(|e| TelemetryError::Sample(e.to_string()))
    }
}

#[async_trait]
impl ServiceProbe for SysinfoProbe {
    async fn is_running(&self) -> bool {
        let service_name = self.service_name.clone();
        tokio::task::spawn_blocking(move || service_running(&service_name))
            .await
            .unwrap_or(false)
    }
}

fn sample_blocking(service_name: &str) -> SystemSnapshot {
    let mut sys = System::new();
    sys.refresh_memory();

    let total_mib = sys.total_memory() / MIB;
    let used_mib = sys.used_memory() / MIB;
    #[allow(clippy::cast_precision_loss)]
    let ram = RamStats {
        total: total_mib,
        used: used_mib,
        usage_pct: usage_pct(used_mib as f64, total_mib as f64),
    };

    let cpu = CpuStats {
        temperature_c: cpu_temperature().unwrap_or(0),
    };

    let storage = root_storage();

    let service_status = if service_running(service_name) {
        ServiceStatus::Running
    } else {
        ServiceStatus::Stopped
    };

    SystemSnapshot {
        ram,
        cpu,
        storage,
        service_status,
    }
}

/// Pick a CPU-ish sensor if one is labelled as such, otherwise the
/// hottest sensor on the box.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn cpu_temperature() -> Option<u32> {
    let components = Components::new_with_refreshed_list();
    let mut hottest: Option<f32> = None;
    for component in components.list() {
        let Some(temp) = component.temperature() else {
            continue;
        };
        let label = component.label().to_lowercase();
        if label.contains("cpu") || label.contains("coretemp") || label.contains("k10temp") {
            return Some(temp.round().max(0.0) as u32);
        }
        if hottest.is_none_or(|h| temp > h) {
            hottest = Some(temp);
        }
    }
    hottest.map(|t| t.round().max(0.0) as u32)
}

#[allow(clippy::cast_precision_loss)]
fn root_storage() -> StorageStats {
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == std::path::Path::new("/"))
        .or_else(|| disks.list().first());

    let Some(disk) = disk else {
        debug!("no disks visible, reporting empty storage stats");
        return StorageStats {
            total: 0.0,
            used: 0.0,
            available: 0.0,
            usage_pct: 0,
        };
    };

    let total = disk.total_space() as f64 / GIB;
    let available = disk.available_space() as f64 / GIB;
    let used = total - available;
    StorageStats {
        total: round1(total),
        used: round1(used),
        available: round1(available),
        usage_pct: usage_pct(used, total),
    }
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn service_running(service_name: &str) -> bool {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    let needle = OsString::from(service_name);
    let found = sys.processes_by_name(&needle).next().is_some();
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sample_is_internally_consistent() {
        let snapshot = SysinfoProbe::default().sample().await.unwrap();
        assert!(snapshot.ram.total >= snapshot.ram.used);
        assert!(snapshot.ram.usage_pct <= 100);
        assert!(snapshot.storage.usage_pct <= 100);
    }

    #[test]
    fn round1_keeps_one_decimal() {
        assert!((round1(123.456) - 123.5).abs() < f64::EPSILON);
    }
}
