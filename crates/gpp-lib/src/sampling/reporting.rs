//! System monitor snapshot and the reporting sink that fills it

use super::{write_lock, CpuUsageAccumulator, LoadAverageState, MemoryState, Reporting};
use crate::error::Result;
use crate::models::SystemMonitorSnapshot;
use crate::observability::GppMetrics;
use std::sync::{Arc, RwLock};

/// Shared handle to the latest system monitor snapshot
#[derive(Clone, Default)]
pub struct SystemMonitor {
    snapshot: Arc<RwLock<SystemMonitorSnapshot>>,
}

impl SystemMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SystemMonitorSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn idle_cpu_percent(&self) -> f64 {
        self.snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .idle_cpu_percent
    }

    pub fn physical_memory_free(&self) -> u64 {
        self.snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .physical_memory_free
    }

    /// Whether a reporting sink has published at least once
    pub fn is_published(&self) -> bool {
        self.snapshot
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .timestamp
            > 0
    }

    /// Replace the snapshot, failing if the lock is poisoned
    pub fn publish(&self, snapshot: SystemMonitorSnapshot) -> Result<()> {
        *write_lock(&self.snapshot, "system monitor lock")? = snapshot;
        Ok(())
    }
}

/// Copies CPU, memory and load statistics into the system monitor
pub struct SystemMonitorReporting {
    cpu: Arc<CpuUsageAccumulator>,
    memory: Arc<MemoryState>,
    load: Arc<LoadAverageState>,
    monitor: SystemMonitor,
    processor_cores: u32,
    metrics: GppMetrics,
}

impl SystemMonitorReporting {
    pub fn new(
        cpu: Arc<CpuUsageAccumulator>,
        memory: Arc<MemoryState>,
        load: Arc<LoadAverageState>,
        monitor: SystemMonitor,
        processor_cores: u32,
        metrics: GppMetrics,
    ) -> Self {
        Self {
            cpu,
            memory,
            load,
            monitor,
            processor_cores,
            metrics,
        }
    }
}

impl Reporting for SystemMonitorReporting {
    fn report(&self) -> Result<()> {
        let snapshot = SystemMonitorSnapshot {
            idle_cpu_percent: self.cpu.get_idle_percent(),
            idle_cpu_average: self.cpu.get_idle_average(),
            physical_memory_free: self.memory.physical_memory_free(),
            physical_memory_total: self.memory.physical_memory_total(),
            processor_cores: self.processor_cores,
            load_average: self.load.load_average(),
            timestamp: chrono::Utc::now().timestamp(),
        };

        self.metrics.set_idle_cpu(snapshot.idle_cpu_percent);
        self.metrics.set_memory_free(snapshot.physical_memory_free);
        self.monitor.publish(snapshot)
    }
}
