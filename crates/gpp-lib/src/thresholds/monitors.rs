//! Monitors for the resources the device watches

use super::{Direction, GenericThresholdMonitor};

pub const CPU_RESOURCE_ID: &str = "cpu";
pub const CPU_IDLE_CLASS: &str = "CPU_IDLE";
pub const MEMORY_RESOURCE_ID: &str = "physical_ram";
pub const MEMORY_FREE_CLASS: &str = "MEMORY_FREE";
pub const NIC_THROUGHPUT_CLASS: &str = "NIC_THROUGHPUT";

/// Fires when idle CPU percentage drops below the threshold
pub fn cpu_idle_monitor<T, M>(source_id: &str, threshold: T, measured: M) -> GenericThresholdMonitor
where
    T: Fn() -> f64 + Send + Sync + 'static,
    M: Fn() -> f64 + Send + Sync + 'static,
{
    GenericThresholdMonitor::new(
        source_id,
        CPU_RESOURCE_ID,
        CPU_IDLE_CLASS,
        Direction::Below,
        Box::new(threshold),
        Box::new(measured),
    )
}

/// Fires when free physical memory (bytes) drops below the threshold
pub fn free_memory_monitor<T, M>(
    source_id: &str,
    threshold: T,
    measured: M,
) -> GenericThresholdMonitor
where
    T: Fn() -> f64 + Send + Sync + 'static,
    M: Fn() -> f64 + Send + Sync + 'static,
{
    GenericThresholdMonitor::new(
        source_id,
        MEMORY_RESOURCE_ID,
        MEMORY_FREE_CLASS,
        Direction::Below,
        Box::new(threshold),
        Box::new(measured),
    )
}

/// Fires when an interface's throughput percentage rises above the threshold
pub fn nic_throughput_monitor<T, M>(
    source_id: &str,
    interface: &str,
    threshold: T,
    measured: M,
) -> GenericThresholdMonitor
where
    T: Fn() -> f64 + Send + Sync + 'static,
    M: Fn() -> f64 + Send + Sync + 'static,
{
    GenericThresholdMonitor::new(
        source_id,
        interface,
        NIC_THROUGHPUT_CLASS,
        Direction::Above,
        Box::new(threshold),
        Box::new(measured),
    )
}
