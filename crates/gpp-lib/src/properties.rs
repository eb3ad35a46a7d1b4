//! Device properties configured by the host

use crate::models::Thresholds;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Configurable properties of the GPP device
#[derive(Debug, Clone, Deserialize)]
pub struct GppProperties {
    #[serde(default)]
    pub thresholds: Thresholds,

    /// Fraction of one core reserved for every launched component until its
    /// application has started
    #[serde(default = "default_reserved_capacity")]
    pub reserved_capacity_per_component: f64,

    /// Share of NIC link capacity available to allocations, in percent
    #[serde(default = "default_max_throughput")]
    pub maximum_throughput_percentage: f64,

    #[serde(default = "default_load_capacity_per_core")]
    pub load_capacity_per_core: f64,

    /// Share of the load capacity available to allocations, in percent
    #[serde(default = "default_load_threshold")]
    pub load_threshold: f64,

    /// Scheduler cadence in milliseconds
    #[serde(default = "default_cycle_time")]
    pub threshold_cycle_time_ms: u64,

    /// Processor count, detected from the host when unset
    #[serde(default)]
    pub processor_cores: Option<u32>,

    /// Interfaces to monitor, all non-loopback interfaces when empty
    #[serde(default)]
    pub nic_interfaces: Vec<String>,

    /// Wrap launched processes in a detached screen session
    #[serde(default)]
    pub use_screen: bool,

    #[serde(default = "default_proc_root")]
    pub proc_root: PathBuf,

    #[serde(default = "default_sys_root")]
    pub sys_root: PathBuf,
}

fn default_reserved_capacity() -> f64 {
    0.1
}

fn default_max_throughput() -> f64 {
    80.0
}

fn default_load_capacity_per_core() -> f64 {
    1.0
}

fn default_load_threshold() -> f64 {
    80.0
}

fn default_cycle_time() -> u64 {
    1000
}

fn default_proc_root() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_sys_root() -> PathBuf {
    PathBuf::from("/sys")
}

impl Default for GppProperties {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            reserved_capacity_per_component: default_reserved_capacity(),
            maximum_throughput_percentage: default_max_throughput(),
            load_capacity_per_core: default_load_capacity_per_core(),
            load_threshold: default_load_threshold(),
            threshold_cycle_time_ms: default_cycle_time(),
            processor_cores: None,
            nic_interfaces: Vec::new(),
            use_screen: false,
            proc_root: default_proc_root(),
            sys_root: default_sys_root(),
        }
    }
}

impl GppProperties {
    /// Scheduler cadence
    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.threshold_cycle_time_ms.max(1))
    }

    /// Configured core count, or the host's available parallelism
    pub fn resolve_processor_cores(&self) -> u32 {
        self.processor_cores.filter(|c| *c > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_properties_default() {
        let props = GppProperties::default();
        assert_eq!(props.thresholds.cpu_idle, 10.0);
        assert_eq!(props.thresholds.mem_free, 100 * 1024 * 1024);
        assert_eq!(props.cycle_time(), Duration::from_secs(1));
        assert_eq!(props.proc_root, PathBuf::from("/proc"));
    }

    #[test]
    fn test_properties_partial_json() {
        let props: GppProperties = serde_json::from_str(
            r#"{"thresholds": {"cpu_idle": 25.0}, "processor_cores": 4}"#,
        )
        .unwrap();

        assert_eq!(props.thresholds.cpu_idle, 25.0);
        assert_eq!(props.thresholds.nic_usage, 80.0);
        assert_eq!(props.resolve_processor_cores(), 4);
        assert_eq!(props.load_threshold, 80.0);
    }

    #[test]
    fn test_zero_cores_falls_back_to_host() {
        let props = GppProperties {
            processor_cores: Some(0),
            ..Default::default()
        };
        assert!(props.resolve_processor_cores() >= 1);
    }
}
