//! Core data models for the GPP agent

use serde::{Deserialize, Serialize};

/// Operating system process id
pub type Pid = i32;

/// Placeholder identifier used when a reaped child is not tracked
pub const UNKNOWN_IDENTIFIER: &str = "Unknown";

/// Identifies a launched child's owning application and component instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComponentDescription {
    pub app_name: String,
    pub identifier: String,
}

impl ComponentDescription {
    pub fn new(app_name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            identifier: identifier.into(),
        }
    }
}

/// Capacity thresholds, both configured and per-cycle modified
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum idle CPU percentage before the host is considered busy
    #[serde(default = "default_cpu_idle")]
    pub cpu_idle: f64,
    /// Minimum free physical memory in bytes
    #[serde(default = "default_mem_free")]
    pub mem_free: i64,
    /// Maximum NIC throughput as a percentage of link capacity
    #[serde(default = "default_nic_usage")]
    pub nic_usage: f64,
}

fn default_cpu_idle() -> f64 {
    10.0
}

fn default_mem_free() -> i64 {
    100 * 1024 * 1024
}

fn default_nic_usage() -> f64 {
    80.0
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu_idle: default_cpu_idle(),
            mem_free: default_mem_free(),
            nic_usage: default_nic_usage(),
        }
    }
}

/// Aggregate host state refreshed once per scheduler cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemMonitorSnapshot {
    pub idle_cpu_percent: f64,
    pub idle_cpu_average: f64,
    pub physical_memory_free: u64,
    pub physical_memory_total: u64,
    pub processor_cores: u32,
    pub load_average: f64,
    pub timestamp: i64,
}

/// Device usage state derived every cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UsageState {
    #[default]
    Idle,
    Active,
    Busy,
}

impl UsageState {
    /// Numeric form used for the usage state gauge
    pub fn as_gauge(&self) -> i64 {
        match self {
            UsageState::Idle => 0,
            UsageState::Active => 1,
            UsageState::Busy => 2,
        }
    }
}

impl std::fmt::Display for UsageState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsageState::Idle => write!(f, "IDLE"),
            UsageState::Active => write!(f, "ACTIVE"),
            UsageState::Busy => write!(f, "BUSY"),
        }
    }
}

/// Request for exclusive NIC bandwidth
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NicAllocation {
    pub identifier: String,
    /// Requested rate in Mbps
    pub data_rate: f64,
    /// Payload size in bytes
    #[serde(default)]
    pub data_size: i64,
    /// Interface must support multicast
    #[serde(default)]
    pub multicast_support: bool,
    /// Interface must be up and reachable over IP
    #[serde(default)]
    pub ip_addressable: bool,
    /// Interface name, empty or "*" for any
    #[serde(default)]
    pub interface: String,
}

/// A granted NIC allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NicAllocationStatus {
    pub identifier: String,
    pub data_rate: f64,
    pub data_size: i64,
    pub multicast_support: bool,
    pub ip_addressable: bool,
    /// Interface the allocation was granted on
    pub interface: String,
}

impl NicAllocationStatus {
    pub fn granted(request: &NicAllocation, interface: &str) -> Self {
        Self {
            identifier: request.identifier.clone(),
            data_rate: request.data_rate,
            data_size: request.data_size,
            multicast_support: request.multicast_support,
            ip_addressable: request.ip_addressable,
            interface: interface.to_string(),
        }
    }
}

/// Per-interface statistics published by the NIC facade
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NicMetrics {
    pub interface: String,
    pub link_speed_mbps: f64,
    pub multicast_support: bool,
    pub ip_addressable: bool,
    pub throughput_mbps: f64,
    pub throughput_percent: f64,
    pub rate_allocated_mbps: f64,
    pub rate_available_mbps: f64,
}

/// Direction of a threshold crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThresholdEventType {
    ThresholdExceeded,
    ThresholdNotExceeded,
}

impl std::fmt::Display for ThresholdEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThresholdEventType::ThresholdExceeded => write!(f, "THRESHOLD_EXCEEDED"),
            ThresholdEventType::ThresholdNotExceeded => write!(f, "THRESHOLD_NOT_EXCEEDED"),
        }
    }
}

/// Emitted by a threshold monitor on a crossing transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEvent {
    pub source_id: String,
    pub resource_id: String,
    pub threshold_class: String,
    pub event_type: ThresholdEventType,
    pub threshold_value: f64,
    pub measured_value: f64,
    pub message: String,
    pub timestamp: i64,
}

/// Abnormal child termination notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildTerminationEvent {
    pub device_id: String,
    pub component_id: String,
    pub application_id: String,
}

/// Everything the device pushes onto the external event channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeviceEvent {
    Threshold(ThresholdEvent),
    ChildTerminated(ChildTerminationEvent),
}
