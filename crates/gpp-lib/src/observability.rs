//! Observability infrastructure for the GPP agent
//!
//! Provides:
//! - Prometheus metrics (cycle latency, host utilization, reservations, NIC usage)
//! - Structured JSON logging with tracing

use crate::models::{ChildTerminationEvent, ThresholdEvent, ThresholdEventType, UsageState};
use prometheus::{
    register_gauge, register_gauge_vec, register_histogram, register_int_counter,
    register_int_gauge, Gauge, GaugeVec, Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for cycle latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<GppMetricsInner> = OnceLock::new();

struct GppMetricsInner {
    cycle_latency_seconds: Histogram,
    cycles_aborted: IntCounter,
    idle_cpu_percent: Gauge,
    memory_free_bytes: IntGauge,
    usage_state: IntGauge,
    reservations: GaugeVec,
    nic_throughput_mbps: GaugeVec,
    nic_allocated_mbps: GaugeVec,
    threshold_events: IntCounter,
    child_terminations: IntCounter,
}

impl GppMetricsInner {
    fn new() -> Self {
        Self {
            cycle_latency_seconds: register_histogram!(
                "gpp_cycle_latency_seconds",
                "Time spent in one scheduler cycle",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_latency_seconds"),

            cycles_aborted: register_int_counter!(
                "gpp_cycles_aborted_total",
                "Scheduler cycles aborted by a resource acquisition failure"
            )
            .expect("Failed to register cycles_aborted"),

            idle_cpu_percent: register_gauge!(
                "gpp_idle_cpu_percent",
                "Idle CPU percentage over the last cycle"
            )
            .expect("Failed to register idle_cpu_percent"),

            memory_free_bytes: register_int_gauge!(
                "gpp_memory_free_bytes",
                "Physical memory available to new workloads"
            )
            .expect("Failed to register memory_free_bytes"),

            usage_state: register_int_gauge!(
                "gpp_usage_state",
                "Device usage state (0=idle, 1=active, 2=busy)"
            )
            .expect("Failed to register usage_state"),

            reservations: register_gauge_vec!(
                "gpp_reservations",
                "Process reservations by list",
                &["list"]
            )
            .expect("Failed to register reservations"),

            nic_throughput_mbps: register_gauge_vec!(
                "gpp_nic_throughput_mbps",
                "Measured throughput per interface",
                &["interface"]
            )
            .expect("Failed to register nic_throughput_mbps"),

            nic_allocated_mbps: register_gauge_vec!(
                "gpp_nic_allocated_mbps",
                "Allocated rate per interface",
                &["interface"]
            )
            .expect("Failed to register nic_allocated_mbps"),

            threshold_events: register_int_counter!(
                "gpp_threshold_events_total",
                "Threshold crossing events emitted"
            )
            .expect("Failed to register threshold_events"),

            child_terminations: register_int_counter!(
                "gpp_child_terminations_total",
                "Child termination notifications emitted"
            )
            .expect("Failed to register child_terminations"),
        }
    }
}

/// Lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct GppMetrics {
    _private: (),
}

impl Default for GppMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GppMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(GppMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &GppMetricsInner {
        GLOBAL_METRICS.get_or_init(GppMetricsInner::new)
    }

    pub fn observe_cycle_latency(&self, duration_secs: f64) {
        self.inner().cycle_latency_seconds.observe(duration_secs);
    }

    pub fn inc_cycles_aborted(&self) {
        self.inner().cycles_aborted.inc();
    }

    pub fn set_idle_cpu(&self, percent: f64) {
        self.inner().idle_cpu_percent.set(percent);
    }

    pub fn set_memory_free(&self, bytes: u64) {
        self.inner().memory_free_bytes.set(bytes as i64);
    }

    pub fn set_usage_state(&self, state: UsageState) {
        self.inner().usage_state.set(state.as_gauge());
    }

    pub fn set_reservations(&self, active: usize, tabled: usize) {
        let reservations = &self.inner().reservations;
        reservations.with_label_values(&["active"]).set(active as f64);
        reservations.with_label_values(&["tabled"]).set(tabled as f64);
    }

    pub fn set_nic_throughput(&self, interface: &str, mbps: f64) {
        self.inner()
            .nic_throughput_mbps
            .with_label_values(&[interface])
            .set(mbps);
    }

    pub fn set_nic_allocated(&self, interface: &str, mbps: f64) {
        self.inner()
            .nic_allocated_mbps
            .with_label_values(&[interface])
            .set(mbps);
    }

    pub fn inc_threshold_events(&self) {
        self.inner().threshold_events.inc();
    }

    pub fn inc_child_terminations(&self) {
        self.inner().child_terminations.inc();
    }
}

/// Structured logger for device events
#[derive(Clone)]
pub struct StructuredLogger {
    device_id: String,
}

impl StructuredLogger {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    pub fn log_startup(&self, version: &str, processor_cores: u32) {
        info!(
            event = "agent_started",
            device_id = %self.device_id,
            agent_version = %version,
            processor_cores = processor_cores,
            "GPP agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            device_id = %self.device_id,
            reason = %reason,
            "GPP agent shutting down"
        );
    }

    pub fn log_threshold_event(&self, event: &ThresholdEvent) {
        match event.event_type {
            ThresholdEventType::ThresholdExceeded => warn!(
                event = "threshold_event",
                device_id = %self.device_id,
                resource_id = %event.resource_id,
                threshold_class = %event.threshold_class,
                event_type = %event.event_type,
                threshold = event.threshold_value,
                measured = event.measured_value,
                "{}",
                event.message
            ),
            ThresholdEventType::ThresholdNotExceeded => info!(
                event = "threshold_event",
                device_id = %self.device_id,
                resource_id = %event.resource_id,
                threshold_class = %event.threshold_class,
                event_type = %event.event_type,
                threshold = event.threshold_value,
                measured = event.measured_value,
                "{}",
                event.message
            ),
        }
    }

    pub fn log_child_termination(&self, pid: i32, event: &ChildTerminationEvent) {
        info!(
            event = "child_terminated",
            device_id = %self.device_id,
            pid = pid,
            component_id = %event.component_id,
            application_id = %event.application_id,
            "Child process terminated"
        );
    }

    pub fn log_usage_state_change(&self, previous: UsageState, current: UsageState) {
        info!(
            event = "usage_state_changed",
            device_id = %self.device_id,
            previous = %previous,
            current = %current,
            "Usage state changed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpp_metrics_creation() {
        let metrics = GppMetrics::new();

        metrics.observe_cycle_latency(0.001);
        metrics.inc_cycles_aborted();
        metrics.set_idle_cpu(42.0);
        metrics.set_memory_free(1024);
        metrics.set_usage_state(UsageState::Busy);
        metrics.set_reservations(2, 1);
        metrics.set_nic_throughput("eth0", 12.5);
        metrics.set_nic_allocated("eth0", 100.0);
        metrics.inc_threshold_events();
        metrics.inc_child_terminations();

        // A second handle shares the registered metrics
        let _again = GppMetrics::new();
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("gpp-1");
        assert_eq!(logger.device_id, "gpp-1");
    }
}
