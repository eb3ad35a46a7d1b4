//! The GPP device
//!
//! Binds the engine to its host:
//! - process launch and termination with reservation bookkeeping
//! - capacity allocation entry points (NIC, load, memory)
//! - child-death notification
//! - usage state classification and threshold event forwarding
//! - runtime property changes

mod launch;


pub use launch::{
    application_name, split_component_id, APPLICATION_NAME, COMPONENT_IDENTIFIER, NAME_BINDING,
};

use crate::error::{GppError, Result};
use crate::host::{ApplicationRegistry, EventChannel, ExecuteRequest, ProcessExecutor};
use crate::ledger::ReservationLedger;
use crate::models::{
    ChildTerminationEvent, ComponentDescription, DeviceEvent, NicAllocation,
    NicAllocationStatus, NicMetrics, Pid, SystemMonitorSnapshot, ThresholdEvent, Thresholds,
    UsageState, UNKNOWN_IDENTIFIER,
};
use crate::nic::NicFacade;
use crate::observability::{GppMetrics, StructuredLogger};
use crate::properties::GppProperties;
use crate::sampling::{procfs, SystemMonitor};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

const NIC_ALLOCATION: &str = "nic_allocation";
const LOAD_CAPACITY: &str = "load_capacity";
const MEMORY_CAPACITY: &str = "mem_capacity";

/// Load admission: `current + delta` must fit under the scaled core capacity
pub fn can_allocate_load(
    current_load: f64,
    delta: f64,
    processor_cores: u32,
    load_capacity_per_core: f64,
    load_threshold: f64,
) -> bool {
    current_load + delta
        <= processor_cores as f64 * load_capacity_per_core * (load_threshold / 100.0)
}

/// Numeric properties must be finite and non-negative
fn check_property(property: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(GppError::InvalidProperty {
            property,
            reason: format!("{value} is not a finite, non-negative number"),
        })
    }
}

fn check_thresholds(thresholds: &Thresholds) -> Result<()> {
    check_property("thresholds.cpu_idle", thresholds.cpu_idle)?;
    check_property("thresholds.nic_usage", thresholds.nic_usage)?;
    if thresholds.mem_free < 0 {
        return Err(GppError::InvalidProperty {
            property: "thresholds.mem_free",
            reason: format!("{} is negative", thresholds.mem_free),
        });
    }
    Ok(())
}

/// Properties that may change while the device runs
#[derive(Debug, Clone)]
struct Tunables {
    thresholds: Thresholds,
    reserved_capacity_per_component: f64,
    idle_capacity_modifier: f64,
    load_capacity_per_core: f64,
    load_threshold: f64,
    use_screen: bool,
}

/// Fields accepted by a property update; absent fields are unchanged
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PropertyUpdate {
    pub thresholds: Option<Thresholds>,
    pub reserved_capacity_per_component: Option<f64>,
    pub maximum_throughput_percentage: Option<f64>,
    pub load_threshold: Option<f64>,
}

/// Point-in-time view of the device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub label: String,
    pub usage_state: UsageState,
    pub system: SystemMonitorSnapshot,
    pub thresholds: Thresholds,
    pub modified_thresholds: Thresholds,
    pub mem_capacity: i64,
    pub active_reservations: Vec<ComponentDescription>,
    pub tabled_reservations: Vec<ComponentDescription>,
    pub pids: Vec<Pid>,
    pub nic_metrics: Vec<NicMetrics>,
    pub nic_allocations: Vec<NicAllocationStatus>,
}

pub struct GppDevice {
    device_id: String,
    label: String,
    processor_cores: u32,
    proc_root: PathBuf,
    binary_dir: PathBuf,
    tunables: RwLock<Tunables>,
    modified_thresholds: RwLock<Thresholds>,
    mem_capacity: RwLock<i64>,
    usage_state: RwLock<UsageState>,
    ledger: ReservationLedger,
    nic: Arc<NicFacade>,
    monitor: SystemMonitor,
    executor: Arc<dyn ProcessExecutor>,
    registry: Arc<dyn ApplicationRegistry>,
    events: Arc<dyn EventChannel>,
    logger: StructuredLogger,
    metrics: GppMetrics,
}

impl GppDevice {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn processor_cores(&self) -> u32 {
        self.processor_cores
    }

    pub fn ledger(&self) -> &ReservationLedger {
        &self.ledger
    }

    pub fn nic(&self) -> &Arc<NicFacade> {
        &self.nic
    }

    pub fn monitor(&self) -> &SystemMonitor {
        &self.monitor
    }

    pub fn metrics(&self) -> &GppMetrics {
        &self.metrics
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    fn tunables(&self) -> Tunables {
        self.tunables
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn update_tunables(&self, apply: impl FnOnce(&mut Tunables)) {
        let mut tunables = self.tunables.write().unwrap_or_else(|p| p.into_inner());
        apply(&mut tunables);
    }

    pub fn thresholds(&self) -> Thresholds {
        self.tunables().thresholds
    }

    pub fn modified_thresholds(&self) -> Thresholds {
        *self
            .modified_thresholds
            .read()
            .unwrap_or_else(|p| p.into_inner())
    }

    pub fn reserved_capacity_per_component(&self) -> f64 {
        self.tunables().reserved_capacity_per_component
    }

    pub fn idle_capacity_modifier(&self) -> f64 {
        self.tunables().idle_capacity_modifier
    }

    pub fn usage_state(&self) -> UsageState {
        *self.usage_state.read().unwrap_or_else(|p| p.into_inner())
    }

    pub fn mem_capacity(&self) -> i64 {
        *self.mem_capacity.read().unwrap_or_else(|p| p.into_inner())
    }

    // ---- process lifecycle ----

    /// Launch a child through the executor and reserve capacity for it
    pub async fn execute(&self, mut request: ExecuteRequest) -> Result<Pid> {
        let component_id = request
            .parameters
            .get(COMPONENT_IDENTIFIER)
            .cloned()
            .unwrap_or_default();
        let app_name = application_name(&request.parameters);

        if self.tunables().use_screen {
            let mut wrapper = launch::screen_wrapper(&self.binary_dir, &request.parameters)?;
            wrapper.append(&mut request.prepend_args);
            request.prepend_args = wrapper;
        }

        let pid = self.executor.execute(&request).await?;
        let desc = ComponentDescription::new(app_name, component_id);
        info!(
            pid = pid,
            app = %desc.app_name,
            component = %desc.identifier,
            binary = %request.name,
            "Launched child process"
        );
        if !self.ledger.record_launch(pid, desc)? {
            info!(pid = pid, "Child exited before its launch was recorded");
        }
        self.publish_reservations();
        Ok(pid)
    }

    /// Stop a child; bookkeeping is released only once the executor succeeds
    pub async fn terminate(&self, pid: Pid) -> Result<()> {
        self.executor.terminate(pid).await?;
        if let Some(desc) = self.ledger.take_process(pid)? {
            info!(
                pid = pid,
                app = %desc.app_name,
                component = %desc.identifier,
                "Terminated child process"
            );
        }
        self.publish_reservations();
        Ok(())
    }

    /// Notify listeners that a child exited, releasing whatever it held
    pub fn handle_child_exit(&self, pid: Pid) {
        let desc = self.ledger.take_exited(pid).unwrap_or_else(|e| {
            warn!(pid = pid, error = %e, "Could not look up exited child");
            None
        });
        let (component_id, application_id) = match desc {
            Some(desc) => (desc.identifier, desc.app_name),
            None => (UNKNOWN_IDENTIFIER.to_string(), UNKNOWN_IDENTIFIER.to_string()),
        };

        let event = ChildTerminationEvent {
            device_id: self.device_id.clone(),
            component_id,
            application_id,
        };
        self.logger.log_child_termination(pid, &event);
        self.metrics.inc_child_terminations();
        if let Err(e) = self.events.push(DeviceEvent::ChildTerminated(event)) {
            warn!(pid = pid, error = %e, "Unable to send a child termination notification");
        }
        self.publish_reservations();
    }

    fn publish_reservations(&self) {
        if let (Ok(active), Ok(tabled)) = (self.ledger.active_count(), self.ledger.tabled_count()) {
            self.metrics.set_reservations(active, tabled);
        }
    }

    // ---- capacity allocation ----

    pub fn allocate_nic(&self, request: &NicAllocation) -> Result<NicAllocationStatus> {
        debug!(
            identifier = %request.identifier,
            data_rate = request.data_rate,
            data_size = request.data_size,
            multicast_support = request.multicast_support,
            ip_addressable = request.ip_addressable,
            interface = %request.interface,
            "Allocating nic_allocation"
        );
        self.nic
            .allocate_capacity(request)
            .map_err(|e| GppError::invalid_capacity(NIC_ALLOCATION, e, request))
    }

    pub fn deallocate_nic(&self, request: &NicAllocation) -> Result<NicAllocationStatus> {
        debug!(identifier = %request.identifier, "Deallocating nic_allocation");
        self.nic
            .deallocate_capacity(request)
            .map_err(|e| GppError::invalid_capacity(NIC_ALLOCATION, e, request))
    }

    /// Point-in-time load gate against the current one-minute load average
    pub async fn allocate_load(&self, delta: f64) -> Result<bool> {
        if !delta.is_finite() {
            return Err(GppError::invalid_capacity(LOAD_CAPACITY, "non-finite load", &delta));
        }
        let current = procfs::read_loadavg(&self.proc_root)
            .await
            .map_err(|e| GppError::invalid_capacity(LOAD_CAPACITY, e, &delta))?;

        let tunables = self.tunables();
        let granted = can_allocate_load(
            current,
            delta,
            self.processor_cores,
            tunables.load_capacity_per_core,
            tunables.load_threshold,
        );
        debug!(current = current, delta = delta, granted = granted, "Load capacity check");
        Ok(granted)
    }

    /// Load capacity is never recorded, so there is nothing to release
    pub fn deallocate_load(&self, _delta: f64) {}

    /// Accepts iff the request fits in the memory free at the last cycle
    pub fn allocate_mem_capacity(&self, bytes: i64) -> Result<bool> {
        if bytes < 0 {
            return Err(GppError::invalid_capacity(MEMORY_CAPACITY, "negative size", &bytes));
        }
        Ok(bytes <= self.mem_capacity())
    }

    // ---- properties ----

    pub fn set_reserved_capacity_per_component(&self, reserved: f64) -> Result<()> {
        check_property("reserved_capacity_per_component", reserved)?;
        let cores = self.processor_cores.max(1) as f64;
        self.update_tunables(|t| {
            t.reserved_capacity_per_component = reserved;
            t.idle_capacity_modifier = reserved / cores;
        });
        info!(reserved = reserved, "Updated reserved capacity per component");
        Ok(())
    }

    pub fn set_thresholds(&self, thresholds: Thresholds) -> Result<()> {
        check_thresholds(&thresholds)?;
        self.update_tunables(|t| t.thresholds = thresholds);
        info!(
            cpu_idle = thresholds.cpu_idle,
            mem_free = thresholds.mem_free,
            nic_usage = thresholds.nic_usage,
            "Updated thresholds"
        );
        Ok(())
    }

    pub fn set_maximum_throughput_percentage(&self, percentage: f64) -> Result<()> {
        check_property("maximum_throughput_percentage", percentage)?;
        self.nic.set_maximum_throughput_percentage(percentage);
        Ok(())
    }

    pub fn set_load_threshold(&self, threshold: f64) -> Result<()> {
        check_property("load_threshold", threshold)?;
        self.update_tunables(|t| t.load_threshold = threshold);
        info!(load_threshold = threshold, "Updated load threshold");
        Ok(())
    }

    /// Apply every present field, or none of them if any is invalid
    pub fn apply(&self, update: &PropertyUpdate) -> Result<()> {
        if let Some(thresholds) = &update.thresholds {
            check_thresholds(thresholds)?;
        }
        if let Some(reserved) = update.reserved_capacity_per_component {
            check_property("reserved_capacity_per_component", reserved)?;
        }
        if let Some(percentage) = update.maximum_throughput_percentage {
            check_property("maximum_throughput_percentage", percentage)?;
        }
        if let Some(threshold) = update.load_threshold {
            check_property("load_threshold", threshold)?;
        }

        if let Some(thresholds) = update.thresholds {
            self.set_thresholds(thresholds)?;
        }
        if let Some(reserved) = update.reserved_capacity_per_component {
            self.set_reserved_capacity_per_component(reserved)?;
        }
        if let Some(percentage) = update.maximum_throughput_percentage {
            self.set_maximum_throughput_percentage(percentage)?;
        }
        if let Some(threshold) = update.load_threshold {
            self.set_load_threshold(threshold)?;
        }
        Ok(())
    }

    // ---- per-cycle ----

    /// Reconcile reservations and store the thresholds they imply
    pub async fn establish_modified_thresholds(&self) -> Result<Thresholds> {
        let tunables = self.tunables();
        let modified = self
            .ledger
            .establish_modified_thresholds(
                self.registry.as_ref(),
                &tunables.thresholds,
                tunables.idle_capacity_modifier,
            )
            .await?;
        *self
            .modified_thresholds
            .write()
            .map_err(|_| GppError::ResourceAcquisition("modified thresholds lock"))? = modified;
        self.publish_reservations();
        Ok(modified)
    }

    pub fn calculate_system_memory_loading(&self) -> Result<()> {
        let free = self.monitor.physical_memory_free();
        *self
            .mem_capacity
            .write()
            .map_err(|_| GppError::ResourceAcquisition("memory capacity lock"))? =
            i64::try_from(free).unwrap_or(i64::MAX);
        Ok(())
    }

    /// Classify the device from the latest snapshot and reservations
    pub fn update_usage_state(&self) -> Result<UsageState> {
        let snapshot = self.monitor.snapshot();
        let modified = self.modified_thresholds();
        let has_processes = self.ledger.process_count()? > 0;

        let state = if snapshot.idle_cpu_percent < modified.cpu_idle
            || (snapshot.physical_memory_free as f64) < modified.mem_free as f64
        {
            UsageState::Busy
        } else if !has_processes {
            UsageState::Idle
        } else {
            UsageState::Active
        };

        let previous = {
            let mut current = self
                .usage_state
                .write()
                .map_err(|_| GppError::ResourceAcquisition("usage state lock"))?;
            std::mem::replace(&mut *current, state)
        };
        if previous != state {
            self.logger.log_usage_state_change(previous, state);
        }
        self.metrics.set_usage_state(state);
        Ok(state)
    }

    /// Listener target for threshold monitors
    pub fn send_threshold_event(&self, event: &ThresholdEvent) {
        self.logger.log_threshold_event(event);
        self.metrics.inc_threshold_events();
        if let Err(e) = self.events.push(DeviceEvent::Threshold(event.clone())) {
            warn!(
                resource_id = %event.resource_id,
                error = %e,
                "Unable to send threshold event"
            );
        }
    }

    pub fn status(&self) -> DeviceStatus {
        let (active, tabled) = self.ledger.reservations().unwrap_or_default();
        DeviceStatus {
            device_id: self.device_id.clone(),
            label: self.label.clone(),
            usage_state: self.usage_state(),
            system: self.monitor.snapshot(),
            thresholds: self.thresholds(),
            modified_thresholds: self.modified_thresholds(),
            mem_capacity: self.mem_capacity(),
            active_reservations: active,
            tabled_reservations: tabled,
            pids: self.ledger.get_pids().unwrap_or_default(),
            nic_metrics: self.nic.nic_metrics(),
            nic_allocations: self.nic.allocations(),
        }
    }
}

/// Builder for [`GppDevice`]
pub struct GppDeviceBuilder {
    device_id: String,
    label: String,
    properties: GppProperties,
    binary_dir: Option<PathBuf>,
    executor: Option<Arc<dyn ProcessExecutor>>,
    registry: Option<Arc<dyn ApplicationRegistry>>,
    events: Option<Arc<dyn EventChannel>>,
}

impl GppDeviceBuilder {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            label: String::new(),
            properties: GppProperties::default(),
            binary_dir: None,
            executor: None,
            registry: None,
            events: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn properties(mut self, properties: GppProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Directory holding `gpp.screenrc`; defaults to the running binary's directory
    pub fn binary_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.binary_dir = Some(dir.into());
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ProcessExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn ApplicationRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventChannel>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn build(self) -> Result<GppDevice> {
        let executor = self
            .executor
            .ok_or_else(|| GppError::InvalidState("process executor is required".to_string()))?;
        let registry = self
            .registry
            .ok_or_else(|| GppError::InvalidState("application registry is required".to_string()))?;
        let events = self
            .events
            .ok_or_else(|| GppError::InvalidState("event channel is required".to_string()))?;

        let properties = self.properties;
        let processor_cores = properties.resolve_processor_cores();
        let binary_dir = self.binary_dir.unwrap_or_else(|| {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        let metrics = GppMetrics::new();

        let nic = Arc::new(NicFacade::new(
            &properties.proc_root,
            &properties.sys_root,
            properties.nic_interfaces.clone(),
            properties.maximum_throughput_percentage,
            metrics.clone(),
        ));

        let tunables = Tunables {
            thresholds: properties.thresholds,
            reserved_capacity_per_component: properties.reserved_capacity_per_component,
            idle_capacity_modifier: properties.reserved_capacity_per_component
                / processor_cores.max(1) as f64,
            load_capacity_per_core: properties.load_capacity_per_core,
            load_threshold: properties.load_threshold,
            use_screen: properties.use_screen,
        };

        Ok(GppDevice {
            logger: StructuredLogger::new(&self.device_id),
            device_id: self.device_id,
            label: self.label,
            processor_cores,
            proc_root: properties.proc_root,
            binary_dir,
            modified_thresholds: RwLock::new(tunables.thresholds),
            tunables: RwLock::new(tunables),
            mem_capacity: RwLock::new(0),
            usage_state: RwLock::new(UsageState::Idle),
            ledger: ReservationLedger::new(),
            nic,
            monitor: SystemMonitor::new(),
            executor,
            registry,
            events,
            metrics,
        })
    }
}
