//! NIC capacity facade
//!
//! Single authority for the interface inventory, per-interface throughput
//! and exclusive bandwidth allocation. The facade takes part in the
//! scheduler pipeline as a state, a statistics source and a reporting sink.

mod error;

pub use error::NicError;

use crate::error::{GppError, Result};
use crate::models::{NicAllocation, NicAllocationStatus, NicMetrics};
use crate::observability::GppMetrics;
use crate::sampling::procfs::{self, LinkInfo, NetDevCounters};
use crate::sampling::{async_trait, read_lock, write_lock, Reporting, State, Statistics};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Interface name meaning "any interface"
pub const WILDCARD_INTERFACE: &str = "*";

#[derive(Debug, Clone)]
struct NicInterface {
    link: LinkInfo,
    current: Option<(NetDevCounters, Instant)>,
    previous: Option<(NetDevCounters, Instant)>,
    throughput_mbps: f64,
}

impl NicInterface {
    fn new(link: LinkInfo) -> Self {
        Self {
            link,
            current: None,
            previous: None,
            throughput_mbps: 0.0,
        }
    }

    fn capacity_mbps(&self, max_throughput_percentage: f64) -> f64 {
        self.link.speed_mbps * max_throughput_percentage / 100.0
    }

    fn throughput_percent(&self) -> f64 {
        if self.link.speed_mbps <= 0.0 {
            return 0.0;
        }
        self.throughput_mbps / self.link.speed_mbps * 100.0
    }
}

#[derive(Debug, Default)]
struct NicInner {
    interfaces: BTreeMap<String, NicInterface>,
    allocations: Vec<NicAllocationStatus>,
}

impl NicInner {
    fn allocated_mbps(&self, interface: &str) -> f64 {
        self.allocations
            .iter()
            .filter(|a| a.interface == interface)
            .map(|a| a.data_rate)
            .sum()
    }
}

/// Owns NIC inventory and allocation state
pub struct NicFacade {
    proc_root: PathBuf,
    sys_root: PathBuf,
    interface_filter: Vec<String>,
    max_throughput_percentage: RwLock<f64>,
    inner: Mutex<NicInner>,
    report: RwLock<Vec<NicMetrics>>,
    metrics: GppMetrics,
}

impl NicFacade {
    pub fn new(
        proc_root: impl Into<PathBuf>,
        sys_root: impl Into<PathBuf>,
        interface_filter: Vec<String>,
        max_throughput_percentage: f64,
        metrics: GppMetrics,
    ) -> Self {
        Self {
            proc_root: proc_root.into(),
            sys_root: sys_root.into(),
            interface_filter,
            max_throughput_percentage: RwLock::new(max_throughput_percentage),
            inner: Mutex::new(NicInner::default()),
            report: RwLock::new(Vec::new()),
            metrics,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, NicInner>> {
        self.inner
            .lock()
            .map_err(|_| GppError::ResourceAcquisition("nic allocation lock"))
    }

    fn accepts(&self, name: &str) -> bool {
        self.interface_filter.is_empty() || self.interface_filter.iter().any(|f| f == name)
    }

    pub fn maximum_throughput_percentage(&self) -> f64 {
        *self
            .max_throughput_percentage
            .read()
            .unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_maximum_throughput_percentage(&self, percentage: f64) {
        *self
            .max_throughput_percentage
            .write()
            .unwrap_or_else(|p| p.into_inner()) = percentage;
        info!(percentage = percentage, "Updated maximum NIC throughput percentage");
    }

    /// Names of the monitored interfaces
    pub fn get_devices(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.interfaces.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Throughput of one interface as a percentage of its link speed
    pub fn get_throughput_by_device(&self, interface: &str) -> f64 {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.interfaces.get(interface).map(|i| i.throughput_percent()))
            .unwrap_or(0.0)
    }

    /// Metrics published by the last report
    pub fn nic_metrics(&self) -> Vec<NicMetrics> {
        self.report
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn allocations(&self) -> Vec<NicAllocationStatus> {
        self.inner
            .lock()
            .map(|inner| inner.allocations.clone())
            .unwrap_or_default()
    }

    /// Total rate currently allocated on an interface
    pub fn allocated_rate(&self, interface: &str) -> f64 {
        self.inner
            .lock()
            .map(|inner| inner.allocated_mbps(interface))
            .unwrap_or(0.0)
    }

    /// Admit an allocation request and record its status
    pub fn allocate_capacity(
        &self,
        request: &NicAllocation,
    ) -> Result<NicAllocationStatus, NicError> {
        validate(request)?;
        let percentage = self.maximum_throughput_percentage();

        let mut inner = self.inner.lock().map_err(|_| NicError::Unavailable)?;
        if inner
            .allocations
            .iter()
            .any(|a| a.identifier == request.identifier)
        {
            return Err(NicError::DuplicateIdentifier(request.identifier.clone()));
        }

        let wildcard = request.interface.is_empty() || request.interface == WILDCARD_INTERFACE;
        let candidates: Vec<String> = if wildcard {
            inner.interfaces.keys().cloned().collect()
        } else if inner.interfaces.contains_key(&request.interface) {
            vec![request.interface.clone()]
        } else {
            return Err(NicError::UnknownInterface(request.interface.clone()));
        };

        let mut last_error = NicError::NoSuitableInterface;
        for name in candidates {
            let iface = &inner.interfaces[&name];
            if request.multicast_support && !iface.link.multicast {
                last_error = NicError::MulticastUnsupported(name);
                continue;
            }
            if request.ip_addressable && (!iface.link.up || iface.link.loopback) {
                last_error = NicError::NotAddressable(name);
                continue;
            }
            let available = iface.capacity_mbps(percentage) - inner.allocated_mbps(&name);
            if request.data_rate > available {
                last_error = NicError::InsufficientCapacity {
                    interface: name,
                    requested: request.data_rate,
                    available: available.max(0.0),
                };
                continue;
            }

            let status = NicAllocationStatus::granted(request, &name);
            inner.allocations.push(status.clone());
            debug!(
                identifier = %status.identifier,
                interface = %status.interface,
                data_rate = status.data_rate,
                "Granted NIC allocation"
            );
            return Ok(status);
        }

        if wildcard {
            return Err(NicError::NoSuitableInterface);
        }
        Err(last_error)
    }

    /// Release the allocation with the request's identifier
    pub fn deallocate_capacity(
        &self,
        request: &NicAllocation,
    ) -> Result<NicAllocationStatus, NicError> {
        let mut inner = self.inner.lock().map_err(|_| NicError::Unavailable)?;
        let position = inner
            .allocations
            .iter()
            .position(|a| a.identifier == request.identifier)
            .ok_or_else(|| NicError::UnknownAllocation(request.identifier.clone()))?;
        let status = inner.allocations.remove(position);
        debug!(
            identifier = %status.identifier,
            interface = %status.interface,
            "Released NIC allocation"
        );
        Ok(status)
    }

    #[cfg(test)]
    pub(crate) fn register_interface(&self, name: &str, link: LinkInfo) {
        self.inner
            .lock()
            .unwrap()
            .interfaces
            .insert(name.to_string(), NicInterface::new(link));
    }
}

fn validate(request: &NicAllocation) -> Result<(), NicError> {
    if request.identifier.is_empty() {
        return Err(NicError::InvalidRequest("empty identifier".to_string()));
    }
    if !request.data_rate.is_finite() || request.data_rate < 0.0 {
        return Err(NicError::InvalidRequest(format!(
            "invalid data_rate {}",
            request.data_rate
        )));
    }
    if request.data_size < 0 {
        return Err(NicError::InvalidRequest(format!(
            "invalid data_size {}",
            request.data_size
        )));
    }
    Ok(())
}

/// Throughput in Mbps between two counter samples
fn throughput_mbps(previous: NetDevCounters, current: NetDevCounters, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    let bytes = current.total().saturating_sub(previous.total());
    bytes as f64 * 8.0 / 1_000_000.0 / elapsed_secs
}

#[async_trait]
impl State for NicFacade {
    async fn update_state(&self) -> Result<()> {
        let counters = procfs::read_net_dev(&self.proc_root).await?;

        let mut links = BTreeMap::new();
        for name in counters.keys().filter(|n| self.accepts(n)) {
            let link = procfs::read_link_info(&self.sys_root, name).await;
            if link.loopback || name == "lo" {
                continue;
            }
            links.insert(name.clone(), link);
        }

        let now = Instant::now();
        let mut inner = self.lock()?;
        inner.interfaces.retain(|name, _| {
            let keep = links.contains_key(name);
            if !keep {
                info!(interface = %name, "Removing interface");
            }
            keep
        });
        // Allocations cannot outlive their interface
        let NicInner {
            interfaces,
            allocations,
        } = &mut *inner;
        allocations.retain(|a| {
            let keep = interfaces.contains_key(&a.interface);
            if !keep {
                warn!(
                    identifier = %a.identifier,
                    interface = %a.interface,
                    data_rate = a.data_rate,
                    "Dropping allocation on vanished interface"
                );
            }
            keep
        });
        for (name, link) in links {
            let sample = counters[&name];
            let iface = inner
                .interfaces
                .entry(name.clone())
                .or_insert_with(|| {
                    info!(interface = %name, "Adding interface");
                    NicInterface::new(link)
                });
            iface.link = link;
            iface.previous = iface.current.take();
            iface.current = Some((sample, now));
        }
        Ok(())
    }
}

impl Statistics for NicFacade {
    fn compute_statistics(&self) -> Result<()> {
        let mut inner = self.lock()?;
        for iface in inner.interfaces.values_mut() {
            if let (Some((prev, prev_at)), Some((cur, cur_at))) = (iface.previous, iface.current) {
                let elapsed = cur_at.duration_since(prev_at).as_secs_f64();
                iface.throughput_mbps = throughput_mbps(prev, cur, elapsed);
            }
        }
        Ok(())
    }
}

impl Reporting for NicFacade {
    fn report(&self) -> Result<()> {
        let percentage = *read_lock(&self.max_throughput_percentage, "nic throughput lock")?;
        let inner = self.lock()?;
        let report: Vec<NicMetrics> = inner
            .interfaces
            .iter()
            .map(|(name, iface)| {
                let allocated = inner.allocated_mbps(name);
                NicMetrics {
                    interface: name.clone(),
                    link_speed_mbps: iface.link.speed_mbps,
                    multicast_support: iface.link.multicast,
                    ip_addressable: iface.link.up && !iface.link.loopback,
                    throughput_mbps: iface.throughput_mbps,
                    throughput_percent: iface.throughput_percent(),
                    rate_allocated_mbps: allocated,
                    rate_available_mbps: (iface.capacity_mbps(percentage) - allocated).max(0.0),
                }
            })
            .collect();
        drop(inner);

        for m in &report {
            self.metrics.set_nic_throughput(&m.interface, m.throughput_mbps);
            self.metrics.set_nic_allocated(&m.interface, m.rate_allocated_mbps);
        }
        *write_lock(&self.report, "nic report lock")? = report;
        Ok(())
    }
}
