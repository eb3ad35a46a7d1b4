//! GPP resource-management library
//!
//! This crate provides the core functionality for:
//! - Sampling host CPU, memory, load and NIC counters from procfs/sysfs
//! - Edge-triggered threshold monitoring
//! - Process reservation bookkeeping and the modified idle threshold
//! - NIC bandwidth, load and memory capacity admission
//! - The periodic scheduler loop and SIGCHLD child reaping
//! - Health checks and observability

pub mod device;
pub mod error;
pub mod health;
pub mod host;
pub mod ledger;
pub mod models;
pub mod nic;
pub mod observability;
pub mod properties;
pub mod reaper;
pub mod sampling;
pub mod scheduler;
pub mod thresholds;

#[cfg(test)]
pub(crate) mod test_support;

pub use device::{DeviceStatus, GppDevice, GppDeviceBuilder, PropertyUpdate};
pub use error::{GppError, Result, TransportError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{GppMetrics, StructuredLogger};
pub use properties::GppProperties;
pub use reaper::ChildReaper;
pub use scheduler::{CycleOutcome, ServiceLoop, ServiceLoopBuilder};
