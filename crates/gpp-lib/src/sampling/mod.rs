//! Host sampling pipeline
//!
//! Raw samples come from procfs, are turned into derived statistics and are
//! then reported into the shared system monitor snapshot. Each stage is a
//! narrow capability so the scheduler can drive heterogeneous resources
//! through three ordered sequences.

mod cpu;
mod load;
mod memory;
pub mod procfs;
mod reporting;

#[cfg(test)]
mod tests;

pub use cpu::{CpuState, CpuUsageAccumulator, IDLE_AVERAGE_WINDOW};
pub use load::LoadAverageState;
pub use memory::MemoryState;
pub use reporting::{SystemMonitor, SystemMonitorReporting};

use crate::error::{GppError, Result};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use async_trait::async_trait;

/// Refreshes raw state from the host
#[async_trait]
pub trait State: Send + Sync {
    async fn update_state(&self) -> Result<()>;
}

/// Derives metrics from previously refreshed state
pub trait Statistics: Send + Sync {
    fn compute_statistics(&self) -> Result<()>;
}

/// Publishes derived metrics to the monitoring structures
pub trait Reporting: Send + Sync {
    fn report(&self) -> Result<()>;
}

pub(crate) fn read_lock<'a, T>(
    lock: &'a RwLock<T>,
    what: &'static str,
) -> Result<RwLockReadGuard<'a, T>> {
    lock.read().map_err(|_| GppError::ResourceAcquisition(what))
}

pub(crate) fn write_lock<'a, T>(
    lock: &'a RwLock<T>,
    what: &'static str,
) -> Result<RwLockWriteGuard<'a, T>> {
    lock.write().map_err(|_| GppError::ResourceAcquisition(what))
}
