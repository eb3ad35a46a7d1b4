//! Physical memory state

use super::procfs::{self, MemInfo};
use super::{write_lock, State};
use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::RwLock;

/// Latest figures read from /proc/meminfo
pub struct MemoryState {
    proc_root: PathBuf,
    info: RwLock<MemInfo>,
}

impl MemoryState {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            info: RwLock::new(MemInfo::default()),
        }
    }

    /// Memory available to new workloads, in bytes
    pub fn physical_memory_free(&self) -> u64 {
        self.info.read().unwrap_or_else(|p| p.into_inner()).usable()
    }

    pub fn physical_memory_total(&self) -> u64 {
        self.info.read().unwrap_or_else(|p| p.into_inner()).total
    }
}

#[async_trait]
impl State for MemoryState {
    async fn update_state(&self) -> Result<()> {
        let info = procfs::read_meminfo(&self.proc_root).await?;
        *write_lock(&self.info, "memory state lock")? = info;
        Ok(())
    }
}
