//! System load average state

use super::{procfs, write_lock, State};
use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::RwLock;

/// One-minute load average from /proc/loadavg
pub struct LoadAverageState {
    proc_root: PathBuf,
    load: RwLock<f64>,
}

impl LoadAverageState {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            load: RwLock::new(0.0),
        }
    }

    pub fn load_average(&self) -> f64 {
        *self.load.read().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl State for LoadAverageState {
    async fn update_state(&self) -> Result<()> {
        let load = procfs::read_loadavg(&self.proc_root).await?;
        *write_lock(&self.load, "load state lock")? = load;
        Ok(())
    }
}
