//! CPU utilization state and idle statistics

use super::procfs::{self, CpuJiffies};
use super::{write_lock, State, Statistics};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Number of samples in the idle moving average
pub const IDLE_AVERAGE_WINDOW: usize = 5;

/// Latest aggregate jiffy counters read from /proc/stat
pub struct CpuState {
    proc_root: PathBuf,
    sample: RwLock<Option<CpuSample>>,
}

#[derive(Debug, Clone, Copy)]
struct CpuSample {
    jiffies: CpuJiffies,
    cores: u32,
}

impl CpuState {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            sample: RwLock::new(None),
        }
    }

    /// Most recent counters, if any sample has been taken
    pub fn jiffies(&self) -> Option<CpuJiffies> {
        self.sample
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .map(|s| s.jiffies)
    }

    /// Number of per-core lines seen in the last sample
    pub fn cores(&self) -> u32 {
        self.sample
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .map(|s| s.cores)
            .unwrap_or(0)
    }
}

#[async_trait]
impl State for CpuState {
    async fn update_state(&self) -> Result<()> {
        let (jiffies, cores) = procfs::read_cpu_stat(&self.proc_root).await?;
        *write_lock(&self.sample, "cpu state lock")? = Some(CpuSample { jiffies, cores });
        Ok(())
    }
}

/// Derives idle percentage and its moving average from jiffy deltas
pub struct CpuUsageAccumulator {
    state: Arc<CpuState>,
    inner: RwLock<AccumulatorInner>,
}

#[derive(Debug)]
struct AccumulatorInner {
    previous: Option<CpuJiffies>,
    idle_percent: f64,
    history: VecDeque<f64>,
}

impl CpuUsageAccumulator {
    pub fn new(state: Arc<CpuState>) -> Self {
        Self {
            state,
            inner: RwLock::new(AccumulatorInner {
                previous: None,
                idle_percent: 100.0,
                history: VecDeque::with_capacity(IDLE_AVERAGE_WINDOW),
            }),
        }
    }

    pub fn get_idle_percent(&self) -> f64 {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .idle_percent
    }

    pub fn get_idle_average(&self) -> f64 {
        let inner = self.inner.read().unwrap_or_else(|p| p.into_inner());
        if inner.history.is_empty() {
            return inner.idle_percent;
        }
        inner.history.iter().sum::<f64>() / inner.history.len() as f64
    }

    /// Idle share of the interval between two samples. Without a previous
    /// sample the counters since boot are used.
    fn idle_between(previous: Option<CpuJiffies>, current: CpuJiffies) -> Option<f64> {
        let base = previous.unwrap_or_default();
        let total = current.total().checked_sub(base.total())?;
        let idle = current.idle_total().checked_sub(base.idle_total())?;
        if total == 0 {
            return None;
        }
        Some((idle as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
    }
}

impl Statistics for CpuUsageAccumulator {
    fn compute_statistics(&self) -> Result<()> {
        let Some(current) = self.state.jiffies() else {
            return Ok(());
        };

        let mut inner = write_lock(&self.inner, "cpu statistics lock")?;
        // None on counter reset or when no time elapsed; keep the last value
        if let Some(idle) = Self::idle_between(inner.previous, current) {
            inner.idle_percent = idle;
            if inner.history.len() == IDLE_AVERAGE_WINDOW {
                inner.history.pop_front();
            }
            inner.history.push_back(idle);
        }
        inner.previous = Some(current);
        Ok(())
    }
}
