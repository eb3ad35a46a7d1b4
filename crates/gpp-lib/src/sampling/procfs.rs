//! Raw samples from the proc and sys filesystems
//!
//! Parsers are pure functions over file contents; readers take the
//! filesystem root so tests can point them at a temporary tree.

use crate::error::{GppError, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

/// Link speed assumed when the kernel does not report one (Mbps)
pub const DEFAULT_LINK_SPEED_MBPS: f64 = 1000.0;

const IFF_UP: u32 = 0x1;
const IFF_LOOPBACK: u32 = 0x8;
const IFF_MULTICAST: u32 = 0x1000;

/// Aggregate CPU jiffy counters from the `cpu` line of /proc/stat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuJiffies {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuJiffies {
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }

    /// Idle time counts iowait as idle
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }
}

/// Memory figures from /proc/meminfo, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemInfo {
    pub total: u64,
    pub free: u64,
    pub available: Option<u64>,
}

impl MemInfo {
    /// Memory usable by new workloads
    pub fn usable(&self) -> u64 {
        self.available.unwrap_or(self.free)
    }
}

/// Byte counters for one interface from /proc/net/dev
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetDevCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

impl NetDevCounters {
    pub fn total(&self) -> u64 {
        self.rx_bytes + self.tx_bytes
    }
}

/// Link properties from /sys/class/net/<iface>
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkInfo {
    pub speed_mbps: f64,
    pub up: bool,
    pub loopback: bool,
    pub multicast: bool,
}

impl Default for LinkInfo {
    fn default() -> Self {
        Self {
            speed_mbps: DEFAULT_LINK_SPEED_MBPS,
            up: false,
            loopback: false,
            multicast: false,
        }
    }
}

/// Parse the aggregate `cpu` line of /proc/stat
pub fn parse_cpu_stat(content: &str) -> Option<CpuJiffies> {
    let line = content
        .lines()
        .find(|l| l.split_whitespace().next() == Some("cpu"))?;

    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse().unwrap_or(0))
        .collect();

    if values.len() < 4 {
        return None;
    }

    let at = |i: usize| values.get(i).copied().unwrap_or(0);
    Some(CpuJiffies {
        user: at(0),
        nice: at(1),
        system: at(2),
        idle: at(3),
        iowait: at(4),
        irq: at(5),
        softirq: at(6),
        steal: at(7),
    })
}

/// Count the per-core `cpuN` lines of /proc/stat
pub fn count_cpu_cores(content: &str) -> u32 {
    content
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .filter(|name| {
            name.len() > 3
                && name.starts_with("cpu")
                && name[3..].chars().all(|c| c.is_ascii_digit())
        })
        .count() as u32
}

/// Parse /proc/meminfo (values are in kB)
pub fn parse_meminfo(content: &str) -> Option<MemInfo> {
    let mut total = None;
    let mut free = None;
    let mut available = None;

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }
        let bytes = match parts[1].parse::<u64>() {
            Ok(kb) => kb * 1024,
            Err(_) => continue,
        };
        match parts[0] {
            "MemTotal:" => total = Some(bytes),
            "MemFree:" => free = Some(bytes),
            "MemAvailable:" => available = Some(bytes),
            _ => {}
        }
    }

    Some(MemInfo {
        total: total?,
        free: free?,
        available,
    })
}

/// Parse /proc/net/dev into per-interface counters
pub fn parse_net_dev(content: &str) -> BTreeMap<String, NetDevCounters> {
    let mut counters = BTreeMap::new();

    // First two lines are column headers
    for line in content.lines().skip(2) {
        let Some((name, stats)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<u64> = stats
            .split_whitespace()
            .map(|v| v.parse().unwrap_or(0))
            .collect();
        if fields.len() < 9 {
            continue;
        }
        counters.insert(
            name.trim().to_string(),
            NetDevCounters {
                rx_bytes: fields[0],
                tx_bytes: fields[8],
            },
        );
    }

    counters
}

/// Parse the first value of /proc/loadavg
pub fn parse_loadavg(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

/// Parse the hexadecimal interface flags file
pub fn parse_link_flags(content: &str) -> Option<u32> {
    let trimmed = content.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    u32::from_str_radix(hex, 16).ok()
}

async fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .map_err(|e| GppError::unreadable(path, e))
}

/// Read aggregate jiffies and the core count from /proc/stat
pub async fn read_cpu_stat(proc_root: &Path) -> Result<(CpuJiffies, u32)> {
    let path = proc_root.join("stat");
    let content = read(&path).await?;
    let jiffies = parse_cpu_stat(&content)
        .ok_or_else(|| GppError::unreadable(&path, "missing aggregate cpu line"))?;
    Ok((jiffies, count_cpu_cores(&content)))
}

pub async fn read_meminfo(proc_root: &Path) -> Result<MemInfo> {
    let path = proc_root.join("meminfo");
    let content = read(&path).await?;
    parse_meminfo(&content).ok_or_else(|| GppError::unreadable(&path, "missing MemTotal/MemFree"))
}

pub async fn read_net_dev(proc_root: &Path) -> Result<BTreeMap<String, NetDevCounters>> {
    let content = read(&proc_root.join("net").join("dev")).await?;
    Ok(parse_net_dev(&content))
}

pub async fn read_loadavg(proc_root: &Path) -> Result<f64> {
    let path = proc_root.join("loadavg");
    let content = read(&path).await?;
    parse_loadavg(&content).ok_or_else(|| GppError::unreadable(&path, "malformed load average"))
}

/// Read link properties, falling back to defaults for missing files
pub async fn read_link_info(sys_root: &Path, iface: &str) -> LinkInfo {
    let dir = sys_root.join("class").join("net").join(iface);
    let mut info = LinkInfo::default();

    // Virtual interfaces report -1 or fail with EINVAL
    if let Ok(content) = fs::read_to_string(dir.join("speed")).await {
        if let Ok(speed) = content.trim().parse::<f64>() {
            if speed > 0.0 {
                info.speed_mbps = speed;
            }
        }
    }

    if let Ok(content) = fs::read_to_string(dir.join("flags")).await {
        if let Some(flags) = parse_link_flags(&content) {
            info.up = flags & IFF_UP != 0;
            info.loopback = flags & IFF_LOOPBACK != 0;
            info.multicast = flags & IFF_MULTICAST != 0;
        }
    }

    info
}
