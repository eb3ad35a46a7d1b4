//! Reservation ledger
//!
//! Tracks which launched children hold capacity reservations and derives
//! the modified idle-CPU threshold from the number of active ones.
//!
//! - `active` reservations reduce effective idle capacity
//! - `tabled` reservations belong to applications that finished starting
//! - the process map links each launched pid to its component
//!
//! Every launch holds its own reservation, so one description may appear
//! several times. All copies of a description live in the same list and
//! move between lists together.
//!
//! One mutex guards all three. It is never held across an `.await`, so host
//! lookups made during reconciliation cannot deadlock against callers that
//! re-enter the ledger.

use crate::error::{GppError, Result};
use crate::host::{ApplicationHandle, ApplicationRegistry};
use crate::models::{ComponentDescription, Pid, Thresholds};
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Untracked exits remembered for a launch that has not been recorded yet
const EARLY_EXIT_CAPACITY: usize = 64;
const EARLY_EXIT_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct LedgerInner {
    active: Vec<ComponentDescription>,
    tabled: Vec<ComponentDescription>,
    pids: HashMap<Pid, ComponentDescription>,
    early_exits: VecDeque<(Pid, Instant)>,
}

impl LedgerInner {
    /// Add one reservation next to any existing copies, active otherwise
    fn push_reservation(&mut self, desc: &ComponentDescription) {
        if self.tabled.contains(desc) {
            self.tabled.push(desc.clone());
        } else {
            self.active.push(desc.clone());
        }
    }

    fn remember_early_exit(&mut self, pid: Pid) {
        if self.early_exits.len() == EARLY_EXIT_CAPACITY {
            self.early_exits.pop_front();
        }
        self.early_exits.push_back((pid, Instant::now()));
    }

    /// Consume a remembered exit of `pid`, if still fresh
    fn take_early_exit(&mut self, pid: Pid) -> bool {
        self.early_exits
            .retain(|(_, seen)| seen.elapsed() < EARLY_EXIT_TTL);
        match self.early_exits.iter().position(|(p, _)| *p == pid) {
            Some(pos) => {
                self.early_exits.remove(pos);
                true
            }
            None => false,
        }
    }

    fn remove_reservation(&mut self, desc: &ComponentDescription) -> bool {
        if let Some(pos) = self.active.iter().position(|d| d == desc) {
            self.active.remove(pos);
            return true;
        }
        if let Some(pos) = self.tabled.iter().position(|d| d == desc) {
            self.tabled.remove(pos);
            return true;
        }
        false
    }
}

/// Move every copy of `desc` from one list to the other; returns how many moved
fn shift(
    from: &mut Vec<ComponentDescription>,
    to: &mut Vec<ComponentDescription>,
    desc: &ComponentDescription,
) -> usize {
    let before = from.len();
    from.retain(|d| d != desc);
    let moved = before - from.len();
    to.extend(std::iter::repeat(desc.clone()).take(moved));
    moved
}

/// Per-invocation view of application start state
#[derive(Default)]
struct Reconciliation {
    /// `None` when the application could not be resolved or queried
    checked: HashMap<String, Option<bool>>,
    listing: Option<Vec<(String, Arc<dyn ApplicationHandle>)>>,
}

/// Active/tabled reservations and the pid map
#[derive(Default)]
pub struct ReservationLedger {
    inner: Mutex<LedgerInner>,
    applications: DashMap<String, Arc<dyn ApplicationHandle>>,
}

impl ReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerInner>> {
        self.inner
            .lock()
            .map_err(|_| GppError::ResourceAcquisition("reservation ledger lock"))
    }

    /// Add one reservation; it joins the tabled copies of `desc` if there are any
    pub fn add_reservation(&self, desc: &ComponentDescription) -> Result<()> {
        self.lock()?.push_reservation(desc);
        Ok(())
    }

    /// Remove the first match from whichever list holds it
    pub fn remove_reservation(&self, desc: &ComponentDescription) -> Result<()> {
        self.lock()?.remove_reservation(desc);
        Ok(())
    }

    /// Active to tabled
    pub fn shift_reservation(&self, desc: &ComponentDescription) -> Result<()> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let moved = shift(&mut inner.active, &mut inner.tabled, desc);
        if moved > 0 {
            debug!(app = %desc.app_name, component = %desc.identifier, count = moved, "Tabled reservation");
        }
        Ok(())
    }

    /// Tabled to active
    pub fn shift_reservation_back(&self, desc: &ComponentDescription) -> Result<()> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let moved = shift(&mut inner.tabled, &mut inner.active, desc);
        if moved > 0 {
            debug!(app = %desc.app_name, component = %desc.identifier, count = moved, "Restored reservation");
        }
        Ok(())
    }

    pub fn add_pid(&self, pid: Pid, desc: ComponentDescription) -> Result<()> {
        self.lock()?.pids.insert(pid, desc);
        Ok(())
    }

    pub fn remove_pid(&self, pid: Pid) -> Result<Option<ComponentDescription>> {
        Ok(self.lock()?.pids.remove(&pid))
    }

    /// Tracked pids in ascending order
    pub fn get_pids(&self) -> Result<Vec<Pid>> {
        let mut pids: Vec<Pid> = self.lock()?.pids.keys().copied().collect();
        pids.sort_unstable();
        Ok(pids)
    }

    pub fn component_description(&self, pid: Pid) -> Result<Option<ComponentDescription>> {
        Ok(self.lock()?.pids.get(&pid).cloned())
    }

    /// Record a launched child and give it a reservation of its own.
    ///
    /// Returns `false` without recording anything when the child was already
    /// reaped before its launch could be recorded.
    pub fn record_launch(&self, pid: Pid, desc: ComponentDescription) -> Result<bool> {
        let mut inner = self.lock()?;
        if inner.take_early_exit(pid) {
            return Ok(false);
        }
        inner.push_reservation(&desc);
        inner.pids.insert(pid, desc);
        Ok(true)
    }

    /// Drop a pid and its reservation together, returning what it held
    pub fn take_process(&self, pid: Pid) -> Result<Option<ComponentDescription>> {
        let mut inner = self.lock()?;
        let desc = inner.pids.remove(&pid);
        if let Some(desc) = &desc {
            inner.remove_reservation(desc);
        }
        Ok(desc)
    }

    /// Like [`take_process`](Self::take_process) for a reaped child; an
    /// untracked pid is remembered so a launch still in flight is not recorded
    pub fn take_exited(&self, pid: Pid) -> Result<Option<ComponentDescription>> {
        let mut inner = self.lock()?;
        let desc = inner.pids.remove(&pid);
        match &desc {
            Some(desc) => {
                inner.remove_reservation(desc);
            }
            None => inner.remember_early_exit(pid),
        }
        Ok(desc)
    }

    pub fn active_count(&self) -> Result<usize> {
        Ok(self.lock()?.active.len())
    }

    pub fn tabled_count(&self) -> Result<usize> {
        Ok(self.lock()?.tabled.len())
    }

    pub fn process_count(&self) -> Result<usize> {
        Ok(self.lock()?.pids.len())
    }

    /// Copies of the active and tabled lists
    pub fn reservations(&self) -> Result<(Vec<ComponentDescription>, Vec<ComponentDescription>)> {
        let inner = self.lock()?;
        Ok((inner.active.clone(), inner.tabled.clone()))
    }

    /// Reconcile reservations against application start state and derive
    /// the modified thresholds.
    ///
    /// Active reservations of started applications are tabled; tabled ones
    /// whose application is not started go back to active. Applications
    /// that cannot be resolved or queried are left where they are.
    pub async fn establish_modified_thresholds(
        &self,
        registry: &dyn ApplicationRegistry,
        base: &Thresholds,
        idle_capacity_modifier: f64,
    ) -> Result<Thresholds> {
        let (active, tabled) = self.reservations()?;
        let mut pass = Reconciliation::default();

        for desc in &active {
            if self.resolve_started(registry, &desc.app_name, &mut pass).await == Some(true) {
                self.shift_reservation(desc)?;
            }
        }
        for desc in &tabled {
            if self.resolve_started(registry, &desc.app_name, &mut pass).await == Some(false) {
                self.shift_reservation_back(desc)?;
            }
        }

        let active_count = self.active_count()?;
        Ok(Thresholds {
            cpu_idle: base.cpu_idle + idle_capacity_modifier * active_count as f64,
            ..*base
        })
    }

    async fn resolve_started(
        &self,
        registry: &dyn ApplicationRegistry,
        app_name: &str,
        pass: &mut Reconciliation,
    ) -> Option<bool> {
        if let Some(started) = pass.checked.get(app_name) {
            return *started;
        }

        let cached = self.applications.get(app_name).map(|h| h.value().clone());
        let handle = match cached {
            Some(handle) => Some(handle),
            None => {
                if pass.listing.is_none() {
                    let listing = registry.list_applications().await.unwrap_or_else(|e| {
                        warn!(error = %e, "Failed to list applications");
                        Vec::new()
                    });
                    pass.listing = Some(listing);
                }
                let found = pass
                    .listing
                    .iter()
                    .flatten()
                    .find(|(name, _)| name == app_name)
                    .map(|(_, handle)| handle.clone());
                if let Some(handle) = &found {
                    self.applications.insert(app_name.to_string(), handle.clone());
                }
                found
            }
        };

        let started = match handle {
            Some(handle) => match handle.started().await {
                Ok(started) => Some(started),
                Err(e) => {
                    debug!(app = %app_name, error = %e, "Application went away");
                    self.applications.remove(app_name);
                    None
                }
            },
            None => None,
        };
        pass.checked.insert(app_name.to_string(), started);
        started
    }
}
