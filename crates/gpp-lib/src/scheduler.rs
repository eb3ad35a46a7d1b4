//! Scheduler loop
//!
//! Drives the device once per cycle:
//! (a) modified thresholds, (b) states, (c) statistics, (d) reports,
//! (e) memory loading, (f) threshold monitors, (g) usage state.
//!
//! A failure in (b)-(e) skips (g) for that cycle. Threshold monitors run
//! regardless and are a no-op on stale state.

use crate::device::GppDevice;
use crate::error::Result;
use crate::health::{components, HealthRegistry};
use crate::models::{ThresholdEvent, UsageState};
use crate::sampling::{
    CpuState, CpuUsageAccumulator, LoadAverageState, MemoryState, Reporting, State, Statistics,
    SystemMonitorReporting,
};
use crate::thresholds::{
    cpu_idle_monitor, free_memory_monitor, nic_throughput_monitor, ThresholdListener,
    ThresholdMonitor,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// How one cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(UsageState),
    /// Resource acquisition failed; usage state left unchanged
    Aborted,
}

pub struct ServiceLoop {
    device: Arc<GppDevice>,
    states: Vec<Arc<dyn State>>,
    statistics: Vec<Arc<dyn Statistics>>,
    reports: Vec<Arc<dyn Reporting>>,
    monitors: Vec<Box<dyn ThresholdMonitor>>,
    health: HealthRegistry,
    cycle_time: Duration,
    degraded: bool,
    cycles: u64,
}

impl ServiceLoop {
    pub fn monitors(&self) -> &[Box<dyn ThresholdMonitor>] {
        &self.monitors
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            cycle_time_ms = self.cycle_time.as_millis() as u64,
            monitors = self.monitors.len(),
            "Starting scheduler loop"
        );

        let mut ticker = interval(self.cycle_time);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down scheduler loop");
                    break;
                }
            }
        }
    }

    /// Run one full cycle
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let start = Instant::now();

        if let Err(e) = self.device.establish_modified_thresholds().await {
            warn!(error = %e, "Failed to establish modified thresholds");
        }

        let pipeline = self.run_pipeline().await;
        let threshold_events = self.update_threshold_monitors();

        let outcome = match pipeline.and_then(|_| self.device.update_usage_state()) {
            Ok(state) => {
                if self.degraded {
                    info!("Scheduler cycle recovered");
                    self.health.set_healthy(components::SCHEDULER).await;
                    self.degraded = false;
                }
                CycleOutcome::Completed(state)
            }
            Err(e) => {
                error!(error = %e, "Error acquiring resources, skipping remainder of cycle");
                self.device.metrics().inc_cycles_aborted();
                self.health
                    .set_degraded(components::SCHEDULER, e.to_string())
                    .await;
                self.degraded = true;
                CycleOutcome::Aborted
            }
        };

        let elapsed = start.elapsed();
        self.device
            .metrics()
            .observe_cycle_latency(elapsed.as_secs_f64());
        self.cycles += 1;
        if self.cycles == 1 {
            self.health.set_ready(true).await;
        }
        trace!(
            cycle = self.cycles,
            elapsed_us = elapsed.as_micros() as u64,
            outcome = ?outcome,
            threshold_events = threshold_events,
            "Scheduler cycle complete"
        );
        outcome
    }

    async fn run_pipeline(&self) -> Result<()> {
        for state in &self.states {
            state.update_state().await?;
        }
        for statistic in &self.statistics {
            statistic.compute_statistics()?;
        }
        for report in &self.reports {
            report.report()?;
        }
        self.device.calculate_system_memory_loading()
    }

    /// Number of monitors that changed state
    fn update_threshold_monitors(&mut self) -> usize {
        let mut fired = 0;
        for monitor in &mut self.monitors {
            if monitor.update().is_some() {
                fired += 1;
            }
            trace!(
                resource_id = monitor.resource_id(),
                threshold = monitor.threshold(),
                measured = monitor.measured(),
                "Evaluated threshold monitor"
            );
        }
        fired
    }
}

/// Builder wiring the sampling pipeline and monitors around a device
pub struct ServiceLoopBuilder {
    device: Arc<GppDevice>,
    proc_root: PathBuf,
    health: HealthRegistry,
    cycle_time: Duration,
    extra_states: Vec<Arc<dyn State>>,
}

impl ServiceLoopBuilder {
    pub fn new(device: Arc<GppDevice>, proc_root: impl Into<PathBuf>) -> Self {
        Self {
            device,
            proc_root: proc_root.into(),
            health: HealthRegistry::new(),
            cycle_time: Duration::from_secs(1),
            extra_states: Vec::new(),
        }
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn cycle_time(mut self, cycle_time: Duration) -> Self {
        self.cycle_time = cycle_time;
        self
    }

    /// Append a state refreshed after the built-in ones
    pub fn state(mut self, state: Arc<dyn State>) -> Self {
        self.extra_states.push(state);
        self
    }

    /// Build the loop, priming every state once so interfaces are known
    pub async fn build(self) -> ServiceLoop {
        let device = self.device;
        let nic = device.nic().clone();

        let cpu_state = Arc::new(CpuState::new(&self.proc_root));
        let cpu_usage = Arc::new(CpuUsageAccumulator::new(cpu_state.clone()));
        let memory = Arc::new(MemoryState::new(&self.proc_root));
        let load = Arc::new(LoadAverageState::new(&self.proc_root));
        let system_report = Arc::new(SystemMonitorReporting::new(
            cpu_usage.clone(),
            memory.clone(),
            load.clone(),
            device.monitor().clone(),
            device.processor_cores(),
            device.metrics().clone(),
        ));

        let mut states: Vec<Arc<dyn State>> = Vec::new();
        states.push(cpu_state);
        states.push(memory);
        states.push(load);
        states.push(nic.clone());
        states.extend(self.extra_states);

        let mut statistics: Vec<Arc<dyn Statistics>> = Vec::new();
        statistics.push(cpu_usage.clone());
        statistics.push(nic.clone());

        let mut reports: Vec<Arc<dyn Reporting>> = Vec::new();
        reports.push(system_report);
        reports.push(nic.clone());

        for state in &states {
            if let Err(e) = state.update_state().await {
                warn!(error = %e, "Initial state update failed");
            }
        }

        let listener: ThresholdListener = {
            let device = device.clone();
            Arc::new(move |event: &ThresholdEvent| device.send_threshold_event(event))
        };
        let source_id = device.device_id().to_string();
        let mut monitors: Vec<Box<dyn ThresholdMonitor>> = Vec::new();

        let threshold_device = device.clone();
        monitors.push(Box::new(cpu_idle_monitor(
            &source_id,
            move || threshold_device.modified_thresholds().cpu_idle,
            move || cpu_usage.get_idle_percent(),
        )));

        let threshold_device = device.clone();
        let measured_device = device.clone();
        monitors.push(Box::new(free_memory_monitor(
            &source_id,
            move || threshold_device.modified_thresholds().mem_free as f64,
            move || {
                let monitor = measured_device.monitor();
                // Nothing measured yet
                if !monitor.is_published() {
                    return f64::NAN;
                }
                monitor.physical_memory_free() as f64
            },
        )));

        let interfaces = nic.get_devices();
        if interfaces.is_empty() {
            warn!("No network interfaces found");
            self.health
                .set_degraded(components::NIC, "no network interfaces")
                .await;
        } else {
            self.health.register(components::NIC).await;
        }
        for interface in interfaces {
            info!(interface = %interface, "Adding interface");
            let threshold_device = device.clone();
            let nic = nic.clone();
            let name = interface.clone();
            monitors.push(Box::new(nic_throughput_monitor(
                &source_id,
                &interface,
                move || threshold_device.modified_thresholds().nic_usage,
                move || nic.get_throughput_by_device(&name),
            )));
        }

        for monitor in &mut monitors {
            monitor.attach_listener(listener.clone());
        }
        self.health.register(components::SCHEDULER).await;
        debug!(monitors = monitors.len(), "Threshold monitors attached");

        ServiceLoop {
            device,
            states,
            statistics,
            reports,
            monitors,
            health: self.health,
            cycle_time: self.cycle_time,
            degraded: false,
            cycles: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::ComponentStatus;
        use crate::test_support::{launch_request, write_mock_host, Fixture};
    use crate::thresholds::{CPU_IDLE_CLASS, NIC_THROUGHPUT_CLASS};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// State that fails with a resource acquisition error on demand
    #[derive(Default)]
    struct FlakyState {
        fail: AtomicBool,
    }

    #[async_trait]
    impl State for FlakyState {
        async fn update_state(&self) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(crate::error::GppError::ResourceAcquisition("test lock"));
            }
            Ok(())
        }
    }

    async fn service_loop(f: &Fixture, flaky: Arc<FlakyState>, health: HealthRegistry) -> ServiceLoop {
        ServiceLoopBuilder::new(f.device.clone(), f.root.path())
            .health(health)
            .cycle_time(Duration::from_millis(10))
            .state(flaky)
            .build()
            .await
    }

    #[tokio::test]
    async fn test_build_creates_monitors() {
        let f = Fixture::new();
        let service = service_loop(&f, Arc::default(), HealthRegistry::new()).await;

        let classes: Vec<&str> = service.monitors().iter().map(|m| m.message_class()).collect();
        assert_eq!(classes[0], CPU_IDLE_CLASS);
        assert_eq!(service.monitors().len(), 3);
        let nic = &service.monitors()[2];
        assert_eq!(nic.message_class(), NIC_THROUGHPUT_CLASS);
        assert_eq!(nic.resource_id(), "eth0");
    }

    #[tokio::test]
    async fn test_cycle_publishes_snapshot() {
        let f = Fixture::new();
        let mut service = service_loop(&f, Arc::default(), HealthRegistry::new()).await;

        let outcome = service.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Completed(UsageState::Idle));

        let snapshot = f.device.monitor().snapshot();
        assert_eq!(snapshot.physical_memory_total, 8_000_000 * 1024);
        assert_eq!(snapshot.physical_memory_free, 4_000_000 * 1024);
        assert_eq!(snapshot.load_average, 3.5);
        assert_eq!(snapshot.processor_cores, 4);
        assert_eq!(f.device.mem_capacity(), 4_000_000 * 1024);
        assert_eq!(f.device.nic().nic_metrics().len(), 1);
    }

    #[tokio::test]
    async fn test_active_when_processes_running() {
        let f = Fixture::new();
        let mut service = service_loop(&f, Arc::default(), HealthRegistry::new()).await;
        f.device.execute(launch_request("comp_1:Waveform1")).await.unwrap();

        assert_eq!(
            service.run_cycle().await,
            CycleOutcome::Completed(UsageState::Active)
        );
    }

    #[tokio::test]
    async fn test_aborted_cycle_skips_usage_state() {
        let f = Fixture::with(|p| p.thresholds.cpu_idle = 50.0);
        let flaky = Arc::new(FlakyState::default());
        let health = HealthRegistry::new();
        let mut service = service_loop(&f, flaky.clone(), health.clone()).await;

        flaky.fail.store(true, Ordering::SeqCst);
        f.device.execute(launch_request("comp_1:Waveform1")).await.unwrap();

        let outcome = service.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Aborted);
        assert_eq!(f.device.usage_state(), UsageState::Idle);
        assert_eq!(
            health.status_of(components::SCHEDULER).await,
            Some(ComponentStatus::Degraded)
        );

        flaky.fail.store(false, Ordering::SeqCst);
        assert_eq!(
            service.run_cycle().await,
            CycleOutcome::Completed(UsageState::Active)
        );
        assert_eq!(
            health.status_of(components::SCHEDULER).await,
            Some(ComponentStatus::Healthy)
        );
    }

    #[tokio::test]
    async fn test_monitors_quiet_before_first_report() {
        let f = Fixture::new();
        let mut service = service_loop(&f, Arc::default(), HealthRegistry::new()).await;

        // Every cycle aborts before the snapshot is published
        std::fs::remove_file(f.root.path().join("stat")).unwrap();
        assert_eq!(service.run_cycle().await, CycleOutcome::Aborted);
        assert!(!f.device.monitor().is_published());
        assert!(service.monitors().iter().all(|m| !m.is_exceeded()));
        assert!(f.channel.events.lock().unwrap().is_empty());

        // Memory well above the threshold once reported: still no event
        write_mock_host(f.root.path());
        assert_eq!(
            service.run_cycle().await,
            CycleOutcome::Completed(UsageState::Idle)
        );
        assert!(f.device.monitor().is_published());
        assert!(f.channel.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ready_after_first_cycle() {
        let f = Fixture::new();
        let health = HealthRegistry::new();
        let mut service = service_loop(&f, Arc::default(), health.clone()).await;

        assert!(!health.readiness().await.ready);
        service.run_cycle().await;
        assert!(health.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = Fixture::new();
        let service = service_loop(&f, Arc::default(), HealthRegistry::new()).await;
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(service.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("scheduler did not stop")
            .unwrap();
    }
}
