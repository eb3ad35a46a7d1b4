//! Child-death notifier
//!
//! SIGCHLD is received through tokio's signal driver, whose handler only
//! records the delivery. Reaping and bookkeeping happen here in an ordinary
//! task, so the ledger lock is never taken from signal context.

use crate::device::GppDevice;
use crate::health::{components, HealthRegistry};
use crate::models::Pid;
use std::io;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Collect every exited child without blocking
pub fn reap_exited() -> Vec<Pid> {
    let mut reaped = Vec::new();
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: `status` is a valid out-pointer and WNOHANG never blocks
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid > 0 {
            debug!(pid = pid, status = status, "Reaped child");
            reaped.push(pid);
            continue;
        }
        if pid < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ECHILD) {
                warn!(error = %err, "waitpid failed");
            }
        }
        return reaped;
    }
}

pub struct ChildReaper {
    device: Arc<GppDevice>,
    health: HealthRegistry,
}

impl ChildReaper {
    pub fn new(device: Arc<GppDevice>, health: HealthRegistry) -> Self {
        Self { device, health }
    }

    /// Reap all exited children and notify for each one
    pub fn drain(&self) -> usize {
        let reaped = reap_exited();
        for pid in &reaped {
            self.device.handle_child_exit(*pid);
        }
        reaped.len()
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) -> io::Result<()> {
        let mut sigchld = match signal(SignalKind::child()) {
            Ok(stream) => stream,
            Err(e) => {
                self.health
                    .set_unhealthy(components::REAPER, format!("SIGCHLD handler: {e}"))
                    .await;
                return Err(e);
            }
        };
        self.health.register(components::REAPER).await;
        info!("Starting child reaper");

        // Children may have exited before the handler was installed
        self.drain();

        loop {
            tokio::select! {
                delivered = sigchld.recv() => {
                    if delivered.is_none() {
                        warn!("SIGCHLD stream closed");
                        self.health
                            .set_unhealthy(components::REAPER, "SIGCHLD stream closed")
                            .await;
                        break;
                    }
                    self.drain();
                }
                _ = shutdown.recv() => {
                    info!("Shutting down child reaper");
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComponentDescription, DeviceEvent};
    use crate::test_support::Fixture;
    use std::time::Duration;

    // waitpid(-1) reaps any child of the test binary
    static REAPING: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    #[tokio::test]
    async fn test_reaps_exited_child_and_notifies() {
        let _serial = REAPING.lock().await;
        let f = Fixture::new();
        let child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id() as Pid;
        f.device
            .ledger()
            .record_launch(pid, ComponentDescription::new("Waveform1", "comp_1"))
            .unwrap();

        let reaper = ChildReaper::new(f.device.clone(), HealthRegistry::new());
        let mut reaped = 0;
        for _ in 0..100 {
            reaped += reaper.drain();
            if reaped > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(reaped, 1);
        assert_eq!(f.device.ledger().process_count().unwrap(), 0);
        let events = f.channel.events.lock().unwrap();
        match &events[..] {
            [DeviceEvent::ChildTerminated(event)] => {
                assert_eq!(event.component_id, "comp_1");
                assert_eq!(event.application_id, "Waveform1");
            }
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let _serial = REAPING.lock().await;
        let f = Fixture::new();
        let health = HealthRegistry::new();
        let reaper = ChildReaper::new(f.device.clone(), health.clone());
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(reaper.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("reaper did not stop")
            .unwrap();
        assert!(result.is_ok());
        assert!(health.status_of(components::REAPER).await.is_some());
    }
}
