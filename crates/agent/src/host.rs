//! Standalone host adapters
//!
//! When the agent runs outside a component framework it launches processes
//! itself, knows no applications, and writes device events to the log.

use async_trait::async_trait;
use gpp_lib::host::{
    ApplicationHandle, ApplicationRegistry, EventChannel, ExecuteRequest, ProcessExecutor,
};
use gpp_lib::{DeviceEvent, GppError, Pid, Result, TransportError};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info};

/// Spawns children directly on this host
///
/// Children are spawned through `std::process` and never waited on here;
/// the child reaper collects them with `waitpid`.
#[derive(Debug, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessExecutor for LocalExecutor {
    async fn execute(&self, request: &ExecuteRequest) -> Result<Pid> {
        let argv = request.argv();
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| GppError::ExecuteFailure("empty command line".to_string()))?;

        let child = Command::new(program)
            .args(args)
            .spawn()
            .map_err(|e| GppError::ExecuteFailure(format!("{program}: {e}")))?;
        let pid = Pid::try_from(child.id())
            .map_err(|_| GppError::ExecuteFailure(format!("pid {} out of range", child.id())))?;

        debug!(pid = pid, argv = ?argv, "Spawned child");
        Ok(pid)
    }

    async fn terminate(&self, pid: Pid) -> Result<()> {
        // Non-positive pids address process groups
        if pid <= 0 {
            return Err(GppError::InvalidProcess(pid));
        }
        // SAFETY: kill has no memory-safety preconditions
        if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::ESRCH) => Err(GppError::InvalidProcess(pid)),
            _ => Err(GppError::InvalidState(format!("kill {pid}: {err}"))),
        }
    }
}

/// Registry with no applications; launched components keep their reservations
#[derive(Debug, Default)]
pub struct NullApplicationRegistry;

#[async_trait]
impl ApplicationRegistry for NullApplicationRegistry {
    async fn list_applications(&self) -> Result<Vec<(String, Arc<dyn ApplicationHandle>)>> {
        Ok(Vec::new())
    }
}

/// Writes every device event to the structured log
#[derive(Debug, Default)]
pub struct TracingEventChannel;

impl EventChannel for TracingEventChannel {
    fn push(&self, event: DeviceEvent) -> std::result::Result<(), TransportError> {
        let payload = serde_json::to_string(&event).map_err(|e| TransportError(e.to_string()))?;
        info!(event = "device_event", payload = %payload, "Device event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_and_terminate_local_child() {
        let executor = LocalExecutor::new();
        let request = ExecuteRequest::new("sleep").parameter("5", "5");

        let pid = executor.execute(&request).await.unwrap();
        assert!(pid > 0);
        executor.terminate(pid).await.unwrap();

        // SAFETY: reaping our own child
        unsafe { libc::waitpid(pid, std::ptr::null_mut(), 0) };
        assert!(matches!(
            executor.terminate(pid).await,
            Err(GppError::InvalidProcess(p)) if p == pid
        ));
    }

    #[tokio::test]
    async fn test_execute_missing_binary_fails() {
        let executor = LocalExecutor::new();
        let request = ExecuteRequest::new("/nonexistent/gpp-component");

        assert!(matches!(
            executor.execute(&request).await,
            Err(GppError::ExecuteFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_terminate_rejects_group_pids() {
        let executor = LocalExecutor::new();
        assert!(matches!(
            executor.terminate(0).await,
            Err(GppError::InvalidProcess(0))
        ));
    }

    #[test]
    fn test_tracing_channel_accepts_events() {
        let channel = TracingEventChannel;
        let event = DeviceEvent::ChildTerminated(gpp_lib::ChildTerminationEvent {
            device_id: "gpp-1".to_string(),
            component_id: "comp_1".to_string(),
            application_id: "Waveform1".to_string(),
        });
        assert!(channel.push(event).is_ok());
    }
}
