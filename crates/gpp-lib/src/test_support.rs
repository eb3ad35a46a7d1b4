//! Mock host collaborators and a device fixture shared by unit tests

use crate::device::{GppDevice, GppDeviceBuilder, COMPONENT_IDENTIFIER};
use crate::error::{GppError, Result, TransportError};
use crate::host::{
    ApplicationHandle, ApplicationRegistry, EventChannel, ExecuteRequest, ProcessExecutor,
};
use crate::models::{DeviceEvent, Pid};
use crate::properties::GppProperties;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Default)]
pub struct MockExecutor {
    pub next_pid: AtomicI32,
    pub fail_execute: AtomicBool,
    pub fail_terminate: AtomicBool,
    pub launched: Mutex<Vec<ExecuteRequest>>,
    pub terminated: Mutex<Vec<Pid>>,
}

#[async_trait]
impl ProcessExecutor for MockExecutor {
    async fn execute(&self, request: &ExecuteRequest) -> Result<Pid> {
        if self.fail_execute.load(Ordering::SeqCst) {
            return Err(GppError::ExecuteFailure("no such binary".to_string()));
        }
        self.launched.lock().unwrap().push(request.clone());
        Ok(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    async fn terminate(&self, pid: Pid) -> Result<()> {
        if self.fail_terminate.load(Ordering::SeqCst) {
            return Err(GppError::InvalidProcess(pid));
        }
        self.terminated.lock().unwrap().push(pid);
        Ok(())
    }
}

pub struct MockApp(pub AtomicBool);

#[async_trait]
impl ApplicationHandle for MockApp {
    async fn started(&self) -> Result<bool> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct MockRegistry {
    pub apps: Vec<(String, Arc<MockApp>)>,
}

#[async_trait]
impl ApplicationRegistry for MockRegistry {
    async fn list_applications(&self) -> Result<Vec<(String, Arc<dyn ApplicationHandle>)>> {
        Ok(self
            .apps
            .iter()
            .map(|(name, app)| (name.clone(), app.clone() as Arc<dyn ApplicationHandle>))
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingChannel {
    pub events: Mutex<Vec<DeviceEvent>>,
    pub fail: AtomicBool,
}

impl EventChannel for RecordingChannel {
    fn push(&self, event: DeviceEvent) -> std::result::Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError("channel closed".to_string()));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

/// Write a minimal /proc and /sys tree
pub fn write_mock_host(root: &Path) {
    let net = root.join("net");
    std::fs::create_dir_all(&net).unwrap();
    std::fs::write(
        root.join("stat"),
        "cpu  1000 0 500 8000 500 0 0 0 0 0\ncpu0 500 0 250 4000 250 0 0 0 0 0\ncpu1 500 0 250 4000 250 0 0 0 0 0\n",
    )
    .unwrap();
    std::fs::write(
        root.join("meminfo"),
        "MemTotal:        8000000 kB\nMemFree:         2000000 kB\nMemAvailable:    4000000 kB\n",
    )
    .unwrap();
    std::fs::write(root.join("loadavg"), "3.50 2.00 1.00 2/345 6789\n").unwrap();
    std::fs::write(
        net.join("dev"),
        "Inter-|   Receive                                                |  Transmit\n \
         face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n    \
         lo: 1000 10 0 0 0 0 0 0 1000 10 0 0 0 0 0 0\n  \
         eth0: 5000 50 0 0 0 0 0 0 7000 70 0 0 0 0 0 0\n",
    )
    .unwrap();

    let eth0 = root.join("class").join("net").join("eth0");
    std::fs::create_dir_all(&eth0).unwrap();
    std::fs::write(eth0.join("speed"), "100\n").unwrap();
    std::fs::write(eth0.join("flags"), "0x1003\n").unwrap();
}

/// A device wired to mocks, with /proc and /sys rooted in a temp tree
pub struct Fixture {
    pub device: Arc<GppDevice>,
    pub executor: Arc<MockExecutor>,
    pub app: Arc<MockApp>,
    pub channel: Arc<RecordingChannel>,
    pub root: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with(|_| {})
    }

    pub fn with(configure: impl FnOnce(&mut GppProperties)) -> Self {
        let root = TempDir::new().unwrap();
        write_mock_host(root.path());

        let mut properties = GppProperties {
            processor_cores: Some(4),
            proc_root: root.path().to_path_buf(),
            sys_root: root.path().to_path_buf(),
            ..Default::default()
        };
        configure(&mut properties);

        let executor = Arc::new(MockExecutor {
            next_pid: AtomicI32::new(1234),
            ..Default::default()
        });
        let app = Arc::new(MockApp(AtomicBool::new(false)));
        let registry = Arc::new(MockRegistry {
            apps: vec![("Waveform1".to_string(), app.clone())],
        });
        let channel = Arc::new(RecordingChannel::default());

        let device = GppDeviceBuilder::new("gpp-test")
            .label("GPP")
            .properties(properties)
            .binary_dir("/opt/gpp")
            .executor(executor.clone())
            .registry(registry)
            .events(channel.clone())
            .build()
            .unwrap();

        Self {
            device: Arc::new(device),
            executor,
            app,
            channel,
            root,
        }
    }
}

pub fn launch_request(component_id: &str) -> ExecuteRequest {
    ExecuteRequest::new("/opt/comp/bin/comp").parameter(COMPONENT_IDENTIFIER, component_id)
}
