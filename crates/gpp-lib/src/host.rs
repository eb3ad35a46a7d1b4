//! Interfaces to the component-lifecycle host
//!
//! The device never forks, signals or publishes on its own. Process
//! creation, application lookup and event transport are supplied by the
//! embedding host through these traits.

use crate::error::{Result, TransportError};
use crate::models::{DeviceEvent, Pid};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Everything the executor needs to start one child process
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    /// Path or name of the binary to run
    pub name: String,
    /// Executor options, opaque to the device
    #[serde(default)]
    pub options: HashMap<String, String>,
    /// Component parameters, passed as `KEY VALUE` argument pairs
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Arguments placed before the binary, such as a session wrapper
    #[serde(default)]
    pub prepend_args: Vec<String>,
}

impl ExecuteRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Full argument vector, wrapper first, parameters sorted by key
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self.prepend_args.clone();
        argv.push(self.name.clone());

        let mut keys: Vec<&String> = self.parameters.keys().collect();
        keys.sort();
        for key in keys {
            argv.push(key.clone());
            argv.push(self.parameters[key].clone());
        }
        argv
    }
}

/// Creates and destroys OS processes
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Start a process; fails with `ExecuteFailure`
    async fn execute(&self, request: &ExecuteRequest) -> Result<Pid>;

    /// Stop a process; fails with `InvalidProcess` or `InvalidState`
    async fn terminate(&self, pid: Pid) -> Result<()>;
}

/// A running application known to the host
#[async_trait]
pub trait ApplicationHandle: Send + Sync {
    /// Whether the application has finished starting; fails if the handle is stale
    async fn started(&self) -> Result<bool>;
}

/// Directory of applications known to the host
#[async_trait]
pub trait ApplicationRegistry: Send + Sync {
    async fn list_applications(&self) -> Result<Vec<(String, Arc<dyn ApplicationHandle>)>>;
}

/// Outbound event transport
pub trait EventChannel: Send + Sync {
    fn push(&self, event: DeviceEvent) -> Result<(), TransportError>;
}
