//! Error types surfaced by device operations

use crate::models::Pid;
use std::path::PathBuf;
use thiserror::Error;

/// Errors returned to callers of the device
#[derive(Debug, Error)]
pub enum GppError {
    /// An allocation or deallocation could not be satisfied
    #[error("invalid capacity '{capacity}': {reason}")]
    InvalidCapacity {
        capacity: String,
        reason: String,
        request: serde_json::Value,
    },

    #[error("execute failed: {0}")]
    ExecuteFailure(String),

    #[error("invalid process {0}")]
    InvalidProcess(Pid),

    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A property update was rejected; nothing was applied
    #[error("invalid property '{property}': {reason}")]
    InvalidProperty {
        property: &'static str,
        reason: String,
    },

    /// Internal contention during a scheduler cycle
    #[error("failed to acquire {0}")]
    ResourceAcquisition(&'static str),

    #[error("failed to read {}: {message}", path.display())]
    Source { path: PathBuf, message: String },
}

impl GppError {
    /// Build an InvalidCapacity error carrying the offending request
    pub fn invalid_capacity<T: serde::Serialize>(
        capacity: &str,
        reason: impl std::fmt::Display,
        request: &T,
    ) -> Self {
        GppError::InvalidCapacity {
            capacity: capacity.to_string(),
            reason: reason.to_string(),
            request: serde_json::to_value(request).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn unreadable(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        GppError::Source {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

pub type Result<T, E = GppError> = std::result::Result<T, E>;

/// Failure to deliver an event on the external channel
#[derive(Debug, Error)]
#[error("event transport error: {0}")]
pub struct TransportError(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NicAllocation;

    #[test]
    fn test_invalid_capacity_carries_request() {
        let request = NicAllocation {
            identifier: "alloc-1".to_string(),
            data_rate: 200.0,
            data_size: 1500,
            multicast_support: false,
            ip_addressable: false,
            interface: "eth0".to_string(),
        };

        let err = GppError::invalid_capacity("nic_allocation", "insufficient capacity", &request);
        match err {
            GppError::InvalidCapacity {
                capacity, request, ..
            } => {
                assert_eq!(capacity, "nic_allocation");
                assert_eq!(request["identifier"], "alloc-1");
                assert_eq!(request["interface"], "eth0");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
