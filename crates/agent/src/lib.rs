//! GPP agent - wiring for the standalone resource-management daemon
//!
//! Exposes the HTTP API, configuration loading and the local host
//! adapters so the binary and the integration tests share them.

pub mod api;
pub mod config;
pub mod host;
