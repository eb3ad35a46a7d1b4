//! GPP Agent - General-purpose processor resource manager
//!
//! This binary runs one GPP device per host: it samples CPU, memory,
//! load and NIC usage, raises threshold events, launches components and
//! answers capacity requests over HTTP.

use anyhow::Result;
use gpp_agent::{
    api,
    config::AgentConfig,
    host::{LocalExecutor, NullApplicationRegistry, TracingEventChannel},
};
use gpp_lib::{ChildReaper, GppDeviceBuilder, HealthRegistry, ServiceLoopBuilder};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting gpp-agent");

    // Load configuration
    let config = AgentConfig::load()?;
    info!(device_id = %config.device_id, "Agent configured");

    let mut builder = GppDeviceBuilder::new(&config.device_id)
        .label(&config.label)
        .properties(config.properties.clone())
        .executor(Arc::new(LocalExecutor::new()))
        .registry(Arc::new(NullApplicationRegistry))
        .events(Arc::new(TracingEventChannel));
    if let Some(dir) = &config.binary_dir {
        builder = builder.binary_dir(dir);
    }
    let device = Arc::new(builder.build()?);
    device
        .logger()
        .log_startup(AGENT_VERSION, device.processor_cores());

    let health_registry = HealthRegistry::new();
    let (shutdown_tx, _) = broadcast::channel(1);

    // Reap before anything can be launched
    let reaper = ChildReaper::new(device.clone(), health_registry.clone());
    let reaper_handle = tokio::spawn(reaper.run(shutdown_tx.subscribe()));

    let service_loop = ServiceLoopBuilder::new(device.clone(), config.properties.proc_root.clone())
        .health(health_registry.clone())
        .cycle_time(config.properties.cycle_time())
        .build()
        .await;
    let scheduler_handle = tokio::spawn(service_loop.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(health_registry, device.clone()));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    let mut sigterm = signal(SignalKind::terminate())?;
    let reason = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            "SIGINT received"
        }
        _ = sigterm.recv() => "SIGTERM received",
    };
    device.logger().log_shutdown(reason);
    let _ = shutdown_tx.send(());

    if let Err(e) = scheduler_handle.await {
        warn!(error = %e, "Scheduler task failed");
    }
    match reaper_handle.await {
        Ok(Err(e)) => warn!(error = %e, "Child reaper failed"),
        Err(e) => warn!(error = %e, "Child reaper task failed"),
        Ok(Ok(())) => {}
    }
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server failed"),
        Err(e) => warn!(error = %e, "API server task failed"),
        Ok(Ok(())) => {}
    }

    info!("Shutting down");
    Ok(())
}
