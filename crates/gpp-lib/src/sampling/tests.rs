//! Integration tests for host sampling
//!
//! These tests build a mock /proc and /sys tree so parsing, state refresh
//! and reporting run without depending on the host.

#[cfg(test)]
mod mock_procfs_tests {
    use crate::error::GppError;
    use crate::models::NicAllocation;
    use crate::nic::NicFacade;
    use crate::observability::GppMetrics;
    use crate::sampling::{
        CpuState, CpuUsageAccumulator, LoadAverageState, MemoryState, Reporting, State,
        Statistics, SystemMonitor, SystemMonitorReporting,
    };
    use crate::test_support::write_mock_host;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::fs;

    async fn write_stat(root: &Path, user: u64, idle: u64) {
        let stat = format!("cpu  {user} 0 0 {idle} 0 0 0 0 0 0\ncpu0 {user} 0 0 {idle} 0 0 0 0 0 0\n");
        fs::write(root.join("stat"), stat).await.unwrap();
    }

    async fn write_net_dev(root: &Path, eth0_rx: u64, eth0_tx: u64) {
        let content = format!(
            "Inter-|   Receive |  Transmit\n face |bytes packets|bytes packets\n    \
             lo: 10 1 0 0 0 0 0 0 10 1 0 0 0 0 0 0\n  \
             eth0: {eth0_rx} 1 0 0 0 0 0 0 {eth0_tx} 1 0 0 0 0 0 0\n  \
             eth1: 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0\n"
        );
        fs::write(root.join("net").join("dev"), content).await.unwrap();
    }

    fn nic(root: &Path, filter: Vec<String>) -> NicFacade {
        NicFacade::new(root, root, filter, 80.0, GppMetrics::new())
    }

    #[tokio::test]
    async fn test_cpu_pipeline_idle_percent_and_average() {
        let temp = TempDir::new().unwrap();
        write_mock_host(temp.path());

        let state = Arc::new(CpuState::new(temp.path()));
        let accumulator = CpuUsageAccumulator::new(state.clone());

        write_stat(temp.path(), 100, 100).await;
        state.update_state().await.unwrap();
        accumulator.compute_statistics().unwrap();
        assert_eq!(accumulator.get_idle_percent(), 50.0);
        assert_eq!(state.cores(), 1);

        // +100 busy, +300 idle
        write_stat(temp.path(), 200, 400).await;
        state.update_state().await.unwrap();
        accumulator.compute_statistics().unwrap();
        assert_eq!(accumulator.get_idle_percent(), 75.0);
        assert_eq!(accumulator.get_idle_average(), 62.5);

        // No time passed; last value kept
        state.update_state().await.unwrap();
        accumulator.compute_statistics().unwrap();
        assert_eq!(accumulator.get_idle_percent(), 75.0);
    }

    #[tokio::test]
    async fn test_memory_state_prefers_available() {
        let temp = TempDir::new().unwrap();
        write_mock_host(temp.path());

        let memory = MemoryState::new(temp.path());
        memory.update_state().await.unwrap();
        assert_eq!(memory.physical_memory_total(), 8_000_000 * 1024);
        assert_eq!(memory.physical_memory_free(), 4_000_000 * 1024);
    }

    #[tokio::test]
    async fn test_missing_source_is_reported() {
        let temp = TempDir::new().unwrap();

        let memory = MemoryState::new(temp.path());
        let err = memory.update_state().await.unwrap_err();
        assert!(matches!(err, GppError::Source { .. }));

        let load = LoadAverageState::new(temp.path());
        assert!(load.update_state().await.is_err());
    }

    #[tokio::test]
    async fn test_system_monitor_reporting() {
        let temp = TempDir::new().unwrap();
        write_mock_host(temp.path());

        let cpu_state = Arc::new(CpuState::new(temp.path()));
        let cpu = Arc::new(CpuUsageAccumulator::new(cpu_state.clone()));
        let memory = Arc::new(MemoryState::new(temp.path()));
        let load = Arc::new(LoadAverageState::new(temp.path()));
        let monitor = SystemMonitor::new();
        let reporting = SystemMonitorReporting::new(
            cpu.clone(),
            memory.clone(),
            load.clone(),
            monitor.clone(),
            2,
            GppMetrics::new(),
        );

        cpu_state.update_state().await.unwrap();
        memory.update_state().await.unwrap();
        load.update_state().await.unwrap();
        cpu.compute_statistics().unwrap();
        reporting.report().unwrap();

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.idle_cpu_percent, 85.0);
        assert_eq!(snapshot.idle_cpu_average, 85.0);
        assert_eq!(snapshot.physical_memory_free, 4_000_000 * 1024);
        assert_eq!(snapshot.load_average, 3.5);
        assert_eq!(snapshot.processor_cores, 2);
        assert!(snapshot.timestamp > 0);
    }

    #[tokio::test]
    async fn test_nic_inventory_excludes_loopback() {
        let temp = TempDir::new().unwrap();
        write_mock_host(temp.path());
        write_net_dev(temp.path(), 0, 0).await;

        let facade = nic(temp.path(), Vec::new());
        facade.update_state().await.unwrap();
        assert_eq!(facade.get_devices(), vec!["eth0", "eth1"]);

        let filtered = nic(temp.path(), vec!["eth1".to_string()]);
        filtered.update_state().await.unwrap();
        assert_eq!(filtered.get_devices(), vec!["eth1"]);
    }

    #[tokio::test]
    async fn test_nic_link_properties_from_sysfs() {
        let temp = TempDir::new().unwrap();
        write_mock_host(temp.path());
        write_net_dev(temp.path(), 0, 0).await;

        let facade = nic(temp.path(), Vec::new());
        facade.update_state().await.unwrap();
        facade.compute_statistics().unwrap();
        facade.report().unwrap();

        let metrics = facade.nic_metrics();
        let eth0 = metrics.iter().find(|m| m.interface == "eth0").unwrap();
        assert_eq!(eth0.link_speed_mbps, 100.0);
        assert!(eth0.multicast_support);
        assert!(eth0.ip_addressable);
        assert_eq!(eth0.rate_available_mbps, 80.0);

        // No sysfs entry: default speed, flags unknown
        let eth1 = metrics.iter().find(|m| m.interface == "eth1").unwrap();
        assert_eq!(eth1.link_speed_mbps, 1000.0);
        assert!(!eth1.ip_addressable);
    }

    #[tokio::test]
    async fn test_nic_throughput_from_counter_deltas() {
        let temp = TempDir::new().unwrap();
        write_mock_host(temp.path());
        write_net_dev(temp.path(), 0, 0).await;

        let facade = nic(temp.path(), Vec::new());
        facade.update_state().await.unwrap();
        facade.compute_statistics().unwrap();
        assert_eq!(facade.get_throughput_by_device("eth0"), 0.0);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        write_net_dev(temp.path(), 1_000_000, 1_000_000).await;
        facade.update_state().await.unwrap();
        facade.compute_statistics().unwrap();

        assert!(facade.get_throughput_by_device("eth0") > 0.0);
        assert_eq!(facade.get_throughput_by_device("eth1"), 0.0);
        assert_eq!(facade.get_throughput_by_device("wlan0"), 0.0);
    }

    #[tokio::test]
    async fn test_nic_interface_removed_when_gone() {
        let temp = TempDir::new().unwrap();
        write_mock_host(temp.path());
        write_net_dev(temp.path(), 0, 0).await;

        let facade = nic(temp.path(), Vec::new());
        facade.update_state().await.unwrap();
        assert_eq!(facade.get_devices().len(), 2);

        fs::write(
            temp.path().join("net").join("dev"),
            "h1\nh2\n  eth0: 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0\n",
        )
        .await
        .unwrap();
        facade.update_state().await.unwrap();
        assert_eq!(facade.get_devices(), vec!["eth0"]);
    }

    #[tokio::test]
    async fn test_nic_allocations_dropped_with_interface() {
        let temp = TempDir::new().unwrap();
        write_mock_host(temp.path());
        write_net_dev(temp.path(), 0, 0).await;

        let facade = nic(temp.path(), Vec::new());
        facade.update_state().await.unwrap();
        let request = |identifier: &str, interface: &str| NicAllocation {
            identifier: identifier.to_string(),
            data_rate: 50.0,
            data_size: 1500,
            multicast_support: false,
            ip_addressable: false,
            interface: interface.to_string(),
        };
        facade.allocate_capacity(&request("kept", "eth0")).unwrap();
        facade.allocate_capacity(&request("orphan", "eth1")).unwrap();

        fs::write(
            temp.path().join("net").join("dev"),
            "h1\nh2\n  eth0: 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0\n",
        )
        .await
        .unwrap();
        facade.update_state().await.unwrap();

        let allocations = facade.allocations();
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].identifier, "kept");
        assert_eq!(facade.allocated_rate("eth1"), 0.0);

        // The identifier is free again once eth1 returns
        write_net_dev(temp.path(), 0, 0).await;
        facade.update_state().await.unwrap();
        assert!(facade.allocate_capacity(&request("orphan", "eth1")).is_ok());
    }
}
