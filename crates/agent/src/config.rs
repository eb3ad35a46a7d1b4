//! Agent configuration

use anyhow::{Context, Result};
use gpp_lib::GppProperties;
use serde::Deserialize;
use std::path::PathBuf;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "GPP_CONFIG";

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Identifier stamped on every event this device emits
    #[serde(default = "default_device_id")]
    pub device_id: String,

    #[serde(default = "default_label")]
    pub label: String,

    /// API server port for health, metrics and capacity requests
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Directory holding `gpp.screenrc`, the binary's directory when unset
    #[serde(default)]
    pub binary_dir: Option<PathBuf>,

    #[serde(default)]
    pub properties: GppProperties,
}

fn default_device_id() -> String {
    std::env::var("HOSTNAME")
        .map(|host| format!("GPP_{host}"))
        .unwrap_or_else(|_| "GPP".to_string())
}

fn default_label() -> String {
    "GPP".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl AgentConfig {
    /// Load configuration from an optional file and `GPP_*` environment variables.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `GPP_PROPERTIES__LOAD_THRESHOLD=90`.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.add_source(config::File::with_name(&path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("GPP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("properties.nic_interfaces"),
            )
            .build()
            .context("failed to read agent configuration")?;

        config
            .try_deserialize()
            .context("invalid agent configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, File, FileFormat};

    fn parse(toml: &str) -> AgentConfig {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = parse("device_id = \"gpp-1\"");

        assert_eq!(config.device_id, "gpp-1");
        assert_eq!(config.label, "GPP");
        assert_eq!(config.api_port, 8080);
        assert!(config.binary_dir.is_none());
        assert_eq!(config.properties.threshold_cycle_time_ms, 1000);
        assert_eq!(config.properties.load_threshold, 80.0);
    }

    #[test]
    fn test_nested_properties() {
        let config = parse(
            r#"
            device_id = "gpp-2"
            api_port = 9000

            [properties]
            reserved_capacity_per_component = 0.25
            nic_interfaces = ["eth0"]
            use_screen = true

            [properties.thresholds]
            cpu_idle = 20.0
            "#,
        );

        assert_eq!(config.api_port, 9000);
        assert_eq!(config.properties.reserved_capacity_per_component, 0.25);
        assert_eq!(config.properties.nic_interfaces, vec!["eth0"]);
        assert!(config.properties.use_screen);
        assert_eq!(config.properties.thresholds.cpu_idle, 20.0);
        assert_eq!(config.properties.thresholds.nic_usage, 80.0);
    }
}
