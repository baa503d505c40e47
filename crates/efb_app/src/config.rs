//! Application configuration
//!
//! Loaded from a TOML file; every field has a default, so an empty file (or
//! no file at all) is a valid configuration.
//!
//! ```toml
//! log_filter = "info,efb_rpc=debug"
//!
//! [rpc]
//! default_timeout_ms = 10000
//! [rpc.timeouts_ms]
//! ImportFlightPlan = 30000
//!
//! [notifications]
//! tick_interval_ms = 100
//! default_lifespan_ms = 5000
//! ```

use anyhow::{Context, Result};
use efb_core::NotificationConfig;
use efb_rpc::RpcConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// `tracing` filter used when `RUST_LOG` is not set
    pub log_filter: String,
    pub rpc: RpcConfig,
    pub notifications: NotificationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            rpc: RpcConfig::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid EFB configuration")
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use efb_core::Lifetime;
    use std::time::Duration;

    #[test]
    fn test_empty_config_is_default() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.notifications.tick_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_partial_tables() {
        let config = AppConfig::from_toml_str(
            r#"
            log_filter = "debug"

            [rpc.timeouts_ms]
            GetMetar = 5000

            [notifications]
            default_lifespan_ms = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.rpc.default_timeout_ms, 10_000);
        assert_eq!(config.rpc.timeout_for("GetMetar"), Some(Duration::from_secs(5)));
        assert_eq!(config.notifications.tick_interval_ms, 100);
        assert_eq!(config.notifications.default_lifetime(), Lifetime::Indefinite);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let err = AppConfig::from_toml_str("[notifications]\ntick_interval_ms = \"fast\"").unwrap_err();
        assert!(err.to_string().contains("Invalid EFB configuration"));
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = std::env::temp_dir().join(format!("efb-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("efb.toml");

        let config = AppConfig {
            log_filter: "warn".into(),
            ..AppConfig::default()
        };
        fs::write(&path, config.to_toml().unwrap()).unwrap();
        assert_eq!(AppConfig::load(&path).unwrap(), config);

        assert!(AppConfig::load(&dir.join("missing.toml")).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }
}
