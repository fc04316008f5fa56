//! Configuration loader.
//!
//! Environment-aware TOML loading: a base file plus an optional
//! `owl-gateway.<environment>.toml` override merged table-by-table.
//! Missing files fall back to defaults so the gateway can start with no
//! configuration at all.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use super::GatewayConfig;
use crate::error::{GatewayError, Result};

const BASE_FILE: &str = "owl-gateway.toml";

pub struct ConfigManager {
    config: GatewayConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection.
    pub fn load() -> Result<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load from a specific directory (defaults to `./config`).
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> Result<Arc<ConfigManager>> {
        let environment = crate::logging::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load with an explicit environment. Used by tests to avoid mutating
    /// process-global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> Result<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment,
            directory = %config_directory.display(),
            "loading gateway configuration"
        );

        let config = Self::load_and_merge(&config_directory, environment)?;
        config.validate()?;

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Load a single explicit file with no environment merging. Worker
    /// processes receive their configuration path this way.
    pub fn load_file(path: &Path) -> Result<Arc<ConfigManager>> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: GatewayConfig = toml::from_str(&raw)
            .map_err(|e| GatewayError::Configuration(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: crate::logging::detect_environment(),
            config_directory: path.parent().unwrap_or(Path::new(".")).to_path_buf(),
        }))
    }

    /// Wrap an already-built configuration (tests, embedded usage).
    pub fn from_config(config: GatewayConfig, environment: &str) -> Arc<ConfigManager> {
        Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::new(),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn load_and_merge(dir: &Path, environment: &str) -> Result<GatewayConfig> {
        let base_path = dir.join(BASE_FILE);
        let mut merged = match Self::read_toml(&base_path)? {
            Some(value) => value,
            None => {
                warn!(
                    path = %base_path.display(),
                    "no base configuration file, using built-in defaults"
                );
                toml::Value::Table(toml::map::Map::new())
            }
        };

        let env_path = dir.join(format!("owl-gateway.{environment}.toml"));
        if let Some(overlay) = Self::read_toml(&env_path)? {
            debug!(path = %env_path.display(), "applying environment overrides");
            merge_toml(&mut merged, overlay);
        }

        merged
            .try_into()
            .map_err(|e| GatewayError::Configuration(format!("invalid configuration: {e}")))
    }

    fn read_toml(path: &Path) -> Result<Option<toml::Value>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let value = raw
            .parse::<toml::Value>()
            .map_err(|e| GatewayError::Configuration(format!("{}: {e}", path.display())))?;
        Ok(Some(value))
    }
}

/// Deep-merge `overlay` into `base`. Tables merge recursively; everything
/// else (including arrays) is replaced wholesale.
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(base_value) if base_value.is_table() && overlay_value.is_table() => {
                        merge_toml(base_value, overlay_value);
                    }
                    _ => {
                        base_table.insert(key, overlay_value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_directory_yields_defaults() {
        let manager =
            ConfigManager::load_from_directory_with_env(Some(PathBuf::from("/nonexistent")), "test")
                .expect("defaults should load");
        assert_eq!(manager.config().pools.browser_workers, 2);
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn environment_file_overrides_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("owl-gateway.toml"),
            "[pools]\nbrowser_workers = 4\nlaunch_timeout_secs = 10\n",
        )
        .expect("write base");
        fs::write(
            dir.path().join("owl-gateway.test.toml"),
            "[pools]\nbrowser_workers = 1\n",
        )
        .expect("write overlay");

        let manager = ConfigManager::load_from_directory_with_env(
            Some(dir.path().to_path_buf()),
            "test",
        )
        .expect("load");

        // Overlay wins where set, base survives where not.
        assert_eq!(manager.config().pools.browser_workers, 1);
        assert_eq!(manager.config().pools.launch_timeout_secs, 10);
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join("owl-gateway.toml"),
            "[pools]\nbrowser_workers = 0\n",
        )
        .expect("write base");

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(result.is_err());
    }

    #[test]
    fn merge_replaces_arrays_wholesale() {
        let mut base: toml::Value = "a = [1, 2, 3]".parse().expect("base");
        let overlay: toml::Value = "a = [9]".parse().expect("overlay");
        merge_toml(&mut base, overlay);
        assert_eq!(base["a"].as_array().map(Vec::len), Some(1));
    }
}
