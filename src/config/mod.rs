//! Gateway configuration system.
//!
//! All tunables come from TOML files with environment-specific overrides;
//! nothing is hardcoded in the execution paths. `ConfigManager` handles
//! discovery, environment detection, and merging.
//!
//! ```rust,no_run
//! use owl_gateway::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let bind = manager.config().server.bind_address.clone();
//! # Ok(())
//! # }
//! ```

pub mod loader;

pub use loader::ConfigManager;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::society::ModuleManifest;

/// Root configuration structure mirroring `owl-gateway.toml`.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub pools: PoolConfig,
    pub streaming: StreamingConfig,
    pub society: SocietyConfig,
    pub browser: BrowserConfig,
    pub snapshot: SnapshotConfig,
    pub logging: LoggingConfig,
    /// Manifest overrides and additions merged into the built-in catalog.
    pub modules: Vec<ModuleManifest>,
}

/// HTTP/WebSocket server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub cors_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            cors_enabled: true,
        }
    }
}

/// Worker pool sizing and timeout layers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of persistent browser worker processes.
    pub browser_workers: usize,
    /// Short watchdog stage: did the browser launch at all.
    pub launch_timeout_secs: u64,
    /// Long watchdog stage: overall society execution bound.
    pub completion_timeout_secs: u64,
    /// How long the generic-pool monitor waits for a child's reply.
    pub result_wait_secs: u64,
    /// Interval between monitor heartbeat updates to the registry.
    pub monitor_heartbeat_secs: u64,
    /// Bounded wait applied to each child during shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            browser_workers: 2,
            launch_timeout_secs: 20,
            completion_timeout_secs: 600,
            result_wait_secs: 3600,
            monitor_heartbeat_secs: 30,
            shutdown_grace_secs: 5,
        }
    }
}

impl PoolConfig {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }

    pub fn result_wait(&self) -> Duration {
        Duration::from_secs(self.result_wait_secs)
    }

    pub fn monitor_heartbeat(&self) -> Duration {
        Duration::from_secs(self.monitor_heartbeat_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// WebSocket push-loop behavior.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Registry poll interval for the push loop.
    pub poll_interval_ms: u64,
    /// Send an elapsed-time log message every N polls.
    pub heartbeat_every_polls: u32,
    /// Per-task wall-clock bound; exceeded means a forced error event.
    pub task_timeout_secs: u64,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            heartbeat_every_polls: 20,
            task_timeout_secs: 600,
        }
    }
}

impl StreamingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }
}

/// External agent-society framework invocation.
///
/// The gateway treats society construction and execution as an external
/// collaborator: a command that receives the module name and query and
/// prints a JSON outcome on stdout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SocietyConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for SocietyConfig {
    fn default() -> Self {
        Self {
            command: "owl-run".to_string(),
            args: Vec::new(),
        }
    }
}

/// Browser executable discovery and best-effort installation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Extra executable paths probed before the built-in list.
    pub executable_paths: Vec<String>,
    /// Optional fallback installer, e.g. `["npx", "playwright", "install", "chromium"]`.
    pub install_command: Vec<String>,
    pub install_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable_paths: Vec::new(),
            install_command: Vec::new(),
            install_timeout_secs: 300,
        }
    }
}

impl BrowserConfig {
    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

/// Periodic registry snapshot for crash recovery. Best effort, advisory only.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub interval_secs: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("logs"),
            interval_secs: 10,
        }
    }
}

impl SnapshotConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.directory.join("registry_snapshot.json")
    }
}

/// Log file placement.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
        }
    }
}

impl GatewayConfig {
    /// Validate invariants that would otherwise fail deep inside execution.
    pub fn validate(&self) -> Result<()> {
        if self.pools.browser_workers == 0 {
            return Err(GatewayError::Configuration(
                "pools.browser_workers must be at least 1".to_string(),
            ));
        }
        if self.streaming.poll_interval_ms == 0 {
            return Err(GatewayError::Configuration(
                "streaming.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.pools.launch_timeout_secs >= self.pools.completion_timeout_secs {
            return Err(GatewayError::Configuration(
                "pools.launch_timeout_secs must be below completion_timeout_secs".to_string(),
            ));
        }
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(GatewayError::Configuration(format!(
                "server.bind_address is not a valid socket address: {}",
                self.server.bind_address
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pools.browser_workers, 2);
        assert_eq!(config.streaming.poll_interval_ms, 500);
        assert_eq!(config.snapshot.interval_secs, 10);
    }

    #[test]
    fn rejects_zero_browser_workers() {
        let mut config = GatewayConfig::default();
        config.pools.browser_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_inverted_watchdog_stages() {
        let mut config = GatewayConfig::default();
        config.pools.launch_timeout_secs = 700;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_bind_address() {
        let mut config = GatewayConfig::default();
        config.server.bind_address = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn snapshot_path_is_under_directory() {
        let config = SnapshotConfig {
            directory: PathBuf::from("/tmp/owl"),
            ..SnapshotConfig::default()
        };
        assert_eq!(
            config.snapshot_path(),
            PathBuf::from("/tmp/owl/registry_snapshot.json")
        );
    }
}
