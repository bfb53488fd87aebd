//! Configuration management for the fleet console

pub mod file;
pub mod store;

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

pub use store::{ConfigStore, Validate, Versioned};

use crate::{Error, Result};

/// Default shared deadline for a batch operation
pub const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 30;

/// Default settle delay between stop and start during a restart
pub const DEFAULT_RESTART_DELAY_MS: u64 = 500;

/// Default per-probe timeout for discovery
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: u64 = 3;

/// Default discovery worker pool size
pub const DEFAULT_DISCOVERY_MAX_WORKERS: usize = 50;

/// Default cap on the number of addresses a single scan may cover
pub const DEFAULT_MAX_HOSTS_PER_SCAN: usize = 65_536;

/// Fleet console configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (database)
    pub data_dir: PathBuf,

    /// HTTP API server configuration
    pub api_server: ApiServerConfig,

    /// Runtime-tunable settings (published into a `ConfigStore`)
    pub settings: Settings,

    /// Connectivity monitor configuration
    pub monitor: MonitorConfig,

    /// Statically configured nodes
    pub nodes: Vec<NodeConfig>,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Bearer key for `/api` routes (from `FLEET_API_KEY` env)
    pub api_key: Option<SecretString>,
}

/// Connectivity monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Seconds between connectivity checks
    pub refresh_interval_secs: u64,
}

/// A statically configured supervisor node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub environment: Option<String>,
}

/// Runtime tunables shared by the engines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Shared deadline for a whole batch operation
    pub batch_timeout_secs: u64,

    /// Settle delay between stop and start during a restart
    pub restart_delay_ms: u64,

    /// Per-probe timeout applied when a scan request leaves it unset
    pub discovery_timeout_secs: u64,

    /// Worker pool size applied when a scan request leaves it unset
    pub discovery_max_workers: usize,

    /// Largest address range a single scan may cover
    pub max_hosts_per_scan: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            batch_timeout_secs: DEFAULT_BATCH_TIMEOUT_SECS,
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
            discovery_timeout_secs: DEFAULT_DISCOVERY_TIMEOUT_SECS,
            discovery_max_workers: DEFAULT_DISCOVERY_MAX_WORKERS,
            max_hosts_per_scan: DEFAULT_MAX_HOSTS_PER_SCAN,
        }
    }
}

impl Validate for Settings {
    fn validate(&self) -> Result<()> {
        if !(1..=600).contains(&self.batch_timeout_secs) {
            return Err(Error::Validation(
                "batch_timeout_secs must be between 1 and 600".to_string(),
            ));
        }
        if self.restart_delay_ms > 60_000 {
            return Err(Error::Validation(
                "restart_delay_ms must not exceed 60000".to_string(),
            ));
        }
        if !(1..=60).contains(&self.discovery_timeout_secs) {
            return Err(Error::Validation(
                "discovery_timeout_secs must be between 1 and 60".to_string(),
            ));
        }
        if !(1..=crate::discovery::MAX_WORKERS_LIMIT).contains(&self.discovery_max_workers) {
            return Err(Error::Validation(format!(
                "discovery_max_workers must be between 1 and {}",
                crate::discovery::MAX_WORKERS_LIMIT
            )));
        }
        if self.max_hosts_per_scan == 0 {
            return Err(Error::Validation(
                "max_hosts_per_scan must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the resulting settings are invalid
    pub fn load() -> Result<Self> {
        Self::from_file(file::load_config_file())
    }

    /// Build configuration from a parsed file, applying env overrides
    ///
    /// # Errors
    ///
    /// Returns error if the resulting settings are invalid or node names collide
    pub fn from_file(fc: file::FleetConfigFile) -> Result<Self> {
        let api_server = ApiServerConfig {
            port: env_parse("FLEET_PORT")
                .or(fc.server.port)
                .unwrap_or(8090),
            api_key: std::env::var("FLEET_API_KEY")
                .ok()
                .or(fc.server.api_key)
                .map(SecretString::from),
        };

        let settings = Settings {
            batch_timeout_secs: env_parse("FLEET_BATCH_TIMEOUT_SECS")
                .or(fc.batch.timeout_secs)
                .unwrap_or(DEFAULT_BATCH_TIMEOUT_SECS),
            restart_delay_ms: env_parse("FLEET_RESTART_DELAY_MS")
                .or(fc.batch.restart_delay_ms)
                .unwrap_or(DEFAULT_RESTART_DELAY_MS),
            discovery_timeout_secs: fc
                .discovery
                .timeout_secs
                .unwrap_or(DEFAULT_DISCOVERY_TIMEOUT_SECS),
            discovery_max_workers: fc
                .discovery
                .max_workers
                .unwrap_or(DEFAULT_DISCOVERY_MAX_WORKERS),
            max_hosts_per_scan: fc
                .discovery
                .max_hosts_per_scan
                .unwrap_or(DEFAULT_MAX_HOSTS_PER_SCAN),
        };
        settings.validate()?;

        let monitor = MonitorConfig {
            refresh_interval_secs: fc.monitor.refresh_interval_secs.unwrap_or(30).max(1),
        };

        // Determine data directory (~/.local/share/fleet-console on Linux)
        let data_dir = std::env::var("FLEET_DATA_DIR")
            .ok()
            .or(fc.server.data_dir)
            .map_or_else(
                || {
                    directories::BaseDirs::new()
                        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("fleet-console"))
                },
                PathBuf::from,
            );

        let mut nodes: Vec<NodeConfig> = Vec::with_capacity(fc.nodes.len());
        for n in fc.nodes {
            if nodes.iter().any(|existing| existing.name == n.name) {
                return Err(Error::Config(format!("duplicate node name '{}'", n.name)));
            }
            nodes.push(NodeConfig {
                name: n.name,
                host: n.host,
                port: n.port,
                username: n.username,
                password: n.password.map(SecretString::from),
                environment: n.environment,
            });
        }

        Ok(Self {
            data_dir,
            api_server,
            settings,
            monitor,
            nodes,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
