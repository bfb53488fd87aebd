//! TOML configuration file loading
//!
//! Supports `~/.config/fleet-console/config.toml` (or `$FLEET_CONFIG`) as a
//! persistent config source. All fields are optional; the file is a partial
//! overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct FleetConfigFile {
    /// Server/runtime configuration
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Batch operation tuning
    #[serde(default)]
    pub batch: BatchFileConfig,

    /// Discovery defaults
    #[serde(default)]
    pub discovery: DiscoveryFileConfig,

    /// Connectivity monitor
    #[serde(default)]
    pub monitor: MonitorFileConfig,

    /// Statically configured supervisor nodes
    #[serde(default)]
    pub nodes: Vec<NodeFileConfig>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Bearer key required on `/api` routes
    pub api_key: Option<String>,

    /// Data directory (database)
    pub data_dir: Option<String>,
}

/// Batch operation configuration
#[derive(Debug, Default, Deserialize)]
pub struct BatchFileConfig {
    /// Shared deadline for a whole batch, in seconds
    pub timeout_secs: Option<u64>,

    /// Delay between stop and start during a restart, in milliseconds
    pub restart_delay_ms: Option<u64>,
}

/// Discovery configuration
#[derive(Debug, Default, Deserialize)]
pub struct DiscoveryFileConfig {
    /// Per-probe timeout when the request leaves it unset
    pub timeout_secs: Option<u64>,

    /// Worker pool size when the request leaves it unset
    pub max_workers: Option<usize>,

    /// Largest range a single scan may cover
    pub max_hosts_per_scan: Option<usize>,
}

/// Monitor configuration
#[derive(Debug, Default, Deserialize)]
pub struct MonitorFileConfig {
    /// Seconds between connectivity checks
    pub refresh_interval_secs: Option<u64>,
}

/// One `[[nodes]]` entry
#[derive(Debug, Deserialize)]
pub struct NodeFileConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_node_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub environment: Option<String>,
}

const fn default_node_port() -> u16 {
    9001
}

/// Load the TOML config file from the standard path
///
/// Returns `FleetConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> FleetConfigFile {
    let Some(path) = config_file_path() else {
        return FleetConfigFile::default();
    };

    if !path.exists() {
        return FleetConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                FleetConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            FleetConfigFile::default()
        }
    }
}

/// Parse config file content
///
/// # Errors
///
/// Returns error if the content is not valid TOML for this schema
pub fn parse(content: &str) -> crate::Result<FleetConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `$FLEET_CONFIG` or `~/.config/fleet-console/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FLEET_CONFIG") {
        return Some(PathBuf::from(path));
    }
    directories::BaseDirs::new().map(|d| d.config_dir().join("fleet-console").join("config.toml"))
}
