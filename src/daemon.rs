//! Daemon - the fleet console service
//!
//! Wires configuration, database, fleet registry, engines, the connectivity
//! monitor and the HTTP API, then runs until interrupted.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::api::{ApiServer, ApiState};
use crate::config::{ConfigStore, Settings};
use crate::db::{self, ActivityRepo, DbPool, DiscoveryRepo};
use crate::discovery::{DiscoveryEngine, SupervisorProber};
use crate::nodes::{Fleet, SharedFleet, monitor};
use crate::{Config, Result};

/// The fleet console daemon
pub struct Daemon {
    config: Config,
    port: u16,
    db: DbPool,
    fleet: SharedFleet,
    settings: Arc<ConfigStore<Settings>>,
    discovery: Arc<DiscoveryEngine>,
}

impl Daemon {
    /// Create a new daemon instance
    ///
    /// Opens the database, fails tasks interrupted by a previous run and
    /// registers the configured nodes.
    ///
    /// # Errors
    ///
    /// Returns error if initialization fails
    pub fn new(config: Config, port: u16) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db_path = config.data_dir.join("fleet.db");
        let db = db::init(&db_path)?;

        tracing::info!(path = %db_path.display(), "database initialized");

        let fleet = Arc::new(Fleet::from_config(&config.nodes)?);
        let settings = Arc::new(ConfigStore::new(config.settings.clone()));
        let discovery = Arc::new(DiscoveryEngine::new(
            DiscoveryRepo::new(db.clone()),
            ActivityRepo::new(db.clone()),
            Arc::new(SupervisorProber::new()),
            settings.clone(),
        ));
        discovery.recover()?;

        Ok(Self {
            config,
            port,
            db,
            fleet,
            settings,
            discovery,
        })
    }

    /// Run the daemon until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the API server fails
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            port = self.port,
            nodes = self.fleet.len(),
            "daemon running"
        );

        let shutdown = CancellationToken::new();

        // Connectivity first so the first aggregation sees reachable nodes
        let connected = monitor::check_all(&self.fleet).await;
        tracing::info!(connected, total = self.fleet.len(), "initial node check complete");

        let monitor_handle = monitor::spawn_monitor(
            self.fleet.clone(),
            Duration::from_secs(self.config.monitor.refresh_interval_secs),
            shutdown.clone(),
        );

        let state = Arc::new(ApiState::new(
            self.db.clone(),
            self.config.api_server.api_key.clone(),
            self.fleet.clone(),
            self.settings.clone(),
            self.discovery.clone(),
        ));
        let server = ApiServer::new(state, self.port).spawn(shutdown.clone());

        let signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                signal.cancel();
            }
        });

        let result = match server.await {
            Ok(result) => result,
            Err(e) => Err(crate::Error::Config(format!("API server task failed: {e}"))),
        };

        shutdown.cancel();
        self.discovery.shutdown();
        if let Err(e) = monitor_handle.await {
            tracing::warn!(error = %e, "node monitor ended abnormally");
        }

        tracing::info!("daemon stopped");
        result
    }
}
