//! Fleet Console - operations console for fleets of process-supervisor daemons
//!
//! This library provides the core functionality of the console:
//! - A cross-fleet process view merged from per-node snapshots
//! - Fleet-wide start/stop/restart with per-node failure isolation
//! - Network discovery of new supervisor daemons over CIDR ranges
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  HTTP API (axum)                     │
//! │ processes │ groups │ discovery │ nodes │ settings   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                     Engines                          │
//! │  Aggregator  │  Batch Executor  │  Discovery Engine │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │   Fleet (NodeHandle)   │   Task Store (SQLite)      │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod daemon;
pub mod db;
pub mod discovery;
pub mod error;
pub mod fleet;
pub mod nodes;

pub use config::{Config, ConfigStore, Settings};
pub use daemon::Daemon;
pub use db::{DbConn, DbPool};
pub use discovery::{DiscoveryEngine, DiscoveryRequest, DiscoveryTask, TaskStatus};
pub use error::{Error, Result};
pub use fleet::{
    AggregatedGroup, AggregatedProcess, BatchExecutor, BatchOperationResult,
    InstanceOperationResult, Operation,
};
pub use nodes::{Credentials, Fleet, NodeHandle, ProcessInstance, SharedFleet, SharedNode};
