//! The closed contract the engines use to talk to one supervisor daemon

use async_trait::async_trait;

use super::types::ProcessInstance;
use crate::Result;

/// One remote supervisor daemon
///
/// The connection flag is owned by the connectivity monitor; refresh and
/// lifecycle calls never flip it on their own.
#[async_trait]
pub trait NodeHandle: Send + Sync {
    /// Unique name within the fleet
    fn name(&self) -> &str;

    fn host(&self) -> &str;

    fn port(&self) -> u16;

    /// Environment tag used to scope group views
    fn environment(&self) -> Option<&str>;

    fn is_connected(&self) -> bool;

    fn set_connected(&self, connected: bool);

    /// Last fetched process snapshot
    fn processes(&self) -> Vec<ProcessInstance>;

    /// Replace the cached snapshot with the daemon's current process list
    ///
    /// On failure the previous snapshot is kept.
    async fn refresh_processes(&self) -> Result<()>;

    /// Start a process by (possibly `group:`-qualified) name
    async fn start_process(&self, name: &str) -> Result<()>;

    /// Stop a process by (possibly `group:`-qualified) name
    async fn stop_process(&self, name: &str) -> Result<()>;

    /// Cheap liveness round trip
    async fn ping(&self) -> Result<()>;
}
