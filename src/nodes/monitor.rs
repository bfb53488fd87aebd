//! Periodic connectivity monitor
//!
//! The only component that flips node connection flags.

use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::registry::{Fleet, SharedFleet, SharedNode};

/// Ping one node and update its connection flag
///
/// A reachable node also gets its process snapshot warmed. Returns whether
/// the node is connected after the check.
pub async fn check_node(node: &SharedNode) -> bool {
    let was_connected = node.is_connected();

    match node.ping().await {
        Ok(()) => {
            if !was_connected {
                tracing::info!(node = %node.name(), "node connected");
            }
            node.set_connected(true);
            if let Err(e) = node.refresh_processes().await {
                tracing::warn!(node = %node.name(), error = %e, "process refresh failed");
            }
            true
        }
        Err(e) => {
            if was_connected {
                tracing::warn!(node = %node.name(), error = %e, "node disconnected");
            } else {
                tracing::debug!(node = %node.name(), error = %e, "node still unreachable");
            }
            node.set_connected(false);
            false
        }
    }
}

/// Check every node concurrently; returns the number connected afterwards
pub async fn check_all(fleet: &Fleet) -> usize {
    let nodes = fleet.list();
    join_all(nodes.iter().map(check_node))
        .await
        .into_iter()
        .filter(|ok| *ok)
        .count()
}

/// Run `check_all` on an interval until `shutdown` fires
#[must_use]
pub fn spawn_monitor(
    fleet: SharedFleet,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(interval_secs = interval.as_secs(), "starting node monitor");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("node monitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let connected = check_all(&fleet).await;
                    tracing::debug!(connected, total = fleet.len(), "node monitor pass complete");
                }
            }
        }
    })
}
