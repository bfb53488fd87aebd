//! Process aggregation
//!
//! Merges per-node process snapshots into one view keyed by process name
//! (or group name). Nodes that fail to refresh are skipped for the pass.

use std::collections::HashMap;

use futures::future::join_all;

use super::{AggregatedGroup, AggregatedProcess};
use crate::nodes::SharedNode;

/// Refresh every connected node concurrently
///
/// Returns the nodes whose refresh succeeded, in input order.
pub async fn refresh_connected(nodes: &[SharedNode]) -> Vec<SharedNode> {
    let connected: Vec<&SharedNode> = nodes.iter().filter(|n| n.is_connected()).collect();

    let outcomes = join_all(connected.iter().map(|node| async move {
        match node.refresh_processes().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(node = %node.name(), error = %e, "refresh failed, skipping node");
                false
            }
        }
    }))
    .await;

    connected
        .into_iter()
        .zip(outcomes)
        .filter_map(|(node, ok)| ok.then(|| node.clone()))
        .collect()
}

/// Group every instance on every reachable node by process name
pub async fn aggregate(nodes: &[SharedNode]) -> HashMap<String, AggregatedProcess> {
    let refreshed = refresh_connected(nodes).await;

    let mut by_name: HashMap<String, AggregatedProcess> = HashMap::new();
    for node in &refreshed {
        for instance in node.processes() {
            by_name
                .entry(instance.name.clone())
                .or_insert_with(|| AggregatedProcess::new(&instance.name))
                .push(instance);
        }
    }

    tracing::debug!(
        nodes = refreshed.len(),
        processes = by_name.len(),
        "aggregated processes"
    );
    by_name
}

/// Group every instance by process group, optionally scoped to one environment
pub async fn aggregate_groups(
    nodes: &[SharedNode],
    environment: Option<&str>,
) -> HashMap<String, AggregatedGroup> {
    let scoped: Vec<SharedNode> = nodes
        .iter()
        .filter(|n| environment.is_none_or(|env| n.environment() == Some(env)))
        .cloned()
        .collect();
    let refreshed = refresh_connected(&scoped).await;

    let mut by_group: HashMap<String, AggregatedGroup> = HashMap::new();
    for node in &refreshed {
        for instance in node.processes() {
            by_group
                .entry(instance.group.clone())
                .or_insert_with(|| AggregatedGroup::new(&instance.group, environment))
                .push(instance);
        }
    }
    by_group
}

/// Flatten an aggregation into a name-sorted list
#[must_use]
pub fn sorted_processes(map: HashMap<String, AggregatedProcess>) -> Vec<AggregatedProcess> {
    let mut list: Vec<AggregatedProcess> = map.into_values().collect();
    list.sort_by(|a, b| a.name.cmp(&b.name));
    list
}

/// Flatten a group aggregation into a name-sorted list
#[must_use]
pub fn sorted_groups(map: HashMap<String, AggregatedGroup>) -> Vec<AggregatedGroup> {
    let mut list: Vec<AggregatedGroup> = map.into_values().collect();
    list.sort_by(|a, b| a.name.cmp(&b.name));
    list
}
