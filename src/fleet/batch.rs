//! Batch operation executor
//!
//! Fans one lifecycle command out to every node hosting a matching
//! instance. Each target gets its own task; a single collector gathers
//! `(index, outcome)` messages until every target reported or the shared
//! deadline passed. Targets that have not reported by then are failed with
//! a timeout, whatever their call eventually does.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::aggregate::refresh_connected;
use super::{BatchOperationResult, InstanceOperationResult, Operation};
use crate::Result;
use crate::config::Settings;
use crate::nodes::SharedNode;

/// One (node, instance) pair a command is sent to
struct Target {
    node: SharedNode,
    /// Name shown in results
    process: String,
    /// Name sent to the daemon (`group:name` where needed)
    address: String,
}

/// Executes lifecycle commands against the fleet
#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    timeout: Duration,
    restart_delay: Duration,
}

impl BatchExecutor {
    #[must_use]
    pub const fn new(timeout: Duration, restart_delay: Duration) -> Self {
        Self {
            timeout,
            restart_delay,
        }
    }

    /// Executor using the batch tunables of one settings snapshot
    #[must_use]
    pub const fn from_settings(settings: &Settings) -> Self {
        Self::new(
            Duration::from_secs(settings.batch_timeout_secs),
            Duration::from_millis(settings.restart_delay_ms),
        )
    }

    /// Apply `op` to every instance named `process_name` on the fleet
    ///
    /// Nodes that are disconnected or fail to refresh are left out of the
    /// target set entirely.
    pub async fn execute(
        &self,
        nodes: &[SharedNode],
        process_name: &str,
        op: Operation,
    ) -> BatchOperationResult {
        let refreshed = refresh_connected(nodes).await;
        let skipped = skipped_nodes(nodes, &refreshed);

        let targets: Vec<Target> = refreshed
            .iter()
            .filter_map(|node| {
                node.processes()
                    .into_iter()
                    .find(|p| p.name == process_name)
                    .map(|p| Target {
                        node: node.clone(),
                        process: p.name.clone(),
                        address: p.qualified_name(),
                    })
            })
            .collect();

        tracing::info!(
            process = %process_name,
            operation = %op,
            targets = targets.len(),
            skipped = skipped.len(),
            "dispatching batch operation"
        );

        let results = self.dispatch(targets, op).await;
        BatchOperationResult::from_results(process_name, op, results, skipped)
    }

    /// Apply `op` to every instance of `group`, optionally scoped to one environment
    pub async fn execute_group(
        &self,
        nodes: &[SharedNode],
        group: &str,
        environment: Option<&str>,
        op: Operation,
    ) -> BatchOperationResult {
        let scoped: Vec<SharedNode> = nodes
            .iter()
            .filter(|n| environment.is_none_or(|env| n.environment() == Some(env)))
            .cloned()
            .collect();
        let refreshed = refresh_connected(&scoped).await;
        let skipped = skipped_nodes(&scoped, &refreshed);

        let targets: Vec<Target> = refreshed
            .iter()
            .flat_map(|node| {
                node.processes()
                    .into_iter()
                    .filter(|p| p.group == group)
                    .map(|p| Target {
                        node: node.clone(),
                        address: p.qualified_name(),
                        process: p.name,
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        tracing::info!(
            group = %group,
            environment = environment.unwrap_or("*"),
            operation = %op,
            targets = targets.len(),
            skipped = skipped.len(),
            "dispatching group operation"
        );

        let results = self.dispatch(targets, op).await;
        BatchOperationResult::from_results(group, op, results, skipped)
    }

    async fn dispatch(&self, targets: Vec<Target>, op: Operation) -> Vec<InstanceOperationResult> {
        if targets.is_empty() {
            return Vec::new();
        }

        let deadline = Instant::now() + self.timeout;
        let (tx, mut rx) = mpsc::channel::<(usize, Result<()>)>(targets.len());

        for (idx, target) in targets.iter().enumerate() {
            let tx = tx.clone();
            let node = target.node.clone();
            let address = target.address.clone();
            let restart_delay = self.restart_delay;
            tokio::spawn(async move {
                let outcome = run_operation(&node, &address, op, restart_delay).await;
                // receiver is gone once the deadline has passed
                let _ = tx.send((idx, outcome)).await;
            });
        }
        drop(tx);

        let mut outcomes: Vec<Option<Result<()>>> = targets.iter().map(|_| None).collect();
        let mut pending = targets.len();
        let mut timed_out = false;

        while pending > 0 {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some((idx, outcome))) => {
                    outcomes[idx] = Some(outcome);
                    pending -= 1;
                }
                // every sender dropped early: a dispatch task panicked
                Ok(None) => break,
                Err(_) => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out {
            tracing::warn!(
                operation = %op,
                unfinished = pending,
                timeout_secs = self.timeout.as_secs(),
                "batch deadline reached"
            );
        }

        targets
            .iter()
            .zip(outcomes)
            .map(|(target, outcome)| {
                let node_name = target.node.name();
                match outcome {
                    Some(Ok(())) => InstanceOperationResult::succeeded(node_name, &target.process),
                    Some(Err(e)) => {
                        tracing::warn!(
                            node = %node_name,
                            process = %target.process,
                            operation = %op,
                            error = %e,
                            "operation failed"
                        );
                        InstanceOperationResult::failed(node_name, &target.process, e.to_string())
                    }
                    None if timed_out => InstanceOperationResult::failed(
                        node_name,
                        &target.process,
                        format!("timed out after {}s", self.timeout.as_secs()),
                    ),
                    None => InstanceOperationResult::failed(
                        node_name,
                        &target.process,
                        "dispatch aborted before reporting",
                    ),
                }
            })
            .collect()
    }
}

/// Names of nodes in `all` that are missing from `refreshed`
fn skipped_nodes(all: &[SharedNode], refreshed: &[SharedNode]) -> Vec<String> {
    all.iter()
        .filter(|n| !refreshed.iter().any(|r| r.name() == n.name()))
        .map(|n| n.name().to_string())
        .collect()
}

async fn run_operation(
    node: &SharedNode,
    address: &str,
    op: Operation,
    restart_delay: Duration,
) -> Result<()> {
    match op {
        Operation::Start => node.start_process(address).await,
        Operation::Stop => node.stop_process(address).await,
        Operation::Restart => {
            node.stop_process(address).await?;
            tokio::time::sleep(restart_delay).await;
            node.start_process(address).await
        }
    }
}
