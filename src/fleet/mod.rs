//! Cross-fleet process views and fleet-wide lifecycle commands

pub mod aggregate;
pub mod batch;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::nodes::ProcessInstance;

pub use aggregate::{aggregate, aggregate_groups, refresh_connected, sorted_groups, sorted_processes};
pub use batch::BatchExecutor;

/// Canonical cross-fleet view of one process name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedProcess {
    pub name: String,
    pub total_instances: usize,
    pub running_instances: usize,
    pub stopped_instances: usize,
    pub instances: Vec<ProcessInstance>,
}

impl AggregatedProcess {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            total_instances: 0,
            running_instances: 0,
            stopped_instances: 0,
            instances: Vec::new(),
        }
    }

    fn push(&mut self, instance: ProcessInstance) {
        if instance.is_running() {
            self.running_instances += 1;
        } else if instance.is_stopped() {
            self.stopped_instances += 1;
        }
        self.total_instances += 1;
        self.instances.push(instance);
    }
}

/// Cross-fleet view of one process group
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedGroup {
    pub name: String,
    pub environment: Option<String>,
    pub total_instances: usize,
    pub running_instances: usize,
    pub stopped_instances: usize,
    /// Distinct node names hosting the group, in node order
    pub nodes: Vec<String>,
    pub instances: Vec<ProcessInstance>,
}

impl AggregatedGroup {
    fn new(name: &str, environment: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            environment: environment.map(ToString::to_string),
            total_instances: 0,
            running_instances: 0,
            stopped_instances: 0,
            nodes: Vec::new(),
            instances: Vec::new(),
        }
    }

    fn push(&mut self, instance: ProcessInstance) {
        if instance.is_running() {
            self.running_instances += 1;
        } else if instance.is_stopped() {
            self.stopped_instances += 1;
        }
        if !self.nodes.contains(&instance.node_name) {
            self.nodes.push(instance.node_name.clone());
        }
        self.total_instances += 1;
        self.instances.push(instance);
    }
}

/// Lifecycle command applied to every matching instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Start,
    Stop,
    Restart,
}

impl Operation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "restart" => Ok(Self::Restart),
            other => Err(Error::Validation(format!(
                "unknown operation '{other}' (expected start, stop or restart)"
            ))),
        }
    }
}

/// Per-node outcome of a batch operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceOperationResult {
    pub node_name: String,
    pub process_name: String,
    pub success: bool,
    /// Present and non-empty iff `success` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InstanceOperationResult {
    #[must_use]
    pub fn succeeded(node_name: &str, process_name: &str) -> Self {
        Self {
            node_name: node_name.to_string(),
            process_name: process_name.to_string(),
            success: true,
            error: None,
        }
    }

    #[must_use]
    pub fn failed(node_name: &str, process_name: &str, error: impl Into<String>) -> Self {
        let mut error = error.into();
        if error.is_empty() {
            error = "operation failed".to_string();
        }
        Self {
            node_name: node_name.to_string(),
            process_name: process_name.to_string(),
            success: false,
            error: Some(error),
        }
    }
}

/// Outcome of one fleet-wide command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchOperationResult {
    pub process_name: String,
    pub operation: Operation,
    pub total_instances: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub results: Vec<InstanceOperationResult>,
    /// Nodes left out because they were disconnected or failed to refresh
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_nodes: Vec<String>,
}

impl BatchOperationResult {
    /// Tally results; `success + failure == total == results.len()` by construction
    #[must_use]
    pub fn from_results(
        process_name: &str,
        operation: Operation,
        results: Vec<InstanceOperationResult>,
        skipped_nodes: Vec<String>,
    ) -> Self {
        let success_count = results.iter().filter(|r| r.success).count();
        Self {
            process_name: process_name.to_string(),
            operation,
            total_instances: results.len(),
            success_count,
            failure_count: results.len() - success_count,
            results,
            skipped_nodes,
        }
    }

    /// True when no node hosts the target and every node was reachable
    #[must_use]
    pub fn is_unknown_target(&self) -> bool {
        self.total_instances == 0 && self.skipped_nodes.is_empty()
    }

    /// One-line summary for the activity log
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} {}: {} succeeded, {} failed of {}",
            self.operation,
            self.process_name,
            self.success_count,
            self.failure_count,
            self.total_instances
        )
    }
}
