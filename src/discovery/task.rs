//! Discovery task model and status state machine

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle of a discovery task
///
/// `pending -> running -> {completed, cancelled, failed}`; a pending task
/// may also be cancelled or failed directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl TaskStatus {
    pub const TERMINAL: [Self; 3] = [Self::Completed, Self::Cancelled, Self::Failed];
    pub const ACTIVE: [Self; 2] = [Self::Pending, Self::Running];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Whether moving from `self` to `next` goes forward
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Running | Self::Cancelled | Self::Failed)
                | (Self::Running, Self::Completed | Self::Cancelled | Self::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Validation(format!("unknown task status '{other}'"))),
        }
    }
}

/// One scan request and its running counters
///
/// Holds no credential material.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryTask {
    pub id: String,
    pub cidr: String,
    pub port: u16,
    pub timeout_seconds: u64,
    pub max_workers: usize,
    pub created_by: String,
    pub status: TaskStatus,
    pub total_ips: u64,
    pub scanned_ips: u64,
    pub found_nodes: u64,
    pub failed_ips: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DiscoveryTask {
    /// Fraction of addresses scanned, in `0.0..=1.0`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f64 {
        if self.total_ips == 0 {
            return 0.0;
        }
        (self.scanned_ips.min(self.total_ips) as f64) / (self.total_ips as f64)
    }

    /// Progress as a percentage rounded to one decimal
    #[must_use]
    pub fn percent(&self) -> f64 {
        (self.progress() * 1000.0).round() / 10.0
    }
}

/// One host that answered a probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryResult {
    pub id: i64,
    pub task_id: String,
    pub ip: String,
    pub port: u16,
    pub node_name: String,
    pub version: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Cheap polling view of a task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskProgress {
    pub id: String,
    pub status: TaskStatus,
    pub total_ips: u64,
    pub scanned_ips: u64,
    pub found_nodes: u64,
    pub failed_ips: u64,
    pub percent: f64,
}

impl From<&DiscoveryTask> for TaskProgress {
    fn from(task: &DiscoveryTask) -> Self {
        Self {
            id: task.id.clone(),
            status: task.status,
            total_ips: task.total_ips,
            scanned_ips: task.scanned_ips,
            found_nodes: task.found_nodes,
            failed_ips: task.failed_ips,
            percent: task.percent(),
        }
    }
}

/// One page of tasks
#[derive(Debug, Clone, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<DiscoveryTask>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}
