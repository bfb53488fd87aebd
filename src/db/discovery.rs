//! Task store for discovery tasks and their results
//!
//! Every counter or status change is a single conditional `UPDATE`, so a
//! reader never observes a half-applied change and a terminal task is
//! never written to again.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params, params_from_iter};

use super::{DbPool, conn};
use crate::discovery::{DiscoveryResult, DiscoveryTask, TaskStatus};
use crate::{Error, Result};

const TASK_COLUMNS: &str = "id, cidr, port, timeout_seconds, max_workers, created_by, status, \
     total_ips, scanned_ips, found_nodes, failed_ips, error, created_at, updated_at";

/// Discovery task repository
#[derive(Clone)]
pub struct DiscoveryRepo {
    pool: DbPool,
}

impl DiscoveryRepo {
    /// Create a new discovery repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a new task
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(&self, task: &DiscoveryTask) -> Result<()> {
        let conn = conn(&self.pool)?;
        conn.execute(
            &format!(
                "INSERT INTO discovery_tasks ({TASK_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                task.id,
                task.cidr,
                task.port,
                task.timeout_seconds,
                task.max_workers,
                task.created_by,
                task.status.as_str(),
                task.total_ips,
                task.scanned_ips,
                task.found_nodes,
                task.failed_ips,
                task.error,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    /// Get a task by ID
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, id: &str) -> Result<Option<DiscoveryTask>> {
        let conn = conn(&self.pool)?;
        conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM discovery_tasks WHERE id = ?1"),
            [id],
            row_to_task,
        )
        .optional()
        .map_err(|e| Error::Database(e.to_string()))
    }

    /// List tasks newest first, optionally filtered by status
    ///
    /// Returns the page and the total number of matching tasks.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list(
        &self,
        status: Option<TaskStatus>,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<DiscoveryTask>, u64)> {
        let conn = conn(&self.pool)?;
        let filter = status.map(TaskStatus::as_str);

        let total: u64 = conn
            .query_row(
                "SELECT COUNT(*) FROM discovery_tasks WHERE ?1 IS NULL OR status = ?1",
                [filter],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM discovery_tasks
                 WHERE ?1 IS NULL OR status = ?1
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?2 OFFSET ?3"
            ))
            .map_err(|e| Error::Database(e.to_string()))?;

        let tasks = stmt
            .query_map(params![filter, limit, offset], row_to_task)
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok((tasks, total))
    }

    /// Find a non-terminal task scanning the same range and port
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_active(&self, cidr: &str, port: u16) -> Result<Option<DiscoveryTask>> {
        let conn = conn(&self.pool)?;
        conn.query_row(
            &format!(
                "SELECT {TASK_COLUMNS} FROM discovery_tasks
                 WHERE cidr = ?1 AND port = ?2 AND status IN ('pending', 'running')
                 LIMIT 1"
            ),
            params![cidr, port],
            row_to_task,
        )
        .optional()
        .map_err(|e| Error::Database(e.to_string()))
    }

    /// Move a task to `to` if its current status is one of `from`
    ///
    /// Returns whether the task moved.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn transition(
        &self,
        id: &str,
        from: &[TaskStatus],
        to: TaskStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let allowed: Vec<&str> = from
            .iter()
            .filter(|s| s.can_transition_to(to))
            .map(|s| s.as_str())
            .collect();
        if allowed.is_empty() {
            return Ok(false);
        }

        let placeholders = (0..allowed.len())
            .map(|i| format!("?{}", i + 5))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE discovery_tasks SET status = ?1, error = COALESCE(?2, error), updated_at = ?3
             WHERE id = ?4 AND status IN ({placeholders})"
        );

        let target = to.as_str();
        let now = Utc::now().to_rfc3339();
        let mut values: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(4 + allowed.len());
        values.push(&target);
        values.push(&error);
        values.push(&now);
        values.push(&id);
        for status in &allowed {
            values.push(status);
        }

        let conn = conn(&self.pool)?;
        let changed = conn
            .execute(&sql, params_from_iter(values))
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Overwrite the counters of a running task
    ///
    /// A task that has left `running` is not touched, which freezes its
    /// counts at their last values. Returns whether the row was updated.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn update_progress(
        &self,
        id: &str,
        scanned: u64,
        found: u64,
        failed: u64,
    ) -> Result<bool> {
        let conn = conn(&self.pool)?;
        let changed = conn
            .execute(
                "UPDATE discovery_tasks
                 SET scanned_ips = ?2, found_nodes = ?3, failed_ips = ?4, updated_at = ?5
                 WHERE id = ?1 AND status = 'running' AND scanned_ips <= ?2",
                params![id, scanned, found, failed, Utc::now().to_rfc3339()],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Record a host that answered a probe
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn add_result(
        &self,
        task_id: &str,
        ip: &str,
        port: u16,
        node_name: &str,
        version: Option<&str>,
    ) -> Result<DiscoveryResult> {
        let conn = conn(&self.pool)?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO discovery_results (task_id, ip, port, node_name, version, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![task_id, ip, port, node_name, version, now.to_rfc3339()],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(DiscoveryResult {
            id: conn.last_insert_rowid(),
            task_id: task_id.to_string(),
            ip: ip.to_string(),
            port,
            node_name: node_name.to_string(),
            version: version.map(ToString::to_string),
            created_at: now,
        })
    }

    /// Results of a task, in discovery order
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn results(&self, task_id: &str) -> Result<Vec<DiscoveryResult>> {
        let conn = conn(&self.pool)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, ip, port, node_name, version, created_at
                 FROM discovery_results WHERE task_id = ?1 ORDER BY id",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let results = stmt
            .query_map([task_id], |row| {
                Ok(DiscoveryResult {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    ip: row.get(2)?,
                    port: row.get(3)?,
                    node_name: row.get(4)?,
                    version: row.get(5)?,
                    created_at: parse_datetime(&row.get::<_, String>(6)?),
                })
            })
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(results)
    }

    /// Delete a task and its results, only if the task is terminal
    ///
    /// Returns whether a task was deleted.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete_terminal(&self, id: &str) -> Result<bool> {
        let mut conn = conn(&self.pool)?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(e.to_string()))?;

        let deleted = tx
            .execute(
                "DELETE FROM discovery_tasks
                 WHERE id = ?1 AND status IN ('completed', 'cancelled', 'failed')",
                [id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        if deleted > 0 {
            tx.execute("DELETE FROM discovery_results WHERE task_id = ?1", [id])
                .map_err(|e| Error::Database(e.to_string()))?;
        }

        tx.commit().map_err(|e| Error::Database(e.to_string()))?;
        Ok(deleted > 0)
    }

    /// Fail every task left pending or running by a previous process
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn fail_interrupted(&self, reason: &str) -> Result<usize> {
        let conn = conn(&self.pool)?;
        conn.execute(
            "UPDATE discovery_tasks SET status = 'failed', error = ?1, updated_at = ?2
             WHERE status IN ('pending', 'running')",
            params![reason, Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::Database(e.to_string()))
    }
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<DiscoveryTask> {
    let status: String = row.get(6)?;
    Ok(DiscoveryTask {
        id: row.get(0)?,
        cidr: row.get(1)?,
        port: row.get(2)?,
        timeout_seconds: row.get(3)?,
        max_workers: row.get(4)?,
        created_by: row.get(5)?,
        status: status.parse().unwrap_or(TaskStatus::Failed),
        total_ips: row.get(7)?,
        scanned_ips: row.get(8)?,
        found_nodes: row.get(9)?,
        failed_ips: row.get(10)?,
        error: row.get(11)?,
        created_at: parse_datetime(&row.get::<_, String>(12)?),
        updated_at: parse_datetime(&row.get::<_, String>(13)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
