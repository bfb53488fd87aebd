//! Operator activity log

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::Serialize;

use super::{DbPool, conn};
use crate::{Error, Result};

/// One activity log row
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEntry {
    pub id: i64,
    /// Dotted action name, e.g. `discovery.start` or `process.restart`
    pub action: String,
    /// What the action touched (task id, process or group name)
    pub resource: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Activity log repository
#[derive(Clone)]
pub struct ActivityRepo {
    pool: DbPool,
}

impl ActivityRepo {
    /// Create a new activity repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append an entry
    ///
    /// Callers must never pass credential material in `message` or `details`.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn record(
        &self,
        action: &str,
        resource: &str,
        message: &str,
        details: Option<&serde_json::Value>,
    ) -> Result<()> {
        let conn = conn(&self.pool)?;
        let details = details.map(serde_json::Value::to_string);
        conn.execute(
            "INSERT INTO activity_log (action, resource, message, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![action, resource, message, details, Utc::now().to_rfc3339()],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        tracing::debug!(action, resource, "activity recorded");
        Ok(())
    }

    /// Append an entry, logging instead of failing
    ///
    /// The activity log never fails the operation it describes.
    pub fn record_quietly(
        &self,
        action: &str,
        resource: &str,
        message: &str,
        details: Option<&serde_json::Value>,
    ) {
        if let Err(e) = self.record(action, resource, message, details) {
            tracing::warn!(action, resource, error = %e, "failed to record activity");
        }
    }

    /// Most recent entries, newest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn recent(&self, limit: u64) -> Result<Vec<ActivityEntry>> {
        let conn = conn(&self.pool)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, action, resource, message, details, created_at
                 FROM activity_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let entries = stmt
            .query_map([limit], |row| {
                let details: Option<String> = row.get(4)?;
                let created_at: String = row.get(5)?;
                Ok(ActivityEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    resource: row.get(2)?,
                    message: row.get(3)?,
                    details: details.and_then(|d| serde_json::from_str(&d).ok()),
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc)),
                })
            })
            .map_err(|e| Error::Database(e.to_string()))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(entries)
    }
}
