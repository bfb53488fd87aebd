//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Discovery tasks (no credential columns)
        CREATE TABLE IF NOT EXISTS discovery_tasks (
            id TEXT PRIMARY KEY,
            cidr TEXT NOT NULL,
            port INTEGER NOT NULL,
            timeout_seconds INTEGER NOT NULL,
            max_workers INTEGER NOT NULL,
            created_by TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('pending', 'running', 'completed', 'cancelled', 'failed')),
            total_ips INTEGER NOT NULL DEFAULT 0,
            scanned_ips INTEGER NOT NULL DEFAULT 0,
            found_nodes INTEGER NOT NULL DEFAULT 0,
            failed_ips INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK(scanned_ips <= total_ips)
        );

        CREATE INDEX IF NOT EXISTS idx_discovery_tasks_status ON discovery_tasks(status);
        CREATE INDEX IF NOT EXISTS idx_discovery_tasks_target ON discovery_tasks(cidr, port);

        -- Hosts found by a task
        CREATE TABLE IF NOT EXISTS discovery_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id TEXT NOT NULL REFERENCES discovery_tasks(id) ON DELETE CASCADE,
            ip TEXT NOT NULL,
            port INTEGER NOT NULL,
            node_name TEXT NOT NULL,
            version TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_discovery_results_task ON discovery_results(task_id);

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::info!("migrated to schema v1");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Operator activity log
        CREATE TABLE IF NOT EXISTS activity_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            action TEXT NOT NULL,
            resource TEXT NOT NULL,
            message TEXT NOT NULL,
            details TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_activity_log_action ON activity_log(action);

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::info!("migrated to schema v2");
    Ok(())
}
