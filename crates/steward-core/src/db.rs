//! SQLite store handle shared by the scheduler, the work-item store and the proof engine.
//!
//! One handle is opened at process start and cloned into each component.
//! Every component keeps its own queries; this module owns the connection and
//! the schema.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Result, StewardError};

/// Cloneable handle to the shared SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database file and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let db = Self::from_connection(conn)?;
        tracing::debug!("🗄️ Opened store at {}", path.display());
        Ok(db)
    }

    /// Private in-memory database, mostly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Run a closure against the connection.
    ///
    /// Never hold the returned data across an `.await` that needs the store again;
    /// the connection is serialized behind a mutex.
    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| StewardError::LockPoisoned)?;
        Ok(f(&conn)?)
    }

    fn migrate(&self) -> Result<()> {
        self.with_conn(|conn| {
            // Attempt ledgers from before per-target keys are transient; drop them.
            let keyed_by_target: i64 = conn.query_row(
                "SELECT COUNT(*) FROM pragma_table_info('heal_attempts') WHERE name = 'target'",
                [],
                |row| row.get(0),
            )?;
            if keyed_by_target == 0 {
                conn.execute_batch("DROP TABLE IF EXISTS heal_attempts;")?;
            }
            conn.execute_batch(
                "
            -- Job definitions + mutable scheduling state
            CREATE TABLE IF NOT EXISTS jobs (
                name TEXT PRIMARY KEY,
                enabled INTEGER NOT NULL DEFAULT 1,
                schedule_kind TEXT NOT NULL,        -- 'interval', 'cron'
                schedule_value TEXT NOT NULL,       -- every_ms or cron expression
                interval_ms INTEGER,                -- explicit interval for cron jobs
                timeout_ms INTEGER NOT NULL,
                max_retries INTEGER NOT NULL DEFAULT 0,
                backoff_ms INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 5,
                cooldown_ms INTEGER,
                handler TEXT NOT NULL,
                config TEXT NOT NULL DEFAULT '{}',
                last_run_at TEXT,
                next_run_at TEXT,
                last_status TEXT,
                last_error TEXT,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            -- Execution history, append-only
            CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_name TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                status TEXT NOT NULL,
                duration_ms INTEGER,
                issues_detected INTEGER NOT NULL DEFAULT 0,
                fixes_applied INTEGER NOT NULL DEFAULT 0,
                verification_passed INTEGER NOT NULL DEFAULT 0,
                heartbeat INTEGER NOT NULL DEFAULT 0,
                summary TEXT,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);
            CREATE INDEX IF NOT EXISTS idx_runs_job ON runs(job_name, started_at);

            -- Mutual-exclusion locks, one row per key
            CREATE TABLE IF NOT EXISTS locks (
                key TEXT PRIMARY KEY,
                acquired_at TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                owner TEXT NOT NULL
            );

            -- Deduplicated remediation work
            CREATE TABLE IF NOT EXISTS work_items (
                id TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                severity TEXT NOT NULL,
                category TEXT NOT NULL,
                locator TEXT,
                status TEXT NOT NULL DEFAULT 'NEW',
                priority_score INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                cooldown_until TEXT,
                requires_approval INTEGER NOT NULL DEFAULT 0,
                approved_at TEXT,
                source_run_id INTEGER,
                source_issue_id TEXT,
                evidence TEXT NOT NULL DEFAULT '[]',   -- JSON array of locators
                assigned_to TEXT,
                assigned_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_work_items_status ON work_items(status, priority_score);

            -- Alert history
            CREATE TABLE IF NOT EXISTS alerts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                priority TEXT NOT NULL DEFAULT 'normal',
                source TEXT NOT NULL,
                channel TEXT,
                status TEXT NOT NULL DEFAULT 'pending',  -- pending, sent, failed
                created_at TEXT NOT NULL,
                sent_at TEXT
            );

            -- Remediation attempts per playbook action and incident target
            CREATE TABLE IF NOT EXISTS heal_attempts (
                playbook_id TEXT NOT NULL,
                target TEXT NOT NULL,               -- incident URL or locator
                action_index INTEGER NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_attempt_at TEXT NOT NULL,
                PRIMARY KEY (playbook_id, target, action_index)
            );
            ",
            )
        })
    }
}

/// Fixed-width UTC timestamp so that string order equals time order in SQL.
pub fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
