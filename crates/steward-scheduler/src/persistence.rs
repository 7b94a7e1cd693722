//! SQLite-backed persistence for jobs, runs and alert history.
//! Rows live in the shared store; this module owns the scheduler's queries.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use std::str::FromStr;

use steward_core::Result;
use steward_core::db::{Database, fmt_ts, parse_ts};

use crate::jobs::{Job, JobDefinition, Run, RunStatus, Schedule};
use crate::notify::Notification;

const JOB_COLUMNS: &str = "name, enabled, schedule_kind, schedule_value, interval_ms, timeout_ms, \
     max_retries, backoff_ms, priority, cooldown_ms, handler, config, last_run_at, next_run_at, \
     last_status, last_error, consecutive_failures";

const RUN_COLUMNS: &str = "id, job_name, started_at, completed_at, status, duration_ms, \
     issues_detected, fixes_applied, verification_passed, heartbeat, summary, error";

/// How a run finished. Written once by [`SchedulerDb::finish_run`].
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub completed_at: DateTime<Utc>,
    pub status: RunStatus,
    pub duration_ms: u64,
    pub issues_detected: u32,
    pub fixes_applied: u32,
    pub verification_passed: bool,
    pub summary: Option<String>,
    pub error: Option<String>,
}

/// Scheduler view over the shared store.
#[derive(Clone)]
pub struct SchedulerDb {
    db: Database,
}

impl SchedulerDb {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // ─── Jobs ──────────────────────────────────────

    /// Insert or update a job definition. Run state (last/next run, streaks) is kept.
    pub fn seed_job(&self, def: &JobDefinition) -> Result<()> {
        def.validate()?;
        let (schedule_value, interval_ms) = match &def.schedule {
            Schedule::Interval { every_ms } => (every_ms.to_string(), None),
            Schedule::Cron {
                expression,
                interval_ms,
            } => (expression.clone(), interval_ms.map(|v| v as i64)),
        };
        let config = serde_json::to_string(&def.config)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO jobs
                 (name, enabled, schedule_kind, schedule_value, interval_ms, timeout_ms, max_retries,
                  backoff_ms, priority, cooldown_ms, handler, config, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(name) DO UPDATE SET
                    enabled = excluded.enabled,
                    schedule_kind = excluded.schedule_kind,
                    schedule_value = excluded.schedule_value,
                    interval_ms = excluded.interval_ms,
                    timeout_ms = excluded.timeout_ms,
                    max_retries = excluded.max_retries,
                    backoff_ms = excluded.backoff_ms,
                    priority = excluded.priority,
                    cooldown_ms = excluded.cooldown_ms,
                    handler = excluded.handler,
                    config = excluded.config",
                params![
                    def.name,
                    def.enabled as i32,
                    def.schedule.kind(),
                    schedule_value,
                    interval_ms,
                    def.timeout_ms as i64,
                    def.max_retries,
                    def.backoff_ms as i64,
                    def.priority,
                    def.cooldown_ms.map(|v| v as i64),
                    def.handler,
                    config,
                    fmt_ts(Utc::now()),
                ],
            )
        })?;
        tracing::debug!("📅 Seeded job '{}' ({})", def.name, def.schedule);
        Ok(())
    }

    /// Load every job, enabled or not, ordered by name.
    pub fn load_jobs(&self) -> Result<Vec<Job>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY name"))?;
            let rows = stmt.query_map([], row_to_job)?;
            rows.collect()
        })
    }

    pub fn get_job(&self, name: &str) -> Result<Option<Job>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE name = ?1"),
                [name],
                row_to_job,
            )
            .optional()
        })
    }

    /// Jobs are disabled, never deleted.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET enabled = ?1 WHERE name = ?2",
                params![enabled as i32, name],
            )
        })?;
        Ok(changed > 0)
    }

    /// Post-execution bookkeeping. Failures extend the streak, anything else resets it.
    pub fn record_job_outcome(
        &self,
        name: &str,
        ran_at: DateTime<Utc>,
        next_run_at: DateTime<Utc>,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET
                    last_run_at = ?1,
                    next_run_at = ?2,
                    last_status = ?3,
                    last_error = ?4,
                    consecutive_failures = CASE WHEN ?5 THEN consecutive_failures + 1 ELSE 0 END
                 WHERE name = ?6",
                params![
                    fmt_ts(ran_at),
                    fmt_ts(next_run_at),
                    status.as_str(),
                    error,
                    status.is_failure(),
                    name,
                ],
            )
        })?;
        Ok(())
    }

    // ─── Runs ──────────────────────────────────────

    /// Create a RUNNING row and return its id.
    pub fn start_run(&self, job_name: &str, started_at: DateTime<Utc>, heartbeat: bool) -> Result<i64> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO runs (job_name, started_at, status, heartbeat) VALUES (?1, ?2, ?3, ?4)",
                params![job_name, fmt_ts(started_at), RunStatus::Running.as_str(), heartbeat as i32],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Finalize a run. Only RUNNING rows are updated, so completed runs stay immutable.
    pub fn finish_run(&self, run_id: i64, done: &RunCompletion) -> Result<bool> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE runs SET completed_at = ?1, status = ?2, duration_ms = ?3,
                    issues_detected = ?4, fixes_applied = ?5, verification_passed = ?6,
                    summary = ?7, error = ?8
                 WHERE id = ?9 AND status = 'RUNNING'",
                params![
                    fmt_ts(done.completed_at),
                    done.status.as_str(),
                    done.duration_ms as i64,
                    done.issues_detected,
                    done.fixes_applied,
                    done.verification_passed as i32,
                    done.summary,
                    done.error,
                    run_id,
                ],
            )
        })?;
        Ok(changed == 1)
    }

    /// Runs started at or after `since`, oldest first.
    pub fn runs_since(&self, since: DateTime<Utc>) -> Result<Vec<Run>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM runs WHERE started_at >= ?1 ORDER BY started_at, id"
            ))?;
            let rows = stmt.query_map([fmt_ts(since)], row_to_run)?;
            rows.collect()
        })
    }

    /// Most recent runs, newest first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<Run>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RUN_COLUMNS} FROM runs ORDER BY started_at DESC, id DESC LIMIT ?1"
            ))?;
            let rows = stmt.query_map([limit as i64], row_to_run)?;
            rows.collect()
        })
    }

    pub fn get_run(&self, id: i64) -> Result<Option<Run>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"),
                [id],
                row_to_run,
            )
            .optional()
        })
    }

    // ─── Alerts ──────────────────────────────────────

    /// Record an alert and the channels it reached.
    pub fn save_alert(
        &self,
        notification: &Notification,
        channel: Option<&str>,
        delivered: bool,
    ) -> Result<i64> {
        let status = if delivered { "sent" } else { "failed" };
        let sent_at = delivered.then(|| fmt_ts(Utc::now()));
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO alerts (title, body, priority, source, channel, status, created_at, sent_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    notification.title,
                    notification.body,
                    notification.priority.as_str(),
                    notification.source,
                    channel,
                    status,
                    fmt_ts(notification.raised_at),
                    sent_at,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Recent alerts as JSON rows, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<serde_json::Value>> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, body, priority, source, channel, status, created_at, sent_at
                 FROM alerts ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit as i64], |row| {
                Ok(serde_json::json!({
                    "id": row.get::<_, i64>(0)?,
                    "title": row.get::<_, String>(1)?,
                    "body": row.get::<_, String>(2)?,
                    "priority": row.get::<_, String>(3)?,
                    "source": row.get::<_, String>(4)?,
                    "channel": row.get::<_, Option<String>>(5)?,
                    "status": row.get::<_, String>(6)?,
                    "created_at": row.get::<_, String>(7)?,
                    "sent_at": row.get::<_, Option<String>>(8)?,
                }))
            })?;
            rows.collect()
        })
    }
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

fn parse_col<T: FromStr<Err = String>>(idx: usize, value: &str) -> rusqlite::Result<T> {
    value.parse().map_err(|e| conversion_error(idx, e))
}

fn ts_col(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match value {
        None => Ok(None),
        Some(s) => parse_ts(&s)
            .map(Some)
            .ok_or_else(|| conversion_error(idx, format!("bad timestamp '{s}'"))),
    }
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<Job> {
    let kind: String = row.get(2)?;
    let value: String = row.get(3)?;
    let interval_ms: Option<i64> = row.get(4)?;
    let schedule = match kind.as_str() {
        "cron" => Schedule::Cron {
            expression: value,
            interval_ms: interval_ms.map(|v| v as u64),
        },
        "interval" => Schedule::Interval {
            every_ms: value
                .parse::<u64>()
                .map_err(|e| conversion_error(3, e.to_string()))?,
        },
        other => return Err(conversion_error(2, format!("unknown schedule kind '{other}'"))),
    };
    let config_str: String = row.get(11)?;
    let last_status: Option<String> = row.get(14)?;

    Ok(Job {
        name: row.get(0)?,
        enabled: row.get::<_, i32>(1)? != 0,
        schedule,
        timeout_ms: row.get::<_, i64>(5)? as u64,
        max_retries: row.get(6)?,
        backoff_ms: row.get::<_, i64>(7)? as u64,
        priority: row.get(8)?,
        cooldown_ms: row.get::<_, Option<i64>>(9)?.map(|v| v as u64),
        handler: row.get(10)?,
        config: serde_json::from_str(&config_str)
            .map_err(|e| conversion_error(11, e.to_string()))?,
        last_run_at: ts_col(12, row.get(12)?)?,
        next_run_at: ts_col(13, row.get(13)?)?,
        last_status: last_status.map(|s| parse_col(14, &s)).transpose()?,
        last_error: row.get(15)?,
        consecutive_failures: row.get(16)?,
    })
}

fn row_to_run(row: &Row<'_>) -> rusqlite::Result<Run> {
    let started_at: String = row.get(2)?;
    let status: String = row.get(4)?;
    Ok(Run {
        id: row.get(0)?,
        job_name: row.get(1)?,
        started_at: parse_ts(&started_at)
            .ok_or_else(|| conversion_error(2, format!("bad timestamp '{started_at}'")))?,
        completed_at: ts_col(3, row.get(3)?)?,
        status: parse_col(4, &status)?,
        duration_ms: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
        issues_detected: row.get(6)?,
        fixes_applied: row.get(7)?,
        verification_passed: row.get::<_, i32>(8)? != 0,
        heartbeat: row.get::<_, i32>(9)? != 0,
        summary: row.get(10)?,
        error: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Notification, NotifyPriority};
    use chrono::TimeZone;

    fn store() -> SchedulerDb {
        SchedulerDb::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_seed_and_load_job() {
        let db = store();
        db.seed_job(
            &JobDefinition::cron("proof", "proof_report", "0 * * * *")
                .with_priority(8)
                .with_config(serde_json::json!({"window_hours": 24})),
        )
        .unwrap();

        let jobs = db.load_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        let job = &jobs[0];
        assert_eq!(job.name, "proof");
        assert_eq!(job.priority, 8);
        assert_eq!(job.config["window_hours"], 24);
        assert!(matches!(&job.schedule, Schedule::Cron { expression, .. } if expression == "0 * * * *"));
        assert!(job.last_run_at.is_none());
    }

    #[test]
    fn test_reseed_keeps_run_state() {
        let db = store();
        let def = JobDefinition::interval("hb", "heartbeat", 60_000);
        db.seed_job(&def).unwrap();
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        db.record_job_outcome("hb", now, now + chrono::Duration::minutes(1), RunStatus::Fail, Some("boom"))
            .unwrap();

        db.seed_job(&def.clone().with_priority(9)).unwrap();
        let job = db.get_job("hb").unwrap().unwrap();
        assert_eq!(job.priority, 9);
        assert_eq!(job.last_run_at, Some(now));
        assert_eq!(job.consecutive_failures, 1);
        assert_eq!(job.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_disable_keeps_job() {
        let db = store();
        db.seed_job(&JobDefinition::interval("hb", "heartbeat", 60_000)).unwrap();
        assert!(db.set_enabled("hb", false).unwrap());
        let jobs = db.load_jobs().unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(!jobs[0].enabled);
        assert!(!db.set_enabled("missing", true).unwrap());
    }

    #[test]
    fn test_failure_streak_resets() {
        let db = store();
        db.seed_job(&JobDefinition::interval("hb", "heartbeat", 60_000)).unwrap();
        let now = Utc::now();
        let next = now + chrono::Duration::minutes(1);
        db.record_job_outcome("hb", now, next, RunStatus::Fail, Some("x")).unwrap();
        db.record_job_outcome("hb", now, next, RunStatus::Timeout, Some("y")).unwrap();
        assert_eq!(db.get_job("hb").unwrap().unwrap().consecutive_failures, 2);
        db.record_job_outcome("hb", now, next, RunStatus::Degraded, None).unwrap();
        let job = db.get_job("hb").unwrap().unwrap();
        assert_eq!(job.consecutive_failures, 0);
        assert_eq!(job.last_status, Some(RunStatus::Degraded));
    }

    #[test]
    fn test_run_lifecycle_is_write_once() {
        let db = store();
        let started = Utc::now();
        let id = db.start_run("hb", started, true).unwrap();
        let run = db.get_run(id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.heartbeat);

        let done = RunCompletion {
            completed_at: started + chrono::Duration::milliseconds(40),
            status: RunStatus::Success,
            duration_ms: 40,
            issues_detected: 0,
            fixes_applied: 0,
            verification_passed: true,
            summary: Some("ok".into()),
            error: None,
        };
        assert!(db.finish_run(id, &done).unwrap());
        // Second finalize is ignored.
        let again = RunCompletion { status: RunStatus::Fail, ..done };
        assert!(!db.finish_run(id, &again).unwrap());

        let run = db.get_run(id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.duration_ms, Some(40));
    }

    #[test]
    fn test_runs_since_filters_window() {
        let db = store();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        db.start_run("a", t0, false).unwrap();
        db.start_run("b", t0 + chrono::Duration::hours(2), false).unwrap();
        let runs = db.runs_since(t0 + chrono::Duration::hours(1)).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].job_name, "b");
        assert_eq!(db.recent_runs(10).unwrap()[0].job_name, "b");
    }

    #[test]
    fn test_save_alert() {
        let db = store();
        let n = Notification::new("job failed", "details", "scheduler", NotifyPriority::Urgent, Utc::now());
        db.save_alert(&n, Some("webhook"), true).unwrap();
        let alerts = db.recent_alerts(5).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["status"], "sent");
        assert_eq!(alerts[0]["priority"], "urgent");
    }
}
