//! Job and run definitions: the data model for scheduled work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use steward_core::{Result, StewardError};

use crate::cron;

/// How a job is scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Run every N milliseconds.
    Interval { every_ms: u64 },
    /// Run when the cron expression matches. `interval_ms` spaces out
    /// consecutive runs; the configured fallback applies when absent.
    Cron {
        expression: String,
        #[serde(default)]
        interval_ms: Option<u64>,
    },
}

impl Schedule {
    pub fn kind(&self) -> &'static str {
        match self {
            Schedule::Interval { .. } => "interval",
            Schedule::Cron { .. } => "cron",
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Schedule::Cron { expression, .. } => write!(f, "cron({expression})"),
            Schedule::Interval { every_ms } => {
                let secs = every_ms / 1000;
                if secs >= 3600 {
                    write!(f, "every {}h", secs / 3600)
                } else if secs >= 60 {
                    write!(f, "every {}min", secs / 60)
                } else if secs >= 1 {
                    write!(f, "every {secs}s")
                } else {
                    write!(f, "every {every_ms}ms")
                }
            }
        }
    }
}

/// A job definition as written in `jobs.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub name: String,
    pub handler: String,
    pub schedule: Schedule,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Extra attempts within the same run after a failure. Timeouts are not retried.
    #[serde(default)]
    pub max_retries: u32,
    /// Pause before each retry.
    #[serde(default)]
    pub backoff_ms: u64,
    /// Escalation priority, 0-10. Does not affect execution order.
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub cooldown_ms: Option<u64>,
    /// Handler-specific settings, validated by the handler at startup.
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
}

fn default_true() -> bool {
    true
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_priority() -> u8 {
    5
}
fn empty_config() -> serde_json::Value {
    serde_json::json!({})
}

/// A persisted job: definition plus the state the scheduler mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub enabled: bool,
    pub schedule: Schedule,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub priority: u8,
    pub cooldown_ms: Option<u64>,
    pub handler: String,
    pub config: serde_json::Value,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_status: Option<RunStatus>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl JobDefinition {
    /// Create an interval job definition.
    pub fn interval(name: &str, handler: &str, every_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            handler: handler.to_string(),
            schedule: Schedule::Interval { every_ms },
            enabled: true,
            timeout_ms: default_timeout_ms(),
            max_retries: 0,
            backoff_ms: 0,
            priority: default_priority(),
            cooldown_ms: None,
            config: empty_config(),
        }
    }

    /// Create a cron job definition.
    pub fn cron(name: &str, handler: &str, expression: &str) -> Self {
        Self {
            schedule: Schedule::Cron {
                expression: expression.to_string(),
                interval_ms: None,
            },
            ..Self::interval(name, handler, 0)
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.backoff_ms = backoff_ms;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.cooldown_ms = Some(cooldown_ms);
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Boundary checks: units are milliseconds and zero means misconfigured.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| StewardError::InvalidJob {
            job: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.timeout_ms == 0 {
            return Err(invalid("timeout_ms must be > 0"));
        }
        if self.priority > 10 {
            return Err(invalid("priority must be within 0-10"));
        }
        match &self.schedule {
            Schedule::Interval { every_ms } if *every_ms == 0 => {
                Err(invalid("interval every_ms must be > 0"))
            }
            Schedule::Cron { expression, .. } if expression.split_whitespace().count() != 5 => {
                Err(invalid("cron expression needs 5 fields"))
            }
            Schedule::Cron {
                interval_ms: Some(0),
                ..
            } => Err(invalid("cron interval_ms must be > 0")),
            _ => Ok(()),
        }
    }

    /// A fresh job with no run history.
    pub fn into_job(self) -> Job {
        Job {
            name: self.name,
            enabled: self.enabled,
            schedule: self.schedule,
            timeout_ms: self.timeout_ms,
            max_retries: self.max_retries,
            backoff_ms: self.backoff_ms,
            priority: self.priority,
            cooldown_ms: self.cooldown_ms,
            handler: self.handler,
            config: self.config,
            last_run_at: None,
            next_run_at: None,
            last_status: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

impl Job {
    /// Enabled, its next slot has arrived, and for cron jobs the expression matches `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        if self.next_run_at.is_some_and(|next| next > now) {
            return false;
        }
        match &self.schedule {
            Schedule::Interval { .. } => true,
            Schedule::Cron { expression, .. } => cron::is_due(expression, now),
        }
    }

    /// Still inside the per-job cooldown that follows the last run.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match (self.cooldown_ms, self.last_run_at) {
            (Some(cooldown_ms), Some(last)) if cooldown_ms > 0 => {
                now < last + chrono::Duration::milliseconds(cooldown_ms as i64)
            }
            _ => false,
        }
    }

    /// Spacing until the next run.
    pub fn interval(&self, cron_fallback: Duration) -> Duration {
        match &self.schedule {
            Schedule::Interval { every_ms } => Duration::from_millis(*every_ms),
            Schedule::Cron { interval_ms, .. } => interval_ms
                .map(Duration::from_millis)
                .unwrap_or(cron_fallback),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Longest one run can hold the tick: every attempt times out, every backoff is slept.
    pub fn worst_case_ms(&self) -> u64 {
        let attempts = u64::from(self.max_retries) + 1;
        self.timeout_ms
            .saturating_mul(attempts)
            .saturating_add(self.backoff_ms.saturating_mul(u64::from(self.max_retries)))
    }
}

/// Outcome of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Running,
    Success,
    Fail,
    Degraded,
    Timeout,
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Fail => "FAIL",
            RunStatus::Degraded => "DEGRADED",
            RunStatus::Timeout => "TIMEOUT",
            RunStatus::Skipped => "SKIPPED",
        }
    }

    /// Counts toward the failure streak and alerting.
    pub fn is_failure(&self) -> bool {
        matches!(self, RunStatus::Fail | RunStatus::Timeout)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(RunStatus::Running),
            "SUCCESS" => Ok(RunStatus::Success),
            "FAIL" => Ok(RunStatus::Fail),
            "DEGRADED" => Ok(RunStatus::Degraded),
            "TIMEOUT" => Ok(RunStatus::Timeout),
            "SKIPPED" => Ok(RunStatus::Skipped),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

/// One execution attempt of a job. Immutable once completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub duration_ms: Option<u64>,
    pub issues_detected: u32,
    pub fixes_applied: u32,
    pub verification_passed: bool,
    /// Only runs of the liveness job carry this.
    pub heartbeat: bool,
    pub summary: Option<String>,
    pub error: Option<String>,
}

/// `jobs.toml` contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsFile {
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
}

impl JobsFile {
    pub fn from_toml(content: &str) -> Result<Self> {
        let file: Self = toml::from_str(content)?;
        for job in &file.jobs {
            job.validate()?;
        }
        Ok(file)
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn test_interval_job_due_without_next_run() {
        let job = JobDefinition::interval("hb", "heartbeat", 60_000).into_job();
        assert!(job.is_due(t(10, 0, 0)));
    }

    #[test]
    fn test_job_not_due_before_next_run() {
        let mut job = JobDefinition::interval("hb", "heartbeat", 60_000).into_job();
        job.next_run_at = Some(t(10, 1, 0));
        assert!(!job.is_due(t(10, 0, 59)));
        assert!(job.is_due(t(10, 1, 0)));
    }

    #[test]
    fn test_disabled_job_never_due() {
        let mut job = JobDefinition::interval("hb", "heartbeat", 60_000).into_job();
        job.enabled = false;
        assert!(!job.is_due(t(10, 0, 0)));
    }

    #[test]
    fn test_cron_job_consults_matcher() {
        let job = JobDefinition::cron("proof", "proof_report", "0 * * * *").into_job();
        assert!(job.is_due(t(11, 0, 30)));
        assert!(!job.is_due(t(11, 1, 0)));
    }

    #[test]
    fn test_cooldown_window() {
        let mut job = JobDefinition::interval("audit", "audit", 60_000)
            .with_cooldown_ms(300_000)
            .into_job();
        job.last_run_at = Some(t(10, 0, 0));
        assert!(job.in_cooldown(t(10, 2, 0)));
        assert!(!job.in_cooldown(t(10, 5, 0)));
    }

    #[test]
    fn test_cron_interval_fallback() {
        let job = JobDefinition::cron("proof", "proof_report", "0 * * * *").into_job();
        assert_eq!(
            job.interval(Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_validate_rejects_zero_units() {
        assert!(JobDefinition::interval("x", "h", 0).validate().is_err());
        assert!(
            JobDefinition::interval("x", "h", 1000)
                .with_timeout_ms(0)
                .validate()
                .is_err()
        );
        assert!(JobDefinition::cron("x", "h", "* * *").validate().is_err());
        assert!(JobDefinition::interval("x", "h", 1000).validate().is_ok());
    }

    #[test]
    fn test_parse_jobs_file() {
        let file = JobsFile::from_toml(
            r#"
[[jobs]]
name = "heartbeat"
handler = "heartbeat"
schedule = { interval = { every_ms = 60000 } }
timeout_ms = 10000
priority = 9

[[jobs]]
name = "nightly-audit"
handler = "endpoint_check"
schedule = { cron = { expression = "0 3 * * *" } }
cooldown_ms = 300000
config = { endpoints = [] }
"#,
        )
        .unwrap();
        assert_eq!(file.jobs.len(), 2);
        assert_eq!(file.jobs[0].priority, 9);
        assert!(matches!(file.jobs[1].schedule, Schedule::Cron { .. }));
        assert_eq!(file.jobs[1].timeout_ms, 30_000);
        assert_eq!(file.jobs[1].cooldown_ms, Some(300_000));
    }

    #[test]
    fn test_schedule_display() {
        assert_eq!(Schedule::Interval { every_ms: 300_000 }.to_string(), "every 5min");
        assert_eq!(Schedule::Interval { every_ms: 7_200_000 }.to_string(), "every 2h");
        assert_eq!(
            Schedule::Cron { expression: "0 * * * *".into(), interval_ms: None }.to_string(),
            "cron(0 * * * *)"
        );
    }

    #[test]
    fn test_run_status_failure_classes() {
        assert!(RunStatus::Fail.is_failure());
        assert!(RunStatus::Timeout.is_failure());
        assert!(!RunStatus::Degraded.is_failure());
        assert_eq!("TIMEOUT".parse::<RunStatus>().unwrap(), RunStatus::Timeout);
    }
}
