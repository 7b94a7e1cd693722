//! Scheduler engine: one tick runs every due job under the tick lock.
//!
//! All state that survives between ticks lives in the store, so a tick can be
//! driven by an external trigger (`steward tick`) or by [`Scheduler::run_forever`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use steward_core::Result;
use steward_core::config::SchedulerConfig;
use steward_core::db::Database;

use crate::handler::{HandlerError, HandlerRegistry, HandlerReport, JobContext};
use crate::jobs::{Job, RunStatus};
use crate::lock::{LockManager, owner_id};
use crate::notify::{Alerter, Notification, NotifyPriority};
use crate::persistence::{RunCompletion, SchedulerDb};

/// What happened to one job during a tick.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job: String,
    pub due: bool,
    pub ran: bool,
    /// Why a due job did not run, or why a run could not be recorded.
    pub reason: Option<String>,
    pub status: Option<RunStatus>,
    pub run_id: Option<i64>,
}

impl JobOutcome {
    fn idle(job: &str) -> Self {
        Self {
            job: job.to_string(),
            due: false,
            ran: false,
            reason: None,
            status: None,
            run_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    /// False when another process held the tick lock; nothing ran.
    pub lock_acquired: bool,
    pub outcomes: Vec<JobOutcome>,
}

impl TickReport {
    pub fn ran(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| o.ran)
    }
}

/// Owns job and run mutation.
pub struct Scheduler {
    store: SchedulerDb,
    locks: LockManager,
    registry: HandlerRegistry,
    alerter: Arc<dyn Alerter>,
    config: SchedulerConfig,
    owner: String,
}

impl Scheduler {
    /// Fails when a stored job references an unknown handler or carries a
    /// config its handler rejects.
    pub fn new(
        db: Database,
        registry: HandlerRegistry,
        alerter: Arc<dyn Alerter>,
        config: SchedulerConfig,
    ) -> Result<Self> {
        let store = SchedulerDb::new(db.clone());
        let jobs = store.load_jobs()?;
        registry.validate_jobs(&jobs)?;

        let worst = worst_case_tick_ms(&jobs);
        if worst >= config.lock_ttl_ms {
            tracing::warn!(
                "⚠️ Due jobs can hold a tick for {}ms, longer than lock_ttl_ms {}ms; \
                 another process may start an overlapping tick",
                worst,
                config.lock_ttl_ms
            );
        }
        Ok(Self {
            store,
            locks: LockManager::new(db),
            registry,
            alerter,
            config,
            owner: owner_id(),
        })
    }

    pub fn store(&self) -> &SchedulerDb {
        &self.store
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Run every due job once. Lock contention is a silent no-op.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let ttl = Duration::from_millis(self.config.lock_ttl_ms);
        let Some(_guard) = self
            .locks
            .try_lock(&self.config.lock_key, ttl, &self.owner, now)?
        else {
            tracing::debug!("⏳ Tick skipped: '{}' held elsewhere", self.config.lock_key);
            return Ok(TickReport {
                at: now,
                lock_acquired: false,
                outcomes: Vec::new(),
            });
        };

        let tick_started = Instant::now();
        let jobs = self.store.load_jobs()?;
        let mut outcomes = Vec::with_capacity(jobs.len());
        for job in &jobs {
            outcomes.push(self.process(job, now, tick_started).await);
        }

        let ran = outcomes.iter().filter(|o| o.ran).count();
        if ran > 0 {
            tracing::info!("⏰ Tick done: {} of {} jobs ran", ran, jobs.len());
        }
        Ok(TickReport {
            at: now,
            lock_acquired: true,
            outcomes,
        })
    }

    async fn process(&self, job: &Job, now: DateTime<Utc>, tick_started: Instant) -> JobOutcome {
        let mut outcome = JobOutcome::idle(&job.name);
        if !job.is_due(now) {
            return outcome;
        }
        outcome.due = true;

        if job.in_cooldown(now) {
            tracing::debug!("🧊 Job '{}' in cooldown", job.name);
            outcome.reason = Some("cooldown".into());
            return outcome;
        }

        match self.execute(job, now, tick_started).await {
            Ok((run_id, status)) => {
                outcome.ran = true;
                outcome.run_id = Some(run_id);
                outcome.status = Some(status);
            }
            Err(e) => {
                tracing::warn!("⚠️ Job '{}' could not be recorded: {e}", job.name);
                outcome.reason = Some(e.to_string());
            }
        }
        outcome
    }

    /// Jobs in a tick run one after another, so a run completes at the tick's
    /// `now` plus everything that ran before it.
    async fn execute(
        &self,
        job: &Job,
        now: DateTime<Utc>,
        tick_started: Instant,
    ) -> Result<(i64, RunStatus)> {
        let heartbeat = job.name == self.config.heartbeat_job;
        let run_id = self.store.start_run(&job.name, now, heartbeat)?;
        tracing::info!("🔔 Job triggered: '{}' (run #{})", job.name, run_id);

        let started = Instant::now();
        let mut result = self.invoke(job, run_id, now).await;
        let mut retries = 0;
        while retries < job.max_retries && result.is_retryable() {
            retries += 1;
            tracing::info!(
                "🔁 Job '{}' retry {}/{} after {}ms",
                job.name,
                retries,
                job.max_retries,
                job.backoff_ms
            );
            if job.backoff_ms > 0 {
                tokio::time::sleep(Duration::from_millis(job.backoff_ms)).await;
            }
            result = self.invoke(job, run_id, now).await;
        }
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, report, error) = classify(result, job.timeout_ms);
        let completed_at = chrono::Duration::from_std(tick_started.elapsed())
            .ok()
            .and_then(|elapsed| now.checked_add_signed(elapsed))
            .unwrap_or(now);
        let completion = RunCompletion {
            completed_at,
            status,
            duration_ms,
            issues_detected: report.as_ref().map_or(0, |r| r.issues_found),
            fixes_applied: report.as_ref().map_or(0, |r| r.fixes_applied),
            verification_passed: report.as_ref().is_some_and(|r| r.verification_passed),
            summary: report.as_ref().map(|r| r.details.clone()),
            error: error.clone(),
        };
        self.store.finish_run(run_id, &completion)?;

        let fallback = Duration::from_millis(self.config.cron_fallback_interval_ms);
        let next = chrono::Duration::from_std(job.interval(fallback))
            .map(|d| now + d)
            .unwrap_or(now);
        self.store
            .record_job_outcome(&job.name, now, next, status, error.as_deref())?;

        match status {
            RunStatus::Success => {
                tracing::info!("✅ Job '{}' succeeded in {}ms", job.name, duration_ms)
            }
            RunStatus::Degraded => {
                tracing::warn!("🟡 Job '{}' degraded: issues found, none fixed", job.name)
            }
            _ => tracing::warn!(
                "❌ Job '{}' {}: {}",
                job.name,
                status,
                error.as_deref().unwrap_or("-")
            ),
        }

        if status.is_failure() && job.priority > self.config.alert_priority_threshold {
            self.escalate(job, status, error.as_deref(), now).await;
        }

        Ok((run_id, status))
    }

    /// Handler runs on its own task. On timeout the task is left running.
    async fn invoke(&self, job: &Job, run_id: i64, now: DateTime<Utc>) -> Invocation {
        let Some(handler) = self.registry.get(&job.handler) else {
            return Invocation::Finished(Err(HandlerError::Failed(format!(
                "unknown handler '{}'",
                job.handler
            ))));
        };
        let ctx = JobContext {
            job_name: job.name.clone(),
            run_id,
            config: job.config.clone(),
            now,
        };
        let task = tokio::spawn(async move { handler.run(ctx).await });

        match tokio::time::timeout(job.timeout(), task).await {
            Ok(Ok(result)) => Invocation::Finished(result),
            Ok(Err(join_err)) => Invocation::Panicked(join_err.to_string()),
            Err(_) => Invocation::TimedOut,
        }
    }

    async fn escalate(&self, job: &Job, status: RunStatus, error: Option<&str>, now: DateTime<Utc>) {
        let notification = Notification::new(
            format!("Job '{}' {}", job.name, status),
            format!(
                "{} (priority {}, {} consecutive failures)",
                error.unwrap_or("no error message"),
                job.priority,
                job.consecutive_failures + 1
            ),
            "scheduler",
            NotifyPriority::Urgent,
            now,
        );
        if let Err(e) = self.alerter.alert(&notification).await {
            tracing::warn!("⚠️ Alert for job '{}' not delivered: {e}", job.name);
        }
    }

    /// Tick on a fixed interval until the process exits.
    pub async fn run_forever(&self, every: Duration) {
        tracing::info!("⏰ Scheduler started (tick every {}ms)", every.as_millis());
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(e) = self.tick(Utc::now()).await {
                tracing::error!("❌ Tick failed: {e}");
            }
        }
    }
}

enum Invocation {
    Finished(std::result::Result<HandlerReport, HandlerError>),
    Panicked(String),
    TimedOut,
}

impl Invocation {
    /// A timed-out task may still be running, so only completed failures retry.
    fn is_retryable(&self) -> bool {
        match self {
            Invocation::Finished(Ok(report)) => !report.success,
            Invocation::Finished(Err(_)) | Invocation::Panicked(_) => true,
            Invocation::TimedOut => false,
        }
    }
}

/// Worst-case wall time of one tick if every enabled job is due.
fn worst_case_tick_ms(jobs: &[Job]) -> u64 {
    jobs.iter()
        .filter(|j| j.enabled)
        .map(Job::worst_case_ms)
        .fold(0, u64::saturating_add)
}

fn classify(
    invocation: Invocation,
    timeout_ms: u64,
) -> (RunStatus, Option<HandlerReport>, Option<String>) {
    match invocation {
        Invocation::Finished(Ok(report)) => {
            let status = if !report.success {
                RunStatus::Fail
            } else if report.issues_found > 0 && report.fixes_applied == 0 {
                RunStatus::Degraded
            } else {
                RunStatus::Success
            };
            let error = (status == RunStatus::Fail).then(|| report.details.clone());
            (status, Some(report), error)
        }
        Invocation::Finished(Err(e)) => (RunStatus::Fail, None, Some(e.to_string())),
        Invocation::Panicked(msg) => (RunStatus::Fail, None, Some(format!("handler panicked: {msg}"))),
        Invocation::TimedOut => (
            RunStatus::Timeout,
            None,
            Some(format!("timed out after {timeout_ms}ms")),
        ),
    }
}
