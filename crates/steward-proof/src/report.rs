//! Uptime and heartbeat continuity over a lookback window.
//!
//! Pure: the same run history and `now` always give the same report.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use steward_core::config::MAX_PROOF_WINDOW_HOURS;
use steward_core::{Result, StewardError};
use steward_scheduler::{Run, RunStatus};

/// Heartbeats further apart than this are a gap.
pub const GAP_THRESHOLD_MINUTES: f64 = 2.0;
/// A gap this long or longer fails the report.
pub const CRITICAL_GAP_MINUTES: f64 = 5.0;
pub const UPTIME_THRESHOLD_PCT: f64 = 99.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_runs: usize,
    pub successes: usize,
    pub failures: usize,
    pub degraded: usize,
    pub timeouts: usize,
    pub uptime_pct: f64,
    pub heartbeat_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub heartbeat_continuous: bool,
    pub uptime_threshold_met: bool,
    pub no_critical_gaps: bool,
    pub overall_healthy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSample {
    pub id: i64,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub duration_ms: Option<u64>,
    pub heartbeat: bool,
}

impl From<&Run> for RunSample {
    fn from(run: &Run) -> Self {
        Self {
            id: run.id,
            job_name: run.job_name.clone(),
            started_at: run.started_at,
            status: run.status,
            duration_ms: run.duration_ms,
            heartbeat: run.heartbeat,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofReport {
    pub generated_at: DateTime<Utc>,
    pub window_hours: u32,
    pub summary: Summary,
    pub gaps: Vec<Gap>,
    pub max_gap_minutes: f64,
    pub verification: Verification,
    /// Most recent runs, newest first.
    pub recent_runs: Vec<RunSample>,
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Reject windows that are empty or longer than [`MAX_PROOF_WINDOW_HOURS`].
pub fn validate_window(window_hours: u32) -> Result<()> {
    if (1..=MAX_PROOF_WINDOW_HOURS).contains(&window_hours) {
        Ok(())
    } else {
        Err(StewardError::Config(format!(
            "window_hours must be between 1 and {MAX_PROOF_WINDOW_HOURS}, got {window_hours}"
        )))
    }
}

/// First instant inside the window. Clamps to the earliest representable
/// time instead of overflowing.
pub fn window_start(now: DateTime<Utc>, window_hours: u32) -> DateTime<Utc> {
    TimeDelta::try_hours(i64::from(window_hours))
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn compute_report(
    runs: &[Run],
    window_hours: u32,
    now: DateTime<Utc>,
    sample_size: usize,
) -> ProofReport {
    let since = window_start(now, window_hours);
    // In-flight runs have no outcome yet.
    let mut window: Vec<&Run> = runs
        .iter()
        .filter(|r| r.started_at >= since && r.started_at <= now)
        .filter(|r| r.status != RunStatus::Running)
        .collect();
    window.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));

    let count = |status: RunStatus| window.iter().filter(|r| r.status == status).count();
    let total_runs = window.len();
    let successes = count(RunStatus::Success);
    let failures = count(RunStatus::Fail);
    let uptime_pct = if total_runs == 0 {
        0.0
    } else {
        round1(successes as f64 / total_runs as f64 * 100.0)
    };

    let heartbeats: Vec<&Run> = window.iter().copied().filter(|r| r.heartbeat).collect();
    let mut max_gap_raw: f64 = 0.0;
    let mut gaps = Vec::new();
    for pair in heartbeats.windows(2) {
        let ms = (pair[1].started_at - pair[0].started_at).num_milliseconds();
        let minutes = ms as f64 / 60_000.0;
        if minutes > GAP_THRESHOLD_MINUTES {
            max_gap_raw = max_gap_raw.max(minutes);
            gaps.push(Gap {
                start: pair[0].started_at,
                end: pair[1].started_at,
                minutes: round1(minutes),
            });
        }
    }
    // Thresholds judge the exact gap; rounding is for display only.
    let max_gap_minutes = round1(max_gap_raw);

    let heartbeat_continuous = gaps.is_empty();
    let uptime_threshold_met = uptime_pct >= UPTIME_THRESHOLD_PCT;
    let no_critical_gaps = max_gap_raw < CRITICAL_GAP_MINUTES;
    let verification = Verification {
        heartbeat_continuous,
        uptime_threshold_met,
        no_critical_gaps,
        overall_healthy: heartbeat_continuous
            && uptime_threshold_met
            && no_critical_gaps
            && failures == 0,
    };

    let recent_runs = window
        .iter()
        .rev()
        .take(sample_size)
        .map(|r| RunSample::from(*r))
        .collect();

    ProofReport {
        generated_at: now,
        window_hours,
        summary: Summary {
            total_runs,
            successes,
            failures,
            degraded: count(RunStatus::Degraded),
            timeouts: count(RunStatus::Timeout),
            uptime_pct,
            heartbeat_count: heartbeats.len(),
        },
        gaps,
        max_gap_minutes,
        verification,
        recent_runs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
    }

    fn run(id: i64, at: DateTime<Utc>, status: RunStatus, heartbeat: bool) -> Run {
        Run {
            id,
            job_name: if heartbeat { "heartbeat" } else { "audit" }.into(),
            started_at: at,
            completed_at: Some(at),
            status,
            duration_ms: Some(5),
            issues_detected: 0,
            fixes_applied: 0,
            verification_passed: true,
            heartbeat,
            summary: None,
            error: None,
        }
    }

    #[test]
    fn test_uptime_98_percent() {
        let runs: Vec<Run> = (0..100)
            .map(|i| {
                let status = if i < 2 { RunStatus::Fail } else { RunStatus::Success };
                run(i, t0() + chrono::Duration::seconds(i * 30), status, false)
            })
            .collect();
        let now = t0() + chrono::Duration::hours(1);
        let report = compute_report(&runs, 24, now, 20);
        assert_eq!(report.summary.total_runs, 100);
        assert_eq!(report.summary.failures, 2);
        assert_eq!(report.summary.uptime_pct, 98.0);
        assert!(!report.verification.uptime_threshold_met);
        assert!(!report.verification.overall_healthy);
        assert_eq!(report.recent_runs.len(), 20);
        assert_eq!(report.recent_runs[0].id, 99);
    }

    #[test]
    fn test_heartbeat_gap() {
        let runs = vec![
            run(1, t0(), RunStatus::Success, true),
            run(2, t0() + chrono::Duration::minutes(1), RunStatus::Success, true),
            run(3, t0() + chrono::Duration::minutes(11), RunStatus::Success, true),
        ];
        let report = compute_report(&runs, 24, t0() + chrono::Duration::minutes(12), 20);
        assert_eq!(report.gaps.len(), 1);
        assert_eq!(report.gaps[0].minutes, 10.0);
        assert_eq!(report.gaps[0].start, t0() + chrono::Duration::minutes(1));
        assert_eq!(report.max_gap_minutes, 10.0);
        assert!(!report.verification.heartbeat_continuous);
        assert!(!report.verification.no_critical_gaps);
        assert!(!report.verification.overall_healthy);
        assert_eq!(report.summary.uptime_pct, 100.0);
    }

    #[test]
    fn test_healthy_window() {
        let runs: Vec<Run> = (0..60)
            .map(|i| run(i, t0() + chrono::Duration::minutes(i), RunStatus::Success, true))
            .collect();
        let report = compute_report(&runs, 24, t0() + chrono::Duration::hours(1), 5);
        assert!(report.gaps.is_empty());
        assert_eq!(report.max_gap_minutes, 0.0);
        assert!(report.verification.overall_healthy);
        assert_eq!(report.summary.heartbeat_count, 60);
    }

    #[test]
    fn test_only_heartbeats_count_for_gaps() {
        let runs = vec![
            run(1, t0(), RunStatus::Success, true),
            run(2, t0() + chrono::Duration::minutes(3), RunStatus::Success, false),
            run(3, t0() + chrono::Duration::minutes(4), RunStatus::Success, true),
        ];
        let report = compute_report(&runs, 24, t0() + chrono::Duration::minutes(5), 20);
        assert_eq!(report.gaps.len(), 1);
        assert_eq!(report.gaps[0].minutes, 4.0);
        // Below the critical threshold, but still a gap.
        assert!(report.verification.no_critical_gaps);
        assert!(!report.verification.overall_healthy);
    }

    #[test]
    fn test_gap_just_under_critical_is_not_critical() {
        let runs = vec![
            run(1, t0(), RunStatus::Success, true),
            run(2, t0() + chrono::Duration::milliseconds(297_600), RunStatus::Success, true),
        ];
        let report = compute_report(&runs, 24, t0() + chrono::Duration::minutes(6), 20);
        // 4.96 minutes displays as 5.0 but stays below the critical line.
        assert_eq!(report.max_gap_minutes, 5.0);
        assert!(report.verification.no_critical_gaps);
        assert!(!report.verification.heartbeat_continuous);
    }

    #[test]
    fn test_oversized_window_does_not_overflow() {
        let runs = vec![run(1, t0(), RunStatus::Success, false)];
        let report = compute_report(&runs, u32::MAX, t0() + chrono::Duration::hours(1), 5);
        assert_eq!(report.summary.total_runs, 1);
        assert_eq!(compute_report(&[], u32::MAX, Utc::now(), 5).summary.total_runs, 0);
        assert_eq!(window_start(t0(), u32::MAX), DateTime::<Utc>::MIN_UTC);

        assert!(validate_window(24).is_ok());
        assert!(validate_window(MAX_PROOF_WINDOW_HOURS).is_ok());
        assert!(matches!(validate_window(0), Err(StewardError::Config(_))));
        assert!(matches!(validate_window(u32::MAX), Err(StewardError::Config(_))));
    }

    #[test]
    fn test_window_and_running_excluded() {
        let now = t0() + chrono::Duration::hours(30);
        let runs = vec![
            run(1, t0(), RunStatus::Fail, false),
            run(2, now - chrono::Duration::hours(1), RunStatus::Success, false),
            run(3, now - chrono::Duration::minutes(1), RunStatus::Running, true),
        ];
        let report = compute_report(&runs, 24, now, 20);
        assert_eq!(report.summary.total_runs, 1);
        assert_eq!(report.summary.failures, 0);
        assert_eq!(report.summary.heartbeat_count, 0);
    }

    #[test]
    fn test_empty_history() {
        let report = compute_report(&[], 24, t0(), 20);
        assert_eq!(report.summary.uptime_pct, 0.0);
        assert!(!report.verification.overall_healthy);
        assert!(report.recent_runs.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let runs = vec![
            run(2, t0(), RunStatus::Success, true),
            run(1, t0(), RunStatus::Degraded, true),
        ];
        let now = t0() + chrono::Duration::minutes(1);
        assert_eq!(compute_report(&runs, 1, now, 5), compute_report(&runs, 1, now, 5));
    }
}
