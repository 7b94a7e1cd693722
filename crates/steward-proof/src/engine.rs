//! Reads run history from the store and writes proof artifacts.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use steward_core::Result;
use steward_core::config::ProofConfig;
use steward_scheduler::SchedulerDb;

use crate::report::{ProofReport, compute_report, validate_window, window_start};

pub struct ProofEngine {
    store: SchedulerDb,
    sample_size: usize,
}

impl ProofEngine {
    pub fn new(store: SchedulerDb, config: &ProofConfig) -> Self {
        Self {
            store,
            sample_size: config.sample_size,
        }
    }

    pub fn generate(&self, window_hours: u32, now: DateTime<Utc>) -> Result<ProofReport> {
        validate_window(window_hours)?;
        let since = window_start(now, window_hours);
        let runs = self.store.runs_since(since)?;
        let report = compute_report(&runs, window_hours, now, self.sample_size);
        tracing::info!(
            "📊 Proof {}h: {} runs, uptime {}%, max gap {}min, healthy={}",
            window_hours,
            report.summary.total_runs,
            report.summary.uptime_pct,
            report.max_gap_minutes,
            report.verification.overall_healthy
        );
        Ok(report)
    }

    /// Store the report as `proof-<timestamp>.json` under `dir`.
    pub fn write(report: &ProofReport, dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let name = format!("proof-{}.json", report.generated_at.format("%Y%m%dT%H%M%SZ"));
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_string_pretty(report)?)?;
        tracing::info!("📝 Proof written to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use steward_core::Database;
    use steward_scheduler::{RunCompletion, RunStatus};

    #[test]
    fn test_generate_and_write() {
        let store = SchedulerDb::new(Database::open_in_memory().unwrap());
        let t0 = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        for i in 0..3 {
            let at = t0 + chrono::Duration::minutes(i);
            let id = store.start_run("heartbeat", at, true).unwrap();
            store
                .finish_run(
                    id,
                    &RunCompletion {
                        completed_at: at,
                        status: RunStatus::Success,
                        duration_ms: 3,
                        issues_detected: 0,
                        fixes_applied: 0,
                        verification_passed: true,
                        summary: None,
                        error: None,
                    },
                )
                .unwrap();
        }
        // Still running: excluded.
        store.start_run("audit", t0 + chrono::Duration::minutes(3), false).unwrap();

        let engine = ProofEngine::new(store, &ProofConfig::default());
        let report = engine.generate(24, t0 + chrono::Duration::minutes(4)).unwrap();
        assert_eq!(report.summary.total_runs, 3);
        assert_eq!(report.summary.uptime_pct, 100.0);
        assert!(report.verification.overall_healthy);

        let dir = std::env::temp_dir().join(format!("steward-proof-{}", std::process::id()));
        let path = ProofEngine::write(&report, &dir).unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("proof-20260601T0004"));
        let back: ProofReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, report);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_generate_rejects_out_of_range_window() {
        let engine = ProofEngine::new(
            SchedulerDb::new(Database::open_in_memory().unwrap()),
            &ProofConfig::default(),
        );
        assert!(matches!(
            engine.generate(u32::MAX, Utc::now()),
            Err(steward_core::StewardError::Config(_))
        ));
        assert!(engine.generate(0, Utc::now()).is_err());
    }
}
