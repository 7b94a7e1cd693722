//! Heal runner: walks a matched playbook's actions under their safety tier.
//!
//! Each action is gated in order: approval, attempt budget, cooldown. Gated-out
//! actions are skipped; an action that needs approval stops the playbook, since
//! later steps only get more invasive. The first action whose verification
//! passes resolves the incident and resets that playbook's attempt counters
//! for the incident's target. Counters are kept per target, so one endpoint's
//! remediation never cools down another's.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde::Serialize;
use std::sync::Arc;

use steward_core::Result;
use steward_core::db::{Database, fmt_ts, parse_ts};

use crate::playbook::{CheckType, HealAction, Incident, Playbook};
use crate::verify::{Probe, VerifyResult, verify};

/// What the executor did with an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Logged only; nothing outside the process changed.
    Simulated { detail: String },
    Executed { detail: String },
}

/// Performs remediation actions against real infrastructure.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &HealAction, incident: &Incident) -> Result<ActionOutcome>;
}

/// Default executor: logs what would run.
pub struct SimulatedExecutor;

#[async_trait]
impl ActionExecutor for SimulatedExecutor {
    async fn execute(&self, action: &HealAction, incident: &Incident) -> Result<ActionOutcome> {
        let detail = format!(
            "would execute {} on '{}' for {}",
            action.action,
            action.target,
            incident.locator.as_deref().unwrap_or("incident")
        );
        tracing::info!("🧪 {}", detail);
        Ok(ActionOutcome::Simulated { detail })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Done {
        outcome: ActionOutcome,
        verified: bool,
    },
    NeedsApproval,
    AttemptsExhausted { attempts: u32 },
    CoolingDown { until: DateTime<Utc> },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub action: String,
    pub target: String,
    #[serde(flatten)]
    pub status: StepStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealReport {
    pub playbook_id: String,
    pub steps: Vec<StepReport>,
    /// A step's verification check passed.
    pub resolved: bool,
    /// Stopped at an action waiting for approval.
    pub awaiting_approval: bool,
}

impl HealReport {
    /// Steps that ran and actually changed something.
    pub fn executed(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| {
                matches!(
                    s.status,
                    StepStatus::Done {
                        outcome: ActionOutcome::Executed { .. },
                        ..
                    }
                )
            })
            .count()
    }

    /// Outcome of the step whose verification resolved the incident.
    pub fn resolved_by(&self) -> Option<&ActionOutcome> {
        self.steps.iter().find_map(|s| match &s.status {
            StepStatus::Done {
                outcome,
                verified: true,
            } => Some(outcome),
            _ => None,
        })
    }
}

pub struct HealRunner {
    executor: Arc<dyn ActionExecutor>,
    probe: Option<Arc<dyn Probe>>,
    db: Database,
}

impl HealRunner {
    pub fn new(db: Database, executor: Arc<dyn ActionExecutor>) -> Self {
        Self {
            executor,
            probe: None,
            db,
        }
    }

    pub fn simulated(db: Database) -> Self {
        Self::new(db, Arc::new(SimulatedExecutor))
    }

    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Run `playbook` for `incident`. `approved` unlocks gated actions.
    pub async fn run(
        &self,
        playbook: &Playbook,
        incident: &Incident,
        approved: bool,
        now: DateTime<Utc>,
    ) -> Result<HealReport> {
        let mut report = HealReport {
            playbook_id: playbook.id.clone(),
            steps: Vec::new(),
            resolved: false,
            awaiting_approval: false,
        };

        for (index, action) in playbook.actions.iter().enumerate() {
            let status = self
                .step(playbook, index, action, incident, approved, now)
                .await?;
            let stop = match &status {
                StepStatus::NeedsApproval => {
                    report.awaiting_approval = true;
                    true
                }
                StepStatus::Done { verified: true, .. } => {
                    report.resolved = true;
                    true
                }
                _ => false,
            };
            report.steps.push(StepReport {
                index,
                action: action.action.to_string(),
                target: action.target.clone(),
                status,
            });
            if stop {
                break;
            }
        }

        if report.resolved {
            self.reset(&playbook.id, incident.target())?;
            tracing::info!("💚 Playbook '{}' resolved the incident", playbook.id);
        } else if report.awaiting_approval {
            tracing::warn!("✋ Playbook '{}' waiting for approval", playbook.id);
        }
        Ok(report)
    }

    async fn step(
        &self,
        playbook: &Playbook,
        index: usize,
        action: &HealAction,
        incident: &Incident,
        approved: bool,
        now: DateTime<Utc>,
    ) -> Result<StepStatus> {
        if action.safety.requires_approval && !approved {
            return Ok(StepStatus::NeedsApproval);
        }

        let target = incident.target();
        let (attempts, last) = self.attempts(&playbook.id, target, index)?;
        if attempts >= action.safety.max_attempts {
            tracing::debug!("🛑 {}#{} exhausted ({} attempts)", playbook.id, index, attempts);
            return Ok(StepStatus::AttemptsExhausted { attempts });
        }
        if let Some(last) = last
            && action.safety.cooldown_ms > 0
        {
            let until = last + chrono::Duration::milliseconds(action.safety.cooldown_ms as i64);
            if now < until {
                return Ok(StepStatus::CoolingDown { until });
            }
        }

        self.record_attempt(&playbook.id, target, index, now)?;
        let outcome = match self.executor.execute(action, incident).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("❌ {} on '{}' failed: {e}", action.action, action.target);
                return Ok(StepStatus::Failed {
                    error: e.to_string(),
                });
            }
        };

        // An action without a check never counts as resolving the incident.
        let verified = match &self.probe {
            Some(_) if action.verification.check == CheckType::None => false,
            Some(probe) => {
                let VerifyResult { passed, .. } =
                    verify(&action.verification, incident.url.as_deref(), probe.as_ref()).await;
                passed
            }
            None => false,
        };
        Ok(StepStatus::Done { outcome, verified })
    }

    /// Attempts so far against `target` and when the last one happened.
    pub fn attempts(
        &self,
        playbook_id: &str,
        target: &str,
        index: usize,
    ) -> Result<(u32, Option<DateTime<Utc>>)> {
        let row: Option<(u32, String)> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT attempts, last_attempt_at FROM heal_attempts
                 WHERE playbook_id = ?1 AND target = ?2 AND action_index = ?3",
                params![playbook_id, target, index as i64],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })?;
        Ok(match row {
            Some((n, last)) => (n, parse_ts(&last)),
            None => (0, None),
        })
    }

    fn record_attempt(
        &self,
        playbook_id: &str,
        target: &str,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO heal_attempts (playbook_id, target, action_index, attempts, last_attempt_at)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT(playbook_id, target, action_index) DO UPDATE SET
                    attempts = attempts + 1,
                    last_attempt_at = excluded.last_attempt_at",
                params![playbook_id, target, index as i64, fmt_ts(now)],
            )
        })?;
        Ok(())
    }

    /// Forget a playbook's attempt history against one target.
    pub fn reset(&self, playbook_id: &str, target: &str) -> Result<()> {
        self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM heal_attempts WHERE playbook_id = ?1 AND target = ?2",
                params![playbook_id, target],
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playbook::{ActionType, PlaybookTable, Verification};
    use crate::verify::tests::ScriptedProbe;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 1, 8, 0, 0).unwrap()
    }

    fn incident() -> Incident {
        Incident::http(503, "/apps").with_url("https://example.test/apps")
    }

    fn playbook() -> Playbook {
        let v = Verification::http_status(200, 0, 0);
        Playbook {
            id: "pb".into(),
            name: "test".into(),
            description: String::new(),
            rule: Default::default(),
            actions: vec![
                HealAction::new(ActionType::PurgeCache, "cdn")
                    .with_limits(2, 60_000)
                    .verified_by(v.clone()),
                HealAction::new(ActionType::Redeploy, "app").gated().verified_by(v),
            ],
        }
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<ActionType>>);

    #[async_trait]
    impl ActionExecutor for Recording {
        async fn execute(&self, action: &HealAction, _incident: &Incident) -> Result<ActionOutcome> {
            self.0.lock().unwrap().push(action.action);
            Ok(ActionOutcome::Executed {
                detail: format!("{} done", action.action),
            })
        }
    }

    #[tokio::test]
    async fn test_simulated_by_default() {
        let runner = HealRunner::simulated(Database::open_in_memory().unwrap());
        let report = runner.run(&playbook(), &incident(), false, now()).await.unwrap();
        assert!(matches!(
            report.steps[0].status,
            StepStatus::Done {
                outcome: ActionOutcome::Simulated { .. },
                verified: false
            }
        ));
        assert_eq!(report.executed(), 0);
    }

    #[tokio::test]
    async fn test_gated_action_stops_playbook() {
        let exec = Arc::new(Recording::default());
        let runner = HealRunner::new(Database::open_in_memory().unwrap(), exec.clone())
            .with_probe(Arc::new(ScriptedProbe::new(&[503])));
        let report = runner.run(&playbook(), &incident(), false, now()).await.unwrap();
        assert!(report.awaiting_approval);
        assert!(!report.resolved);
        assert_eq!(report.steps[1].status, StepStatus::NeedsApproval);
        assert_eq!(*exec.0.lock().unwrap(), vec![ActionType::PurgeCache]);
    }

    #[tokio::test]
    async fn test_approved_action_runs_and_resolves() {
        let exec = Arc::new(Recording::default());
        let runner = HealRunner::new(Database::open_in_memory().unwrap(), exec.clone())
            .with_probe(Arc::new(ScriptedProbe::new(&[503, 200])));
        let report = runner.run(&playbook(), &incident(), true, now()).await.unwrap();
        assert!(report.resolved);
        assert_eq!(report.executed(), 2);
        assert!(matches!(report.resolved_by(), Some(ActionOutcome::Executed { .. })));
        assert_eq!(
            *exec.0.lock().unwrap(),
            vec![ActionType::PurgeCache, ActionType::Redeploy]
        );
        // Resolution clears the attempt ledger.
        assert_eq!(runner.attempts("pb", "https://example.test/apps", 0).unwrap().0, 0);
    }

    #[tokio::test]
    async fn test_attempts_are_kept_per_target() {
        let shop = Incident::http(503, "/apps/shop").with_url("https://example.test/apps/shop");
        let billing =
            Incident::http(503, "/apps/billing").with_url("https://example.test/apps/billing");

        // Same builtin playbook, same instant, two endpoints: neither cools the other down.
        let table = PlaybookTable::builtin();
        let apps = table.get("apps-503").unwrap();
        let runner = HealRunner::simulated(Database::open_in_memory().unwrap());
        for incident in [&shop, &billing] {
            let report = runner.run(apps, incident, false, now()).await.unwrap();
            assert!(matches!(report.steps[0].status, StepStatus::Done { .. }));
        }

        // Resolving billing leaves shop's history alone.
        let runner = HealRunner::new(
            Database::open_in_memory().unwrap(),
            Arc::new(Recording::default()),
        )
        .with_probe(Arc::new(ScriptedProbe::new(&[503, 200])));
        let pb = playbook();
        runner.run(&pb, &shop, false, now()).await.unwrap();
        let report = runner.run(&pb, &billing, false, now()).await.unwrap();
        assert!(report.resolved);
        assert_eq!(runner.attempts("pb", billing.target(), 0).unwrap().0, 0);
        assert_eq!(runner.attempts("pb", shop.target(), 0).unwrap().0, 1);
    }

    #[tokio::test]
    async fn test_cooldown_and_attempt_budget() {
        let exec = Arc::new(Recording::default());
        let runner = HealRunner::new(Database::open_in_memory().unwrap(), exec.clone())
            .with_probe(Arc::new(ScriptedProbe::new(&[503])));
        let pb = playbook();

        runner.run(&pb, &incident(), false, now()).await.unwrap();
        let report = runner
            .run(&pb, &incident(), false, now() + chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert!(matches!(report.steps[0].status, StepStatus::CoolingDown { .. }));

        runner
            .run(&pb, &incident(), false, now() + chrono::Duration::minutes(2))
            .await
            .unwrap();
        let report = runner
            .run(&pb, &incident(), false, now() + chrono::Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(
            report.steps[0].status,
            StepStatus::AttemptsExhausted { attempts: 2 }
        );
        assert_eq!(exec.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unchecked_action_does_not_resolve() {
        let table = PlaybookTable::builtin();
        let incident = Incident::http(500, "/api/orders").with_url("https://example.test/api/orders");
        let pb = table.get("server-error").unwrap();
        let runner = HealRunner::simulated(Database::open_in_memory().unwrap())
            .with_probe(Arc::new(ScriptedProbe::new(&[200])));
        let report = runner.run(pb, &incident, false, now()).await.unwrap();
        assert_eq!(report.steps.len(), 2);
        assert!(!report.resolved);
    }

    #[tokio::test]
    async fn test_builtin_apps_503_flow() {
        let table = PlaybookTable::builtin();
        let pb = table.matches(&incident())[0];
        let runner = HealRunner::simulated(Database::open_in_memory().unwrap());
        let report = runner.run(pb, &incident(), false, now()).await.unwrap();
        // purge and restart simulate, redeploy waits for approval.
        assert_eq!(report.steps.len(), 3);
        assert!(report.awaiting_approval);
    }
}
