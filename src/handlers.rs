//! Built-in job handlers and the default job set.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use steward_core::config::{HealMode, StewardConfig, expand_path};
use steward_core::{Category, Database, Severity, StewardError};
use steward_heal::{
    ActionExecutor, ActionOutcome, HealAction, HealRunner, HttpProbe, Incident, PlaybookTable,
    Probe,
};
use steward_proof::{ProofEngine, validate_window};
use steward_scheduler::{
    HandlerError, HandlerRegistry, HandlerReport, JobContext, JobDefinition, JobHandler,
    SchedulerDb,
};
use steward_work::{NewIssue, WorkItemStore};

type HandlerResult = std::result::Result<HandlerReport, HandlerError>;

fn parse_config<T: serde::de::DeserializeOwned>(
    handler: &str,
    config: &serde_json::Value,
) -> steward_core::Result<T> {
    serde_json::from_value(config.clone())
        .map_err(|e| StewardError::Config(format!("{handler}: {e}")))
}

// ─── heartbeat ──────────────────────────────────────

/// Liveness job. Its runs carry the heartbeat flag the proof engine reads.
pub struct HeartbeatHandler {
    db: Database,
}

impl HeartbeatHandler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobHandler for HeartbeatHandler {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn run(&self, _ctx: JobContext) -> HandlerResult {
        let jobs: i64 = self
            .db
            .with_conn(|c| c.query_row("SELECT COUNT(*) FROM jobs WHERE enabled = 1", [], |r| r.get(0)))?;
        Ok(HandlerReport::ok(format!("alive, {jobs} jobs enabled")))
    }
}

// ─── proof_report ──────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProofJobConfig {
    #[serde(default)]
    window_hours: Option<u32>,
    /// Write the artifact to disk as well.
    #[serde(default = "default_true")]
    write: bool,
    #[serde(default)]
    output_dir: Option<String>,
}

fn default_true() -> bool {
    true
}

pub struct ProofReportHandler {
    engine: ProofEngine,
    window_hours: u32,
    output_dir: String,
}

impl ProofReportHandler {
    pub fn new(db: Database, config: &StewardConfig) -> Self {
        Self {
            engine: ProofEngine::new(SchedulerDb::new(db), &config.proof),
            window_hours: config.proof.window_hours,
            output_dir: config.proof.output_dir.clone(),
        }
    }
}

#[async_trait]
impl JobHandler for ProofReportHandler {
    fn name(&self) -> &str {
        "proof_report"
    }

    fn validate_config(&self, config: &serde_json::Value) -> steward_core::Result<()> {
        let cfg: ProofJobConfig = parse_config(self.name(), config)?;
        if let Some(hours) = cfg.window_hours {
            validate_window(hours)?;
        }
        Ok(())
    }

    async fn run(&self, ctx: JobContext) -> HandlerResult {
        let cfg: ProofJobConfig = parse_config(self.name(), &ctx.config)?;
        let window = cfg.window_hours.unwrap_or(self.window_hours);
        let report = self.engine.generate(window, ctx.now)?;

        if cfg.write {
            let dir = expand_path(cfg.output_dir.as_deref().unwrap_or(&self.output_dir));
            ProofEngine::write(&report, &dir)?;
        }

        let v = &report.verification;
        let failed_checks = [v.heartbeat_continuous, v.uptime_threshold_met, v.no_critical_gaps]
            .iter()
            .filter(|ok| !**ok)
            .count() as u32
            + u32::from(report.summary.failures > 0);

        Ok(HandlerReport {
            success: true,
            details: format!(
                "{}h: uptime {}%, {} gaps, max gap {}min",
                window,
                report.summary.uptime_pct,
                report.gaps.len(),
                report.max_gap_minutes
            ),
            issues_found: failed_checks,
            fixes_applied: 0,
            severity: (!v.overall_healthy).then_some(Severity::High),
            verification_passed: v.overall_healthy,
        })
    }
}

// ─── work_dispatch ──────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DispatchJobConfig {
    #[serde(default = "default_dispatch_limit")]
    limit: usize,
    #[serde(default)]
    assignee: Option<String>,
}

fn default_dispatch_limit() -> usize {
    5
}

/// Hands ready work items to whoever works them.
pub struct WorkDispatchHandler {
    store: WorkItemStore,
}

impl WorkDispatchHandler {
    pub fn new(db: Database) -> Self {
        Self {
            store: WorkItemStore::new(db),
        }
    }
}

#[async_trait]
impl JobHandler for WorkDispatchHandler {
    fn name(&self) -> &str {
        "work_dispatch"
    }

    fn validate_config(&self, config: &serde_json::Value) -> steward_core::Result<()> {
        let cfg: DispatchJobConfig = parse_config(self.name(), config)?;
        if cfg.limit == 0 {
            return Err(StewardError::Config("work_dispatch: limit must be > 0".into()));
        }
        Ok(())
    }

    async fn run(&self, ctx: JobContext) -> HandlerResult {
        let cfg: DispatchJobConfig = parse_config(self.name(), &ctx.config)?;
        let claimed = self.store.claim_for_dispatch(cfg.limit, ctx.now)?;
        if let Some(assignee) = &cfg.assignee {
            for item in &claimed {
                self.store.assign(&item.id, assignee, ctx.now)?;
            }
        }
        let titles: Vec<&str> = claimed.iter().map(|i| i.title.as_str()).collect();
        Ok(HandlerReport::ok(if titles.is_empty() {
            "nothing to dispatch".to_string()
        } else {
            format!("dispatched {}: {}", titles.len(), titles.join(", "))
        }))
    }
}

// ─── endpoint_check ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Endpoint {
    pub url: String,
    #[serde(default = "default_expected_status")]
    pub expected_status: u16,
    /// Defaults to the URL path.
    #[serde(default)]
    pub locator: Option<String>,
    #[serde(default = "default_category")]
    pub category: Category,
}

fn default_expected_status() -> u16 {
    200
}

fn default_category() -> Category {
    Category::Api
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EndpointCheckConfig {
    endpoints: Vec<Endpoint>,
}

/// Probes endpoints; failures go through matching playbooks and, when the
/// playbooks do not fix them, become work items.
pub struct EndpointCheckHandler {
    probe: Arc<dyn Probe>,
    playbooks: Arc<PlaybookTable>,
    runner: Arc<HealRunner>,
    work: WorkItemStore,
}

impl EndpointCheckHandler {
    pub fn new(
        probe: Arc<dyn Probe>,
        playbooks: Arc<PlaybookTable>,
        runner: Arc<HealRunner>,
        work: WorkItemStore,
    ) -> Self {
        Self {
            probe,
            playbooks,
            runner,
            work,
        }
    }

    async fn check(&self, endpoint: &Endpoint) -> Option<Incident> {
        let locator = endpoint
            .locator
            .clone()
            .unwrap_or_else(|| url_path(&endpoint.url).to_string());
        let incident = Incident {
            locator: Some(locator),
            category: Some(endpoint.category),
            url: Some(endpoint.url.clone()),
            ..Default::default()
        };
        match self.probe.fetch(&endpoint.url).await {
            Ok(resp) if resp.status == endpoint.expected_status => None,
            Ok(resp) => Some(Incident {
                status_code: Some(resp.status),
                error: Some(format!("expected {}, got {}", endpoint.expected_status, resp.status)),
                ..incident
            }),
            Err(e) => Some(Incident {
                error: Some(e.to_string()),
                ..incident
            }),
        }
    }
}

#[async_trait]
impl JobHandler for EndpointCheckHandler {
    fn name(&self) -> &str {
        "endpoint_check"
    }

    fn validate_config(&self, config: &serde_json::Value) -> steward_core::Result<()> {
        let cfg: EndpointCheckConfig = parse_config(self.name(), config)?;
        if cfg.endpoints.is_empty() {
            return Err(StewardError::Config("endpoint_check: no endpoints".into()));
        }
        if let Some(bad) = cfg
            .endpoints
            .iter()
            .find(|e| !(e.url.starts_with("http://") || e.url.starts_with("https://")))
        {
            return Err(StewardError::Config(format!(
                "endpoint_check: '{}' is not an http(s) URL",
                bad.url
            )));
        }
        Ok(())
    }

    async fn run(&self, ctx: JobContext) -> HandlerResult {
        let cfg: EndpointCheckConfig = parse_config(self.name(), &ctx.config)?;
        let mut issues = 0u32;
        let mut fixes = 0u32;
        let mut worst: Option<Severity> = None;
        let mut lines = Vec::new();

        for endpoint in &cfg.endpoints {
            let Some(incident) = self.check(endpoint).await else {
                continue;
            };
            issues += 1;
            let severity = incident_severity(&incident);
            worst = Some(worst.map_or(severity, |w| w.min(severity)));

            // Only a verified change to real infrastructure counts as a fix.
            let mut outcome = None;
            for playbook in self.playbooks.matches(&incident) {
                let report = self.runner.run(playbook, &incident, false, ctx.now).await?;
                if let Some(resolved_by) = report.resolved_by() {
                    outcome = Some(resolved_by.clone());
                    break;
                }
            }

            let locator = incident.locator.clone().unwrap_or_default();
            if let Some(ActionOutcome::Executed { .. }) = outcome {
                fixes += 1;
                lines.push(format!("{locator}: healed"));
                continue;
            }

            let title = match incident.status_code {
                Some(code) => format!("{locator} returned {code}"),
                None => format!("{locator} unreachable"),
            };
            let mut issue = NewIssue::new(&title, severity, endpoint.category)
                .with_locator(&locator)
                .with_description(incident.error.as_deref().unwrap_or_default())
                .with_source_run(ctx.run_id);
            issue.evidence = vec![endpoint.url.clone()];
            let filed = self.work.upsert_issue(&issue, ctx.now)?;
            let what = match outcome {
                Some(ActionOutcome::Simulated { .. }) => "recovered (simulated)",
                _ => incident.error.as_deref().unwrap_or("failed"),
            };
            lines.push(format!(
                "{locator}: {what} ({})",
                filed.status().map(|s| s.as_str()).unwrap_or("filtered")
            ));
        }

        Ok(HandlerReport {
            success: true,
            details: if lines.is_empty() {
                format!("{} endpoints healthy", cfg.endpoints.len())
            } else {
                lines.join("; ")
            },
            issues_found: issues,
            fixes_applied: fixes,
            severity: worst,
            verification_passed: issues == fixes,
        })
    }
}

/// 5xx and unreachable endpoints are HIGH, everything else MEDIUM.
fn incident_severity(incident: &Incident) -> Severity {
    match incident.status_code {
        Some(code) if code >= 500 => Severity::High,
        Some(_) => Severity::Medium,
        None if incident.error.as_deref().is_some_and(|e| e.contains("timed out")) => {
            Severity::Medium
        }
        None => Severity::High,
    }
}

/// Path component of an absolute URL, `/` when there is none.
fn url_path(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let path = rest.find('/').map_or("/", |i| &rest[i..]);
    path.split(['?', '#']).next().unwrap_or("/")
}

// ─── executors ──────────────────────────────────────

/// Hands actions to an operator-run endpoint (`heal.executor_url`).
pub struct WebhookExecutor {
    client: reqwest::Client,
    url: String,
}

impl WebhookExecutor {
    pub fn new(url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl ActionExecutor for WebhookExecutor {
    async fn execute(
        &self,
        action: &HealAction,
        incident: &Incident,
    ) -> steward_core::Result<ActionOutcome> {
        let resp = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "action": action.action.as_str(),
                "target": action.target,
                "incident": incident,
            }))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| StewardError::Handler(format!("executor unreachable: {e}")))?;

        if resp.status().is_success() {
            Ok(ActionOutcome::Executed {
                detail: format!("{} on '{}' accepted", action.action, action.target),
            })
        } else {
            Err(StewardError::Handler(format!(
                "executor rejected {}: HTTP {}",
                action.action,
                resp.status()
            )))
        }
    }
}

// ─── wiring ──────────────────────────────────────

pub fn load_playbooks(config: &StewardConfig) -> steward_core::Result<PlaybookTable> {
    match &config.heal.playbooks_path {
        Some(path) => PlaybookTable::load(&expand_path(path)),
        None => Ok(PlaybookTable::builtin()),
    }
}

/// Registry with every built-in handler.
pub fn build_registry(config: &StewardConfig, db: &Database) -> steward_core::Result<HandlerRegistry> {
    let probe: Arc<dyn Probe> = Arc::new(HttpProbe::new(Duration::from_secs(10))?);
    let runner = match (config.heal.mode, config.heal.executor_url.as_deref()) {
        (HealMode::Execute, Some(url)) => {
            HealRunner::new(db.clone(), Arc::new(WebhookExecutor::new(url)))
        }
        _ => HealRunner::simulated(db.clone()),
    }
    .with_probe(probe.clone());

    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(HeartbeatHandler::new(db.clone())))?;
    registry.register(Arc::new(ProofReportHandler::new(db.clone(), config)))?;
    registry.register(Arc::new(WorkDispatchHandler::new(db.clone())))?;
    registry.register(Arc::new(EndpointCheckHandler::new(
        probe,
        Arc::new(load_playbooks(config)?),
        Arc::new(runner),
        WorkItemStore::new(db.clone()),
    )))?;
    Ok(registry)
}

/// Jobs seeded when no `jobs.toml` is configured.
pub fn default_jobs(config: &StewardConfig) -> Vec<JobDefinition> {
    vec![
        JobDefinition::interval(&config.scheduler.heartbeat_job, "heartbeat", 60_000)
            .with_timeout_ms(10_000)
            .with_priority(9),
        JobDefinition::cron("proof-report", "proof_report", "0 * * * *")
            .with_timeout_ms(60_000)
            .with_priority(6),
        JobDefinition::interval("work-dispatch", "work_dispatch", 300_000)
            .with_priority(4)
            .with_config(serde_json::json!({ "limit": 5 })),
    ]
}
