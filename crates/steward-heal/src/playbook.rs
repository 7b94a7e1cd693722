//! Playbooks — predicate-matched remediation steps, loaded from `playbooks.toml`
//! or taken from the built-in table.

use serde::{Deserialize, Serialize};
use std::path::Path;

use steward_core::{Category, Result, StewardError};

/// An observed failure, as reported by a probe or an audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Incident {
    pub status_code: Option<u16>,
    /// Path or resource where the failure was seen, e.g. `/apps/checkout`.
    pub locator: Option<String>,
    pub category: Option<Category>,
    pub error: Option<String>,
    /// Full URL, used by verification when an action names none.
    pub url: Option<String>,
}

impl Incident {
    pub fn http(status_code: u16, locator: &str) -> Self {
        Self {
            status_code: Some(status_code),
            locator: Some(locator.to_string()),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// What the incident happened to: URL, else locator. Keys the attempt ledger.
    pub fn target(&self) -> &str {
        self.url
            .as_deref()
            .or(self.locator.as_deref())
            .unwrap_or_default()
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }
}

/// Predicates over an incident. Undeclared fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchRule {
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub locator_contains: Option<String>,
    #[serde(default)]
    pub category: Option<Category>,
    #[serde(default)]
    pub error_contains: Option<String>,
}

impl MatchRule {
    /// Every declared predicate must hold. A declared predicate fails when the
    /// incident lacks the field it tests.
    pub fn matches(&self, incident: &Incident) -> bool {
        if let Some(code) = self.status_code
            && incident.status_code != Some(code)
        {
            return false;
        }
        if let Some(needle) = &self.locator_contains
            && !incident.locator.as_deref().is_some_and(|l| l.contains(needle.as_str()))
        {
            return false;
        }
        if let Some(category) = self.category
            && incident.category != Some(category)
        {
            return false;
        }
        if let Some(needle) = &self.error_contains
            && !incident.error.as_deref().is_some_and(|e| e.contains(needle.as_str()))
        {
            return false;
        }
        true
    }

    pub fn is_catch_all(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    PurgeCache,
    RestartService,
    Redeploy,
    Rollback,
    Notify,
    OpenWorkItem,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::PurgeCache => "purge_cache",
            ActionType::RestartService => "restart_service",
            ActionType::Redeploy => "redeploy",
            ActionType::Rollback => "rollback",
            ActionType::Notify => "notify",
            ActionType::OpenWorkItem => "open_work_item",
        }
    }

    /// Changes what is running in production.
    pub fn is_high_risk(&self) -> bool {
        matches!(self, ActionType::Redeploy | ActionType::Rollback)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Safety tier attached to every action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Safety {
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub cooldown_ms: u64,
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for Safety {
    fn default() -> Self {
        Self {
            requires_approval: false,
            max_attempts: default_max_attempts(),
            cooldown_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    HttpStatus,
    BodyContains,
    #[default]
    None,
}

/// How to confirm an action worked.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    #[serde(default)]
    pub check: CheckType,
    /// URL to probe. Falls back to the incident URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Status code (`"200"`) or body substring, depending on `check`.
    #[serde(default)]
    pub expected: Option<String>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub backoff_ms: u64,
}

impl Verification {
    pub fn http_status(expected: u16, retries: u32, backoff_ms: u64) -> Self {
        Self {
            check: CheckType::HttpStatus,
            url: None,
            expected: Some(expected.to_string()),
            retries,
            backoff_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealAction {
    pub action: ActionType,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub safety: Safety,
    #[serde(default)]
    pub verification: Verification,
}

impl HealAction {
    pub fn new(action: ActionType, target: &str) -> Self {
        Self {
            action,
            target: target.to_string(),
            safety: Safety::default(),
            verification: Verification::default(),
        }
    }

    pub fn gated(mut self) -> Self {
        self.safety.requires_approval = true;
        self
    }

    pub fn with_limits(mut self, max_attempts: u32, cooldown_ms: u64) -> Self {
        self.safety.max_attempts = max_attempts;
        self.safety.cooldown_ms = cooldown_ms;
        self
    }

    pub fn verified_by(mut self, verification: Verification) -> Self {
        self.verification = verification;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "match", default)]
    pub rule: MatchRule,
    /// Executed in order, least invasive first.
    pub actions: Vec<HealAction>,
}

/// Ordered playbook table. Declaration order is match order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaybookTable {
    #[serde(default, rename = "playbooks")]
    pub playbooks: Vec<Playbook>,
}

impl PlaybookTable {
    pub fn new(playbooks: Vec<Playbook>) -> Self {
        Self { playbooks }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let table: Self = toml::from_str(content)?;
        table.validate()?;
        Ok(table)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let table = Self::from_toml(&content)?;
        tracing::info!("📖 Loaded {} playbooks from {}", table.len(), path.display());
        Ok(table)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for pb in &self.playbooks {
            if !seen.insert(pb.id.as_str()) {
                return Err(StewardError::Config(format!("duplicate playbook id '{}'", pb.id)));
            }
            if pb.actions.is_empty() {
                return Err(StewardError::Config(format!("playbook '{}' has no actions", pb.id)));
            }
            if pb.actions.iter().any(|a| a.safety.max_attempts == 0) {
                return Err(StewardError::Config(format!(
                    "playbook '{}': max_attempts must be > 0",
                    pb.id
                )));
            }
            if let Some(action) = pb
                .actions
                .iter()
                .find(|a| a.action.is_high_risk() && !a.safety.requires_approval)
            {
                return Err(StewardError::Config(format!(
                    "playbook '{}': {} must set requires_approval",
                    pb.id, action.action
                )));
            }
            if pb.rule.is_catch_all() {
                tracing::warn!("⚠️ Playbook '{}' has an empty match and fires on every incident", pb.id);
            }
        }
        Ok(())
    }

    /// Playbooks whose every declared predicate holds, in declaration order.
    pub fn matches(&self, incident: &Incident) -> Vec<&Playbook> {
        self.playbooks
            .iter()
            .filter(|pb| pb.rule.matches(incident))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Playbook> {
        self.playbooks.iter().find(|pb| pb.id == id)
    }

    pub fn len(&self) -> usize {
        self.playbooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playbooks.is_empty()
    }

    /// Default remediation table.
    pub fn builtin() -> Self {
        let ok_within = |retries| Verification::http_status(200, retries, 5_000);
        Self::new(vec![
            Playbook {
                id: "apps-503".into(),
                name: "App gateway unavailable".into(),
                description: "503 on /apps: purge cache, restart, then redeploy".into(),
                rule: MatchRule {
                    status_code: Some(503),
                    locator_contains: Some("/apps".into()),
                    ..Default::default()
                },
                actions: vec![
                    HealAction::new(ActionType::PurgeCache, "cdn")
                        .with_limits(3, 600_000)
                        .verified_by(ok_within(3)),
                    HealAction::new(ActionType::RestartService, "app")
                        .with_limits(2, 1_800_000)
                        .verified_by(ok_within(5)),
                    HealAction::new(ActionType::Redeploy, "app")
                        .gated()
                        .with_limits(1, 3_600_000)
                        .verified_by(ok_within(10)),
                ],
            },
            Playbook {
                id: "bad-gateway".into(),
                name: "Upstream bad gateway".into(),
                description: "502: restart the upstream, roll back if it keeps failing".into(),
                rule: MatchRule {
                    status_code: Some(502),
                    ..Default::default()
                },
                actions: vec![
                    HealAction::new(ActionType::RestartService, "upstream")
                        .with_limits(2, 900_000)
                        .verified_by(ok_within(5)),
                    HealAction::new(ActionType::Rollback, "upstream")
                        .gated()
                        .with_limits(1, 3_600_000)
                        .verified_by(ok_within(10)),
                ],
            },
            Playbook {
                id: "server-error".into(),
                name: "Internal server error".into(),
                description: "500: not auto-fixable, file work and tell a human".into(),
                rule: MatchRule {
                    status_code: Some(500),
                    ..Default::default()
                },
                actions: vec![
                    HealAction::new(ActionType::OpenWorkItem, "api").with_limits(1, 3_600_000),
                    HealAction::new(ActionType::Notify, "oncall").with_limits(1, 3_600_000),
                ],
            },
            Playbook {
                id: "auth-failure".into(),
                name: "Authentication failing".into(),
                description: "Auth errors are never auto-remediated".into(),
                rule: MatchRule {
                    category: Some(Category::Auth),
                    ..Default::default()
                },
                actions: vec![
                    HealAction::new(ActionType::Notify, "security").with_limits(1, 1_800_000),
                    HealAction::new(ActionType::OpenWorkItem, "auth").with_limits(1, 3_600_000),
                ],
            },
            Playbook {
                id: "request-timeout".into(),
                name: "Requests timing out".into(),
                description: "Probe timeouts: purge cache, then escalate".into(),
                rule: MatchRule {
                    error_contains: Some("timed out".into()),
                    ..Default::default()
                },
                actions: vec![
                    HealAction::new(ActionType::PurgeCache, "cdn")
                        .with_limits(2, 600_000)
                        .verified_by(ok_within(3)),
                    HealAction::new(ActionType::OpenWorkItem, "performance")
                        .with_limits(1, 3_600_000),
                ],
            },
        ])
    }
}
