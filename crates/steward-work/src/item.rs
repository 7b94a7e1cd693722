//! Work items, the issues they are generated from, and the priority policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use steward_core::{Category, Severity};

use crate::status::WorkStatus;

/// A tracked unit of remediation work. Never physically deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub fingerprint: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub category: Category,
    pub locator: Option<String>,
    pub status: WorkStatus,
    pub priority_score: i64,
    /// Times the item entered FAILED.
    pub attempts: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub requires_approval: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub source_run_id: Option<i64>,
    pub source_issue_id: Option<String>,
    /// Locators where the issue was observed.
    pub evidence: Vec<String>,
    pub assigned_to: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkItem {
    /// Eligible for dispatch at `now`: NEW, out of cooldown, approved if it must be.
    pub fn is_dispatchable(&self, now: DateTime<Utc>) -> bool {
        self.status == WorkStatus::New
            && self.cooldown_until.is_none_or(|until| until <= now)
            && (!self.requires_approval || self.approved_at.is_some())
    }
}

/// A detected issue, as handed over by audits and handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewIssue {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub severity: Severity,
    pub category: Category,
    #[serde(default)]
    pub locator: Option<String>,
    #[serde(default)]
    pub source_run_id: Option<i64>,
    #[serde(default)]
    pub source_issue_id: Option<String>,
    #[serde(default)]
    pub evidence: Vec<String>,
    /// Raised to true for CRITICAL and HIGH regardless of this value.
    #[serde(default)]
    pub requires_approval: bool,
}

impl NewIssue {
    pub fn new(title: &str, severity: Severity, category: Category) -> Self {
        Self {
            title: title.to_string(),
            description: String::new(),
            severity,
            category,
            locator: None,
            source_run_id: None,
            source_issue_id: None,
            evidence: Vec::new(),
            requires_approval: false,
        }
    }

    pub fn with_locator(mut self, locator: &str) -> Self {
        self.locator = Some(locator.to_string());
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_source_run(mut self, run_id: i64) -> Self {
        self.source_run_id = Some(run_id);
        self
    }

    pub fn fingerprint(&self) -> String {
        crate::fingerprint::fingerprint(
            self.category,
            self.severity,
            &self.title,
            self.locator.as_deref(),
        )
    }

    pub fn effective_requires_approval(&self) -> bool {
        self.requires_approval || requires_approval(self.severity)
    }

    /// Evidence plus the locator itself, deduplicated, in first-seen order.
    pub fn evidence_locators(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for loc in self.locator.iter().chain(self.evidence.iter()) {
            if !out.contains(loc) {
                out.push(loc.clone());
            }
        }
        out
    }
}

/// Score used to order dispatch. Strictly increasing with severity.
pub fn priority_score(severity: Severity) -> i64 {
    match severity {
        Severity::Critical => 100,
        Severity::High => 75,
        Severity::Medium => 50,
        Severity::Low => 25,
        Severity::Info => 0,
    }
}

pub fn requires_approval(severity: Severity) -> bool {
    matches!(severity, Severity::Critical | Severity::High)
}

/// Result of feeding one issue through generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GenerateOutcome {
    Created { id: String },
    Reopened { id: String, previous: WorkStatus },
    /// An item with this fingerprint is already being handled or resolved.
    Skipped { id: String, status: WorkStatus },
    /// INFO issues never become work items.
    Filtered,
}

impl GenerateOutcome {
    pub fn id(&self) -> Option<&str> {
        match self {
            GenerateOutcome::Created { id }
            | GenerateOutcome::Reopened { id, .. }
            | GenerateOutcome::Skipped { id, .. } => Some(id),
            GenerateOutcome::Filtered => None,
        }
    }

    /// Status of the item after generation.
    pub fn status(&self) -> Option<WorkStatus> {
        match self {
            GenerateOutcome::Created { .. } | GenerateOutcome::Reopened { .. } => {
                Some(WorkStatus::New)
            }
            GenerateOutcome::Skipped { status, .. } => Some(*status),
            GenerateOutcome::Filtered => None,
        }
    }
}

/// Tally of one generation batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerateSummary {
    pub created: usize,
    pub reopened: usize,
    pub skipped: usize,
    pub filtered: usize,
    pub outcomes: Vec<GenerateOutcome>,
}

impl GenerateSummary {
    pub fn push(&mut self, outcome: GenerateOutcome) {
        match &outcome {
            GenerateOutcome::Created { .. } => self.created += 1,
            GenerateOutcome::Reopened { .. } => self.reopened += 1,
            GenerateOutcome::Skipped { .. } => self.skipped += 1,
            GenerateOutcome::Filtered => self.filtered += 1,
        }
        self.outcomes.push(outcome);
    }
}

/// Filter for [`crate::store::WorkItemStore::query`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemQuery {
    pub status: Option<WorkStatus>,
    pub severity: Option<Severity>,
    pub limit: usize,
}

impl Default for WorkItemQuery {
    fn default() -> Self {
        Self {
            status: None,
            severity: None,
            limit: 50,
        }
    }
}

/// Matching items plus counts over the whole table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkItemPage {
    pub items: Vec<WorkItem>,
    pub by_status: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_is_monotonic() {
        let scores: Vec<_> = Severity::ALL.into_iter().map(priority_score).collect();
        assert!(scores.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_approval_forced_for_high_severity() {
        let issue = NewIssue::new("TLS expired", Severity::High, Category::Security);
        assert!(!issue.requires_approval);
        assert!(issue.effective_requires_approval());
        assert!(!NewIssue::new("slow page", Severity::Low, Category::Performance)
            .effective_requires_approval());
    }

    #[test]
    fn test_evidence_includes_locator_once() {
        let mut issue = NewIssue::new("500", Severity::Medium, Category::Api).with_locator("/a");
        issue.evidence = vec!["/a".into(), "/b".into()];
        assert_eq!(issue.evidence_locators(), vec!["/a", "/b"]);
    }

    #[test]
    fn test_outcome_status() {
        let o = GenerateOutcome::Skipped {
            id: "x".into(),
            status: WorkStatus::Merged,
        };
        assert_eq!(o.id(), Some("x"));
        assert_eq!(o.status(), Some(WorkStatus::Merged));
        assert_eq!(GenerateOutcome::Filtered.id(), None);
    }
}
