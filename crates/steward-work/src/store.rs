//! Work item store. The only writer of the `work_items` table.
//!
//! Every status change goes through a conditional update
//! (`WHERE id = ? AND status = <expected>`), so two callers racing on the same
//! item can never both win.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::BTreeMap;
use std::time::Duration;

use steward_core::db::{Database, fmt_ts, parse_ts};
use steward_core::{Result, Severity};

use crate::item::{
    GenerateOutcome, GenerateSummary, NewIssue, WorkItem, WorkItemPage, WorkItemQuery,
    priority_score,
};
use crate::status::WorkStatus;

const COLUMNS: &str = "id, fingerprint, title, description, severity, category, locator, status, \
     priority_score, attempts, cooldown_until, requires_approval, approved_at, source_run_id, \
     source_issue_id, evidence, assigned_to, assigned_at, created_at, updated_at";

#[derive(Clone)]
pub struct WorkItemStore {
    db: Database,
}

impl WorkItemStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // ─── Generation ──────────────────────────────────────

    /// Create, reopen or skip the work item for one issue.
    pub fn upsert_issue(&self, issue: &NewIssue, now: DateTime<Utc>) -> Result<GenerateOutcome> {
        if issue.severity == Severity::Info {
            tracing::debug!("🔕 Filtered INFO issue: {}", issue.title);
            return Ok(GenerateOutcome::Filtered);
        }
        let fp = issue.fingerprint();

        let outcome = self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let existing: Option<(String, String, String)> = tx
                .query_row(
                    "SELECT id, status, evidence FROM work_items WHERE fingerprint = ?1",
                    [&fp],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            let outcome = match existing {
                None => {
                    let id = uuid::Uuid::new_v4().to_string();
                    insert_item(&tx, &id, &fp, issue, now)?;
                    GenerateOutcome::Created { id }
                }
                Some((id, status, evidence)) => {
                    let status: WorkStatus = status.parse().map_err(|e: String| {
                        rusqlite::Error::FromSqlConversionFailure(
                            1,
                            rusqlite::types::Type::Text,
                            e.into(),
                        )
                    })?;
                    if status.blocks_reopen() {
                        GenerateOutcome::Skipped { id, status }
                    } else {
                        let mut merged: Vec<String> =
                            serde_json::from_str(&evidence).unwrap_or_default();
                        for loc in issue.evidence_locators() {
                            if !merged.contains(&loc) {
                                merged.push(loc);
                            }
                        }
                        reopen_item(&tx, &id, issue, &merged, now)?;
                        GenerateOutcome::Reopened {
                            id,
                            previous: status,
                        }
                    }
                }
            };
            tx.commit()?;
            Ok(outcome)
        })?;

        match &outcome {
            GenerateOutcome::Created { id } => {
                tracing::info!("🆕 Work item {} created: {} [{}]", short(id), issue.title, issue.severity)
            }
            GenerateOutcome::Reopened { id, previous } => {
                tracing::info!("♻️ Work item {} reopened from {}: {}", short(id), previous, issue.title)
            }
            GenerateOutcome::Skipped { id, status } => {
                tracing::debug!("⏭️ Work item {} already {}: {}", short(id), status, issue.title)
            }
            GenerateOutcome::Filtered => {}
        }
        Ok(outcome)
    }

    /// Feed a batch of issues through [`WorkItemStore::upsert_issue`].
    pub fn generate(&self, issues: &[NewIssue], now: DateTime<Utc>) -> Result<GenerateSummary> {
        let mut summary = GenerateSummary::default();
        for issue in issues {
            summary.push(self.upsert_issue(issue, now)?);
        }
        Ok(summary)
    }

    // ─── Lifecycle ──────────────────────────────────────

    /// Move `id` from `from` to `to`. Returns false, without touching the row,
    /// when the pair is not in the transition table or the item is no longer in `from`.
    pub fn transition(
        &self,
        id: &str,
        from: WorkStatus,
        to: WorkStatus,
        cooldown: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            tracing::debug!("🚫 Illegal transition {} -> {} for {}", from, to, short(id));
            return Ok(false);
        }
        let cooldown_until = cooldown
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| fmt_ts(now + d));

        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE work_items SET
                    status = ?1,
                    attempts = attempts + CASE WHEN ?1 = 'FAILED' THEN 1 ELSE 0 END,
                    cooldown_until = COALESCE(?2, cooldown_until),
                    updated_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![to.as_str(), cooldown_until, fmt_ts(now), id, from.as_str()],
            )
        })?;

        if changed == 1 {
            tracing::info!("🔀 Work item {}: {} -> {}", short(id), from, to);
        }
        Ok(changed == 1)
    }

    /// Transition from whatever status the item currently has.
    pub fn advance(
        &self,
        id: &str,
        to: WorkStatus,
        cooldown: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        match self.get(id)? {
            Some(item) => self.transition(id, item.status, to, cooldown, now),
            None => Ok(false),
        }
    }

    /// Claim up to `limit` dispatchable items, highest priority first.
    /// Each claim is a conditional NEW -> DISPATCHED; items taken by a
    /// concurrent claimer are simply not returned.
    pub fn claim_for_dispatch(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<WorkItem>> {
        let now_str = fmt_ts(now);
        let candidates: Vec<String> = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM work_items
                 WHERE status = 'NEW'
                   AND (cooldown_until IS NULL OR cooldown_until <= ?1)
                   AND (requires_approval = 0 OR approved_at IS NOT NULL)
                 ORDER BY priority_score DESC, created_at ASC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![now_str, limit as i64], |row| row.get(0))?;
            rows.collect()
        })?;

        let mut claimed = Vec::new();
        for id in candidates {
            let Some(item) = self.get(&id)? else { continue };
            if !item.is_dispatchable(now) {
                continue;
            }
            if self.transition(&id, WorkStatus::New, WorkStatus::Dispatched, None, now)?
                && let Some(item) = self.get(&id)?
            {
                claimed.push(item);
            }
        }
        Ok(claimed)
    }

    pub fn approve(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE work_items SET approved_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![fmt_ts(now), id],
            )
        })?;
        if changed == 1 {
            tracing::info!("👍 Work item {} approved", short(id));
        }
        Ok(changed == 1)
    }

    pub fn assign(&self, id: &str, assignee: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE work_items SET assigned_to = ?1, assigned_at = ?2, updated_at = ?2
                 WHERE id = ?3",
                params![assignee, fmt_ts(now), id],
            )
        })?;
        Ok(changed == 1)
    }

    // ─── Reads ──────────────────────────────────────

    pub fn get(&self, id: &str) -> Result<Option<WorkItem>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM work_items WHERE id = ?1"),
                [id],
                row_to_item,
            )
            .optional()
        })
    }

    pub fn get_by_fingerprint(&self, fingerprint: &str) -> Result<Option<WorkItem>> {
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM work_items WHERE fingerprint = ?1"),
                [fingerprint],
                row_to_item,
            )
            .optional()
        })
    }

    /// Filtered items by priority, plus status and severity counts over all items.
    pub fn query(&self, q: &WorkItemQuery) -> Result<WorkItemPage> {
        let status = q.status.map(|s| s.as_str());
        let severity = q.severity.map(|s| s.as_str());
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM work_items
                 WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR severity = ?2)
                 ORDER BY priority_score DESC, created_at ASC
                 LIMIT ?3"
            ))?;
            let items = stmt
                .query_map(params![status, severity, q.limit as i64], row_to_item)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok(WorkItemPage {
                items,
                by_status: group_count(conn, "status")?,
                by_severity: group_count(conn, "severity")?,
            })
        })
    }
}

fn insert_item(
    conn: &Connection,
    id: &str,
    fingerprint: &str,
    issue: &NewIssue,
    now: DateTime<Utc>,
) -> rusqlite::Result<()> {
    let evidence = serde_json::to_string(&issue.evidence_locators())
        .unwrap_or_else(|_| "[]".to_string());
    let now = fmt_ts(now);
    conn.execute(
        "INSERT INTO work_items
         (id, fingerprint, title, description, severity, category, locator, status,
          priority_score, requires_approval, source_run_id, source_issue_id, evidence,
          created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'NEW', ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        params![
            id,
            fingerprint,
            issue.title.trim(),
            issue.description,
            issue.severity.as_str(),
            issue.category.as_str(),
            issue.locator,
            priority_score(issue.severity),
            issue.effective_requires_approval() as i32,
            issue.source_run_id,
            issue.source_issue_id,
            evidence,
            now,
        ],
    )?;
    Ok(())
}

fn reopen_item(
    conn: &Connection,
    id: &str,
    issue: &NewIssue,
    evidence: &[String],
    now: DateTime<Utc>,
) -> rusqlite::Result<()> {
    let evidence = serde_json::to_string(evidence).unwrap_or_else(|_| "[]".to_string());
    // A reopened item is unassigned, and a gated one needs a fresh approval.
    conn.execute(
        "UPDATE work_items SET
            title = ?1, description = ?2, locator = ?3, status = 'NEW',
            priority_score = ?4, requires_approval = ?5, source_run_id = ?6,
            source_issue_id = ?7, evidence = ?8, updated_at = ?9,
            assigned_to = NULL, assigned_at = NULL,
            approved_at = CASE WHEN ?5 = 1 THEN NULL ELSE approved_at END
         WHERE id = ?10",
        params![
            issue.title.trim(),
            issue.description,
            issue.locator,
            priority_score(issue.severity),
            issue.effective_requires_approval() as i32,
            issue.source_run_id,
            issue.source_issue_id,
            evidence,
            fmt_ts(now),
            id,
        ],
    )?;
    Ok(())
}

fn group_count(conn: &Connection, column: &str) -> rusqlite::Result<BTreeMap<String, usize>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {column}, COUNT(*) FROM work_items GROUP BY {column}"
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
    })?;
    rows.collect()
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

fn ts(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value
        .map(|s| parse_ts(&s).ok_or_else(|| conversion_error(idx, format!("bad timestamp '{s}'"))))
        .transpose()
}

fn required_ts(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    parse_ts(&value).ok_or_else(|| conversion_error(idx, format!("bad timestamp '{value}'")))
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<WorkItem> {
    let severity: String = row.get(4)?;
    let category: String = row.get(5)?;
    let status: String = row.get(7)?;
    let evidence: String = row.get(15)?;
    Ok(WorkItem {
        id: row.get(0)?,
        fingerprint: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        severity: severity.parse().map_err(|e| conversion_error(4, e))?,
        category: category.parse().map_err(|e| conversion_error(5, e))?,
        locator: row.get(6)?,
        status: status.parse().map_err(|e| conversion_error(7, e))?,
        priority_score: row.get(8)?,
        attempts: row.get(9)?,
        cooldown_until: ts(10, row.get(10)?)?,
        requires_approval: row.get::<_, i32>(11)? != 0,
        approved_at: ts(12, row.get(12)?)?,
        source_run_id: row.get(13)?,
        source_issue_id: row.get(14)?,
        evidence: serde_json::from_str(&evidence).map_err(|e| conversion_error(15, e.to_string()))?,
        assigned_to: row.get(16)?,
        assigned_at: ts(17, row.get(17)?)?,
        created_at: required_ts(18, row.get(18)?)?,
        updated_at: required_ts(19, row.get(19)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;
    use steward_core::Category;
    use WorkStatus::*;

    fn store() -> WorkItemStore {
        WorkItemStore::new(Database::open_in_memory().unwrap())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).unwrap()
    }

    fn issue(title: &str, severity: Severity) -> NewIssue {
        NewIssue::new(title, severity, Category::Api).with_locator("/apps")
    }

    fn created_id(outcome: GenerateOutcome) -> String {
        match outcome {
            GenerateOutcome::Created { id } => id,
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[test]
    fn test_generate_twice_never_duplicates() {
        let store = store();
        let batch = vec![
            issue("checkout 503", Severity::High),
            issue("slow search", Severity::Medium),
            issue("debug banner", Severity::Info),
        ];
        let first = store.generate(&batch, now()).unwrap();
        assert_eq!((first.created, first.filtered), (2, 1));

        let second = store.generate(&batch, now()).unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.reopened, 2);

        let page = store.query(&WorkItemQuery::default()).unwrap();
        assert_eq!(page.items.len(), 2);
        let fps: HashSet<_> = page.items.iter().map(|i| i.fingerprint.clone()).collect();
        assert_eq!(fps.len(), 2);
    }

    #[test]
    fn test_active_item_is_not_touched() {
        let store = store();
        let id = created_id(store.upsert_issue(&issue("checkout 503", Severity::Medium), now()).unwrap());
        assert!(store.advance(&id, Dispatched, None, now()).unwrap());
        assert!(store.advance(&id, InProgress, None, now()).unwrap());

        let again = store
            .upsert_issue(&issue("checkout 503", Severity::Medium).with_description("changed"), now())
            .unwrap();
        assert_eq!(again, GenerateOutcome::Skipped { id: id.clone(), status: InProgress });
        let item = store.get(&id).unwrap().unwrap();
        assert_eq!(item.status, InProgress);
        assert_eq!(item.description, "");
    }

    #[test]
    fn test_failed_item_is_reopened() {
        let store = store();
        let id = created_id(store.upsert_issue(&issue("checkout 503", Severity::Low), now()).unwrap());
        store.advance(&id, Dispatched, None, now()).unwrap();
        store.advance(&id, Failed, None, now()).unwrap();

        let mut repeat = issue("checkout 503", Severity::Low).with_description("seen again");
        repeat.evidence = vec!["/apps/42".into()];
        let later = now() + chrono::Duration::hours(1);
        let outcome = store.upsert_issue(&repeat, later).unwrap();
        assert_eq!(outcome.status(), Some(New));
        assert!(matches!(outcome, GenerateOutcome::Reopened { previous: Failed, .. }));

        let item = store.get(&id).unwrap().unwrap();
        assert_eq!(item.status, New);
        assert_eq!(item.attempts, 1);
        assert_eq!(item.description, "seen again");
        assert_eq!(item.evidence, vec!["/apps", "/apps/42"]);
        assert_eq!(item.updated_at, later);
        assert_eq!(item.created_at, now());
    }

    #[test]
    fn test_reopened_critical_item_needs_fresh_approval() {
        let store = store();
        let id = created_id(store.upsert_issue(&issue("db down", Severity::Critical), now()).unwrap());
        store.approve(&id, now()).unwrap();
        assert_eq!(store.claim_for_dispatch(10, now()).unwrap().len(), 1);
        store.assign(&id, "oncall", now()).unwrap();
        assert!(store.advance(&id, Failed, None, now()).unwrap());

        let later = now() + chrono::Duration::days(3);
        let outcome = store.upsert_issue(&issue("db down", Severity::Critical), later).unwrap();
        assert!(matches!(outcome, GenerateOutcome::Reopened { previous: Failed, .. }));

        let item = store.get(&id).unwrap().unwrap();
        assert!(item.approved_at.is_none());
        assert!(item.assigned_to.is_none());
        assert!(item.assigned_at.is_none());
        assert!(!item.is_dispatchable(later));
        assert!(store.claim_for_dispatch(10, later).unwrap().is_empty());

        store.approve(&id, later).unwrap();
        assert_eq!(store.claim_for_dispatch(10, later).unwrap().len(), 1);
    }

    #[test]
    fn test_new_item_policy_fields() {
        let store = store();
        let id = created_id(store.upsert_issue(&issue("db down", Severity::Critical), now()).unwrap());
        let item = store.get(&id).unwrap().unwrap();
        assert_eq!(item.priority_score, 100);
        assert!(item.requires_approval);
        assert_eq!(item.status, New);
        assert_eq!(store.get_by_fingerprint(&item.fingerprint).unwrap().unwrap().id, id);
    }

    #[test]
    fn test_illegal_transition_is_rejected_without_mutation() {
        let store = store();
        let id = created_id(store.upsert_issue(&issue("x", Severity::Low), now()).unwrap());
        let before = store.get(&id).unwrap().unwrap();
        let later = now() + chrono::Duration::minutes(5);
        assert!(!store.transition(&id, New, Merged, None, later).unwrap());
        let after = store.get(&id).unwrap().unwrap();
        assert_eq!(after.status, New);
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[test]
    fn test_full_lifecycle() {
        let store = store();
        let id = created_id(store.upsert_issue(&issue("x", Severity::Low), now()).unwrap());
        let path = [New, Dispatched, InProgress, PrOpened, Verified, Merged, Deployed];
        for pair in path.windows(2) {
            assert!(store.transition(&id, pair[0], pair[1], None, now()).unwrap());
        }
        assert_eq!(store.get(&id).unwrap().unwrap().status, Deployed);
    }

    #[test]
    fn test_stale_from_state_loses() {
        let store = store();
        let id = created_id(store.upsert_issue(&issue("x", Severity::Low), now()).unwrap());
        assert!(store.transition(&id, New, Dispatched, None, now()).unwrap());
        // A second dispatcher still believes the item is NEW.
        assert!(!store.transition(&id, New, Dispatched, None, now()).unwrap());
        assert!(!store.transition("missing", New, Dispatched, None, now()).unwrap());
    }

    #[test]
    fn test_failed_counts_attempts_and_sets_cooldown() {
        let store = store();
        let id = created_id(store.upsert_issue(&issue("x", Severity::Low), now()).unwrap());
        store.advance(&id, Dispatched, None, now()).unwrap();
        assert!(store.advance(&id, Failed, Some(Duration::from_secs(600)), now()).unwrap());
        let item = store.get(&id).unwrap().unwrap();
        assert_eq!(item.attempts, 1);
        assert_eq!(item.cooldown_until, Some(now() + chrono::Duration::minutes(10)));
    }

    #[test]
    fn test_claim_respects_approval_cooldown_and_priority() {
        let store = store();
        let critical = created_id(store.upsert_issue(&issue("db down", Severity::Critical), now()).unwrap());
        let medium = created_id(store.upsert_issue(&issue("slow", Severity::Medium), now()).unwrap());
        let low = created_id(store.upsert_issue(&issue("typo", Severity::Low), now()).unwrap());

        // Push `low` into cooldown and back to NEW through a reopen.
        store.advance(&low, Dispatched, None, now()).unwrap();
        store.advance(&low, Failed, Some(Duration::from_secs(3600)), now()).unwrap();
        store.upsert_issue(&issue("typo", Severity::Low), now()).unwrap();

        let claimed = store.claim_for_dispatch(10, now()).unwrap();
        let ids: Vec<_> = claimed.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec![medium.clone()]);

        store.approve(&critical, now()).unwrap();
        let later = now() + chrono::Duration::hours(2);
        let claimed = store.claim_for_dispatch(10, later).unwrap();
        let ids: Vec<_> = claimed.iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec![critical, low]);
        assert!(claimed.iter().all(|i| i.status == Dispatched));
    }

    #[test]
    fn test_concurrent_claims_never_overlap() {
        let store = store();
        for n in 0..20 {
            store
                .upsert_issue(&issue(&format!("issue {n}"), Severity::Medium), now())
                .unwrap();
        }
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut ids = Vec::new();
                    for _ in 0..20 {
                        for item in store.claim_for_dispatch(3, now()).unwrap() {
                            ids.push(item.id);
                        }
                    }
                    ids
                })
            })
            .collect();
        let all: Vec<String> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(all.len(), 20);
        assert_eq!(unique.len(), 20);
    }

    #[test]
    fn test_query_filters_and_counts() {
        let store = store();
        store.upsert_issue(&issue("a", Severity::High), now()).unwrap();
        store.upsert_issue(&issue("b", Severity::Medium), now()).unwrap();
        let c = created_id(store.upsert_issue(&issue("c", Severity::Medium), now()).unwrap());
        store.advance(&c, Suppressed, None, now()).unwrap();

        let page = store
            .query(&WorkItemQuery {
                status: Some(New),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].severity, Severity::High);
        assert_eq!(page.by_status.get("NEW"), Some(&2));
        assert_eq!(page.by_status.get("SUPPRESSED"), Some(&1));
        assert_eq!(page.by_severity.get("MEDIUM"), Some(&2));

        let page = store
            .query(&WorkItemQuery {
                severity: Some(Severity::Medium),
                limit: 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.items.len(), 1);
    }

    #[test]
    fn test_assign() {
        let store = store();
        let id = created_id(store.upsert_issue(&issue("a", Severity::Low), now()).unwrap());
        assert!(store.assign(&id, "oncall", now()).unwrap());
        let item = store.get(&id).unwrap().unwrap();
        assert_eq!(item.assigned_to.as_deref(), Some("oncall"));
        assert_eq!(item.assigned_at, Some(now()));
        assert!(!store.assign("missing", "oncall", now()).unwrap());
    }
}
