//! Work-item lifecycle states and the transitions allowed between them.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkStatus {
    /// Created or reopened, waiting for dispatch.
    New,
    Dispatched,
    InProgress,
    PrOpened,
    Verified,
    Merged,
    Deployed,
    Blocked,
    Failed,
    /// Terminal.
    Suppressed,
}

impl WorkStatus {
    pub const ALL: [WorkStatus; 10] = [
        WorkStatus::New,
        WorkStatus::Dispatched,
        WorkStatus::InProgress,
        WorkStatus::PrOpened,
        WorkStatus::Verified,
        WorkStatus::Merged,
        WorkStatus::Deployed,
        WorkStatus::Blocked,
        WorkStatus::Failed,
        WorkStatus::Suppressed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::New => "NEW",
            WorkStatus::Dispatched => "DISPATCHED",
            WorkStatus::InProgress => "IN_PROGRESS",
            WorkStatus::PrOpened => "PR_OPENED",
            WorkStatus::Verified => "VERIFIED",
            WorkStatus::Merged => "MERGED",
            WorkStatus::Deployed => "DEPLOYED",
            WorkStatus::Blocked => "BLOCKED",
            WorkStatus::Failed => "FAILED",
            WorkStatus::Suppressed => "SUPPRESSED",
        }
    }

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: WorkStatus) -> bool {
        use WorkStatus::*;
        matches!(
            (self, to),
            (New, Dispatched)
                | (New, Suppressed)
                | (Dispatched, InProgress)
                | (Dispatched, Failed)
                | (Dispatched, Blocked)
                | (InProgress, PrOpened)
                | (InProgress, Failed)
                | (InProgress, Blocked)
                | (PrOpened, Verified)
                | (PrOpened, Failed)
                | (PrOpened, Blocked)
                | (Verified, Merged)
                | (Verified, Failed)
                | (Verified, Blocked)
                | (Merged, Deployed)
                | (Merged, Failed)
                | (Deployed, Suppressed)
                | (Blocked, Dispatched)
                | (Blocked, Failed)
                | (Blocked, Suppressed)
                | (Failed, Dispatched)
                | (Failed, Suppressed)
        )
    }

    /// States reachable in one step.
    pub fn next_states(self) -> Vec<WorkStatus> {
        Self::ALL
            .into_iter()
            .filter(|to| self.can_transition_to(*to))
            .collect()
    }

    pub fn is_terminal(self) -> bool {
        self.next_states().is_empty()
    }

    /// Being worked on or already resolved: a repeat issue leaves these alone.
    /// `DISPATCHED` counts as being worked on.
    pub fn blocks_reopen(self) -> bool {
        matches!(
            self,
            WorkStatus::Dispatched
                | WorkStatus::InProgress
                | WorkStatus::PrOpened
                | WorkStatus::Verified
                | WorkStatus::Merged
                | WorkStatus::Deployed
        )
    }
}

impl std::fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == upper)
            .ok_or_else(|| format!("unknown work status '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkStatus::*;

    #[test]
    fn test_happy_path_is_legal() {
        let path = [New, Dispatched, InProgress, PrOpened, Verified, Merged, Deployed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_skips_are_illegal() {
        assert!(!New.can_transition_to(Merged));
        assert!(!New.can_transition_to(InProgress));
        assert!(!Deployed.can_transition_to(New));
        assert!(!Merged.can_transition_to(Blocked));
    }

    #[test]
    fn test_suppressed_is_the_only_terminal() {
        let terminal: Vec<_> = WorkStatus::ALL.into_iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(terminal, vec![Suppressed]);
    }

    #[test]
    fn test_transition_table_size() {
        let edges: usize = WorkStatus::ALL.iter().map(|s| s.next_states().len()).sum();
        assert_eq!(edges, 22);
    }

    #[test]
    fn test_parse_and_serde() {
        assert_eq!("pr_opened".parse::<WorkStatus>().unwrap(), PrOpened);
        assert!("DONE".parse::<WorkStatus>().is_err());
        assert_eq!(serde_json::to_string(&InProgress).unwrap(), "\"IN_PROGRESS\"");
    }

    #[test]
    fn test_reopen_blockers() {
        for s in [New, Failed, Blocked, Suppressed] {
            assert!(!s.blocks_reopen());
        }
        for s in [Dispatched, InProgress, PrOpened, Verified, Merged, Deployed] {
            assert!(s.blocks_reopen());
        }
    }
}
