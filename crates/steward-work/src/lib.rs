//! # Steward Work
//!
//! Turns detected issues into tracked work items and walks them through a
//! strict lifecycle:
//!
//! ```text
//! NEW → DISPATCHED → IN_PROGRESS → PR_OPENED → VERIFIED → MERGED → DEPLOYED
//!   ↘ SUPPRESSED      ↘ FAILED / BLOCKED (retry via DISPATCHED)
//! ```
//!
//! Repeated issues are collapsed by fingerprint; INFO issues are dropped.

pub mod fingerprint;
pub mod item;
pub mod status;
pub mod store;

pub use fingerprint::fingerprint;
pub use item::{
    GenerateOutcome, GenerateSummary, NewIssue, WorkItem, WorkItemPage, WorkItemQuery,
    priority_score,
};
pub use status::WorkStatus;
pub use store::WorkItemStore;
