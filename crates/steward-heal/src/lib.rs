//! # Steward Heal
//!
//! Incident → matching playbooks → gated actions → verification.
//!
//! ```text
//! Incident {503, "/apps"}
//!   → PlaybookTable::matches   (all declared predicates, declaration order)
//!     → HealRunner::run
//!         ├── requires_approval? → stop, wait for a human
//!         ├── max_attempts / cooldown_ms → skip
//!         ├── ActionExecutor (simulated unless wired to real infra)
//!         └── verify(): poll Probe, retries + backoff
//! ```

pub mod playbook;
pub mod runner;
pub mod verify;

pub use playbook::{
    ActionType, CheckType, HealAction, Incident, MatchRule, Playbook, PlaybookTable, Safety,
    Verification,
};
pub use runner::{
    ActionExecutor, ActionOutcome, HealReport, HealRunner, SimulatedExecutor, StepReport,
    StepStatus,
};
pub use verify::{HttpProbe, Probe, ProbeResponse, VerifyResult, check_passes, verify};
