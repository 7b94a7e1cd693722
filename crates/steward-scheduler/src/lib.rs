//! # Steward Scheduler
//!
//! Tick-driven job orchestrator. Every tick is idempotent and safe to fire
//! from more than one trigger: the tick lock lets exactly one runner through.
//!
//! ## Architecture
//! ```text
//! tick(now)
//!   ├── LockManager::try_lock("tick-lock")  → held elsewhere? no-op
//!   ├── for each job: due? (next_run_at, cron matcher) → cooldown?
//!   │     └── spawn handler ── race ── timeout_ms
//!   │           → SUCCESS | DEGRADED | FAIL | TIMEOUT
//!   ├── finalize Run, update Job (streak, next_run_at)
//!   ├── FAIL/TIMEOUT on high priority → Alerter
//!   │                                     ├── Telegram (sendMessage)
//!   │                                     ├── Discord (webhook)
//!   │                                     └── Webhook (HTTP POST)
//!   └── guard drop → lock released
//! ```

pub mod cron;
pub mod dispatch;
pub mod engine;
pub mod handler;
pub mod jobs;
pub mod lock;
pub mod notify;
pub mod persistence;

pub use dispatch::{DispatchAlerter, NotifyTarget, targets_from_config};
pub use engine::{JobOutcome, Scheduler, TickReport};
pub use handler::{HandlerError, HandlerRegistry, HandlerReport, JobContext, JobHandler};
pub use jobs::{Job, JobDefinition, JobsFile, Run, RunStatus, Schedule};
pub use lock::{LockGuard, LockManager};
pub use notify::{Alerter, Notification, NotifyPriority};
pub use persistence::{RunCompletion, SchedulerDb};
