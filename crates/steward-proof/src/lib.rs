//! # Steward Proof
//!
//! Evidence that the scheduler is alive: uptime over all runs in a window and
//! gaps between consecutive heartbeat runs.

pub mod engine;
pub mod report;

pub use engine::ProofEngine;
pub use report::{
    Gap, ProofReport, RunSample, Summary, Verification, compute_report, validate_window, window_start,
};
