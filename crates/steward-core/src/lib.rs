//! # Steward Core
//!
//! Pieces shared by every Steward crate:
//! - `config` — `~/.steward/config.toml`, defaults and env overrides
//! - `error` — the `StewardError` taxonomy and `Result` alias
//! - `db` — the single SQLite handle injected into scheduler, work store and proof engine
//! - `types` — severity and category enums used across the pipeline

pub mod config;
pub mod db;
pub mod error;
pub mod types;

pub use config::StewardConfig;
pub use db::Database;
pub use error::{Result, StewardError};
pub use types::{Category, Severity};
