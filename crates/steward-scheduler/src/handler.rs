//! Job handlers and the registry that resolves them by name.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use steward_core::{Result, Severity, StewardError};

use crate::jobs::Job;

/// What a handler receives for one run.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_name: String,
    /// Run row this invocation reports into.
    pub run_id: i64,
    pub config: serde_json::Value,
    /// Tick time the run was started for.
    pub now: DateTime<Utc>,
}

/// What a handler reports back. The scheduler derives the run status from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerReport {
    pub success: bool,
    pub details: String,
    pub issues_found: u32,
    pub fixes_applied: u32,
    pub severity: Option<Severity>,
    pub verification_passed: bool,
}

impl HandlerReport {
    /// A clean run: nothing found, nothing to verify.
    pub fn ok(details: impl Into<String>) -> Self {
        Self {
            success: true,
            details: details.into(),
            verification_passed: true,
            ..Default::default()
        }
    }

    /// The handler ran but its check failed.
    pub fn failed(details: impl Into<String>) -> Self {
        Self {
            success: false,
            details: details.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Store(#[from] StewardError),
}

/// One unit of scheduled work.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Name jobs use to reference this handler.
    fn name(&self) -> &str;

    /// Reject a bad job config before anything is scheduled.
    fn validate_config(&self, _config: &serde_json::Value) -> Result<()> {
        Ok(())
    }

    async fn run(&self, ctx: JobContext) -> std::result::Result<HandlerReport, HandlerError>;
}

/// Registry of available handlers.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Names are unique.
    pub fn register(&mut self, handler: Arc<dyn JobHandler>) -> Result<()> {
        let name = handler.name().to_string();
        if self.handlers.contains_key(&name) {
            return Err(StewardError::DuplicateHandler(name));
        }
        tracing::debug!("🧩 Registered handler: {}", name);
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Every job must name a registered handler and carry a config it accepts.
    pub fn validate_jobs(&self, jobs: &[Job]) -> Result<()> {
        for job in jobs {
            let handler = self
                .handlers
                .get(&job.handler)
                .ok_or_else(|| StewardError::UnknownHandler {
                    job: job.name.clone(),
                    handler: job.handler.clone(),
                })?;
            handler
                .validate_config(&job.config)
                .map_err(|e| StewardError::InvalidJob {
                    job: job.name.clone(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }
}
