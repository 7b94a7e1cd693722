//! Alert model: what the scheduler raises when a high-priority job fails.
//! No queues. Build a notification, hand it to an `Alerter`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use steward_core::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub priority: NotifyPriority,
    /// Job or component that raised it.
    pub source: String,
    pub raised_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        title: impl Into<String>,
        body: impl Into<String>,
        source: &str,
        priority: NotifyPriority,
        raised_at: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            priority,
            source: source.to_string(),
            raised_at,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotifyPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl NotifyPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyPriority::Low => "low",
            NotifyPriority::Normal => "normal",
            NotifyPriority::High => "high",
            NotifyPriority::Urgent => "urgent",
        }
    }
}

/// External channel used for escalation.
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn alert(&self, notification: &Notification) -> Result<()>;
}
