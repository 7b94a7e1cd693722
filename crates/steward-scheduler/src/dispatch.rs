//! Delivery of escalations to Telegram, Discord or a generic HTTP webhook.

use async_trait::async_trait;

use steward_core::config::AlertConfig;
use steward_core::{Result, StewardError};

use crate::notify::{Alerter, Notification, NotifyPriority};
use crate::persistence::SchedulerDb;

const SEND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Where an alert goes.
#[derive(Debug, Clone)]
pub enum NotifyTarget {
    /// Telegram Bot API, via `sendMessage`.
    Telegram { bot_token: String, chat_id: String },
    Discord { webhook_url: String },
    /// Generic HTTP webhook, POSTed as JSON.
    Webhook {
        url: String,
        headers: Vec<(String, String)>,
    },
}

impl NotifyTarget {
    fn channel(&self) -> &'static str {
        match self {
            NotifyTarget::Telegram { .. } => "telegram",
            NotifyTarget::Discord { .. } => "discord",
            NotifyTarget::Webhook { .. } => "webhook",
        }
    }

    /// Endpoint and JSON body for this channel's API.
    fn request(&self, n: &Notification) -> (String, serde_json::Value) {
        let footer = format!("{} at {}", n.source, n.raised_at.format("%H:%M:%S UTC"));
        match self {
            NotifyTarget::Telegram { bot_token, chat_id } => {
                let badge = match n.priority {
                    NotifyPriority::Urgent => "🚨",
                    NotifyPriority::High => "⚠️",
                    NotifyPriority::Normal => "📢",
                    NotifyPriority::Low => "ℹ️",
                };
                let text = format!(
                    "{badge} *{}*\n\n{}\n\n_{}_",
                    escape_markdown(&n.title),
                    escape_markdown(&n.body),
                    escape_markdown(&footer),
                );
                (
                    format!("https://api.telegram.org/bot{bot_token}/sendMessage"),
                    serde_json::json!({ "chat_id": chat_id, "text": text, "parse_mode": "Markdown" }),
                )
            }
            NotifyTarget::Discord { webhook_url } => {
                let color = match n.priority {
                    NotifyPriority::Urgent => 0xE01E1E,
                    NotifyPriority::High => 0xF08C00,
                    NotifyPriority::Normal => 0x1E90E0,
                    NotifyPriority::Low => 0x909090,
                };
                (
                    webhook_url.clone(),
                    serde_json::json!({
                        "embeds": [{
                            "title": n.title,
                            "description": n.body,
                            "color": color,
                            "footer": { "text": footer },
                        }]
                    }),
                )
            }
            NotifyTarget::Webhook { url, .. } => (url.clone(), serde_json::to_value(n).unwrap_or_default()),
        }
    }
}

/// Send one notification to one target.
pub async fn dispatch(
    client: &reqwest::Client,
    notification: &Notification,
    target: &NotifyTarget,
) -> std::result::Result<(), String> {
    let channel = target.channel();
    let (url, body) = target.request(notification);
    let mut req = client.post(&url).json(&body).timeout(SEND_TIMEOUT);
    if let NotifyTarget::Webhook { headers, .. } = target {
        for (key, value) in headers {
            req = req.header(key.as_str(), value.as_str());
        }
    }

    let resp = req
        .send()
        .await
        .map_err(|e| format!("{channel} unreachable: {e}"))?;
    let status = resp.status();
    if !status.is_success() {
        let detail = resp.text().await.unwrap_or_default();
        return Err(format!("{channel} rejected alert ({status}): {detail}"));
    }
    tracing::info!("✅ {} alert sent: {}", channel, notification.title);
    Ok(())
}

/// Escape Telegram MarkdownV1 special characters.
fn escape_markdown(s: &str) -> String {
    s.replace('_', "\\_")
        .replace('*', "\\*")
        .replace('[', "\\[")
        .replace('`', "\\`")
}

/// Build targets from the alert config. Disabled channels are skipped;
/// credentials were checked by `StewardConfig::validate`.
pub fn targets_from_config(config: &AlertConfig) -> Vec<(String, NotifyTarget)> {
    let mut targets = Vec::new();

    if let Some(tg) = &config.telegram
        && tg.enabled
    {
        targets.push((
            "telegram".to_string(),
            NotifyTarget::Telegram {
                bot_token: tg.bot_token.clone(),
                chat_id: tg.chat_id.clone(),
            },
        ));
    }

    if let Some(dc) = &config.discord
        && dc.enabled
    {
        targets.push((
            "discord".to_string(),
            NotifyTarget::Discord {
                webhook_url: dc.webhook_url.clone(),
            },
        ));
    }

    if let Some(wh) = &config.webhook
        && wh.enabled
    {
        targets.push((
            "webhook".to_string(),
            NotifyTarget::Webhook {
                url: wh.url.clone(),
                headers: wh.headers.clone(),
            },
        ));
    }

    targets
}

/// Fans an alert out to every target and records each attempt in the store.
pub struct DispatchAlerter {
    client: reqwest::Client,
    targets: Vec<(String, NotifyTarget)>,
    db: Option<SchedulerDb>,
}

impl DispatchAlerter {
    pub fn new(targets: Vec<(String, NotifyTarget)>) -> Self {
        Self {
            client: reqwest::Client::new(),
            targets,
            db: None,
        }
    }

    /// Persist every alert attempt in the `alerts` table.
    pub fn with_store(mut self, db: SchedulerDb) -> Self {
        self.db = Some(db);
        self
    }

    pub fn target_names(&self) -> Vec<&str> {
        self.targets.iter().map(|(name, _)| name.as_str()).collect()
    }

    fn persist(&self, notification: &Notification, channel: Option<&str>, delivered: bool) {
        if let Some(db) = &self.db
            && let Err(e) = db.save_alert(notification, channel, delivered)
        {
            tracing::warn!("⚠️ Failed to record alert: {e}");
        }
    }
}

#[async_trait]
impl Alerter for DispatchAlerter {
    async fn alert(&self, notification: &Notification) -> Result<()> {
        if self.targets.is_empty() {
            tracing::warn!(
                "🚨 [{}] {}: {} (no alert channel configured)",
                notification.source,
                notification.title,
                notification.body
            );
            self.persist(notification, None, false);
            return Ok(());
        }

        let sends = self.targets.iter().map(|(name, target)| async move {
            (name.as_str(), dispatch(&self.client, notification, target).await)
        });
        let results = futures::future::join_all(sends).await;

        let mut errors = Vec::new();
        for (name, result) in results {
            match result {
                Ok(()) => self.persist(notification, Some(name), true),
                Err(e) => {
                    tracing::warn!("⚠️ Alert via {} failed: {}", name, e);
                    self.persist(notification, Some(name), false);
                    errors.push(format!("{name}: {e}"));
                }
            }
        }

        if errors.len() == self.targets.len() {
            Err(StewardError::Alert(errors.join("; ")))
        } else {
            Ok(())
        }
    }
}
