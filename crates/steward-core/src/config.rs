//! Steward configuration system.
//!
//! Every duration is in milliseconds (`*_ms`) except the proof window, which is in hours.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, StewardError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StewardConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
    #[serde(default)]
    pub proof: ProofConfig,
    #[serde(default)]
    pub heal: HealConfig,
}

fn default_database_path() -> String { "~/.steward/steward.db".into() }

impl Default for StewardConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            scheduler: SchedulerConfig::default(),
            alerts: AlertConfig::default(),
            proof: ProofConfig::default(),
            heal: HealConfig::default(),
        }
    }
}

impl StewardConfig {
    /// Load config from the default path (~/.steward/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StewardError::Config(format!("Failed to read config {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| StewardError::Config(format!("Failed to parse config: {e}")))
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Steward home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".steward")
    }

    /// Fill credentials from the environment. Env values win over the file.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    fn apply_env_from(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(token) = get("STEWARD_TELEGRAM_BOT_TOKEN") {
            let tg = self.alerts.telegram.get_or_insert_with(TelegramAlertConfig::default);
            tg.bot_token = token;
        }
        if let Some(chat_id) = get("STEWARD_TELEGRAM_CHAT_ID") {
            let tg = self.alerts.telegram.get_or_insert_with(TelegramAlertConfig::default);
            tg.chat_id = chat_id;
        }
        if let Some(url) = get("STEWARD_DISCORD_WEBHOOK_URL") {
            let dc = self.alerts.discord.get_or_insert_with(DiscordAlertConfig::default);
            dc.webhook_url = url;
        }
        if let Some(url) = get("STEWARD_ALERT_WEBHOOK_URL") {
            let wh = self.alerts.webhook.get_or_insert_with(WebhookAlertConfig::default);
            wh.url = url;
        }
    }

    /// Reject configurations that cannot run. Called before any scheduling begins.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.lock_key.trim().is_empty() {
            return Err(StewardError::Config("scheduler.lock_key must not be empty".into()));
        }
        if self.scheduler.lock_ttl_ms == 0 {
            return Err(StewardError::Config("scheduler.lock_ttl_ms must be > 0".into()));
        }
        if self.scheduler.tick_interval_ms == 0 {
            return Err(StewardError::Config("scheduler.tick_interval_ms must be > 0".into()));
        }
        if self.scheduler.cron_fallback_interval_ms == 0 {
            return Err(StewardError::Config(
                "scheduler.cron_fallback_interval_ms must be > 0".into(),
            ));
        }
        if !(1..=MAX_PROOF_WINDOW_HOURS).contains(&self.proof.window_hours) {
            return Err(StewardError::Config(format!(
                "proof.window_hours must be between 1 and {MAX_PROOF_WINDOW_HOURS}"
            )));
        }
        if self.heal.mode == HealMode::Execute
            && self.heal.executor_url.as_deref().is_none_or(str::is_empty)
        {
            return Err(StewardError::Config(
                "heal.mode = \"execute\" requires heal.executor_url".into(),
            ));
        }
        if let Some(tg) = &self.alerts.telegram
            && tg.enabled
            && (tg.bot_token.is_empty() || tg.chat_id.is_empty())
        {
            return Err(StewardError::Config(
                "alerts.telegram is enabled but bot_token or chat_id is missing (set STEWARD_TELEGRAM_BOT_TOKEN / STEWARD_TELEGRAM_CHAT_ID)".into(),
            ));
        }
        if let Some(dc) = &self.alerts.discord
            && dc.enabled
            && dc.webhook_url.is_empty()
        {
            return Err(StewardError::Config(
                "alerts.discord is enabled but webhook_url is missing (set STEWARD_DISCORD_WEBHOOK_URL)".into(),
            ));
        }
        if let Some(wh) = &self.alerts.webhook
            && wh.enabled
            && wh.url.is_empty()
        {
            return Err(StewardError::Config(
                "alerts.webhook is enabled but url is missing (set STEWARD_ALERT_WEBHOOK_URL)".into(),
            ));
        }
        Ok(())
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        expand_path(&self.database_path)
    }
}

/// Expand `~` and env vars in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

/// Scheduler / tick configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_lock_key")]
    pub lock_key: String,
    /// Must exceed the worst-case tick duration.
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,
    /// Only used by `steward run`; external triggers call `steward tick`.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Jobs with priority strictly above this alert on failure.
    #[serde(default = "default_alert_priority_threshold")]
    pub alert_priority_threshold: u8,
    /// Runs of this job carry the heartbeat flag.
    #[serde(default = "default_heartbeat_job")]
    pub heartbeat_job: String,
    #[serde(default = "default_cron_fallback_interval_ms")]
    pub cron_fallback_interval_ms: u64,
    /// Job seed file. Built-in jobs are used when absent.
    #[serde(default)]
    pub jobs_path: Option<String>,
}

fn default_lock_key() -> String { "tick-lock".into() }
fn default_lock_ttl_ms() -> u64 { 10 * 60 * 1000 }
fn default_tick_interval_ms() -> u64 { 60_000 }
fn default_alert_priority_threshold() -> u8 { 7 }
fn default_heartbeat_job() -> String { "heartbeat".into() }
fn default_cron_fallback_interval_ms() -> u64 { 60_000 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_key: default_lock_key(),
            lock_ttl_ms: default_lock_ttl_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            alert_priority_threshold: default_alert_priority_threshold(),
            heartbeat_job: default_heartbeat_job(),
            cron_fallback_interval_ms: default_cron_fallback_interval_ms(),
            jobs_path: None,
        }
    }
}

/// Alert channels for high-priority job failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub telegram: Option<TelegramAlertConfig>,
    #[serde(default)]
    pub discord: Option<DiscordAlertConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookAlertConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramAlertConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
}

impl Default for TelegramAlertConfig {
    fn default() -> Self {
        Self { enabled: true, bot_token: String::new(), chat_id: String::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordAlertConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub webhook_url: String,
}

impl Default for DiscordAlertConfig {
    fn default() -> Self {
        Self { enabled: true, webhook_url: String::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookAlertConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

impl Default for WebhookAlertConfig {
    fn default() -> Self {
        Self { enabled: true, url: String::new(), headers: Vec::new() }
    }
}

fn bool_true() -> bool { true }

/// Longest proof lookback: one leap year.
pub const MAX_PROOF_WINDOW_HOURS: u32 = 366 * 24;

/// Proof report configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofConfig {
    #[serde(default = "default_window_hours")]
    pub window_hours: u32,
    /// How many recent runs the artifact embeds.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

fn default_window_hours() -> u32 { 24 }
fn default_sample_size() -> usize { 20 }
fn default_output_dir() -> String { "~/.steward/proof".into() }

impl Default for ProofConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            sample_size: default_sample_size(),
            output_dir: default_output_dir(),
        }
    }
}

/// Remediation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealConfig {
    /// Operator playbook table. Built-in table when absent.
    #[serde(default)]
    pub playbooks_path: Option<String>,
    #[serde(default)]
    pub mode: HealMode,
    /// Endpoint that performs actions in `execute` mode.
    #[serde(default)]
    pub executor_url: Option<String>,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self { playbooks_path: None, mode: HealMode::Simulate, executor_url: None }
    }
}

/// Whether heal actions only log what they would do, or call out for real.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealMode {
    #[default]
    Simulate,
    Execute,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StewardConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.lock_key, "tick-lock");
        assert_eq!(config.scheduler.cron_fallback_interval_ms, 60_000);
        assert_eq!(config.heal.mode, HealMode::Simulate);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = StewardConfig::from_toml(
            r#"
database_path = "/tmp/s.db"

[scheduler]
alert_priority_threshold = 5

[heal]
mode = "execute"
"#,
        )
        .unwrap();
        assert_eq!(config.database_path, "/tmp/s.db");
        assert_eq!(config.scheduler.alert_priority_threshold, 5);
        assert_eq!(config.scheduler.lock_ttl_ms, 600_000);
        assert_eq!(config.heal.mode, HealMode::Execute);
        assert_eq!(config.proof.window_hours, 24);
    }

    #[test]
    fn test_enabled_channel_without_credentials_is_config_error() {
        let config = StewardConfig::from_toml(
            r#"
[alerts.telegram]
bot_token = "123:abc"
"#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(StewardError::Config(_))));
    }

    #[test]
    fn test_env_fills_credentials() {
        let mut config = StewardConfig::default();
        config.apply_env_from(|key| match key {
            "STEWARD_TELEGRAM_BOT_TOKEN" => Some("123:abc".into()),
            "STEWARD_TELEGRAM_CHAT_ID" => Some("42".into()),
            _ => None,
        });
        let tg = config.alerts.telegram.as_ref().unwrap();
        assert_eq!(tg.bot_token, "123:abc");
        assert_eq!(tg.chat_id, "42");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_execute_mode_needs_executor() {
        let mut config = StewardConfig::default();
        config.heal.mode = HealMode::Execute;
        assert!(matches!(config.validate(), Err(StewardError::Config(_))));
        config.heal.executor_url = Some("https://ops.internal/heal".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = StewardConfig::default();
        config.scheduler.lock_ttl_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_proof_window_bounds() {
        let mut config = StewardConfig::default();
        config.proof.window_hours = MAX_PROOF_WINDOW_HOURS;
        assert!(config.validate().is_ok());
        config.proof.window_hours = MAX_PROOF_WINDOW_HOURS + 1;
        assert!(matches!(config.validate(), Err(StewardError::Config(_))));
    }
}
