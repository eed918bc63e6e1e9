use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Environment variables that override secrets from the config file.
pub mod env_overrides {
    pub const PROVIDER_API_KEY: &str = "MEETBOT_PROVIDER_API_KEY";
    pub const WEBHOOK_SECRET: &str = "MEETBOT_WEBHOOK_SECRET";
    pub const WEBHOOK_SIGNING_SECRET: &str = "MEETBOT_WEBHOOK_SIGNING_SECRET";
    pub const CRON_SECRET: &str = "MEETBOT_CRON_SECRET";
    pub const ADMIN_TOKEN: &str = "MEETBOT_ADMIN_TOKEN";
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub webhook: WebhookConfig,
    pub reconcile: ReconcileConfig,
    pub billing: BillingConfig,
    pub summary: SummaryConfig,
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3838,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the bot provider REST API, e.g. `https://us-west-2.recall.ai/api/v1`
    pub base_url: String,
    pub api_key: Option<String>,
    /// Upper bound for any single provider call
    pub request_timeout_seconds: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://us-west-2.recall.ai/api/v1".to_string(),
            api_key: None,
            request_timeout_seconds: 10,
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds.max(1))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Shared secret expected in the `x-webhook-secret` header
    pub secret: Option<String>,
    /// HMAC-SHA256 key for the `x-webhook-signature` header
    pub signing_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub staleness_seconds: u64,
    /// Maximum bots reconciled concurrently within one sweep
    pub concurrency: usize,
    pub lease_ttl_seconds: u64,
    /// Shared secret for the scheduled entry point (`x-cron-secret` or bearer)
    pub cron_secret: Option<String>,
    /// How long after completion a bot without recordings keeps being retried
    pub recording_retry_window_hours: u64,
    /// Maximum rows examined per sweep step
    pub batch_limit: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            staleness_seconds: 300,
            concurrency: 4,
            lease_ttl_seconds: 600,
            cron_secret: None,
            recording_retry_window_hours: 24,
            batch_limit: 100,
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds.max(1))
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.staleness_seconds as i64)
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_ttl_seconds.max(1) as i64)
    }

    pub fn recording_retry_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.recording_retry_window_hours as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Price of one billable minute in minor currency units (cents)
    pub rate_per_minute: i64,
    pub currency: String,
    /// Allowed gap between per-minute usage and finalized minutes before it is reported
    pub tolerance_minutes: i64,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            rate_per_minute: 2,
            currency: "usd".to_string(),
            tolerance_minutes: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// HTTP endpoint of the summary service. Takes precedence over `command`.
    pub endpoint: Option<String>,
    /// Shell command run with the session context on stdin
    pub command: String,
    pub timeout_seconds: u64,
    /// Where the client is sent after ending a session. `{id}` is replaced.
    pub redirect_template: String,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            command: String::new(),
            timeout_seconds: 120,
            redirect_template: "/sessions/{id}/report".to_string(),
        }
    }
}

impl SummaryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.max(1))
    }

    pub fn redirect_for(&self, session_id: &str) -> String {
        self.redirect_template.replace("{id}", session_id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer token for the admin endpoints. Unset leaves them open.
    pub token: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        let mut config = if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save()?;
            config
        } else {
            let content =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: Self = toml::from_str(&content).context("Failed to parse config file")?;
            info!("Loaded config from {:?}", config_path);
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Secrets from the environment win over the file so they never need to be written to disk.
    pub fn apply_env_overrides(&mut self) {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        if let Some(v) = read(env_overrides::PROVIDER_API_KEY) {
            self.provider.api_key = Some(v);
        }
        if let Some(v) = read(env_overrides::WEBHOOK_SECRET) {
            self.webhook.secret = Some(v);
        }
        if let Some(v) = read(env_overrides::WEBHOOK_SIGNING_SECRET) {
            self.webhook.signing_secret = Some(v);
        }
        if let Some(v) = read(env_overrides::CRON_SECRET) {
            self.reconcile.cron_secret = Some(v);
        }
        if let Some(v) = read(env_overrides::ADMIN_TOKEN) {
            self.admin.token = Some(v);
        }
    }

    fn config_path() -> Result<PathBuf> {
        global::config_file()
    }
}
