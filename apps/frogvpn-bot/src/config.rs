//! Bot configuration: a YAML file with a few environment overrides.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::broadcast::BroadcastSettings;
use crate::flash_sale::FlashSaleSettings;
use crate::watchdog::WatchdogSettings;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnv {
    /// In-memory store and mock provisioning.
    #[default]
    Local,
    Production,
}

impl AppEnv {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" | "dev" | "development" => Ok(AppEnv::Local),
            "production" | "prod" => Ok(AppEnv::Production),
            other => bail!("unknown APP_ENV '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub token: String,
    pub admin_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SupportConfig {
    /// Staff supergroup receiving forwarded tickets.
    pub group_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarzbanConfig {
    pub base_url: String,
    pub username: String,
    pub password: String,
}

impl Default for MarzbanConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            username: "admin".to_string(),
            password: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub interval_ms: u64,
    pub progress_every: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            interval_ms: 50,
            progress_every: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub cpu_threshold: f64,
    pub rx_threshold_mbps: f64,
    pub cooldown_secs: u64,
    pub top_k: usize,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            cpu_threshold: 85.0,
            rx_threshold_mbps: 400.0,
            cooldown_secs: 300,
            top_k: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlashSaleConfig {
    pub image_url: String,
    pub base_price: f64,
}

impl Default for FlashSaleConfig {
    fn default() -> Self {
        Self {
            image_url: "https://i.imgur.com/8Qj8X9L.png".to_string(),
            base_price: 450.0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub support: SupportConfig,
    pub marzban: MarzbanConfig,
    pub broadcast: BroadcastConfig,
    pub watchdog: WatchdogConfig,
    pub flash_sale: FlashSaleConfig,
    #[serde(skip)]
    pub env: AppEnv,
    #[serde(skip)]
    pub database_url: Option<String>,
}

impl Config {
    /// Reads `path` (when present), applies environment overrides and validates.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Self::from_yaml(&raw).with_context(|| format!("Invalid config {}", path.display()))?
        } else {
            tracing::warn!("{} not found, using defaults and environment", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Applies `BOT_TOKEN`, `ADMIN_IDS`, `DATABASE_URL` and `APP_ENV`.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(token) = var("BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.telegram.token = token.trim().to_string();
        }
        if let Some(ids) = var("ADMIN_IDS") {
            self.telegram.admin_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse().with_context(|| format!("Invalid admin id '{}'", s)))
                .collect::<Result<_>>()?;
        }
        if let Some(url) = var("DATABASE_URL").filter(|u| !u.is_empty()) {
            self.database_url = Some(url);
        }
        if let Some(env) = var("APP_ENV") {
            self.env = AppEnv::parse(&env)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.token.trim().is_empty() {
            bail!("telegram.token (or BOT_TOKEN) is not set");
        }
        if self.telegram.admin_ids.is_empty() {
            bail!("telegram.admin_ids must list at least one admin");
        }
        if self.env == AppEnv::Production && self.database_url.is_none() {
            bail!("DATABASE_URL is required when APP_ENV=production");
        }
        Ok(())
    }

    pub fn broadcast_settings(&self) -> BroadcastSettings {
        BroadcastSettings {
            interval: Duration::from_millis(self.broadcast.interval_ms),
            progress_every: self.broadcast.progress_every,
        }
    }

    pub fn watchdog_settings(&self) -> WatchdogSettings {
        WatchdogSettings {
            interval: Duration::from_secs(self.watchdog.interval_secs),
            cpu_threshold: self.watchdog.cpu_threshold,
            rx_threshold_mbps: self.watchdog.rx_threshold_mbps,
            cooldown: Duration::from_secs(self.watchdog.cooldown_secs),
            top_k: self.watchdog.top_k,
        }
    }

    pub fn flash_sale_settings(&self) -> FlashSaleSettings {
        FlashSaleSettings {
            image_url: self.flash_sale.image_url.clone(),
            base_price: self.flash_sale.base_price,
        }
    }
}
