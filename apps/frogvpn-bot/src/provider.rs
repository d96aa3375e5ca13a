//! VPN provisioning backend.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::info;

use crate::api_client::ApiClient;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("provisioning backend unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected provisioning response: {0}")]
    InvalidResponse(String),
}

impl From<anyhow::Error> for ProvisionError {
    fn from(err: anyhow::Error) -> Self {
        ProvisionError::Unavailable(format!("{:#}", err))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpnUser {
    pub username: String,
    /// Bytes.
    pub used_traffic: u64,
    pub data_limit: u64,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub rx_mbps: f64,
    pub tx_mbps: f64,
    pub total_users: u64,
    pub active_users: u64,
}

#[async_trait]
pub trait VpnProvider: Send + Sync {
    /// Creates an account and returns its connection link.
    async fn create_user(
        &self,
        username: &str,
        tag: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, ProvisionError>;

    async fn list_users(&self) -> Result<Vec<VpnUser>, ProvisionError>;

    async fn system_stats(&self) -> Result<SystemStats, ProvisionError>;
}

pub struct MarzbanProvider {
    api: ApiClient,
}

impl MarzbanProvider {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[derive(Deserialize)]
struct MarzbanUser {
    username: String,
    #[serde(default)]
    used_traffic: u64,
    #[serde(default)]
    data_limit: Option<u64>,
    status: String,
    #[serde(default)]
    expire: Option<i64>,
    #[serde(default)]
    links: Vec<String>,
    #[serde(default)]
    subscription_url: Option<String>,
}

#[derive(Deserialize)]
struct MarzbanUsers {
    users: Vec<MarzbanUser>,
}

#[derive(Deserialize)]
struct MarzbanSystem {
    mem_total: u64,
    mem_used: u64,
    cpu_usage: f64,
    total_user: u64,
    users_active: u64,
    #[serde(default)]
    incoming_bandwidth_speed: u64,
    #[serde(default)]
    outgoing_bandwidth_speed: u64,
}

fn bytes_per_sec_to_mbps(bytes: u64) -> f64 {
    bytes as f64 * 8.0 / 1_000_000.0
}

#[async_trait]
impl VpnProvider for MarzbanProvider {
    async fn create_user(
        &self,
        username: &str,
        tag: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String, ProvisionError> {
        let body = json!({
            "username": username,
            "proxies": { "vless": {} },
            "inbounds": { "vless": [tag] },
            "expire": expires_at.timestamp(),
            "data_limit": 0,
            "status": "active",
        });
        let user: MarzbanUser = self.api.post("/api/user", &body).await?;
        info!("Provisioned {} on inbound {}", user.username, tag);
        user.links
            .into_iter()
            .next()
            .or(user.subscription_url)
            .ok_or_else(|| ProvisionError::InvalidResponse(format!("no link for {}", username)))
    }

    async fn list_users(&self) -> Result<Vec<VpnUser>, ProvisionError> {
        let resp: MarzbanUsers = self.api.get("/api/users").await?;
        Ok(resp
            .users
            .into_iter()
            .map(|u| VpnUser {
                is_active: u.status == "active",
                username: u.username,
                used_traffic: u.used_traffic,
                data_limit: u.data_limit.unwrap_or(0),
                expires_at: u.expire.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            })
            .collect())
    }

    async fn system_stats(&self) -> Result<SystemStats, ProvisionError> {
        let sys: MarzbanSystem = self.api.get("/api/system").await?;
        let memory_percent = if sys.mem_total > 0 {
            sys.mem_used as f64 / sys.mem_total as f64 * 100.0
        } else {
            0.0
        };
        Ok(SystemStats {
            cpu_percent: sys.cpu_usage,
            memory_percent,
            rx_mbps: bytes_per_sec_to_mbps(sys.incoming_bandwidth_speed),
            tx_mbps: bytes_per_sec_to_mbps(sys.outgoing_bandwidth_speed),
            total_users: sys.total_user,
            active_users: sys.users_active,
        })
    }
}

const GB: u64 = 1024 * 1024 * 1024;

/// Local stand-in for the backend: fabricated links and canned load figures.
pub struct MockVpnProvider {
    stats: Mutex<SystemStats>,
    users: Mutex<Vec<VpnUser>>,
    created: Mutex<Vec<(String, String)>>,
    fail_provisioning: AtomicBool,
    fail_stats: AtomicBool,
    stats_calls: AtomicUsize,
}

impl Default for MockVpnProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVpnProvider {
    pub fn new() -> Self {
        let users = [
            ("tg_111_1", 150, true),
            ("tg_222_1", 80, true),
            ("tg_333_1", 45, true),
            ("tg_444_1", 20, true),
            ("tg_555_1", 10, false),
        ]
        .into_iter()
        .map(|(name, gb, active)| VpnUser {
            username: name.to_string(),
            used_traffic: gb * GB,
            data_limit: 0,
            is_active: active,
            expires_at: None,
        })
        .collect();

        Self {
            stats: Mutex::new(SystemStats {
                cpu_percent: 12.0,
                memory_percent: 35.0,
                rx_mbps: 40.0,
                tx_mbps: 38.0,
                total_users: 5,
                active_users: 4,
            }),
            users: Mutex::new(users),
            created: Mutex::new(Vec::new()),
            fail_provisioning: AtomicBool::new(false),
            fail_stats: AtomicBool::new(false),
            stats_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_stats(&self, stats: SystemStats) {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner()) = stats;
    }

    pub fn set_fail_provisioning(&self, fail: bool) {
        self.fail_provisioning.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_stats(&self, fail: bool) {
        self.fail_stats.store(fail, Ordering::SeqCst);
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    /// `(username, tag)` of every account created so far.
    pub fn created(&self) -> Vec<(String, String)> {
        self.created.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl VpnProvider for MockVpnProvider {
    async fn create_user(
        &self,
        username: &str,
        tag: &str,
        _expires_at: DateTime<Utc>,
    ) -> Result<String, ProvisionError> {
        if self.fail_provisioning.load(Ordering::SeqCst) {
            return Err(ProvisionError::Unavailable("mock provisioning disabled".into()));
        }
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((username.to_string(), tag.to_string()));
        Ok(format!(
            "vless://{}@mock.frogvpn.local:443?security=reality&type=tcp#{}",
            username, tag
        ))
    }

    async fn list_users(&self) -> Result<Vec<VpnUser>, ProvisionError> {
        Ok(self.users.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn system_stats(&self) -> Result<SystemStats, ProvisionError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stats.load(Ordering::SeqCst) {
            return Err(ProvisionError::Unavailable("mock stats disabled".into()));
        }
        Ok(*self.stats.lock().unwrap_or_else(|e| e.into_inner()))
    }
}
