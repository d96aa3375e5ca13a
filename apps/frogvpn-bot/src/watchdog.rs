//! Periodic load check of the VPN backend with alert cooldown.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::BotResult;
use crate::provider::{SystemStats, VpnProvider, VpnUser};
use crate::transport::{escape_html, OutgoingMessage, Transport};

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy)]
pub struct WatchdogSettings {
    pub interval: Duration,
    pub cpu_threshold: f64,
    pub rx_threshold_mbps: f64,
    pub cooldown: Duration,
    pub top_k: usize,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            cpu_threshold: 85.0,
            rx_threshold_mbps: 400.0,
            cooldown: Duration::from_secs(300),
            top_k: 3,
        }
    }
}

/// Highest-usage active accounts, heaviest first.
pub fn top_consumers(mut users: Vec<VpnUser>, k: usize) -> Vec<VpnUser> {
    users.retain(|u| u.is_active);
    users.sort_by(|a, b| b.used_traffic.cmp(&a.used_traffic));
    users.truncate(k);
    users
}

pub fn format_alert(stats: &SystemStats, top: &[VpnUser]) -> String {
    let cpu_marker = if stats.cpu_percent >= 90.0 {
        "🔴"
    } else if stats.cpu_percent >= 70.0 {
        "🟡"
    } else {
        "🟢"
    };
    let rx_marker = if stats.rx_mbps >= 300.0 { " 🚀" } else { "" };

    let mut text = format!(
        "☠️ <b>HIGH LOAD ALERT</b>\n\n\
         📉 <b>CPU:</b> {:.1}% {}\n\
         📶 <b>Network RX:</b> {:.0} Mbps{}\n\
         📤 <b>Network TX:</b> {:.0} Mbps\n\
         💾 <b>Memory:</b> {:.1}%\n\n\
         👥 <b>Active users:</b> {} / {}",
        stats.cpu_percent,
        cpu_marker,
        stats.rx_mbps,
        rx_marker,
        stats.tx_mbps,
        stats.memory_percent,
        stats.active_users,
        stats.total_users,
    );
    if !top.is_empty() {
        text.push_str("\n\n👮 <b>Top active users:</b>");
        for (i, user) in top.iter().enumerate() {
            text.push_str(&format!(
                "\n{}. 👤 <b>{}</b> — {:.1} GB",
                i + 1,
                escape_html(&user.username),
                user.used_traffic as f64 / GB
            ));
        }
    }
    text.push_str("\n\n<i>Check the panel now.</i>");
    text
}

struct Inner {
    provider: Arc<dyn VpnProvider>,
    transport: Arc<dyn Transport>,
    admins: Vec<i64>,
    settings: WatchdogSettings,
    last_alert: Mutex<Option<Instant>>,
}

impl Inner {
    fn breached(&self, stats: &SystemStats) -> bool {
        stats.cpu_percent >= self.settings.cpu_threshold
            || stats.rx_mbps >= self.settings.rx_threshold_mbps
    }

    /// Records an alert at `now` unless one fired within the cooldown.
    fn claim_alert(&self, now: Instant) -> bool {
        let mut last = self.last_alert.lock().unwrap_or_else(PoisonError::into_inner);
        match *last {
            Some(at) if now.duration_since(at) < self.settings.cooldown => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    async fn check(&self) -> BotResult<bool> {
        let stats = self.provider.system_stats().await?;
        if !self.breached(&stats) || !self.claim_alert(Instant::now()) {
            return Ok(false);
        }
        self.alert(&stats).await;
        info!(
            "Watchdog alert sent: CPU {:.1}%, RX {:.0} Mbps",
            stats.cpu_percent, stats.rx_mbps
        );
        Ok(true)
    }

    async fn alert(&self, stats: &SystemStats) {
        let top = match self.provider.list_users().await {
            Ok(users) => top_consumers(users, self.settings.top_k),
            Err(e) => {
                warn!("Watchdog could not list users: {}", e);
                Vec::new()
            }
        };
        let text = format_alert(stats, &top);
        for &admin in &self.admins {
            if let Err(e) = self
                .transport
                .send(admin, OutgoingMessage::text(text.clone()))
                .await
            {
                warn!("Watchdog alert to {} failed: {}", admin, e);
            }
        }
    }
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct Watchdog {
    inner: Arc<Inner>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl Watchdog {
    pub fn new(
        provider: Arc<dyn VpnProvider>,
        transport: Arc<dyn Transport>,
        admins: Vec<i64>,
        settings: WatchdogSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                transport,
                admins,
                settings,
                last_alert: Mutex::new(None),
            }),
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Starts the polling loop. Does nothing if it is already running.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        let token = CancellationToken::new();
        let inner = self.inner.clone();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            let period = inner.settings.interval.max(Duration::from_millis(1));
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = inner.check().await {
                            error!("Watchdog check failed: {}", e);
                        }
                    }
                }
            }
        });

        info!(
            "Watchdog started: every {:?}, CPU ≥ {}%, RX ≥ {} Mbps, cooldown {:?}",
            self.inner.settings.interval,
            self.inner.settings.cpu_threshold,
            self.inner.settings.rx_threshold_mbps,
            self.inner.settings.cooldown
        );
        *running = Some(Running { token, handle });
    }

    /// Stops the loop and waits until it has exited. Safe to call when stopped.
    pub async fn stop(&self) {
        let Some(Running { token, handle }) = self.running.lock().await.take() else {
            return;
        };
        token.cancel();
        if let Err(e) = handle.await {
            error!("Watchdog task ended abnormally: {}", e);
        }
        info!("Watchdog stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// One sample outside the loop. Returns whether an alert was sent.
    pub async fn check_now(&self) -> BotResult<bool> {
        self.inner.check().await
    }

    /// Sends an alert built from made-up figures. Cooldown is not touched.
    pub async fn test_alert(&self) {
        let stats = SystemStats {
            cpu_percent: 98.5,
            memory_percent: 75.0,
            rx_mbps: 450.0,
            tx_mbps: 120.0,
            total_users: 100,
            active_users: 45,
        };
        self.inner.alert(&stats).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockVpnProvider;
    use crate::testing::RecordingTransport;

    const ADMINS: [i64; 2] = [1, 2];

    fn overloaded() -> SystemStats {
        SystemStats {
            cpu_percent: 95.0,
            memory_percent: 60.0,
            rx_mbps: 100.0,
            tx_mbps: 90.0,
            total_users: 5,
            active_users: 4,
        }
    }

    fn watchdog(provider: Arc<MockVpnProvider>, transport: Arc<RecordingTransport>) -> Watchdog {
        Watchdog::new(provider, transport, ADMINS.to_vec(), WatchdogSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn one_alert_per_cooldown_window() {
        let provider = Arc::new(MockVpnProvider::new());
        provider.set_stats(overloaded());
        let transport = RecordingTransport::new();
        let dog = watchdog(provider.clone(), transport.clone());

        dog.start().await;
        // Ticks at 30s..=720s, all breaching.
        tokio::time::sleep(Duration::from_secs(740)).await;
        dog.stop().await;

        assert_eq!(provider.stats_calls(), 24);
        assert_eq!(transport.sent_to(1).len(), 3);
        assert_eq!(transport.sent_to(2).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn no_samples_after_stop() {
        let provider = Arc::new(MockVpnProvider::new());
        let transport = RecordingTransport::new();
        let dog = watchdog(provider.clone(), transport);

        dog.start().await;
        dog.start().await;
        tokio::time::sleep(Duration::from_secs(95)).await;
        dog.stop().await;
        let calls = provider.stats_calls();
        assert_eq!(calls, 3);
        assert!(!dog.is_running().await);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(provider.stats_calls(), calls);
        dog.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn calm_load_sends_nothing() {
        let provider = Arc::new(MockVpnProvider::new());
        let transport = RecordingTransport::new();
        let dog = watchdog(provider, transport.clone());
        assert!(!dog.check_now().await.unwrap());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn network_spike_alone_alerts() {
        let provider = Arc::new(MockVpnProvider::new());
        provider.set_stats(SystemStats {
            cpu_percent: 10.0,
            rx_mbps: 400.0,
            ..overloaded()
        });
        let transport = RecordingTransport::new();
        let dog = watchdog(provider, transport.clone());

        assert!(dog.check_now().await.unwrap());
        assert!(!dog.check_now().await.unwrap());
        let alert = transport.last_body_to(1).unwrap();
        assert!(alert.contains("400 Mbps 🚀"));
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_expires() {
        let provider = Arc::new(MockVpnProvider::new());
        provider.set_stats(overloaded());
        let transport = RecordingTransport::new();
        let dog = watchdog(provider, transport);

        assert!(dog.check_now().await.unwrap());
        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(!dog.check_now().await.unwrap());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(dog.check_now().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sample_keeps_looping() {
        let provider = Arc::new(MockVpnProvider::new());
        provider.set_fail_stats(true);
        let transport = RecordingTransport::new();
        let dog = watchdog(provider.clone(), transport);

        dog.start().await;
        tokio::time::sleep(Duration::from_secs(65)).await;
        dog.stop().await;
        assert_eq!(provider.stats_calls(), 2);
    }

    #[tokio::test]
    async fn alert_lists_heaviest_active_users() {
        let provider = Arc::new(MockVpnProvider::new());
        let users = provider.list_users().await.unwrap();
        let top = top_consumers(users, 3);
        let names: Vec<&str> = top.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["tg_111_1", "tg_222_1", "tg_333_1"]);

        let text = format_alert(&overloaded(), &top);
        assert!(text.contains("95.0% 🔴"));
        assert!(text.contains("150.0 GB"));
        assert!(!text.contains("tg_555_1"));
    }

    #[tokio::test]
    async fn test_alert_reaches_every_admin() {
        let provider = Arc::new(MockVpnProvider::new());
        let transport = RecordingTransport::new();
        let dog = watchdog(provider, transport.clone());
        dog.test_alert().await;
        assert!(transport.last_body_to(1).unwrap().contains("98.5%"));
        assert!(transport.last_body_to(2).unwrap().contains("45 / 100"));
        assert!(dog.check_now().await.is_ok());
    }
}
