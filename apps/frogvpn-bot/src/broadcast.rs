//! Rate-limited fan-out of one message to every known user.
//!
//! At most one job runs at a time across plain broadcasts and flash sales.
//! A job owns a snapshot of its recipients, reports progress to whoever
//! launched it and always finishes with exactly one summary message.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use frogvpn_db::Store;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::{BotError, BotResult};
use crate::rate_limit::RateLimiter;
use crate::transport::{OutgoingMessage, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Broadcast,
    FlashSale,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Broadcast => f.write_str("broadcast"),
            JobKind::FlashSale => f.write_str("flash sale"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    pub interval: Duration,
    pub progress_every: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            progress_every: 100,
        }
    }
}

/// Immutable description of one run.
#[derive(Debug, Clone)]
pub struct BroadcastSpec {
    pub kind: JobKind,
    pub initiator: i64,
    pub message: OutgoingMessage,
    pub recipients: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub sent: usize,
    pub failed: usize,
    /// Part of `failed`: recipients who blocked the bot or deleted the account.
    pub unreachable: usize,
    pub total: usize,
    pub cancelled: bool,
}

impl BroadcastReport {
    pub fn attempted(&self) -> usize {
        self.sent + self.failed
    }

    fn summary(&self, kind: JobKind) -> String {
        let mut text = format!(
            "📊 <b>{} finished</b>\n\n✅ Sent: {}\n❌ Failed: {}\n👥 Total: {}",
            capitalize(&kind.to_string()),
            self.sent,
            self.failed,
            self.total
        );
        if self.unreachable > 0 {
            text.push_str(&format!("\n🚫 Blocked or deleted: {}", self.unreachable));
        }
        if self.cancelled {
            text.push_str(&format!(
                "\n⏹ Stopped early, {} not contacted",
                self.total - self.attempted()
            ));
        }
        text
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Handle to a running job. Dropping it does not stop the job.
pub struct JobHandle {
    token: CancellationToken,
    handle: JoinHandle<BroadcastReport>,
}

impl JobHandle {
    /// Asks the job to stop before its next recipient.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub async fn wait(self) -> Result<BroadcastReport, JoinError> {
        self.handle.await
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    settings: BroadcastSettings,
    active: Mutex<Option<CancellationToken>>,
    jobs: TaskTracker,
}

impl Shared {
    fn active(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    shared: Arc<Shared>,
}

impl Broadcaster {
    pub fn new(transport: Arc<dyn Transport>, settings: BroadcastSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                settings,
                active: Mutex::new(None),
                jobs: TaskTracker::new(),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.active().is_some()
    }

    /// Cancels the running job, if any. Returns whether one was running.
    pub fn cancel_active(&self) -> bool {
        match self.shared.active().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels the running job and waits until every launched job, its
    /// summary included, has finished. Later launches are not waited for.
    pub async fn shutdown(&self) {
        if self.cancel_active() {
            info!("Waiting for the running job to wrap up");
        }
        self.shared.jobs.close();
        self.shared.jobs.wait().await;
    }

    /// Claims the single job slot. Fails with `AlreadyRunning` if taken.
    pub fn reserve(&self) -> BotResult<Reservation> {
        let mut active = self.shared.active();
        if active.is_some() {
            return Err(BotError::AlreadyRunning);
        }
        let token = CancellationToken::new();
        *active = Some(token.clone());
        Ok(Reservation {
            shared: self.shared.clone(),
            token,
        })
    }

    /// Starts a job over an explicit recipient list.
    pub fn launch(&self, spec: BroadcastSpec) -> BotResult<JobHandle> {
        Ok(self.reserve()?.launch(spec))
    }

    /// Snapshots every user id from the store and starts a job over them.
    pub async fn launch_to_all(
        &self,
        store: &dyn Store,
        kind: JobKind,
        initiator: i64,
        message: OutgoingMessage,
    ) -> BotResult<JobHandle> {
        self.reserve()?
            .launch_to_all(store, kind, initiator, message)
            .await
    }
}

/// The claimed job slot. Released when the job finishes or the
/// reservation is dropped unused.
pub struct Reservation {
    shared: Arc<Shared>,
    token: CancellationToken,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        // A reservation exists only while it holds the slot.
        *self.shared.active() = None;
    }
}

impl Reservation {
    pub fn launch(self, spec: BroadcastSpec) -> JobHandle {
        let token = self.token.clone();
        let jobs = self.shared.jobs.clone();
        let handle = jobs.spawn(run(self, spec));
        JobHandle { token, handle }
    }

    pub async fn launch_to_all(
        self,
        store: &dyn Store,
        kind: JobKind,
        initiator: i64,
        message: OutgoingMessage,
    ) -> BotResult<JobHandle> {
        // Dropping `self` on failure frees the slot before anything was sent.
        let recipients = store.list_user_ids().await?;
        Ok(self.launch(BroadcastSpec {
            kind,
            initiator,
            message,
            recipients,
        }))
    }
}

async fn run(reservation: Reservation, spec: BroadcastSpec) -> BroadcastReport {
    let shared = reservation.shared.clone();
    let token = reservation.token.clone();
    let BroadcastSettings {
        interval,
        progress_every,
    } = shared.settings;

    let total = spec.recipients.len();
    info!(
        "Starting {} from {} to {} recipients",
        spec.kind, spec.initiator, total
    );

    let mut limiter = RateLimiter::new(interval);
    let mut report = BroadcastReport {
        total,
        ..Default::default()
    };

    for &chat_id in &spec.recipients {
        if token.is_cancelled() {
            report.cancelled = true;
            break;
        }
        tokio::select! {
            _ = token.cancelled() => {
                report.cancelled = true;
                break;
            }
            _ = limiter.admit() => {}
        }

        match shared.transport.send(chat_id, spec.message.clone()).await {
            Ok(_) => report.sent += 1,
            Err(e) => {
                report.failed += 1;
                if e.is_unreachable() {
                    report.unreachable += 1;
                    debug!("{} skipped unreachable {}", spec.kind, chat_id);
                } else {
                    warn!("{} delivery to {} failed: {}", spec.kind, chat_id, e);
                }
            }
        }

        let done = report.attempted();
        if progress_every > 0 && total > progress_every && done % progress_every == 0 && done < total
        {
            let progress = format!(
                "📤 Progress: {}/{} (✅ {} | ❌ {})",
                done, total, report.sent, report.failed
            );
            if let Err(e) = shared
                .transport
                .send(spec.initiator, OutgoingMessage::text(progress))
                .await
            {
                warn!("Failed to report {} progress: {}", spec.kind, e);
            }
        }
    }

    // Free the slot before the summary so the initiator can start the next job
    // as soon as they read it.
    drop(reservation);

    info!(
        "{} finished: {} sent, {} failed ({} unreachable), {} total, cancelled: {}",
        spec.kind, report.sent, report.failed, report.unreachable, report.total, report.cancelled
    );
    if let Err(e) = shared
        .transport
        .send(
            spec.initiator,
            OutgoingMessage::text(report.summary(spec.kind)),
        )
        .await
    {
        warn!("Failed to deliver {} summary: {}", spec.kind, e);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;
    use crate::transport::TransportError;
    use frogvpn_db::MemoryStore;

    const INITIATOR: i64 = 1;

    fn spec(recipients: Vec<i64>) -> BroadcastSpec {
        BroadcastSpec {
            kind: JobKind::Broadcast,
            initiator: INITIATOR,
            message: OutgoingMessage::text("hello"),
            recipients,
        }
    }

    fn broadcaster(transport: Arc<RecordingTransport>) -> Broadcaster {
        Broadcaster::new(transport, BroadcastSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn counts_per_recipient_failures() {
        let transport = RecordingTransport::new();
        transport.fail_for(20, TransportError::Api("timeout".into()));
        let broadcaster = broadcaster(transport.clone());

        let job = broadcaster.launch(spec(vec![10, 20, 30])).unwrap();
        let report = job.wait().await.unwrap();

        assert_eq!(
            report,
            BroadcastReport {
                sent: 2,
                failed: 1,
                unreachable: 0,
                total: 3,
                cancelled: false
            }
        );
        assert!(!broadcaster.is_running());
        let summaries = transport.bodies_to(INITIATOR);
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].contains("Sent: 2"));
        assert!(summaries[0].contains("Failed: 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_recipient_list_completes_immediately() {
        let transport = RecordingTransport::new();
        let broadcaster = broadcaster(transport.clone());
        let report = broadcaster.launch(spec(vec![])).unwrap().wait().await.unwrap();
        assert_eq!((report.sent, report.failed, report.total), (0, 0, 0));
        assert_eq!(transport.bodies_to(INITIATOR).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn all_failures_still_balance() {
        let transport = RecordingTransport::new();
        for id in 2..6 {
            transport.fail_for(id, TransportError::Unreachable("blocked".into()));
        }
        let report = broadcaster(transport)
            .launch(spec((2..6).collect()))
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(report.sent, 0);
        assert_eq!(report.failed, 4);
        assert_eq!(report.unreachable, 4);
        assert_eq!(report.attempted(), report.total);
    }

    #[tokio::test(start_paused = true)]
    async fn second_launch_is_rejected_while_running() {
        let transport = RecordingTransport::new();
        let broadcaster = broadcaster(transport.clone());

        let first = broadcaster.launch(spec((100..110).collect())).unwrap();
        assert!(matches!(
            broadcaster.launch(spec(vec![5])),
            Err(BotError::AlreadyRunning)
        ));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(broadcaster.is_running());
        assert!(matches!(
            broadcaster.launch(spec(vec![5])),
            Err(BotError::AlreadyRunning)
        ));

        first.wait().await.unwrap();
        let again = broadcaster.launch(spec(vec![5])).unwrap();
        assert_eq!(again.wait().await.unwrap().sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recipients_are_contacted_in_order() {
        let transport = RecordingTransport::new();
        broadcaster(transport.clone())
            .launch(spec(vec![30, 10, 20]))
            .unwrap()
            .wait()
            .await
            .unwrap();
        let order: Vec<i64> = transport
            .sent()
            .into_iter()
            .map(|(chat, _)| chat)
            .filter(|chat| *chat != INITIATOR)
            .collect();
        assert_eq!(order, vec![30, 10, 20]);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_progress_on_large_runs() {
        let transport = RecordingTransport::new();
        let report = broadcaster(transport.clone())
            .launch(spec((10_000..10_250).collect()))
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(report.sent, 250);

        let bodies = transport.bodies_to(INITIATOR);
        let progress: Vec<&String> = bodies.iter().filter(|b| b.contains("Progress")).collect();
        assert_eq!(progress.len(), 2);
        assert!(progress[0].contains("100/250"));
        assert!(progress[1].contains("200/250"));
        assert!(bodies.last().unwrap().contains("finished"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_between_recipients() {
        let transport = RecordingTransport::new();
        let broadcaster = broadcaster(transport.clone());
        let job = broadcaster.launch(spec((100..200).collect())).unwrap();

        tokio::time::sleep(Duration::from_millis(110)).await;
        assert!(broadcaster.cancel_active());
        let report = job.wait().await.unwrap();

        assert!(report.cancelled);
        assert!(report.sent > 0 && report.sent < 100);
        assert_eq!(report.failed, 0);
        assert!(!broadcaster.is_running());
        let summaries: Vec<String> = transport
            .bodies_to(INITIATOR)
            .into_iter()
            .filter(|b| b.contains("finished"))
            .collect();
        assert_eq!(summaries.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn enumeration_failure_aborts_before_sending() {
        let transport = RecordingTransport::new();
        let broadcaster = broadcaster(transport.clone());
        let store = MemoryStore::new();
        store.set_unavailable(true);

        let err = broadcaster
            .launch_to_all(&store, JobKind::Broadcast, INITIATOR, OutgoingMessage::text("x"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BotError::UpstreamUnavailable(_)));
        assert!(!broadcaster.is_running());
        assert!(transport.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn launch_to_all_snapshots_store_users() {
        let transport = RecordingTransport::new();
        let broadcaster = broadcaster(transport.clone());
        let store = MemoryStore::new();
        for id in [11, 12, 13] {
            store.get_or_create_user(id, None, None).await.unwrap();
        }

        let job = broadcaster
            .launch_to_all(&store, JobKind::Broadcast, INITIATOR, OutgoingMessage::text("x"))
            .await
            .unwrap();
        store.get_or_create_user(14, None, None).await.unwrap();

        let report = job.wait().await.unwrap();
        assert_eq!(report.total, 3);
        assert!(transport.sent_to(14).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_for_the_summary_of_a_detached_job() {
        let transport = RecordingTransport::new();
        let broadcaster = broadcaster(transport.clone());
        drop(broadcaster.launch(spec((100..200).collect())).unwrap());

        tokio::time::sleep(Duration::from_millis(110)).await;
        broadcaster.shutdown().await;

        assert!(!broadcaster.is_running());
        let summaries: Vec<String> = transport
            .bodies_to(INITIATOR)
            .into_iter()
            .filter(|b| b.contains("finished"))
            .collect();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].contains("Stopped early"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_without_jobs_returns_at_once() {
        let transport = RecordingTransport::new();
        let broadcaster = broadcaster(transport.clone());
        broadcaster.shutdown().await;
        assert!(transport.sent().is_empty());
    }
}
