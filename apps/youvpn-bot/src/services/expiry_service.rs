use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use youvpn_db::repositories::{LedgerResult, SubscriptionRepository};

use crate::bot::texts;
use crate::services::notification_service::Notifier;

/// Warnings go out when this many whole days or fewer remain.
pub const WARNING_WINDOW_DAYS: i64 = 3;
const SEND_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deactivated: u64,
    pub warned: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct ExpiryService {
    subscriptions: SubscriptionRepository,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    retry_interval: Duration,
    send_delay: Duration,
}

impl ExpiryService {
    pub fn new(
        subscriptions: SubscriptionRepository,
        notifier: Arc<dyn Notifier>,
        interval: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            subscriptions,
            notifier,
            interval,
            retry_interval,
            send_delay: SEND_DELAY,
        }
    }

    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = delay;
        self
    }

    /// One pass: retire expired rows, then warn owners of rows about to expire.
    pub async fn run_once(&self) -> LedgerResult<SweepReport> {
        let mut report = SweepReport {
            deactivated: self.subscriptions.deactivate_expired().await?,
            ..Default::default()
        };

        let now = Utc::now();
        for row in self.subscriptions.list_expiring(WARNING_WINDOW_DAYS).await? {
            let days_left = row.subscription.days_left(now);
            if days_left <= 0 || days_left > WARNING_WINDOW_DAYS {
                continue;
            }

            let text = texts::expiry_warning(days_left);
            match self.notifier.send(row.chat_id, &text).await {
                Ok(()) => {
                    info!("Sent expiry warning to user {} ({} days left)", row.chat_id, days_left);
                    report.warned += 1;
                }
                Err(e) => {
                    warn!("Failed to send expiry warning to user {}: {}", row.chat_id, e);
                    report.failed += 1;
                }
            }

            if !self.send_delay.is_zero() {
                tokio::time::sleep(self.send_delay).await;
            }
        }

        Ok(report)
    }

    /// How long to wait before the next pass.
    pub fn pause_after<T>(&self, outcome: &LedgerResult<T>) -> Duration {
        match outcome {
            Ok(_) => self.interval,
            Err(_) => self.retry_interval,
        }
    }

    /// Never returns. A failed pass is retried after the shorter interval.
    pub async fn run(self) {
        info!(
            "Expiry sweep started (every {:?}, retry after {:?})",
            self.interval, self.retry_interval
        );
        loop {
            let outcome = self.run_once().await;
            match &outcome {
                Ok(report) => info!(
                    "Expiry sweep done: {} deactivated, {} warned, {} failed",
                    report.deactivated, report.warned, report.failed
                ),
                Err(e) => error!("Expiry sweep failed: {}", e),
            }
            tokio::time::sleep(self.pause_after(&outcome)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use tokio::sync::Mutex;
    use youvpn_db::models::UserProfile;
    use youvpn_db::repositories::LedgerError;
    use youvpn_db::store::MemoryStore;
    use youvpn_db::Store;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<(i64, String)>>,
        failing: Vec<i64>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, chat_id: i64, html: &str) -> anyhow::Result<()> {
            if self.failing.contains(&chat_id) {
                anyhow::bail!("bot was blocked by the user");
            }
            self.sent.lock().await.push((chat_id, html.to_string()));
            Ok(())
        }
    }

    async fn seed(store: &MemoryStore, user: i64, expires_in: ChronoDuration) {
        store.upsert_user(&UserProfile::new(user)).await.unwrap();
        store
            .replace_active_subscription(user, "1_month", Utc::now() + expires_in)
            .await
            .unwrap();
    }

    fn service(store: Arc<MemoryStore>, notifier: Arc<RecordingNotifier>) -> ExpiryService {
        ExpiryService::new(
            SubscriptionRepository::new(store),
            notifier,
            Duration::from_secs(3600),
            Duration::from_secs(60),
        )
        .with_send_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_sweep_selects_users_inside_window() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1, ChronoDuration::days(2) + ChronoDuration::hours(1)).await;
        seed(&store, 2, ChronoDuration::days(5)).await;
        seed(&store, 3, -ChronoDuration::hours(1)).await;
        seed(&store, 4, ChronoDuration::hours(5)).await;

        let notifier = Arc::new(RecordingNotifier::default());
        let report = service(store.clone(), notifier.clone()).run_once().await.unwrap();

        assert_eq!(report.deactivated, 1);
        assert_eq!(report.warned, 1);
        let sent = notifier.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 1);
        assert!(sent[0].1.contains("2 дня"));

        assert!(store.find_active_subscription(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_send_does_not_stop_sweep() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 1, ChronoDuration::days(1) + ChronoDuration::hours(2)).await;
        seed(&store, 2, ChronoDuration::days(2) + ChronoDuration::hours(2)).await;

        let notifier = Arc::new(RecordingNotifier {
            failing: vec![1],
            ..Default::default()
        });
        let report = service(store, notifier.clone()).run_once().await.unwrap();

        assert_eq!(report.warned, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(notifier.sent.lock().await[0].0, 2);
    }

    #[tokio::test]
    async fn test_store_failure_fails_the_pass() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let notifier = Arc::new(RecordingNotifier::default());

        assert!(service(store, notifier.clone()).run_once().await.is_err());
        assert!(notifier.sent.lock().await.is_empty());
    }

    #[test]
    fn test_failed_pass_waits_retry_interval() {
        let service = service(
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingNotifier::default()),
        );
        let ok: LedgerResult<SweepReport> = Ok(SweepReport::default());
        let failed: LedgerResult<SweepReport> = Err(LedgerError::InvalidAmount(f64::NAN));

        assert_eq!(service.pause_after(&ok), Duration::from_secs(3600));
        assert_eq!(service.pause_after(&failed), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_after_store_outage() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let notifier = Arc::new(RecordingNotifier::default());

        let sweep = service(store.clone(), notifier.clone());
        let handle = tokio::spawn(sweep.run());

        // first pass fails at t=0, next one is due at t=60s
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(notifier.sent.lock().await.is_empty());

        store.set_unavailable(false);
        seed(&store, 7, ChronoDuration::days(2) + ChronoDuration::hours(1)).await;

        // well short of the hourly interval
        tokio::time::sleep(Duration::from_secs(60)).await;
        let sent = notifier.sent.lock().await.clone();
        handle.abort();

        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 7);
    }
}
