use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::LedgerResult;
use crate::models::{ExpiringSubscription, Subscription, SubscriptionStatus};
use crate::store::Store;

/// Plan id stored on rows created by [`SubscriptionRepository::extend`] when
/// there was nothing active to extend.
pub const EXTENSION_PLAN_ID: &str = "extension";

/// Result of a read that never writes.
#[derive(Debug, Clone, PartialEq)]
pub enum ActiveLookup {
    None,
    Active(Subscription),
    /// Still flagged active but already past `expire_at`.
    Stale(Subscription),
}

impl ActiveLookup {
    pub fn active(self) -> Option<Subscription> {
        match self {
            ActiveLookup::Active(sub) => Some(sub),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct SubscriptionRepository {
    store: Arc<dyn Store>,
}

impl SubscriptionRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn peek_active(&self, user_id: i64) -> LedgerResult<ActiveLookup> {
        let now = Utc::now();
        Ok(match self.store.find_active_subscription(user_id).await? {
            None => ActiveLookup::None,
            Some(sub) if sub.is_expired_at(now) => ActiveLookup::Stale(sub),
            Some(sub) => ActiveLookup::Active(sub),
        })
    }

    /// Like [`peek_active`](Self::peek_active) but deactivates a stale row it finds.
    pub async fn get_active(&self, user_id: i64) -> LedgerResult<Option<Subscription>> {
        match self.peek_active(user_id).await? {
            ActiveLookup::Active(sub) => Ok(Some(sub)),
            ActiveLookup::Stale(sub) => {
                if self.store.deactivate_subscription(sub.id).await? {
                    debug!("Deactivated expired subscription {} of user {}", sub.id, user_id);
                }
                Ok(None)
            }
            ActiveLookup::None => Ok(None),
        }
    }

    /// Replaces whatever is active for the user with a fresh row.
    pub async fn create_or_renew(
        &self,
        user_id: i64,
        plan_id: &str,
        expire_at: DateTime<Utc>,
    ) -> LedgerResult<Subscription> {
        let sub = self
            .store
            .replace_active_subscription(user_id, plan_id, expire_at)
            .await?;
        info!(
            "Subscription {} ({}) active for user {} until {}",
            sub.id, plan_id, user_id, sub.expire_at
        );
        Ok(sub)
    }

    /// Adds `days` to the current expiry, or starts a new period from now
    /// when nothing unexpired is active.
    pub async fn extend(&self, user_id: i64, days: i64) -> LedgerResult<Subscription> {
        if let ActiveLookup::Active(sub) = self.peek_active(user_id).await? {
            let new_expiry = sub.expire_at + Duration::days(days);
            if let Some(updated) = self.store.set_subscription_expiry(sub.id, new_expiry).await? {
                info!(
                    "Extended subscription {} of user {} by {} days until {}",
                    updated.id, user_id, days, updated.expire_at
                );
                return Ok(updated);
            }
            debug!("Subscription {} was replaced concurrently, starting a new one", sub.id);
        }

        self.create_or_renew(user_id, EXTENSION_PLAN_ID, Utc::now() + Duration::days(days))
            .await
    }

    pub async fn list_expiring(&self, window_days: i64) -> LedgerResult<Vec<ExpiringSubscription>> {
        let before = Utc::now() + Duration::days(window_days);
        Ok(self.store.expiring_subscriptions(before).await?)
    }

    pub async fn deactivate_expired(&self) -> LedgerResult<u64> {
        Ok(self.store.deactivate_expired(Utc::now()).await?)
    }

    pub async fn status(&self, user_id: i64) -> LedgerResult<SubscriptionStatus> {
        Ok(match self.get_active(user_id).await? {
            Some(sub) => SubscriptionStatus::from_active(&sub, Utc::now()),
            None => SubscriptionStatus::inactive(),
        })
    }

    pub async fn history(&self, user_id: i64) -> LedgerResult<Vec<Subscription>> {
        Ok(self.store.subscriptions_for_user(user_id).await?)
    }
}
