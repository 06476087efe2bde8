use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub plan_id: String,
    pub expire_at: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }

    /// Whole days remaining, truncated. Zero or negative once less than a day is left.
    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        (self.expire_at - now).num_days()
    }
}

/// Active subscription joined with the owner's contact fields.
#[derive(Debug, Clone, Serialize)]
pub struct ExpiringSubscription {
    pub subscription: Subscription,
    pub chat_id: i64,
    pub first_name: Option<String>,
}

/// What the account screen shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubscriptionStatus {
    pub is_active: bool,
    pub plan_id: Option<String>,
    pub expire_at: Option<DateTime<Utc>>,
    pub days_left: i64,
}

impl SubscriptionStatus {
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn from_active(sub: &Subscription, now: DateTime<Utc>) -> Self {
        Self {
            is_active: true,
            plan_id: Some(sub.plan_id.clone()),
            expire_at: Some(sub.expire_at),
            days_left: sub.days_left(now).max(0),
        }
    }
}
