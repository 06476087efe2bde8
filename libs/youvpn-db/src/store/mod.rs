use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    ExpiringSubscription, NewPayment, Payment, Referral, Subscription, User, UserProfile,
};

pub mod memory;
pub mod postgres;
pub mod rest;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use rest::RestStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("store transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode store response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("malformed store response: {0}")]
    Malformed(String),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(db.message().to_string())
            }
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            _ => StoreError::Database(err),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence operations the ledgers are built on.
///
/// Every method is a single store-side operation. Conditional updates and
/// counters are evaluated by the store so concurrent handlers never lose
/// writes; nothing here assumes a transaction spanning two calls.
#[async_trait]
pub trait Store: Send + Sync {
    // users

    /// Inserts the user or refreshes name fields and `last_activity`.
    async fn upsert_user(&self, profile: &UserProfile) -> StoreResult<User>;

    async fn get_user(&self, chat_id: i64) -> StoreResult<Option<User>>;

    async fn count_users(&self) -> StoreResult<i64>;

    /// Sets `referred_by` only when it is still unset. Returns whether a row changed.
    async fn set_referred_by_if_unset(&self, referred: i64, referrer: i64) -> StoreResult<bool>;

    async fn increment_invited_count(&self, chat_id: i64) -> StoreResult<()>;

    async fn add_referral_balance(&self, chat_id: i64, amount: f64) -> StoreResult<()>;

    // subscriptions

    /// The row flagged active for the user, expired or not.
    async fn find_active_subscription(&self, user_id: i64) -> StoreResult<Option<Subscription>>;

    /// All rows for the user, newest first.
    async fn subscriptions_for_user(&self, user_id: i64) -> StoreResult<Vec<Subscription>>;

    /// Deactivates every active row for the user and inserts a new active one.
    async fn replace_active_subscription(
        &self,
        user_id: i64,
        plan_id: &str,
        expire_at: DateTime<Utc>,
    ) -> StoreResult<Subscription>;

    /// Moves `expire_at` of a row that is still active. `None` if it no longer is.
    async fn set_subscription_expiry(
        &self,
        id: i64,
        expire_at: DateTime<Utc>,
    ) -> StoreResult<Option<Subscription>>;

    /// Deactivates the row if it is still active. Returns whether a row changed.
    async fn deactivate_subscription(&self, id: i64) -> StoreResult<bool>;

    /// Deactivates every active row with `expire_at <= now`.
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;

    /// Active rows expiring before `before`, joined with the owner.
    async fn expiring_subscriptions(
        &self,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<ExpiringSubscription>>;

    // payments

    /// Fails with [`StoreError::Conflict`] when `charge_id` is already recorded.
    async fn insert_payment(&self, payment: &NewPayment) -> StoreResult<Payment>;

    async fn payment_by_charge_id(&self, charge_id: &str) -> StoreResult<Option<Payment>>;

    async fn payments_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Payment>>;

    /// Completed payments with `from <= created_at <= to`, oldest first.
    async fn completed_payments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Payment>>;

    async fn completed_total(&self) -> StoreResult<f64>;

    // referrals

    /// Fails with [`StoreError::Conflict`] when the pair already exists.
    async fn insert_referral(
        &self,
        referrer_id: i64,
        referred_id: i64,
        reward_amount: f64,
    ) -> StoreResult<Referral>;

    async fn referrals_by_referrer(&self, referrer_id: i64) -> StoreResult<Vec<Referral>>;

    /// Marks an unpaid edge paid. Returns whether a row changed.
    async fn mark_referral_paid(&self, referrer_id: i64, referred_id: i64) -> StoreResult<bool>;
}
