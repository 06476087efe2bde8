use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{Store, StoreError, StoreResult};
use crate::models::{
    ExpiringSubscription, NewPayment, PAYMENT_STATUS_COMPLETED, Payment, Referral, Subscription,
    User, UserProfile,
};

#[derive(Default)]
struct Tables {
    users: HashMap<i64, User>,
    subscriptions: Vec<Subscription>,
    payments: Vec<Payment>,
    referrals: Vec<Referral>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn require_user(&self, chat_id: i64) -> StoreResult<()> {
        if self.users.contains_key(&chat_id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("user {}", chat_id)))
        }
    }
}

/// In-process store with the same constraints as the SQL schema: foreign keys
/// on `chat_id`, unique charge ids, unique referral pairs, one active
/// subscription per user. Each call holds one lock, so every operation is atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails the way an unreachable backend would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Status {
                status: 503,
                body: "store unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_user(&self, profile: &UserProfile) -> StoreResult<User> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let user = tables
            .users
            .entry(profile.chat_id)
            .and_modify(|u| {
                u.username = profile.username.clone();
                u.first_name = profile.first_name.clone();
                u.last_name = profile.last_name.clone();
                u.last_activity = now;
            })
            .or_insert_with(|| User {
                chat_id: profile.chat_id,
                username: profile.username.clone(),
                first_name: profile.first_name.clone(),
                last_name: profile.last_name.clone(),
                created_at: now,
                last_activity: now,
                referral_balance: 0.0,
                invited_count: 0,
                referred_by: None,
                is_blocked: false,
            });
        Ok(user.clone())
    }

    async fn get_user(&self, chat_id: i64) -> StoreResult<Option<User>> {
        self.check_available()?;
        Ok(self.tables.lock().await.users.get(&chat_id).cloned())
    }

    async fn count_users(&self) -> StoreResult<i64> {
        self.check_available()?;
        Ok(self.tables.lock().await.users.len() as i64)
    }

    async fn set_referred_by_if_unset(&self, referred: i64, referrer: i64) -> StoreResult<bool> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        match tables.users.get_mut(&referred) {
            Some(user) if user.referred_by.is_none() && referred != referrer => {
                user.referred_by = Some(referrer);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn increment_invited_count(&self, chat_id: i64) -> StoreResult<()> {
        self.check_available()?;
        if let Some(user) = self.tables.lock().await.users.get_mut(&chat_id) {
            user.invited_count += 1;
        }
        Ok(())
    }

    async fn add_referral_balance(&self, chat_id: i64, amount: f64) -> StoreResult<()> {
        self.check_available()?;
        if let Some(user) = self.tables.lock().await.users.get_mut(&chat_id) {
            user.referral_balance += amount;
        }
        Ok(())
    }

    async fn find_active_subscription(&self, user_id: i64) -> StoreResult<Option<Subscription>> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_active)
            .max_by_key(|s| s.expire_at)
            .cloned())
    }

    async fn subscriptions_for_user(&self, user_id: i64) -> StoreResult<Vec<Subscription>> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        let mut rows: Vec<Subscription> = tables
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn replace_active_subscription(
        &self,
        user_id: i64,
        plan_id: &str,
        expire_at: DateTime<Utc>,
    ) -> StoreResult<Subscription> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        tables.require_user(user_id)?;
        for sub in tables
            .subscriptions
            .iter_mut()
            .filter(|s| s.user_id == user_id && s.is_active)
        {
            sub.is_active = false;
        }
        let sub = Subscription {
            id: tables.next_id(),
            user_id,
            plan_id: plan_id.to_string(),
            expire_at,
            is_active: true,
            created_at: Utc::now(),
        };
        tables.subscriptions.push(sub.clone());
        Ok(sub)
    }

    async fn set_subscription_expiry(
        &self,
        id: i64,
        expire_at: DateTime<Utc>,
    ) -> StoreResult<Option<Subscription>> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        Ok(tables
            .subscriptions
            .iter_mut()
            .find(|s| s.id == id && s.is_active)
            .map(|s| {
                s.expire_at = expire_at;
                s.clone()
            }))
    }

    async fn deactivate_subscription(&self, id: i64) -> StoreResult<bool> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        match tables
            .subscriptions
            .iter_mut()
            .find(|s| s.id == id && s.is_active)
        {
            Some(sub) => {
                sub.is_active = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        let mut count = 0;
        for sub in tables
            .subscriptions
            .iter_mut()
            .filter(|s| s.is_active && s.expire_at <= now)
        {
            sub.is_active = false;
            count += 1;
        }
        Ok(count)
    }

    async fn expiring_subscriptions(
        &self,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<ExpiringSubscription>> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        let mut rows: Vec<ExpiringSubscription> = tables
            .subscriptions
            .iter()
            .filter(|s| s.is_active && s.expire_at < before)
            .filter_map(|s| {
                tables.users.get(&s.user_id).map(|u| ExpiringSubscription {
                    subscription: s.clone(),
                    chat_id: u.chat_id,
                    first_name: u.first_name.clone(),
                })
            })
            .collect();
        rows.sort_by_key(|r| r.subscription.expire_at);
        Ok(rows)
    }

    async fn insert_payment(&self, payment: &NewPayment) -> StoreResult<Payment> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        tables.require_user(payment.user_id)?;
        if tables
            .payments
            .iter()
            .any(|p| p.charge_id == payment.charge_id)
        {
            return Err(StoreError::Conflict(format!(
                "payments.charge_id {}",
                payment.charge_id
            )));
        }
        let row = Payment {
            id: tables.next_id(),
            user_id: payment.user_id,
            amount: payment.amount,
            currency: payment.currency.clone(),
            charge_id: payment.charge_id.clone(),
            provider_charge_id: payment.provider_charge_id.clone(),
            plan_id: payment.plan_id.clone(),
            status: PAYMENT_STATUS_COMPLETED.to_string(),
            created_at: Utc::now(),
        };
        tables.payments.push(row.clone());
        Ok(row)
    }

    async fn payment_by_charge_id(&self, charge_id: &str) -> StoreResult<Option<Payment>> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .payments
            .iter()
            .find(|p| p.charge_id == charge_id)
            .cloned())
    }

    async fn payments_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Payment>> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        let mut rows: Vec<Payment> = tables
            .payments
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn completed_payments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Payment>> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        let mut rows: Vec<Payment> = tables
            .payments
            .iter()
            .filter(|p| {
                p.status == PAYMENT_STATUS_COMPLETED && p.created_at >= from && p.created_at <= to
            })
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.created_at);
        Ok(rows)
    }

    async fn completed_total(&self) -> StoreResult<f64> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .payments
            .iter()
            .filter(|p| p.status == PAYMENT_STATUS_COMPLETED)
            .map(|p| p.amount)
            .sum())
    }

    async fn insert_referral(
        &self,
        referrer_id: i64,
        referred_id: i64,
        reward_amount: f64,
    ) -> StoreResult<Referral> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        tables.require_user(referrer_id)?;
        tables.require_user(referred_id)?;
        if tables
            .referrals
            .iter()
            .any(|r| r.referrer_id == referrer_id && r.referred_id == referred_id)
        {
            return Err(StoreError::Conflict(format!(
                "referrals ({}, {})",
                referrer_id, referred_id
            )));
        }
        let row = Referral {
            id: tables.next_id(),
            referrer_id,
            referred_id,
            reward_amount,
            is_paid: false,
            created_at: Utc::now(),
        };
        tables.referrals.push(row.clone());
        Ok(row)
    }

    async fn referrals_by_referrer(&self, referrer_id: i64) -> StoreResult<Vec<Referral>> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .referrals
            .iter()
            .filter(|r| r.referrer_id == referrer_id)
            .cloned()
            .collect())
    }

    async fn mark_referral_paid(&self, referrer_id: i64, referred_id: i64) -> StoreResult<bool> {
        self.check_available()?;
        let mut tables = self.tables.lock().await;
        match tables.referrals.iter_mut().find(|r| {
            r.referrer_id == referrer_id && r.referred_id == referred_id && !r.is_paid
        }) {
            Some(row) => {
                row.is_paid = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
