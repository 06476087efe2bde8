use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use super::{Store, StoreResult};
use crate::models::{
    ExpiringSubscription, NewPayment, PAYMENT_STATUS_COMPLETED, Payment, Referral, Subscription,
    User, UserProfile,
};

const USER_COLUMNS: &str = "chat_id, username, first_name, last_name, created_at, last_activity, \
     referral_balance, invited_count, referred_by, is_blocked";

#[derive(FromRow)]
struct ExpiringRow {
    #[sqlx(flatten)]
    subscription: Subscription,
    chat_id: i64,
    first_name: Option<String>,
}

/// Direct PostgreSQL backend.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_user(&self, profile: &UserProfile) -> StoreResult<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (chat_id, username, first_name, last_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (chat_id) DO UPDATE SET
                username = EXCLUDED.username,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                last_activity = NOW()
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(profile.chat_id)
        .bind(&profile.username)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn get_user(&self, chat_id: i64) -> StoreResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE chat_id = $1"
        ))
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn count_users(&self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn set_referred_by_if_unset(&self, referred: i64, referrer: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE users SET referred_by = $2 WHERE chat_id = $1 AND referred_by IS NULL AND chat_id <> $2",
        )
        .bind(referred)
        .bind(referrer)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_invited_count(&self, chat_id: i64) -> StoreResult<()> {
        sqlx::query("UPDATE users SET invited_count = invited_count + 1 WHERE chat_id = $1")
            .bind(chat_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_referral_balance(&self, chat_id: i64, amount: f64) -> StoreResult<()> {
        sqlx::query("UPDATE users SET referral_balance = referral_balance + $2 WHERE chat_id = $1")
            .bind(chat_id)
            .bind(amount)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_active_subscription(&self, user_id: i64) -> StoreResult<Option<Subscription>> {
        let sub = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE user_id = $1 AND is_active ORDER BY expire_at DESC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sub)
    }

    async fn subscriptions_for_user(&self, user_id: i64) -> StoreResult<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE user_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn replace_active_subscription(
        &self,
        user_id: i64,
        plan_id: &str,
        expire_at: DateTime<Utc>,
    ) -> StoreResult<Subscription> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE subscriptions SET is_active = FALSE WHERE user_id = $1 AND is_active")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let sub = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (user_id, plan_id, expire_at, is_active)
            VALUES ($1, $2, $3, TRUE)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(plan_id)
        .bind(expire_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(sub)
    }

    async fn set_subscription_expiry(
        &self,
        id: i64,
        expire_at: DateTime<Utc>,
    ) -> StoreResult<Option<Subscription>> {
        let sub = sqlx::query_as::<_, Subscription>(
            "UPDATE subscriptions SET expire_at = $2 WHERE id = $1 AND is_active RETURNING *",
        )
        .bind(id)
        .bind(expire_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sub)
    }

    async fn deactivate_subscription(&self, id: i64) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE subscriptions SET is_active = FALSE WHERE id = $1 AND is_active")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE subscriptions SET is_active = FALSE WHERE is_active AND expire_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn expiring_subscriptions(
        &self,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<ExpiringSubscription>> {
        let rows = sqlx::query_as::<_, ExpiringRow>(
            r#"
            SELECT s.id, s.user_id, s.plan_id, s.expire_at, s.is_active, s.created_at,
                   u.chat_id, u.first_name
            FROM subscriptions s
            JOIN users u ON u.chat_id = s.user_id
            WHERE s.is_active AND s.expire_at < $1
            ORDER BY s.expire_at
            "#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| ExpiringSubscription {
                subscription: r.subscription,
                chat_id: r.chat_id,
                first_name: r.first_name,
            })
            .collect())
    }

    async fn insert_payment(&self, payment: &NewPayment) -> StoreResult<Payment> {
        let row = sqlx::query_as::<_, Payment>(
            r#"
            INSERT INTO payments (user_id, amount, currency, charge_id, provider_charge_id, plan_id, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(payment.user_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.charge_id)
        .bind(&payment.provider_charge_id)
        .bind(&payment.plan_id)
        .bind(PAYMENT_STATUS_COMPLETED)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn payment_by_charge_id(&self, charge_id: &str) -> StoreResult<Option<Payment>> {
        let row = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE charge_id = $1")
            .bind(charge_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn payments_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE user_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn completed_payments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Payment>> {
        let rows = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE status = $1 AND created_at >= $2 AND created_at <= $3 ORDER BY created_at",
        )
        .bind(PAYMENT_STATUS_COMPLETED)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn completed_total(&self) -> StoreResult<f64> {
        let total: Option<f64> =
            sqlx::query_scalar("SELECT SUM(amount) FROM payments WHERE status = $1")
                .bind(PAYMENT_STATUS_COMPLETED)
                .fetch_one(&self.pool)
                .await?;
        Ok(total.unwrap_or(0.0))
    }

    async fn insert_referral(
        &self,
        referrer_id: i64,
        referred_id: i64,
        reward_amount: f64,
    ) -> StoreResult<Referral> {
        let row = sqlx::query_as::<_, Referral>(
            r#"
            INSERT INTO referrals (referrer_id, referred_id, reward_amount)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(referrer_id)
        .bind(referred_id)
        .bind(reward_amount)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn referrals_by_referrer(&self, referrer_id: i64) -> StoreResult<Vec<Referral>> {
        let rows = sqlx::query_as::<_, Referral>(
            "SELECT * FROM referrals WHERE referrer_id = $1 ORDER BY created_at DESC",
        )
        .bind(referrer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn mark_referral_paid(&self, referrer_id: i64, referred_id: i64) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE referrals SET is_paid = TRUE WHERE referrer_id = $1 AND referred_id = $2 AND NOT is_paid",
        )
        .bind(referrer_id)
        .bind(referred_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
