use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::warn;

use super::{Store, StoreError, StoreResult};
use crate::models::{
    ExpiringSubscription, NewPayment, PAYMENT_STATUS_COMPLETED, Payment, Referral, Subscription,
    User, UserProfile,
};

const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(300);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
struct ExpiringRow {
    #[serde(flatten)]
    subscription: Subscription,
    users: Option<OwnerRow>,
}

#[derive(Deserialize)]
struct OwnerRow {
    chat_id: i64,
    first_name: Option<String>,
}

#[derive(Deserialize)]
struct AmountRow {
    amount: f64,
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Supabase / PostgREST backend. Atomic multi-row operations go through the
/// SQL functions defined in the migrations and are called as `/rpc/<name>`.
#[derive(Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    key: String,
}

impl RestStore {
    pub fn new(base_url: impl Into<String>, key: impl Into<String>) -> StoreResult<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key: key.into(),
        })
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> StoreResult<Url> {
        let raw = format!("{}/rest/v1/{}", self.base_url, path);
        Url::parse_with_params(&raw, params).map_err(|e| StoreError::Status {
            status: 0,
            body: format!("invalid store url {}: {}", raw, e),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.key)
            .bearer_auth(&self.key)
    }

    /// Sends with a bounded retry. Requests that never reached the server are
    /// always retried; timeouts and 5xx only when `idempotent`.
    async fn execute(&self, request: RequestBuilder, idempotent: bool) -> StoreResult<Response> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let Some(current) = request.try_clone() else {
                return Self::check(request.send().await?).await;
            };

            match current.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if idempotent && status.is_server_error() && attempt < MAX_ATTEMPTS {
                        warn!(
                            "Store returned {} (attempt {}/{}), retrying",
                            status, attempt, MAX_ATTEMPTS
                        );
                        tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                        continue;
                    }
                    return Self::check(resp).await;
                }
                Err(e) => {
                    let retryable = e.is_connect() || (idempotent && e.is_timeout());
                    if retryable && attempt < MAX_ATTEMPTS {
                        warn!(
                            "Store request failed (attempt {}/{}): {}",
                            attempt, MAX_ATTEMPTS, e
                        );
                        tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
    }

    async fn check(resp: Response) -> StoreResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::CONFLICT => StoreError::Conflict(body),
            StatusCode::NOT_FOUND => StoreError::NotFound(body),
            _ => StoreError::Status {
                status: status.as_u16(),
                body,
            },
        })
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> StoreResult<T> {
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        params: &[(&str, String)],
    ) -> StoreResult<Vec<T>> {
        let url = self.url(table, params)?;
        let resp = self
            .execute(self.authorized(self.client.get(url)), true)
            .await?;
        Self::decode(resp).await
    }

    async fn insert<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        table: &str,
        params: &[(&str, String)],
        prefer: &str,
        body: &B,
    ) -> StoreResult<Vec<T>> {
        let url = self.url(table, params)?;
        let request = self
            .authorized(self.client.post(url))
            .header("Prefer", prefer)
            .json(body);
        let resp = self.execute(request, false).await?;
        Self::decode(resp).await
    }

    async fn update<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        table: &str,
        params: &[(&str, String)],
        body: &B,
    ) -> StoreResult<Vec<T>> {
        let url = self.url(table, params)?;
        let request = self
            .authorized(self.client.patch(url))
            .header("Prefer", "return=representation")
            .json(body);
        let resp = self.execute(request, false).await?;
        Self::decode(resp).await
    }

    async fn rpc<B: serde::Serialize>(&self, function: &str, body: &B) -> StoreResult<Response> {
        let url = self.url(&format!("rpc/{}", function), &[])?;
        let request = self.authorized(self.client.post(url)).json(body);
        self.execute(request, false).await
    }
}

#[async_trait]
impl Store for RestStore {
    async fn upsert_user(&self, profile: &UserProfile) -> StoreResult<User> {
        let body = json!({
            "chat_id": profile.chat_id,
            "username": profile.username,
            "first_name": profile.first_name,
            "last_name": profile.last_name,
            "last_activity": timestamp(Utc::now()),
        });
        let rows: Vec<User> = self
            .insert(
                "users",
                &[("on_conflict", "chat_id".to_string())],
                "resolution=merge-duplicates,return=representation",
                &body,
            )
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("user {} after upsert", profile.chat_id)))
    }

    async fn get_user(&self, chat_id: i64) -> StoreResult<Option<User>> {
        let rows: Vec<User> = self
            .select("users", &[("chat_id", format!("eq.{}", chat_id))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn count_users(&self) -> StoreResult<i64> {
        let url = self.url(
            "users",
            &[("select", "chat_id".to_string()), ("limit", "1".to_string())],
        )?;
        let request = self
            .authorized(self.client.get(url))
            .header("Prefer", "count=exact");
        let resp = self.execute(request, true).await?;
        let range = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok());
        parse_total(range)
    }

    async fn set_referred_by_if_unset(&self, referred: i64, referrer: i64) -> StoreResult<bool> {
        if referred == referrer {
            return Ok(false);
        }
        let rows: Vec<User> = self
            .update(
                "users",
                &[
                    ("chat_id", format!("eq.{}", referred)),
                    ("referred_by", "is.null".to_string()),
                ],
                &json!({ "referred_by": referrer }),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn increment_invited_count(&self, chat_id: i64) -> StoreResult<()> {
        self.rpc("increment_invited_count", &json!({ "user_chat_id": chat_id }))
            .await?;
        Ok(())
    }

    async fn add_referral_balance(&self, chat_id: i64, amount: f64) -> StoreResult<()> {
        self.rpc(
            "add_referral_balance",
            &json!({ "user_chat_id": chat_id, "amount": amount }),
        )
        .await?;
        Ok(())
    }

    async fn find_active_subscription(&self, user_id: i64) -> StoreResult<Option<Subscription>> {
        let rows: Vec<Subscription> = self
            .select(
                "subscriptions",
                &[
                    ("user_id", format!("eq.{}", user_id)),
                    ("is_active", "eq.true".to_string()),
                    ("order", "expire_at.desc".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn subscriptions_for_user(&self, user_id: i64) -> StoreResult<Vec<Subscription>> {
        self.select(
            "subscriptions",
            &[
                ("user_id", format!("eq.{}", user_id)),
                ("order", "created_at.desc,id.desc".to_string()),
            ],
        )
        .await
    }

    async fn replace_active_subscription(
        &self,
        user_id: i64,
        plan_id: &str,
        expire_at: DateTime<Utc>,
    ) -> StoreResult<Subscription> {
        let resp = self
            .rpc(
                "replace_active_subscription",
                &json!({
                    "p_user_id": user_id,
                    "p_plan_id": plan_id,
                    "p_expire_at": timestamp(expire_at),
                }),
            )
            .await?;
        let rows: Vec<Subscription> = Self::decode(resp).await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("subscription for user {}", user_id)))
    }

    async fn set_subscription_expiry(
        &self,
        id: i64,
        expire_at: DateTime<Utc>,
    ) -> StoreResult<Option<Subscription>> {
        let rows: Vec<Subscription> = self
            .update(
                "subscriptions",
                &[
                    ("id", format!("eq.{}", id)),
                    ("is_active", "eq.true".to_string()),
                ],
                &json!({ "expire_at": timestamp(expire_at) }),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn deactivate_subscription(&self, id: i64) -> StoreResult<bool> {
        let rows: Vec<Subscription> = self
            .update(
                "subscriptions",
                &[
                    ("id", format!("eq.{}", id)),
                    ("is_active", "eq.true".to_string()),
                ],
                &json!({ "is_active": false }),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let rows: Vec<Subscription> = self
            .update(
                "subscriptions",
                &[
                    ("is_active", "eq.true".to_string()),
                    ("expire_at", format!("lte.{}", timestamp(now))),
                ],
                &json!({ "is_active": false }),
            )
            .await?;
        Ok(rows.len() as u64)
    }

    async fn expiring_subscriptions(
        &self,
        before: DateTime<Utc>,
    ) -> StoreResult<Vec<ExpiringSubscription>> {
        let rows: Vec<ExpiringRow> = self
            .select(
                "subscriptions",
                &[
                    ("select", "*,users(chat_id,first_name)".to_string()),
                    ("is_active", "eq.true".to_string()),
                    ("expire_at", format!("lt.{}", timestamp(before))),
                    ("order", "expire_at.asc".to_string()),
                ],
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let owner = row.users?;
                Some(ExpiringSubscription {
                    subscription: row.subscription,
                    chat_id: owner.chat_id,
                    first_name: owner.first_name,
                })
            })
            .collect())
    }

    async fn insert_payment(&self, payment: &NewPayment) -> StoreResult<Payment> {
        let body = json!({
            "user_id": payment.user_id,
            "amount": payment.amount,
            "currency": payment.currency,
            "charge_id": payment.charge_id,
            "provider_charge_id": payment.provider_charge_id,
            "plan_id": payment.plan_id,
            "status": PAYMENT_STATUS_COMPLETED,
        });
        let rows: Vec<Payment> = self
            .insert("payments", &[], "return=representation", &body)
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", payment.charge_id)))
    }

    async fn payment_by_charge_id(&self, charge_id: &str) -> StoreResult<Option<Payment>> {
        let rows: Vec<Payment> = self
            .select("payments", &[("charge_id", format!("eq.{}", charge_id))])
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn payments_for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Payment>> {
        self.select(
            "payments",
            &[
                ("user_id", format!("eq.{}", user_id)),
                ("order", "created_at.desc,id.desc".to_string()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ],
        )
        .await
    }

    async fn completed_payments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<Payment>> {
        self.select(
            "payments",
            &[
                ("status", format!("eq.{}", PAYMENT_STATUS_COMPLETED)),
                (
                    "and",
                    format!(
                        "(created_at.gte.{},created_at.lte.{})",
                        timestamp(from),
                        timestamp(to)
                    ),
                ),
                ("order", "created_at.asc".to_string()),
            ],
        )
        .await
    }

    async fn completed_total(&self) -> StoreResult<f64> {
        let rows: Vec<AmountRow> = self
            .select(
                "payments",
                &[
                    ("select", "amount".to_string()),
                    ("status", format!("eq.{}", PAYMENT_STATUS_COMPLETED)),
                ],
            )
            .await?;
        Ok(rows.iter().map(|r| r.amount).sum())
    }

    async fn insert_referral(
        &self,
        referrer_id: i64,
        referred_id: i64,
        reward_amount: f64,
    ) -> StoreResult<Referral> {
        let body = json!({
            "referrer_id": referrer_id,
            "referred_id": referred_id,
            "reward_amount": reward_amount,
        });
        let rows: Vec<Referral> = self
            .insert("referrals", &[], "return=representation", &body)
            .await?;
        rows.into_iter().next().ok_or_else(|| {
            StoreError::NotFound(format!("referral {} -> {}", referrer_id, referred_id))
        })
    }

    async fn referrals_by_referrer(&self, referrer_id: i64) -> StoreResult<Vec<Referral>> {
        self.select(
            "referrals",
            &[
                ("referrer_id", format!("eq.{}", referrer_id)),
                ("order", "created_at.desc".to_string()),
            ],
        )
        .await
    }

    async fn mark_referral_paid(&self, referrer_id: i64, referred_id: i64) -> StoreResult<bool> {
        let rows: Vec<Referral> = self
            .update(
                "referrals",
                &[
                    ("referrer_id", format!("eq.{}", referrer_id)),
                    ("referred_id", format!("eq.{}", referred_id)),
                    ("is_paid", "eq.false".to_string()),
                ],
                &json!({ "is_paid": true }),
            )
            .await?;
        Ok(!rows.is_empty())
    }
}

/// Total row count from a PostgREST `content-range` header such as `0-0/42`.
fn parse_total(content_range: Option<&str>) -> StoreResult<i64> {
    let range = content_range.ok_or_else(|| {
        StoreError::Malformed("count requested but content-range is missing".to_string())
    })?;
    range
        .rsplit_once('/')
        .and_then(|(_, total)| total.parse::<i64>().ok())
        .ok_or_else(|| StoreError::Malformed(format!("unparseable content-range {:?}", range)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_encodes_filters() {
        let store = RestStore::new("https://project.supabase.co/", "key").unwrap();
        let url = store
            .url(
                "subscriptions",
                &[("expire_at", "lt.2025-01-01T00:00:00.000000Z".to_string())],
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://project.supabase.co/rest/v1/subscriptions?expire_at=lt.2025-01-01T00%3A00%3A00.000000Z"
        );
    }

    #[test]
    fn test_count_comes_from_content_range() {
        assert_eq!(parse_total(Some("0-0/42")).unwrap(), 42);
        assert_eq!(parse_total(Some("*/0")).unwrap(), 0);
        assert!(matches!(parse_total(None), Err(StoreError::Malformed(_))));
        assert!(matches!(parse_total(Some("0-0/*")), Err(StoreError::Malformed(_))));
        assert!(matches!(parse_total(Some("0-24")), Err(StoreError::Malformed(_))));
    }

    #[test]
    fn test_expiring_row_decodes_embedded_owner() {
        let raw = r#"[{
            "id": 3, "user_id": 1001, "plan_id": "1_month",
            "expire_at": "2025-05-01T10:00:00+00:00", "is_active": true,
            "created_at": "2025-04-01T10:00:00+00:00",
            "users": {"chat_id": 1001, "first_name": "Ivan"}
        }]"#;
        let rows: Vec<ExpiringRow> = serde_json::from_str(raw).unwrap();
        assert_eq!(rows[0].subscription.plan_id, "1_month");
        assert_eq!(rows[0].users.as_ref().unwrap().chat_id, 1001);
    }
}
