use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};
use youvpn_db::models::Subscription;
use youvpn_db::repositories::{
    LedgerError, PaymentRepository, RecordOutcome, SubscriptionRepository,
};
use youvpn_shared::{InvoicePayload, PayloadError, Plan, PricingError, PricingTable};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("unknown plan {0}")]
    UnknownPlan(String),
    #[error("malformed invoice payload: {0}")]
    MalformedPayload(#[from] PayloadError),
    #[error("amount mismatch: expected {expected}, got {actual}")]
    AmountMismatch { expected: i64, actual: i64 },
    #[error("currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch { expected: String, actual: String },
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl From<PricingError> for PaymentError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::UnknownPlan(id) => PaymentError::UnknownPlan(id),
        }
    }
}

impl PaymentError {
    /// Problems with the payment itself, as opposed to our own failures.
    pub fn is_validation(&self) -> bool {
        !matches!(self, PaymentError::Ledger(_))
    }

    /// Text shown to the payer by the gateway.
    pub fn rejection_reason(&self) -> &'static str {
        match self {
            PaymentError::UnknownPlan(_) => "Неверный тип подписки",
            PaymentError::MalformedPayload(_) => "Неверный формат payload",
            PaymentError::AmountMismatch { .. } => "Неверная сумма платежа",
            PaymentError::CurrencyMismatch { .. } => "Неверная валюта платежа",
            PaymentError::Ledger(_) => "Внутренняя ошибка сервера",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invoice {
    pub title: String,
    pub description: String,
    pub label: String,
    pub payload: String,
    pub currency: &'static str,
    /// Minor units.
    pub amount: i64,
    pub provider_token: Option<String>,
}

/// What the gateway reports once money has moved.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub charge_id: String,
    pub provider_charge_id: Option<String>,
    pub payload: String,
    pub total_amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    Activated {
        user_id: i64,
        plan: Plan,
        subscription: Subscription,
    },
    AlreadyProcessed {
        charge_id: String,
    },
}

#[derive(Clone)]
pub struct PayService {
    pricing: Arc<PricingTable>,
    subscriptions: SubscriptionRepository,
    payments: PaymentRepository,
    provider_token: Option<String>,
}

impl PayService {
    pub fn new(
        pricing: Arc<PricingTable>,
        subscriptions: SubscriptionRepository,
        payments: PaymentRepository,
        provider_token: Option<String>,
    ) -> Self {
        Self {
            pricing,
            subscriptions,
            payments,
            provider_token,
        }
    }

    pub fn invoice_for(&self, plan_id: &str, user_id: i64) -> Result<Invoice, PaymentError> {
        let plan = self.pricing.get(plan_id)?;
        let rail = self.pricing.rail();

        Ok(Invoice {
            title: format!("YouVPN - {}", plan.title),
            description: format!(
                "Подписка YouVPN на {} дней\nБезлимитный трафик, высокая скорость, серверы в 50+ странах",
                plan.days
            ),
            label: plan.title.to_string(),
            payload: InvoicePayload::new(plan.id, user_id).encode(),
            currency: rail.currency(),
            amount: plan.minor_amount(rail),
            provider_token: self.provider_token.clone(),
        })
    }

    fn validate(
        &self,
        raw_payload: &str,
        total_amount: i64,
        currency: &str,
    ) -> Result<(InvoicePayload, Plan), PaymentError> {
        let payload = InvoicePayload::decode(raw_payload)?;
        let plan = self.pricing.get(&payload.plan)?.clone();

        let expected = plan.minor_amount(self.pricing.rail());
        if total_amount != expected {
            return Err(PaymentError::AmountMismatch {
                expected,
                actual: total_amount,
            });
        }

        let expected_currency = self.pricing.rail().currency();
        if !currency.eq_ignore_ascii_case(expected_currency) {
            return Err(PaymentError::CurrencyMismatch {
                expected: expected_currency.to_string(),
                actual: currency.to_string(),
            });
        }

        Ok((payload, plan))
    }

    /// Checks run before the gateway charges the payer.
    pub fn pre_authorize(
        &self,
        raw_payload: &str,
        total_amount: i64,
        currency: &str,
    ) -> Result<InvoicePayload, PaymentError> {
        let (payload, plan) = self.validate(raw_payload, total_amount, currency)?;
        info!("Pre-checkout OK for user {}, plan {}", payload.user, plan.id);
        Ok(payload)
    }

    /// Applies a confirmed payment. The user and plan come from the payload only.
    /// Replaying a charge that is already recorded changes nothing.
    pub async fn finalize(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<FinalizeOutcome, PaymentError> {
        let (payload, plan) = self.validate(
            &confirmation.payload,
            confirmation.total_amount,
            &confirmation.currency,
        )?;

        if self
            .payments
            .by_charge_id(&confirmation.charge_id)
            .await?
            .is_some()
        {
            info!("Charge {} already processed", confirmation.charge_id);
            return Ok(FinalizeOutcome::AlreadyProcessed {
                charge_id: confirmation.charge_id.clone(),
            });
        }

        let expire_at = Utc::now() + Duration::days(plan.days);
        let subscription = self
            .subscriptions
            .create_or_renew(payload.user, plan.id, expire_at)
            .await?;

        let amount =
            confirmation.total_amount as f64 / self.pricing.rail().minor_units() as f64;
        let outcome = self
            .payments
            .record(
                payload.user,
                amount,
                &confirmation.currency,
                &confirmation.charge_id,
                confirmation.provider_charge_id.as_deref(),
                plan.id,
            )
            .await?;

        match outcome {
            RecordOutcome::Recorded(_) => {
                info!(
                    "Payment {} activated {} for user {} until {}",
                    confirmation.charge_id, plan.id, payload.user, subscription.expire_at
                );
                Ok(FinalizeOutcome::Activated {
                    user_id: payload.user,
                    plan,
                    subscription,
                })
            }
            RecordOutcome::Duplicate => {
                warn!(
                    "Charge {} was recorded concurrently for user {}",
                    confirmation.charge_id, payload.user
                );
                Ok(FinalizeOutcome::AlreadyProcessed {
                    charge_id: confirmation.charge_id.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use youvpn_db::models::UserProfile;
    use youvpn_db::store::MemoryStore;
    use youvpn_db::Store;
    use youvpn_shared::Rail;

    struct Fixture {
        store: Arc<MemoryStore>,
        service: PayService,
        subscriptions: SubscriptionRepository,
        payments: PaymentRepository,
    }

    async fn fixture(rail: Rail) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.upsert_user(&UserProfile::new(1001)).await.unwrap();
        let subscriptions = SubscriptionRepository::new(store.clone());
        let payments = PaymentRepository::new(store.clone());
        let token = match rail {
            Rail::Stars => None,
            Rail::Provider => Some("provider-token".to_string()),
        };
        let service = PayService::new(
            Arc::new(PricingTable::for_rail(rail)),
            subscriptions.clone(),
            payments.clone(),
            token,
        );
        Fixture {
            store,
            service,
            subscriptions,
            payments,
        }
    }

    fn confirmation(charge_id: &str, plan: &str, user: i64, amount: i64) -> PaymentConfirmation {
        PaymentConfirmation {
            charge_id: charge_id.to_string(),
            provider_charge_id: None,
            payload: InvoicePayload::new(plan, user).encode(),
            total_amount: amount,
            currency: "XTR".to_string(),
        }
    }

    #[tokio::test]
    async fn test_invoice_for_stars_plan() {
        let f = fixture(Rail::Stars).await;
        let invoice = f.service.invoice_for("3_months", 1001).unwrap();

        assert_eq!(invoice.currency, "XTR");
        assert_eq!(invoice.amount, 600);
        assert_eq!(invoice.provider_token, None);
        assert_eq!(
            InvoicePayload::decode(&invoice.payload).unwrap(),
            InvoicePayload::new("3_months", 1001)
        );
        assert!(matches!(
            f.service.invoice_for("2_weeks", 1001),
            Err(PaymentError::UnknownPlan(_))
        ));
    }

    #[tokio::test]
    async fn test_invoice_for_provider_plan_uses_minor_units() {
        let f = fixture(Rail::Provider).await;
        let invoice = f.service.invoice_for("1_month", 1001).unwrap();
        assert_eq!(invoice.currency, "RUB");
        assert_eq!(invoice.amount, 50_000);
        assert_eq!(invoice.provider_token.as_deref(), Some("provider-token"));
    }

    #[tokio::test]
    async fn test_pre_authorize_checks() {
        let f = fixture(Rail::Stars).await;
        let payload = InvoicePayload::new("6_months", 1001).encode();

        assert!(f.service.pre_authorize(&payload, 1000, "XTR").is_ok());
        assert!(f
            .service
            .pre_authorize("subscription_6_months_1001", 1000, "XTR")
            .is_ok());

        let err = f.service.pre_authorize(&payload, 999, "XTR").unwrap_err();
        assert!(matches!(err, PaymentError::AmountMismatch { expected: 1000, actual: 999 }));
        assert_eq!(err.rejection_reason(), "Неверная сумма платежа");

        let err = f.service.pre_authorize(&payload, 1000, "RUB").unwrap_err();
        assert!(matches!(err, PaymentError::CurrencyMismatch { .. }));
        let err = f.service.pre_authorize(&payload, 1000, "").unwrap_err();
        assert!(matches!(err, PaymentError::CurrencyMismatch { .. }));
        assert!(f.service.pre_authorize(&payload, 1000, "xtr").is_ok());

        let err = f.service.pre_authorize("garbage", 1000, "XTR").unwrap_err();
        assert!(matches!(err, PaymentError::MalformedPayload(_)));
        assert!(err.is_validation());

        let unknown = InvoicePayload::new("lifetime", 1001).encode();
        let err = f.service.pre_authorize(&unknown, 1000, "XTR").unwrap_err();
        assert!(matches!(err, PaymentError::UnknownPlan(_)));
    }

    #[tokio::test]
    async fn test_finalize_then_extend() {
        let f = fixture(Rail::Stars).await;
        let before = Utc::now();

        let outcome = f
            .service
            .finalize(&confirmation("tg_charge_1", "3_months", 1001, 600))
            .await
            .unwrap();
        let FinalizeOutcome::Activated { user_id, plan, subscription } = outcome else {
            panic!("expected activation");
        };
        assert_eq!(user_id, 1001);
        assert_eq!(plan.id, "3_months");
        assert!(subscription.expire_at >= before + Duration::days(90));
        assert!(subscription.expire_at <= Utc::now() + Duration::days(90));

        let recorded = f.payments.by_charge_id("tg_charge_1").await.unwrap().unwrap();
        assert_eq!(recorded.amount, 600.0);
        assert_eq!(recorded.plan_id, "3_months");
        assert_eq!(recorded.currency, "XTR");

        let extended = f.subscriptions.extend(1001, 30).await.unwrap();
        assert_eq!(extended.expire_at, subscription.expire_at + Duration::days(30));
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent_per_charge() {
        let f = fixture(Rail::Stars).await;
        let c = confirmation("tg_charge_1", "1_month", 1001, 250);

        f.service.finalize(&c).await.unwrap();
        let first = f.subscriptions.get_active(1001).await.unwrap().unwrap();

        let again = f.service.finalize(&c).await.unwrap();
        assert_eq!(
            again,
            FinalizeOutcome::AlreadyProcessed {
                charge_id: "tg_charge_1".to_string()
            }
        );

        let history = f.subscriptions.history(1001).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(f.subscriptions.get_active(1001).await.unwrap().unwrap(), first);
        assert_eq!(f.payments.for_user(1001, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_rejects_before_mutation() {
        let f = fixture(Rail::Stars).await;

        let err = f
            .service
            .finalize(&confirmation("c1", "3_months", 1001, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::AmountMismatch { .. }));

        let mut malformed = confirmation("c2", "3_months", 1001, 600);
        malformed.payload = "subscription_3_months_abc".to_string();
        assert!(f.service.finalize(&malformed).await.is_err());

        assert!(f.subscriptions.history(1001).await.unwrap().is_empty());
        assert!(f.payments.for_user(1001, 10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_finalize_provider_amount_in_major_units() {
        let f = fixture(Rail::Provider).await;
        let mut c = confirmation("c1", "1_month", 1001, 50_000);
        c.currency = "RUB".to_string();
        c.provider_charge_id = Some("prov_1".to_string());

        f.service.finalize(&c).await.unwrap();

        let payment = f.payments.by_charge_id("c1").await.unwrap().unwrap();
        assert_eq!(payment.amount, 500.0);
        assert_eq!(payment.provider_charge_id.as_deref(), Some("prov_1"));
    }

    #[tokio::test]
    async fn test_store_failure_is_not_validation() {
        let f = fixture(Rail::Stars).await;
        f.store.set_unavailable(true);

        let err = f
            .service
            .finalize(&confirmation("c1", "1_month", 1001, 250))
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Ledger(_)));
        assert!(!err.is_validation());
        assert_eq!(err.rejection_reason(), "Внутренняя ошибка сервера");
    }
}
