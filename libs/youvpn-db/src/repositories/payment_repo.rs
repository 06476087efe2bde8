use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::{LedgerError, LedgerResult};
use crate::models::{NewPayment, Payment};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Recorded(Payment),
    /// The charge id was already in the ledger.
    Duplicate,
}

#[derive(Clone)]
pub struct PaymentRepository {
    store: Arc<dyn Store>,
}

impl PaymentRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        user_id: i64,
        amount: f64,
        currency: &str,
        charge_id: &str,
        provider_charge_id: Option<&str>,
        plan_id: &str,
    ) -> LedgerResult<RecordOutcome> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let new_payment = NewPayment {
            user_id,
            amount,
            currency: currency.to_string(),
            charge_id: charge_id.to_string(),
            provider_charge_id: provider_charge_id
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            plan_id: plan_id.to_string(),
        };

        match self.store.insert_payment(&new_payment).await {
            Ok(payment) => {
                info!(
                    "Recorded payment {} for user {}: {} {} ({})",
                    payment.charge_id, user_id, amount, currency, plan_id
                );
                Ok(RecordOutcome::Recorded(payment))
            }
            Err(StoreError::Conflict(detail)) => {
                warn!("Payment {} already recorded: {}", charge_id, detail);
                Ok(RecordOutcome::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Most recent first.
    pub async fn for_user(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> LedgerResult<Vec<Payment>> {
        Ok(self.store.payments_for_user(user_id, limit, offset).await?)
    }

    pub async fn by_charge_id(&self, charge_id: &str) -> LedgerResult<Option<Payment>> {
        Ok(self.store.payment_by_charge_id(charge_id).await?)
    }

    pub async fn payments_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> LedgerResult<Vec<Payment>> {
        Ok(self.store.completed_payments_between(from, to).await?)
    }

    pub async fn revenue_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> LedgerResult<f64> {
        let payments = self.payments_between(from, to).await?;
        Ok(payments.iter().map(|p| p.amount).sum())
    }

    pub async fn total_revenue(&self) -> LedgerResult<f64> {
        Ok(self.store.completed_total().await?)
    }
}
