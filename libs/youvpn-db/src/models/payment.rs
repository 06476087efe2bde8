use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const PAYMENT_STATUS_COMPLETED: &str = "completed";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub id: i64,
    pub user_id: i64,
    pub amount: f64,
    pub currency: String,
    pub charge_id: String,
    pub provider_charge_id: Option<String>,
    pub plan_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPayment {
    pub user_id: i64,
    pub amount: f64,
    pub currency: String,
    pub charge_id: String,
    pub provider_charge_id: Option<String>,
    pub plan_id: String,
}
