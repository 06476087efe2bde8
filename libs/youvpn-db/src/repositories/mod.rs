pub mod payment_repo;
pub mod referral_repo;
pub mod subscription_repo;
pub mod user_repo;

pub use payment_repo::{PaymentRepository, RecordOutcome};
pub use referral_repo::{ReferralRepository, ReferralStats};
pub use subscription_repo::{ActiveLookup, EXTENSION_PLAN_ID, SubscriptionRepository};
pub use user_repo::UserRepository;

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid amount: {0}")]
    InvalidAmount(f64),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
