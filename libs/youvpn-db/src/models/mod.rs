pub mod payment;
pub mod referral;
pub mod subscription;
pub mod user;

pub use payment::{NewPayment, PAYMENT_STATUS_COMPLETED, Payment};
pub use referral::Referral;
pub use subscription::{ExpiringSubscription, Subscription, SubscriptionStatus};
pub use user::{User, UserProfile};
