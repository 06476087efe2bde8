use std::sync::Arc;

use youvpn_db::repositories::{ReferralRepository, SubscriptionRepository, UserRepository};
use youvpn_shared::PricingTable;

use crate::config::BotConfig;
use crate::services::pay_service::PayService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BotConfig>,
    pub pricing: Arc<PricingTable>,
    pub users: UserRepository,
    pub subscriptions: SubscriptionRepository,
    pub referrals: ReferralRepository,
    pub pay_service: PayService,
    pub bot_username: String,
}
