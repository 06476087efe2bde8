use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use teloxide::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use youvpn_db::repositories::{
    PaymentRepository, ReferralRepository, SubscriptionRepository, UserRepository,
};
use youvpn_db::store::{PgStore, RestStore};
use youvpn_db::Store;
use youvpn_shared::PricingTable;

mod bot;
mod config;
mod services;
mod state;

use crate::config::{BotConfig, StoreConfig};
use crate::services::expiry_service::ExpiryService;
use crate::services::notification_service::TelegramNotifier;
use crate::services::pay_service::PayService;
pub use crate::state::AppState;

async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn Store>> {
    Ok(match config {
        StoreConfig::Postgres { url } => {
            let pool = youvpn_db::db::connect(url).await?;
            tracing::info!("Using PostgreSQL store");
            Arc::new(PgStore::new(pool))
        }
        StoreConfig::Rest { url, key } => {
            let store = RestStore::new(url.clone(), key.clone())
                .context("Failed to build Supabase client")?;
            tracing::info!("Using Supabase store at {}", url);
            Arc::new(store)
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "youvpn_bot=info,youvpn_db=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting YouVPN bot...");

    let config = Arc::new(BotConfig::from_env().context("Invalid configuration")?);
    tracing::info!("Payment rail: {:?}", config.rail);

    let store = connect_store(&config.store).await?;

    let users = UserRepository::new(store.clone());
    let subscriptions = SubscriptionRepository::new(store.clone());
    let payments = PaymentRepository::new(store.clone());
    let referrals = ReferralRepository::new(store.clone());

    let user_count = users
        .count()
        .await
        .context("Store connectivity check failed")?;
    tracing::info!("Store reachable, {} users registered", user_count);

    let pricing = Arc::new(PricingTable::for_rail(config.rail));
    let pay_service = PayService::new(
        pricing.clone(),
        subscriptions.clone(),
        payments,
        config.payment_token.clone(),
    );

    let bot = Bot::new(config.bot_token.clone());

    let expiry = ExpiryService::new(
        subscriptions.clone(),
        Arc::new(TelegramNotifier::new(bot.clone())),
        config.sweep_interval,
        config.retry_interval,
    );
    tokio::spawn(expiry.run());

    let state = AppState {
        config: config.clone(),
        pricing,
        users,
        subscriptions,
        referrals,
        pay_service,
        bot_username: "youvpn_bot".to_string(),
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(());
        }
    });

    bot::run_bot(bot, shutdown_rx, state).await;
    tracing::info!("Bot stopped");
    Ok(())
}
