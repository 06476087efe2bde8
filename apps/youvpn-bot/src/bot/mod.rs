use teloxide::{dptree, prelude::*, types::Update};
use tracing::{error, info};

use crate::AppState;

pub mod handlers;
pub mod keyboards;
pub mod texts;

pub async fn run_bot(
    bot: Bot,
    mut shutdown_signal: tokio::sync::broadcast::Receiver<()>,
    mut state: AppState,
) {
    info!("Starting bot dispatcher...");

    std::panic::set_hook(Box::new(|info| {
        error!("Bot panic: {}", info);
    }));

    match bot.get_me().await {
        Ok(me) => {
            if let Some(username) = me.username.clone() {
                state.bot_username = username;
            }
            info!("Bot connected as @{}", state.bot_username);
        }
        Err(e) => {
            error!("Bot failed to connect to Telegram: {}", e);
            return;
        }
    }

    let message_handler = Update::filter_message().endpoint(handlers::command::message_handler);
    let callback_handler =
        Update::filter_callback_query().endpoint(handlers::callback::callback_handler);
    let pre_checkout_handler =
        Update::filter_pre_checkout_query().endpoint(handlers::payment::pre_checkout_handler);

    let mut dispatcher = Dispatcher::builder(
        bot,
        dptree::entry()
            .branch(message_handler)
            .branch(callback_handler)
            .branch(pre_checkout_handler),
    )
    .dependencies(dptree::deps![state])
    .default_handler(|upd: std::sync::Arc<Update>| async move {
        info!("Unhandled update: {:?}", upd.id);
    })
    .build();

    tokio::select! {
        _ = dispatcher.dispatch() => {
            info!("Bot dispatcher exited");
        }
        _ = shutdown_signal.recv() => {
            info!("Bot received shutdown signal, stopping...");
        }
    }
}
