use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{debug, error, info, warn};

use crate::bot::handlers::{payment, profile_of};
use crate::bot::keyboards::{back_keyboard, main_menu};
use crate::bot::texts;
use crate::AppState;

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    if msg.successful_payment().is_some() {
        return payment::successful_payment_handler(bot, msg, state).await;
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };

    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let argument = parts.next().unwrap_or_default();

    // "/start@bot_name" in groups
    match command.split('@').next().unwrap_or_default() {
        "/start" | "/menu" => start(bot, msg.clone(), state, argument).await,
        _ => {
            debug!("Ignoring message in chat {}", msg.chat.id.0);
            Ok(())
        }
    }
}

async fn start(
    bot: Bot,
    msg: Message,
    state: AppState,
    start_param: &str,
) -> Result<(), teloxide::RequestError> {
    let Some(from) = msg.from.as_ref() else {
        return Ok(());
    };
    let profile = profile_of(from);
    let user_id = profile.chat_id;

    if let Err(e) = state.users.touch(&profile).await {
        error!("Failed to upsert user {} on /start: {}", user_id, e);
        bot.send_message(msg.chat.id, texts::START_ERROR)
            .reply_markup(back_keyboard())
            .await?;
        return Ok(());
    }

    if let Some(referrer) = texts::extract_referral_code(start_param) {
        match state.referrals.claim(user_id, referrer).await {
            Ok(true) => info!("User {} attributed to referrer {}", user_id, referrer),
            Ok(false) => debug!("Referral {} -> {} not applied", referrer, user_id),
            Err(e) => warn!("Referral claim {} -> {} failed: {}", referrer, user_id, e),
        }
    }

    let status = match state.subscriptions.status(user_id).await {
        Ok(status) => status,
        Err(e) => {
            error!("Failed to load subscription of user {}: {}", user_id, e);
            bot.send_message(msg.chat.id, texts::START_ERROR)
                .reply_markup(back_keyboard())
                .await?;
            return Ok(());
        }
    };

    let name = texts::display_name(Some(from.first_name.as_str()), from.username.as_deref());
    bot.send_message(
        msg.chat.id,
        texts::account_summary(&name, &status, state.config.referral_reward),
    )
    .parse_mode(ParseMode::Html)
    .reply_markup(main_menu())
    .await?;

    info!("User {} started the bot", user_id);
    Ok(())
}
