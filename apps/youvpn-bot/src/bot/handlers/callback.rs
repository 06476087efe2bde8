use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, LabeledPrice, MessageId};
use tracing::{error, info, warn};

use crate::bot::handlers::show;
use crate::bot::keyboards::{
    back_keyboard, invite_keyboard, main_menu, payment_keyboard, referral_link,
    subscription_keyboard,
};
use crate::bot::texts;
use crate::services::pay_service::PaymentError;
use crate::AppState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    ConnectVpn,
    Extend,
    Invite,
    About,
    Help,
    Reviews,
    Website,
    MainMenu,
    Cancel,
    Buy(String),
    Unknown(String),
}

impl Action {
    pub fn parse(data: &str) -> Self {
        match data {
            "connect_vpn" => Action::ConnectVpn,
            "extend" => Action::Extend,
            "invite" => Action::Invite,
            "about" => Action::About,
            "help" => Action::Help,
            "reviews" => Action::Reviews,
            "website" => Action::Website,
            "main_menu" | "back" => Action::MainMenu,
            "cancel" => Action::Cancel,
            other => match other.strip_prefix("buy_") {
                Some(plan) if !plan.is_empty() => Action::Buy(plan.to_string()),
                _ => Action::Unknown(other.to_string()),
            },
        }
    }
}

/// Invoice text can't be edited, so the invoice is deleted and a fresh message sent.
async fn dismiss_invoice(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot.delete_message(chat_id, message_id).await {
        warn!("Failed to delete invoice {} in {}: {}", message_id.0, chat_id.0, e);
    }
    bot.send_message(chat_id, texts::CANCELLED)
        .reply_markup(back_keyboard())
        .await?;
    Ok(())
}

pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    let callback_id = q.id.clone();
    let user_id = q.from.id.0 as i64;

    let (Some(data), Some(message)) = (q.data.as_deref(), q.message.as_ref()) else {
        bot.answer_callback_query(callback_id).await?;
        return Ok(());
    };
    let chat_id = message.chat().id;
    let message_id = message.id();

    match Action::parse(data) {
        Action::ConnectVpn => {
            let text = match state.subscriptions.get_active(user_id).await {
                Ok(Some(_)) => texts::connect_active(user_id, &state.config.support_username),
                Ok(None) => texts::connect_inactive(),
                Err(e) => {
                    error!("Failed to load subscription of user {}: {}", user_id, e);
                    bot.answer_callback_query(callback_id)
                        .text(texts::GENERIC_ERROR)
                        .await?;
                    return Ok(());
                }
            };
            show(&bot, chat_id, message_id, text, subscription_keyboard(&state.pricing)).await;
        }

        Action::Extend => {
            show(
                &bot,
                chat_id,
                message_id,
                texts::extend(),
                subscription_keyboard(&state.pricing),
            )
            .await;
        }

        Action::Invite => {
            let stats = match state.referrals.stats(user_id).await {
                Ok(stats) => stats,
                Err(e) => {
                    error!("Failed to load referral stats of user {}: {}", user_id, e);
                    bot.answer_callback_query(callback_id)
                        .text(texts::GENERIC_ERROR)
                        .await?;
                    return Ok(());
                }
            };
            let link = referral_link(&state.bot_username, user_id);
            show(
                &bot,
                chat_id,
                message_id,
                texts::invite(&stats, &link, state.config.referral_reward),
                invite_keyboard(&link),
            )
            .await;
        }

        Action::About => {
            show(&bot, chat_id, message_id, texts::about(), back_keyboard()).await;
        }

        Action::Help => {
            let text = texts::help(&state.config.support_username, state.config.referral_reward);
            show(&bot, chat_id, message_id, text, back_keyboard()).await;
        }

        Action::Reviews => {
            let text = texts::reviews(&state.config.support_username);
            show(&bot, chat_id, message_id, text, back_keyboard()).await;
        }

        Action::Website => {
            let text = texts::website(&state.config.website_url);
            show(&bot, chat_id, message_id, text, back_keyboard()).await;
        }

        Action::MainMenu => {
            let status = match state.subscriptions.status(user_id).await {
                Ok(status) => status,
                Err(e) => {
                    error!("Failed to load subscription of user {}: {}", user_id, e);
                    bot.answer_callback_query(callback_id)
                        .text(texts::GENERIC_ERROR)
                        .await?;
                    return Ok(());
                }
            };
            let name = texts::display_name(
                Some(q.from.first_name.as_str()),
                q.from.username.as_deref(),
            );
            let text = texts::account_summary(&name, &status, state.config.referral_reward);
            show(&bot, chat_id, message_id, text, main_menu()).await;
        }

        Action::Cancel => {
            dismiss_invoice(&bot, chat_id, message_id).await?;
            info!("User {} cancelled an invoice", user_id);
        }

        Action::Buy(plan_id) => {
            let invoice = match state.pay_service.invoice_for(&plan_id, user_id) {
                Ok(invoice) => invoice,
                Err(PaymentError::UnknownPlan(_)) => {
                    warn!("User {} asked for unknown plan {}", user_id, plan_id);
                    bot.answer_callback_query(callback_id)
                        .text(texts::UNKNOWN_PLAN)
                        .await?;
                    return Ok(());
                }
                Err(e) => {
                    error!("Failed to build invoice for user {}: {}", user_id, e);
                    bot.answer_callback_query(callback_id)
                        .text(texts::INVOICE_ERROR)
                        .await?;
                    return Ok(());
                }
            };

            let Ok(amount) = u32::try_from(invoice.amount) else {
                error!("Invoice amount {} out of range for {}", invoice.amount, plan_id);
                bot.answer_callback_query(callback_id)
                    .text(texts::INVOICE_ERROR)
                    .await?;
                return Ok(());
            };
            let prices = vec![LabeledPrice {
                label: invoice.label.clone(),
                amount,
            }];

            let mut request = bot
                .send_invoice(
                    chat_id,
                    invoice.title,
                    invoice.description,
                    invoice.payload,
                    invoice.currency,
                    prices,
                )
                .reply_markup(payment_keyboard());
            if let Some(token) = invoice.provider_token {
                request = request.provider_token(token);
            }

            if let Err(e) = request.await {
                error!("Failed to send invoice to user {}: {}", user_id, e);
                bot.answer_callback_query(callback_id)
                    .text(texts::INVOICE_ERROR)
                    .await?;
                return Ok(());
            }
            info!("Sent invoice for {} to user {}", plan_id, user_id);
        }

        Action::Unknown(data) => {
            warn!("Unknown callback {:?} from user {}", data, user_id);
            bot.answer_callback_query(callback_id)
                .text(texts::UNKNOWN_ACTION)
                .await?;
            return Ok(());
        }
    }

    bot.answer_callback_query(callback_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::InlineKeyboardButtonKind;

    #[test]
    fn test_parse_routes() {
        assert_eq!(Action::parse("connect_vpn"), Action::ConnectVpn);
        assert_eq!(Action::parse("back"), Action::MainMenu);
        assert_eq!(Action::parse("main_menu"), Action::MainMenu);
        assert_eq!(Action::parse("buy_12_months"), Action::Buy("12_months".to_string()));
        assert_eq!(Action::parse("buy_"), Action::Unknown("buy_".to_string()));
        assert_eq!(Action::parse("refund"), Action::Unknown("refund".to_string()));
    }

    #[test]
    fn test_invoice_buttons_route_to_cancel() {
        let markup = payment_keyboard();
        let actions: Vec<Action> = markup
            .inline_keyboard
            .iter()
            .flatten()
            .filter_map(|b| match &b.kind {
                InlineKeyboardButtonKind::CallbackData(data) => Some(Action::parse(data)),
                _ => None,
            })
            .collect();
        assert_eq!(actions, vec![Action::Cancel]);
    }
}
