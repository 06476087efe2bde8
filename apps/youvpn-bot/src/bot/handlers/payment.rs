use teloxide::prelude::*;
use teloxide::types::{ParseMode, PreCheckoutQuery};
use tracing::{error, info, warn};

use crate::bot::handlers::{currency_code, profile_of};
use crate::bot::keyboards::main_menu;
use crate::bot::texts;
use crate::services::pay_service::{FinalizeOutcome, PaymentConfirmation};
use crate::AppState;

pub async fn pre_checkout_handler(
    bot: Bot,
    q: PreCheckoutQuery,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    // an unreadable code fails the currency check below
    let currency = currency_code(&q.currency).unwrap_or_default();
    match state
        .pay_service
        .pre_authorize(&q.invoice_payload, q.total_amount as i64, &currency)
    {
        Ok(_) => {
            bot.answer_pre_checkout_query(q.id, true).await?;
        }
        Err(e) => {
            warn!(
                "Rejected pre-checkout from {} ({} {}): {}",
                q.from.id.0, q.total_amount, currency, e
            );
            bot.answer_pre_checkout_query(q.id, false)
                .error_message(e.rejection_reason())
                .await?;
        }
    }
    Ok(())
}

pub async fn successful_payment_handler(
    bot: Bot,
    msg: Message,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    let Some(payment) = msg.successful_payment() else {
        return Ok(());
    };

    // The payer may never have pressed /start in this chat.
    if let Some(from) = msg.from.as_ref() {
        if let Err(e) = state.users.touch(&profile_of(from)).await {
            warn!("Failed to upsert payer {}: {}", from.id.0, e);
        }
    }

    let confirmation = PaymentConfirmation {
        charge_id: payment.telegram_payment_charge_id.0.clone(),
        provider_charge_id: Some(payment.provider_payment_charge_id.clone())
            .filter(|id| !id.is_empty()),
        payload: payment.invoice_payload.clone(),
        total_amount: payment.total_amount as i64,
        currency: currency_code(&payment.currency).unwrap_or_default(),
    };

    match state.pay_service.finalize(&confirmation).await {
        Ok(FinalizeOutcome::Activated {
            user_id,
            plan,
            subscription,
        }) => {
            info!(
                "Payment {} for {} by user {} processed",
                confirmation.charge_id, plan.id, user_id
            );
            bot.send_message(
                msg.chat.id,
                texts::payment_success(
                    &plan,
                    state.pricing.rail(),
                    subscription.expire_at,
                    user_id,
                ),
            )
            .parse_mode(ParseMode::Html)
            .reply_markup(main_menu())
            .await?;
        }
        Ok(FinalizeOutcome::AlreadyProcessed { charge_id }) => {
            info!("Ignoring repeated confirmation for charge {}", charge_id);
            bot.send_message(msg.chat.id, texts::PAYMENT_ALREADY_PROCESSED)
                .await?;
        }
        Err(e) if e.is_validation() => {
            error!(
                "Confirmed payment {} failed validation: {}",
                confirmation.charge_id, e
            );
            bot.send_message(msg.chat.id, texts::PAYMENT_ERROR).await?;
        }
        Err(e) => {
            error!(
                "Failed to apply payment {}: {}",
                confirmation.charge_id, e
            );
            bot.send_message(msg.chat.id, texts::PAYMENT_ERROR).await?;
        }
    }
    Ok(())
}
