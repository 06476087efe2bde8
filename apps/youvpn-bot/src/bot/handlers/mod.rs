use serde::Serialize;
use serde_json::Value;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, MessageId, ParseMode, User};
use tracing::debug;
use youvpn_db::models::UserProfile;

pub mod callback;
pub mod command;
pub mod payment;

pub fn profile_of(user: &User) -> UserProfile {
    UserProfile {
        chat_id: user.id.0 as i64,
        username: user.username.clone(),
        first_name: Some(user.first_name.clone()),
        last_name: user.last_name.clone(),
    }
}

/// ISO code of a currency in its Bot API wire form ("XTR", "RUB").
pub fn currency_code<T: Serialize>(currency: &T) -> Option<String> {
    match serde_json::to_value(currency) {
        Ok(Value::String(code)) => Some(code),
        _ => None,
    }
}

/// Replaces the text and keyboard of a menu message in place.
pub async fn show(
    bot: &Bot,
    chat_id: ChatId,
    message_id: MessageId,
    text: String,
    keyboard: InlineKeyboardMarkup,
) {
    if let Err(e) = bot
        .edit_message_text(chat_id, message_id, text)
        .parse_mode(ParseMode::Html)
        .reply_markup(keyboard)
        .await
    {
        // "message is not modified" when the same button is pressed twice
        debug!("Failed to edit message {} in {}: {}", message_id.0, chat_id.0, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    enum Currency {
        #[allow(clippy::upper_case_acronyms)]
        XTR,
    }

    #[test]
    fn test_currency_code_uses_wire_form() {
        assert_eq!(currency_code(&Currency::XTR).as_deref(), Some("XTR"));
        assert_eq!(currency_code(&"RUB".to_string()).as_deref(), Some("RUB"));
        assert_eq!(currency_code(&643u32), None);
    }
}
