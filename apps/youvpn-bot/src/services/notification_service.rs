use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ParseMode;

use crate::bot::keyboards::main_menu;

/// Outbound messages that are not replies to an update.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, chat_id: i64, html: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, chat_id: i64, html: &str) -> anyhow::Result<()> {
        self.bot
            .send_message(ChatId(chat_id), html)
            .parse_mode(ParseMode::Html)
            .reply_markup(main_menu())
            .await?;
        Ok(())
    }
}
