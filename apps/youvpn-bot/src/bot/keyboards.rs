use reqwest::Url;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardButtonKind, InlineKeyboardMarkup, True};
use youvpn_shared::PricingTable;

use crate::bot::texts;

pub fn main_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::callback("⚙️ Подключить VPN", "connect_vpn")],
        vec![InlineKeyboardButton::callback("💥 Продлить", "extend")],
        vec![InlineKeyboardButton::callback("👥 Пригласить", "invite")],
        vec![InlineKeyboardButton::callback("🚀 о YouVPN", "about")],
        vec![InlineKeyboardButton::callback("❓ Помощь", "help")],
        vec![InlineKeyboardButton::callback("⭐ Отзывы", "reviews")],
        vec![InlineKeyboardButton::callback("💻 Наш сайт", "website")],
    ])
}

/// One button per plan in display order, then "back".
pub fn subscription_keyboard(pricing: &PricingTable) -> InlineKeyboardMarkup {
    let mut rows: Vec<Vec<InlineKeyboardButton>> = pricing
        .plans()
        .iter()
        .map(|plan| {
            let discount = pricing.discount_percent(plan.id).unwrap_or(0);
            vec![InlineKeyboardButton::callback(
                texts::plan_button_label(plan, pricing.rail(), discount),
                format!("buy_{}", plan.id),
            )]
        })
        .collect();
    rows.push(vec![InlineKeyboardButton::callback("🔙 Назад", "back")]);
    InlineKeyboardMarkup::new(rows)
}

pub fn back_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "🔙 Назад",
        "main_menu",
    )]])
}

/// Attached to invoices. The pay button has to come first.
pub fn payment_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![InlineKeyboardButton::new(
            "💳 Оплатить",
            InlineKeyboardButtonKind::Pay(True),
        )],
        vec![InlineKeyboardButton::callback("❌ Отменить", "cancel")],
    ])
}

pub fn referral_link(bot_username: &str, user_id: i64) -> String {
    format!("https://t.me/{}?start=ref_{}", bot_username, user_id)
}

/// Share button for the referral link plus "back".
pub fn invite_keyboard(link: &str) -> InlineKeyboardMarkup {
    let share = format!(
        "https://t.me/share/url?url={}&text={}",
        urlencoding::encode(link),
        urlencoding::encode("Попробуй YouVPN - быстрый VPN без ограничений!")
    );

    let mut rows = Vec::new();
    match share.parse::<Url>() {
        Ok(url) => rows.push(vec![InlineKeyboardButton::url("📤 Поделиться", url)]),
        Err(e) => tracing::warn!("Invalid share url {}: {}", share, e),
    }
    rows.push(vec![InlineKeyboardButton::callback("🔙 Назад", "main_menu")]);
    InlineKeyboardMarkup::new(rows)
}
