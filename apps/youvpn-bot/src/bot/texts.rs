//! Message texts. Everything returned here is HTML; user-supplied values are
//! escaped before they are interpolated.

use chrono::{DateTime, Utc};
use teloxide::utils::html::escape;
use youvpn_db::models::SubscriptionStatus;
use youvpn_db::repositories::ReferralStats;
use youvpn_shared::{Plan, Rail};

const MAX_NAME_CHARS: usize = 20;

pub const GENERIC_ERROR: &str = "❌ Произошла ошибка";
pub const START_ERROR: &str = "❌ Произошла ошибка при запуске бота. Попробуйте позже.";
pub const PAYMENT_ERROR: &str =
    "❌ Произошла ошибка при обработке платежа. Обратитесь в поддержку.";
pub const PAYMENT_ALREADY_PROCESSED: &str = "ℹ️ Этот платеж уже был обработан.";
pub const INVOICE_ERROR: &str = "❌ Произошла ошибка при создании счета";
pub const UNKNOWN_PLAN: &str = "❌ Неверный тип подписки";
pub const UNKNOWN_ACTION: &str = "🤷 Неизвестное действие";
pub const CANCELLED: &str = "❌ Операция отменена";

pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%d.%m.%Y %H:%M").to_string()
}

pub fn format_amount(amount: f64, symbol: &str) -> String {
    format!("{:.0}{}", amount, symbol)
}

/// First name, else `@username`, else a placeholder. Escaped and cut to 20 characters.
pub fn display_name(first_name: Option<&str>, username: Option<&str>) -> String {
    let name = match (first_name.map(str::trim), username) {
        (Some(first), _) if !first.is_empty() => {
            if first.chars().count() > MAX_NAME_CHARS {
                format!("{}...", first.chars().take(MAX_NAME_CHARS).collect::<String>())
            } else {
                first.to_string()
            }
        }
        (_, Some(username)) if !username.is_empty() => format!("@{}", username),
        _ => "Пользователь".to_string(),
    };
    escape(&name)
}

/// `ref_<id>` with a positive id. Anything else yields `None`.
pub fn extract_referral_code(start_param: &str) -> Option<i64> {
    start_param
        .trim()
        .strip_prefix("ref_")?
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
}

pub fn account_summary(name: &str, status: &SubscriptionStatus, referral_reward: f64) -> String {
    let mut text = format!("👑 <b>Аккаунт: {}</b>\n\n", name);

    match (status.is_active, status.expire_at) {
        (true, Some(expire_at)) => {
            text.push_str(&format!(
                "Статус: ✅ Активен\nПодписка до: {}\nОсталось дней: {}\nТариф: Премиум",
                format_datetime(expire_at),
                status.days_left
            ));
            if status.days_left <= 1 {
                text.push_str("\n\n⚠️ ВНИМАНИЕ: Подписка истекает завтра! Продлите сейчас.");
            } else if status.days_left <= 3 {
                text.push_str(&format!(
                    "\n\n⚠️ ВНИМАНИЕ: Подписка истекает через {} дня. Рекомендуем продлить.",
                    status.days_left
                ));
            }
        }
        _ => text.push_str(
            "Статус: ❌ Неактивен\nОсталось дней: 0\nТариф: Нет активной подписки\n\n\
             Оформите подписку для доступа к VPN.",
        ),
    }

    text.push_str(&format!(
        "\n\nВыберите действие:\n\n\
         💎 <b>Получай {} за каждого приглашенного друга. Подробнее по кнопке \"Пригласить\"</b>\n\n\
         ❓ <b>Наша поддержка работает 24/7. Если у Вас возникнут вопросы, переходите по кнопке \"Помощь\"</b>",
        format_amount(referral_reward, "₽")
    ));
    text
}

pub fn plan_button_label(plan: &Plan, rail: Rail, discount_percent: u32) -> String {
    let mut label = format!("💎 {} - {}{}", plan.title, plan.price, rail.symbol());
    if discount_percent > 0 {
        label.push_str(&format!(" (скидка {}%)", discount_percent));
    }
    label
}

pub fn connect_active(user_id: i64, support: &str) -> String {
    format!(
        "⚙️ <b>Подключение к VPN</b>\n\n\
         ✅ У вас активная подписка!\n\n\
         📋 <b>Инструкция по подключению:</b>\n\n\
         1️⃣ Скачайте приложение YouVPN\n\
         2️⃣ Войдите в аккаунт используя ваш Telegram ID\n\
         3️⃣ Выберите сервер и нажмите \"Подключиться\"\n\n\
         🔧 <b>Настройки подключения:</b>\n\
         • Ваш ID: <code>{}</code>\n\
         • Протокол: WireGuard/OpenVPN\n\n\
         ❓ Нужна помощь? Обратитесь в поддержку: {}",
        user_id,
        escape(support)
    )
}

pub fn connect_inactive() -> String {
    "🔐 <b>Подключить VPN</b>\n\n\
     ❌ У вас нет активной подписки\n\n\
     Выберите тариф для получения доступа к VPN:\n\n\
     💎 <b>Что включено:</b>\n\
     • Безлимитный трафик\n\
     • Высокая скорость\n\
     • Серверы в 50+ странах\n\
     • 24/7 поддержка\n\n\
     👇 Выберите подходящий тариф:"
        .to_string()
}

pub fn extend() -> String {
    "💥 <b>Продление подписки</b>\n\n\
     Выберите подходящий тариф:\n\n\
     💎 <b>Все тарифы включают:</b>\n\
     • Безлимитный трафик\n\
     • Высокая скорость (до 1 Гбит/с)\n\
     • Серверы в 50+ странах мира\n\
     • Поддержка всех устройств\n\
     • 24/7 техническая поддержка\n\n\
     🎯 <b>Рекомендуем:</b> 12 месяцев - самая выгодная цена!"
        .to_string()
}

pub fn invite(stats: &ReferralStats, link: &str, referral_reward: f64) -> String {
    let reward = format_amount(referral_reward, "₽");
    format!(
        "👥 <b>Пригласить друзей</b>\n\n\
         💰 <b>Получай {reward} за каждого приглашенного друга!</b>\n\n\
         📊 <b>Ваша статистика:</b>\n\
         • Приглашено друзей: {}\n\
         • Заработано: {}\n\
         • Доступно к выводу: {}\n\n\
         🔗 <b>Ваша реферальная ссылка:</b>\n\
         <code>{}</code>\n\n\
         📋 <b>Как это работает:</b>\n\
         1️⃣ Поделитесь ссылкой с друзьями\n\
         2️⃣ Друг переходит по ссылке и регистрируется\n\
         3️⃣ Друг покупает подписку\n\
         4️⃣ Вы получаете {reward} на баланс",
        stats.invited_count,
        format_amount(stats.earned, "₽"),
        format_amount(stats.available, "₽"),
        escape(link),
    )
}

pub fn about() -> String {
    "🚀 <b>О YouVPN</b>\n\n\
     YouVPN - это современный VPN-сервис, обеспечивающий:\n\n\
     🔒 <b>Безопасность</b>\n\
     • Шифрование военного уровня\n\
     • Защита от утечек DNS\n\
     • Kill Switch для максимальной безопасности\n\n\
     🌍 <b>Глобальное покрытие</b>\n\
     • Серверы в 50+ странах\n\
     • Без ограничений трафика\n\n\
     ⚡ <b>Простота использования</b>\n\
     • Подключение в один клик\n\
     • Поддержка всех устройств"
        .to_string()
}

pub fn help(support: &str, referral_reward: f64) -> String {
    format!(
        "❓ <b>Помощь</b>\n\n\
         <b>Часто задаваемые вопросы:</b>\n\n\
         <b>Q: Как подключиться к VPN?</b>\n\
         A: Нажмите кнопку \"⚙️ Подключить VPN\" и следуйте инструкциям.\n\n\
         <b>Q: Как продлить подписку?</b>\n\
         A: Используйте кнопку \"💥 Продлить\" в главном меню.\n\n\
         <b>Q: Как получить награду за приглашения?</b>\n\
         A: Пригласите друзей через кнопку \"👥 Пригласить\" и получите {} за каждого.\n\n\
         <b>Q: Есть ли ограничения по трафику?</b>\n\
         A: Нет, все тарифы предоставляют безлимитный трафик.\n\n\
         <b>💬 Техподдержка:</b> {}\n\n\
         Мы работаем 24/7 и всегда готовы помочь!",
        format_amount(referral_reward, "₽"),
        escape(support)
    )
}

pub fn reviews(support: &str) -> String {
    format!(
        "⭐ <b>Отзывы наших клиентов</b>\n\n\
         Мы ценим мнение каждого пользователя и постоянно работаем над улучшением сервиса.\n\n\
         📝 <b>Оставить отзыв:</b>\n\
         Поделитесь своим опытом использования YouVPN или напишите в поддержку: {}\n\n\
         Спасибо за выбор YouVPN! 🚀",
        escape(support)
    )
}

pub fn website(url: &str) -> String {
    format!(
        "🌐 <b>Наш сайт</b>\n\n\
         Посетите наш официальный сайт для получения дополнительной информации:\n\n\
         🔗 <b>Сайт:</b> {}\n\n\
         На сайте вы найдете:\n\
         • Подробную информацию о тарифах\n\
         • Инструкции по настройке\n\
         • Последние новости и обновления",
        escape(url)
    )
}

pub fn payment_success(plan: &Plan, rail: Rail, expire_at: DateTime<Utc>, user_id: i64) -> String {
    format!(
        "✅ <b>Платеж успешно обработан!</b>\n\n\
         💎 <b>Подписка активирована:</b>\n\
         • Тариф: {}\n\
         • Сумма: {}{}\n\
         • Действует до: {}\n\
         • Дней: {}\n\n\
         🚀 <b>Что дальше?</b>\n\
         • Нажмите \"Подключить VPN\" для получения инструкций\n\
         • Войдите используя ваш Telegram ID: <code>{}</code>\n\n\
         Спасибо за выбор YouVPN! 🎉",
        plan.title,
        plan.price,
        rail.symbol(),
        format_datetime(expire_at),
        plan.days,
        user_id
    )
}

pub fn expiry_warning(days_left: i64) -> String {
    if days_left <= 1 {
        "⚠️ <b>Внимание! Подписка истекает завтра!</b>\n\n\
         Ваша подписка YouVPN истекает завтра.\n\n\
         Чтобы не потерять доступ к VPN:\n\
         • Нажмите \"Продлить\" в меню\n\
         • Выберите подходящий тариф\n\
         • Оплатите подписку\n\n\
         💡 <b>Совет:</b> Выберите годовую подписку и сэкономьте до 42%!"
            .to_string()
    } else {
        format!(
            "⚠️ <b>Подписка истекает через {} дня!</b>\n\n\
             Ваша подписка YouVPN скоро истечет.\n\n\
             Продлите подписку заранее, чтобы избежать перерывов в работе VPN.\n\n\
             💰 <b>Специальное предложение:</b> При продлении на год скидка до 42%!",
            days_left
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_extract_referral_code() {
        assert_eq!(extract_referral_code("ref_42"), Some(42));
        assert_eq!(extract_referral_code(" ref_42 "), Some(42));
        assert_eq!(extract_referral_code("ref_0"), None);
        assert_eq!(extract_referral_code("ref_-5"), None);
        assert_eq!(extract_referral_code("ref_abc"), None);
        assert_eq!(extract_referral_code("42"), None);
        assert_eq!(extract_referral_code(""), None);
    }

    #[test]
    fn test_display_name_is_escaped_and_truncated() {
        assert_eq!(display_name(Some("<b>Ivan</b>"), None), "&lt;b&gt;Ivan&lt;/b&gt;");
        assert_eq!(
            display_name(Some("Александр Сергеевич Пушкин"), None),
            "Александр Сергеевич ..."
        );
        assert_eq!(display_name(None, Some("ivan")), "@ivan");
        assert_eq!(display_name(Some("  "), None), "Пользователь");
    }

    #[test]
    fn test_account_summary_for_both_states() {
        let inactive = account_summary("Ivan", &SubscriptionStatus::inactive(), 100.0);
        assert!(inactive.contains("Неактивен"));
        assert!(inactive.contains("100₽"));

        let status = SubscriptionStatus {
            is_active: true,
            plan_id: Some("1_month".to_string()),
            expire_at: Some(Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 0).unwrap()),
            days_left: 2,
        };
        let active = account_summary("Ivan", &status, 100.0);
        assert!(active.contains("01.03.2025 12:30"));
        assert!(active.contains("через 2 дня"));
    }

    #[test]
    fn test_expiry_warning_wording() {
        assert!(expiry_warning(1).contains("завтра"));
        assert!(expiry_warning(3).contains("3 дня"));
    }
}
