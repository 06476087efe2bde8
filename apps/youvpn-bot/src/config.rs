use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use youvpn_shared::Rail;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreConfig {
    Postgres { url: String },
    Rest { url: String, key: String },
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub bot_token: String,
    pub store: StoreConfig,
    pub rail: Rail,
    pub payment_token: Option<String>,
    pub website_url: String,
    pub support_username: String,
    pub referral_reward: f64,
    pub sweep_interval: Duration,
    pub retry_interval: Duration,
}

impl BotConfig {
    pub fn from_env() -> Result<Self> {
        tracing::info!("Loading config from environment");
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let bot_token = get("BOT_TOKEN").ok_or_else(|| anyhow!("BOT_TOKEN is not set"))?;

        let store = match (get("DATABASE_URL"), get("SUPABASE_URL"), get("SUPABASE_KEY")) {
            (Some(url), _, _) => StoreConfig::Postgres { url },
            (None, Some(url), Some(key)) => StoreConfig::Rest { url, key },
            (None, Some(_), None) => bail!("SUPABASE_KEY is not set"),
            (None, None, Some(_)) => bail!("SUPABASE_URL is not set"),
            (None, None, None) => {
                bail!("Either DATABASE_URL or SUPABASE_URL and SUPABASE_KEY must be set")
            }
        };

        let use_stars = match get("USE_TELEGRAM_STARS") {
            None => true,
            Some(v) => parse_bool(&v).with_context(|| format!("USE_TELEGRAM_STARS={v}"))?,
        };
        let rail = if use_stars { Rail::Stars } else { Rail::Provider };

        let payment_token = get("PAYMENT_TOKEN");
        if rail == Rail::Provider && payment_token.is_none() {
            bail!("PAYMENT_TOKEN is required when USE_TELEGRAM_STARS is false");
        }

        let referral_reward = match get("REFERRAL_REWARD") {
            Some(v) => v
                .parse::<f64>()
                .ok()
                .filter(|r| r.is_finite() && *r >= 0.0)
                .ok_or_else(|| anyhow!("REFERRAL_REWARD must be a non-negative number, got {v}"))?,
            None => 100.0,
        };

        let sweep_hours = parse_u64(get("EXPIRY_SWEEP_HOURS"), 12, "EXPIRY_SWEEP_HOURS")?;
        let retry_minutes = parse_u64(get("EXPIRY_RETRY_MINUTES"), 60, "EXPIRY_RETRY_MINUTES")?;

        Ok(Self {
            bot_token,
            store,
            rail,
            payment_token,
            website_url: get("WEBSITE_URL").unwrap_or_else(|| "https://youvpn.com".to_string()),
            support_username: get("SUPPORT_USERNAME")
                .unwrap_or_else(|| "@youvpn_support".to_string()),
            referral_reward,
            sweep_interval: Duration::from_secs(sweep_hours * 3600),
            retry_interval: Duration::from_secs(retry_minutes * 60),
        })
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("expected a boolean"),
    }
}

fn parse_u64(value: Option<String>, default: u64, key: &str) -> Result<u64> {
    match value {
        None => Ok(default),
        Some(v) => match v.parse::<u64>() {
            Ok(n) if n > 0 => Ok(n),
            _ => bail!("{key} must be a positive integer, got {v}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<BotConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BotConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_with_rest_store() {
        let config = load(&[
            ("BOT_TOKEN", "123:abc"),
            ("SUPABASE_URL", "https://x.supabase.co"),
            ("SUPABASE_KEY", "secret"),
        ])
        .unwrap();

        assert_eq!(config.rail, Rail::Stars);
        assert_eq!(
            config.store,
            StoreConfig::Rest {
                url: "https://x.supabase.co".to_string(),
                key: "secret".to_string()
            }
        );
        assert_eq!(config.website_url, "https://youvpn.com");
        assert_eq!(config.support_username, "@youvpn_support");
        assert_eq!(config.referral_reward, 100.0);
        assert_eq!(config.sweep_interval, Duration::from_secs(12 * 3600));
        assert_eq!(config.retry_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_database_url_wins() {
        let config = load(&[
            ("BOT_TOKEN", "t"),
            ("DATABASE_URL", "postgres://localhost/youvpn"),
            ("SUPABASE_URL", "https://x.supabase.co"),
        ])
        .unwrap();
        assert!(matches!(config.store, StoreConfig::Postgres { .. }));
    }

    #[test]
    fn test_missing_required_values() {
        assert!(load(&[("SUPABASE_URL", "u"), ("SUPABASE_KEY", "k")]).is_err());
        assert!(load(&[("BOT_TOKEN", "t")]).is_err());
        assert!(load(&[("BOT_TOKEN", "t"), ("SUPABASE_URL", "u")]).is_err());
        assert!(load(&[("BOT_TOKEN", "  "), ("DATABASE_URL", "postgres://x")]).is_err());
    }

    #[test]
    fn test_provider_rail_needs_payment_token() {
        let base = [
            ("BOT_TOKEN", "t"),
            ("DATABASE_URL", "postgres://x"),
            ("USE_TELEGRAM_STARS", "false"),
        ];
        assert!(load(&base).is_err());

        let mut with_token = base.to_vec();
        with_token.push(("PAYMENT_TOKEN", "provider"));
        let config = load(&with_token).unwrap();
        assert_eq!(config.rail, Rail::Provider);
        assert_eq!(config.payment_token.as_deref(), Some("provider"));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let base = [("BOT_TOKEN", "t"), ("DATABASE_URL", "postgres://x")];

        let mut bad = base.to_vec();
        bad.push(("REFERRAL_REWARD", "-1"));
        assert!(load(&bad).is_err());

        let mut bad = base.to_vec();
        bad.push(("EXPIRY_SWEEP_HOURS", "0"));
        assert!(load(&bad).is_err());

        let mut bad = base.to_vec();
        bad.push(("USE_TELEGRAM_STARS", "maybe"));
        assert!(load(&bad).is_err());
    }
}
