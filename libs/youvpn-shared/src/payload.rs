use serde::{Deserialize, Serialize};
use thiserror::Error;

const PAYLOAD_VERSION: u8 = 1;
const LEGACY_PREFIX: &str = "subscription_";

/// Invoice payload carried through the payment gateway and echoed back on
/// pre-checkout and on the successful-payment message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicePayload {
    #[serde(rename = "v")]
    pub version: u8,
    pub plan: String,
    pub user: i64,
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload is not a subscription payload: {0:?}")]
    Malformed(String),
    #[error("payload json is invalid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u8),
    #[error("payload user id is invalid: {0:?}")]
    InvalidUser(String),
}

impl InvoicePayload {
    pub fn new(plan: impl Into<String>, user: i64) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            plan: plan.into(),
            user,
        }
    }

    pub fn encode(&self) -> String {
        serde_json::json!({
            "v": self.version,
            "plan": self.plan,
            "user": self.user,
        })
        .to_string()
    }

    /// Accepts the structured form and the older `subscription_<plan>_<user>`
    /// form. In the older form the user id is everything after the last
    /// underscore, so plan ids containing underscores still decode.
    pub fn decode(raw: &str) -> Result<Self, PayloadError> {
        let raw = raw.trim();
        let payload = if raw.starts_with('{') {
            let payload: InvoicePayload = serde_json::from_str(raw)?;
            if payload.version != PAYLOAD_VERSION {
                return Err(PayloadError::UnsupportedVersion(payload.version));
            }
            payload
        } else {
            Self::decode_legacy(raw)?
        };

        if payload.plan.is_empty() {
            return Err(PayloadError::Malformed(raw.to_string()));
        }
        if payload.user <= 0 {
            return Err(PayloadError::InvalidUser(payload.user.to_string()));
        }
        Ok(payload)
    }

    fn decode_legacy(raw: &str) -> Result<Self, PayloadError> {
        let rest = raw
            .strip_prefix(LEGACY_PREFIX)
            .ok_or_else(|| PayloadError::Malformed(raw.to_string()))?;
        let (plan, user) = rest
            .rsplit_once('_')
            .ok_or_else(|| PayloadError::Malformed(raw.to_string()))?;
        let user = user
            .parse::<i64>()
            .map_err(|_| PayloadError::InvalidUser(user.to_string()))?;
        Ok(Self::new(plan, user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_payload_survives_underscored_plan() {
        let payload = InvoicePayload::new("12_months", 1001);
        let decoded = InvoicePayload::decode(&payload.encode()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_encoded_payload_fits_telegram_limit() {
        let payload = InvoicePayload::new("12_months", i64::MAX);
        assert!(payload.encode().len() <= 128);
    }

    #[test]
    fn test_legacy_payload() {
        let decoded = InvoicePayload::decode("subscription_3_months_1001").unwrap();
        assert_eq!(decoded.plan, "3_months");
        assert_eq!(decoded.user, 1001);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(
            InvoicePayload::decode("topup_1001"),
            Err(PayloadError::Malformed(_))
        ));
        assert!(matches!(
            InvoicePayload::decode("subscription_1001"),
            Err(PayloadError::Malformed(_))
        ));
        assert!(matches!(
            InvoicePayload::decode("subscription_1_month_abc"),
            Err(PayloadError::InvalidUser(_))
        ));
        assert!(matches!(
            InvoicePayload::decode(r#"{"v":1,"plan":"1_month"}"#),
            Err(PayloadError::Json(_))
        ));
        assert!(matches!(
            InvoicePayload::decode(r#"{"v":2,"plan":"1_month","user":5}"#),
            Err(PayloadError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_rejects_non_positive_user() {
        assert!(matches!(
            InvoicePayload::decode(r#"{"v":1,"plan":"1_month","user":0}"#),
            Err(PayloadError::InvalidUser(_))
        ));
        assert!(matches!(
            InvoicePayload::decode("subscription_1_month_-4"),
            Err(PayloadError::InvalidUser(_))
        ));
    }
}
