use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{LedgerError, LedgerResult};
use crate::models::Referral;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReferralStats {
    pub invited_count: i32,
    pub earned: f64,
    pub available: f64,
}

#[derive(Clone)]
pub struct ReferralRepository {
    store: Arc<dyn Store>,
}

impl ReferralRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Attributes `referred` to `referrer`. Returns false for self-referral,
    /// an unknown referrer, or a user who already has a referrer.
    pub async fn claim(&self, referred: i64, referrer: i64) -> LedgerResult<bool> {
        if referred == referrer {
            return Ok(false);
        }
        if self.store.get_user(referrer).await?.is_none() {
            debug!("Referral from unknown user {} ignored", referrer);
            return Ok(false);
        }
        if !self.store.set_referred_by_if_unset(referred, referrer).await? {
            return Ok(false);
        }

        self.store.increment_invited_count(referrer).await?;

        match self.store.insert_referral(referrer, referred, 0.0).await {
            Ok(_) | Err(StoreError::Conflict(_)) => {}
            Err(e) => warn!(
                "Referral edge {} -> {} not recorded: {}",
                referrer, referred, e
            ),
        }

        info!("User {} joined via referral of {}", referred, referrer);
        Ok(true)
    }

    /// Credits the referral balance. Returns false when the user is unknown.
    pub async fn add_reward(&self, user_id: i64, amount: f64) -> LedgerResult<bool> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if self.store.get_user(user_id).await?.is_none() {
            return Ok(false);
        }
        self.store.add_referral_balance(user_id, amount).await?;
        info!("Added referral reward {} to user {}", amount, user_id);
        Ok(true)
    }

    pub async fn stats(&self, user_id: i64) -> LedgerResult<ReferralStats> {
        Ok(match self.store.get_user(user_id).await? {
            Some(user) => ReferralStats {
                invited_count: user.invited_count,
                earned: user.referral_balance,
                available: user.referral_balance,
            },
            None => ReferralStats::default(),
        })
    }

    /// Pays `amount` to whoever referred `referred` and marks their edge paid.
    /// Returns the credited referrer, if any.
    pub async fn reward_referrer(&self, referred: i64, amount: f64) -> LedgerResult<Option<i64>> {
        let Some(referrer) = self
            .store
            .get_user(referred)
            .await?
            .and_then(|u| u.referred_by)
        else {
            return Ok(None);
        };

        if !self.add_reward(referrer, amount).await? {
            return Ok(None);
        }
        if !self.store.mark_referral_paid(referrer, referred).await? {
            debug!("No unpaid referral edge {} -> {}", referrer, referred);
        }
        Ok(Some(referrer))
    }

    pub async fn referrals_of(&self, referrer: i64) -> LedgerResult<Vec<Referral>> {
        Ok(self.store.referrals_by_referrer(referrer).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserProfile;
    use crate::store::MemoryStore;

    async fn setup(users: &[i64]) -> (Arc<MemoryStore>, ReferralRepository) {
        let store = Arc::new(MemoryStore::new());
        for id in users {
            store.upsert_user(&UserProfile::new(*id)).await.unwrap();
        }
        let repo = ReferralRepository::new(store.clone());
        (store, repo)
    }

    #[tokio::test]
    async fn test_self_referral_is_rejected() {
        let (store, repo) = setup(&[7]).await;
        assert!(!repo.claim(7, 7).await.unwrap());
        let user = store.get_user(7).await.unwrap().unwrap();
        assert_eq!(user.referred_by, None);
        assert_eq!(user.invited_count, 0);
    }

    #[tokio::test]
    async fn test_first_claim_wins() {
        let (store, repo) = setup(&[1, 2, 3]).await;

        assert!(repo.claim(3, 1).await.unwrap());
        assert!(!repo.claim(3, 2).await.unwrap());
        assert!(!repo.claim(3, 1).await.unwrap());

        let referred = store.get_user(3).await.unwrap().unwrap();
        assert_eq!(referred.referred_by, Some(1));
        assert_eq!(repo.stats(1).await.unwrap().invited_count, 1);
        assert_eq!(repo.stats(2).await.unwrap().invited_count, 0);
        assert_eq!(repo.referrals_of(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_claim_from_unknown_referrer() {
        let (store, repo) = setup(&[3]).await;
        assert!(!repo.claim(3, 99).await.unwrap());
        assert_eq!(store.get_user(3).await.unwrap().unwrap().referred_by, None);
    }

    #[tokio::test]
    async fn test_concurrent_claims_count_once() {
        let (_store, repo) = setup(&[1, 2, 3]).await;
        let (a, b) = tokio::join!(repo.claim(3, 1), repo.claim(3, 2));
        let wins = [a.unwrap(), b.unwrap()].iter().filter(|w| **w).count();
        assert_eq!(wins, 1);

        let total = repo.stats(1).await.unwrap().invited_count
            + repo.stats(2).await.unwrap().invited_count;
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_add_reward_validates_amount() {
        let (_store, repo) = setup(&[1]).await;
        assert!(matches!(
            repo.add_reward(1, -5.0).await,
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            repo.add_reward(1, f64::INFINITY).await,
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(!repo.add_reward(404, 10.0).await.unwrap());

        assert!(repo.add_reward(1, 100.0).await.unwrap());
        assert!(repo.add_reward(1, 50.0).await.unwrap());
        let stats = repo.stats(1).await.unwrap();
        assert_eq!(stats.earned, 150.0);
        assert_eq!(stats.available, 150.0);
    }

    #[tokio::test]
    async fn test_reward_referrer_marks_edge_paid() {
        let (_store, repo) = setup(&[1, 2]).await;
        assert_eq!(repo.reward_referrer(2, 100.0).await.unwrap(), None);

        repo.claim(2, 1).await.unwrap();
        assert_eq!(repo.reward_referrer(2, 100.0).await.unwrap(), Some(1));

        let edges = repo.referrals_of(1).await.unwrap();
        assert!(edges[0].is_paid);
        assert_eq!(repo.stats(1).await.unwrap().available, 100.0);
    }
}
