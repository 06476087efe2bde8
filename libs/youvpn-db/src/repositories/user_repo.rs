use std::sync::Arc;

use super::LedgerResult;
use crate::models::{User, UserProfile};
use crate::store::Store;

#[derive(Clone)]
pub struct UserRepository {
    store: Arc<dyn Store>,
}

impl UserRepository {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Creates the user on first contact, otherwise refreshes the name fields.
    pub async fn touch(&self, profile: &UserProfile) -> LedgerResult<User> {
        Ok(self.store.upsert_user(profile).await?)
    }

    pub async fn get(&self, chat_id: i64) -> LedgerResult<Option<User>> {
        Ok(self.store.get_user(chat_id).await?)
    }

    pub async fn count(&self) -> LedgerResult<i64> {
        Ok(self.store.count_users().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_touch_refreshes_names() {
        let repo = UserRepository::new(Arc::new(MemoryStore::new()));

        let mut profile = UserProfile::new(1001);
        profile.first_name = Some("Ivan".to_string());
        let created = repo.touch(&profile).await.unwrap();
        assert_eq!(created.referral_balance, 0.0);

        profile.first_name = Some("Ivan Petrov".to_string());
        profile.username = Some("ivanp".to_string());
        repo.touch(&profile).await.unwrap();

        let user = repo.get(1001).await.unwrap().unwrap();
        assert_eq!(user.first_name.as_deref(), Some("Ivan Petrov"));
        assert_eq!(user.username.as_deref(), Some("ivanp"));
        assert_eq!(user.created_at, created.created_at);
        assert_eq!(repo.count().await.unwrap(), 1);
    }
}
