//! In-process user store, used when no `DATABASE_URL` is configured.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::database::models::User;
use crate::database::repository::{RepositoryError, UserRepository};

#[derive(Default)]
pub struct MemoryUserStore {
    users: DashMap<String, User>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserRepository for MemoryUserStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.get(username).map(|entry| entry.value().clone()))
    }

    async fn insert(&self, user: User) -> Result<(), RepositoryError> {
        match self.users.entry(user.username.clone()) {
            Entry::Occupied(_) => Err(RepositoryError::Duplicate),
            Entry::Vacant(slot) => {
                slot.insert(user);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_then_find() {
        let store = MemoryUserStore::new();
        store
            .insert(User::new("alice".into(), "hash".into()))
            .await
            .unwrap();

        let found = store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.username, "alice");
        assert!(store.find_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let store = MemoryUserStore::new();
        store
            .insert(User::new("alice".into(), "hash".into()))
            .await
            .unwrap();

        let err = store
            .insert(User::new("alice".into(), "other".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Duplicate));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn usernames_are_case_sensitive() {
        let store = MemoryUserStore::new();
        store
            .insert(User::new("alice".into(), "hash".into()))
            .await
            .unwrap();
        store
            .insert(User::new("Alice".into(), "hash".into()))
            .await
            .unwrap();

        assert_eq!(store.len(), 2);
        assert!(store.find_by_username("ALICE").await.unwrap().is_none());
    }
}
