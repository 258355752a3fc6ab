//! Process-local user repository.
//!
//! Reads share a read lock and writes take the write lock, so concurrent callers
//! always observe whole users. Users are cloned on the way in and on the way out;
//! callers never hold references into the map.

use super::{UserRepository, UserRepositoryError};
use crate::model::User;
use async_trait::async_trait;
use resource_framework::document::timestamp_now;
use resource_framework::{DocumentId, RepositoryError};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
pub struct InMemoryUserRepository {
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn email_taken(users: &HashMap<String, User>, email: &str, except: &str) -> bool {
    users.values().any(|u| u.email == email && u.id != except)
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn get_by_id(&self, id: &str) -> Result<Option<User>, UserRepositoryError> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<User>, UserRepositoryError> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(users)
    }

    async fn create(&self, user: &User) -> Result<User, UserRepositoryError> {
        let mut user = user.clone();
        if user.id.is_empty() {
            user.id = DocumentId::generate().to_string();
        }

        let mut users = self.users.write().await;
        if users.contains_key(&user.id) || email_taken(&users, &user.email, &user.id) {
            return Err(RepositoryError::AlreadyExists);
        }
        let now = timestamp_now();
        user.created_at = now;
        user.updated_at = now;
        users.insert(user.id.clone(), user.clone());
        debug!(id = %user.id, "Stored user in memory");
        Ok(user)
    }

    async fn update(&self, user: &User) -> Result<User, UserRepositoryError> {
        let mut users = self.users.write().await;
        if !users.contains_key(&user.id) {
            return Err(RepositoryError::NotFound);
        }
        if email_taken(&users, &user.email, &user.id) {
            return Err(RepositoryError::AlreadyExists);
        }
        let stored = users.get_mut(&user.id).ok_or(RepositoryError::NotFound)?;
        stored.name = user.name.clone();
        stored.email = user.email.clone();
        stored.updated_at = timestamp_now();
        Ok(stored.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), UserRepositoryError> {
        self.users
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn create_generates_ids_and_enforces_uniqueness() {
        let repo = InMemoryUserRepository::new();
        let ann = repo.create(&User::new("Ann", "ann@example.com")).await.unwrap();
        assert!(!ann.id.is_empty());

        let same_email = repo.create(&User::new("Ann 2", "ann@example.com")).await;
        assert!(same_email.unwrap_err().is_already_exists());

        let mut same_id = User::new("Bob", "bob@example.com");
        same_id.id = ann.id.clone();
        assert!(repo.create(&same_id).await.unwrap_err().is_already_exists());
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn update_preserves_created_at() {
        let repo = InMemoryUserRepository::new();
        let ann = repo.create(&User::new("Ann", "ann@example.com")).await.unwrap();

        let mut changed = ann.clone();
        changed.email = "ann@work.example.com".into();
        changed.created_at = timestamp_now() + chrono::Duration::days(1);
        let updated = repo.update(&changed).await.unwrap();

        assert_eq!(updated.created_at, ann.created_at);
        assert_eq!(updated.email, "ann@work.example.com");
        assert_eq!(updated.name, "Ann");
    }

    #[tokio::test]
    async fn missing_users_are_not_found() {
        let repo = InMemoryUserRepository::new();
        assert_eq!(repo.get_by_id("missing").await.unwrap(), None);

        let mut ghost = User::new("Ghost", "ghost@example.com");
        ghost.id = "missing".into();
        assert!(repo.update(&ghost).await.unwrap_err().is_not_found());
        assert!(repo.delete("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_are_all_visible() {
        let repo = Arc::new(InMemoryUserRepository::new());
        let mut handles = Vec::new();
        for i in 0..32 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                repo.create(&User::new(format!("user-{i}"), format!("user{i}@example.com")))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let users = repo.list().await.unwrap();
        assert_eq!(users.len(), 32);
        assert!(users.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    }
}
