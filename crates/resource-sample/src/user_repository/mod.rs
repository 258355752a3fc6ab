//! # User Repository
//!
//! The data-access contract for users, with two interchangeable implementations:
//!
//! - [`DocumentUserRepository`] - the `users` collection of the document database,
//!   built on [`BaseRepository`](resource_framework::BaseRepository).
//! - [`InMemoryUserRepository`] - a process-local map for tests and local runs.
//!
//! Both report failures with the shared
//! [`RepositoryError`](resource_framework::RepositoryError) taxonomy, so the
//! service layer handles either one the same way.
//!
//! ## Usage
//!
//! ```rust
//! use resource_sample::model::User;
//! use resource_sample::user_repository::{InMemoryUserRepository, UserRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repo = InMemoryUserRepository::new();
//!
//!     let created = repo.create(&User::new("Alice", "alice@example.com")).await?;
//!     let found = repo.get_by_id(&created.id).await?;
//!     assert_eq!(found.map(|u| u.name), Some("Alice".to_string()));
//!     Ok(())
//! }
//! ```

pub mod document;
pub mod memory;

pub use document::{DocumentUserRepository, UserDocument};
pub use memory::InMemoryUserRepository;

use crate::model::User;
use async_trait::async_trait;
use resource_framework::RepositoryError;

/// User-facing name for the shared taxonomy; no new conditions are added.
pub type UserRepositoryError = RepositoryError;

/// Name of the collection holding user documents.
pub const USERS_COLLECTION: &str = "users";

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// `Ok(None)` when no user has this id.
    async fn get_by_id(&self, id: &str) -> Result<Option<User>, UserRepositoryError>;

    /// All users, newest first.
    async fn list(&self) -> Result<Vec<User>, UserRepositoryError>;

    /// Stores a new user and returns it with its id and timestamps assigned.
    ///
    /// `AlreadyExists` when the id or email is taken.
    async fn create(&self, user: &User) -> Result<User, UserRepositoryError>;

    /// Replaces name and email of the user with `user.id`, keeping `created_at`.
    ///
    /// `NotFound` when no user has this id.
    async fn update(&self, user: &User) -> Result<User, UserRepositoryError>;

    /// `NotFound` when no user has this id.
    async fn delete(&self, id: &str) -> Result<(), UserRepositoryError>;
}
