//! # User Service
//!
//! Validation and orchestration of user operations. The service only ever matches
//! on [`ErrorKind`], so it works unchanged over any
//! [`UserRepository`] implementation.
//!
//! ## Existence pre-checks
//!
//! `update` and `delete` read the user before mutating it so a missing user is
//! reported as [`UserError::NotFound`] up front. The check and the write are two
//! separate repository calls: a user deleted concurrently between them surfaces
//! as the repository's own `NotFound`, which maps to the same
//! [`UserError::NotFound`]. The two causes are not distinguished.

use crate::model::{User, UserCreate, UserUpdate};
use crate::user_repository::UserRepository;
use resource_framework::{ErrorKind, RepositoryError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

#[derive(Debug, Error)]
pub enum UserError {
    #[error("user not found")]
    NotFound,

    #[error("user already exists")]
    AlreadyExists,

    #[error("invalid user data: {0}")]
    InvalidUser(String),

    #[error("database error: {0}")]
    Database(#[source] RepositoryError),
}

impl From<RepositoryError> for UserError {
    fn from(err: RepositoryError) -> Self {
        match err.kind() {
            ErrorKind::NotFound => UserError::NotFound,
            ErrorKind::AlreadyExists => UserError::AlreadyExists,
            ErrorKind::InvalidId | ErrorKind::InvalidInput => UserError::InvalidUser(err.to_string()),
            ErrorKind::Storage => UserError::Database(err),
        }
    }
}

fn require_id(id: &str) -> Result<(), UserError> {
    if id.trim().is_empty() {
        return Err(UserError::InvalidUser("id is required".into()));
    }
    Ok(())
}

fn validate_fields(name: &str, email: &str) -> Result<(), UserError> {
    if name.trim().is_empty() {
        return Err(UserError::InvalidUser("name is required".into()));
    }
    if email.trim().is_empty() {
        return Err(UserError::InvalidUser("email is required".into()));
    }
    if !email.contains('@') {
        return Err(UserError::InvalidUser(format!("malformed email {email:?}")));
    }
    Ok(())
}

#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn UserRepository>,
}

impl UserService {
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    #[instrument(name = "users.get", skip(self))]
    pub async fn get_by_id(&self, id: &str) -> Result<User, UserError> {
        debug!("Getting user by ID");
        require_id(id)?;

        match self.repo.get_by_id(id).await {
            Ok(Some(user)) => Ok(user),
            Ok(None) => Err(UserError::NotFound),
            Err(e) => {
                error!(error = %e, "Failed to get user");
                Err(e.into())
            }
        }
    }

    #[instrument(name = "users.list", skip(self))]
    pub async fn list(&self) -> Result<Vec<User>, UserError> {
        debug!("Listing users");
        self.repo.list().await.map_err(|e| {
            error!(error = %e, "Failed to list users");
            e.into()
        })
    }

    #[instrument(name = "users.create", skip_all, fields(name = %params.name))]
    pub async fn create(&self, params: UserCreate) -> Result<User, UserError> {
        debug!("Creating user");
        validate_fields(&params.name, &params.email)?;

        let user = self.repo.create(&User::from(params)).await.map_err(|e| {
            error!(error = %e, "Failed to create user");
            UserError::from(e)
        })?;
        info!(user_id = %user.id, "User created");
        Ok(user)
    }

    #[instrument(name = "users.update", skip(self, changes))]
    pub async fn update(&self, id: &str, changes: UserUpdate) -> Result<User, UserError> {
        debug!("Updating user");
        require_id(id)?;

        let mut user = self.get_by_id(id).await?;
        changes.apply_to(&mut user);
        validate_fields(&user.name, &user.email)?;

        let updated = self.repo.update(&user).await.map_err(|e| {
            error!(error = %e, "Failed to update user");
            UserError::from(e)
        })?;
        info!("User updated");
        Ok(updated)
    }

    #[instrument(name = "users.delete", skip(self))]
    pub async fn delete(&self, id: &str) -> Result<(), UserError> {
        debug!("Deleting user");
        require_id(id)?;

        self.get_by_id(id).await?;
        self.repo.delete(id).await.map_err(|e| {
            error!(error = %e, "Failed to delete user");
            UserError::from(e)
        })?;
        info!("User deleted");
        Ok(())
    }
}
