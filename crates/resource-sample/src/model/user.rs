use chrono::{DateTime, Utc};
use resource_framework::document::timestamp_now;
use serde::{Deserialize, Serialize};

/// Represents a registered user in the system.
///
/// This is the business-facing shape: the identifier is an opaque string and never
/// a storage type. Storage mapping lives in
/// [`user_repository`](crate::user_repository).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a new user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreate {
    pub name: String,
    pub email: String,
}

/// Payload for updating an existing user. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl User {
    /// Creates a new User with both timestamps set to now.
    ///
    /// The `id` is left empty; the repository assigns it on create.
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        let now = timestamp_now();
        Self {
            id: String::new(),
            name: name.into(),
            email: email.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl From<UserCreate> for User {
    fn from(params: UserCreate) -> Self {
        User::new(params.name, params.email)
    }
}

impl UserUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none()
    }

    /// Applies the present fields to `user`. Timestamps are left to the repository.
    pub fn apply_to(&self, user: &mut User) {
        if let Some(name) = &self.name {
            user.name = name.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
    }
}
