//! User repository backed by the `users` document collection.

use super::{UserRepository, UserRepositoryError, USERS_COLLECTION};
use crate::model::User;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use resource_framework::document::{timestamp_now, CREATED_AT_FIELD};
use resource_framework::store::IndexSpec;
use resource_framework::{
    BaseRepository, DocumentCollection, DocumentId, FindOptions, IdPolicy, RepositoryConfig,
    RepositoryError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Storage shape of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDocument {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DocumentId>,
    pub name: String,
    pub email: String,
    #[serde(rename = "createdAt", with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "chrono::serde::ts_microseconds")]
    pub updated_at: DateTime<Utc>,
}

impl UserDocument {
    fn into_user(self) -> Result<User, RepositoryError> {
        let id = self
            .id
            .ok_or_else(|| RepositoryError::InvalidId("stored user has no _id".into()))?;
        Ok(User {
            id: id.to_string(),
            name: self.name,
            email: self.email,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub struct DocumentUserRepository {
    base: BaseRepository<UserDocument>,
}

impl DocumentUserRepository {
    pub fn new(collection: Arc<dyn DocumentCollection>, id_policy: IdPolicy) -> Self {
        let config = RepositoryConfig::default().entity("user").id_policy(id_policy);
        Self {
            base: BaseRepository::with_config(collection, config),
        }
    }

    /// Creates the unique email index and the `createdAt` listing index.
    ///
    /// Safe to call on every startup.
    #[instrument(name = "users.ensure_indexes", skip(self))]
    pub async fn ensure_indexes(&self) -> Result<(), RepositoryError> {
        let collection = self.base.collection();
        let entity = self.base.entity_name();
        collection
            .create_index(IndexSpec::new("email").unique())
            .await
            .map_err(|e| RepositoryError::from_store("ensure_indexes", entity, e))?;
        collection
            .create_index(IndexSpec::new(CREATED_AT_FIELD))
            .await
            .map_err(|e| RepositoryError::from_store("ensure_indexes", entity, e))?;
        info!(collection = USERS_COLLECTION, "User indexes ready");
        Ok(())
    }

    fn to_document(&self, user: &User) -> Result<UserDocument, RepositoryError> {
        let id = match user.id.as_str() {
            "" => None,
            raw => Some(DocumentId::parse(raw, self.base.id_policy())?),
        };
        Ok(UserDocument {
            id,
            name: user.name.clone(),
            email: user.email.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        })
    }
}

#[async_trait]
impl UserRepository for DocumentUserRepository {
    async fn get_by_id(&self, id: &str) -> Result<Option<User>, UserRepositoryError> {
        match self.base.find_by_id(id).await {
            Ok(doc) => doc.into_user().map(Some),
            Err(RepositoryError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(&self) -> Result<Vec<User>, UserRepositoryError> {
        let docs = self
            .base
            .find_all(FindOptions::new().sort_desc(CREATED_AT_FIELD))
            .await?;
        docs.into_iter().map(UserDocument::into_user).collect()
    }

    async fn create(&self, user: &User) -> Result<User, UserRepositoryError> {
        let mut doc = self.to_document(user)?;
        let now = timestamp_now();
        doc.created_at = now;
        doc.updated_at = now;

        let id = self.base.insert_one(&doc).await?;
        doc.id = Some(id);
        debug!(email = %doc.email, "Stored user document");
        doc.into_user()
    }

    async fn update(&self, user: &User) -> Result<User, UserRepositoryError> {
        self.base
            .update_by_id(&user.id, json!({ "name": user.name, "email": user.email }))
            .await?;
        self.base.find_by_id(&user.id).await?.into_user()
    }

    async fn delete(&self, id: &str) -> Result<(), UserRepositoryError> {
        self.base.delete_by_id(id).await
    }
}
