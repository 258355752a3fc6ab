//! # Generic Repository Core
//!
//! [`BaseRepository<T>`] provides CRUD and query primitives over one document
//! collection, typed by the document struct `T`. Domain repositories wrap it and
//! add their own mapping between storage documents and domain entities.
//!
//! ## Error classification
//!
//! Every engine fault is classified here, once, into [`RepositoryError`]:
//!
//! | Outcome | Result | Logged at |
//! |---------|--------|-----------|
//! | nothing matched a single-item operation | `NotFound` | `debug` |
//! | unique index violated | `AlreadyExists` | `warn` |
//! | unusable identifier | `InvalidId` | `debug` |
//! | any other engine fault | `Storage` (with operation + entity) | `error` |
//!
//! Failures are also recorded on the operation's span as the `error` field.
//! There is no retry at this layer.
//!
//! ## Identifiers
//!
//! Single-id operations accept a native id string or, under
//! [`IdPolicy::Lenient`], any other non-empty string, which is matched literally.
//! Lenient lookups of a native-looking string also match a text `_id` equal to it.
//!
//! ```rust
//! use resource_framework::{BaseRepository, MemoryEngine};
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Note {
//!     text: String,
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = MemoryEngine::new("docs");
//!     let notes = BaseRepository::<Note>::new(engine.collection("notes").unwrap());
//!
//!     let id = notes.insert_one(&Note { text: "hi".into() }).await.unwrap();
//!     notes.update_by_id(&id.to_string(), json!({"text": "hello"})).await.unwrap();
//!
//!     let note = notes.find_by_id(&id.to_string()).await.unwrap();
//!     assert_eq!(note.text, "hello");
//! }
//! ```

use crate::document::{timestamp_now, timestamp_value, DocumentId, IdPolicy, ID_FIELD, UPDATED_AT_FIELD};
use crate::error::{ErrorKind, RepositoryError, StoreError};
use crate::store::query::has_operators;
use crate::store::{
    AggregateOptions, DocumentCollection, FindOptions, UpdateOptions, UpdateResult, WriteScope,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::field::{display, Empty};
use tracing::{debug, error, instrument, warn, Span};

/// Construction-time settings for a [`BaseRepository`].
#[derive(Debug, Clone, Default)]
pub struct RepositoryConfig {
    /// Name used in spans, logs and error context. Defaults to the collection name.
    pub entity_name: Option<String>,
    pub id_policy: IdPolicy,
}

impl RepositoryConfig {
    pub fn entity(mut self, name: impl Into<String>) -> Self {
        self.entity_name = Some(name.into());
        self
    }

    pub fn id_policy(mut self, policy: IdPolicy) -> Self {
        self.id_policy = policy;
        self
    }
}

/// Typed data access over a single collection.
pub struct BaseRepository<T> {
    collection: Arc<dyn DocumentCollection>,
    entity: String,
    id_policy: IdPolicy,
    _document: PhantomData<fn() -> T>,
}

impl<T> Clone for BaseRepository<T> {
    fn clone(&self) -> Self {
        Self {
            collection: Arc::clone(&self.collection),
            entity: self.entity.clone(),
            id_policy: self.id_policy,
            _document: PhantomData,
        }
    }
}

impl<T> BaseRepository<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(collection: Arc<dyn DocumentCollection>) -> Self {
        Self::with_config(collection, RepositoryConfig::default())
    }

    pub fn with_config(collection: Arc<dyn DocumentCollection>, config: RepositoryConfig) -> Self {
        let entity = config
            .entity_name
            .unwrap_or_else(|| collection.name().to_string());
        Self {
            collection,
            entity,
            id_policy: config.id_policy,
            _document: PhantomData,
        }
    }

    pub fn collection(&self) -> &Arc<dyn DocumentCollection> {
        &self.collection
    }

    pub fn entity_name(&self) -> &str {
        &self.entity
    }

    pub fn id_policy(&self) -> IdPolicy {
        self.id_policy
    }

    /// Builds the `_id` filter for a caller-supplied identifier.
    ///
    /// Under [`IdPolicy::Lenient`] a string that parses as a native id still
    /// matches a text `_id` holding exactly that string.
    pub fn id_filter(&self, id: &str) -> Result<Value, RepositoryError> {
        match DocumentId::parse(id, self.id_policy) {
            Ok(native @ DocumentId::Native(_)) if self.id_policy == IdPolicy::Lenient => {
                Ok(json!({ ID_FIELD: { "$in": [native.to_value(), id] } }))
            }
            Ok(parsed) => Ok(json!({ ID_FIELD: parsed.to_value() })),
            Err(err) => {
                Span::current().record("error", display(&err));
                debug!(entity = %self.entity, id, "Rejected identifier");
                Err(err)
            }
        }
    }

    fn storage_failure(&self, operation: &'static str, source: StoreError) -> RepositoryError {
        let err = RepositoryError::from_store(operation, &self.entity, source);
        Span::current().record("error", display(&err));
        match err.kind() {
            ErrorKind::AlreadyExists => {
                warn!(collection = %self.collection.name(), operation, "Duplicate key")
            }
            ErrorKind::InvalidId => {
                debug!(collection = %self.collection.name(), operation, error = %err, "Rejected identifier")
            }
            _ => error!(collection = %self.collection.name(), operation, error = %err, "Storage operation failed"),
        }
        err
    }

    fn not_found(&self, operation: &'static str) -> RepositoryError {
        let err = RepositoryError::NotFound;
        Span::current().record("error", display(&err));
        debug!(collection = %self.collection.name(), operation, "No matching document");
        err
    }

    fn decode(&self, operation: &'static str, value: Value) -> Result<T, RepositoryError> {
        serde_json::from_value(value)
            .map_err(|e| self.storage_failure(operation, StoreError::Codec(e)))
    }

    fn decode_all(&self, operation: &'static str, values: Vec<Value>) -> Result<Vec<T>, RepositoryError> {
        values
            .into_iter()
            .map(|value| self.decode(operation, value))
            .collect()
    }

    fn encode(&self, document: &T) -> Result<Value, RepositoryError> {
        match serde_json::to_value(document)? {
            value @ Value::Object(_) => Ok(value),
            other => Err(RepositoryError::InvalidInput(format!(
                "{} must serialize to an object, got {other}",
                self.entity
            ))),
        }
    }

    fn require_object(&self, what: &str, value: &Value) -> Result<(), RepositoryError> {
        if value.is_object() {
            Ok(())
        } else {
            Err(RepositoryError::InvalidInput(format!("{what} must be an object")))
        }
    }

    #[instrument(name = "repository.find_by_id", skip_all, fields(collection = %self.collection.name(), entity = %self.entity, id = %id, error = Empty))]
    pub async fn find_by_id(&self, id: &str) -> Result<T, RepositoryError> {
        let filter = self.id_filter(id)?;
        let mut found = self
            .collection
            .find(&filter, &FindOptions::new().limit(1))
            .await
            .map_err(|e| self.storage_failure("find_by_id", e))?;
        match found.pop() {
            Some(doc) => self.decode("find_by_id", doc),
            None => Err(self.not_found("find_by_id")),
        }
    }

    #[instrument(name = "repository.find_one", skip_all, fields(collection = %self.collection.name(), entity = %self.entity, error = Empty))]
    pub async fn find_one(&self, filter: Value) -> Result<T, RepositoryError> {
        self.require_object("filter", &filter)?;
        let mut found = self
            .collection
            .find(&filter, &FindOptions::new().limit(1))
            .await
            .map_err(|e| self.storage_failure("find_one", e))?;
        match found.pop() {
            Some(doc) => self.decode("find_one", doc),
            None => Err(self.not_found("find_one")),
        }
    }

    #[instrument(name = "repository.find", skip_all, fields(collection = %self.collection.name(), entity = %self.entity, error = Empty))]
    pub async fn find(&self, filter: Value, options: FindOptions) -> Result<Vec<T>, RepositoryError> {
        self.require_object("filter", &filter)?;
        let docs = self
            .collection
            .find(&filter, &options)
            .await
            .map_err(|e| self.storage_failure("find", e))?;
        debug!(count = docs.len(), "Found documents");
        self.decode_all("find", docs)
    }

    #[instrument(name = "repository.find_all", skip_all, fields(collection = %self.collection.name(), entity = %self.entity, error = Empty))]
    pub async fn find_all(&self, options: FindOptions) -> Result<Vec<T>, RepositoryError> {
        let docs = self
            .collection
            .find(&json!({}), &options)
            .await
            .map_err(|e| self.storage_failure("find_all", e))?;
        self.decode_all("find_all", docs)
    }

    /// Stores a new document and returns its identifier.
    ///
    /// A document without an `_id` gets a freshly generated native id.
    #[instrument(name = "repository.insert_one", skip_all, fields(collection = %self.collection.name(), entity = %self.entity, error = Empty))]
    pub async fn insert_one(&self, document: &T) -> Result<DocumentId, RepositoryError> {
        let value = self.encode(document)?;
        let mut ids = self
            .collection
            .insert(vec![value])
            .await
            .map_err(|e| self.storage_failure("insert_one", e))?;
        let id = ids
            .pop()
            .ok_or_else(|| RepositoryError::InvalidInput("no identifier assigned".into()))?;
        debug!(%id, "Inserted document");
        Ok(id)
    }

    /// Inserts every document or none of them.
    #[instrument(name = "repository.insert_many", skip_all, fields(collection = %self.collection.name(), entity = %self.entity, batch = documents.len(), error = Empty))]
    pub async fn insert_many(&self, documents: &[T]) -> Result<Vec<DocumentId>, RepositoryError> {
        if documents.is_empty() {
            return Err(RepositoryError::InvalidInput("empty batch".into()));
        }
        let values = documents
            .iter()
            .map(|doc| self.encode(doc))
            .collect::<Result<Vec<_>, _>>()?;
        let ids = self
            .collection
            .insert(values)
            .await
            .map_err(|e| self.storage_failure("insert_many", e))?;
        debug!(count = ids.len(), "Inserted documents");
        Ok(ids)
    }

    /// Applies a partial update to the document with the given id.
    ///
    /// A plain field map is wrapped in `$set`; an operator expression is passed
    /// through. `updatedAt` is always stamped.
    #[instrument(name = "repository.update_by_id", skip_all, fields(collection = %self.collection.name(), entity = %self.entity, id = %id, error = Empty))]
    pub async fn update_by_id<U>(&self, id: &str, update: U) -> Result<(), RepositoryError>
    where
        U: Serialize + Send,
    {
        let filter = self.id_filter(id)?;
        let update = stamp_update(serde_json::to_value(update)?)?;
        let result = self
            .collection
            .update(&filter, &update, WriteScope::One, &UpdateOptions::default())
            .await
            .map_err(|e| self.storage_failure("update_by_id", e))?;
        if result.matched == 0 {
            return Err(self.not_found("update_by_id"));
        }
        debug!(modified = result.modified, "Updated document");
        Ok(())
    }

    /// Updates the first document matching `filter`.
    ///
    /// `NotFound` when nothing matched and no document was upserted.
    #[instrument(name = "repository.update_one", skip_all, fields(collection = %self.collection.name(), entity = %self.entity, error = Empty))]
    pub async fn update_one(
        &self,
        filter: Value,
        update: Value,
        options: UpdateOptions,
    ) -> Result<UpdateResult, RepositoryError> {
        self.require_object("filter", &filter)?;
        self.require_object("update", &update)?;
        let result = self
            .collection
            .update(&filter, &update, WriteScope::One, &options)
            .await
            .map_err(|e| self.storage_failure("update_one", e))?;
        if result.matched == 0 && result.upserted_id.is_none() {
            return Err(self.not_found("update_one"));
        }
        Ok(result)
    }

    /// Returns the number of documents modified; zero matches is not an error.
    #[instrument(name = "repository.update_many", skip_all, fields(collection = %self.collection.name(), entity = %self.entity, error = Empty))]
    pub async fn update_many(
        &self,
        filter: Value,
        update: Value,
        options: UpdateOptions,
    ) -> Result<u64, RepositoryError> {
        self.require_object("filter", &filter)?;
        self.require_object("update", &update)?;
        let result = self
            .collection
            .update(&filter, &update, WriteScope::Many, &options)
            .await
            .map_err(|e| self.storage_failure("update_many", e))?;
        debug!(matched = result.matched, modified = result.modified, "Updated documents");
        Ok(result.modified)
    }

    #[instrument(name = "repository.delete_by_id", skip_all, fields(collection = %self.collection.name(), entity = %self.entity, id = %id, error = Empty))]
    pub async fn delete_by_id(&self, id: &str) -> Result<(), RepositoryError> {
        let filter = self.id_filter(id)?;
        let deleted = self
            .collection
            .delete(&filter, WriteScope::One)
            .await
            .map_err(|e| self.storage_failure("delete_by_id", e))?;
        if deleted == 0 {
            return Err(self.not_found("delete_by_id"));
        }
        Ok(())
    }

    #[instrument(name = "repository.delete_one", skip_all, fields(collection = %self.collection.name(), entity = %self.entity, error = Empty))]
    pub async fn delete_one(&self, filter: Value) -> Result<(), RepositoryError> {
        self.require_object("filter", &filter)?;
        let deleted = self
            .collection
            .delete(&filter, WriteScope::One)
            .await
            .map_err(|e| self.storage_failure("delete_one", e))?;
        if deleted == 0 {
            return Err(self.not_found("delete_one"));
        }
        Ok(())
    }

    #[instrument(name = "repository.delete_many", skip_all, fields(collection = %self.collection.name(), entity = %self.entity, error = Empty))]
    pub async fn delete_many(&self, filter: Value) -> Result<u64, RepositoryError> {
        self.require_object("filter", &filter)?;
        let deleted = self
            .collection
            .delete(&filter, WriteScope::Many)
            .await
            .map_err(|e| self.storage_failure("delete_many", e))?;
        debug!(deleted, "Deleted documents");
        Ok(deleted)
    }

    #[instrument(name = "repository.count", skip_all, fields(collection = %self.collection.name(), entity = %self.entity, error = Empty))]
    pub async fn count(&self, filter: Value) -> Result<u64, RepositoryError> {
        self.require_object("filter", &filter)?;
        self.collection
            .count(&filter)
            .await
            .map_err(|e| self.storage_failure("count", e))
    }

    pub async fn exists(&self, filter: Value) -> Result<bool, RepositoryError> {
        Ok(self.count(filter).await? > 0)
    }

    /// Runs an aggregation pipeline and decodes every result as `T`.
    #[instrument(name = "repository.aggregate", skip_all, fields(collection = %self.collection.name(), entity = %self.entity, stages = pipeline.len(), error = Empty))]
    pub async fn aggregate(
        &self,
        pipeline: &[Value],
        options: AggregateOptions,
    ) -> Result<Vec<T>, RepositoryError> {
        let run = self.collection.aggregate(pipeline);
        let docs = match options.max_time {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(limit)),
            },
            None => run.await,
        }
        .map_err(|e| self.storage_failure("aggregate", e))?;
        self.decode_all("aggregate", docs)
    }
}

/// Normalizes a partial update into operator form and stamps `updatedAt`.
fn stamp_update(update: Value) -> Result<Value, RepositoryError> {
    let Value::Object(fields) = update else {
        return Err(RepositoryError::InvalidInput("update must be an object".into()));
    };
    if fields.is_empty() {
        return Err(RepositoryError::InvalidInput("empty update".into()));
    }

    let mut ops = if has_operators(&fields) {
        fields
    } else if fields.keys().any(|k| k.starts_with('$')) {
        return Err(RepositoryError::InvalidInput(
            "update mixes operators and plain fields".into(),
        ));
    } else {
        let mut ops = Map::new();
        ops.insert("$set".to_string(), Value::Object(fields));
        ops
    };

    match ops
        .entry("$set".to_string())
        .or_insert_with(|| Value::Object(Map::new()))
    {
        Value::Object(set) => {
            set.insert(UPDATED_AT_FIELD.to_string(), timestamp_value(timestamp_now()));
        }
        _ => return Err(RepositoryError::InvalidInput("$set must be an object".into())),
    }
    Ok(Value::Object(ops))
}
