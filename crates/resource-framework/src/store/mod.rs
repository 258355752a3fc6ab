//! # Document Storage Seam
//!
//! [`DocumentCollection`] is the narrow interface the repository core needs from a
//! document database: filter-based reads and writes over JSON documents, counting,
//! aggregation pipelines, and index creation.
//!
//! [`memory::MemoryEngine`] is the bundled engine. Filters, updates and pipelines
//! use the familiar document-database operator syntax (`$eq`, `$set`, `$match`, ...);
//! see [`query`] for what is supported.

pub mod memory;
pub mod query;

use crate::document::DocumentId;
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

pub use memory::{MemoryCollection, MemoryEngine};

/// Whether a write targets the first matching document or all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteScope {
    One,
    Many,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

/// Options for [`DocumentCollection::find`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Vec<SortKey>,
    pub skip: Option<u64>,
    pub limit: Option<u64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort_asc(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            order: SortOrder::Ascending,
        });
        self
    }

    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.sort.push(SortKey {
            field: field.into(),
            order: SortOrder::Descending,
        });
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a new document built from the filter's equality terms when nothing matches.
    pub upsert: bool,
}

impl UpdateOptions {
    pub fn upsert() -> Self {
        Self { upsert: true }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateOptions {
    /// Upper bound on how long the pipeline may run.
    pub max_time: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<DocumentId>,
}

/// Declares an index on a single top-level field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub field: String,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(field: impl Into<String>) -> Self {
        let field = field.into();
        Self {
            name: format!("{field}_1"),
            field,
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// A named collection of JSON documents.
///
/// Implementations must be safe to share between tasks.
#[async_trait]
pub trait DocumentCollection: Send + Sync {
    fn name(&self) -> &str;

    async fn find(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Value>, StoreError>;

    /// Inserts every document or none of them.
    ///
    /// Documents without an `_id` receive a freshly generated native id.
    async fn insert(&self, documents: Vec<Value>) -> Result<Vec<DocumentId>, StoreError>;

    async fn update(
        &self,
        filter: &Value,
        update: &Value,
        scope: WriteScope,
        options: &UpdateOptions,
    ) -> Result<UpdateResult, StoreError>;

    /// Returns the number of documents removed.
    async fn delete(&self, filter: &Value, scope: WriteScope) -> Result<u64, StoreError>;

    async fn count(&self, filter: &Value) -> Result<u64, StoreError>;

    async fn aggregate(&self, pipeline: &[Value]) -> Result<Vec<Value>, StoreError>;

    /// Creating an index that already exists with the same definition is a no-op.
    async fn create_index(&self, index: IndexSpec) -> Result<(), StoreError>;
}
