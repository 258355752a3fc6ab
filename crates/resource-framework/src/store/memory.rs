//! In-memory document engine.
//!
//! A [`MemoryEngine`] owns named collections. Each [`MemoryCollection`] keeps its
//! documents in insertion order behind a `tokio::sync::RwLock`, so reads proceed
//! concurrently and writes are serialized per collection.
//!
//! Shutting the engine down flips a shared flag; every handle obtained earlier
//! then answers [`StoreError::Unavailable`].

use crate::document::{DocumentId, ID_FIELD};
use crate::error::StoreError;
use crate::store::query::{self, Document};
use crate::store::{
    DocumentCollection, FindOptions, IndexSpec, UpdateOptions, UpdateResult, WriteScope,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A set of named in-memory collections sharing one open/closed state.
pub struct MemoryEngine {
    name: String,
    open: Arc<AtomicBool>,
    collections: Mutex<HashMap<String, Arc<MemoryCollection>>>,
}

impl MemoryEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            open: Arc::new(AtomicBool::new(true)),
            collections: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Returns the collection with the given name, creating it on first use.
    pub fn collection(&self, name: &str) -> Result<Arc<MemoryCollection>, StoreError> {
        if !self.is_open() {
            return Err(StoreError::Unavailable(name.to_string()));
        }
        let mut collections = self
            .collections
            .lock()
            .map_err(|_| StoreError::Unavailable(name.to_string()))?;
        let collection = collections
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(database = %self.name, collection = name, "Collection created");
                Arc::new(MemoryCollection::new(name, Arc::clone(&self.open)))
            })
            .clone();
        Ok(collection)
    }

    pub fn shutdown(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            info!(database = %self.name, "Engine shut down");
        }
    }
}

#[derive(Default)]
struct CollectionState {
    docs: BTreeMap<u64, Document>,
    next_seq: u64,
    indexes: Vec<IndexSpec>,
}

impl CollectionState {
    fn key_of(doc: &Document) -> Option<String> {
        doc.get(ID_FIELD).map(Value::to_string)
    }

    /// The duplicate-key error raised when `candidate` and `other` share an
    /// `_id` or a unique index value. Documents missing an indexed field are not indexed.
    fn clash(&self, candidate: &Document, other: &Document) -> Option<StoreError> {
        if let Some(key) = Self::key_of(candidate) {
            if Self::key_of(other).as_deref() == Some(key.as_str()) {
                return Some(StoreError::DuplicateKey {
                    index: "_id_".into(),
                    key,
                });
            }
        }
        self.indexes
            .iter()
            .filter(|i| i.unique)
            .find_map(|index| {
                let value = query::lookup(candidate, &index.field)?;
                (query::lookup(other, &index.field) == Some(value)).then(|| {
                    StoreError::DuplicateKey {
                        index: index.name.clone(),
                        key: value.to_string(),
                    }
                })
            })
    }

    fn check_unique(&self, candidate: &Document) -> Result<(), StoreError> {
        self.check_batch(&[candidate], &[])
    }

    /// Validates a batch of incoming documents against the live documents,
    /// except those in `replaced`, and against each other.
    fn check_batch(&self, batch: &[&Document], replaced: &[u64]) -> Result<(), StoreError> {
        for (i, candidate) in batch.iter().enumerate() {
            let live = self
                .docs
                .iter()
                .filter(|(seq, _)| !replaced.contains(*seq))
                .map(|(_, doc)| doc);
            if let Some(err) = live
                .chain(batch[..i].iter().copied())
                .find_map(|other| self.clash(candidate, other))
            {
                return Err(err);
            }
        }
        Ok(())
    }

    fn matching(&self, filter: &Value) -> Result<Vec<u64>, StoreError> {
        let mut seqs = Vec::new();
        for (seq, doc) in &self.docs {
            if query::matches(doc, filter)? {
                seqs.push(*seq);
            }
        }
        Ok(seqs)
    }

    fn push(&mut self, doc: Document) {
        self.docs.insert(self.next_seq, doc);
        self.next_seq += 1;
    }
}

/// One collection of a [`MemoryEngine`].
pub struct MemoryCollection {
    name: String,
    open: Arc<AtomicBool>,
    state: RwLock<CollectionState>,
}

impl MemoryCollection {
    fn new(name: &str, open: Arc<AtomicBool>) -> Self {
        Self {
            name: name.to_string(),
            open,
            state: RwLock::new(CollectionState::default()),
        }
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.open.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(self.name.clone()))
        }
    }

    fn snapshot(state: &CollectionState) -> Vec<Document> {
        state.docs.values().cloned().collect()
    }
}

fn into_document(value: Value) -> Result<Document, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::MalformedUpdate(format!(
            "documents must be objects, got {other}"
        ))),
    }
}

fn assign_id(doc: &mut Document) -> Result<DocumentId, StoreError> {
    match doc.get(ID_FIELD) {
        Some(value) => DocumentId::from_value(value)
            .ok_or_else(|| StoreError::InvalidId(format!("unsupported _id value {value}"))),
        None => {
            let id = DocumentId::generate();
            doc.insert(ID_FIELD.to_string(), id.to_value());
            Ok(id)
        }
    }
}

#[async_trait]
impl DocumentCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, filter: &Value, options: &FindOptions) -> Result<Vec<Value>, StoreError> {
        self.ensure_open()?;
        let state = self.state.read().await;
        let mut found = Vec::new();
        for doc in state.docs.values() {
            if query::matches(doc, filter)? {
                found.push(doc.clone());
            }
        }
        drop(state);

        query::sort_documents(&mut found, &options.sort);
        let skip = options.skip.unwrap_or(0) as usize;
        let limit = options.limit.map_or(usize::MAX, |l| l as usize);
        Ok(found
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(Value::Object)
            .collect())
    }

    async fn insert(&self, documents: Vec<Value>) -> Result<Vec<DocumentId>, StoreError> {
        self.ensure_open()?;
        let mut prepared = Vec::with_capacity(documents.len());
        let mut ids = Vec::with_capacity(documents.len());
        for value in documents {
            let mut doc = into_document(value)?;
            ids.push(assign_id(&mut doc)?);
            prepared.push(doc);
        }

        let mut state = self.state.write().await;
        // The whole batch is validated before the first write.
        state.check_batch(&prepared.iter().collect::<Vec<_>>(), &[])?;
        for doc in prepared {
            state.push(doc);
        }
        debug!(collection = %self.name, inserted = ids.len(), size = state.docs.len(), "Inserted");
        Ok(ids)
    }

    async fn update(
        &self,
        filter: &Value,
        update: &Value,
        scope: WriteScope,
        options: &UpdateOptions,
    ) -> Result<UpdateResult, StoreError> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        let mut seqs = state.matching(filter)?;
        if scope == WriteScope::One {
            seqs.truncate(1);
        }

        if seqs.is_empty() {
            if !options.upsert {
                return Ok(UpdateResult::default());
            }
            let seed = query::upsert_seed(filter)?;
            let mut doc = query::apply_update(&seed, update)?;
            let id = assign_id(&mut doc)?;
            state.check_unique(&doc)?;
            state.push(doc);
            return Ok(UpdateResult {
                matched: 0,
                modified: 0,
                upserted_id: Some(id),
            });
        }

        // Compute every new version first so a rejected update changes nothing.
        let mut staged = Vec::with_capacity(seqs.len());
        for seq in &seqs {
            if let Some(current) = state.docs.get(seq) {
                let next = query::apply_update(current, update)?;
                if &next != current {
                    staged.push((*seq, next));
                }
            }
        }
        let replaced: Vec<u64> = staged.iter().map(|(seq, _)| *seq).collect();
        let incoming: Vec<&Document> = staged.iter().map(|(_, next)| next).collect();
        state.check_batch(&incoming, &replaced)?;

        let modified = staged.len() as u64;
        for (seq, next) in staged {
            state.docs.insert(seq, next);
        }
        Ok(UpdateResult {
            matched: seqs.len() as u64,
            modified,
            upserted_id: None,
        })
    }

    async fn delete(&self, filter: &Value, scope: WriteScope) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        let mut seqs = state.matching(filter)?;
        if scope == WriteScope::One {
            seqs.truncate(1);
        }
        for seq in &seqs {
            state.docs.remove(seq);
        }
        Ok(seqs.len() as u64)
    }

    async fn count(&self, filter: &Value) -> Result<u64, StoreError> {
        self.ensure_open()?;
        let state = self.state.read().await;
        Ok(state.matching(filter)?.len() as u64)
    }

    async fn aggregate(&self, pipeline: &[Value]) -> Result<Vec<Value>, StoreError> {
        self.ensure_open()?;
        let docs = {
            let state = self.state.read().await;
            Self::snapshot(&state)
        };
        query::run_pipeline(docs, pipeline)
    }

    async fn create_index(&self, index: IndexSpec) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        if state.indexes.iter().any(|i| i == &index) {
            return Ok(());
        }
        if index.unique {
            let mut seen: Vec<&Value> = Vec::new();
            for doc in state.docs.values() {
                if let Some(value) = query::lookup(doc, &index.field) {
                    if seen.contains(&value) {
                        return Err(StoreError::DuplicateKey {
                            index: index.name.clone(),
                            key: value.to_string(),
                        });
                    }
                    seen.push(value);
                }
            }
        }
        debug!(collection = %self.name, index = %index.name, unique = index.unique, "Index created");
        state.indexes.retain(|i| i.name != index.name);
        state.indexes.push(index);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_assigns_native_ids_and_keeps_order() {
        let engine = MemoryEngine::new("test");
        let users = engine.collection("users").unwrap();
        let ids = users
            .insert(vec![json!({"n": 1}), json!({"_id": "fixed", "n": 2})])
            .await
            .unwrap();
        assert!(ids[0].is_native());
        assert_eq!(ids[1], DocumentId::Text("fixed".into()));

        let all = users.find(&json!({}), &FindOptions::new()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["n"], json!(1));
    }

    #[tokio::test]
    async fn unique_index_rejects_whole_batch() {
        let engine = MemoryEngine::new("test");
        let users = engine.collection("users").unwrap();
        users.create_index(IndexSpec::new("email").unique()).await.unwrap();

        let err = users
            .insert(vec![json!({"email": "a@x.io"}), json!({"email": "a@x.io"})])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        assert_eq!(users.count(&json!({})).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn single_duplicate_insert_leaves_collection_unchanged() {
        let engine = MemoryEngine::new("test");
        let users = engine.collection("users").unwrap();
        users.create_index(IndexSpec::new("email").unique()).await.unwrap();
        users.insert(vec![json!({"_id": "u1", "email": "a@x.io"})]).await.unwrap();

        for dup in [json!({"_id": "u1", "email": "b@x.io"}), json!({"email": "a@x.io"})] {
            let err = users.insert(vec![dup]).await.unwrap_err();
            assert!(matches!(err, StoreError::DuplicateKey { .. }));
        }
        let all = users.find(&json!({}), &FindOptions::new()).await.unwrap();
        assert_eq!(all, vec![json!({"_id": "u1", "email": "a@x.io"})]);

        users.insert(vec![json!({"email": "b@x.io"})]).await.unwrap();
        assert_eq!(users.count(&json!({})).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn multi_update_rejects_collisions_between_new_versions() {
        let engine = MemoryEngine::new("test");
        let c = engine.collection("c").unwrap();
        c.create_index(IndexSpec::new("slot").unique()).await.unwrap();
        c.insert(vec![json!({"g": 1, "slot": 1}), json!({"g": 1, "slot": 2})])
            .await
            .unwrap();

        let err = c
            .update(&json!({"g": 1}), &json!({"$set": {"slot": 7}}), WriteScope::Many, &UpdateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey { .. }));
        assert_eq!(c.count(&json!({"slot": 7})).await.unwrap(), 0);

        // new versions are checked against each other, not the versions they replace
        let shifted = c
            .update(&json!({"g": 1}), &json!({"$inc": {"slot": 1}}), WriteScope::Many, &UpdateOptions::default())
            .await
            .unwrap();
        assert_eq!(shifted.modified, 2);
        assert_eq!(c.count(&json!({"slot": {"$in": [2, 3]}})).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unsupported_id_values_are_invalid_ids() {
        let engine = MemoryEngine::new("test");
        let c = engine.collection("c").unwrap();
        for bad in [json!({"_id": {"$oid": "nope"}}), json!({"_id": 42})] {
            assert!(matches!(
                c.insert(vec![bad]).await,
                Err(StoreError::InvalidId(_))
            ));
        }
    }

    #[tokio::test]
    async fn update_counts_matched_and_modified() {
        let engine = MemoryEngine::new("test");
        let c = engine.collection("c").unwrap();
        c.insert(vec![json!({"g": 1, "v": 0}), json!({"g": 1, "v": 1})])
            .await
            .unwrap();

        let result = c
            .update(
                &json!({"g": 1}),
                &json!({"$set": {"v": 1}}),
                WriteScope::Many,
                &UpdateOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!((result.matched, result.modified), (2, 1));

        let upserted = c
            .update(
                &json!({"g": 2}),
                &json!({"$set": {"v": 9}}),
                WriteScope::One,
                &UpdateOptions::upsert(),
            )
            .await
            .unwrap();
        assert!(upserted.upserted_id.is_some());
        assert_eq!(c.count(&json!({"g": 2, "v": 9})).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn shutdown_makes_handles_unavailable() {
        let engine = MemoryEngine::new("test");
        let c = engine.collection("c").unwrap();
        engine.shutdown();
        assert!(matches!(
            c.count(&json!({})).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(engine.collection("c").is_err());
    }
}
