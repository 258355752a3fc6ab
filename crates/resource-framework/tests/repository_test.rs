use chrono::{DateTime, Utc};
use resource_framework::document::{timestamp_now, IdPolicy};
use resource_framework::store::{AggregateOptions, IndexSpec, UpdateOptions};
use resource_framework::{
    BaseRepository, DocumentCollection, DocumentId, ErrorKind, FindOptions, MemoryEngine,
    RepositoryConfig, RepositoryError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// --- Test Document ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Book {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    id: Option<DocumentId>,
    title: String,
    isbn: String,
    pages: u32,
    #[serde(rename = "createdAt", with = "chrono::serde::ts_microseconds")]
    created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "chrono::serde::ts_microseconds")]
    updated_at: DateTime<Utc>,
}

impl Book {
    fn new(title: &str, isbn: &str, pages: u32) -> Self {
        let now = timestamp_now();
        Self {
            id: None,
            title: title.into(),
            isbn: isbn.into(),
            pages,
            created_at: now,
            updated_at: now,
        }
    }
}

async fn books() -> BaseRepository<Book> {
    let engine = MemoryEngine::new("library");
    let collection = engine.collection("books").unwrap();
    collection
        .create_index(IndexSpec::new("isbn").unique())
        .await
        .unwrap();
    BaseRepository::with_config(collection, RepositoryConfig::default().entity("book"))
}

// --- Tests ---

#[tokio::test]
async fn lookup_after_insert_returns_equal_entity() {
    let repo = books().await;
    let book = Book::new("Dune", "978-0441013593", 412);

    let id = repo.insert_one(&book).await.unwrap();
    assert!(id.is_native());

    let found = repo.find_by_id(&id.to_string()).await.unwrap();
    assert_eq!(found.id, Some(id));
    assert_eq!(
        Book { id: None, ..found },
        book,
        "every non-identifier field round-trips"
    );
}

#[tokio::test]
async fn unique_index_yields_already_exists_and_keeps_one_document() {
    let repo = books().await;
    repo.insert_one(&Book::new("Dune", "isbn-1", 412)).await.unwrap();

    let err = repo
        .insert_one(&Book::new("Dune (reprint)", "isbn-1", 500))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(repo.count(json!({"isbn": "isbn-1"})).await.unwrap(), 1);
}

#[tokio::test]
async fn insert_many_is_all_or_nothing() {
    let repo = books().await;
    repo.insert_one(&Book::new("A", "isbn-a", 1)).await.unwrap();

    let batch = [Book::new("B", "isbn-b", 2), Book::new("A again", "isbn-a", 3)];
    assert!(repo.insert_many(&batch).await.unwrap_err().is_already_exists());
    assert_eq!(repo.count(json!({})).await.unwrap(), 1);

    let ids = repo
        .insert_many(&[Book::new("B", "isbn-b", 2), Book::new("C", "isbn-c", 3)])
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);
    assert!(matches!(
        repo.insert_many(&[]).await,
        Err(RepositoryError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn missing_well_formed_id_is_not_found() {
    let repo = books().await;
    let missing = DocumentId::generate().to_string();
    assert!(repo.find_by_id(&missing).await.unwrap_err().is_not_found());
    assert!(repo.find_by_id("no-such-legacy-id").await.unwrap_err().is_not_found());
    assert_eq!(
        repo.find_by_id("").await.unwrap_err().kind(),
        ErrorKind::InvalidId
    );
}

#[tokio::test]
async fn text_ids_are_matched_literally_unless_strict() {
    let engine = MemoryEngine::new("library");
    let collection = engine.collection("books").unwrap();
    collection
        .insert(vec![json!({
            "_id": "legacy-7",
            "title": "Old",
            "isbn": "isbn-old",
            "pages": 10,
            "createdAt": 0,
            "updatedAt": 0,
        })])
        .await
        .unwrap();

    let lenient = BaseRepository::<Book>::new(collection.clone());
    let book = lenient.find_by_id("legacy-7").await.unwrap();
    assert_eq!(book.id, Some(DocumentId::Text("legacy-7".into())));

    let strict = BaseRepository::<Book>::with_config(
        collection,
        RepositoryConfig::default().id_policy(IdPolicy::Strict),
    );
    assert_eq!(
        strict.find_by_id("legacy-7").await.unwrap_err().kind(),
        ErrorKind::InvalidId
    );
}

#[tokio::test]
async fn uuid_shaped_text_ids_remain_reachable() {
    let engine = MemoryEngine::new("library");
    let collection = engine.collection("books").unwrap();
    let legacy = ["6f1c2a3e-7b0d-4c55-9a1e-2b3c4d5e6f70", "d41d8cd98f00b204e9800998ecf8427e"];
    for (i, id) in legacy.iter().enumerate() {
        collection
            .insert(vec![json!({
                "_id": id,
                "title": format!("Imported {i}"),
                "isbn": format!("isbn-imported-{i}"),
                "pages": 10,
                "createdAt": 0,
                "updatedAt": 0,
            })])
            .await
            .unwrap();
    }
    let repo = BaseRepository::<Book>::new(collection);

    for id in legacy {
        let book = repo.find_by_id(id).await.unwrap();
        assert_eq!(book.id, Some(DocumentId::Text(id.into())));

        repo.update_by_id(id, json!({"pages": 11})).await.unwrap();
        assert_eq!(repo.find_by_id(id).await.unwrap().pages, 11);

        repo.delete_by_id(id).await.unwrap();
        assert!(repo.find_by_id(id).await.unwrap_err().is_not_found());
    }
    assert_eq!(repo.count(json!({})).await.unwrap(), 0);
}

#[tokio::test]
async fn update_by_id_preserves_other_fields_and_advances_updated_at() {
    let repo = books().await;
    let id = repo
        .insert_one(&Book::new("Dune", "isbn-1", 412))
        .await
        .unwrap()
        .to_string();
    let before = repo.find_by_id(&id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    repo.update_by_id(&id, json!({"title": "Dune Messiah"})).await.unwrap();

    let after = repo.find_by_id(&id).await.unwrap();
    assert_eq!(after.title, "Dune Messiah");
    assert_eq!(after.isbn, before.isbn);
    assert_eq!(after.pages, before.pages);
    assert_eq!(after.created_at, before.created_at);
    assert!(after.updated_at > before.updated_at);

    repo.update_by_id(&id, json!({"$inc": {"pages": 8}})).await.unwrap();
    assert_eq!(repo.find_by_id(&id).await.unwrap().pages, 420);

    let missing = DocumentId::generate().to_string();
    assert!(repo
        .update_by_id(&missing, json!({"title": "x"}))
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn delete_is_terminal() {
    let repo = books().await;
    let id = repo
        .insert_one(&Book::new("Dune", "isbn-1", 412))
        .await
        .unwrap()
        .to_string();

    repo.delete_by_id(&id).await.unwrap();
    assert!(repo.find_by_id(&id).await.unwrap_err().is_not_found());
    assert!(repo.delete_by_id(&id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn filtered_queries_and_bulk_operations() {
    let repo = books().await;
    for (i, pages) in [300, 120, 800].into_iter().enumerate() {
        repo.insert_one(&Book::new(&format!("T{i}"), &format!("isbn-{i}"), pages))
            .await
            .unwrap();
    }

    let long = repo
        .find(
            json!({"pages": {"$gte": 300}}),
            FindOptions::new().sort_desc("pages"),
        )
        .await
        .unwrap();
    let pages: Vec<u32> = long.iter().map(|b| b.pages).collect();
    assert_eq!(pages, vec![800, 300]);

    let first = repo
        .find_all(FindOptions::new().sort_asc("pages").limit(1))
        .await
        .unwrap();
    assert_eq!(first[0].pages, 120);

    assert_eq!(repo.find_one(json!({"isbn": "isbn-2"})).await.unwrap().pages, 800);
    assert!(repo.find_one(json!({"isbn": "nope"})).await.unwrap_err().is_not_found());
    assert!(repo.exists(json!({"title": "T1"})).await.unwrap());

    let modified = repo
        .update_many(
            json!({"pages": {"$lt": 500}}),
            json!({"$set": {"title": "short"}}),
            UpdateOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(modified, 2);
    assert_eq!(
        repo.update_many(json!({"pages": 0}), json!({"$set": {"title": "x"}}), UpdateOptions::default())
            .await
            .unwrap(),
        0
    );

    assert!(repo
        .update_one(json!({"isbn": "nope"}), json!({"$set": {"pages": 1}}), UpdateOptions::default())
        .await
        .unwrap_err()
        .is_not_found());

    assert!(repo.delete_one(json!({"isbn": "nope"})).await.unwrap_err().is_not_found());
    assert_eq!(repo.delete_many(json!({"title": "short"})).await.unwrap(), 2);
    assert_eq!(repo.delete_many(json!({"title": "short"})).await.unwrap(), 0);
    assert_eq!(repo.count(json!({})).await.unwrap(), 1);
}

#[tokio::test]
async fn aggregate_decodes_results_as_documents() {
    let repo = books().await;
    for (i, pages) in [50, 150, 250].into_iter().enumerate() {
        repo.insert_one(&Book::new(&format!("T{i}"), &format!("isbn-{i}"), pages))
            .await
            .unwrap();
    }

    let big = repo
        .aggregate(
            &[json!({"$match": {"pages": {"$gt": 100}}}), json!({"$sort": {"pages": -1}})],
            AggregateOptions {
                max_time: Some(Duration::from_secs(1)),
            },
        )
        .await
        .unwrap();
    assert_eq!(big.iter().map(|b| b.pages).collect::<Vec<_>>(), vec![250, 150]);

    let err = repo
        .aggregate(&[json!({"$lookup": {}})], AggregateOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
}

#[tokio::test]
async fn malformed_native_id_in_document_is_invalid_id() {
    let engine = MemoryEngine::new("library");
    let raw = BaseRepository::<serde_json::Value>::new(engine.collection("books").unwrap());

    let err = raw
        .insert_one(&json!({"_id": {"$oid": "nope"}, "title": "Bad"}))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidId);
    assert_eq!(raw.count(json!({})).await.unwrap(), 0);
}

#[tokio::test]
async fn storage_faults_are_wrapped_with_operation_context() {
    let engine = MemoryEngine::new("library");
    let collection: Arc<dyn DocumentCollection> = engine.collection("books").unwrap();
    let repo = BaseRepository::<Book>::with_config(collection, RepositoryConfig::default().entity("book"));
    engine.shutdown();

    let err = repo.count(json!({})).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(err.to_string().starts_with("count book:"));
}
