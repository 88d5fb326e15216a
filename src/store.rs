//! Generic key-addressed document store.
//!
//! Documents are JSON objects grouped into collections. The progress engine
//! only relies on point reads, whole-document writes, field merges, an atomic
//! add-to-set on array fields and a change feed; `PgStore` (see `db.rs`) and
//! [`MemoryStore`] both provide exactly that.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use std::{
    collections::{hash_map::Entry, HashMap},
    fmt,
};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Courses,
    Learners,
    Progress,
    Attempts,
    Quizzes,
    Templates,
    Certificates,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Courses => "courses",
            Collection::Learners => "learners",
            Collection::Progress => "progress",
            Collection::Attempts => "quiz_attempts",
            Collection::Quizzes => "quizzes",
            Collection::Templates => "certificate_templates",
            Collection::Certificates => "certificates",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{collection}/{key} does not exist")]
    NotFound { collection: &'static str, key: String },
    #[error("backend error: {0}")]
    Backend(String),
    #[error("document codec: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Emitted after every successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
    pub collection: Collection,
    pub key: String,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError>;

    /// Replaces the whole document.
    async fn set(&self, collection: Collection, key: &str, body: Value) -> Result<(), StoreError>;

    /// Atomically inserts `body` unless the key is taken. Returns the
    /// document already stored, or `None` when `body` was inserted.
    async fn create(
        &self,
        collection: Collection,
        key: &str,
        body: Value,
    ) -> Result<Option<Value>, StoreError>;

    /// Merges `fields` into an existing document.
    async fn update(
        &self,
        collection: Collection,
        key: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError>;

    /// Atomically appends `value` to the array `field` unless it is already
    /// present. The document is created when missing. `touch` is merged in
    /// only when the value was added. Returns whether the value was added.
    async fn add_to_set(
        &self,
        collection: Collection,
        key: &str,
        field: &str,
        value: Value,
        touch: Map<String, Value>,
    ) -> Result<bool, StoreError>;

    /// Removes `value` from the array `field`. Returns whether it was present.
    async fn remove_from_set(
        &self,
        collection: Collection,
        key: &str,
        field: &str,
        value: Value,
    ) -> Result<bool, StoreError>;

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool, StoreError>;

    async fn list(&self, collection: Collection) -> Result<Vec<(String, Value)>, StoreError>;

    /// Documents whose top-level `field` equals `value`.
    async fn find_by(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, StoreError>;

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange>;
}

pub async fn load<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: Collection,
    key: &str,
) -> CoreResult<Option<T>> {
    match store.get(collection, key).await? {
        Some(body) => Ok(Some(decode(collection, key, body)?)),
        None => Ok(None),
    }
}

pub async fn load_required<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: Collection,
    key: &str,
) -> CoreResult<T> {
    load(store, collection, key)
        .await?
        .ok_or_else(|| CoreError::not_found(format!("{collection}/{key}")))
}

pub async fn save<T: Serialize>(
    store: &dyn DocumentStore,
    collection: Collection,
    key: &str,
    doc: &T,
) -> CoreResult<()> {
    let body = serde_json::to_value(doc).map_err(StoreError::from)?;
    store.set(collection, key, body).await?;
    Ok(())
}

/// Stores `doc` unless the key is taken. Returns whichever document is
/// stored afterwards and whether it is `doc`.
pub async fn create<T: Serialize + DeserializeOwned>(
    store: &dyn DocumentStore,
    collection: Collection,
    key: &str,
    doc: T,
) -> CoreResult<(T, bool)> {
    let body = serde_json::to_value(&doc).map_err(StoreError::from)?;
    match store.create(collection, key, body).await? {
        Some(existing) => Ok((decode(collection, key, existing)?, false)),
        None => Ok((doc, true)),
    }
}

pub fn decode<T: DeserializeOwned>(
    collection: Collection,
    key: &str,
    body: Value,
) -> CoreResult<T> {
    serde_json::from_value(body)
        .map_err(|e| CoreError::Integrity(format!("{collection}/{key}: {e}")))
}

const CHANGE_FEED_CAPACITY: usize = 256;

/// Process-local store used by tests and by the binary when no database is
/// configured.
pub struct MemoryStore {
    docs: RwLock<HashMap<(Collection, String), Value>>,
    changes: broadcast::Sender<DocumentChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            docs: RwLock::new(HashMap::new()),
            changes,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&self, collection: Collection, key: &str) {
        // no receivers is fine
        let _ = self.changes.send(DocumentChange {
            collection,
            key: key.to_string(),
        });
    }
}

fn as_object_mut(doc: &mut Value) -> &mut Map<String, Value> {
    if !doc.is_object() {
        *doc = Value::Object(Map::new());
    }
    match doc {
        Value::Object(map) => map,
        _ => unreachable!("normalised to an object above"),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs.get(&(collection, key.to_string())).cloned())
    }

    async fn set(&self, collection: Collection, key: &str, body: Value) -> Result<(), StoreError> {
        self.docs
            .write()
            .await
            .insert((collection, key.to_string()), body);
        self.emit(collection, key);
        Ok(())
    }

    async fn create(
        &self,
        collection: Collection,
        key: &str,
        body: Value,
    ) -> Result<Option<Value>, StoreError> {
        {
            let mut docs = self.docs.write().await;
            match docs.entry((collection, key.to_string())) {
                Entry::Occupied(existing) => return Ok(Some(existing.get().clone())),
                Entry::Vacant(slot) => {
                    slot.insert(body);
                }
            }
        }
        self.emit(collection, key);
        Ok(None)
    }

    async fn update(
        &self,
        collection: Collection,
        key: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        {
            let mut docs = self.docs.write().await;
            let doc = docs
                .get_mut(&(collection, key.to_string()))
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.as_str(),
                    key: key.to_string(),
                })?;
            as_object_mut(doc).extend(fields);
        }
        self.emit(collection, key);
        Ok(())
    }

    async fn add_to_set(
        &self,
        collection: Collection,
        key: &str,
        field: &str,
        value: Value,
        touch: Map<String, Value>,
    ) -> Result<bool, StoreError> {
        {
            let mut docs = self.docs.write().await;
            let doc = docs
                .entry((collection, key.to_string()))
                .or_insert_with(|| Value::Object(Map::new()));
            let obj = as_object_mut(doc);
            let slot = obj
                .entry(field.to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            let Value::Array(items) = slot else {
                unreachable!("normalised to an array above")
            };
            if items.contains(&value) {
                return Ok(false);
            }
            items.push(value);
            obj.extend(touch);
        }
        self.emit(collection, key);
        Ok(true)
    }

    async fn remove_from_set(
        &self,
        collection: Collection,
        key: &str,
        field: &str,
        value: Value,
    ) -> Result<bool, StoreError> {
        let removed = {
            let mut docs = self.docs.write().await;
            match docs
                .get_mut(&(collection, key.to_string()))
                .and_then(|doc| doc.get_mut(field))
                .and_then(Value::as_array_mut)
            {
                Some(items) => {
                    let before = items.len();
                    items.retain(|v| v != &value);
                    items.len() != before
                }
                None => false,
            }
        };
        if removed {
            self.emit(collection, key);
        }
        Ok(removed)
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool, StoreError> {
        let existed = self
            .docs
            .write()
            .await
            .remove(&(collection, key.to_string()))
            .is_some();
        if existed {
            self.emit(collection, key);
        }
        Ok(existed)
    }

    async fn list(&self, collection: Collection) -> Result<Vec<(String, Value)>, StoreError> {
        let docs = self.docs.read().await;
        let mut out: Vec<(String, Value)> = docs
            .iter()
            .filter(|((c, _), _)| *c == collection)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn find_by(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self
            .list(collection)
            .await?
            .into_iter()
            .filter(|(_, doc)| doc.get(field) == Some(value))
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<DocumentChange> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_keeps_the_first_document() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe();

        let first = store
            .create(Collection::Certificates, "u1_c1", json!({"code": "A"}))
            .await
            .unwrap();
        assert_eq!(first, None);
        let second = store
            .create(Collection::Certificates, "u1_c1", json!({"code": "B"}))
            .await
            .unwrap();
        assert_eq!(second, Some(json!({"code": "A"})));

        let stored = store.get(Collection::Certificates, "u1_c1").await.unwrap();
        assert_eq!(stored, Some(json!({"code": "A"})));
        assert_eq!(feed.recv().await.unwrap().key, "u1_c1");
        assert!(feed.try_recv().is_err());
    }

    #[tokio::test]
    async fn add_to_set_creates_document_and_ignores_duplicates() {
        let store = MemoryStore::new();
        let mut touch = Map::new();
        touch.insert("updatedAt".into(), json!("t1"));

        let added = store
            .add_to_set(Collection::Progress, "u1_c1", "items", json!(2), touch.clone())
            .await
            .unwrap();
        assert!(added);

        touch.insert("updatedAt".into(), json!("t2"));
        let again = store
            .add_to_set(Collection::Progress, "u1_c1", "items", json!(2), touch)
            .await
            .unwrap();
        assert!(!again);

        let doc = store.get(Collection::Progress, "u1_c1").await.unwrap().unwrap();
        assert_eq!(doc["items"], json!([2]));
        // touch is only applied when the set actually grew
        assert_eq!(doc["updatedAt"], json!("t1"));
    }

    #[tokio::test]
    async fn update_requires_existing_document() {
        let store = MemoryStore::new();
        let err = store
            .update(Collection::Courses, "missing", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = MemoryStore::new();
        store
            .set(Collection::Courses, "c1", json!({"title": "Ladders", "subtopicsCount": 2}))
            .await
            .unwrap();
        let mut fields = Map::new();
        fields.insert("title".into(), json!("Ladder safety"));
        store.update(Collection::Courses, "c1", fields).await.unwrap();

        let doc = store.get(Collection::Courses, "c1").await.unwrap().unwrap();
        assert_eq!(doc["title"], "Ladder safety");
        assert_eq!(doc["subtopicsCount"], 2);
    }

    #[tokio::test]
    async fn remove_from_set_reports_presence() {
        let store = MemoryStore::new();
        store
            .set(Collection::Learners, "u1", json!({"courses": ["a", "b"]}))
            .await
            .unwrap();
        assert!(store
            .remove_from_set(Collection::Learners, "u1", "courses", json!("a"))
            .await
            .unwrap());
        assert!(!store
            .remove_from_set(Collection::Learners, "u1", "courses", json!("a"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn find_by_matches_top_level_field() {
        let store = MemoryStore::new();
        store
            .set(Collection::Attempts, "a1", json!({"courseId": "c1"}))
            .await
            .unwrap();
        store
            .set(Collection::Attempts, "a2", json!({"courseId": "c2"}))
            .await
            .unwrap();
        let hits = store
            .find_by(Collection::Attempts, "courseId", &json!("c1"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "a1");
    }

    #[tokio::test]
    async fn writes_are_published_on_the_change_feed() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        store
            .set(Collection::Learners, "u1", json!({}))
            .await
            .unwrap();
        let change = rx.recv().await.unwrap();
        assert_eq!(change.collection, Collection::Learners);
        assert_eq!(change.key, "u1");
    }

    #[tokio::test]
    async fn malformed_document_is_an_integrity_error() {
        let store = MemoryStore::new();
        store
            .set(Collection::Courses, "c1", json!({"title": 5}))
            .await
            .unwrap();
        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Titled {
            title: String,
        }
        let err = load::<Titled>(&store, Collection::Courses, "c1")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Integrity);
    }
}
