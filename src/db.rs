use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{Pool, Postgres, Row};
use tokio::sync::broadcast;

use crate::store::{Collection, DocumentChange, DocumentStore, StoreError};

pub type Db = Pool<Postgres>;

pub async fn connect(url: &str) -> Result<Db> {
    Ok(Pool::<Postgres>::connect(url).await?)
}

/// Document store over a single JSONB table (see `migrations/`).
///
/// The change feed only carries writes made through this process.
pub struct PgStore {
    db: Db,
    changes: broadcast::Sender<DocumentChange>,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self { db, changes }
    }

    fn emit(&self, collection: Collection, key: &str) {
        let _ = self.changes.send(DocumentChange {
            collection,
            key: key.to_string(),
        });
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection=$1 AND key=$2")
            .bind(collection.as_str())
            .bind(key)
            .fetch_optional(&self.db)
            .await?;
        Ok(row.map(|r| r.get::<Value, _>("body")))
    }

    async fn set(&self, collection: Collection, key: &str, body: Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO documents (collection, key, body)
            VALUES ($1,$2,$3)
            ON CONFLICT (collection, key)
            DO UPDATE SET body=EXCLUDED.body, updated_at=now()
            "#,
        )
        .bind(collection.as_str())
        .bind(key)
        .bind(body)
        .execute(&self.db)
        .await?;
        self.emit(collection, key);
        Ok(())
    }

    async fn create(
        &self,
        collection: Collection,
        key: &str,
        body: Value,
    ) -> Result<Option<Value>, StoreError> {
        let res = sqlx::query(
            r#"
            INSERT INTO documents (collection, key, body)
            VALUES ($1,$2,$3)
            ON CONFLICT (collection, key) DO NOTHING
            "#,
        )
        .bind(collection.as_str())
        .bind(key)
        .bind(body)
        .execute(&self.db)
        .await?;
        if res.rows_affected() > 0 {
            self.emit(collection, key);
            return Ok(None);
        }
        // a fresh statement sees the row that won the conflict
        match self.get(collection, key).await? {
            Some(existing) => Ok(Some(existing)),
            None => Err(StoreError::Backend(format!(
                "{collection}/{key} was removed while being created"
            ))),
        }
    }

    async fn update(
        &self,
        collection: Collection,
        key: &str,
        fields: Map<String, Value>,
    ) -> Result<(), StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE documents SET body = body || $3, updated_at=now()
            WHERE collection=$1 AND key=$2
            "#,
        )
        .bind(collection.as_str())
        .bind(key)
        .bind(Value::Object(fields))
        .execute(&self.db)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                collection: collection.as_str(),
                key: key.to_string(),
            });
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
        // One statement: the row lock taken by ON CONFLICT serialises
        // concurrent additions, and the WHERE turns a duplicate into a no-op.
        let res = sqlx::query(
            r#"
            INSERT INTO documents (collection, key, body)
            VALUES ($1, $2, $5 || jsonb_build_object($3::text, jsonb_build_array($4::jsonb)))
            ON CONFLICT (collection, key)
            DO UPDATE SET
                body = documents.body || $5 || jsonb_build_object(
                    $3::text,
                    COALESCE(documents.body -> $3::text, '[]'::jsonb)
                        || jsonb_build_array($4::jsonb)
                ),
                updated_at = now()
            WHERE NOT (
                COALESCE(documents.body -> $3::text, '[]'::jsonb) @> jsonb_build_array($4::jsonb)
            )
            "#,
        )
        .bind(collection.as_str())
        .bind(key)
        .bind(field)
        .bind(value)
        .bind(Value::Object(touch))
        .execute(&self.db)
        .await?;
        let added = res.rows_affected() > 0;
        if added {
            self.emit(collection, key);
        }
        Ok(added)
    }

    async fn remove_from_set(
        &self,
        collection: Collection,
        key: &str,
        field: &str,
        value: Value,
    ) -> Result<bool, StoreError> {
        let res = sqlx::query(
            r#"
            UPDATE documents SET
                body = body || jsonb_build_object($3::text, COALESCE(
                    (SELECT jsonb_agg(v) FROM jsonb_array_elements(body -> $3::text) v
                     WHERE v <> $4::jsonb),
                    '[]'::jsonb
                )),
                updated_at = now()
            WHERE collection=$1 AND key=$2
              AND COALESCE(body -> $3::text, '[]'::jsonb) @> jsonb_build_array($4::jsonb)
            "#,
        )
        .bind(collection.as_str())
        .bind(key)
        .bind(field)
        .bind(value)
        .execute(&self.db)
        .await?;
        let removed = res.rows_affected() > 0;
        if removed {
            self.emit(collection, key);
        }
        Ok(removed)
    }

    async fn delete(&self, collection: Collection, key: &str) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM documents WHERE collection=$1 AND key=$2")
            .bind(collection.as_str())
            .bind(key)
            .execute(&self.db)
            .await?;
        let existed = res.rows_affected() > 0;
        if existed {
            self.emit(collection, key);
        }
        Ok(existed)
    }

    async fn list(&self, collection: Collection) -> Result<Vec<(String, Value)>, StoreError> {
        let rows = sqlx::query("SELECT key, body FROM documents WHERE collection=$1 ORDER BY key")
            .bind(collection.as_str())
            .fetch_all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("key"), r.get::<Value, _>("body")))
            .collect())
    }

    async fn find_by(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(String, Value)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT key, body FROM documents
            WHERE collection=$1 AND body -> $2::text = $3::jsonb
            ORDER BY key
            "#,
        )
        .bind(collection.as_str())
        .bind(field)
        .bind(value)
        .fetch_all(&self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("key"), r.get::<Value, _>("body")))
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
    use std::sync::Arc;
    use uuid::Uuid;

    async fn store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let db = connect(&url).await.unwrap();
        sqlx::migrate!("./migrations").run(&db).await.unwrap();
        PgStore::new(db)
    }

    #[tokio::test]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn concurrent_adds_to_set_converge() {
        let store = Arc::new(store().await);
        let key = format!("pg-test-{}", Uuid::new_v4());

        let mut tasks = Vec::new();
        for i in 0..16u32 {
            let store = store.clone();
            let key = key.clone();
            tasks.push(tokio::spawn(async move {
                let mut touch = Map::new();
                touch.insert("updatedAt".into(), json!(i));
                let field = "completedSubtopics";
                store
                    .add_to_set(Collection::Progress, &key, field, json!(i % 4), touch)
                    .await
                    .unwrap()
            }));
        }
        let mut added = 0;
        for t in tasks {
            if t.await.unwrap() {
                added += 1;
            }
        }
        assert_eq!(added, 4);

        let body = store.get(Collection::Progress, &key).await.unwrap().unwrap();
        let mut items: Vec<u64> = body["completedSubtopics"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_u64().unwrap())
            .collect();
        items.sort_unstable();
        assert_eq!(items, vec![0, 1, 2, 3]);
        store.delete(Collection::Progress, &key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn concurrent_creates_keep_one_document() {
        let store = Arc::new(store().await);
        let key = format!("pg-test-{}", Uuid::new_v4());

        let (a, b) = tokio::join!(
            store.create(Collection::Certificates, &key, json!({"code": "A"})),
            store.create(Collection::Certificates, &key, json!({"code": "B"})),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(a.is_none() ^ b.is_none());

        let stored = store.get(Collection::Certificates, &key).await.unwrap().unwrap();
        assert_eq!(a.or(b), Some(stored));
        store.delete(Collection::Certificates, &key).await.unwrap();
    }
}
