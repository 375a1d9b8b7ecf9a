//! SQLite document-store adapter.
//!
//! Each collection is a two-column table `(key TEXT PRIMARY KEY, doc TEXT)`.
//! Filters and sorts compile to `json_extract` expressions; unique and
//! sparse indexes are SQLite expression indexes, so constraint checks ride
//! on the engine rather than on application scans.

use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection, ErrorCode};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::document::{DocumentStore, Filter, IndexSpec, Page, SortDirection, SortKey};
use crate::error::StoreError;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Connection(format!("open {}: {}", path, e)))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

/// Collection and index names: letters, digits, underscores only.
fn check_ident(name: &str) -> Result<(), StoreError> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.chars().next().unwrap().is_ascii_digit();
    if ok {
        Ok(())
    } else {
        Err(StoreError::Query(format!("invalid identifier: {}", name)))
    }
}

/// Field paths additionally allow dots for nested lookups.
fn check_field_path(path: &str) -> Result<(), StoreError> {
    if path.is_empty() || path.split('.').any(|seg| check_ident(seg).is_err()) {
        return Err(StoreError::Query(format!("invalid field path: {}", path)));
    }
    Ok(())
}

fn json_path(field: &str) -> String {
    format!("$.{}", field)
}

/// Convert a JSON scalar into a bindable SQLite value. `json_extract`
/// surfaces booleans as 0/1 integers, so booleans bind the same way.
fn bind_value(value: &Value) -> Result<rusqlite::types::Value, StoreError> {
    use rusqlite::types::Value as Sql;
    match value {
        Value::String(s) => Ok(Sql::Text(s.clone())),
        Value::Bool(b) => Ok(Sql::Integer(*b as i64)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Sql::Integer(i))
            } else {
                Ok(Sql::Real(n.as_f64().unwrap_or(0.0)))
            }
        }
        other => Err(StoreError::Query(format!(
            "filters accept scalar values only, got {}",
            other
        ))),
    }
}

/// WHERE clause + params for a conjunctive filter set.
fn build_where(filters: &[Filter]) -> Result<(String, Vec<rusqlite::types::Value>), StoreError> {
    if filters.is_empty() {
        return Ok((String::new(), Vec::new()));
    }
    let mut clauses = Vec::with_capacity(filters.len());
    let mut params = Vec::new();
    for f in filters {
        check_field_path(&f.field)?;
        if f.value.is_null() {
            clauses.push(format!("json_extract(doc, '{}') IS NULL", json_path(&f.field)));
        } else {
            clauses.push(format!("json_extract(doc, '{}') = ?", json_path(&f.field)));
            params.push(bind_value(&f.value)?);
        }
    }
    Ok((format!(" WHERE {}", clauses.join(" AND ")), params))
}

fn build_order(sort: &[SortKey]) -> Result<String, StoreError> {
    let mut parts = Vec::with_capacity(sort.len() + 1);
    for key in sort {
        check_field_path(&key.field)?;
        let dir = match key.direction {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        };
        parts.push(format!(
            "json_extract(doc, '{}') {}",
            json_path(&key.field),
            dir
        ));
    }
    // Stable tiebreak: equal sort values resolve by key lexical order.
    parts.push("key ASC".to_string());
    Ok(format!(" ORDER BY {}", parts.join(", ")))
}

fn map_sqlite_err(collection: &str, e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(inner, _) if inner.code == ErrorCode::ConstraintViolation => {
            StoreError::DuplicateKey(format!("unique index violated in {}", collection))
        }
        rusqlite::Error::SqliteFailure(_, Some(msg)) if msg.contains("no such table") => {
            StoreError::CollectionNotFound(collection.to_string())
        }
        _ => {
            let msg = e.to_string();
            if msg.contains("no such table") {
                StoreError::CollectionNotFound(collection.to_string())
            } else {
                StoreError::Query(msg)
            }
        }
    }
}

/// Split an incoming document into (key, body-without-id).
fn take_key(document: &mut Value) -> Result<String, StoreError> {
    let obj = document
        .as_object_mut()
        .ok_or_else(|| StoreError::Query("document must be a JSON object".to_string()))?;
    match obj.remove("id") {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(StoreError::Query(format!("id must be a string, got {}", other))),
        None => Ok(Uuid::new_v4().to_string()),
    }
}

/// Re-attach the external id on the way out.
fn with_id(mut document: Value, key: &str) -> Value {
    if let Some(obj) = document.as_object_mut() {
        obj.insert("id".to_string(), Value::String(key.to_string()));
    }
    document
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create(&self, collection: &str, mut document: Value) -> Result<Value, StoreError> {
        check_ident(collection)?;
        let key = take_key(&mut document)?;
        let body = serde_json::to_string(&document)?;

        let conn = self.lock();
        conn.execute(
            &format!("INSERT INTO \"{}\" (key, doc) VALUES (?1, ?2)", collection),
            params![key, body],
        )
        .map_err(|e| map_sqlite_err(collection, e))?;
        debug!(collection, key, "document created");

        Ok(with_id(document, &key))
    }

    async fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        check_ident(collection)?;
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT doc FROM \"{}\" WHERE key = ?1", collection))
            .map_err(|e| map_sqlite_err(collection, e))?;
        let row: Option<String> = match stmt.query_row(params![id], |row| row.get(0)) {
            Ok(doc) => Some(doc),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(map_sqlite_err(collection, e)),
        };
        match row {
            Some(body) => Ok(Some(with_id(serde_json::from_str(&body)?, id))),
            None => Ok(None),
        }
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        page: Page,
        sort: &[SortKey],
    ) -> Result<Vec<Value>, StoreError> {
        check_ident(collection)?;
        let (where_sql, params) = build_where(filters)?;
        let order_sql = build_order(sort)?;
        let sql = format!(
            "SELECT key, doc FROM \"{}\"{}{} LIMIT {} OFFSET {}",
            collection,
            where_sql,
            order_sql,
            page.limit.min(crate::document::MAX_PAGE_LIMIT),
            page.skip
        );

        let conn = self.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| map_sqlite_err(collection, e))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| map_sqlite_err(collection, e))?;

        let mut out = Vec::new();
        for row in rows {
            let (key, body) = row.map_err(|e| map_sqlite_err(collection, e))?;
            out.push(with_id(serde_json::from_str(&body)?, &key));
        }
        Ok(out)
    }

    async fn find_one(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Option<Value>, StoreError> {
        let mut results = self.query(collection, filters, Page::first(1), &[]).await?;
        Ok(results.pop())
    }

    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Value, StoreError> {
        check_ident(collection)?;
        let patch_obj = match patch {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::Query(format!(
                    "patch must be a JSON object, got {}",
                    other
                )))
            }
        };

        let conn = self.lock();
        let existing: String = match conn.query_row(
            &format!("SELECT doc FROM \"{}\" WHERE key = ?1", collection),
            params![id],
            |row| row.get(0),
        ) {
            Ok(doc) => doc,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(StoreError::NotFound(format!("{}/{}", collection, id)))
            }
            Err(e) => return Err(map_sqlite_err(collection, e)),
        };

        let mut merged: Value = serde_json::from_str(&existing)?;
        if let Some(obj) = merged.as_object_mut() {
            for (field, value) in patch_obj {
                if field == "id" {
                    continue;
                }
                obj.insert(field, value);
            }
        }
        let body = serde_json::to_string(&merged)?;

        conn.execute(
            &format!("UPDATE \"{}\" SET doc = ?2 WHERE key = ?1", collection),
            params![id, body],
        )
        .map_err(|e| map_sqlite_err(collection, e))?;

        Ok(with_id(merged, id))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        check_ident(collection)?;
        let conn = self.lock();
        let removed = conn
            .execute(
                &format!("DELETE FROM \"{}\" WHERE key = ?1", collection),
                params![id],
            )
            .map_err(|e| map_sqlite_err(collection, e))?;
        Ok(removed > 0)
    }

    async fn count(&self, collection: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        check_ident(collection)?;
        let (where_sql, params) = build_where(filters)?;
        let conn = self.lock();
        let n: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM \"{}\"{}", collection, where_sql),
                rusqlite::params_from_iter(params),
                |row| row.get(0),
            )
            .map_err(|e| map_sqlite_err(collection, e))?;
        Ok(n as u64)
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        check_ident(collection)?;
        let conn = self.lock();
        match conn.query_row(
            &format!("SELECT 1 FROM \"{}\" WHERE key = ?1", collection),
            params![id],
            |_row| Ok(()),
        ) {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(map_sqlite_err(collection, e)),
        }
    }

    async fn create_collection(&self, collection: &str) -> Result<(), StoreError> {
        check_ident(collection)?;
        let conn = self.lock();
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS \"{}\" (key TEXT PRIMARY KEY, doc TEXT NOT NULL)",
                collection
            ),
            [],
        )
        .map_err(|e| map_sqlite_err(collection, e))?;
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError> {
        check_ident(collection)?;
        let conn = self.lock();
        conn.execute(&format!("DROP TABLE IF EXISTS \"{}\"", collection), [])
            .map_err(|e| map_sqlite_err(collection, e))?;
        Ok(())
    }

    async fn truncate_collection(&self, collection: &str) -> Result<(), StoreError> {
        check_ident(collection)?;
        let conn = self.lock();
        conn.execute(&format!("DELETE FROM \"{}\"", collection), [])
            .map_err(|e| map_sqlite_err(collection, e))?;
        Ok(())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        check_ident(collection)?;
        let conn = self.lock();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![collection],
                |row| row.get(0),
            )
            .map_err(|e| map_sqlite_err(collection, e))?;
        Ok(n > 0)
    }

    async fn create_index(&self, collection: &str, spec: IndexSpec) -> Result<(), StoreError> {
        check_ident(collection)?;
        if spec.fields.is_empty() {
            return Err(StoreError::Query("index needs at least one field".to_string()));
        }
        for field in &spec.fields {
            check_field_path(field)?;
        }

        let name = spec.name(collection);
        let columns = spec
            .fields
            .iter()
            .map(|f| format!("json_extract(doc, '{}')", json_path(f)))
            .collect::<Vec<_>>()
            .join(", ");
        let unique = if spec.unique { "UNIQUE " } else { "" };
        let sparse = if spec.sparse {
            format!(
                " WHERE json_extract(doc, '{}') IS NOT NULL",
                json_path(&spec.fields[0])
            )
        } else {
            String::new()
        };

        let conn = self.lock();
        conn.execute(
            &format!(
                "CREATE {}INDEX IF NOT EXISTS \"{}\" ON \"{}\" ({}){}",
                unique, name, collection, columns, sparse
            ),
            [],
        )
        .map_err(|e| map_sqlite_err(collection, e))?;
        debug!(collection, index = %name, "index ensured");
        Ok(())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<(), StoreError> {
        check_ident(collection)?;
        check_ident(name)?;
        let conn = self.lock();
        conn.execute(&format!("DROP INDEX IF EXISTS \"{}\"", name), [])
            .map_err(|e| map_sqlite_err(collection, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store_with(collection: &str) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_collection(collection).await.unwrap();
        store
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = store_with("users").await;
        let created = store
            .create("users", json!({"name": "Ada", "email": "ada@example.com"}))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let fetched = store.get_by_id("users", &id).await.unwrap().unwrap();
        assert_eq!(fetched["name"], "Ada");
        assert_eq!(fetched["id"], id.as_str());
    }

    #[tokio::test]
    async fn returned_documents_have_no_internal_key_fields() {
        let store = store_with("users").await;
        let created = store.create("users", json!({"name": "Ada"})).await.unwrap();
        for field in created.as_object().unwrap().keys() {
            assert!(!field.starts_with('_'), "leaked internal field: {}", field);
        }
        assert!(created.get("id").is_some());
    }

    #[tokio::test]
    async fn unique_index_rejects_duplicate_email() {
        let store = store_with("users").await;
        store
            .create_index("users", IndexSpec::unique(&["email"]))
            .await
            .unwrap();
        store
            .create("users", json!({"email": "a@example.com"}))
            .await
            .unwrap();
        let err = store
            .create("users", json!({"email": "a@example.com"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn update_merges_partially_and_keeps_other_fields() {
        let store = store_with("settings").await;
        let created = store
            .create("settings", json!({"theme": "dark", "language": "fr"}))
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap();

        let updated = store
            .update("settings", id, json!({"language": "en"}))
            .await
            .unwrap();
        assert_eq!(updated["theme"], "dark");
        assert_eq!(updated["language"], "en");
    }

    #[tokio::test]
    async fn update_missing_document_is_not_found() {
        let store = store_with("users").await;
        let err = store
            .update("users", "nope", json!({"name": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = store_with("users").await;
        let created = store.create("users", json!({"name": "Ada"})).await.unwrap();
        let id = created["id"].as_str().unwrap();
        assert!(store.delete("users", id).await.unwrap());
        assert!(!store.delete("users", id).await.unwrap());
    }

    #[tokio::test]
    async fn query_filters_sorts_and_paginates() {
        let store = store_with("msgs").await;
        for (i, who) in ["a", "b", "a", "a"].iter().enumerate() {
            store
                .create("msgs", json!({"owner": who, "seq": i as i64}))
                .await
                .unwrap();
        }

        let owned = store
            .query(
                "msgs",
                &[Filter::eq("owner", "a")],
                Page::default(),
                &[SortKey::desc("seq")],
            )
            .await
            .unwrap();
        assert_eq!(owned.len(), 3);
        assert_eq!(owned[0]["seq"], 3);

        let window = store
            .query(
                "msgs",
                &[Filter::eq("owner", "a")],
                Page::new(1, 1),
                &[SortKey::asc("seq")],
            )
            .await
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0]["seq"], 2);
    }

    #[tokio::test]
    async fn nested_field_filters_work() {
        let store = store_with("files").await;
        store
            .create("files", json!({"checksums": {"sha256": "abc"}}))
            .await
            .unwrap();
        let hit = store
            .find_one("files", &[Filter::eq("checksums.sha256", "abc")])
            .await
            .unwrap();
        assert!(hit.is_some());
        let miss = store
            .find_one("files", &[Filter::eq("checksums.sha256", "zzz")])
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn count_and_exists() {
        let store = store_with("users").await;
        let a = store.create("users", json!({"role": "user"})).await.unwrap();
        store.create("users", json!({"role": "root"})).await.unwrap();

        assert_eq!(store.count("users", &[]).await.unwrap(), 2);
        assert_eq!(
            store
                .count("users", &[Filter::eq("role", "root")])
                .await
                .unwrap(),
            1
        );
        assert!(store
            .exists("users", a["id"].as_str().unwrap())
            .await
            .unwrap());
        assert!(!store.exists("users", "missing").await.unwrap());
    }

    #[tokio::test]
    async fn missing_collection_surfaces_as_collection_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store.create("ghost", json!({})).await.unwrap_err();
        assert!(matches!(err, StoreError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn collection_admin_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(!store.collection_exists("tmp").await.unwrap());
        store.create_collection("tmp").await.unwrap();
        assert!(store.collection_exists("tmp").await.unwrap());

        store.create("tmp", json!({"x": 1})).await.unwrap();
        store.truncate_collection("tmp").await.unwrap();
        assert_eq!(store.count("tmp", &[]).await.unwrap(), 0);

        store.drop_collection("tmp").await.unwrap();
        assert!(!store.collection_exists("tmp").await.unwrap());
    }

    #[tokio::test]
    async fn hostile_identifiers_are_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.create_collection("users; DROP TABLE x").await.is_err());
        let store2 = store_with("users").await;
        let err = store2
            .query(
                "users",
                &[Filter::eq("a' OR '1'='1", "x")],
                Page::default(),
                &[],
            )
            .await;
        assert!(err.is_err());
    }
}
