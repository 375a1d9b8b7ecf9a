//! In-memory document store used by tests.
//!
//! Behaves like the SQLite adapter from the trait's point of view: same id
//! projection, same DuplicateKey/NotFound/CollectionNotFound semantics,
//! same stable key tiebreak on sorts.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::document::{lookup, DocumentStore, Filter, IndexSpec, Page, SortDirection, SortKey};
use crate::error::StoreError;

#[derive(Default)]
struct Collection {
    docs: BTreeMap<String, Value>,
    indexes: Vec<StoredIndex>,
}

struct StoredIndex {
    name: String,
    fields: Vec<String>,
    unique: bool,
    sparse: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(doc: &Value, filters: &[Filter]) -> bool {
    filters.iter().all(|f| match lookup(doc, &f.field) {
        Some(v) => v == &f.value,
        None => f.value.is_null(),
    })
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => match (x, y) {
            (Value::String(s1), Value::String(s2)) => s1.cmp(s2),
            (Value::Number(n1), Value::Number(n2)) => n1
                .as_f64()
                .partial_cmp(&n2.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::Bool(b1), Value::Bool(b2)) => b1.cmp(b2),
            _ => Ordering::Equal,
        },
    }
}

/// Check all unique indexes of a collection against a candidate document,
/// excluding the document stored under `skip_key` (for updates).
fn check_unique(
    collection: &Collection,
    candidate: &Value,
    skip_key: Option<&str>,
) -> Result<(), StoreError> {
    for index in collection.indexes.iter().filter(|i| i.unique) {
        let candidate_values: Vec<Option<&Value>> = index
            .fields
            .iter()
            .map(|f| lookup(candidate, f))
            .collect();
        if index.sparse && candidate_values.first().map(|v| v.is_none()).unwrap_or(true) {
            continue;
        }
        for (key, existing) in &collection.docs {
            if Some(key.as_str()) == skip_key {
                continue;
            }
            let existing_values: Vec<Option<&Value>> =
                index.fields.iter().map(|f| lookup(existing, f)).collect();
            if index.sparse && existing_values.first().map(|v| v.is_none()).unwrap_or(true) {
                continue;
            }
            if candidate_values == existing_values {
                return Err(StoreError::DuplicateKey(format!(
                    "unique index {} violated",
                    index.name
                )));
            }
        }
    }
    Ok(())
}

fn with_id(mut document: Value, key: &str) -> Value {
    if let Some(obj) = document.as_object_mut() {
        obj.insert("id".to_string(), Value::String(key.to_string()));
    }
    document
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, collection: &str, mut document: Value) -> Result<Value, StoreError> {
        let obj = document
            .as_object_mut()
            .ok_or_else(|| StoreError::Query("document must be a JSON object".to_string()))?;
        let key = match obj.remove("id") {
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(StoreError::Query(format!("id must be a string, got {}", other)))
            }
            None => Uuid::new_v4().to_string(),
        };

        let mut collections = self.collections.lock().unwrap();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        if coll.docs.contains_key(&key) {
            return Err(StoreError::DuplicateKey(format!("{}/{}", collection, key)));
        }
        check_unique(coll, &document, None)?;
        coll.docs.insert(key.clone(), document.clone());

        Ok(with_id(document, &key))
    }

    async fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let collections = self.collections.lock().unwrap();
        let coll = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        Ok(coll.docs.get(id).map(|doc| with_id(doc.clone(), id)))
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        page: Page,
        sort: &[SortKey],
    ) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.lock().unwrap();
        let coll = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;

        let mut hits: Vec<(&String, &Value)> = coll
            .docs
            .iter()
            .filter(|(_, doc)| matches(doc, filters))
            .collect();

        hits.sort_by(|(ka, a), (kb, b)| {
            for key in sort {
                let ord = compare_values(lookup(a, &key.field), lookup(b, &key.field));
                let ord = match key.direction {
                    SortDirection::Ascending => ord,
                    SortDirection::Descending => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            ka.cmp(kb)
        });

        Ok(hits
            .into_iter()
            .skip(page.skip as usize)
            .take(page.limit as usize)
            .map(|(key, doc)| with_id(doc.clone(), key))
            .collect())
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
        let patch_obj = match patch {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::Query(format!(
                    "patch must be a JSON object, got {}",
                    other
                )))
            }
        };

        let mut collections = self.collections.lock().unwrap();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        let existing = coll
            .docs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", collection, id)))?;

        let mut merged = existing;
        if let Some(obj) = merged.as_object_mut() {
            for (field, value) in patch_obj {
                if field == "id" {
                    continue;
                }
                obj.insert(field, value);
            }
        }
        check_unique(coll, &merged, Some(id))?;
        coll.docs.insert(id.to_string(), merged.clone());

        Ok(with_id(merged, id))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let mut collections = self.collections.lock().unwrap();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        Ok(coll.docs.remove(id).is_some())
    }

    async fn count(&self, collection: &str, filters: &[Filter]) -> Result<u64, StoreError> {
        let collections = self.collections.lock().unwrap();
        let coll = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        Ok(coll.docs.values().filter(|doc| matches(doc, filters)).count() as u64)
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        let collections = self.collections.lock().unwrap();
        let coll = collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        Ok(coll.docs.contains_key(id))
    }

    async fn create_collection(&self, collection: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().unwrap();
        collections.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().unwrap();
        collections.remove(collection);
        Ok(())
    }

    async fn truncate_collection(&self, collection: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().unwrap();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        coll.docs.clear();
        Ok(())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        Ok(self.collections.lock().unwrap().contains_key(collection))
    }

    async fn create_index(&self, collection: &str, spec: IndexSpec) -> Result<(), StoreError> {
        let name = spec.name(collection);
        let mut collections = self.collections.lock().unwrap();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        if coll.indexes.iter().any(|i| i.name == name) {
            return Ok(());
        }
        coll.indexes.push(StoredIndex {
            name,
            fields: spec.fields,
            unique: spec.unique,
            sparse: spec.sparse,
        });
        Ok(())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> Result<(), StoreError> {
        let mut collections = self.collections.lock().unwrap();
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionNotFound(collection.to_string()))?;
        coll.indexes.retain(|i| i.name != name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn behaves_like_the_real_adapter_for_unique_indexes() {
        let store = MemoryStore::new();
        store.create_collection("users").await.unwrap();
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
    async fn sparse_unique_index_ignores_missing_fields() {
        let store = MemoryStore::new();
        store.create_collection("files").await.unwrap();
        store
            .create_index(
                "files",
                IndexSpec {
                    fields: vec!["object_path".into()],
                    unique: true,
                    sparse: true,
                },
            )
            .await
            .unwrap();

        // Two documents without the indexed field coexist.
        store.create("files", json!({"name": "a"})).await.unwrap();
        store.create("files", json!({"name": "b"})).await.unwrap();
    }

    #[tokio::test]
    async fn sort_with_equal_keys_breaks_ties_by_id() {
        let store = MemoryStore::new();
        store.create_collection("msgs").await.unwrap();
        store
            .create("msgs", json!({"id": "b", "at": "2024-01-01T00:00:00Z"}))
            .await
            .unwrap();
        store
            .create("msgs", json!({"id": "a", "at": "2024-01-01T00:00:00Z"}))
            .await
            .unwrap();

        let rows = store
            .query("msgs", &[], Page::default(), &[SortKey::asc("at")])
            .await
            .unwrap();
        assert_eq!(rows[0]["id"], "a");
        assert_eq!(rows[1]["id"], "b");
    }
}
