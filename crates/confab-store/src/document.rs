use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;

/// A single conjunctive equality predicate.
#[derive(Debug, Clone)]
pub struct Filter {
    /// Dotted field path, e.g. `"checksums.sha256"`.
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

/// Offset/limit pagination window.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub skip: u64,
    pub limit: u64,
}

/// Upper bound applied to any single query regardless of the caller's limit.
pub const MAX_PAGE_LIMIT: u64 = 1000;

impl Page {
    pub fn new(skip: u64, limit: u64) -> Self {
        Self {
            skip,
            limit: limit.min(MAX_PAGE_LIMIT),
        }
    }

    pub fn first(limit: u64) -> Self {
        Self::new(0, limit)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, 100)
    }
}

#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub fields: Vec<String>,
    pub unique: bool,
    /// Sparse indexes skip documents missing the first field.
    pub sparse: bool,
}

impl IndexSpec {
    pub fn on(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique: false,
            sparse: false,
        }
    }

    pub fn unique(fields: &[&str]) -> Self {
        Self {
            unique: true,
            ..Self::on(fields)
        }
    }

    /// Deterministic index name, usable with `drop_index`.
    pub fn name(&self, collection: &str) -> String {
        let joined = self
            .fields
            .iter()
            .map(|f| f.replace('.', "_"))
            .collect::<Vec<_>>()
            .join("_");
        format!("idx_{}_{}", collection, joined)
    }
}

/// Abstract interface for document storage.
///
/// Adapters must guarantee that returned documents carry the external `id`
/// and no internal key field, and that timestamps survive a round-trip as
/// RFC 3339 strings.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a document, assigning an id when absent. Unique indexes are
    /// enforced; violations fail with `DuplicateKey`.
    async fn create(&self, collection: &str, document: Value) -> Result<Value, StoreError>;

    async fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        page: Page,
        sort: &[SortKey],
    ) -> Result<Vec<Value>, StoreError>;

    async fn find_one(&self, collection: &str, filters: &[Filter])
        -> Result<Option<Value>, StoreError>;

    /// Partial merge; unknown id fails with `NotFound`; unique indexes are
    /// re-checked.
    async fn update(&self, collection: &str, id: &str, patch: Value) -> Result<Value, StoreError>;

    /// Idempotent; returns whether a document was removed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    async fn count(&self, collection: &str, filters: &[Filter]) -> Result<u64, StoreError>;

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    // ── administration ────────────────────────────────────────────────────────

    async fn create_collection(&self, collection: &str) -> Result<(), StoreError>;

    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError>;

    async fn truncate_collection(&self, collection: &str) -> Result<(), StoreError>;

    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError>;

    async fn create_index(&self, collection: &str, spec: IndexSpec) -> Result<(), StoreError>;

    async fn drop_index(&self, collection: &str, name: &str) -> Result<(), StoreError>;
}

/// Look up a dotted path inside a JSON object.
pub(crate) fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}
