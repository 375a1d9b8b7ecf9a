//! File metadata repository: scope-aware listing, checksum lookups, and
//! case-insensitive name search.

use std::sync::Arc;

use confab_core::types::FileScope;
use confab_core::Result;
use confab_store::{DocumentStore, Filter, Page, SortKey};

use crate::types::FileRecord;

pub const FILES: &str = "files";

#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    pub scope: Option<FileScope>,
    pub uploaded_by: Option<String>,
    pub project_id: Option<String>,
}

impl FileFilter {
    fn to_store_filters(&self) -> Vec<Filter> {
        let mut filters = Vec::new();
        if let Some(scope) = self.scope {
            filters.push(Filter::eq("scope", scope.to_string()));
        }
        if let Some(uploader) = &self.uploaded_by {
            filters.push(Filter::eq("uploaded_by", uploader.as_str()));
        }
        if let Some(project) = &self.project_id {
            filters.push(Filter::eq("project_id", project.as_str()));
        }
        filters
    }
}

pub struct FileRepo {
    store: Arc<dyn DocumentStore>,
}

impl FileRepo {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn insert(&self, record: &FileRecord) -> Result<FileRecord> {
        let doc = self
            .store
            .create(FILES, serde_json::to_value(record)?)
            .await?;
        Ok(serde_json::from_value(doc)?)
    }

    pub async fn get(&self, id: &str) -> Result<Option<FileRecord>> {
        match self.store.get_by_id(FILES, id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.store.delete(FILES, id).await?)
    }

    /// Exact-duplicate lookup on one checksum kind ("md5", "sha256",
    /// "simhash").
    pub async fn find_by_checksum(&self, kind: &str, value: &str) -> Result<Vec<FileRecord>> {
        let docs = self
            .store
            .query(
                FILES,
                &[Filter::eq(format!("checksums.{}", kind), value)],
                Page::new(0, 100),
                &[],
            )
            .await?;
        docs.into_iter()
            .map(|doc| Ok(serde_json::from_value(doc)?))
            .collect()
    }

    pub async fn list(&self, filter: &FileFilter, page: Page) -> Result<Vec<FileRecord>> {
        let docs = self
            .store
            .query(
                FILES,
                &filter.to_store_filters(),
                page,
                &[SortKey::desc("uploaded_at")],
            )
            .await?;
        docs.into_iter()
            .map(|doc| Ok(serde_json::from_value(doc)?))
            .collect()
    }

    /// Substring match on the original filename, case-insensitive, within
    /// the filtered set. The store only speaks equality, so the substring
    /// test runs here.
    pub async fn search_by_name(
        &self,
        needle: &str,
        filter: &FileFilter,
        page: Page,
    ) -> Result<Vec<FileRecord>> {
        let needle = needle.to_lowercase();
        let candidates = self.list(filter, Page::new(0, 1000)).await?;
        Ok(candidates
            .into_iter()
            .filter(|f| f.name.to_lowercase().contains(&needle))
            .skip(page.skip as usize)
            .take(page.limit as usize)
            .collect())
    }
}
