//! Producer side of the file-processing queue.
//!
//! Upload enqueues one pending work item per analysis phase; a separate
//! worker fleet consumes them. Deleting a file drops its queued items so
//! workers never pick up work for a gone file.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use confab_core::Result;
use confab_store::{DocumentStore, Filter, Page, SortKey};

use crate::types::PROCESSING_PHASES;

pub const PROCESSING_QUEUE: &str = "processing_queue";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub file_id: String,
    pub phase: String,
    pub status: String,
    pub enqueued_at: DateTime<Utc>,
}

pub struct ProcessingQueue {
    store: Arc<dyn DocumentStore>,
}

impl ProcessingQueue {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// One pending item per phase, in phase order.
    pub async fn enqueue_for_file(&self, file_id: &str) -> Result<Vec<WorkItem>> {
        let mut items = Vec::with_capacity(PROCESSING_PHASES.len());
        for phase in PROCESSING_PHASES {
            let item = WorkItem {
                id: String::new(),
                file_id: file_id.to_string(),
                phase: phase.to_string(),
                status: "pending".to_string(),
                enqueued_at: Utc::now(),
            };
            let doc = self
                .store
                .create(PROCESSING_QUEUE, serde_json::to_value(&item)?)
                .await?;
            items.push(serde_json::from_value(doc)?);
        }
        debug!(file_id, count = items.len(), "processing work enqueued");
        Ok(items)
    }

    pub async fn items_for_file(&self, file_id: &str) -> Result<Vec<WorkItem>> {
        let docs = self
            .store
            .query(
                PROCESSING_QUEUE,
                &[Filter::eq("file_id", file_id)],
                Page::new(0, 100),
                &[SortKey::asc("phase")],
            )
            .await?;
        docs.into_iter()
            .map(|doc| Ok(serde_json::from_value(doc)?))
            .collect()
    }

    /// Cascade target for file deletion.
    pub async fn delete_for_file(&self, file_id: &str) -> Result<u64> {
        let items = self.items_for_file(file_id).await?;
        let mut removed = 0;
        for item in items {
            if self.store.delete(PROCESSING_QUEUE, &item.id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
