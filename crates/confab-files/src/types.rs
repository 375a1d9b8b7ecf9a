use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use confab_core::types::FileScope;

use crate::checksums::FileChecksums;

/// Analysis phases a file moves through after upload. Phase 01 is the raw
/// input itself and has no queue entry.
pub const PROCESSING_PHASES: [&str; 5] = [
    "02-data_extraction",
    "03-summary",
    "04-chunking",
    "05-graph_extraction",
    "06-graph_aggregation",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseState {
    pub status: String,
    pub active_version: Option<u32>,
    #[serde(default)]
    pub available_versions: Vec<u32>,
}

impl Default for PhaseState {
    fn default() -> Self {
        Self {
            status: "pending".to_string(),
            active_version: None,
            available_versions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub global: String,
    pub phases: BTreeMap<String, PhaseState>,
    pub last_updated: DateTime<Utc>,
}

impl ProcessingStatus {
    pub fn pending() -> Self {
        Self {
            global: "pending".to_string(),
            phases: PROCESSING_PHASES
                .iter()
                .map(|p| (p.to_string(), PhaseState::default()))
                .collect(),
            last_updated: Utc::now(),
        }
    }
}

/// File metadata document. `object_path` is the base prefix in the object
/// store; deleting the record implies deleting everything under it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Original filename.
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub object_path: String,
    pub scope: FileScope,
    #[serde(default)]
    pub project_id: Option<String>,
    pub checksums: FileChecksums,
    pub processing_status: ProcessingStatus,
    #[serde(default)]
    pub uploaded_by: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub promoted: bool,
    #[serde(default)]
    pub promoted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub promoted_by: Option<String>,
    #[serde(default)]
    pub promoted_from: Option<String>,
}

impl FileRecord {
    /// Lowercased extension of the original filename, without the dot.
    pub fn extension(&self) -> Option<String> {
        self.name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
    }

    /// Where the raw uploaded bytes live under the base prefix.
    pub fn input_object_path(&self) -> String {
        match self.extension() {
            Some(ext) => format!("{}/01-input_data/original.{}", self.object_path, ext),
            None => format!("{}/01-input_data/original", self.object_path),
        }
    }

    pub fn metadata_object_path(&self) -> String {
        format!("{}/metadata.json", self.object_path)
    }
}
