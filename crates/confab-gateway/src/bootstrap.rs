//! Startup preparation: collections, indexes, upload bucket, root user.

use std::sync::Arc;

use tracing::info;

use confab_core::config::ConfabConfig;
use confab_core::Result;
use confab_files::service::FileService;
use confab_objstore::ObjectStore;
use confab_store::{DocumentStore, IndexSpec};
use confab_users::users::UserService;

/// Every collection with its index set. Uniqueness rides on the store's
/// expression indexes, so DuplicateKey surfaces without application scans.
const SCHEMA: &[(&str, &[IndexDef])] = &[
    (
        "users",
        &[IndexDef {
            fields: &["email"],
            unique: true,
            sparse: false,
        }],
    ),
    (
        "user_groups",
        &[IndexDef {
            fields: &["name"],
            unique: true,
            sparse: false,
        }],
    ),
    (
        "conversations",
        &[
            IndexDef {
                fields: &["owner_id"],
                unique: false,
                sparse: false,
            },
            IndexDef {
                fields: &["is_shared"],
                unique: false,
                sparse: false,
            },
            IndexDef {
                fields: &["group_id"],
                unique: false,
                sparse: true,
            },
        ],
    ),
    (
        "messages",
        &[IndexDef {
            fields: &["conversation_id", "created_at"],
            unique: false,
            sparse: false,
        }],
    ),
    (
        "files",
        &[
            IndexDef {
                fields: &["uploaded_by"],
                unique: false,
                sparse: true,
            },
            IndexDef {
                fields: &["scope"],
                unique: false,
                sparse: false,
            },
            IndexDef {
                fields: &["scope", "project_id"],
                unique: false,
                sparse: false,
            },
            IndexDef {
                fields: &["object_path"],
                unique: true,
                sparse: false,
            },
            IndexDef {
                fields: &["checksums.md5"],
                unique: false,
                sparse: false,
            },
            IndexDef {
                fields: &["checksums.sha256"],
                unique: false,
                sparse: false,
            },
            IndexDef {
                fields: &["checksums.simhash"],
                unique: false,
                sparse: false,
            },
        ],
    ),
    (
        "user_settings",
        &[IndexDef {
            fields: &["user_id"],
            unique: true,
            sparse: false,
        }],
    ),
    (
        "processing_queue",
        &[IndexDef {
            fields: &["file_id"],
            unique: false,
            sparse: false,
        }],
    ),
];

struct IndexDef {
    fields: &'static [&'static str],
    unique: bool,
    sparse: bool,
}

pub async fn prepare(
    store: &Arc<dyn DocumentStore>,
    storage: &Arc<dyn ObjectStore>,
    config: &ConfabConfig,
) -> Result<()> {
    for (collection, indexes) in SCHEMA {
        store.create_collection(collection).await?;
        for index in *indexes {
            store
                .create_index(
                    collection,
                    IndexSpec {
                        fields: index.fields.iter().map(|f| f.to_string()).collect(),
                        unique: index.unique,
                        sparse: index.sparse,
                    },
                )
                .await?;
        }
    }
    info!(collections = SCHEMA.len(), "document schema prepared");

    let files = FileService::new(
        store.clone(),
        storage.clone(),
        config.objstore.default_bucket.clone(),
        config.uploads.clone(),
    );
    files.ensure_bucket().await?;

    let users = UserService::new(store.clone());
    users
        .ensure_root(
            &config.bootstrap.root_email,
            &config.bootstrap.root_name,
            &config.bootstrap.root_password,
        )
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use confab_objstore::MemoryObjectStore;
    use confab_store::{MemoryStore, SqliteStore};

    #[tokio::test]
    async fn prepare_on_sqlite_enforces_unique_email() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("confab.db");
        let store: Arc<dyn DocumentStore> =
            Arc::new(SqliteStore::open(path.to_str().unwrap()).unwrap());
        let storage: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let config = ConfabConfig::default();

        prepare(&store, &storage, &config).await.unwrap();

        // Bootstrap root already holds its email; a second create with the
        // same address must trip the schema's unique index.
        let dup = serde_json::json!({
            "name": "imposter",
            "email": config.bootstrap.root_email,
            "role": "user",
            "status": "active",
            "group_ids": [],
            "created_at": chrono::Utc::now(),
            "updated_at": chrono::Utc::now(),
        });
        let err = store.create("users", dup).await.unwrap_err();
        assert!(matches!(err, confab_store::StoreError::DuplicateKey(_)));
    }

    #[tokio::test]
    async fn prepare_is_idempotent() {
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let storage: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
        let config = ConfabConfig::default();

        prepare(&store, &storage, &config).await.unwrap();
        prepare(&store, &storage, &config).await.unwrap();

        assert!(store.collection_exists("users").await.unwrap());
        assert!(storage
            .bucket_exists(&config.objstore.default_bucket)
            .await
            .unwrap());

        let users = UserService::new(store.clone());
        let root = users
            .find_by_email(&config.bootstrap.root_email)
            .await
            .unwrap();
        assert!(root.is_some());
    }
}
