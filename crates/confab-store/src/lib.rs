//! Collection-oriented document store.
//!
//! Documents are JSON objects identified by an opaque string `id`. The
//! adapter's internal key never leaks: every returned document carries `id`
//! as its only identity field, and every accepted document has `id`
//! translated to the native key before dispatch.

pub mod document;
pub mod error;
pub mod memory;
pub mod sqlite;

pub use document::{DocumentStore, Filter, IndexSpec, Page, SortDirection, SortKey};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
