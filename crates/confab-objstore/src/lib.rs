//! Byte-blob storage under (bucket, path) with presigned read URLs.

pub mod error;
pub mod memory;
pub mod s3;
pub mod store;

pub use error::ObjectStoreError;
pub use memory::MemoryObjectStore;
pub use s3::S3Store;
pub use store::{ObjectMeta, ObjectStore, UploadReceipt};
