//! File catalog: contextual uploads, checksums, duplicate detection, and
//! the producer side of the processing queue.

pub mod catalog;
pub mod checksums;
pub mod queue;
pub mod service;
pub mod types;

pub use checksums::FileChecksums;
pub use service::{FileService, UploadRequest, UploadedFile};
pub use types::FileRecord;
