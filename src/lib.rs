//! A versioned differential storage engine: virtual files are materialized
//! on demand from layered, chunked writes rather than stored as flat blobs.
//!
//! A [`manager::StorageManager`] owns a [`metadata::MetadataStore`] backend
//! (in-memory or SQLite) and a [`payload_store::PayloadStore`] (in-memory or
//! local filesystem, via `object_store`), and exposes the file operations:
//! insert, write, read, checkpoint, size, truncate, delete.

pub mod chunk;
pub mod config;
pub mod error;
pub mod ids;
pub mod layer;
pub mod manager;
pub mod metadata;
pub mod payload_store;
pub mod range;
pub mod version;

pub use config::Config;
pub use error::{Error, Result};
pub use ids::{ChunkId, FileId, LayerId, VersionId};
pub use manager::{AnyStorageManager, FileInfo, StorageManager};
pub use range::ByteRange;
