//! Relational-metadata adapter: typed operations over the `files`,
//! `snapshot_layers`, `versions` and `chunks` tables, hiding range
//! parsing/formatting and transaction plumbing from [`crate::manager`].

pub mod memory;
pub mod sqlite;

use crate::chunk::{ChunkRow, PayloadRef};
use crate::error::Result;
use crate::ids::{ChunkId, FileId, LayerId, VersionId};
use crate::layer::Layer;
use crate::range::ByteRange;

/// A backend for the four metadata tables. Two implementations ship with
/// the core: [`memory::MemoryMetadataStore`] and [`sqlite::SqliteMetadataStore`].
pub trait MetadataStore {
    /// Inserts a file row. Returns `Ok(None)` if the name is already taken
    /// (the caller maps this to [`crate::Error::AlreadyExists`]), rather than
    /// surfacing it as an error from the store itself.
    fn insert_file(&mut self, name: &str) -> Result<Option<FileId>>;

    /// Returns the sentinel `None` rather than an error when absent.
    fn get_file_id_by_name(&self, name: &str) -> Result<Option<FileId>>;

    fn list_files(&self) -> Result<Vec<(FileId, String)>>;

    fn insert_active_layer(&mut self, file_id: FileId) -> Result<LayerId>;

    fn select_active_layer_id(&self, file_id: FileId) -> Result<LayerId>;

    /// Ordered by id ascending, i.e. creation order.
    fn select_layers_by_file_id(&self, file_id: FileId) -> Result<Vec<Layer>>;

    /// Minimum lower bound of `file_range` among the layer's chunks, or 0 if empty.
    fn select_layer_base(&self, layer_id: LayerId) -> Result<u64>;

    /// Chunks of each given layer, in the same layer order as `layer_ids`,
    /// each inner vector ordered by `(layer_id, chunk_id)`.
    fn select_chunks_for_layers(&self, layer_ids: &[LayerId]) -> Result<Vec<Vec<ChunkRow>>>;

    fn insert_chunk(
        &mut self,
        layer_id: LayerId,
        offset: u64,
        payload: PayloadRef,
        layer_range: ByteRange,
        file_range: ByteRange,
    ) -> Result<ChunkId>;

    /// Returns `Ok(None)` if the tag does not exist anywhere in the store.
    /// Tags are globally unique across the whole store, not scoped per file.
    fn insert_version(&mut self, tag: &str) -> Result<Option<VersionId>>;

    fn seal_layer(&mut self, layer_id: LayerId, version_id: VersionId) -> Result<()>;

    /// The layer of `file_id` sealed under `tag`, if any.
    fn layer_for_version(&self, file_id: FileId, tag: &str) -> Result<Option<LayerId>>;

    fn delete_chunks_by_file(&mut self, file_id: FileId) -> Result<()>;

    fn delete_layers_by_file(&mut self, file_id: FileId) -> Result<()>;

    fn delete_file(&mut self, file_id: FileId) -> Result<()>;

    /// Runs `f` so that either every mutation it performs through `self`
    /// commits, or none do. Implementations map backend transaction
    /// failures to [`crate::Error::Storage`].
    fn run_in_transaction<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R>
    where
        Self: Sized;
}
