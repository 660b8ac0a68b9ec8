//! The Storage Manager: owns all mutating operations on files, layers,
//! chunks and versions, and enforces the write-guard, image-reconstruction
//! and checkpoint-atomicity invariants.

use parking_lot::RwLock;
use tracing::{debug, instrument, warn};

use crate::chunk::{ChunkRow, PayloadRef};
use crate::error::{Error, Result};
use crate::ids::FileId;
use crate::metadata::MetadataStore;
use crate::payload_store::PayloadStore;
use crate::range::ByteRange;

/// A file as listed by [`StorageManager::get_all_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub id: FileId,
    pub name: String,
}

/// Every `VersionNotFound` error message must contain this substring.
const VERSION_NOT_FOUND_MARKER: &str = "version tag not found";

pub struct StorageManager<M: MetadataStore> {
    metadata: RwLock<M>,
    payloads: PayloadStore,
    inline_threshold: usize,
}

impl<M: MetadataStore> StorageManager<M> {
    pub fn new(metadata: M, payloads: PayloadStore, inline_threshold: usize) -> Self {
        Self {
            metadata: RwLock::new(metadata),
            payloads,
            inline_threshold,
        }
    }

    #[instrument(skip(self), fields(file = name))]
    pub fn insert_file(&self, name: &str) -> Result<FileId> {
        let mut metadata = self.metadata.write();
        let file_id = metadata.run_in_transaction(|metadata| {
            let file_id = metadata.insert_file(name)?.ok_or(Error::AlreadyExists)?;
            metadata.insert_active_layer(file_id)?;
            Ok(file_id)
        })?;
        debug!(%file_id, "inserted file");
        Ok(file_id)
    }

    #[instrument(skip(self, data), fields(file = name, len = data.len(), offset))]
    pub fn write_file(&self, name: &str, data: &[u8], offset: u64) -> Result<()> {
        let mut metadata = self.metadata.write();
        let file_id = Self::require_file(&*metadata, name)?;
        self.write_locked(&mut metadata, file_id, data, offset)
    }

    /// Performs the write-guard check and chunk insertion against an
    /// already-acquired write guard, so callers that need to combine a size
    /// read with the resulting write in one critical section (e.g.
    /// [`Self::truncate`]) don't have to acquire the lock twice.
    fn write_locked(&self, metadata: &mut M, file_id: FileId, data: &[u8], offset: u64) -> Result<()> {
        let size = Self::virtual_size_locked(&*metadata, file_id, None)?;
        if offset > size {
            warn!(offset, size, "write rejected: beyond current size");
            return Err(Error::OutOfRange { offset, size });
        }

        let payload = self.store_payload(data)?;
        let end = offset + data.len() as u64;

        metadata.run_in_transaction(|metadata| {
            let layer_id = metadata.select_active_layer_id(file_id)?;
            let base = metadata.select_layer_base(layer_id)?;
            // A later write in the same active layer may land before an
            // earlier one's offset, which would make this negative under
            // the naive offset-minus-base formula; layer_range is a
            // derived, introspection-only field that reconstruction never
            // reads, so we saturate instead of carrying a signed range
            // type for it.
            let layer_start = offset.saturating_sub(base);
            let layer_range = ByteRange::new(layer_start, layer_start + data.len() as u64);
            let file_range = ByteRange::new(offset, end);

            metadata.insert_chunk(layer_id, offset, payload, layer_range, file_range)?;
            Ok(())
        })?;

        debug!("wrote chunk");
        Ok(())
    }

    #[instrument(skip(self), fields(file = name, offset, size, version))]
    pub fn read_file(
        &self,
        name: &str,
        offset: u64,
        size: u64,
        version: Option<&str>,
    ) -> Result<Vec<u8>> {
        let metadata = self.metadata.read();
        let file_id = Self::require_file(&*metadata, name)?;

        let image = self.build_image(&metadata, file_id, version)?;
        if offset >= image.len() as u64 {
            return Ok(Vec::new());
        }

        let start = offset as usize;
        let end = (offset + size).min(image.len() as u64) as usize;
        Ok(image[start..end].to_vec())
    }

    #[instrument(skip(self), fields(file = name, tag))]
    pub fn checkpoint(&self, name: &str, tag: &str) -> Result<()> {
        let mut metadata = self.metadata.write();
        let file_id = Self::require_file(&*metadata, name)?;

        metadata.run_in_transaction(|metadata| {
            let version_id = metadata.insert_version(tag)?.ok_or(Error::AlreadyExists)?;
            let active_layer_id = metadata.select_active_layer_id(file_id)?;
            metadata.seal_layer(active_layer_id, version_id)?;
            metadata.insert_active_layer(file_id)?;
            Ok(())
        })?;

        debug!("checkpointed");
        Ok(())
    }

    #[instrument(skip(self), fields(file = name, version))]
    pub fn size_of(&self, name: &str, version: Option<&str>) -> Result<u64> {
        let metadata = self.metadata.read();
        let file_id = Self::require_file(&*metadata, name)?;
        Self::virtual_size_locked(&*metadata, file_id, version)
    }

    #[instrument(skip(self), fields(file = name, new_size))]
    pub fn truncate(&self, name: &str, new_size: u64) -> Result<()> {
        let mut metadata = self.metadata.write();
        let file_id = Self::require_file(&*metadata, name)?;
        let size = Self::virtual_size_locked(&*metadata, file_id, None)?;

        match new_size.cmp(&size) {
            std::cmp::Ordering::Equal => Ok(()),
            std::cmp::Ordering::Less => Err(Error::Unsupported),
            std::cmp::Ordering::Greater => {
                let padding = vec![0u8; (new_size - size) as usize];
                self.write_locked(&mut metadata, file_id, &padding, size)
            }
        }
    }

    #[instrument(skip(self), fields(file = name))]
    pub fn delete_file(&self, name: &str) -> Result<()> {
        let mut metadata = self.metadata.write();
        let Some(file_id) = metadata.get_file_id_by_name(name)? else {
            return Ok(());
        };

        metadata.run_in_transaction(|metadata| {
            metadata.delete_chunks_by_file(file_id)?;
            metadata.delete_layers_by_file(file_id)?;
            metadata.delete_file(file_id)?;
            Ok(())
        })?;

        debug!("deleted file");
        Ok(())
    }

    pub fn get_all_files(&self) -> Result<Vec<FileInfo>> {
        let metadata = self.metadata.read();
        Ok(metadata
            .list_files()?
            .into_iter()
            .map(|(id, name)| FileInfo { id, name })
            .collect())
    }

    pub fn get_file_id_by_name(&self, name: &str) -> Result<Option<FileId>> {
        self.metadata.read().get_file_id_by_name(name)
    }

    fn require_file(metadata: &M, name: &str) -> Result<FileId> {
        metadata.get_file_id_by_name(name)?.ok_or(Error::NotFound)
    }

    /// Persists `data` either inline or in the object store, depending on
    /// the configured threshold.
    fn store_payload(&self, data: &[u8]) -> Result<PayloadRef> {
        if data.len() < self.inline_threshold {
            Ok(PayloadRef::Inline(data.to_vec()))
        } else {
            let key = self.payloads.generate_key();
            self.payloads.put(&key, data.to_vec())?;
            Ok(PayloadRef::Object(key))
        }
    }

    fn resolve_payload(&self, payload: &PayloadRef) -> Result<Vec<u8>> {
        match payload {
            PayloadRef::Inline(bytes) => Ok(bytes.clone()),
            PayloadRef::Object(key) => self.payloads.get(key),
        }
    }

    /// Layers of `file_id` up to and including the layer tagged `version`,
    /// or every layer if `version` is `None`.
    fn layers_up_to_version(
        metadata: &M,
        file_id: FileId,
        version: Option<&str>,
    ) -> Result<Vec<crate::ids::LayerId>> {
        let layers = metadata.select_layers_by_file_id(file_id)?;

        let Some(tag) = version else {
            return Ok(layers.into_iter().map(|layer| layer.id).collect());
        };

        let cutoff = metadata
            .layer_for_version(file_id, tag)?
            .ok_or_else(|| Error::VersionNotFound(format!("{VERSION_NOT_FOUND_MARKER}: {tag}")))?;

        Ok(layers
            .into_iter()
            .map(|layer| layer.id)
            .take_while(|&id| id <= cutoff)
            .collect())
    }

    fn virtual_size_locked(metadata: &M, file_id: FileId, version: Option<&str>) -> Result<u64> {
        let layer_ids = Self::layers_up_to_version(metadata, file_id, version)?;
        let chunks_by_layer = metadata.select_chunks_for_layers(&layer_ids)?;

        Ok(chunks_by_layer
            .iter()
            .flatten()
            .map(|chunk| chunk.file_range.end)
            .max()
            .unwrap_or(0))
    }

    /// Reconstructs a file's contents by copying every visible chunk, in
    /// layer then insertion order, into a buffer sized to the maximum
    /// file-range end, so later writes mask earlier ones at the same
    /// offsets.
    fn build_image(&self, metadata: &M, file_id: FileId, version: Option<&str>) -> Result<Vec<u8>> {
        let layer_ids = Self::layers_up_to_version(metadata, file_id, version)?;
        let chunks_by_layer = metadata.select_chunks_for_layers(&layer_ids)?;

        let max_end = chunks_by_layer
            .iter()
            .flatten()
            .map(|chunk| chunk.file_range.end)
            .max()
            .unwrap_or(0);

        let mut buffer = vec![0u8; max_end as usize];
        for chunks in &chunks_by_layer {
            for chunk in chunks {
                self.apply_chunk(&mut buffer, chunk)?;
            }
        }
        Ok(buffer)
    }

    fn apply_chunk(&self, buffer: &mut [u8], chunk: &ChunkRow) -> Result<()> {
        let bytes = self.resolve_payload(&chunk.payload)?;
        let start = chunk.file_range.start as usize;
        let end = chunk.file_range.end as usize;

        if end - start != bytes.len() {
            return Err(Error::Invariant(format!(
                "chunk {} file_range length {} does not match payload length {}",
                chunk.id,
                end - start,
                bytes.len()
            )));
        }

        buffer[start..end].copy_from_slice(&bytes);
        Ok(())
    }
}

/// Picks between the two shipped metadata backends at runtime, so a
/// [`crate::config::Config`] loaded at startup can select one without the
/// caller having to be generic over `M` itself.
#[allow(clippy::large_enum_variant)]
pub enum AnyStorageManager {
    Memory(StorageManager<crate::metadata::memory::MemoryMetadataStore>),
    Sqlite(StorageManager<crate::metadata::sqlite::SqliteMetadataStore>),
}

macro_rules! dispatch {
    ($self:ident, $call:ident ( $($arg:expr),* )) => {
        match $self {
            AnyStorageManager::Memory(manager) => manager.$call($($arg),*),
            AnyStorageManager::Sqlite(manager) => manager.$call($($arg),*),
        }
    };
}

impl AnyStorageManager {
    pub fn insert_file(&self, name: &str) -> Result<FileId> {
        dispatch!(self, insert_file(name))
    }

    pub fn write_file(&self, name: &str, data: &[u8], offset: u64) -> Result<()> {
        dispatch!(self, write_file(name, data, offset))
    }

    pub fn read_file(
        &self,
        name: &str,
        offset: u64,
        size: u64,
        version: Option<&str>,
    ) -> Result<Vec<u8>> {
        dispatch!(self, read_file(name, offset, size, version))
    }

    pub fn checkpoint(&self, name: &str, tag: &str) -> Result<()> {
        dispatch!(self, checkpoint(name, tag))
    }

    pub fn size_of(&self, name: &str, version: Option<&str>) -> Result<u64> {
        dispatch!(self, size_of(name, version))
    }

    pub fn truncate(&self, name: &str, new_size: u64) -> Result<()> {
        dispatch!(self, truncate(name, new_size))
    }

    pub fn delete_file(&self, name: &str) -> Result<()> {
        dispatch!(self, delete_file(name))
    }

    pub fn get_all_files(&self) -> Result<Vec<FileInfo>> {
        dispatch!(self, get_all_files())
    }

    pub fn get_file_id_by_name(&self, name: &str) -> Result<Option<FileId>> {
        dispatch!(self, get_file_id_by_name(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memory::MemoryMetadataStore;

    fn manager() -> StorageManager<MemoryMetadataStore> {
        StorageManager::new(MemoryMetadataStore::new(), PayloadStore::in_memory().unwrap(), 256)
    }

    #[test]
    fn basic_write_read_round_trips() {
        let m = manager();
        m.insert_file("f").unwrap();
        m.write_file("f", b"hello world", 0).unwrap();
        assert_eq!(m.read_file("f", 0, 11, None).unwrap(), b"hello world");
        assert_eq!(m.size_of("f", None).unwrap(), 11);
    }

    #[test]
    fn checkpointed_versions_are_isolated() {
        let m = manager();
        m.insert_file("f").unwrap();
        m.write_file("f", &[b'*'; 15], 0).unwrap();
        m.checkpoint("f", "v1").unwrap();
        m.write_file("f", &[b'-'; 15], 0).unwrap();
        m.checkpoint("f", "v2").unwrap();
        m.write_file("f", &[b'@'; 15], 0).unwrap();

        assert_eq!(m.read_file("f", 0, 15, Some("v1")).unwrap(), vec![b'*'; 15]);
        assert_eq!(m.read_file("f", 0, 15, Some("v2")).unwrap(), vec![b'-'; 15]);
        assert_eq!(m.read_file("f", 0, 15, None).unwrap(), vec![b'@'; 15]);
        assert!(matches!(
            m.read_file("f", 0, 15, Some("non_existent")),
            Err(Error::VersionNotFound(_))
        ));
    }

    #[test]
    fn partial_overlap_masks_earlier_writes() {
        let m = manager();
        m.insert_file("f").unwrap();
        m.write_file("f", &[b'*'; 4096], 0).unwrap();
        m.write_file("f", &[b'%'; 3000], 3000).unwrap();
        m.write_file("f", &[b'@'; 1024], 1024).unwrap();
        m.write_file("f", &[b'-'; 2000], 2000).unwrap();

        let image = m.read_file("f", 0, 6000, None).unwrap();
        let mut expected = Vec::new();
        expected.extend(vec![b'*'; 1024]);
        expected.extend(vec![b'@'; 976]);
        expected.extend(vec![b'-'; 2000]);
        expected.extend(vec![b'%'; 2000]);
        assert_eq!(image, expected);
    }

    #[test]
    fn cross_layer_read_combines_both_layers() {
        let m = manager();
        m.insert_file("f").unwrap();
        m.write_file("f", b"hello", 0).unwrap();
        m.checkpoint("f", "v1").unwrap();
        m.write_file("f", b" world", 5).unwrap();

        assert_eq!(m.read_file("f", 0, 11, None).unwrap(), b"hello world");
    }

    #[test]
    fn write_past_current_size_is_rejected() {
        let m = manager();
        m.insert_file("f").unwrap();
        m.write_file("f", b"hi", 0).unwrap();
        assert!(matches!(
            m.write_file("f", b"x", 10),
            Err(Error::OutOfRange { offset: 10, size: 2 })
        ));
    }

    #[test]
    fn truncate_only_grows_via_zero_fill() {
        let m = manager();
        m.insert_file("f").unwrap();
        m.write_file("f", b"hi", 0).unwrap();
        m.truncate("f", 5).unwrap();
        assert_eq!(m.read_file("f", 0, 5, None).unwrap(), b"hi\0\0\0");
        assert!(matches!(m.truncate("f", 1), Err(Error::Unsupported)));
    }

    #[test]
    fn delete_isolates_other_files() {
        let m = manager();
        for name in ["a", "b", "c"] {
            m.insert_file(name).unwrap();
            m.write_file(name, name.as_bytes(), 0).unwrap();
        }
        m.delete_file("b").unwrap();

        assert_eq!(m.read_file("a", 0, 1, None).unwrap(), b"a");
        assert_eq!(m.read_file("c", 0, 1, None).unwrap(), b"c");
        assert!(matches!(m.read_file("b", 0, 1, None), Err(Error::NotFound)));
        assert!(!m
            .get_all_files()
            .unwrap()
            .iter()
            .any(|f| f.name == "b"));
    }

    #[test]
    fn insert_file_rejects_duplicate_names() {
        let m = manager();
        m.insert_file("f").unwrap();
        assert!(matches!(m.insert_file("f"), Err(Error::AlreadyExists)));
    }

    #[test]
    fn read_beyond_end_returns_empty() {
        let m = manager();
        m.insert_file("f").unwrap();
        m.write_file("f", b"hi", 0).unwrap();
        assert_eq!(m.read_file("f", 100, 10, None).unwrap(), Vec::<u8>::new());
    }

    /// Wraps a real store and fails the Nth call to `insert_active_layer`,
    /// so a failure can be injected after `seal_layer` has already run
    /// inside `checkpoint`'s transaction.
    #[derive(Clone)]
    struct FlakyStore {
        inner: MemoryMetadataStore,
        fail_insert_active_layer_at_call: usize,
        insert_active_layer_calls: usize,
    }

    impl MetadataStore for FlakyStore {
        fn insert_file(&mut self, name: &str) -> Result<Option<FileId>> {
            self.inner.insert_file(name)
        }

        fn get_file_id_by_name(&self, name: &str) -> Result<Option<FileId>> {
            self.inner.get_file_id_by_name(name)
        }

        fn list_files(&self) -> Result<Vec<(FileId, String)>> {
            self.inner.list_files()
        }

        fn insert_active_layer(&mut self, file_id: FileId) -> Result<crate::ids::LayerId> {
            self.insert_active_layer_calls += 1;
            if self.insert_active_layer_calls == self.fail_insert_active_layer_at_call {
                return Err(Error::Storage(crate::error::StorageError::Io(
                    std::io::Error::other("simulated failure"),
                )));
            }
            self.inner.insert_active_layer(file_id)
        }

        fn select_active_layer_id(&self, file_id: FileId) -> Result<crate::ids::LayerId> {
            self.inner.select_active_layer_id(file_id)
        }

        fn select_layers_by_file_id(&self, file_id: FileId) -> Result<Vec<crate::layer::Layer>> {
            self.inner.select_layers_by_file_id(file_id)
        }

        fn select_layer_base(&self, layer_id: crate::ids::LayerId) -> Result<u64> {
            self.inner.select_layer_base(layer_id)
        }

        fn select_chunks_for_layers(
            &self,
            layer_ids: &[crate::ids::LayerId],
        ) -> Result<Vec<Vec<ChunkRow>>> {
            self.inner.select_chunks_for_layers(layer_ids)
        }

        fn insert_chunk(
            &mut self,
            layer_id: crate::ids::LayerId,
            offset: u64,
            payload: PayloadRef,
            layer_range: ByteRange,
            file_range: ByteRange,
        ) -> Result<crate::ids::ChunkId> {
            self.inner
                .insert_chunk(layer_id, offset, payload, layer_range, file_range)
        }

        fn insert_version(&mut self, tag: &str) -> Result<Option<crate::ids::VersionId>> {
            self.inner.insert_version(tag)
        }

        fn seal_layer(&mut self, layer_id: crate::ids::LayerId, version_id: crate::ids::VersionId) -> Result<()> {
            self.inner.seal_layer(layer_id, version_id)
        }

        fn layer_for_version(&self, file_id: FileId, tag: &str) -> Result<Option<crate::ids::LayerId>> {
            self.inner.layer_for_version(file_id, tag)
        }

        fn delete_chunks_by_file(&mut self, file_id: FileId) -> Result<()> {
            self.inner.delete_chunks_by_file(file_id)
        }

        fn delete_layers_by_file(&mut self, file_id: FileId) -> Result<()> {
            self.inner.delete_layers_by_file(file_id)
        }

        fn delete_file(&mut self, file_id: FileId) -> Result<()> {
            self.inner.delete_file(file_id)
        }

        fn run_in_transaction<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R>
        where
            Self: Sized,
        {
            let snapshot = self.clone();
            match f(self) {
                Ok(value) => Ok(value),
                Err(err) => {
                    *self = snapshot;
                    Err(err)
                }
            }
        }
    }

    #[test]
    fn failed_checkpoint_leaves_no_trace() {
        let store = FlakyStore {
            inner: MemoryMetadataStore::new(),
            // call 1: insert_file's own active layer. call 2: checkpoint's
            // trailing insert_active_layer, after seal_layer has already run.
            fail_insert_active_layer_at_call: 2,
            insert_active_layer_calls: 0,
        };
        let m = StorageManager::new(store, PayloadStore::in_memory().unwrap(), 256);
        m.insert_file("f").unwrap();
        m.write_file("f", b"hello", 0).unwrap();

        let original_layer = {
            let metadata = m.metadata.read();
            metadata.select_active_layer_id(FileId(1)).unwrap()
        };

        assert!(m.checkpoint("f", "v1").is_err());

        let metadata = m.metadata.read();
        // the original layer must still be active: seal_layer's effect
        // was rolled back along with the failed insert_active_layer.
        assert_eq!(metadata.select_active_layer_id(FileId(1)).unwrap(), original_layer);
        assert!(metadata.layer_for_version(FileId(1), "v1").unwrap().is_none());
        drop(metadata);
        assert_eq!(m.read_file("f", 0, 5, None).unwrap(), b"hello");
    }
}
