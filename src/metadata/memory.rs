use std::collections::HashMap;

use chrono::Utc;

use super::MetadataStore;
use crate::chunk::{ChunkRow, PayloadRef};
use crate::error::Result;
use crate::ids::{ChunkId, FileId, LayerId, VersionId};
use crate::layer::Layer;
use crate::range::ByteRange;
use crate::version::Version;

/// An in-memory [`MetadataStore`], used by tests and wherever durability is
/// not required. Mirrors the plain `HashMap` adapters the rest of the pack
/// reaches for as a test double, down to the same `try_insert`-style
/// "duplicate key is not an error, just a no-op signal" behavior.
#[derive(Default, Clone)]
pub struct MemoryMetadataStore {
    files: HashMap<FileId, String>,
    files_by_name: HashMap<String, FileId>,
    layers: HashMap<LayerId, Layer>,
    chunks: HashMap<ChunkId, ChunkRow>,
    versions_by_tag: HashMap<String, VersionId>,
    versions: HashMap<VersionId, Version>,
    next_file_id: i64,
    next_layer_id: i64,
    next_chunk_id: i64,
    next_version_id: i64,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn insert_file(&mut self, name: &str) -> Result<Option<FileId>> {
        if self.files_by_name.contains_key(name) {
            return Ok(None);
        }

        self.next_file_id += 1;
        let id = FileId(self.next_file_id);
        self.files.insert(id, name.to_string());
        self.files_by_name.insert(name.to_string(), id);
        Ok(Some(id))
    }

    fn get_file_id_by_name(&self, name: &str) -> Result<Option<FileId>> {
        Ok(self.files_by_name.get(name).copied())
    }

    fn list_files(&self) -> Result<Vec<(FileId, String)>> {
        let mut files: Vec<_> = self
            .files
            .iter()
            .map(|(id, name)| (*id, name.clone()))
            .collect();
        files.sort_by_key(|(id, _)| *id);
        Ok(files)
    }

    fn insert_active_layer(&mut self, file_id: FileId) -> Result<LayerId> {
        self.next_layer_id += 1;
        let id = LayerId(self.next_layer_id);
        self.layers.insert(
            id,
            Layer {
                id,
                file_id,
                version_id: None,
                created_at: Utc::now(),
            },
        );
        Ok(id)
    }

    fn select_active_layer_id(&self, file_id: FileId) -> Result<LayerId> {
        self.layers
            .values()
            .find(|layer| layer.file_id == file_id && layer.is_active())
            .map(|layer| layer.id)
            .ok_or_else(|| {
                crate::error::Error::Invariant(format!("no active layer for file {file_id}"))
            })
    }

    fn select_layers_by_file_id(&self, file_id: FileId) -> Result<Vec<Layer>> {
        let mut layers: Vec<_> = self
            .layers
            .values()
            .filter(|layer| layer.file_id == file_id)
            .cloned()
            .collect();
        layers.sort_by_key(|layer| layer.id);
        Ok(layers)
    }

    fn select_layer_base(&self, layer_id: LayerId) -> Result<u64> {
        Ok(self
            .chunks
            .values()
            .filter(|chunk| chunk.layer_id == layer_id)
            .map(|chunk| chunk.file_range.start)
            .min()
            .unwrap_or(0))
    }

    fn select_chunks_for_layers(&self, layer_ids: &[LayerId]) -> Result<Vec<Vec<ChunkRow>>> {
        Ok(layer_ids
            .iter()
            .map(|&layer_id| {
                let mut chunks: Vec<_> = self
                    .chunks
                    .values()
                    .filter(|chunk| chunk.layer_id == layer_id)
                    .cloned()
                    .collect();
                chunks.sort_by_key(|chunk| chunk.id);
                chunks
            })
            .collect())
    }

    fn insert_chunk(
        &mut self,
        layer_id: LayerId,
        offset: u64,
        payload: PayloadRef,
        layer_range: ByteRange,
        file_range: ByteRange,
    ) -> Result<ChunkId> {
        self.next_chunk_id += 1;
        let id = ChunkId(self.next_chunk_id);
        self.chunks.insert(
            id,
            ChunkRow {
                id,
                layer_id,
                offset,
                payload,
                layer_range,
                file_range,
            },
        );
        Ok(id)
    }

    fn insert_version(&mut self, tag: &str) -> Result<Option<VersionId>> {
        if self.versions_by_tag.contains_key(tag) {
            return Ok(None);
        }

        self.next_version_id += 1;
        let id = VersionId(self.next_version_id);
        self.versions_by_tag.insert(tag.to_string(), id);
        self.versions.insert(
            id,
            Version {
                id,
                tag: tag.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(Some(id))
    }

    fn seal_layer(&mut self, layer_id: LayerId, version_id: VersionId) -> Result<()> {
        let layer = self.layers.get_mut(&layer_id).ok_or_else(|| {
            crate::error::Error::Invariant(format!("no such layer {layer_id}"))
        })?;
        layer.version_id = Some(version_id);
        Ok(())
    }

    fn layer_for_version(&self, file_id: FileId, tag: &str) -> Result<Option<LayerId>> {
        let Some(version_id) = self.versions_by_tag.get(tag) else {
            return Ok(None);
        };

        Ok(self
            .layers
            .values()
            .find(|layer| layer.file_id == file_id && layer.version_id == Some(*version_id))
            .map(|layer| layer.id))
    }

    fn delete_chunks_by_file(&mut self, file_id: FileId) -> Result<()> {
        let layer_ids: Vec<_> = self
            .layers
            .values()
            .filter(|layer| layer.file_id == file_id)
            .map(|layer| layer.id)
            .collect();
        self.chunks
            .retain(|_, chunk| !layer_ids.contains(&chunk.layer_id));
        Ok(())
    }

    fn delete_layers_by_file(&mut self, file_id: FileId) -> Result<()> {
        self.layers.retain(|_, layer| layer.file_id != file_id);
        Ok(())
    }

    fn delete_file(&mut self, file_id: FileId) -> Result<()> {
        if let Some(name) = self.files.remove(&file_id) {
            self.files_by_name.remove(&name);
        }
        Ok(())
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
