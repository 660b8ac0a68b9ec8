//! Object payload store adapter: a flat key->bytes store for chunk payloads
//! too large to inline, bridging the async `object_store` crate to the
//! Storage Manager's synchronous contract via a dedicated Tokio runtime.

use std::path::Path;
use std::sync::Arc;

use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use uuid::Uuid;

use crate::error::Result;

/// Put/Get over opaque keys generated by the Storage Manager. `put` is
/// idempotent under retry with the same key and bytes, since object store
/// writes are whole-object overwrites, not appends.
pub struct PayloadStore {
    backend: Arc<dyn ObjectStore>,
    runtime: tokio::runtime::Runtime,
}

impl PayloadStore {
    pub fn in_memory() -> Result<Self> {
        Self::new(Arc::new(InMemory::new()))
    }

    pub fn local<P: AsRef<Path>>(directory: P) -> Result<Self> {
        std::fs::create_dir_all(&directory).map_err(crate::error::StorageError::Io)?;
        let backend = LocalFileSystem::new_with_prefix(directory)
            .map_err(crate::error::Error::from)?;
        Self::new(Arc::new(backend))
    }

    fn new(backend: Arc<dyn ObjectStore>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(crate::error::StorageError::Io)?;
        Ok(Self { backend, runtime })
    }

    /// Generates a fresh opaque key for a new chunk payload.
    pub fn generate_key(&self) -> String {
        Uuid::new_v4().to_string()
    }

    pub fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let path = ObjectPath::from(key);
        self.runtime.block_on(async {
            self.backend.put(&path, bytes.into()).await?;
            Ok::<_, object_store::Error>(())
        })?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = ObjectPath::from(key);
        let bytes = self.runtime.block_on(async {
            let result = self.backend.get(&path).await?;
            let bytes = result.bytes().await?;
            Ok::<_, object_store::Error>(bytes)
        })?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let store = PayloadStore::in_memory().unwrap();
        let key = store.generate_key();
        store.put(&key, b"hello world".to_vec()).unwrap();
        assert_eq!(store.get(&key).unwrap(), b"hello world");
    }

    #[test]
    fn put_is_idempotent_under_retry() {
        let store = PayloadStore::in_memory().unwrap();
        let key = store.generate_key();
        store.put(&key, b"payload".to_vec()).unwrap();
        store.put(&key, b"payload".to_vec()).unwrap();
        assert_eq!(store.get(&key).unwrap(), b"payload");
    }

    #[test]
    fn local_backend_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = PayloadStore::local(dir.path()).unwrap();
        let key = store.generate_key();
        store.put(&key, b"on disk".to_vec()).unwrap();
        assert_eq!(store.get(&key).unwrap(), b"on disk");
    }
}
