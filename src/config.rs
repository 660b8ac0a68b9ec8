//! Typed configuration loaded from a TOML file, or built up from `clap`
//! arguments directly — the file format mirrors the CLI's flattened-args
//! split.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::manager::{AnyStorageManager, StorageManager};
use crate::metadata::memory::MemoryMetadataStore;
use crate::metadata::sqlite::SqliteMetadataStore;
use crate::payload_store::PayloadStore;

fn default_inline_threshold() -> usize {
    256
}

/// Which relational backend stores file/layer/version/chunk rows.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum MetadataBackend {
    Memory,
    Sqlite { path: PathBuf },
}

/// Which backend stores payloads pushed out of line.
///
/// A networked relational store or object-store endpoint is configuration
/// surface worth naming for a production deployment, but only the embedded
/// SQLite and local-filesystem backends are wired up here; a remote backend
/// is an adapter the core does not ship.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum ObjectBackend {
    Memory,
    Local { directory: PathBuf },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub metadata: MetadataBackend,
    pub objects: ObjectBackend,
    /// Payloads smaller than this are stored inline in the chunk row rather
    /// than pushed to the object store.
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold: usize,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| Error::Invariant(err.to_string()))
    }

    pub fn load_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(crate::error::StorageError::Io)?;
        Self::from_toml_str(&text)
    }

    /// Builds the concrete stores this configuration names and wires them
    /// into a [`StorageManager`], picking the metadata backend at runtime.
    pub fn build(&self) -> Result<AnyStorageManager> {
        let payloads = match &self.objects {
            ObjectBackend::Memory => PayloadStore::in_memory()?,
            ObjectBackend::Local { directory } => PayloadStore::local(directory)?,
        };

        match &self.metadata {
            MetadataBackend::Memory => Ok(AnyStorageManager::Memory(StorageManager::new(
                MemoryMetadataStore::new(),
                payloads,
                self.inline_threshold,
            ))),
            MetadataBackend::Sqlite { path } => {
                let store = SqliteMetadataStore::open(path)?;
                Ok(AnyStorageManager::Sqlite(StorageManager::new(
                    store,
                    payloads,
                    self.inline_threshold,
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_memory_configuration() {
        let config = Config::from_toml_str(
            r#"
            [metadata]
            kind = "memory"

            [objects]
            kind = "memory"
            "#,
        )
        .unwrap();

        assert!(matches!(config.metadata, MetadataBackend::Memory));
        assert!(matches!(config.objects, ObjectBackend::Memory));
        assert_eq!(config.inline_threshold, 256);
    }

    #[test]
    fn parses_a_sqlite_and_local_configuration_with_an_explicit_threshold() {
        let config = Config::from_toml_str(
            r#"
            inline-threshold = 4096

            [metadata]
            kind = "sqlite"
            path = "/tmp/chunkvault.db"

            [objects]
            kind = "local"
            directory = "/tmp/chunkvault-objects"
            "#,
        )
        .unwrap();

        assert!(matches!(config.metadata, MetadataBackend::Sqlite { .. }));
        assert!(matches!(config.objects, ObjectBackend::Local { .. }));
        assert_eq!(config.inline_threshold, 4096);
    }

    #[test]
    fn builds_a_working_manager_from_an_in_memory_configuration() {
        let config = Config::from_toml_str(
            r#"
            [metadata]
            kind = "memory"

            [objects]
            kind = "memory"
            "#,
        )
        .unwrap();

        let manager = config.build().unwrap();
        manager.insert_file("a.txt").unwrap();
        manager.write_file("a.txt", b"hi", 0).unwrap();
        assert_eq!(manager.read_file("a.txt", 0, 2, None).unwrap(), b"hi");
    }
}
