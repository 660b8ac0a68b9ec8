use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};

use super::MetadataStore;
use crate::chunk::{ChunkRow, PayloadRef};
use crate::error::{Error, Result};
use crate::ids::{ChunkId, FileId, LayerId, VersionId};
use crate::layer::Layer;
use crate::range::ByteRange;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS versions (
    id         INTEGER PRIMARY KEY,
    tag        TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS snapshot_layers (
    id         INTEGER PRIMARY KEY,
    file_id    INTEGER NOT NULL REFERENCES files(id),
    active     INTEGER NOT NULL,
    version_id INTEGER REFERENCES versions(id),
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS one_active_layer_per_file
    ON snapshot_layers(file_id) WHERE active = 1;

CREATE TABLE IF NOT EXISTS chunks (
    id                INTEGER PRIMARY KEY,
    snapshot_layer_id INTEGER NOT NULL REFERENCES snapshot_layers(id),
    offset_value      INTEGER NOT NULL,
    inline_data       BLOB,
    object_key        TEXT,
    layer_range       TEXT NOT NULL,
    file_range        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS chunks_by_layer ON chunks(snapshot_layer_id, id);
";

/// A [`MetadataStore`] backed by a SQLite database (`rusqlite`, bundled).
/// Creates the schema in [`SCHEMA`] on first connection and runs every
/// mutating batch inside a real transaction.
pub struct SqliteMetadataStore {
    conn: Connection,
}

impl SqliteMetadataStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn is_unique_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(ffi_err, _)
                if ffi_err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

impl MetadataStore for SqliteMetadataStore {
    fn insert_file(&mut self, name: &str) -> Result<Option<FileId>> {
        match self
            .conn
            .execute("INSERT INTO files (name) VALUES (?1)", (name,))
        {
            Ok(_) => Ok(Some(FileId(self.conn.last_insert_rowid()))),
            Err(e) if Self::is_unique_violation(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn get_file_id_by_name(&self, name: &str) -> Result<Option<FileId>> {
        self.conn
            .query_row("SELECT id FROM files WHERE name = ?1", (name,), |row| {
                row.get::<_, i64>(0)
            })
            .optional()
            .map(|opt| opt.map(FileId))
            .map_err(Into::into)
    }

    fn list_files(&self) -> Result<Vec<(FileId, String)>> {
        let mut stmt = self.conn.prepare("SELECT id, name FROM files ORDER BY id")?;
        let rows = stmt
            .query_map((), |row| Ok((FileId(row.get(0)?), row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn insert_active_layer(&mut self, file_id: FileId) -> Result<LayerId> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO snapshot_layers (file_id, active, version_id, created_at)
             VALUES (?1, 1, NULL, ?2)",
            (file_id.get(), &now),
        )?;
        Ok(LayerId(self.conn.last_insert_rowid()))
    }

    fn select_active_layer_id(&self, file_id: FileId) -> Result<LayerId> {
        self.conn
            .query_row(
                "SELECT id FROM snapshot_layers WHERE file_id = ?1 AND active = 1",
                (file_id.get(),),
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(LayerId)
            .ok_or_else(|| Error::Invariant(format!("no active layer for file {file_id}")))
    }

    fn select_layers_by_file_id(&self, file_id: FileId) -> Result<Vec<Layer>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, file_id, version_id, created_at
             FROM snapshot_layers WHERE file_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map((file_id.get(),), row_to_layer)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().collect::<Result<Vec<_>>>()
    }

    fn select_layer_base(&self, layer_id: LayerId) -> Result<u64> {
        let mut stmt = self
            .conn
            .prepare("SELECT file_range FROM chunks WHERE snapshot_layer_id = ?1")?;
        let ranges = stmt
            .query_map((layer_id.get(),), |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        ranges
            .into_iter()
            .map(|text| text.parse::<ByteRange>().map(|range| range.start))
            .collect::<Result<Vec<_>>>()
            .map(|starts| starts.into_iter().min().unwrap_or(0))
    }

    fn select_chunks_for_layers(&self, layer_ids: &[LayerId]) -> Result<Vec<Vec<ChunkRow>>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, snapshot_layer_id, offset_value, inline_data, object_key,
                    layer_range, file_range
             FROM chunks WHERE snapshot_layer_id = ?1 ORDER BY id",
        )?;

        layer_ids
            .iter()
            .map(|&layer_id| {
                let rows = stmt
                    .query_map((layer_id.get(),), row_to_chunk)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                rows.into_iter().collect::<Result<Vec<_>>>()
            })
            .collect()
    }

    fn insert_chunk(
        &mut self,
        layer_id: LayerId,
        offset: u64,
        payload: PayloadRef,
        layer_range: ByteRange,
        file_range: ByteRange,
    ) -> Result<ChunkId> {
        let (inline_data, object_key): (Option<Vec<u8>>, Option<String>) = match payload {
            PayloadRef::Inline(bytes) => (Some(bytes), None),
            PayloadRef::Object(key) => (None, Some(key)),
        };

        self.conn.execute(
            "INSERT INTO chunks
                (snapshot_layer_id, offset_value, inline_data, object_key, layer_range, file_range)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            (
                layer_id.get(),
                offset as i64,
                inline_data,
                object_key,
                layer_range.to_string(),
                file_range.to_string(),
            ),
        )?;
        Ok(ChunkId(self.conn.last_insert_rowid()))
    }

    fn insert_version(&mut self, tag: &str) -> Result<Option<VersionId>> {
        let now = Utc::now().to_rfc3339();
        match self.conn.execute(
            "INSERT INTO versions (tag, created_at) VALUES (?1, ?2)",
            (tag, &now),
        ) {
            Ok(_) => Ok(Some(VersionId(self.conn.last_insert_rowid()))),
            Err(e) if Self::is_unique_violation(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn seal_layer(&mut self, layer_id: LayerId, version_id: VersionId) -> Result<()> {
        self.conn.execute(
            "UPDATE snapshot_layers SET active = 0, version_id = ?1 WHERE id = ?2",
            (version_id.get(), layer_id.get()),
        )?;
        Ok(())
    }

    fn layer_for_version(&self, file_id: FileId, tag: &str) -> Result<Option<LayerId>> {
        self.conn
            .query_row(
                "SELECT sl.id FROM snapshot_layers sl
                 JOIN versions v ON sl.version_id = v.id
                 WHERE sl.file_id = ?1 AND v.tag = ?2",
                (file_id.get(), tag),
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|opt| opt.map(LayerId))
            .map_err(Into::into)
    }

    fn delete_chunks_by_file(&mut self, file_id: FileId) -> Result<()> {
        self.conn.execute(
            "DELETE FROM chunks WHERE snapshot_layer_id IN
                (SELECT id FROM snapshot_layers WHERE file_id = ?1)",
            (file_id.get(),),
        )?;
        Ok(())
    }

    fn delete_layers_by_file(&mut self, file_id: FileId) -> Result<()> {
        self.conn
            .execute("DELETE FROM snapshot_layers WHERE file_id = ?1", (file_id.get(),))?;
        Ok(())
    }

    fn delete_file(&mut self, file_id: FileId) -> Result<()> {
        self.conn
            .execute("DELETE FROM files WHERE id = ?1", (file_id.get(),))?;
        Ok(())
    }

    fn run_in_transaction<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R>
    where
        Self: Sized,
    {
        self.conn.execute_batch("BEGIN")?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => {
                // best-effort: the transaction failing to roll back would
                // mean the connection itself is unusable, not that we should
                // hide the original error.
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }
}

fn row_to_layer(row: &rusqlite::Row) -> rusqlite::Result<Result<Layer>> {
    let created_at: String = row.get(3)?;
    let id = LayerId(row.get(0)?);
    let file_id = FileId(row.get(1)?);
    let version_id = row.get::<_, Option<i64>>(2)?.map(VersionId);

    Ok(parse_timestamp(&created_at).map(|created_at| Layer {
        id,
        file_id,
        version_id,
        created_at,
    }))
}

fn row_to_chunk(row: &rusqlite::Row) -> rusqlite::Result<Result<ChunkRow>> {
    let inline_data: Option<Vec<u8>> = row.get(3)?;
    let object_key: Option<String> = row.get(4)?;
    let layer_range: String = row.get(5)?;
    let file_range: String = row.get(6)?;

    Ok((|| {
        let payload = match (inline_data, object_key) {
            (Some(bytes), None) => PayloadRef::Inline(bytes),
            (None, Some(key)) => PayloadRef::Object(key),
            _ => {
                return Err(Error::Invariant(
                    "chunk row has neither inline data nor an object key".into(),
                ))
            }
        };

        Ok(ChunkRow {
            id: ChunkId(row.get(0)?),
            layer_id: LayerId(row.get(1)?),
            offset: row.get::<_, i64>(2)? as u64,
            payload,
            layer_range: layer_range.parse()?,
            file_range: file_range.parse()?,
        })
    })())
}

/// This column is written exclusively by this adapter via `to_rfc3339()`, so
/// a value that fails to parse can only mean the row was corrupted; that
/// must surface as `Invariant`, not be papered over with a fabricated
/// timestamp.
fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| Error::Invariant(format!("unparseable created_at timestamp {text:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_and_enforces_one_active_layer_per_file() {
        let mut store = SqliteMetadataStore::open_in_memory().unwrap();
        let file_id = store.insert_file("a").unwrap().unwrap();
        store.insert_active_layer(file_id).unwrap();

        let result = store.conn.execute(
            "INSERT INTO snapshot_layers (file_id, active, version_id, created_at)
             VALUES (?1, 1, NULL, ?2)",
            (file_id.get(), Utc::now().to_rfc3339()),
        );
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_file_name_is_reported_as_none() {
        let mut store = SqliteMetadataStore::open_in_memory().unwrap();
        assert!(store.insert_file("a").unwrap().is_some());
        assert!(store.insert_file("a").unwrap().is_none());
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let mut store = SqliteMetadataStore::open_in_memory().unwrap();
        let result: Result<()> = store.run_in_transaction(|store| {
            store.insert_file("a")?;
            Err(Error::Invariant("boom".into()))
        });
        assert!(result.is_err());
        assert!(store.get_file_id_by_name("a").unwrap().is_none());
    }
}
