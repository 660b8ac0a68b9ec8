use crate::ids::{ChunkId, LayerId};
use crate::range::ByteRange;

/// Where a chunk's bytes actually live.
///
/// Small payloads are kept inline in the chunk row; payloads at or above the
/// configured threshold are pushed to the object store under a generated
/// key, which is what gets recorded instead.
#[derive(Debug, Clone)]
pub enum PayloadRef {
    Inline(Vec<u8>),
    Object(String),
}

impl PayloadRef {
    pub fn object_key(&self) -> Option<&str> {
        match self {
            PayloadRef::Inline(_) => None,
            PayloadRef::Object(key) => Some(key),
        }
    }
}

/// A single recorded write: the payload it carries plus its layer-relative
/// and file-absolute byte ranges. Chunks are never mutated after insertion.
#[derive(Debug, Clone)]
pub struct ChunkRow {
    pub id: ChunkId,
    pub layer_id: LayerId,
    pub offset: u64,
    pub payload: PayloadRef,
    pub layer_range: ByteRange,
    pub file_range: ByteRange,
}
