use chrono::{DateTime, Utc};

use crate::ids::{FileId, LayerId, VersionId};

/// State of a [`Layer`]. `Active` is the only writable state; the single
/// allowed transition is `Active -> Sealed`, performed by a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    Active,
    Sealed,
}

/// An immutable (once sealed) snapshot layer belonging to one file.
///
/// A layer never holds its chunks directly; the metadata store is the
/// source of truth, this is a read-only view handed back by its queries.
#[derive(Debug, Clone)]
pub struct Layer {
    pub id: LayerId,
    pub file_id: FileId,
    pub version_id: Option<VersionId>,
    pub created_at: DateTime<Utc>,
}

impl Layer {
    pub fn state(&self) -> LayerState {
        match self.version_id {
            Some(_) => LayerState::Sealed,
            None => LayerState::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == LayerState::Active
    }
}
