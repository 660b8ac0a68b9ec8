use chrono::{DateTime, Utc};

use crate::ids::VersionId;

/// A user-chosen, immutable label on a sealed [`Layer`][crate::layer::Layer].
#[derive(Debug, Clone)]
pub struct Version {
    pub id: VersionId,
    pub tag: String,
    pub created_at: DateTime<Utc>,
}
