use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Access scope tag carried by a file association.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "access_scope", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum AccessScope {
    Private,
    Room,
    Tenant,
}

/// A committed file: one row per unique content per tenant.
///
/// Immutable once committed, except for the tombstone. At most one
/// non-tombstoned row may exist per `(tenant_id, content_hash)`; duplicate
/// uploads attach additional [`FileAssociation`] rows instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFile {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Lowercase hex SHA-256 of the full content.
    pub content_hash: String,
    pub size_bytes: u64,
    pub storage_key: String,
    pub mime_type: String,
    pub uploader_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker. Tombstoned rows are excluded from dedup lookups
    /// and quota counts but are never physically deleted.
    pub tombstoned_at: Option<DateTime<Utc>>,
}

impl StoredFile {
    pub fn is_tombstoned(&self) -> bool {
        self.tombstoned_at.is_some()
    }
}

/// Input for committing a new file row.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub tenant_id: Uuid,
    pub content_hash: String,
    pub size_bytes: u64,
    pub storage_key: String,
    pub mime_type: String,
    pub uploader_id: Uuid,
}

/// Links a file into a sharing context (chatroom/thread).
///
/// Many associations may point at one file; this is how dedup is surfaced
/// without duplicating bytes. Associations reference the file by id only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileAssociation {
    pub id: Uuid,
    pub file_id: Uuid,
    pub context_id: Uuid,
    pub shared_by: Uuid,
    pub scope: AccessScope,
    pub created_at: DateTime<Utc>,
}
