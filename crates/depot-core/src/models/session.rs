use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session status. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "session_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

/// Per-file progress status. `PENDING -> UPLOADING -> {COMPLETED | FAILED |
/// CANCELLED}`; no transition leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(
    feature = "sqlx",
    sqlx(type_name = "progress_status", rename_all = "lowercase")
)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
    Cancelled,
}

impl ProgressStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressStatus::Completed | ProgressStatus::Failed | ProgressStatus::Cancelled
        )
    }
}

/// A batch of files declared for upload together.
///
/// `completed_files`, `failed_files`, and `uploaded_size_bytes` are derived
/// from the child progress rows and recomputed whenever a child changes.
/// `total_size_bytes` is the size declared at creation and is used for
/// percentage display, not for quota admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub owner_id: Uuid,
    pub total_files: u32,
    pub completed_files: u32,
    pub failed_files: u32,
    pub total_size_bytes: u64,
    pub uploaded_size_bytes: u64,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-file progress record within a session. `file_id` stays `None` until
/// the underlying file is committed (freshly stored or duplicate-resolved).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadProgress {
    pub id: Uuid,
    pub session_id: Uuid,
    pub file_id: Option<Uuid>,
    pub file_name: String,
    pub mime_type: String,
    pub status: ProgressStatus,
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// Bytes per second since the previous update; `None` until measurable.
    pub upload_speed_bps: Option<u64>,
    /// `None` means unknown (rate is zero or not yet measurable).
    pub eta_seconds: Option<u64>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// One file declared at session creation.
#[derive(Debug, Clone)]
pub struct FileDeclaration {
    pub file_name: String,
    pub total_size_bytes: u64,
    pub chunk_size_bytes: u64,
    pub mime_type: String,
    /// Client-side checksum, if the caller precomputed one.
    pub checksum: Option<String>,
}

impl FileDeclaration {
    /// Number of chunks the declared file splits into.
    pub fn total_chunks(&self) -> u32 {
        if self.chunk_size_bytes == 0 {
            return 1;
        }
        self.total_size_bytes.div_ceil(self.chunk_size_bytes).max(1) as u32
    }
}

/// Session status rule, evaluated in order over the child counters:
/// all files completed -> COMPLETED; some failed and none completed ->
/// FAILED; otherwise the current status stands (a mixed completed+failed
/// batch therefore stays ACTIVE). Terminal statuses are never re-evaluated.
pub fn evaluate_session_status(
    current: SessionStatus,
    total_files: u32,
    completed_files: u32,
    failed_files: u32,
) -> SessionStatus {
    if current.is_terminal() {
        return current;
    }
    if completed_files >= total_files {
        SessionStatus::Completed
    } else if failed_files > 0 && completed_files == 0 {
        SessionStatus::Failed
    } else {
        SessionStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_completed() {
        assert_eq!(
            evaluate_session_status(SessionStatus::Active, 3, 3, 0),
            SessionStatus::Completed
        );
    }

    #[test]
    fn test_all_failed() {
        assert_eq!(
            evaluate_session_status(SessionStatus::Active, 2, 0, 2),
            SessionStatus::Failed
        );
    }

    #[test]
    fn test_mixed_outcome_stays_active() {
        // 2 completed + 1 failed out of 3: neither branch fires.
        assert_eq!(
            evaluate_session_status(SessionStatus::Active, 3, 2, 1),
            SessionStatus::Active
        );
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        assert_eq!(
            evaluate_session_status(SessionStatus::Cancelled, 3, 3, 0),
            SessionStatus::Cancelled
        );
    }

    #[test]
    fn test_total_chunks() {
        let decl = FileDeclaration {
            file_name: "a.bin".into(),
            total_size_bytes: 10,
            chunk_size_bytes: 4,
            mime_type: "application/octet-stream".into(),
            checksum: None,
        };
        assert_eq!(decl.total_chunks(), 3);

        let exact = FileDeclaration {
            chunk_size_bytes: 5,
            ..decl.clone()
        };
        assert_eq!(exact.total_chunks(), 2);

        let whole = FileDeclaration {
            chunk_size_bytes: 0,
            ..decl
        };
        assert_eq!(whole.total_chunks(), 1);
    }
}
