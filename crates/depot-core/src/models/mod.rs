//! Core domain models.
//!
//! Entities reference each other by plain identifiers, never by embedded
//! copies; ownership stays acyclic (tenant -> ledger/files, session ->
//! progress rows, token -> file id).

pub mod file;
pub mod quota;
pub mod session;
pub mod tenant;
pub mod token;

pub use file::{AccessScope, FileAssociation, NewFile, StoredFile};
pub use quota::{usage_of, QuotaDelta, QuotaLedger, QuotaUsage};
pub use session::{
    evaluate_session_status, FileDeclaration, ProgressStatus, SessionStatus, UploadProgress,
    UploadSession,
};
pub use tenant::{PlanTier, BASE_QUOTA_BYTES};
pub use token::DownloadToken;
