//! Depot persistence layer.
//!
//! Store traits plus two families of implementations: PostgreSQL (sqlx)
//! and in-memory (for tests and embedded runs).

pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::{MemoryFileStore, MemoryQuotaStore, MemorySessionStore, MemoryTokenStore};
pub use postgres::{PgFileStore, PgQuotaStore, PgSessionStore, PgTokenStore};
pub use traits::{
    ChunkProgressUpdate, DeltaOutcome, FileStore, InsertOutcome, QuotaStore, RedeemOutcome,
    SessionStore, TokenStore,
};
