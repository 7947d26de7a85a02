//! PostgreSQL store implementations.
//!
//! Queries are dynamic (no compile-time `DATABASE_URL` requirement); the
//! schema lives under `migrations/`.

mod files;
mod quota;
mod sessions;
mod tokens;

pub use files::PgFileStore;
pub use quota::PgQuotaStore;
pub use sessions::PgSessionStore;
pub use tokens::PgTokenStore;
