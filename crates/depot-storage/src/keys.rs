//! Shared key generation for blob backends.
//!
//! Keys are content-addressed per tenant: `files/{tenant_id}/{content_hash}`.
//! One blob per unique content per tenant; duplicate uploads resolve to the
//! same key and never write a second copy.

use uuid::Uuid;

/// Generate the storage key for the given tenant and content hash.
///
/// All backends must use this format so a file row's `storage_key` stays
/// resolvable regardless of which backend wrote it.
pub fn content_key(tenant_id: Uuid, content_hash: &str) -> String {
    format!("files/{}/{}", tenant_id, content_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_key_format() {
        let tenant = Uuid::nil();
        let key = content_key(tenant, "abc123");
        assert_eq!(
            key,
            "files/00000000-0000-0000-0000-000000000000/abc123"
        );
    }
}
