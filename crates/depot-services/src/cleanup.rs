//! Background maintenance sweeps.
//!
//! One periodic task covering: stale upload progress, long-expired download
//! tokens, and blobs behind old tombstones. File rows are never deleted by
//! the sweep; tombstones and token trails stay resolvable for audit. Each
//! step is isolated so one failure does not abort the others, and every
//! step is idempotent, so multiple workers may run the sweep concurrently.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use depot_core::EngineConfig;
use depot_db::{FileStore, TokenStore};
use depot_storage::BlobStore;
use tokio::time::interval;

use crate::upload::UploadService;

#[derive(Clone)]
pub struct CleanupService {
    upload: UploadService,
    tokens: Arc<dyn TokenStore>,
    files: Arc<dyn FileStore>,
    blobs: Arc<dyn BlobStore>,
    config: EngineConfig,
}

impl CleanupService {
    pub fn new(
        upload: UploadService,
        tokens: Arc<dyn TokenStore>,
        files: Arc<dyn FileStore>,
        blobs: Arc<dyn BlobStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            upload,
            tokens,
            files,
            blobs,
            config,
        }
    }

    /// Start the periodic cleanup task.
    /// Returns a JoinHandle for graceful shutdown.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut cleanup_interval =
                interval(Duration::from_secs(self.config.cleanup_interval_secs));

            loop {
                cleanup_interval.tick().await;

                tracing::info!("Starting scheduled maintenance sweep");

                if let Err(e) = self.run_once().await {
                    tracing::error!(error = %e, "Maintenance sweep failed");
                } else {
                    tracing::info!("Maintenance sweep completed");
                }
            }
        })
    }

    /// One full sweep pass.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<(), anyhow::Error> {
        let stale_sessions = match self.upload.sweep_stale().await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Failed to sweep stale uploads");
                0
            }
        };

        let purged_tokens = match self.tokens.purge_expired(Utc::now()).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Failed to purge expired download tokens");
                0
            }
        };

        let purged_blobs = match self.purge_tombstoned_blobs().await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Failed to purge tombstoned blobs");
                0
            }
        };

        tracing::info!(
            stale_sessions,
            purged_tokens,
            purged_blobs,
            "Maintenance sweep results"
        );

        Ok(())
    }

    /// Delete blobs behind tombstones older than the retention period.
    ///
    /// The store only lists tombstones whose storage key is not shared with
    /// a live row, so re-uploaded content keeps its blob.
    async fn purge_tombstoned_blobs(&self) -> Result<usize, anyhow::Error> {
        let cutoff =
            Utc::now() - chrono::Duration::days(self.config.tombstone_blob_retention_days);
        let purgeable = self.files.purgeable_tombstones(cutoff).await?;
        let count = purgeable.len();

        for file in purgeable {
            tracing::info!(
                file_id = %file.id,
                storage_key = %file.storage_key,
                tombstoned_at = ?file.tombstoned_at,
                "Deleting blob behind tombstoned file"
            );

            match self.blobs.delete(&file.storage_key).await {
                Ok(()) => {
                    tracing::debug!(storage_key = %file.storage_key, "Blob deleted");
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        storage_key = %file.storage_key,
                        "Failed to delete blob, will retry next sweep"
                    );
                    continue;
                }
            }

            if let Err(e) = self.files.mark_blob_purged(file.id, Utc::now()).await {
                tracing::error!(
                    error = %e,
                    file_id = %file.id,
                    "Failed to record blob purge"
                );
            }
        }

        Ok(count)
    }
}
