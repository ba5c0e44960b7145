//! Block storage service API
//!
//! The provider only talks to the service through this trait, so the same
//! resource code runs against the simulator or a real backend.

use async_trait::async_trait;

use crate::types::*;
use crate::Result;

/// Remote block storage operations
#[async_trait]
pub trait BlockstorageApi: Send + Sync {
    // Volumes

    async fn create_volume(&self, details: CreateVolumeDetails) -> Result<Volume>;

    async fn get_volume(&self, id: &str) -> Result<Volume>;

    async fn update_volume(&self, id: &str, details: UpdateVolumeDetails) -> Result<Volume>;

    async fn delete_volume(&self, id: &str) -> Result<()>;

    // Volume backups

    async fn create_volume_backup(&self, details: CreateVolumeBackupDetails) -> Result<VolumeBackup>;

    /// Fetch a backup. Fails with a `NotFound` class error once the backup is gone.
    async fn get_volume_backup(&self, id: &str) -> Result<VolumeBackup>;

    async fn update_volume_backup(
        &self,
        id: &str,
        details: UpdateVolumeBackupDetails,
    ) -> Result<VolumeBackup>;

    async fn delete_volume_backup(&self, id: &str) -> Result<()>;

    async fn list_volume_backups(
        &self,
        request: ListVolumeBackupsRequest,
    ) -> Result<Page<VolumeBackup>>;
}
