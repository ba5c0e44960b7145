//! Client for communicating with the block storage service

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use blockstore_common::types::*;
use blockstore_common::{BlockstorageApi, Error, Result};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ProviderConfig;
use crate::retry::{retry_transient, RetryConfig};

/// Client wrapper for service communication
#[derive(Clone)]
pub struct BlockstorageClient {
    api: Arc<dyn BlockstorageApi>,
    config: ProviderConfig,
    retry: RetryConfig,
}

impl BlockstorageClient {
    pub fn new(api: Arc<dyn BlockstorageApi>, config: ProviderConfig) -> Self {
        let retry = config.retry_config();
        Self { api, config, retry }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Raw service handle, without retries
    pub fn api(&self) -> &Arc<dyn BlockstorageApi> {
        &self.api
    }

    // Volume operations

    pub async fn create_volume(&self, details: CreateVolumeDetails) -> Result<Volume> {
        retry_transient(&self.retry, "create_volume", || {
            self.api.create_volume(details.clone())
        })
        .await
    }

    pub async fn get_volume(&self, id: &str) -> Result<Volume> {
        retry_transient(&self.retry, "get_volume", || self.api.get_volume(id)).await
    }

    pub async fn update_volume(&self, id: &str, details: UpdateVolumeDetails) -> Result<Volume> {
        retry_transient(&self.retry, "update_volume", || {
            self.api.update_volume(id, details.clone())
        })
        .await
    }

    pub async fn delete_volume(&self, id: &str) -> Result<()> {
        retry_transient(&self.retry, "delete_volume", || self.api.delete_volume(id)).await
    }

    // Volume backup operations

    pub async fn create_volume_backup(&self, details: CreateVolumeBackupDetails) -> Result<VolumeBackup> {
        retry_transient(&self.retry, "create_volume_backup", || {
            self.api.create_volume_backup(details.clone())
        })
        .await
    }

    pub async fn get_volume_backup(&self, id: &str) -> Result<VolumeBackup> {
        retry_transient(&self.retry, "get_volume_backup", || {
            self.api.get_volume_backup(id)
        })
        .await
    }

    pub async fn update_volume_backup(
        &self,
        id: &str,
        details: UpdateVolumeBackupDetails,
    ) -> Result<VolumeBackup> {
        retry_transient(&self.retry, "update_volume_backup", || {
            self.api.update_volume_backup(id, details.clone())
        })
        .await
    }

    pub async fn delete_volume_backup(&self, id: &str) -> Result<()> {
        retry_transient(&self.retry, "delete_volume_backup", || {
            self.api.delete_volume_backup(id)
        })
        .await
    }

    /// List every page of volume backups matching the request
    pub async fn list_all_volume_backups(
        &self,
        request: ListVolumeBackupsRequest,
    ) -> Result<Vec<VolumeBackup>> {
        let mut items = Vec::new();
        let mut page = request.page.clone();

        loop {
            let req = ListVolumeBackupsRequest {
                page: page.clone(),
                ..request.clone()
            };
            let response = retry_transient(&self.retry, "list_volume_backups", || {
                self.api.list_volume_backups(req.clone())
            })
            .await?;

            items.extend(response.items);
            match response.next_page {
                Some(next) => page = Some(next),
                None => break,
            }
        }

        debug!("Listed {} volume backups", items.len());
        Ok(items)
    }

    // Lifecycle waiters

    /// Poll a volume until it reaches one of `targets`.
    ///
    /// Returns `None` if the volume disappeared and `allow_gone` is set.
    pub async fn wait_for_volume_state(
        &self,
        id: &str,
        targets: &[VolumeLifecycleState],
        pending: &[VolumeLifecycleState],
        allow_gone: bool,
        timeout: Duration,
    ) -> Result<Option<Volume>> {
        self.wait_for(
            "volume",
            id,
            || self.get_volume(id),
            |v: &Volume| v.lifecycle_state,
            targets,
            pending,
            allow_gone,
            timeout,
        )
        .await
    }

    /// Poll a volume backup until it reaches one of `targets`.
    ///
    /// Returns `None` if the backup disappeared and `allow_gone` is set.
    pub async fn wait_for_volume_backup_state(
        &self,
        id: &str,
        targets: &[VolumeBackupLifecycleState],
        pending: &[VolumeBackupLifecycleState],
        allow_gone: bool,
        timeout: Duration,
    ) -> Result<Option<VolumeBackup>> {
        self.wait_for(
            "volume backup",
            id,
            || self.get_volume_backup(id),
            |b: &VolumeBackup| b.lifecycle_state,
            targets,
            pending,
            allow_gone,
            timeout,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn wait_for<T, S, F, Fut>(
        &self,
        kind: &str,
        id: &str,
        fetch: F,
        state_of: impl Fn(&T) -> S,
        targets: &[S],
        pending: &[S],
        allow_gone: bool,
        timeout: Duration,
    ) -> Result<Option<T>>
    where
        S: PartialEq + Display + Copy,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let deadline = Instant::now() + timeout;

        loop {
            match fetch().await {
                Ok(resource) => {
                    let state = state_of(&resource);
                    if targets.contains(&state) {
                        info!("{} {} reached {}", kind, id, state);
                        return Ok(Some(resource));
                    }
                    if !pending.contains(&state) {
                        return Err(Error::InvalidStateTransition {
                            from: state.to_string(),
                            to: join_states(targets),
                        });
                    }
                    debug!("{} {} is {}, waiting", kind, id, state);
                }
                Err(e) if allow_gone && e.is_not_found() => {
                    info!("{} {} is gone", kind, id);
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }

            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }
}

fn join_states<S: Display>(states: &[S]) -> String {
    states
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join("|")
}
