//! Simulated block storage service
//!
//! Stores volumes and backups in SQLite and walks them through the same
//! asynchronous lifecycle a real service exposes: resources come up in a
//! transient state and only settle after a number of reads.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::BlockstorageApi;
use crate::db::{Database, ListQuery, Table};
use crate::types::*;
use crate::{Error, Result};

const DEFAULT_VOLUME_SIZE_GBS: i64 = 50;
const DEFAULT_PAGE_SIZE: usize = 50;

/// Lifecycle pacing for the simulator
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Reads that still observe PROVISIONING/CREATING after a create
    pub provisioning_reads: u32,
    /// Reads that still observe TERMINATING after a delete
    pub termination_reads: u32,
    /// Reads of a TERMINATED backup before it disappears; `None` keeps it forever
    pub purge_after_reads: Option<u32>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            provisioning_reads: 1,
            termination_reads: 1,
            purge_after_reads: Some(2),
        }
    }
}

/// In-process implementation of [`BlockstorageApi`]
#[derive(Clone)]
pub struct SimulatedBlockstorage {
    db: Database,
    config: SimulatorConfig,
    /// Remaining reads before the resource leaves its current state
    countdowns: Arc<Mutex<HashMap<String, u32>>>,
    /// One-shot failures keyed by resource id
    faults: Arc<Mutex<HashMap<String, Error>>>,
}

impl SimulatedBlockstorage {
    pub fn new(db: Database, config: SimulatorConfig) -> Self {
        Self {
            db,
            config,
            countdowns: Arc::new(Mutex::new(HashMap::new())),
            faults: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Simulator over a fresh in-memory database
    pub fn in_memory(config: SimulatorConfig) -> Result<Self> {
        Ok(Self::new(Database::open_memory()?, config))
    }

    /// Register a tag so defined tags may reference it
    pub fn define_tag(&self, namespace: &str, key: &str) -> Result<()> {
        self.db.define_tag(namespace, key)
    }

    /// Make the next call touching `id` fail with `error`
    pub fn inject_fault(&self, id: &str, error: Error) {
        self.faults.lock().insert(id.to_string(), error);
    }

    fn take_fault(&self, id: &str) -> Result<()> {
        match self.faults.lock().remove(id) {
            Some(error) => {
                debug!("Injected fault for {}: {}", id, error);
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn set_countdown(&self, id: &str, reads: u32) {
        self.countdowns.lock().insert(id.to_string(), reads);
    }

    /// Consume one read; true when the countdown has run out
    fn tick(&self, id: &str) -> bool {
        let mut countdowns = self.countdowns.lock();
        match countdowns.get_mut(id) {
            Some(0) | None => {
                countdowns.remove(id);
                true
            }
            Some(remaining) => {
                *remaining -= 1;
                false
            }
        }
    }

    fn validate_defined_tags(&self, tags: &DefinedTags) -> Result<()> {
        for (namespace, keys) in tags {
            for key in keys.keys() {
                if !self.db.tag_defined(namespace, key)? {
                    return Err(Error::InvalidConfig(format!(
                        "defined tag {}.{} does not exist",
                        namespace, key
                    )));
                }
            }
        }
        Ok(())
    }

    // ========================================================================
    // Lifecycle progression
    // ========================================================================

    fn advance_volume(&self, mut volume: Volume) -> Result<Volume> {
        let next = match volume.lifecycle_state {
            VolumeLifecycleState::Provisioning | VolumeLifecycleState::Restoring => {
                VolumeLifecycleState::Available
            }
            VolumeLifecycleState::Terminating => VolumeLifecycleState::Terminated,
            VolumeLifecycleState::Terminated => {
                if self.config.purge_after_reads.is_some() && self.tick(&volume.id) {
                    self.db.delete(Table::Volumes, &volume.id)?;
                    info!("Purged volume {}", volume.id);
                    return Err(Error::not_found("volume", &volume.id));
                }
                return Ok(volume);
            }
            _ => return Ok(volume),
        };

        if self.tick(&volume.id) {
            debug!("Volume {} {} -> {}", volume.id, volume.lifecycle_state, next);
            volume.lifecycle_state = next;
            if next == VolumeLifecycleState::Terminated {
                if let Some(reads) = self.config.purge_after_reads {
                    self.set_countdown(&volume.id, reads);
                }
            }
            self.db.update(&volume)?;
        }
        Ok(volume)
    }

    fn advance_backup(&self, mut backup: VolumeBackup) -> Result<VolumeBackup> {
        let next = match backup.lifecycle_state {
            VolumeBackupLifecycleState::RequestReceived | VolumeBackupLifecycleState::Creating => {
                VolumeBackupLifecycleState::Available
            }
            VolumeBackupLifecycleState::Terminating => VolumeBackupLifecycleState::Terminated,
            VolumeBackupLifecycleState::Terminated => {
                if self.config.purge_after_reads.is_some() && self.tick(&backup.id) {
                    self.db.delete(Table::VolumeBackups, &backup.id)?;
                    info!("Purged volume backup {}", backup.id);
                    return Err(Error::not_found("volume_backup", &backup.id));
                }
                return Ok(backup);
            }
            _ => return Ok(backup),
        };

        if self.tick(&backup.id) {
            debug!("Volume backup {} {} -> {}", backup.id, backup.lifecycle_state, next);
            backup.lifecycle_state = next;
            if next == VolumeBackupLifecycleState::Terminated {
                if let Some(reads) = self.config.purge_after_reads {
                    self.set_countdown(&backup.id, reads);
                }
            }
            self.db.update(&backup)?;
        }
        Ok(backup)
    }

    fn load_volume(&self, id: &str) -> Result<Volume> {
        self.db
            .get::<Volume>(id)?
            .ok_or_else(|| Error::not_found("volume", id))
    }

    fn load_backup(&self, id: &str) -> Result<VolumeBackup> {
        self.db
            .get::<VolumeBackup>(id)?
            .ok_or_else(|| Error::not_found("volume_backup", id))
    }
}

#[async_trait]
impl BlockstorageApi for SimulatedBlockstorage {
    async fn create_volume(&self, details: CreateVolumeDetails) -> Result<Volume> {
        if details.compartment_id.is_empty() {
            return Err(Error::InvalidConfig("compartment_id is required".to_string()));
        }
        if details.availability_domain.is_empty() {
            return Err(Error::InvalidConfig("availability_domain is required".to_string()));
        }
        let defined_tags = details.defined_tags.unwrap_or_default();
        self.validate_defined_tags(&defined_tags)?;

        let now = Utc::now();
        let volume = Volume {
            id: new_ocid("volume"),
            compartment_id: details.compartment_id,
            availability_domain: details.availability_domain,
            display_name: details
                .display_name
                .unwrap_or_else(|| format!("volume{}", now.format("%Y%m%d%H%M%S"))),
            size_in_gbs: details.size_in_gbs.unwrap_or(DEFAULT_VOLUME_SIZE_GBS),
            lifecycle_state: VolumeLifecycleState::Provisioning,
            freeform_tags: details.freeform_tags.unwrap_or_default(),
            defined_tags,
            time_created: now,
        };

        self.db.insert(&volume)?;
        self.set_countdown(&volume.id, self.config.provisioning_reads);
        info!("Created volume {} ({})", volume.display_name, volume.id);
        Ok(volume)
    }

    async fn get_volume(&self, id: &str) -> Result<Volume> {
        self.take_fault(id)?;
        let volume = self.load_volume(id)?;
        self.advance_volume(volume)
    }

    async fn update_volume(&self, id: &str, details: UpdateVolumeDetails) -> Result<Volume> {
        self.take_fault(id)?;
        let mut volume = self.load_volume(id)?;
        if matches!(
            volume.lifecycle_state,
            VolumeLifecycleState::Terminating | VolumeLifecycleState::Terminated
        ) {
            return Err(Error::Conflict(format!(
                "volume {} is {}",
                id, volume.lifecycle_state
            )));
        }

        if let Some(name) = details.display_name {
            volume.display_name = name;
        }
        if let Some(tags) = details.freeform_tags {
            volume.freeform_tags = tags;
        }
        if let Some(tags) = details.defined_tags {
            self.validate_defined_tags(&tags)?;
            volume.defined_tags = tags;
        }

        self.db.update(&volume)?;
        info!("Updated volume {}", id);
        Ok(volume)
    }

    async fn delete_volume(&self, id: &str) -> Result<()> {
        self.take_fault(id)?;
        let mut volume = self.load_volume(id)?;
        if matches!(
            volume.lifecycle_state,
            VolumeLifecycleState::Terminating | VolumeLifecycleState::Terminated
        ) {
            return Ok(());
        }

        volume.lifecycle_state = VolumeLifecycleState::Terminating;
        self.db.update(&volume)?;
        self.set_countdown(id, self.config.termination_reads);
        info!("Deleting volume {}", id);
        Ok(())
    }

    async fn create_volume_backup(&self, details: CreateVolumeBackupDetails) -> Result<VolumeBackup> {
        self.take_fault(&details.volume_id)?;
        let volume = self.load_volume(&details.volume_id)?;
        if volume.lifecycle_state != VolumeLifecycleState::Available {
            return Err(Error::Conflict(format!(
                "volume {} is {}, expected AVAILABLE",
                volume.id, volume.lifecycle_state
            )));
        }
        let defined_tags = details.defined_tags.unwrap_or_default();
        self.validate_defined_tags(&defined_tags)?;

        let backup_type = details.backup_type.unwrap_or_default();
        let has_prior = !self
            .db
            .list::<VolumeBackup>(&ListQuery {
                parent_id: Some(volume.id.clone()),
                lifecycle_state: Some(VolumeBackupLifecycleState::Available.to_string()),
                ..Default::default()
            })?
            .is_empty();
        let unique_size = match backup_type {
            VolumeBackupType::Incremental if has_prior => 0,
            _ => volume.size_in_gbs,
        };

        let now = Utc::now();
        let backup = VolumeBackup {
            id: new_ocid("volumebackup"),
            compartment_id: volume.compartment_id.clone(),
            volume_id: volume.id.clone(),
            display_name: details
                .display_name
                .unwrap_or_else(|| format!("volumebackup{}", now.format("%Y%m%d%H%M%S"))),
            freeform_tags: details.freeform_tags.unwrap_or_default(),
            defined_tags,
            lifecycle_state: VolumeBackupLifecycleState::Creating,
            backup_type,
            source_type: VolumeBackupSourceType::Manual,
            time_created: now,
            time_request_received: Some(now),
            expiration_time: None,
            size_in_gbs: Some(volume.size_in_gbs),
            unique_size_in_gbs: Some(unique_size),
        };

        self.db.insert(&backup)?;
        self.set_countdown(&backup.id, self.config.provisioning_reads);
        info!(
            "Created {} volume backup {} of volume {}",
            backup.backup_type, backup.id, backup.volume_id
        );
        Ok(backup)
    }

    async fn get_volume_backup(&self, id: &str) -> Result<VolumeBackup> {
        self.take_fault(id)?;
        let backup = self.load_backup(id)?;
        self.advance_backup(backup)
    }

    async fn update_volume_backup(
        &self,
        id: &str,
        details: UpdateVolumeBackupDetails,
    ) -> Result<VolumeBackup> {
        self.take_fault(id)?;
        let mut backup = self.load_backup(id)?;
        if matches!(
            backup.lifecycle_state,
            VolumeBackupLifecycleState::Terminating | VolumeBackupLifecycleState::Terminated
        ) {
            return Err(Error::Conflict(format!(
                "volume backup {} is {}",
                id, backup.lifecycle_state
            )));
        }

        if let Some(name) = details.display_name {
            backup.display_name = name;
        }
        if let Some(tags) = details.freeform_tags {
            backup.freeform_tags = tags;
        }
        if let Some(tags) = details.defined_tags {
            self.validate_defined_tags(&tags)?;
            backup.defined_tags = tags;
        }

        self.db.update(&backup)?;
        info!("Updated volume backup {}", id);
        Ok(backup)
    }

    async fn delete_volume_backup(&self, id: &str) -> Result<()> {
        self.take_fault(id)?;
        let mut backup = self.load_backup(id)?;
        if matches!(
            backup.lifecycle_state,
            VolumeBackupLifecycleState::Terminating | VolumeBackupLifecycleState::Terminated
        ) {
            return Ok(());
        }

        backup.lifecycle_state = VolumeBackupLifecycleState::Terminating;
        self.db.update(&backup)?;
        self.set_countdown(id, self.config.termination_reads);
        info!("Deleting volume backup {}", id);
        Ok(())
    }

    async fn list_volume_backups(
        &self,
        request: ListVolumeBackupsRequest,
    ) -> Result<Page<VolumeBackup>> {
        if request.compartment_id.is_empty() {
            return Err(Error::InvalidConfig("compartment_id is required".to_string()));
        }

        let offset = match request.page.as_deref() {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| Error::InvalidConfig(format!("invalid page token: {}", token)))?,
            None => 0,
        };
        let limit = request.limit.unwrap_or(DEFAULT_PAGE_SIZE).max(1);

        let all: Vec<VolumeBackup> = self.db.list(&ListQuery {
            compartment_id: Some(request.compartment_id),
            parent_id: request.volume_id,
            display_name: request.display_name,
            lifecycle_state: request.lifecycle_state.map(|s| s.to_string()),
        })?;

        let total = all.len();
        let items: Vec<VolumeBackup> = all.into_iter().skip(offset).take(limit).collect();
        let next_page = if offset + items.len() < total {
            Some((offset + items.len()).to_string())
        } else {
            None
        };

        debug!("Listed {} of {} volume backups", items.len(), total);
        Ok(Page { items, next_page })
    }
}
