//! Volume Backup Resource handler

use anyhow::{anyhow, Result};
use blockstore_common::types::{
    CreateVolumeBackupDetails, UpdateVolumeBackupDetails, VolumeBackup,
    VolumeBackupLifecycleState, VolumeBackupType,
};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, info};

use super::{defined_tags_attr, defined_tags_value, freeform_tags_attr, Resource};
use crate::client::BlockstorageClient;
use crate::retry::is_gone;
use crate::state::{
    get_optional_string_attr, get_string_attr, make_state, optional_int_value,
    optional_string_value, string_map_value, string_value, DynamicValue,
};

pub struct VolumeBackupResource;

#[async_trait::async_trait]
impl Resource for VolumeBackupResource {
    fn type_name() -> &'static str {
        "oci_core_volume_backup"
    }

    async fn create(client: &BlockstorageClient, config: &DynamicValue) -> Result<DynamicValue> {
        let backup_type = get_optional_string_attr(config, "type")
            .map(|t| t.parse::<VolumeBackupType>())
            .transpose()?;

        let details = CreateVolumeBackupDetails {
            volume_id: get_string_attr(config, "volume_id"),
            display_name: get_optional_string_attr(config, "display_name"),
            freeform_tags: freeform_tags_attr(config),
            defined_tags: defined_tags_attr(config)?,
            backup_type,
        };

        let backup = client.create_volume_backup(details).await?;
        info!("Waiting for volume backup {} to become available", backup.id);

        let backup = client
            .wait_for_volume_backup_state(
                &backup.id,
                &[VolumeBackupLifecycleState::Available],
                &[
                    VolumeBackupLifecycleState::Creating,
                    VolumeBackupLifecycleState::RequestReceived,
                ],
                false,
                client.config().create_timeout(),
            )
            .await?
            .ok_or_else(|| anyhow!("volume backup {} disappeared while creating", backup.id))?;

        Ok(volume_backup_to_state(&backup))
    }

    async fn read(client: &BlockstorageClient, state: &DynamicValue) -> Result<Option<DynamicValue>> {
        let id = get_string_attr(state, "id");
        match client.get_volume_backup(&id).await {
            Ok(backup) if backup.lifecycle_state.is_terminal() => {
                debug!("Volume backup {} is {}", id, backup.lifecycle_state);
                Ok(None)
            }
            Ok(backup) => Ok(Some(volume_backup_to_state(&backup))),
            Err(e) if is_gone(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(client: &BlockstorageClient, state: &DynamicValue, config: &DynamicValue) -> Result<DynamicValue> {
        let id = get_string_attr(state, "id");
        let details = update_details(state, config)?;

        if !details.is_empty() {
            info!("Updating volume backup {}", id);
            client.update_volume_backup(&id, details).await?;
        }

        Self::read(client, state)
            .await?
            .ok_or_else(|| anyhow!("volume backup {} no longer exists", id))
    }

    async fn delete(client: &BlockstorageClient, state: &DynamicValue) -> Result<()> {
        let id = get_string_attr(state, "id");
        match client.delete_volume_backup(&id).await {
            Ok(()) => {}
            Err(e) if is_gone(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        client
            .wait_for_volume_backup_state(
                &id,
                &[VolumeBackupLifecycleState::Terminated],
                &[
                    VolumeBackupLifecycleState::Terminating,
                    VolumeBackupLifecycleState::Available,
                ],
                true,
                client.config().delete_timeout(),
            )
            .await?;
        info!("Deleted volume backup {}", id);
        Ok(())
    }
}

/// Mutable attributes of `config` that differ from `state`
fn update_details(state: &DynamicValue, config: &DynamicValue) -> Result<UpdateVolumeBackupDetails> {
    let mut details = UpdateVolumeBackupDetails::default();

    if let Some(name) = get_optional_string_attr(config, "display_name") {
        if get_optional_string_attr(state, "display_name").as_deref() != Some(name.as_str()) {
            details.display_name = Some(name);
        }
    }
    if let Some(tags) = freeform_tags_attr(config) {
        if freeform_tags_attr(state).as_ref() != Some(&tags) {
            details.freeform_tags = Some(tags);
        }
    }
    if let Some(tags) = defined_tags_attr(config)? {
        if defined_tags_attr(state)?.as_ref() != Some(&tags) {
            details.defined_tags = Some(tags);
        }
    }
    Ok(details)
}

pub(crate) fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Attribute view of a backup, shared by the resource and the data source
pub(crate) fn volume_backup_to_state(backup: &VolumeBackup) -> DynamicValue {
    make_state(vec![
        ("id", string_value(&backup.id)),
        ("compartment_id", string_value(&backup.compartment_id)),
        ("volume_id", string_value(&backup.volume_id)),
        ("display_name", string_value(&backup.display_name)),
        ("freeform_tags", string_map_value(&backup.freeform_tags)),
        ("defined_tags", defined_tags_value(&backup.defined_tags)),
        ("state", string_value(backup.lifecycle_state.as_str())),
        ("type", string_value(backup.backup_type.as_str())),
        ("source_type", string_value(backup.source_type.as_str())),
        ("time_created", string_value(format_time(&backup.time_created))),
        (
            "time_request_received",
            optional_string_value(backup.time_request_received.as_ref().map(format_time)),
        ),
        (
            "expiration_time",
            optional_string_value(backup.expiration_time.as_ref().map(format_time)),
        ),
        ("size_in_gbs", optional_int_value(backup.size_in_gbs)),
        ("unique_size_in_gbs", optional_int_value(backup.unique_size_in_gbs)),
    ])
}
