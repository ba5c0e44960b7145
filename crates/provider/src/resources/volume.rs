//! Volume Resource handler

use anyhow::{anyhow, Result};
use blockstore_common::types::{
    CreateVolumeDetails, UpdateVolumeDetails, Volume, VolumeLifecycleState,
};
use tracing::info;

use super::{defined_tags_attr, defined_tags_value, freeform_tags_attr, Resource};
use super::volume_backup::format_time;
use crate::client::BlockstorageClient;
use crate::retry::is_gone;
use crate::state::{
    get_optional_int_attr, get_optional_string_attr, get_string_attr, int_value, make_state,
    string_map_value, string_value, DynamicValue,
};

pub struct VolumeResource;

#[async_trait::async_trait]
impl Resource for VolumeResource {
    fn type_name() -> &'static str {
        "oci_core_volume"
    }

    async fn create(client: &BlockstorageClient, config: &DynamicValue) -> Result<DynamicValue> {
        let details = CreateVolumeDetails {
            compartment_id: get_string_attr(config, "compartment_id"),
            availability_domain: get_string_attr(config, "availability_domain"),
            display_name: get_optional_string_attr(config, "display_name"),
            size_in_gbs: get_optional_int_attr(config, "size_in_gbs"),
            freeform_tags: freeform_tags_attr(config),
            defined_tags: defined_tags_attr(config)?,
        };

        let volume = client.create_volume(details).await?;
        let volume = client
            .wait_for_volume_state(
                &volume.id,
                &[VolumeLifecycleState::Available],
                &[VolumeLifecycleState::Provisioning, VolumeLifecycleState::Restoring],
                false,
                client.config().create_timeout(),
            )
            .await?
            .ok_or_else(|| anyhow!("volume {} disappeared while provisioning", volume.id))?;

        Ok(volume_to_state(&volume))
    }

    async fn read(client: &BlockstorageClient, state: &DynamicValue) -> Result<Option<DynamicValue>> {
        let id = get_string_attr(state, "id");
        match client.get_volume(&id).await {
            Ok(volume) if volume.lifecycle_state == VolumeLifecycleState::Terminated => Ok(None),
            Ok(volume) => Ok(Some(volume_to_state(&volume))),
            Err(e) if is_gone(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn update(client: &BlockstorageClient, state: &DynamicValue, config: &DynamicValue) -> Result<DynamicValue> {
        let id = get_string_attr(state, "id");
        let details = update_details(state, config)?;

        if !details.is_empty() {
            info!("Updating volume {}", id);
            client.update_volume(&id, details).await?;
        }

        Self::read(client, state)
            .await?
            .ok_or_else(|| anyhow!("volume {} no longer exists", id))
    }

    async fn delete(client: &BlockstorageClient, state: &DynamicValue) -> Result<()> {
        let id = get_string_attr(state, "id");
        match client.delete_volume(&id).await {
            Ok(()) => {}
            Err(e) if is_gone(&e) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        client
            .wait_for_volume_state(
                &id,
                &[VolumeLifecycleState::Terminated],
                &[VolumeLifecycleState::Terminating, VolumeLifecycleState::Available],
                true,
                client.config().delete_timeout(),
            )
            .await?;
        Ok(())
    }
}

/// Mutable attributes of `config` that differ from `state`
fn update_details(state: &DynamicValue, config: &DynamicValue) -> Result<UpdateVolumeDetails> {
    let mut details = UpdateVolumeDetails::default();

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

fn volume_to_state(volume: &Volume) -> DynamicValue {
    make_state(vec![
        ("id", string_value(&volume.id)),
        ("compartment_id", string_value(&volume.compartment_id)),
        ("availability_domain", string_value(&volume.availability_domain)),
        ("display_name", string_value(&volume.display_name)),
        ("size_in_gbs", int_value(volume.size_in_gbs)),
        ("freeform_tags", string_map_value(&volume.freeform_tags)),
        ("defined_tags", defined_tags_value(&volume.defined_tags)),
        ("state", string_value(volume.lifecycle_state.as_str())),
        ("time_created", string_value(format_time(&volume.time_created))),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_details_skips_unchanged_fields() {
        let state = DynamicValue::from(json!({
            "id": "ocid1.volume.oc1..a",
            "display_name": "vol",
            "freeform_tags": {"Department": "Finance"},
            "defined_tags": {},
        }));

        let renamed = DynamicValue::from(json!({
            "display_name": "vol2",
            "freeform_tags": {"Department": "Finance"},
        }));
        let details = update_details(&state, &renamed).unwrap();
        assert_eq!(details.display_name.as_deref(), Some("vol2"));
        assert!(details.freeform_tags.is_none());
        assert!(details.defined_tags.is_none());

        let same = DynamicValue::from(json!({"display_name": "vol", "defined_tags": {}}));
        assert!(update_details(&state, &same).unwrap().is_empty());
    }
}
