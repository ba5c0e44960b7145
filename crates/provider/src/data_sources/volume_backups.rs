//! Volume Backups data source

use anyhow::Result;
use blockstore_common::types::{ListVolumeBackupsRequest, VolumeBackupLifecycleState};
use tracing::debug;

use super::filter::{apply_filters, Filter};
use super::DataSource;
use crate::client::BlockstorageClient;
use crate::resources::volume_backup::volume_backup_to_state;
use crate::state::{get_optional_string_attr, get_string_attr, string_value, DynamicValue};

pub struct VolumeBackupsDataSource;

#[async_trait::async_trait]
impl DataSource for VolumeBackupsDataSource {
    fn type_name() -> &'static str {
        "oci_core_volume_backups"
    }

    async fn read(client: &BlockstorageClient, config: &DynamicValue) -> Result<DynamicValue> {
        let compartment_id = get_string_attr(config, "compartment_id");
        let lifecycle_state = get_optional_string_attr(config, "state")
            .map(|s| s.parse::<VolumeBackupLifecycleState>())
            .transpose()?;
        let filters = Filter::from_config(config)?;

        let request = ListVolumeBackupsRequest {
            compartment_id: compartment_id.clone(),
            volume_id: get_optional_string_attr(config, "volume_id"),
            display_name: get_optional_string_attr(config, "display_name"),
            lifecycle_state,
            limit: None,
            page: None,
        };

        let backups = client.list_all_volume_backups(request).await?;
        let projected: Vec<DynamicValue> = backups.iter().map(volume_backup_to_state).collect();
        let matched = apply_filters(&filters, projected);
        debug!(
            "{} volume backups in {} after {} filters",
            matched.len(),
            compartment_id,
            filters.len()
        );

        let mut state = config.clone();
        state.set("id", string_value(format!("{}:{}", Self::type_name(), compartment_id)));
        state.set("volume_backups", DynamicValue::List(matched));
        Ok(state)
    }
}
