//! Lifecycle verifiers
//!
//! Destroy verification, update-in-place ID tracking and the check that a
//! collection data source projects the same attributes as the resource.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use blockstore_common::types::{VolumeBackupLifecycleState, VolumeLifecycleState};
use blockstore_common::ErrorKind;
use blockstore_provider::BlockstorageClient;
use parking_lot::Mutex;
use tracing::debug;

use crate::check::{attributes_of, state_check, Check, CheckContext, CheckFn};
use crate::error::{AccResult, AccTestError};
use crate::state::State;

pub const VOLUME_TYPE: &str = "oci_core_volume";
pub const VOLUME_BACKUP_TYPE: &str = "oci_core_volume_backup";

/// Confirm every tracked `type_name` instance is gone.
///
/// `get` queries the service once per instance and yields its lifecycle
/// state. A state in `deleted_states` or a not-found error counts as gone;
/// any other error is returned as is. Having no instance to verify fails.
pub async fn verify_destroyed<S, F, Fut>(
    state: &State,
    type_name: &str,
    deleted_states: &[S],
    get: F,
) -> AccResult<()>
where
    S: PartialEq + Display,
    F: Fn(String) -> Fut,
    Fut: Future<Output = blockstore_common::Result<S>>,
{
    let mut found = false;

    for resource in state.of_type(type_name) {
        found = true;
        match get(resource.id.clone()).await {
            Ok(lifecycle) if deleted_states.contains(&lifecycle) => {
                debug!("{} {} is {}", type_name, resource.id, lifecycle);
            }
            Ok(lifecycle) => {
                return Err(AccTestError::NotDestroyed {
                    id: resource.id.clone(),
                    state: lifecycle.to_string(),
                })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("{} {} no longer exists", type_name, resource.id);
            }
            Err(e) => return Err(e.into()),
        }
    }

    if !found {
        return Err(AccTestError::NoResourceFound(type_name.to_string()));
    }
    Ok(())
}

/// Destroy verification for `oci_core_volume_backup`
pub async fn check_volume_backup_destroy(client: &BlockstorageClient, state: &State) -> AccResult<()> {
    let api = client.api().clone();
    verify_destroyed(
        state,
        VOLUME_BACKUP_TYPE,
        &[VolumeBackupLifecycleState::Terminated],
        move |id| {
            let api = api.clone();
            async move { api.get_volume_backup(&id).await.map(|b| b.lifecycle_state) }
        },
    )
    .await
}

/// Destroy verification for `oci_core_volume`
pub async fn check_volume_destroy(client: &BlockstorageClient, state: &State) -> AccResult<()> {
    let api = client.api().clone();
    verify_destroyed(
        state,
        VOLUME_TYPE,
        &[VolumeLifecycleState::Terminated],
        move |id| {
            let api = api.clone();
            async move { api.get_volume(&id).await.map(|v| v.lifecycle_state) }
        },
    )
    .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DestroyTarget {
    Volume,
    VolumeBackup,
}

struct DestroyCheck(DestroyTarget);

#[async_trait]
impl Check for DestroyCheck {
    async fn check(&self, ctx: &CheckContext, state: &State) -> AccResult<()> {
        match self.0 {
            DestroyTarget::Volume => check_volume_destroy(&ctx.client, state).await,
            DestroyTarget::VolumeBackup => check_volume_backup_destroy(&ctx.client, state).await,
        }
    }
}

/// Destroy check for a resource type name
pub fn destroy_check(type_name: &str) -> AccResult<CheckFn> {
    let target = match type_name {
        VOLUME_TYPE => DestroyTarget::Volume,
        VOLUME_BACKUP_TYPE => DestroyTarget::VolumeBackup,
        other => {
            return Err(AccTestError::SpecParse(format!(
                "no destroy check for resource type {}",
                other
            )))
        }
    };
    Ok(Arc::new(DestroyCheck(target)))
}

/// Remembers a resource ID across steps to detect recreation
#[derive(Debug, Clone, Default)]
pub struct IdTracker {
    id: Arc<Mutex<Option<String>>>,
}

impl IdTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> Option<String> {
        self.id.lock().clone()
    }

    /// Record the current ID of `address`
    pub fn capture(&self, address: &str) -> CheckFn {
        let (slot, address) = (self.id.clone(), address.to_string());
        state_check(move |state| {
            let id = current_id(state, &address)?;
            debug!("Captured {} id {}", address, id);
            *slot.lock() = Some(id);
            Ok(())
        })
    }

    /// Fail when the ID of `address` differs from the captured one
    pub fn expect_unchanged(&self, address: &str) -> CheckFn {
        let (slot, address) = (self.id.clone(), address.to_string());
        state_check(move |state| {
            let after = current_id(state, &address)?;
            let before = slot.lock().clone().ok_or_else(|| {
                AccTestError::CheckFailed(format!("no ID was captured for {}", address))
            })?;
            if before != after {
                return Err(AccTestError::Recreated {
                    address: address.clone(),
                    before,
                    after,
                });
            }
            Ok(())
        })
    }
}

fn current_id(state: &State, address: &str) -> AccResult<String> {
    match state.get(address) {
        Some(resource) if !resource.id.is_empty() => Ok(resource.id.clone()),
        Some(_) => Err(AccTestError::CheckFailed(format!("{} has no id", address))),
        None => Err(AccTestError::CheckFailed(format!("Not found: {} in state", address))),
    }
}

/// Every attribute of `resource` appears with the same value in the entry of
/// `collection` on `data_source` whose `id` matches the resource
pub fn check_projection(resource: &str, data_source: &str, collection: &str) -> CheckFn {
    let (resource, data_source, collection) =
        (resource.to_string(), data_source.to_string(), collection.to_string());

    state_check(move |state| {
        let expected = attributes_of(state, &resource)?;
        let id = current_id(state, &resource)?;
        let listed = attributes_of(state, &data_source)?;

        let count: usize = listed
            .get(&format!("{}.#", collection))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let index = (0..count)
            .find(|i| listed.get(&format!("{}.{}.id", collection, i)) == Some(&id))
            .ok_or_else(|| {
                AccTestError::CheckFailed(format!(
                    "{}: no entry in {} with id {}",
                    data_source, collection, id
                ))
            })?;

        let prefix = format!("{}.{}.", collection, index);
        let mismatches: Vec<String> = expected
            .iter()
            .filter_map(|(key, value)| match listed.get(&format!("{}{}", prefix, key)) {
                Some(actual) if actual == value => None,
                Some(actual) => Some(format!("{}: {:?} != {:?}", key, value, actual)),
                None => Some(format!("{}: {:?} missing", key, value)),
            })
            .collect();

        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(AccTestError::CheckFailed(format!(
                "{} does not match {}{}: {}",
                resource,
                data_source,
                &prefix[..prefix.len() - 1],
                mismatches.join(", ")
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Mode, ResourceState};
    use blockstore_common::{Error, SimulatedBlockstorage, SimulatorConfig};
    use blockstore_provider::state::DynamicValue;
    use serde_json::json;

    fn state_of(resources: Vec<(&str, &str)>) -> State {
        let mut state = State::new();
        for (i, (type_name, id)) in resources.into_iter().enumerate() {
            state.upsert(ResourceState::new(
                type_name,
                &format!("r{}", i),
                Mode::Managed,
                DynamicValue::from(json!({ "id": id })),
            ));
        }
        state
    }

    #[tokio::test]
    async fn test_verify_destroyed_outcomes() {
        let state = state_of(vec![(VOLUME_BACKUP_TYPE, "gone"), (VOLUME_BACKUP_TYPE, "terminated")]);
        let lookup = |id: String| async move {
            match id.as_str() {
                "terminated" => Ok(VolumeBackupLifecycleState::Terminated),
                _ => Err(Error::not_found("volume_backup", &id)),
            }
        };
        verify_destroyed(&state, VOLUME_BACKUP_TYPE, &[VolumeBackupLifecycleState::Terminated], lookup)
            .await
            .unwrap();

        let state = state_of(vec![(VOLUME_BACKUP_TYPE, "faulty")]);
        let err = verify_destroyed(
            &state,
            VOLUME_BACKUP_TYPE,
            &[VolumeBackupLifecycleState::Terminated],
            |_| async { Ok(VolumeBackupLifecycleState::Faulty) },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("FAULTY"));
    }

    #[tokio::test]
    async fn test_verify_destroyed_propagates_other_errors_without_retry() {
        let state = state_of(vec![(VOLUME_BACKUP_TYPE, "b")]);
        let calls = Arc::new(Mutex::new(0));
        let counted = calls.clone();
        let err = verify_destroyed(
            &state,
            VOLUME_BACKUP_TYPE,
            &[VolumeBackupLifecycleState::Terminated],
            move |_| {
                *counted.lock() += 1;
                async { Err::<VolumeBackupLifecycleState, _>(Error::service(503, "ServiceUnavailable", "try later")) }
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AccTestError::Service(_)));
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_verify_destroyed_requires_tracked_resources() {
        let state = state_of(vec![(VOLUME_TYPE, "v")]);
        let err = verify_destroyed(
            &state,
            VOLUME_BACKUP_TYPE,
            &[VolumeBackupLifecycleState::Terminated],
            |_| async { Ok(VolumeBackupLifecycleState::Terminated) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AccTestError::NoResourceFound(_)));
    }

    #[tokio::test]
    async fn test_volume_destroy_against_simulator() {
        let sim = Arc::new(SimulatedBlockstorage::in_memory(SimulatorConfig::default()).unwrap());
        let client = BlockstorageClient::new(sim.clone(), Default::default());
        let state = state_of(vec![(VOLUME_TYPE, "ocid1.volume.oc1..missing")]);
        check_volume_destroy(&client, &state).await.unwrap();

        sim.inject_fault("ocid1.volume.oc1..missing", Error::service(401, "NotAuthenticated", "bad key"));
        let err = check_volume_destroy(&client, &state).await.unwrap_err();
        assert!(err.to_string().contains("NotAuthenticated"));

        assert!(destroy_check("oci_core_instance").is_err());
    }

    #[tokio::test]
    async fn test_id_tracker() {
        let sim = SimulatedBlockstorage::in_memory(SimulatorConfig::default()).unwrap();
        let ctx = CheckContext {
            client: BlockstorageClient::new(Arc::new(sim), Default::default()),
        };
        let tracker = IdTracker::new();

        let before = state_of(vec![(VOLUME_BACKUP_TYPE, "one")]);
        let after = state_of(vec![(VOLUME_BACKUP_TYPE, "two")]);
        let address = "oci_core_volume_backup.r0";

        assert!(tracker.expect_unchanged(address).check(&ctx, &before).await.is_err());
        tracker.capture(address).check(&ctx, &before).await.unwrap();
        assert_eq!(tracker.captured().as_deref(), Some("one"));
        tracker.expect_unchanged(address).check(&ctx, &before).await.unwrap();

        let err = tracker.expect_unchanged(address).check(&ctx, &after).await.unwrap_err();
        assert!(matches!(err, AccTestError::Recreated { .. }));
    }

    #[tokio::test]
    async fn test_projection() {
        let sim = SimulatedBlockstorage::in_memory(SimulatorConfig::default()).unwrap();
        let ctx = CheckContext {
            client: BlockstorageClient::new(Arc::new(sim), Default::default()),
        };
        let backup = json!({"id": "b", "display_name": "displayName2", "freeform_tags": {"Department": "Accounting"}});

        let mut state = State::new();
        state.upsert(ResourceState::new(VOLUME_BACKUP_TYPE, "b", Mode::Managed, DynamicValue::from(backup.clone())));
        state.upsert(ResourceState::new(
            "oci_core_volume_backups",
            "all",
            Mode::Data,
            DynamicValue::from(json!({"id": "x", "volume_backups": [{"id": "other"}, backup]})),
        ));

        let check = check_projection("oci_core_volume_backup.b", "data.oci_core_volume_backups.all", "volume_backups");
        check.check(&ctx, &state).await.unwrap();

        state.upsert(ResourceState::new(
            "oci_core_volume_backups",
            "all",
            Mode::Data,
            DynamicValue::from(json!({"id": "x", "volume_backups": [{"id": "b", "display_name": "stale"}]})),
        ));
        let err = check.check(&ctx, &state).await.unwrap_err();
        assert!(err.to_string().contains("display_name"));
        assert!(err.to_string().contains("freeform_tags.Department"));
    }
}
