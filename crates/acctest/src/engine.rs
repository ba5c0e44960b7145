//! Minimal declarative engine
//!
//! Reconciles a [`Config`] against recorded [`State`] through the provider:
//! refresh, plan, then create, update or replace each resource in
//! declaration order, and read data sources last.

use std::fmt;
use std::sync::Arc;

use blockstore_provider::provider::{has_errors, Diagnostic, Severity};
use blockstore_provider::state::DynamicValue;
use blockstore_provider::BlockstorageProvider;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{Block, Config, Scope};
use crate::error::{AccResult, AccTestError};
use crate::state::{address_of, Mode, ResourceState, State};

/// What a plan intends to do with one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Replace,
    Delete,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Replace => "replace",
            Action::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub address: String,
    pub action: Action,
    /// Attributes driving the change
    pub attributes: Vec<String>,
}

impl fmt::Display for PlannedChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attributes.is_empty() {
            write!(f, "{} ({})", self.address, self.action)
        } else {
            write!(f, "{} ({}: {})", self.address, self.action, self.attributes.join(", "))
        }
    }
}

fn diagnostics_error(address: &str, diagnostics: &[Diagnostic]) -> AccTestError {
    let message = diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    AccTestError::Diagnostics {
        address: address.to_string(),
        message,
    }
}

fn check_diagnostics(address: &str, diagnostics: &[Diagnostic]) -> AccResult<()> {
    for d in diagnostics.iter().filter(|d| d.severity == Severity::Warning) {
        warn!("{}: {}", address, d);
    }
    if has_errors(diagnostics) {
        return Err(diagnostics_error(address, diagnostics));
    }
    Ok(())
}

/// Drives a provider the way a declarative tool would
#[derive(Clone)]
pub struct Engine {
    provider: Arc<BlockstorageProvider>,
}

impl Engine {
    pub fn new(provider: Arc<BlockstorageProvider>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<BlockstorageProvider> {
        &self.provider
    }

    async fn configure(&self, config: &Config, state: &State) -> AccResult<()> {
        let Some(arguments) = &config.provider else {
            return Ok(());
        };
        let resolved = Scope::new(&config.variables, state).resolve_attributes(arguments)?;
        let diagnostics = self.provider.configure(&resolved).await;
        check_diagnostics("provider", &diagnostics)
    }

    async fn create(&self, block: &Block, planned: &DynamicValue) -> AccResult<ResourceState> {
        let address = address_of(&block.type_name, &block.name, Mode::Managed);
        info!("{}: Creating...", address);

        let resp = self
            .provider
            .apply_resource_change(&block.type_name, None, Some(planned))
            .await;
        check_diagnostics(&address, &resp.diagnostics)?;

        let resource = ResourceState::new(&block.type_name, &block.name, Mode::Managed, resp.new_state);
        info!("{}: Creation complete [id={}]", address, resource.id);
        Ok(resource)
    }

    async fn delete(&self, resource: &ResourceState) -> AccResult<()> {
        let address = resource.address();
        info!("{}: Destroying... [id={}]", address, resource.id);

        let resp = self
            .provider
            .apply_resource_change(&resource.type_name, Some(&resource.attributes), None)
            .await;
        check_diagnostics(&address, &resp.diagnostics)?;

        info!("{}: Destruction complete", address);
        Ok(())
    }

    /// Re-read one resource; `None` when it no longer exists
    async fn read(&self, resource: &ResourceState) -> AccResult<Option<ResourceState>> {
        let resp = self
            .provider
            .read_resource(&resource.type_name, &resource.attributes)
            .await;
        check_diagnostics(&resource.address(), &resp.diagnostics)?;

        Ok(resp.new_state.map(|attributes| {
            ResourceState::new(&resource.type_name, &resource.name, resource.mode, attributes)
        }))
    }

    /// Refresh every managed resource, dropping the ones that are gone
    pub async fn refresh(&self, state: &mut State) -> AccResult<()> {
        let managed: Vec<ResourceState> = state
            .resources()
            .filter(|r| r.mode == Mode::Managed)
            .cloned()
            .collect();

        for resource in managed {
            match self.read(&resource).await? {
                Some(current) => state.upsert(current),
                None => {
                    warn!("{} no longer exists, removing from state", resource.address());
                    state.remove(&resource.address());
                }
            }
        }
        Ok(())
    }

    /// Bring `state` in line with `config`.
    ///
    /// `state` is updated as each change completes, so on error it still
    /// describes everything that exists.
    pub async fn apply(&self, config: &Config, state: &mut State) -> AccResult<()> {
        self.configure(config, state).await?;
        self.refresh(state).await?;

        // orphans, newest first
        let orphans: Vec<ResourceState> = state
            .resources()
            .rev()
            .filter(|r| !config.declares(&r.address()))
            .cloned()
            .collect();
        for orphan in orphans {
            if orphan.mode == Mode::Managed {
                self.delete(&orphan).await?;
            }
            state.remove(&orphan.address());
        }

        for block in &config.resources {
            let address = address_of(&block.type_name, &block.name, Mode::Managed);
            let proposed = Scope::new(&config.variables, state).resolve_attributes(&block.attributes)?;

            let diagnostics = self.provider.validate_resource_config(&block.type_name, &proposed);
            check_diagnostics(&address, &diagnostics)?;

            let Some(prior) = state.get(&address).cloned() else {
                let created = self.create(block, &proposed).await?;
                state.upsert(created);
                continue;
            };

            let plan = self
                .provider
                .plan_resource_change(&block.type_name, Some(&prior.attributes), Some(&proposed));
            check_diagnostics(&address, &plan.diagnostics)?;

            if !plan.requires_replace.is_empty() {
                info!("{}: Replacing, {} forces replacement", address, plan.requires_replace.join(", "));
                self.delete(&prior).await?;
                state.remove(&address);
                let created = self.create(block, &proposed).await?;
                state.upsert(created);
            } else if !plan.changed_attributes.is_empty() {
                info!("{}: Modifying... [id={}]", address, prior.id);
                let resp = self
                    .provider
                    .apply_resource_change(&block.type_name, Some(&prior.attributes), Some(&plan.planned_state))
                    .await;
                check_diagnostics(&address, &resp.diagnostics)?;
                state.upsert(ResourceState::new(&block.type_name, &block.name, Mode::Managed, resp.new_state));
                info!("{}: Modifications complete [id={}]", address, prior.id);
            } else {
                debug!("{}: No changes", address);
            }
        }

        for block in &config.data_sources {
            let address = address_of(&block.type_name, &block.name, Mode::Data);
            let resolved = Scope::new(&config.variables, state).resolve_attributes(&block.attributes)?;

            debug!("{}: Reading...", address);
            let resp = self.provider.read_data_source(&block.type_name, &resolved).await;
            check_diagnostics(&address, &resp.diagnostics)?;

            let attributes = resp.state.unwrap_or_default();
            state.upsert(ResourceState::new(&block.type_name, &block.name, Mode::Data, attributes));
        }

        Ok(())
    }

    /// Changes a subsequent apply of `config` would make
    pub async fn plan(&self, config: &Config, state: &State) -> AccResult<Vec<PlannedChange>> {
        let mut refreshed = state.clone();
        self.refresh(&mut refreshed).await?;

        let mut changes: Vec<PlannedChange> = refreshed
            .resources()
            .rev()
            .filter(|r| r.mode == Mode::Managed && !config.declares(&r.address()))
            .map(|r| PlannedChange {
                address: r.address(),
                action: Action::Delete,
                attributes: vec![],
            })
            .collect();

        for block in &config.resources {
            let address = address_of(&block.type_name, &block.name, Mode::Managed);
            let Some(prior) = refreshed.get(&address) else {
                changes.push(PlannedChange {
                    address,
                    action: Action::Create,
                    attributes: vec![],
                });
                continue;
            };

            let proposed = Scope::new(&config.variables, &refreshed).resolve_attributes(&block.attributes)?;
            let plan = self
                .provider
                .plan_resource_change(&block.type_name, Some(&prior.attributes), Some(&proposed));
            check_diagnostics(&address, &plan.diagnostics)?;

            if !plan.requires_replace.is_empty() {
                changes.push(PlannedChange {
                    address,
                    action: Action::Replace,
                    attributes: plan.requires_replace,
                });
            } else if !plan.changed_attributes.is_empty() {
                changes.push(PlannedChange {
                    address,
                    action: Action::Update,
                    attributes: plan.changed_attributes,
                });
            }
        }

        Ok(changes)
    }

    /// Destroy every managed resource, newest first
    pub async fn destroy(&self, state: &mut State) -> AccResult<()> {
        let resources: Vec<ResourceState> = state.resources().rev().cloned().collect();
        for resource in resources {
            if resource.mode == Mode::Managed {
                self.delete(&resource).await?;
            }
            state.remove(&resource.address());
        }
        Ok(())
    }

    /// Import an existing remote object by ID
    pub async fn import(&self, type_name: &str, name: &str, id: &str) -> AccResult<ResourceState> {
        let address = address_of(type_name, name, Mode::Managed);
        info!("{}: Importing from ID \"{}\"...", address, id);

        let resp = self.provider.import_resource_state(type_name, id).await;
        check_diagnostics(&address, &resp.diagnostics)?;

        let imported = resp
            .imported_resources
            .into_iter()
            .find(|r| r.type_name == type_name)
            .ok_or_else(|| AccTestError::Diagnostics {
                address: address.clone(),
                message: format!("import returned no {} resource", type_name),
            })?;

        Ok(ResourceState::new(type_name, name, Mode::Managed, imported.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockstore_common::{SimulatedBlockstorage, SimulatorConfig};
    use blockstore_provider::ProviderConfig;
    use serde_json::json;

    fn engine() -> Engine {
        let sim = SimulatedBlockstorage::in_memory(SimulatorConfig::default()).unwrap();
        let config = ProviderConfig {
            compartment_id: "ocid1.compartment.oc1..test".into(),
            poll_interval_ms: 1,
            ..Default::default()
        };
        Engine::new(Arc::new(BlockstorageProvider::new(Arc::new(sim), config)))
    }

    fn volume_config() -> Config {
        Config::new()
            .variable("compartment_id", json!("ocid1.compartment.oc1..test"))
            .resource(
                "oci_core_volume",
                "test_volume",
                json!({
                    "compartment_id": "${var.compartment_id}",
                    "availability_domain": "AD-1",
                    "display_name": "vol",
                }),
            )
    }

    fn backup_config(extra: serde_json::Value) -> Config {
        let mut attributes = json!({"volume_id": "${oci_core_volume.test_volume.id}"});
        if let (Some(target), Some(extra)) = (attributes.as_object_mut(), extra.as_object()) {
            target.extend(extra.clone());
        }
        volume_config().resource("oci_core_volume_backup", "b", attributes)
    }

    #[tokio::test]
    async fn test_apply_then_plan_is_empty() {
        let engine = engine();
        let mut state = State::new();
        let config = backup_config(json!({"display_name": "nightly"}));

        engine.apply(&config, &mut state).await.unwrap();
        assert_eq!(state.addresses(), vec!["oci_core_volume.test_volume", "oci_core_volume_backup.b"]);
        assert!(engine.plan(&config, &state).await.unwrap().is_empty());

        let renamed = backup_config(json!({"display_name": "weekly"}));
        let plan = engine.plan(&renamed, &state).await.unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].action, Action::Update);

        let retyped = backup_config(json!({"display_name": "nightly", "type": "FULL"}));
        let plan = engine.plan(&retyped, &state).await.unwrap();
        assert_eq!(plan[0].action, Action::Replace);
        assert_eq!(plan[0].attributes, vec!["type"]);
    }

    #[tokio::test]
    async fn test_replace_orphans_and_destroy() {
        let engine = engine();
        let mut state = State::new();

        engine.apply(&backup_config(json!({})), &mut state).await.unwrap();
        let first = state.get("oci_core_volume_backup.b").unwrap().id.clone();

        engine.apply(&backup_config(json!({"type": "FULL"})), &mut state).await.unwrap();
        let second = state.get("oci_core_volume_backup.b").unwrap();
        assert_ne!(second.id, first);
        assert_eq!(second.attributes.get("type").and_then(|t| t.as_string()), Some("FULL"));

        engine.apply(&volume_config(), &mut state).await.unwrap();
        assert!(state.get("oci_core_volume_backup.b").is_none());

        engine.destroy(&mut state).await.unwrap();
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_is_reported_before_create() {
        let engine = engine();
        let mut state = State::new();
        let config = backup_config(json!({"type": "DIFFERENTIAL"}));

        let err = engine.apply(&config, &mut state).await.unwrap_err();
        assert!(err.to_string().contains("oci_core_volume_backup.b"));
        // the volume was created before the failing block
        assert_eq!(state.len(), 1);
    }

    #[tokio::test]
    async fn test_import_unknown_id() {
        let engine = engine();
        let err = engine
            .import("oci_core_volume_backup", "b", "ocid1.volumebackup.oc1..nope")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-existent"));
    }
}
