//! Block Storage Provider Implementation
//!
//! Exposes the plugin operations (schema, configure, validate, plan, apply,
//! read, import, data source read) over the resource and data source
//! handlers. Failures are reported as diagnostics, never panics.

use std::collections::BTreeMap;
use std::sync::Arc;

use blockstore_common::BlockstorageApi;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::client::BlockstorageClient;
use crate::config::ProviderConfig;
use crate::data_sources::{volume_backups::VolumeBackupsDataSource, DataSource};
use crate::resources::{volume::VolumeResource, volume_backup::VolumeBackupResource, Resource};
use crate::schema::{self, Schema};
use crate::state::{get_optional_string_attr, make_state, string_value, DynamicValue};

/// Diagnostic severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// A problem reported back to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    /// Attribute path the diagnostic refers to
    pub attribute: Option<String>,
}

impl Diagnostic {
    pub fn error(
        summary: impl Into<String>,
        detail: impl Into<String>,
        attribute: Option<String>,
    ) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
            attribute,
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: detail.into(),
            attribute: None,
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.attribute {
            Some(attr) => write!(f, "{}: {} ({})", self.summary, self.detail, attr),
            None => write!(f, "{}: {}", self.summary, self.detail),
        }
    }
}

pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| d.severity == Severity::Error)
}

/// All schemas served by the provider
#[derive(Debug, Clone)]
pub struct ProviderSchemas {
    pub provider: Schema,
    pub resource_schemas: BTreeMap<&'static str, Schema>,
    pub data_source_schemas: BTreeMap<&'static str, Schema>,
}

#[derive(Debug, Clone)]
pub struct PlanResponse {
    /// `Null` when the resource is planned for destruction
    pub planned_state: DynamicValue,
    pub requires_replace: Vec<String>,
    pub changed_attributes: Vec<String>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PlanResponse {
    pub fn is_noop(&self) -> bool {
        self.requires_replace.is_empty() && self.changed_attributes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ApplyResponse {
    /// `Null` after a delete
    pub new_state: DynamicValue,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct ReadResponse {
    /// `None` when the resource no longer exists
    pub new_state: Option<DynamicValue>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct ImportedResource {
    pub type_name: String,
    pub state: DynamicValue,
}

#[derive(Debug, Clone)]
pub struct ImportResponse {
    pub imported_resources: Vec<ImportedResource>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone)]
pub struct DataSourceResponse {
    pub state: Option<DynamicValue>,
    pub diagnostics: Vec<Diagnostic>,
}

fn unknown_type(kind: &str, type_name: &str) -> Diagnostic {
    Diagnostic::error(
        format!("Unknown {} type", kind),
        format!("The provider does not support {} \"{}\"", kind, type_name),
        None,
    )
}

fn normalize(value: Option<&DynamicValue>) -> Option<&DynamicValue> {
    value.filter(|v| !v.is_null())
}

/// Block storage provider
pub struct BlockstorageProvider {
    api: Arc<dyn BlockstorageApi>,
    config: Arc<RwLock<ProviderConfig>>,
    /// Client built by the last successful configure
    client: Arc<RwLock<Option<BlockstorageClient>>>,
}

impl BlockstorageProvider {
    pub fn new(api: Arc<dyn BlockstorageApi>, config: ProviderConfig) -> Self {
        Self {
            api,
            config: Arc::new(RwLock::new(config)),
            client: Arc::new(RwLock::new(None)),
        }
    }

    /// Client for the current configuration
    pub async fn client(&self) -> BlockstorageClient {
        if let Some(client) = self.client.read().await.as_ref() {
            return client.clone();
        }
        let config = self.config.read().await.clone();
        BlockstorageClient::new(self.api.clone(), config)
    }

    pub async fn config(&self) -> ProviderConfig {
        self.config.read().await.clone()
    }

    pub fn schema(&self) -> ProviderSchemas {
        info!("GetProviderSchema called");

        ProviderSchemas {
            provider: schema::provider_schema(),
            resource_schemas: [
                (VolumeResource::type_name(), schema::volume_schema()),
                (VolumeBackupResource::type_name(), schema::volume_backup_schema()),
            ]
            .into_iter()
            .collect(),
            data_source_schemas: [(
                VolumeBackupsDataSource::type_name(),
                schema::volume_backups_data_source_schema(),
            )]
            .into_iter()
            .collect(),
        }
    }

    fn resource_schema(&self, type_name: &str) -> Option<Schema> {
        match type_name {
            "oci_core_volume" => Some(schema::volume_schema()),
            "oci_core_volume_backup" => Some(schema::volume_backup_schema()),
            _ => None,
        }
    }

    fn data_source_schema(&self, type_name: &str) -> Option<Schema> {
        match type_name {
            "oci_core_volume_backups" => Some(schema::volume_backups_data_source_schema()),
            _ => None,
        }
    }

    /// Apply provider-level configuration and build the client
    pub async fn configure(&self, provider_config: &DynamicValue) -> Vec<Diagnostic> {
        info!("ConfigureProvider called");

        let mut diagnostics = schema::provider_schema().validate(provider_config);
        if has_errors(&diagnostics) {
            return diagnostics;
        }

        let mut config = self.config.read().await.clone();
        if let Some(region) = get_optional_string_attr(provider_config, "region") {
            config.region = region;
        }
        if let Some(compartment) = get_optional_string_attr(provider_config, "compartment_id") {
            config.compartment_id = compartment;
        }

        if let Err(e) = config.validate() {
            error!("Invalid provider configuration: {}", e);
            diagnostics.push(Diagnostic::error(
                "Invalid provider configuration",
                e.to_string(),
                None,
            ));
            return diagnostics;
        }

        info!("Configured provider for region {}", config.region);
        *self.client.write().await = Some(BlockstorageClient::new(self.api.clone(), config.clone()));
        *self.config.write().await = config;
        diagnostics
    }

    pub fn validate_resource_config(&self, type_name: &str, config: &DynamicValue) -> Vec<Diagnostic> {
        debug!("ValidateResourceConfig called for {}", type_name);
        match self.resource_schema(type_name) {
            Some(schema) => schema.validate(config),
            None => vec![unknown_type("resource", type_name)],
        }
    }

    pub fn validate_data_source_config(&self, type_name: &str, config: &DynamicValue) -> Vec<Diagnostic> {
        debug!("ValidateDataResourceConfig called for {}", type_name);
        match self.data_source_schema(type_name) {
            Some(schema) => schema.validate(config),
            None => vec![unknown_type("data source", type_name)],
        }
    }

    /// Plan the transition from `prior` to `proposed`
    pub fn plan_resource_change(
        &self,
        type_name: &str,
        prior: Option<&DynamicValue>,
        proposed: Option<&DynamicValue>,
    ) -> PlanResponse {
        debug!("PlanResourceChange called for {}", type_name);

        let Some(schema) = self.resource_schema(type_name) else {
            return PlanResponse {
                planned_state: DynamicValue::Null,
                requires_replace: vec![],
                changed_attributes: vec![],
                diagnostics: vec![unknown_type("resource", type_name)],
            };
        };

        match (normalize(prior), normalize(proposed)) {
            (_, None) => PlanResponse {
                planned_state: DynamicValue::Null,
                requires_replace: vec![],
                changed_attributes: prior.map(|_| vec!["*".to_string()]).unwrap_or_default(),
                diagnostics: vec![],
            },
            (None, Some(proposed)) => PlanResponse {
                planned_state: proposed.clone(),
                requires_replace: vec![],
                changed_attributes: vec!["*".to_string()],
                diagnostics: schema.validate(proposed),
            },
            (Some(prior), Some(proposed)) => {
                let requires_replace = schema.requires_replace(prior, proposed);
                let changed_attributes = schema.changed_attributes(prior, proposed);

                let mut planned = prior.clone();
                for attr in schema.attributes.iter().filter(|a| a.required || a.optional) {
                    let value = proposed.get(attr.name).cloned().unwrap_or_default();
                    if !value.is_null() || !attr.computed {
                        planned.set(attr.name, value);
                    }
                }

                PlanResponse {
                    planned_state: planned,
                    requires_replace,
                    changed_attributes,
                    diagnostics: schema.validate(proposed),
                }
            }
        }
    }

    /// Create, update or delete depending on which of prior/planned is null
    pub async fn apply_resource_change(
        &self,
        type_name: &str,
        prior: Option<&DynamicValue>,
        planned: Option<&DynamicValue>,
    ) -> ApplyResponse {
        info!("ApplyResourceChange called for {}", type_name);

        let client = self.client().await;

        let result = match (normalize(prior), normalize(planned)) {
            // Create
            (None, Some(planned)) => match type_name {
                "oci_core_volume" => VolumeResource::create(&client, planned).await,
                "oci_core_volume_backup" => VolumeBackupResource::create(&client, planned).await,
                _ => return ApplyResponse::failed(unknown_type("resource", type_name)),
            },
            // Delete
            (Some(prior), None) => {
                let delete_result = match type_name {
                    "oci_core_volume" => VolumeResource::delete(&client, prior).await,
                    "oci_core_volume_backup" => VolumeBackupResource::delete(&client, prior).await,
                    _ => return ApplyResponse::failed(unknown_type("resource", type_name)),
                };

                delete_result.map(|_| DynamicValue::Null)
            }
            // Update
            (Some(prior), Some(planned)) => match type_name {
                "oci_core_volume" => VolumeResource::update(&client, prior, planned).await,
                "oci_core_volume_backup" => {
                    VolumeBackupResource::update(&client, prior, planned).await
                }
                _ => return ApplyResponse::failed(unknown_type("resource", type_name)),
            },
            // No change
            (None, None) => Ok(DynamicValue::Null),
        };

        match result {
            Ok(new_state) => ApplyResponse {
                new_state,
                diagnostics: vec![],
            },
            Err(e) => {
                error!("Apply of {} failed: {:#}", type_name, e);
                ApplyResponse::failed(Diagnostic::error(
                    "Failed to apply resource change",
                    format!("{:#}", e),
                    None,
                ))
            }
        }
    }

    /// Refresh a resource from the service
    pub async fn read_resource(&self, type_name: &str, current: &DynamicValue) -> ReadResponse {
        info!("ReadResource called for {}", type_name);

        let client = self.client().await;
        let result = match type_name {
            "oci_core_volume" => VolumeResource::read(&client, current).await,
            "oci_core_volume_backup" => VolumeBackupResource::read(&client, current).await,
            _ => {
                return ReadResponse {
                    new_state: None,
                    diagnostics: vec![unknown_type("resource", type_name)],
                }
            }
        };

        match result {
            Ok(new_state) => ReadResponse {
                new_state,
                diagnostics: vec![],
            },
            Err(e) => ReadResponse {
                new_state: None,
                diagnostics: vec![Diagnostic::error(
                    "Failed to read resource",
                    format!("{:#}", e),
                    None,
                )],
            },
        }
    }

    /// Import an existing resource by ID
    pub async fn import_resource_state(&self, type_name: &str, id: &str) -> ImportResponse {
        info!("ImportResourceState called for {} with ID {}", type_name, id);

        // Create a minimal state with just the ID
        let initial_state = make_state(vec![("id", string_value(id))]);
        let read = self.read_resource(type_name, &initial_state).await;
        if has_errors(&read.diagnostics) {
            return ImportResponse {
                imported_resources: vec![],
                diagnostics: read.diagnostics,
            };
        }

        match read.new_state {
            Some(state) => ImportResponse {
                imported_resources: vec![ImportedResource {
                    type_name: type_name.to_string(),
                    state,
                }],
                diagnostics: vec![],
            },
            None => ImportResponse {
                imported_resources: vec![],
                diagnostics: vec![Diagnostic::error(
                    "Cannot import non-existent remote object",
                    format!("No {} with id {} exists", type_name, id),
                    None,
                )],
            },
        }
    }

    pub async fn read_data_source(&self, type_name: &str, config: &DynamicValue) -> DataSourceResponse {
        info!("ReadDataSource called for {}", type_name);

        let diagnostics = self.validate_data_source_config(type_name, config);
        if has_errors(&diagnostics) {
            return DataSourceResponse {
                state: None,
                diagnostics,
            };
        }

        let client = self.client().await;
        let result = match type_name {
            "oci_core_volume_backups" => VolumeBackupsDataSource::read(&client, config).await,
            _ => {
                return DataSourceResponse {
                    state: None,
                    diagnostics: vec![unknown_type("data source", type_name)],
                }
            }
        };

        match result {
            Ok(state) => DataSourceResponse {
                state: Some(state),
                diagnostics,
            },
            Err(e) => DataSourceResponse {
                state: None,
                diagnostics: vec![Diagnostic::error(
                    "Failed to read data source",
                    format!("{:#}", e),
                    None,
                )],
            },
        }
    }
}

impl ApplyResponse {
    fn failed(diagnostic: Diagnostic) -> Self {
        Self {
            new_state: DynamicValue::Null,
            diagnostics: vec![diagnostic],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockstore_common::{SimulatedBlockstorage, SimulatorConfig};

    fn provider() -> BlockstorageProvider {
        let sim = SimulatedBlockstorage::in_memory(SimulatorConfig::default()).unwrap();
        let config = ProviderConfig {
            poll_interval_ms: 1,
            ..Default::default()
        };
        BlockstorageProvider::new(Arc::new(sim), config)
    }

    #[tokio::test]
    async fn test_unknown_types_are_diagnostics() {
        let provider = provider();
        let resp = provider
            .apply_resource_change("oci_core_instance", None, Some(&make_state(vec![])))
            .await;
        assert!(has_errors(&resp.diagnostics));

        let read = provider.read_resource("oci_core_instance", &make_state(vec![])).await;
        assert_eq!(read.diagnostics[0].summary, "Unknown resource type");

        let ds = provider.read_data_source("oci_core_instances", &make_state(vec![])).await;
        assert!(ds.state.is_none());
        assert!(has_errors(&ds.diagnostics));
    }

    #[tokio::test]
    async fn test_configure_rejects_unknown_argument() {
        let provider = provider();
        let diags = provider
            .configure(&make_state(vec![("tenancy", string_value("x"))]))
            .await;
        assert!(has_errors(&diags));

        let diags = provider
            .configure(&make_state(vec![("region", string_value("eu-zurich-1"))]))
            .await;
        assert!(diags.is_empty());
        assert_eq!(provider.config().await.region, "eu-zurich-1");
        assert_eq!(provider.client().await.config().region, "eu-zurich-1");
    }

    #[test]
    fn test_plan_keeps_computed_attributes_and_flags_replace() {
        let provider = provider();
        let prior = make_state(vec![
            ("id", string_value("ocid1.volumebackup.oc1..a")),
            ("volume_id", string_value("v1")),
            ("display_name", string_value("displayName")),
            ("type", string_value("INCREMENTAL")),
            ("state", string_value("AVAILABLE")),
        ]);
        let proposed = make_state(vec![
            ("volume_id", string_value("v1")),
            ("display_name", string_value("displayName2")),
        ]);

        let plan = provider.plan_resource_change("oci_core_volume_backup", Some(&prior), Some(&proposed));
        assert!(plan.requires_replace.is_empty());
        assert_eq!(plan.changed_attributes, vec!["display_name"]);
        assert_eq!(plan.planned_state.get("state"), prior.get("state"));
        assert_eq!(plan.planned_state.get("type"), prior.get("type"));
        assert_eq!(
            plan.planned_state.get("display_name").and_then(|v| v.as_string()),
            Some("displayName2")
        );

        let moved = make_state(vec![("volume_id", string_value("v2"))]);
        let plan = provider.plan_resource_change("oci_core_volume_backup", Some(&prior), Some(&moved));
        assert_eq!(plan.requires_replace, vec!["volume_id"]);
        assert!(!plan.is_noop());

        let same = make_state(vec![("volume_id", string_value("v1"))]);
        let plan = provider.plan_resource_change("oci_core_volume_backup", Some(&prior), Some(&same));
        assert!(plan.is_noop());
    }

    #[test]
    fn test_schema_covers_supported_types() {
        let schemas = provider().schema();
        assert_eq!(
            schemas.resource_schemas.keys().copied().collect::<Vec<_>>(),
            vec!["oci_core_volume", "oci_core_volume_backup"]
        );
        assert!(schemas.provider.attribute("region").is_some());

        let backup = &schemas.resource_schemas["oci_core_volume_backup"];
        assert!(backup.attribute("volume_id").unwrap().required);
        assert!(backup.attribute("type").unwrap().force_new);
        assert!(backup.attribute("state").unwrap().computed);

        let listing = &schemas.data_source_schemas["oci_core_volume_backups"];
        assert!(listing.blocks.contains_key("filter"));
        assert!(listing.attribute("volume_backups").unwrap().computed);
    }
}
