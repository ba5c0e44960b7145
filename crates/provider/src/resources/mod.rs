//! Resource Implementations
//!
//! Implements the CRUD operations for each resource type.

pub mod volume;
pub mod volume_backup;

use anyhow::{bail, Result};
use blockstore_common::types::{DefinedTags, FreeformTags};
use std::collections::BTreeMap;

use crate::client::BlockstorageClient;
use crate::state::{get_string_map_attr, string_value, DynamicValue};

/// Trait for resource operations
#[async_trait::async_trait]
pub trait Resource {
    /// Resource type name
    fn type_name() -> &'static str;

    /// Create a new resource and wait for it to become usable
    async fn create(client: &BlockstorageClient, config: &DynamicValue) -> Result<DynamicValue>;

    /// Read an existing resource; `None` when it no longer exists
    async fn read(client: &BlockstorageClient, state: &DynamicValue) -> Result<Option<DynamicValue>>;

    /// Update mutable attributes in place
    async fn update(client: &BlockstorageClient, state: &DynamicValue, config: &DynamicValue) -> Result<DynamicValue>;

    /// Delete a resource and wait until it is gone
    async fn delete(client: &BlockstorageClient, state: &DynamicValue) -> Result<()>;
}

/// Free-form tags from a config attribute
pub(crate) fn freeform_tags_attr(config: &DynamicValue) -> Option<FreeformTags> {
    get_string_map_attr(config, "freeform_tags")
}

/// Defined tags from their flat `"<namespace>.<key>" = value` form
pub(crate) fn defined_tags_attr(config: &DynamicValue) -> Result<Option<DefinedTags>> {
    let Some(flat) = get_string_map_attr(config, "defined_tags") else {
        return Ok(None);
    };

    let mut tags = DefinedTags::new();
    for (qualified, value) in flat {
        let Some((namespace, key)) = qualified.split_once('.') else {
            bail!(
                "defined tag \"{}\" must be of the form <namespace>.<key>",
                qualified
            );
        };
        if namespace.is_empty() || key.is_empty() {
            bail!("defined tag \"{}\" has an empty namespace or key", qualified);
        }
        tags.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }
    Ok(Some(tags))
}

/// Flatten defined tags back to `"<namespace>.<key>" = value`
pub(crate) fn defined_tags_value(tags: &DefinedTags) -> DynamicValue {
    let mut flat = BTreeMap::new();
    for (namespace, keys) in tags {
        for (key, value) in keys {
            flat.insert(format!("{}.{}", namespace, key), string_value(value));
        }
    }
    DynamicValue::Map(flat)
}
