//! Declarative test configurations
//!
//! A [`Config`] is the desired set of resources and data sources for one
//! step. Attribute values may reference variables and other blocks with
//! `${var.name}`, `${type.name.attr}` and `${data.type.name.attr}`; the
//! references are resolved against the current [`State`] just before a block
//! is planned, so a block may only reference blocks declared before it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use blockstore_provider::state::{string_value, DynamicValue};

use crate::error::{AccResult, AccTestError};
use crate::state::{address_of, Mode, State};

static REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid reference pattern"));

/// Prefix of environment variables that supply undeclared variables
pub const VAR_ENV_PREFIX: &str = "TF_VAR_";

/// A resource or data source block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub type_name: String,
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, DynamicValue>,
}

impl Block {
    /// Block from a JSON object; anything else yields an empty block
    pub fn new(type_name: &str, name: &str, attributes: serde_json::Value) -> Self {
        Self {
            type_name: type_name.to_string(),
            name: name.to_string(),
            attributes: object_map(attributes),
        }
    }
}

fn object_map(value: serde_json::Value) -> BTreeMap<String, DynamicValue> {
    match DynamicValue::from(value) {
        DynamicValue::Map(map) => map,
        _ => BTreeMap::new(),
    }
}

/// Desired configuration for one test step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Provider-level arguments such as `region`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<BTreeMap<String, DynamicValue>>,

    #[serde(default)]
    pub variables: BTreeMap<String, DynamicValue>,

    #[serde(default)]
    pub resources: Vec<Block>,

    #[serde(default)]
    pub data_sources: Vec<Block>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, arguments: serde_json::Value) -> Self {
        self.provider = Some(object_map(arguments));
        self
    }

    pub fn variable(mut self, name: &str, value: serde_json::Value) -> Self {
        self.variables.insert(name.to_string(), DynamicValue::from(value));
        self
    }

    pub fn resource(mut self, type_name: &str, name: &str, attributes: serde_json::Value) -> Self {
        self.resources.push(Block::new(type_name, name, attributes));
        self
    }

    pub fn data_source(mut self, type_name: &str, name: &str, attributes: serde_json::Value) -> Self {
        self.data_sources.push(Block::new(type_name, name, attributes));
        self
    }

    /// Compose two configurations.
    ///
    /// Variables and provider arguments from `other` win; a block address
    /// declared by both sides is an error.
    pub fn merge(mut self, other: Config) -> AccResult<Self> {
        let mut seen: BTreeSet<String> = self.addresses().into_iter().collect();
        for address in other.addresses() {
            if !seen.insert(address.clone()) {
                return Err(AccTestError::Config(format!("duplicate block {}", address)));
            }
        }

        if other.provider.is_some() {
            self.provider = other.provider;
        }
        self.variables.extend(other.variables);
        self.resources.extend(other.resources);
        self.data_sources.extend(other.data_sources);
        Ok(self)
    }

    /// Addresses of every block, resources first
    pub fn addresses(&self) -> Vec<String> {
        self.resources
            .iter()
            .map(|b| address_of(&b.type_name, &b.name, Mode::Managed))
            .chain(
                self.data_sources
                    .iter()
                    .map(|b| address_of(&b.type_name, &b.name, Mode::Data)),
            )
            .collect()
    }

    pub fn declares(&self, address: &str) -> bool {
        self.addresses().iter().any(|a| a == address)
    }

    pub fn from_yaml(yaml: &str) -> AccResult<Self> {
        serde_yaml::from_str(yaml).map_err(AccTestError::from)
    }

    pub fn from_file(path: &Path) -> AccResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }
}

/// Resolution context for references in attribute values
pub struct Scope<'a> {
    variables: &'a BTreeMap<String, DynamicValue>,
    state: &'a State,
}

impl<'a> Scope<'a> {
    pub fn new(variables: &'a BTreeMap<String, DynamicValue>, state: &'a State) -> Self {
        Self { variables, state }
    }

    /// Resolve every attribute of a block into a map value
    pub fn resolve_attributes(&self, attributes: &BTreeMap<String, DynamicValue>) -> AccResult<DynamicValue> {
        let mut resolved = BTreeMap::new();
        for (key, value) in attributes {
            resolved.insert(key.clone(), self.resolve(value)?);
        }
        Ok(DynamicValue::Map(resolved))
    }

    pub fn resolve(&self, value: &DynamicValue) -> AccResult<DynamicValue> {
        match value {
            DynamicValue::String(text) => self.interpolate(text),
            DynamicValue::List(items) => Ok(DynamicValue::List(
                items.iter().map(|v| self.resolve(v)).collect::<AccResult<_>>()?,
            )),
            DynamicValue::Map(map) => {
                let mut resolved = BTreeMap::new();
                for (key, item) in map {
                    let key = self.interpolate_text(key)?;
                    resolved.insert(key, self.resolve(item)?);
                }
                Ok(DynamicValue::Map(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    /// A string that is exactly one reference keeps the referenced type
    fn interpolate(&self, text: &str) -> AccResult<DynamicValue> {
        let mut captures = REFERENCE.captures_iter(text);
        if let (Some(only), None) = (captures.next(), captures.next()) {
            if only.get(0).map(|m| m.as_str()) == Some(text) {
                return self.lookup(&only[1]);
            }
        }
        self.interpolate_text(text).map(string_value)
    }

    fn interpolate_text(&self, text: &str) -> AccResult<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in REFERENCE.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let reference = &caps[1];
            let value = self.lookup(reference)?;
            let rendered = value.scalar_text().ok_or_else(|| AccTestError::Reference {
                reference: reference.to_string(),
                reason: "is not a primitive value and cannot be embedded in a string".into(),
            })?;
            out.push_str(&text[last..whole.start()]);
            out.push_str(&rendered);
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    fn lookup(&self, reference: &str) -> AccResult<DynamicValue> {
        let err = |reason: &str| AccTestError::Reference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = reference.trim().split('.').collect();
        match parts.as_slice() {
            ["var", name] => self
                .variables
                .get(*name)
                .cloned()
                .or_else(|| {
                    std::env::var(format!("{}{}", VAR_ENV_PREFIX, name))
                        .ok()
                        .map(string_value)
                })
                .ok_or_else(|| err("undeclared variable")),
            ["data", type_name, name, path @ ..] if !path.is_empty() => {
                self.attribute(&address_of(type_name, name, Mode::Data), path)
                    .map_err(|reason| err(&reason))
            }
            [type_name, name, path @ ..] if !path.is_empty() && *type_name != "var" => {
                self.attribute(&address_of(type_name, name, Mode::Managed), path)
                    .map_err(|reason| err(&reason))
            }
            _ => Err(err("malformed reference")),
        }
    }

    fn attribute(&self, address: &str, path: &[&str]) -> Result<DynamicValue, String> {
        let resource = self
            .state
            .get(address)
            .ok_or_else(|| format!("{} is not in state", address))?;

        let mut current = &resource.attributes;
        for segment in path {
            current = match current {
                DynamicValue::Map(map) => map.get(*segment),
                DynamicValue::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }
            .ok_or_else(|| format!("{} has no attribute {}", address, path.join(".")))?;
        }
        Ok(current.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceState;
    use blockstore_provider::state::make_state;
    use serde_json::json;

    fn state_with_volume() -> State {
        let mut state = State::new();
        state.upsert(ResourceState::new(
            "oci_core_volume",
            "test_volume",
            Mode::Managed,
            make_state(vec![
                ("id", string_value("ocid1.volume.oc1..v")),
                ("freeform_tags", DynamicValue::from(json!({"Department": "Finance"}))),
            ]),
        ));
        state
    }

    #[test]
    fn test_resolve_references() {
        let config = Config::new()
            .variable("ns", json!("example-ns"))
            .variable("tags", json!({"Department": "Finance"}));
        let state = state_with_volume();
        let scope = Scope::new(&config.variables, &state);

        let attrs = Block::new(
            "oci_core_volume_backup",
            "b",
            json!({
                "volume_id": "${oci_core_volume.test_volume.id}",
                "display_name": "backup-of-${oci_core_volume.test_volume.id}",
                "freeform_tags": "${var.tags}",
                "defined_tags": {"${var.ns}.CostCenter": "42"},
            }),
        )
        .attributes;

        let resolved = scope.resolve_attributes(&attrs).unwrap();
        assert_eq!(
            resolved.get("volume_id").and_then(|v| v.as_string()),
            Some("ocid1.volume.oc1..v")
        );
        assert_eq!(
            resolved.get("display_name").and_then(|v| v.as_string()),
            Some("backup-of-ocid1.volume.oc1..v")
        );
        assert_eq!(resolved.get("freeform_tags"), config.variables.get("tags"));
        assert!(resolved
            .get("defined_tags")
            .and_then(|t| t.get("example-ns.CostCenter"))
            .is_some());
    }

    #[test]
    fn test_unresolvable_references() {
        let variables = BTreeMap::new();
        let state = state_with_volume();
        let scope = Scope::new(&variables, &state);

        for bad in [
            "${var.never_declared_anywhere}",
            "${oci_core_volume.other.id}",
            "${oci_core_volume.test_volume.size_in_gbs}",
            "${data.oci_core_volume_backups.all.id}",
            "${nonsense}",
            "tags: ${oci_core_volume.test_volume.freeform_tags}",
        ] {
            let err = scope.resolve(&string_value(bad)).unwrap_err();
            assert!(matches!(err, AccTestError::Reference { .. }), "{}: {}", bad, err);
        }

        let nested = scope
            .resolve(&string_value("${oci_core_volume.test_volume.freeform_tags.Department}"))
            .unwrap();
        assert_eq!(nested.as_string(), Some("Finance"));
    }

    #[test]
    fn test_merge_rejects_duplicate_blocks() {
        let base = Config::new()
            .variable("display_name", json!("a"))
            .resource("oci_core_volume", "v", json!({}));
        let overlay = Config::new().variable("display_name", json!("b"));

        let merged = base.clone().merge(overlay).unwrap();
        assert_eq!(merged.variables["display_name"].as_string(), Some("b"));
        assert!(merged.declares("oci_core_volume.v"));

        let dup = Config::new().resource("oci_core_volume", "v", json!({}));
        assert!(base.merge(dup).is_err());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
variables:
  size: 50
resources:
  - type: oci_core_volume
    name: test_volume
    attributes:
      compartment_id: ${var.compartment_id}
      size_in_gbs: ${var.size}
data_sources:
  - type: oci_core_volume_backups
    name: all
    attributes:
      compartment_id: ${var.compartment_id}
      filter:
        - name: id
          values: ["${oci_core_volume_backup.b.id}"]
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.resources.len(), 1);
        assert_eq!(config.variables["size"].as_i64(), Some(50));
        assert_eq!(
            config.addresses(),
            vec!["oci_core_volume.test_volume", "data.oci_core_volume_backups.all"]
        );
    }
}
