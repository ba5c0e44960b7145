//! Resource and data source schemas
//!
//! Schemas drive config validation and decide which attribute changes force
//! a replacement instead of an in-place update.

use std::collections::BTreeMap;

use crate::provider::Diagnostic;
use crate::state::DynamicValue;

/// Attribute value type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Number,
    Bool,
    StringMap,
    /// List of nested blocks described by the schema's `blocks`
    BlockList,
    /// List of nested objects, computed only
    ObjectList,
    StringList,
}

/// A single schema attribute
#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: &'static str,
    pub ty: AttributeType,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    /// Changing this attribute replaces the resource
    pub force_new: bool,
    /// Closed set of accepted string values
    pub allowed_values: &'static [&'static str],
}

impl Attribute {
    fn new(name: &'static str, ty: AttributeType) -> Self {
        Self {
            name,
            ty,
            required: false,
            optional: false,
            computed: false,
            force_new: false,
            allowed_values: &[],
        }
    }

    fn required(name: &'static str, ty: AttributeType) -> Self {
        Self { required: true, ..Self::new(name, ty) }
    }

    fn optional(name: &'static str, ty: AttributeType) -> Self {
        Self { optional: true, ..Self::new(name, ty) }
    }

    fn computed(name: &'static str, ty: AttributeType) -> Self {
        Self { computed: true, ..Self::new(name, ty) }
    }

    fn optional_computed(name: &'static str, ty: AttributeType) -> Self {
        Self { optional: true, computed: true, ..Self::new(name, ty) }
    }

    fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    fn one_of(mut self, values: &'static [&'static str]) -> Self {
        self.allowed_values = values;
        self
    }

    fn type_matches(&self, value: &DynamicValue) -> bool {
        match (self.ty, value) {
            (_, DynamicValue::Null) => true,
            (AttributeType::String, DynamicValue::String(_)) => true,
            (AttributeType::Number, DynamicValue::Number(_)) => true,
            (AttributeType::Bool, DynamicValue::Bool(_)) => true,
            (AttributeType::StringMap, DynamicValue::Map(m)) => {
                m.values().all(|v| v.scalar_text().is_some())
            }
            (AttributeType::StringList, DynamicValue::List(items)) => {
                items.iter().all(|v| v.scalar_text().is_some())
            }
            (AttributeType::BlockList | AttributeType::ObjectList, DynamicValue::List(items)) => {
                items.iter().all(|v| v.as_map().is_some())
            }
            _ => false,
        }
    }
}

/// Schema of a resource, data source or nested block
#[derive(Debug, Clone)]
pub struct Schema {
    pub version: i64,
    pub attributes: Vec<Attribute>,
    /// Nested block schemas keyed by attribute name
    pub blocks: BTreeMap<&'static str, Schema>,
}

impl Schema {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Validate a configuration object against this schema
    pub fn validate(&self, config: &DynamicValue) -> Vec<Diagnostic> {
        self.validate_at(config, "")
    }

    fn validate_at(&self, config: &DynamicValue, path: &str) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let Some(map) = config.as_map() else {
            diagnostics.push(Diagnostic::error(
                "Invalid configuration",
                "configuration must be an object",
                none_if_empty(path),
            ));
            return diagnostics;
        };

        for attr in &self.attributes {
            let value = map.get(attr.name).unwrap_or(&DynamicValue::Null);
            let attr_path = join_path(path, attr.name);

            if attr.required && value.is_null() {
                diagnostics.push(Diagnostic::error(
                    "Missing required argument",
                    format!("The argument \"{}\" is required", attr.name),
                    Some(attr_path.clone()),
                ));
                continue;
            }
            if value.is_null() {
                continue;
            }
            if !attr.type_matches(value) {
                diagnostics.push(Diagnostic::error(
                    "Incorrect attribute value type",
                    format!("Attribute \"{}\" expects {:?}", attr.name, attr.ty),
                    Some(attr_path.clone()),
                ));
                continue;
            }
            if !attr.allowed_values.is_empty() {
                if let Some(text) = value.as_string() {
                    if !attr.allowed_values.contains(&text) {
                        diagnostics.push(Diagnostic::error(
                            "Invalid attribute value",
                            format!(
                                "\"{}\" must be one of {}, got \"{}\"",
                                attr.name,
                                attr.allowed_values.join(", "),
                                text
                            ),
                            Some(attr_path.clone()),
                        ));
                    }
                }
            }
            if attr.ty == AttributeType::BlockList {
                if let (Some(block), Some(items)) = (self.blocks.get(attr.name), value.as_list()) {
                    for (i, item) in items.iter().enumerate() {
                        let item_path = format!("{}.{}", attr_path, i);
                        diagnostics.extend(block.validate_at(item, &item_path));
                    }
                }
            }
        }

        for key in map.keys() {
            let Some(attr) = self.attribute(key) else {
                diagnostics.push(Diagnostic::error(
                    "Unsupported argument",
                    format!("An argument named \"{}\" is not expected here", key),
                    Some(join_path(path, key)),
                ));
                continue;
            };
            if attr.computed && !attr.optional && !attr.required && key != "id" {
                if let Some(value) = map.get(key) {
                    if !value.is_null() {
                        diagnostics.push(Diagnostic::error(
                            "Value for unconfigurable attribute",
                            format!("Can't configure a value for \"{}\": its value will be decided automatically", key),
                            Some(join_path(path, key)),
                        ));
                    }
                }
            }
        }

        diagnostics
    }

    /// Configurable attributes whose planned value differs from prior state
    /// and which cannot be updated in place
    pub fn requires_replace(&self, prior: &DynamicValue, planned: &DynamicValue) -> Vec<String> {
        self.attributes
            .iter()
            .filter(|a| a.force_new)
            .filter(|a| {
                let before = prior.get(a.name).unwrap_or(&DynamicValue::Null);
                let after = planned.get(a.name).unwrap_or(&DynamicValue::Null);
                // optional+computed attributes left unset keep the service default
                !(a.computed && after.is_null()) && before != after
            })
            .map(|a| a.name.to_string())
            .collect()
    }

    /// Configurable attributes whose planned value differs from prior state
    pub fn changed_attributes(&self, prior: &DynamicValue, planned: &DynamicValue) -> Vec<String> {
        self.attributes
            .iter()
            .filter(|a| a.required || a.optional)
            .filter(|a| {
                let before = prior.get(a.name).unwrap_or(&DynamicValue::Null);
                let after = planned.get(a.name).unwrap_or(&DynamicValue::Null);
                !(a.computed && after.is_null()) && before != after
            })
            .map(|a| a.name.to_string())
            .collect()
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}

fn none_if_empty(path: &str) -> Option<String> {
    (!path.is_empty()).then(|| path.to_string())
}

/// Provider-level configuration schema
pub fn provider_schema() -> Schema {
    Schema {
        version: 0,
        attributes: vec![
            Attribute::optional("region", AttributeType::String),
            Attribute::optional("compartment_id", AttributeType::String),
        ],
        blocks: BTreeMap::new(),
    }
}

/// Schema for `oci_core_volume`
pub fn volume_schema() -> Schema {
    use AttributeType::*;
    Schema {
        version: 0,
        attributes: vec![
            Attribute::computed("id", String),
            Attribute::required("availability_domain", String).force_new(),
            Attribute::required("compartment_id", String),
            Attribute::optional_computed("display_name", String),
            Attribute::optional_computed("size_in_gbs", Number).force_new(),
            Attribute::optional_computed("freeform_tags", StringMap),
            Attribute::optional_computed("defined_tags", StringMap),
            Attribute::computed("state", String),
            Attribute::computed("time_created", String),
        ],
        blocks: BTreeMap::new(),
    }
}

const BACKUP_TYPES: &[&str] = &["FULL", "INCREMENTAL"];
const BACKUP_STATES: &[&str] = &[
    "CREATING",
    "AVAILABLE",
    "TERMINATING",
    "TERMINATED",
    "FAULTY",
    "REQUEST_RECEIVED",
];

fn volume_backup_attributes() -> Vec<Attribute> {
    use AttributeType::*;
    vec![
        Attribute::computed("id", String),
        Attribute::required("volume_id", String).force_new(),
        Attribute::optional_computed("display_name", String),
        Attribute::optional_computed("freeform_tags", StringMap),
        Attribute::optional_computed("defined_tags", StringMap),
        Attribute::optional_computed("type", String)
            .force_new()
            .one_of(BACKUP_TYPES),
        Attribute::computed("compartment_id", String),
        Attribute::computed("state", String),
        Attribute::computed("time_created", String),
        Attribute::computed("time_request_received", String),
        Attribute::computed("expiration_time", String),
        Attribute::computed("size_in_gbs", Number),
        Attribute::computed("unique_size_in_gbs", Number),
        Attribute::computed("source_type", String),
    ]
}

/// Schema for `oci_core_volume_backup`
pub fn volume_backup_schema() -> Schema {
    Schema {
        version: 0,
        attributes: volume_backup_attributes(),
        blocks: BTreeMap::new(),
    }
}

/// Schema of a `filter` block
pub fn filter_schema() -> Schema {
    use AttributeType::*;
    Schema {
        version: 0,
        attributes: vec![
            Attribute::required("name", String),
            Attribute::required("values", StringList),
            Attribute::optional("regex", Bool),
        ],
        blocks: BTreeMap::new(),
    }
}

/// Schema for data source `oci_core_volume_backups`
pub fn volume_backups_data_source_schema() -> Schema {
    use AttributeType::*;
    let mut blocks = BTreeMap::new();
    blocks.insert("filter", filter_schema());

    Schema {
        version: 0,
        attributes: vec![
            Attribute::computed("id", String),
            Attribute::required("compartment_id", String),
            Attribute::optional("display_name", String),
            Attribute::optional("state", String).one_of(BACKUP_STATES),
            Attribute::optional("volume_id", String),
            Attribute::optional("filter", BlockList),
            Attribute::computed("volume_backups", ObjectList),
        ],
        blocks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{make_state, string_value, DynamicValue};

    #[test]
    fn test_required_and_unknown_attributes() {
        let schema = volume_backup_schema();
        let config = make_state(vec![("display_name", string_value("x")), ("bogus", string_value("y"))]);
        let diags = schema.validate(&config);
        let summaries: Vec<_> = diags.iter().map(|d| d.summary.as_str()).collect();
        assert!(summaries.contains(&"Missing required argument"));
        assert!(summaries.contains(&"Unsupported argument"));
    }

    #[test]
    fn test_backup_type_is_closed_set() {
        let schema = volume_backup_schema();
        let config = make_state(vec![
            ("volume_id", string_value("ocid1.volume.oc1..v")),
            ("type", string_value("DIFFERENTIAL")),
        ]);
        let diags = schema.validate(&config);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].attribute.as_deref(), Some("type"));
    }

    #[test]
    fn test_computed_attribute_is_not_configurable() {
        let schema = volume_backup_schema();
        let config = make_state(vec![
            ("volume_id", string_value("v")),
            ("state", string_value("AVAILABLE")),
        ]);
        assert_eq!(schema.validate(&config).len(), 1);
    }

    #[test]
    fn test_filter_blocks_are_validated() {
        let schema = volume_backups_data_source_schema();
        let config = DynamicValue::from(serde_json::json!({
            "compartment_id": "c",
            "filter": [{"name": "id"}]
        }));
        let diags = schema.validate(&config);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].attribute.as_deref(), Some("filter.0.values"));
    }

    #[test]
    fn test_requires_replace_only_for_force_new_changes() {
        let schema = volume_backup_schema();
        let prior = make_state(vec![
            ("volume_id", string_value("v1")),
            ("display_name", string_value("a")),
            ("type", string_value("INCREMENTAL")),
        ]);

        let renamed = make_state(vec![
            ("volume_id", string_value("v1")),
            ("display_name", string_value("b")),
        ]);
        assert!(schema.requires_replace(&prior, &renamed).is_empty());
        assert_eq!(schema.changed_attributes(&prior, &renamed), vec!["display_name"]);

        let retyped = make_state(vec![
            ("volume_id", string_value("v2")),
            ("type", string_value("FULL")),
        ]);
        assert_eq!(schema.requires_replace(&prior, &retyped), vec!["volume_id", "type"]);
    }
}
