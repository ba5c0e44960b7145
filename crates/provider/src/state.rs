//! Resource State Values
//!
//! Dynamic attribute values exchanged between the engine and the provider,
//! plus the flat `key.%` / `key.#` attribute view used by state checks.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dynamic value that can be encoded/decoded from resource state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DynamicValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<DynamicValue>),
    Map(BTreeMap<String, DynamicValue>),
}

impl DynamicValue {
    pub fn as_string(&self) -> Option<&str> {
        match self {
            DynamicValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DynamicValue::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DynamicValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[DynamicValue]> {
        match self {
            DynamicValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, DynamicValue>> {
        match self {
            DynamicValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DynamicValue::Null)
    }

    pub fn get(&self, key: &str) -> Option<&DynamicValue> {
        self.as_map()?.get(key)
    }

    /// Set an attribute on a map value; no-op for other variants
    pub fn set(&mut self, key: &str, value: DynamicValue) {
        if let DynamicValue::Map(m) = self {
            m.insert(key.to_string(), value);
        }
    }

    /// Render a scalar the way it appears in flattened state
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            DynamicValue::Bool(b) => Some(b.to_string()),
            DynamicValue::Number(n) => Some(n.to_string()),
            DynamicValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Flatten a map value into `attr`, `attr.%`, `attr.#`, `attr.0.sub` keys.
    ///
    /// Null attributes are omitted.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        if let Some(map) = self.as_map() {
            for (key, value) in map {
                flatten_into(key, value, &mut out);
            }
        }
        out
    }
}

fn flatten_into(prefix: &str, value: &DynamicValue, out: &mut BTreeMap<String, String>) {
    match value {
        DynamicValue::Null => {}
        DynamicValue::List(items) => {
            out.insert(format!("{}.#", prefix), items.len().to_string());
            for (i, item) in items.iter().enumerate() {
                flatten_into(&format!("{}.{}", prefix, i), item, out);
            }
        }
        DynamicValue::Map(map) => {
            out.insert(format!("{}.%", prefix), map.len().to_string());
            for (key, item) in map {
                flatten_into(&format!("{}.{}", prefix, key), item, out);
            }
        }
        scalar => {
            if let Some(text) = scalar.scalar_text() {
                out.insert(prefix.to_string(), text);
            }
        }
    }
}

impl Default for DynamicValue {
    fn default() -> Self {
        DynamicValue::Null
    }
}

impl From<serde_json::Value> for DynamicValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => DynamicValue::Null,
            serde_json::Value::Bool(b) => DynamicValue::Bool(b),
            serde_json::Value::Number(n) => DynamicValue::Number(n),
            serde_json::Value::String(s) => DynamicValue::String(s),
            serde_json::Value::Array(items) => {
                DynamicValue::List(items.into_iter().map(DynamicValue::from).collect())
            }
            serde_json::Value::Object(map) => DynamicValue::Map(
                map.into_iter().map(|(k, v)| (k, DynamicValue::from(v))).collect(),
            ),
        }
    }
}

/// Decode a DynamicValue from JSON bytes
pub fn decode_dynamic_value(data: &[u8]) -> Result<DynamicValue> {
    if data.is_empty() {
        return Ok(DynamicValue::Null);
    }

    let value: DynamicValue = serde_json::from_slice(data)?;
    Ok(value)
}

/// Encode a value to JSON bytes
pub fn encode_dynamic_value(value: &DynamicValue) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec(value)?;
    Ok(bytes)
}

/// Helper to extract a string attribute from a DynamicValue
pub fn get_string_attr(value: &DynamicValue, key: &str) -> String {
    value.get(key)
        .and_then(|v| v.as_string())
        .unwrap_or("")
        .to_string()
}

/// Helper to extract an optional string attribute from a DynamicValue
pub fn get_optional_string_attr(value: &DynamicValue, key: &str) -> Option<String> {
    value.get(key)
        .and_then(|v| match v {
            DynamicValue::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })
}

/// Helper to extract an optional integer attribute from a DynamicValue
pub fn get_optional_int_attr(value: &DynamicValue, key: &str) -> Option<i64> {
    value.get(key).and_then(|v| v.as_i64())
}

/// Helper to extract a string-to-string map attribute.
///
/// Returns `None` when the attribute is absent or null.
pub fn get_string_map_attr(value: &DynamicValue, key: &str) -> Option<BTreeMap<String, String>> {
    let map = value.get(key)?.as_map()?;
    Some(
        map.iter()
            .filter_map(|(k, v)| v.scalar_text().map(|text| (k.clone(), text)))
            .collect(),
    )
}

/// Create a DynamicValue map with the given attributes
pub fn make_state(attrs: Vec<(&str, DynamicValue)>) -> DynamicValue {
    let mut map = BTreeMap::new();
    for (key, value) in attrs {
        map.insert(key.to_string(), value);
    }
    DynamicValue::Map(map)
}

/// Create a string DynamicValue
pub fn string_value(s: impl Into<String>) -> DynamicValue {
    DynamicValue::String(s.into())
}

/// Create a string DynamicValue, or null when absent
pub fn optional_string_value(s: Option<impl Into<String>>) -> DynamicValue {
    s.map(|s| DynamicValue::String(s.into()))
        .unwrap_or(DynamicValue::Null)
}

/// Create a number DynamicValue from i64
pub fn int_value(n: i64) -> DynamicValue {
    DynamicValue::Number(serde_json::Number::from(n))
}

/// Create a number DynamicValue, or null when absent
pub fn optional_int_value(n: Option<i64>) -> DynamicValue {
    n.map(int_value).unwrap_or(DynamicValue::Null)
}

/// Create a map DynamicValue of strings
pub fn string_map_value<'a>(map: impl IntoIterator<Item = (&'a String, &'a String)>) -> DynamicValue {
    DynamicValue::Map(
        map.into_iter()
            .map(|(k, v)| (k.clone(), string_value(v)))
            .collect(),
    )
}

/// Create a bool DynamicValue
pub fn bool_value(b: bool) -> DynamicValue {
    DynamicValue::Bool(b)
}

/// Create a null DynamicValue
pub fn null_value() -> DynamicValue {
    DynamicValue::Null
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_counts_maps_and_lists() {
        let mut tags = BTreeMap::new();
        tags.insert("Department".to_string(), "Finance".to_string());

        let state = make_state(vec![
            ("id", string_value("ocid1.volumebackup.oc1..a")),
            ("freeform_tags", string_map_value(&tags)),
            ("size_in_gbs", int_value(50)),
            ("expiration_time", null_value()),
            (
                "volume_backups",
                DynamicValue::List(vec![make_state(vec![("type", string_value("FULL"))])]),
            ),
        ]);

        let flat = state.flatten();
        assert_eq!(flat["id"], "ocid1.volumebackup.oc1..a");
        assert_eq!(flat["freeform_tags.%"], "1");
        assert_eq!(flat["freeform_tags.Department"], "Finance");
        assert_eq!(flat["size_in_gbs"], "50");
        assert_eq!(flat["volume_backups.#"], "1");
        assert_eq!(flat["volume_backups.0.type"], "FULL");
        assert!(!flat.contains_key("expiration_time"));
    }

    #[test]
    fn test_encode_decode() {
        let state = make_state(vec![
            ("display_name", string_value("displayName")),
            ("ready", bool_value(true)),
        ]);
        let bytes = encode_dynamic_value(&state).unwrap();
        assert_eq!(decode_dynamic_value(&bytes).unwrap(), state);
        assert_eq!(decode_dynamic_value(&[]).unwrap(), DynamicValue::Null);
        assert!(decode_dynamic_value(b"{not json").is_err());
    }

    #[test]
    fn test_string_map_attr() {
        let value = DynamicValue::from(serde_json::json!({
            "freeform_tags": {"Department": "Accounting"},
            "display_name": "x"
        }));
        let tags = get_string_map_attr(&value, "freeform_tags").unwrap();
        assert_eq!(tags.get("Department").map(String::as_str), Some("Accounting"));
        assert!(get_string_map_attr(&value, "defined_tags").is_none());
        assert!(get_optional_string_attr(&value, "missing").is_none());
    }
}
