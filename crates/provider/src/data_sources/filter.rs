//! Client-side `filter` blocks for collection data sources
//!
//! Every filter must match an item for it to be kept. Within one filter, the
//! item's attribute must equal (or, with `regex = true`, match) any of the
//! listed values.

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;

use crate::state::{get_string_attr, DynamicValue};

/// A parsed filter block
#[derive(Debug, Clone)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
    matchers: Option<Vec<Regex>>,
}

impl Filter {
    pub fn new(name: impl Into<String>, values: Vec<String>, regex: bool) -> Result<Self> {
        let name = name.into();
        let matchers = if regex {
            let compiled = values
                .iter()
                .map(|v| {
                    Regex::new(v).with_context(|| format!("invalid regex in filter {}: {}", name, v))
                })
                .collect::<Result<Vec<_>>>()?;
            Some(compiled)
        } else {
            None
        };
        Ok(Self { name, values, matchers })
    }

    /// Parse the `filter` attribute of a data source config
    pub fn from_config(config: &DynamicValue) -> Result<Vec<Self>> {
        let Some(blocks) = config.get("filter").and_then(|f| f.as_list()) else {
            return Ok(Vec::new());
        };

        blocks
            .iter()
            .map(|block| {
                let values = block
                    .get("values")
                    .and_then(|v| v.as_list())
                    .unwrap_or_default()
                    .iter()
                    .filter_map(|v| v.scalar_text())
                    .collect();
                let regex = block.get("regex").and_then(|r| r.as_bool()).unwrap_or(false);
                Filter::new(get_string_attr(block, "name"), values, regex)
            })
            .collect()
    }

    fn matches_text(&self, text: &str) -> bool {
        match &self.matchers {
            Some(regexes) => regexes.iter().any(|r| r.is_match(text)),
            None => self.values.iter().any(|v| v == text),
        }
    }

    /// Whether the flattened item satisfies this filter.
    ///
    /// A list or map attribute matches when any of its elements does.
    pub fn matches(&self, flat: &BTreeMap<String, String>) -> bool {
        if let Some(text) = flat.get(&self.name) {
            return self.matches_text(text);
        }

        let prefix = format!("{}.", self.name);
        flat.iter()
            .filter(|(key, _)| {
                key.strip_prefix(&prefix)
                    .map(|rest| !rest.contains('.') && rest != "#" && rest != "%")
                    .unwrap_or(false)
            })
            .any(|(_, text)| self.matches_text(text))
    }
}

/// Keep the items matching every filter
pub fn apply_filters(filters: &[Filter], items: Vec<DynamicValue>) -> Vec<DynamicValue> {
    if filters.is_empty() {
        return items;
    }

    items
        .into_iter()
        .filter(|item| {
            let flat = item.flatten();
            filters.iter().all(|f| f.matches(&flat))
        })
        .collect()
}
