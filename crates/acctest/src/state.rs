//! Recorded state of the resources a test case has applied

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use blockstore_provider::state::{get_string_attr, DynamicValue};

use crate::error::{AccResult, AccTestError};

/// Managed resource or data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Managed,
    Data,
}

/// One resource instance in state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    pub type_name: String,
    pub name: String,
    pub mode: Mode,
    /// Remote ID, also present as the `id` attribute
    pub id: String,
    pub attributes: DynamicValue,
}

impl ResourceState {
    pub fn new(type_name: &str, name: &str, mode: Mode, attributes: DynamicValue) -> Self {
        Self {
            type_name: type_name.to_string(),
            name: name.to_string(),
            mode,
            id: get_string_attr(&attributes, "id"),
            attributes,
        }
    }

    pub fn address(&self) -> String {
        address_of(&self.type_name, &self.name, self.mode)
    }

    /// Flattened attributes, `key.%` and `key.#` included
    pub fn primary_attributes(&self) -> BTreeMap<String, String> {
        self.attributes.flatten()
    }
}

pub fn address_of(type_name: &str, name: &str, mode: Mode) -> String {
    match mode {
        Mode::Managed => format!("{}.{}", type_name, name),
        Mode::Data => format!("data.{}.{}", type_name, name),
    }
}

/// Resources in the order they were first created
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct State {
    resources: Vec<ResourceState>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, address: &str) -> Option<&ResourceState> {
        self.resources.iter().find(|r| r.address() == address)
    }

    /// Insert or replace in place, keeping the original position
    pub fn upsert(&mut self, resource: ResourceState) {
        let address = resource.address();
        match self.resources.iter_mut().find(|r| r.address() == address) {
            Some(existing) => *existing = resource,
            None => self.resources.push(resource),
        }
    }

    pub fn remove(&mut self, address: &str) -> Option<ResourceState> {
        let index = self.resources.iter().position(|r| r.address() == address)?;
        Some(self.resources.remove(index))
    }

    pub fn resources(&self) -> impl DoubleEndedIterator<Item = &ResourceState> {
        self.resources.iter()
    }

    /// Managed resources of one type
    pub fn of_type<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a ResourceState> {
        self.resources
            .iter()
            .filter(move |r| r.mode == Mode::Managed && r.type_name == type_name)
    }

    pub fn addresses(&self) -> Vec<String> {
        self.resources.iter().map(ResourceState::address).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }
}

/// Read one flattened attribute of a resource in state
pub fn from_instance_state(state: &State, address: &str, key: &str) -> AccResult<String> {
    let resource = state
        .get(address)
        .ok_or_else(|| AccTestError::CheckFailed(format!("Not found: {} in state", address)))?;

    resource
        .primary_attributes()
        .remove(key)
        .ok_or_else(|| {
            AccTestError::CheckFailed(format!(
                "Attribute '{}' not found for {} in state",
                key, address
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockstore_provider::state::{make_state, string_value};

    fn backup(name: &str, id: &str) -> ResourceState {
        ResourceState::new(
            "oci_core_volume_backup",
            name,
            Mode::Managed,
            make_state(vec![("id", string_value(id)), ("type", string_value("FULL"))]),
        )
    }

    #[test]
    fn test_upsert_keeps_creation_order() {
        let mut state = State::new();
        state.upsert(backup("a", "1"));
        state.upsert(backup("b", "2"));
        state.upsert(backup("a", "3"));

        assert_eq!(
            state.addresses(),
            vec!["oci_core_volume_backup.a", "oci_core_volume_backup.b"]
        );
        assert_eq!(state.get("oci_core_volume_backup.a").map(|r| r.id.as_str()), Some("3"));
    }

    #[test]
    fn test_data_sources_are_addressed_separately() {
        let mut state = State::new();
        state.upsert(ResourceState::new(
            "oci_core_volume_backups",
            "all",
            Mode::Data,
            make_state(vec![("id", string_value("x"))]),
        ));
        assert!(state.get("data.oci_core_volume_backups.all").is_some());
        assert_eq!(state.of_type("oci_core_volume_backups").count(), 0);
    }

    #[test]
    fn test_from_instance_state() {
        let mut state = State::new();
        state.upsert(backup("a", "ocid1.volumebackup.oc1..a"));

        assert_eq!(
            from_instance_state(&state, "oci_core_volume_backup.a", "id").unwrap(),
            "ocid1.volumebackup.oc1..a"
        );
        assert!(from_instance_state(&state, "oci_core_volume_backup.a", "display_name").is_err());
        assert!(from_instance_state(&state, "oci_core_volume_backup.b", "id").is_err());
    }
}
