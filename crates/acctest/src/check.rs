//! State checks run after each applied step
//!
//! Checks receive the recorded [`State`] together with a [`CheckContext`]
//! carrying the provider's client, so checks that query the service get it
//! passed in explicitly.

use std::sync::Arc;

use async_trait::async_trait;
use blockstore_provider::BlockstorageClient;

use crate::error::{AccResult, AccTestError};
use crate::state::State;

/// Context handed to every check
#[derive(Clone)]
pub struct CheckContext {
    pub client: BlockstorageClient,
}

#[async_trait]
pub trait Check: Send + Sync {
    async fn check(&self, ctx: &CheckContext, state: &State) -> AccResult<()>;
}

pub type CheckFn = Arc<dyn Check>;

/// Check over state alone
struct StateCheck<F>(F);

#[async_trait]
impl<F> Check for StateCheck<F>
where
    F: Fn(&State) -> AccResult<()> + Send + Sync,
{
    async fn check(&self, _ctx: &CheckContext, state: &State) -> AccResult<()> {
        (self.0)(state)
    }
}

/// Wrap a synchronous state check
pub fn state_check<F>(f: F) -> CheckFn
where
    F: Fn(&State) -> AccResult<()> + Send + Sync + 'static,
{
    Arc::new(StateCheck(f))
}

pub(crate) fn attributes_of(state: &State, address: &str) -> AccResult<std::collections::BTreeMap<String, String>> {
    state
        .get(address)
        .map(|r| r.primary_attributes())
        .ok_or_else(|| AccTestError::CheckFailed(format!("Not found: {} in state", address)))
}

/// The flattened attribute `key` of `address` equals `value`
pub fn check_resource_attr(address: &str, key: &str, value: &str) -> CheckFn {
    let (address, key, value) = (address.to_string(), key.to_string(), value.to_string());
    state_check(move |state| {
        let attrs = attributes_of(state, &address)?;
        match attrs.get(&key) {
            Some(actual) if *actual == value => Ok(()),
            // an empty map or list has no count entry
            None if value == "0" && (key.ends_with(".%") || key.ends_with(".#")) => Ok(()),
            Some(actual) => Err(AccTestError::CheckFailed(format!(
                "{}: Attribute '{}' expected {:?}, got {:?}",
                address, key, value, actual
            ))),
            None => Err(AccTestError::CheckFailed(format!(
                "{}: Attribute '{}' expected {:?}, not set",
                address, key, value
            ))),
        }
    })
}

/// The flattened attribute `key` of `address` is set to a non-empty value
pub fn check_resource_attr_set(address: &str, key: &str) -> CheckFn {
    let (address, key) = (address.to_string(), key.to_string());
    state_check(move |state| {
        let attrs = attributes_of(state, &address)?;
        match attrs.get(&key) {
            Some(value) if !value.is_empty() => Ok(()),
            _ => Err(AccTestError::CheckFailed(format!(
                "{}: Attribute '{}' expected to be set",
                address, key
            ))),
        }
    })
}

/// The flattened attribute `key` of `address` is absent
pub fn check_no_resource_attr(address: &str, key: &str) -> CheckFn {
    let (address, key) = (address.to_string(), key.to_string());
    state_check(move |state| {
        let attrs = attributes_of(state, &address)?;
        match attrs.get(&key) {
            None => Ok(()),
            Some(value) => Err(AccTestError::CheckFailed(format!(
                "{}: Attribute '{}' found when not expected: {:?}",
                address, key, value
            ))),
        }
    })
}

struct Compose {
    checks: Vec<CheckFn>,
    aggregate: bool,
}

#[async_trait]
impl Check for Compose {
    async fn check(&self, ctx: &CheckContext, state: &State) -> AccResult<()> {
        let mut failures = Vec::new();
        for (i, check) in self.checks.iter().enumerate() {
            if let Err(e) = check.check(ctx, state).await {
                if !self.aggregate {
                    return Err(AccTestError::CheckFailed(format!("Check {}/{} error: {}", i + 1, self.checks.len(), e)));
                }
                failures.push(format!("Check {}/{} error: {}", i + 1, self.checks.len(), e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AccTestError::CheckFailed(failures.join("\n")))
        }
    }
}

/// Run checks in order, stopping at the first failure
pub fn compose(checks: Vec<CheckFn>) -> CheckFn {
    Arc::new(Compose { checks, aggregate: false })
}

/// Run every check and report all failures together
pub fn compose_aggregate(checks: Vec<CheckFn>) -> CheckFn {
    Arc::new(Compose { checks, aggregate: true })
}
