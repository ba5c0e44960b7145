//! Test cases, built in Rust or parsed from YAML

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use blockstore_provider::state::DynamicValue;

use crate::check::{
    check_no_resource_attr, check_resource_attr, check_resource_attr_set, compose_aggregate,
    CheckFn,
};
use crate::config::Config;
use crate::error::{AccResult, AccTestError};
use crate::lifecycle::{check_projection, destroy_check, IdTracker};

/// Runs before any step; an error fails the case
pub type PreCheckFn = Arc<dyn Fn() -> AccResult<()> + Send + Sync>;

/// Pre-check requiring environment variables to be set
pub fn require_env(vars: &[&str]) -> PreCheckFn {
    let vars: Vec<String> = vars.iter().map(|v| v.to_string()).collect();
    Arc::new(move || {
        let missing: Vec<&str> = vars
            .iter()
            .filter(|v| std::env::var(v.as_str()).map(|s| s.is_empty()).unwrap_or(true))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(AccTestError::PreCheck(format!("{} must be set", missing.join(", "))))
        }
    })
}

/// One step of a test case
#[derive(Clone, Default)]
pub struct TestStep {
    pub config: Config,
    pub check: Option<CheckFn>,

    /// Import `resource_name` by its ID instead of applying `config`
    pub import_state: bool,
    /// Compare imported attributes with the ones in state
    pub import_state_verify: bool,
    /// Flattened keys (or key prefixes) left out of the comparison
    pub import_state_verify_ignore: Vec<String>,
    pub resource_name: Option<String>,

    /// Allow the plan after apply to still contain changes
    pub expect_non_empty_plan: bool,
    /// The apply must fail with an error matching this pattern
    pub expect_error: Option<Regex>,
}

impl TestStep {
    pub fn apply(config: Config) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_check(mut self, check: CheckFn) -> Self {
        self.check = Some(check);
        self
    }

    pub fn import(resource_name: &str) -> Self {
        Self {
            import_state: true,
            import_state_verify: true,
            resource_name: Some(resource_name.to_string()),
            ..Default::default()
        }
    }
}

/// A complete acceptance test case
#[derive(Clone, Default)]
pub struct TestCase {
    pub name: String,
    pub pre_check: Option<PreCheckFn>,
    pub steps: Vec<TestStep>,
    /// Run against the state as it was just before the final destroy
    pub check_destroy: Option<CheckFn>,
}

/// YAML form of a test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering cases
    #[serde(default)]
    pub tags: Vec<String>,

    /// Environment variables the case needs
    #[serde(default)]
    pub require_env: Vec<String>,

    /// `<namespace>.<key>` tags registered before the case runs
    #[serde(default)]
    pub tag_definitions: Vec<String>,

    /// Named configuration fragments composed by steps
    #[serde(default)]
    pub fragments: BTreeMap<String, Config>,

    pub steps: Vec<StepSpec>,

    /// Resource types whose instances must be gone after the final destroy
    #[serde(default)]
    pub check_destroy: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepSpec {
    /// Fragment names merged in order
    #[serde(default)]
    pub config: Vec<String>,

    /// Variables applied on top of the fragments
    #[serde(default)]
    pub variables: BTreeMap<String, DynamicValue>,

    #[serde(default)]
    pub checks: Vec<CheckSpec>,

    #[serde(default)]
    pub import: Option<ImportSpec>,

    #[serde(default)]
    pub expect_non_empty_plan: bool,

    #[serde(default)]
    pub expect_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportSpec {
    pub resource: String,
    #[serde(default = "default_verify")]
    pub verify: bool,
    #[serde(default)]
    pub ignore: Vec<String>,
}

fn default_verify() -> bool {
    true
}

/// Declarative check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum CheckSpec {
    Attr {
        address: String,
        key: String,
        value: String,
    },
    AttrSet {
        address: String,
        key: String,
    },
    NoAttr {
        address: String,
        key: String,
    },
    /// Remember the ID of `address`
    CaptureId {
        address: String,
    },
    /// The ID of `address` equals the captured one
    SameId {
        address: String,
    },
    Projection {
        resource: String,
        data_source: String,
        collection: String,
    },
}

impl CaseSpec {
    pub fn from_yaml(yaml: &str) -> AccResult<Self> {
        serde_yaml::from_str(yaml).map_err(AccTestError::from)
    }

    pub fn from_file(path: &Path) -> AccResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| {
            AccTestError::SpecParse(format!("{}: {}", path.display(), e))
        })
    }

    /// Load all case specs from a directory
    pub fn load_all(dir: &Path) -> AccResult<Vec<Self>> {
        let mut specs = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            specs.push(Self::from_file(entry.path())?);
        }

        Ok(specs)
    }

    /// Tag definitions as `(namespace, key)` pairs
    pub fn tag_definition_pairs(&self) -> AccResult<Vec<(String, String)>> {
        self.tag_definitions
            .iter()
            .map(|qualified| {
                qualified
                    .split_once('.')
                    .map(|(ns, key)| (ns.to_string(), key.to_string()))
                    .ok_or_else(|| {
                        AccTestError::SpecParse(format!(
                            "tag definition {} must be <namespace>.<key>",
                            qualified
                        ))
                    })
            })
            .collect()
    }

    /// Build the runnable test case.
    ///
    /// `base` is merged under every step's fragments.
    pub fn compile(&self, base: &Config) -> AccResult<TestCase> {
        let mut trackers: HashMap<String, IdTracker> = HashMap::new();
        let mut steps = Vec::with_capacity(self.steps.len());

        for (i, step) in self.steps.iter().enumerate() {
            if let Some(import) = &step.import {
                steps.push(TestStep {
                    import_state: true,
                    import_state_verify: import.verify,
                    import_state_verify_ignore: import.ignore.clone(),
                    resource_name: Some(import.resource.clone()),
                    ..Default::default()
                });
                continue;
            }

            let mut config = base.clone();
            for name in &step.config {
                let fragment = self.fragments.get(name).ok_or_else(|| {
                    AccTestError::SpecParse(format!("step {}: unknown fragment {}", i + 1, name))
                })?;
                config = config.merge(fragment.clone())?;
            }
            config.variables.extend(step.variables.clone());

            let checks = step
                .checks
                .iter()
                .map(|c| compile_check(c, &mut trackers))
                .collect::<Vec<_>>();

            let expect_error = step
                .expect_error
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|e| AccTestError::SpecParse(format!("step {}: {}", i + 1, e)))?;

            steps.push(TestStep {
                config,
                check: (!checks.is_empty()).then(|| compose_aggregate(checks)),
                expect_non_empty_plan: step.expect_non_empty_plan,
                expect_error,
                ..Default::default()
            });
        }

        let check_destroy = if self.check_destroy.is_empty() {
            None
        } else {
            let checks = self
                .check_destroy
                .iter()
                .map(|t| destroy_check(t))
                .collect::<AccResult<Vec<_>>>()?;
            Some(compose_aggregate(checks))
        };

        let pre_check = (!self.require_env.is_empty()).then(|| {
            let vars: Vec<&str> = self.require_env.iter().map(String::as_str).collect();
            require_env(&vars)
        });

        Ok(TestCase {
            name: self.name.clone(),
            pre_check,
            steps,
            check_destroy,
        })
    }
}

fn compile_check(spec: &CheckSpec, trackers: &mut HashMap<String, IdTracker>) -> CheckFn {
    match spec {
        CheckSpec::Attr { address, key, value } => check_resource_attr(address, key, value),
        CheckSpec::AttrSet { address, key } => check_resource_attr_set(address, key),
        CheckSpec::NoAttr { address, key } => check_no_resource_attr(address, key),
        CheckSpec::CaptureId { address } => trackers.entry(address.clone()).or_default().capture(address),
        CheckSpec::SameId { address } => trackers
            .entry(address.clone())
            .or_default()
            .expect_unchanged(address),
        CheckSpec::Projection {
            resource,
            data_source,
            collection,
        } => check_projection(resource, data_source, collection),
    }
}
