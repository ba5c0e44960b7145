//! Test runner
//!
//! Executes test cases step by step against a provider, always destroying
//! what was created, then runs the destroy check on the pre-destroy state.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use blockstore_common::{SimulatedBlockstorage, SimulatorConfig};
use blockstore_provider::{BlockstorageProvider, ProviderConfig};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};

use crate::check::CheckContext;
use crate::config::Config;
use crate::engine::Engine;
use crate::error::{AccResult, AccTestError};
use crate::spec::{CaseSpec, TestCase, TestStep};
use crate::state::State;

/// Compartment used when running against the simulator
pub const SIMULATED_COMPARTMENT: &str = "ocid1.compartment.oc1..acctest";

/// Result of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub kind: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Result of running a single test case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
}

impl TestResult {
    fn failed(name: &str, error: String) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            duration_ms: 0,
            steps: vec![],
            error: Some(error),
        }
    }

    pub fn into_result(self) -> AccResult<()> {
        match self.error {
            None => Ok(()),
            Some(e) => Err(AccTestError::CheckFailed(format!("{}: {}", self.name, e))),
        }
    }
}

/// Result of running all test cases
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn single(result: TestResult) -> Self {
        let passed = usize::from(result.success);
        Self {
            total: 1,
            passed,
            failed: 1 - passed,
            skipped: 0,
            duration_ms: result.duration_ms,
            results: vec![result],
        }
    }
}

/// Run one test case against `provider`
pub async fn run_case(provider: Arc<BlockstorageProvider>, case: &TestCase) -> TestResult {
    let start = Instant::now();
    debug!("Running test: {}", case.name);

    if let Some(pre_check) = &case.pre_check {
        if let Err(e) = pre_check() {
            return TestResult::failed(&case.name, e.to_string());
        }
    }

    let engine = Engine::new(provider.clone());
    let mut state = State::new();
    let mut step_results = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    for (i, step) in case.steps.iter().enumerate() {
        let step_start = Instant::now();
        let outcome = run_step(&engine, step, &mut state).await;

        let error = outcome.err().map(|e| {
            AccTestError::StepFailed {
                step: i + 1,
                reason: e.to_string(),
            }
            .to_string()
        });
        step_results.push(StepResult {
            index: i + 1,
            kind: if step.import_state { "import" } else { "apply" }.to_string(),
            success: error.is_none(),
            duration_ms: step_start.elapsed().as_millis() as u64,
            error: error.clone(),
        });

        if let Some(e) = error {
            errors.push(e);
            break;
        }
    }

    let pre_destroy = state.clone();
    match engine.destroy(&mut state).await {
        Ok(()) => {
            if let Some(check) = &case.check_destroy {
                let ctx = CheckContext {
                    client: provider.client().await,
                };
                if let Err(e) = check.check(&ctx, &pre_destroy).await {
                    errors.push(format!("Check destroy: {}", e));
                }
            }
        }
        Err(e) => errors.push(format!(
            "Error destroying resources: {} (left in state: {})",
            e,
            state.addresses().join(", ")
        )),
    }

    TestResult {
        name: case.name.clone(),
        success: errors.is_empty(),
        duration_ms: start.elapsed().as_millis() as u64,
        steps: step_results,
        error: (!errors.is_empty()).then(|| errors.join("\n")),
    }
}

async fn run_step(engine: &Engine, step: &TestStep, state: &mut State) -> AccResult<()> {
    if step.import_state {
        return import_step(engine, step, state).await;
    }

    let applied = engine.apply(&step.config, state).await;
    if let Some(pattern) = &step.expect_error {
        return match applied {
            Err(e) if pattern.is_match(&e.to_string()) => Ok(()),
            Err(e) => Err(AccTestError::CheckFailed(format!(
                "expected an error matching {}, got: {}",
                pattern, e
            ))),
            Ok(()) => Err(AccTestError::CheckFailed(format!(
                "expected an error matching {}, but apply succeeded",
                pattern
            ))),
        };
    }
    applied?;

    if let Some(check) = &step.check {
        let ctx = CheckContext {
            client: engine.provider().client().await,
        };
        check.check(&ctx, state).await?;
    }

    let changes = engine.plan(&step.config, state).await?;
    if !changes.is_empty() && !step.expect_non_empty_plan {
        let summary: Vec<String> = changes.iter().map(|c| c.to_string()).collect();
        return Err(AccTestError::NonEmptyPlan(summary.join(", ")));
    }
    Ok(())
}

async fn import_step(engine: &Engine, step: &TestStep, state: &State) -> AccResult<()> {
    let address = step
        .resource_name
        .as_deref()
        .ok_or_else(|| AccTestError::CheckFailed("import step requires resource_name".into()))?;
    let existing = state
        .get(address)
        .ok_or_else(|| AccTestError::CheckFailed(format!("{} is not in state, nothing to import", address)))?;

    let imported = engine
        .import(&existing.type_name, &existing.name, &existing.id)
        .await?;
    if !step.import_state_verify {
        return Ok(());
    }

    let ignored = |key: &str| {
        step.import_state_verify_ignore
            .iter()
            .any(|prefix| key == prefix.as_str() || key.starts_with(&format!("{}.", prefix)))
    };
    let expected = existing.primary_attributes();
    let actual = imported.primary_attributes();

    let keys: BTreeSet<&String> = expected.keys().chain(actual.keys()).collect();
    let detail: Vec<String> = keys
        .into_iter()
        .filter(|key| !ignored(key.as_str()))
        .filter_map(|key| {
            let (want, got) = (expected.get(key), actual.get(key));
            (want != got).then(|| format!("{}: state {:?}, imported {:?}", key, want, got))
        })
        .collect();

    if detail.is_empty() {
        return Ok(());
    }
    Err(AccTestError::CheckFailed(format!(
        "ImportStateVerify attributes not equivalent: {}",
        detail.join("; ")
    )))
}

/// Configuration for the test runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub provider: ProviderConfig,
    pub simulator: SimulatorConfig,
    pub specs_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig {
                compartment_id: SIMULATED_COMPARTMENT.to_string(),
                poll_interval_ms: 10,
                ..Default::default()
            },
            simulator: SimulatorConfig::default(),
            specs_dir: PathBuf::from("tests/specs"),
            output_dir: PathBuf::from("test-results"),
        }
    }
}

/// Runs YAML case specs, each against a fresh simulated service
pub struct TestRunner {
    config: RunnerConfig,
}

impl TestRunner {
    /// Create a new test runner with default configuration
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        Self { config }
    }

    /// Variables every case starts from
    pub fn base_config(&self) -> Config {
        let mut base = Config::new().variable("region", json!(self.config.provider.region));
        if !self.config.provider.compartment_id.is_empty() {
            base = base.variable("compartment_id", json!(self.config.provider.compartment_id));
        }
        base
    }

    /// Provider over a new simulator with the spec's tags registered
    pub fn provider_for(&self, spec: &CaseSpec) -> AccResult<Arc<BlockstorageProvider>> {
        let sim = SimulatedBlockstorage::in_memory(self.config.simulator.clone())?;
        for (namespace, key) in spec.tag_definition_pairs()? {
            sim.define_tag(&namespace, &key)?;
        }
        Ok(Arc::new(BlockstorageProvider::new(
            Arc::new(sim),
            self.config.provider.clone(),
        )))
    }

    pub async fn run_all(&self) -> AccResult<TestSuiteResult> {
        let specs = CaseSpec::load_all(&self.config.specs_dir)?;
        Ok(self.run_specs(&specs).await)
    }

    /// Run cases carrying `tag`
    pub async fn run_tagged(&self, tag: &str) -> AccResult<TestSuiteResult> {
        let specs: Vec<CaseSpec> = CaseSpec::load_all(&self.config.specs_dir)?
            .into_iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect();
        Ok(self.run_specs(&specs).await)
    }

    /// Run a specific case by name
    pub async fn run_test(&self, name: &str) -> AccResult<TestResult> {
        let spec = CaseSpec::load_all(&self.config.specs_dir)?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| AccTestError::SpecParse(format!("Test not found: {}", name)))?;
        self.run_spec(&spec).await
    }

    pub async fn run_specs(&self, specs: &[CaseSpec]) -> TestSuiteResult {
        let start = Instant::now();
        let mut results = Vec::new();
        let (mut passed, mut failed) = (0, 0);

        info!("Running {} test(s)...", specs.len());

        for spec in specs {
            let result = match self.run_spec(spec).await {
                Ok(result) => result,
                Err(e) => TestResult::failed(&spec.name, e.to_string()),
            };

            if result.success {
                passed += 1;
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!("✗ {} - {}", result.name, result.error.as_deref().unwrap_or("unknown error"));
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!("Test Results: {} passed, {} failed ({} ms)", passed, failed, duration_ms);

        TestSuiteResult {
            total: specs.len(),
            passed,
            failed,
            skipped: 0,
            duration_ms,
            results,
        }
    }

    pub async fn run_spec(&self, spec: &CaseSpec) -> AccResult<TestResult> {
        let case = spec.compile(&self.base_config())?;
        let provider = self.provider_for(spec)?;
        Ok(run_case(provider, &case).await)
    }

    /// Write results to `test-results.json` in the output directory
    pub fn write_results(&self, results: &TestSuiteResult) -> AccResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

impl Default for TestRunner {
    fn default() -> Self {
        Self::new()
    }
}
