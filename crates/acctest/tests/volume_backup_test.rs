//! Volume backup acceptance tests
//!
//! Run against the in-process simulator:
//!   cargo test -p blockstore-acctest --test volume_backup_test

use std::path::PathBuf;
use std::sync::Arc;

use blockstore_acctest::check::{
    check_resource_attr, check_resource_attr_set, compose, compose_aggregate, state_check,
};
use blockstore_acctest::lifecycle::{check_projection, destroy_check, IdTracker};
use blockstore_acctest::runner::{RunnerConfig, SIMULATED_COMPARTMENT};
use blockstore_acctest::{
    init_test_logging, run_case, AccTestError, Config, TestCase, TestRunner, TestStep,
};
use blockstore_common::{SimulatedBlockstorage, SimulatorConfig};
use blockstore_provider::{BlockstorageProvider, ProviderConfig};
use regex::Regex;
use serde_json::json;

const RESOURCE: &str = "oci_core_volume_backup.test_volume_backup";
const DATA_SOURCE: &str = "data.oci_core_volume_backups.test_volume_backups";
const TAG_NAMESPACE: &str = "example-namespace";
const TAG_KEY: &str = "example-tag";

fn simulator(config: SimulatorConfig) -> Arc<SimulatedBlockstorage> {
    let sim = SimulatedBlockstorage::in_memory(config).unwrap();
    sim.define_tag(TAG_NAMESPACE, TAG_KEY).unwrap();
    Arc::new(sim)
}

fn provider(sim: Arc<SimulatedBlockstorage>) -> Arc<BlockstorageProvider> {
    let config = ProviderConfig {
        compartment_id: SIMULATED_COMPARTMENT.to_string(),
        poll_interval_ms: 1,
        ..Default::default()
    };
    Arc::new(BlockstorageProvider::new(sim, config))
}

fn merged(parts: Vec<Config>) -> Config {
    parts
        .into_iter()
        .fold(Config::new(), |acc, part| acc.merge(part).unwrap())
}

fn provider_config() -> Config {
    Config::new()
        .with_provider(json!({"region": "${var.region}"}))
        .variable("region", json!("us-phoenix-1"))
        .variable("compartment_id", json!(SIMULATED_COMPARTMENT))
}

fn volume_dependencies() -> Config {
    Config::new()
        .variable("availability_domain", json!("AD-1"))
        .resource(
            "oci_core_volume",
            "test_volume",
            json!({
                "compartment_id": "${var.compartment_id}",
                "availability_domain": "${var.availability_domain}",
                "display_name": "acctest-volume",
                "size_in_gbs": 50,
            }),
        )
}

fn backup_variables(tag_value: &str, display_name: &str, department: &str) -> Config {
    Config::new()
        .variable("tag_namespace", json!(TAG_NAMESPACE))
        .variable("tag_key", json!(TAG_KEY))
        .variable("volume_backup_defined_tags_value", json!(tag_value))
        .variable("volume_backup_display_name", json!(display_name))
        .variable("volume_backup_freeform_tags", json!({"Department": department}))
        .variable("volume_backup_state", json!("AVAILABLE"))
        .variable("volume_backup_type", json!("FULL"))
}

fn backup_required_only() -> Config {
    Config::new().resource(
        "oci_core_volume_backup",
        "test_volume_backup",
        json!({"volume_id": "${oci_core_volume.test_volume.id}"}),
    )
}

fn backup_resource() -> Config {
    Config::new().resource(
        "oci_core_volume_backup",
        "test_volume_backup",
        json!({
            "volume_id": "${oci_core_volume.test_volume.id}",
            "defined_tags": {
                "${var.tag_namespace}.${var.tag_key}": "${var.volume_backup_defined_tags_value}"
            },
            "display_name": "${var.volume_backup_display_name}",
            "freeform_tags": "${var.volume_backup_freeform_tags}",
            "type": "${var.volume_backup_type}",
        }),
    )
}

fn backups_data_source() -> Config {
    Config::new().data_source(
        "oci_core_volume_backups",
        "test_volume_backups",
        json!({
            "compartment_id": "${var.compartment_id}",
            "display_name": "${var.volume_backup_display_name}",
            "state": "${var.volume_backup_state}",
            "volume_id": "${oci_core_volume.test_volume.id}",
            "filter": [{
                "name": "id",
                "values": ["${oci_core_volume_backup.test_volume_backup.id}"],
            }],
        }),
    )
}

fn backup_destroy_check() -> blockstore_acctest::check::CheckFn {
    compose(vec![
        destroy_check("oci_core_volume_backup").unwrap(),
        destroy_check("oci_core_volume").unwrap(),
    ])
}

fn volume_backup_case() -> TestCase {
    let tracker = IdTracker::new();
    let tag = format!("defined_tags.{}.{}", TAG_NAMESPACE, TAG_KEY);

    let create_with_optionals = merged(vec![
        provider_config(),
        volume_dependencies(),
        backup_variables("value", "displayName", "Finance"),
        backup_resource(),
    ]);
    let updated = merged(vec![
        provider_config(),
        volume_dependencies(),
        backup_variables("updatedValue", "displayName2", "Accounting"),
        backup_resource(),
    ]);
    let listed = merged(vec![updated.clone(), backups_data_source()]);

    TestCase {
        name: "volume_backup_resource_basic".into(),
        steps: vec![
            // required arguments only
            TestStep::apply(merged(vec![
                provider_config(),
                volume_dependencies(),
                backup_variables("value", "displayName", "Finance"),
                backup_required_only(),
            ]))
            .with_check(compose_aggregate(vec![
                check_resource_attr_set(RESOURCE, "volume_id"),
                check_resource_attr(RESOURCE, "type", "INCREMENTAL"),
            ])),
            // dependencies only, so the backup is deleted
            TestStep::apply(merged(vec![provider_config(), volume_dependencies()])).with_check(
                state_check(|state| match state.get(RESOURCE) {
                    None => Ok(()),
                    Some(_) => Err(AccTestError::CheckFailed(format!("{} still in state", RESOURCE))),
                }),
            ),
            // create with optional arguments
            TestStep::apply(create_with_optionals).with_check(compose_aggregate(vec![
                check_resource_attr_set(RESOURCE, "compartment_id"),
                check_resource_attr(RESOURCE, "defined_tags.%", "1"),
                check_resource_attr(RESOURCE, &tag, "value"),
                check_resource_attr(RESOURCE, "display_name", "displayName"),
                check_resource_attr(RESOURCE, "freeform_tags.%", "1"),
                check_resource_attr(RESOURCE, "freeform_tags.Department", "Finance"),
                check_resource_attr_set(RESOURCE, "id"),
                check_resource_attr(RESOURCE, "state", "AVAILABLE"),
                check_resource_attr_set(RESOURCE, "time_created"),
                check_resource_attr(RESOURCE, "type", "FULL"),
                check_resource_attr_set(RESOURCE, "volume_id"),
                tracker.capture(RESOURCE),
            ])),
            // update in place
            TestStep::apply(updated).with_check(compose_aggregate(vec![
                check_resource_attr(RESOURCE, "defined_tags.%", "1"),
                check_resource_attr(RESOURCE, &tag, "updatedValue"),
                check_resource_attr(RESOURCE, "display_name", "displayName2"),
                check_resource_attr(RESOURCE, "freeform_tags.%", "1"),
                check_resource_attr(RESOURCE, "freeform_tags.Department", "Accounting"),
                check_resource_attr(RESOURCE, "type", "FULL"),
                tracker.expect_unchanged(RESOURCE),
            ])),
            // data source
            TestStep::apply(listed).with_check(compose_aggregate(vec![
                check_resource_attr(DATA_SOURCE, "compartment_id", SIMULATED_COMPARTMENT),
                check_resource_attr(DATA_SOURCE, "display_name", "displayName2"),
                check_resource_attr(DATA_SOURCE, "state", "AVAILABLE"),
                check_resource_attr_set(DATA_SOURCE, "volume_id"),
                check_resource_attr(DATA_SOURCE, "volume_backups.#", "1"),
                check_resource_attr(DATA_SOURCE, "volume_backups.0.display_name", "displayName2"),
                check_resource_attr(DATA_SOURCE, "volume_backups.0.freeform_tags.Department", "Accounting"),
                check_resource_attr(DATA_SOURCE, "volume_backups.0.type", "FULL"),
                check_resource_attr_set(DATA_SOURCE, "volume_backups.0.time_created"),
                check_projection(RESOURCE, DATA_SOURCE, "volume_backups"),
            ])),
            // import
            TestStep::import(RESOURCE),
        ],
        check_destroy: Some(backup_destroy_check()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_volume_backup_resource_basic() {
    init_test_logging();
    let provider = provider(simulator(SimulatorConfig::default()));

    let result = run_case(provider, &volume_backup_case()).await;
    assert_eq!(result.steps.len(), 6, "{:?}", result.error);
    result.into_result().unwrap();
}

#[tokio::test]
async fn test_volume_backup_destroy_with_immediate_purge() {
    init_test_logging();
    let provider = provider(simulator(SimulatorConfig {
        purge_after_reads: Some(0),
        ..Default::default()
    }));

    // backups that vanish right after termination still verify as destroyed
    run_case(provider, &volume_backup_case()).await.into_result().unwrap();
}

#[tokio::test]
async fn test_destroy_check_without_tracked_backup_fails() {
    init_test_logging();
    let provider = provider(simulator(SimulatorConfig::default()));

    let case = TestCase {
        name: "volume_only".into(),
        steps: vec![TestStep::apply(merged(vec![provider_config(), volume_dependencies()]))],
        check_destroy: Some(backup_destroy_check()),
        ..Default::default()
    };

    let result = run_case(provider, &case).await;
    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("Check destroy"), "{}", error);
    assert!(error.contains("at least one oci_core_volume_backup resource was expected"), "{}", error);
}

#[tokio::test]
async fn test_update_that_recreates_is_reported() {
    init_test_logging();
    let provider = provider(simulator(SimulatorConfig::default()));
    let tracker = IdTracker::new();

    let with_type = |backup_type: &str| {
        merged(vec![
            provider_config(),
            volume_dependencies(),
            backup_variables("value", "displayName", "Finance"),
            backup_resource(),
        ])
        .variable("volume_backup_type", json!(backup_type))
    };

    let case = TestCase {
        name: "volume_backup_type_change".into(),
        steps: vec![
            TestStep::apply(with_type("FULL")).with_check(tracker.capture(RESOURCE)),
            TestStep::apply(with_type("INCREMENTAL")).with_check(tracker.expect_unchanged(RESOURCE)),
        ],
        check_destroy: Some(backup_destroy_check()),
        ..Default::default()
    };

    let result = run_case(provider, &case).await;
    assert!(!result.success);
    assert!(result.steps[0].success);
    let failed = result.steps[1].error.as_deref().unwrap();
    assert!(failed.contains("recreated when it was supposed to be updated"), "{}", failed);
    // destroy still ran and verified the replacement
    assert!(!result.error.unwrap().contains("Check destroy"));
}

#[tokio::test]
async fn test_expect_error_on_invalid_arguments() {
    init_test_logging();
    let provider = provider(simulator(SimulatorConfig::default()));

    let invalid_type = merged(vec![
        provider_config(),
        volume_dependencies(),
        backup_variables("value", "displayName", "Finance"),
        backup_resource(),
    ])
    .variable("volume_backup_type", json!("DIFFERENTIAL"));

    let undefined_tag = merged(vec![
        provider_config(),
        volume_dependencies(),
        backup_variables("value", "displayName", "Finance"),
        backup_resource(),
    ])
    .variable("tag_key", json!("missing-tag"));

    let case = TestCase {
        name: "volume_backup_invalid".into(),
        steps: vec![
            TestStep {
                expect_error: Some(Regex::new("must be one of").unwrap()),
                ..TestStep::apply(invalid_type)
            },
            TestStep {
                expect_error: Some(Regex::new("does not exist").unwrap()),
                ..TestStep::apply(undefined_tag)
            },
        ],
        ..Default::default()
    };

    let result = run_case(provider, &case).await;
    assert!(result.success, "{:?}", result.error);
}

#[tokio::test]
async fn test_yaml_specs() {
    init_test_logging();
    let output = tempfile::tempdir().unwrap();

    let mut config = RunnerConfig {
        specs_dir: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/specs"),
        output_dir: output.path().to_path_buf(),
        ..Default::default()
    };
    config.provider.poll_interval_ms = 1;
    let runner = TestRunner::with_config(config);

    let results = runner.run_tagged("backup").await.unwrap();
    assert_eq!(results.total, 1);
    assert_eq!(results.failed, 0, "{:?}", results.results[0].error);

    let path = runner.write_results(&results).unwrap();
    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(written["passed"], 1);
    assert_eq!(written["results"][0]["name"], "volume-backup-basic");
}
