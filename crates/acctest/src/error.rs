//! Error types for acceptance testing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccTestError {
    #[error("Test spec parse error: {0}")]
    SpecParse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Cannot resolve reference ${{{reference}}}: {reason}")]
    Reference { reference: String, reason: String },

    #[error("{address}: {message}")]
    Diagnostics { address: String, message: String },

    #[error("Pre-check failed: {0}")]
    PreCheck(String),

    #[error("Check failed: {0}")]
    CheckFailed(String),

    #[error("Resource {address} recreated when it was supposed to be updated ({before} -> {after})")]
    Recreated {
        address: String,
        before: String,
        after: String,
    },

    #[error("resource lifecycle state: {state} is not in expected deleted lifecycle states")]
    NotDestroyed { id: String, state: String },

    #[error("at least one {0} resource was expected from the state file, but could not be found")]
    NoResourceFound(String),

    #[error("After applying this step, the plan was not empty: {0}")]
    NonEmptyPlan(String),

    #[error("Step {step} failed: {reason}")]
    StepFailed { step: usize, reason: String },

    #[error("Service error: {0}")]
    Service(#[from] blockstore_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type AccResult<T> = Result<T, AccTestError>;
