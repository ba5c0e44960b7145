//! Acceptance test runner entry point
//!
//! Runs YAML case specs against the simulated block storage service.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use blockstore_acctest::runner::{RunnerConfig, TestSuiteResult};
use blockstore_acctest::{AccResult, TestRunner};
use blockstore_provider::ProviderConfig;

#[derive(Parser, Debug)]
#[command(name = "blockstore-acctest")]
#[command(about = "Acceptance test runner for the block storage provider")]
struct Args {
    /// Path to test specs directory
    #[arg(short, long, default_value = "tests/specs")]
    specs: PathBuf,

    /// Run only tests matching this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only a specific test by name
    #[arg(short, long)]
    name: Option<String>,

    /// Provider configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for results
    #[arg(short, long, default_value = "test-results")]
    output: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

fn load_provider_config(path: Option<&PathBuf>) -> anyhow::Result<ProviderConfig> {
    let defaults = RunnerConfig::default().provider;
    let config = match path {
        Some(path) => ProviderConfig::load(path)?,
        None => defaults,
    }
    .with_env_overrides();
    config.validate()?;
    Ok(config)
}

async fn async_main(args: Args) -> AccResult<bool> {
    let provider = load_provider_config(args.config.as_ref()).map_err(|e| {
        blockstore_acctest::AccTestError::Config(format!("{:#}", e))
    })?;
    info!("Using region {}", provider.region);

    let runner = TestRunner::with_config(RunnerConfig {
        provider,
        specs_dir: args.specs,
        output_dir: args.output,
        ..Default::default()
    });

    let results = if let Some(name) = args.name {
        TestSuiteResult::single(runner.run_test(&name).await?)
    } else if let Some(tag) = args.tag {
        runner.run_tagged(&tag).await?
    } else {
        runner.run_all().await?
    };

    runner.write_results(&results)?;

    Ok(results.failed == 0)
}
