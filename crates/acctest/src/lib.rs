//! Blockstore Acceptance Test Framework
//!
//! Drives the block storage provider through declarative configurations the
//! way an infrastructure-as-code tool would, and verifies the results:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Acceptance Test Runner                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestCase                                                   │
//! │    ├── pre_check                                            │
//! │    ├── steps: [TestStep]                                    │
//! │    │     ├── apply config -> checks -> plan must be empty   │
//! │    │     └── import by ID -> compare attributes             │
//! │    └── check_destroy (after the final destroy)              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Engine: refresh / plan / apply / destroy / import          │
//! │  BlockstorageProvider -> BlockstorageClient -> service      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod check;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod runner;
pub mod spec;
pub mod state;

pub use config::Config;
pub use engine::Engine;
pub use error::{AccResult, AccTestError};
pub use runner::{run_case, TestRunner};
pub use spec::{CaseSpec, TestCase, TestStep};
pub use state::State;

/// Install a test-friendly subscriber; repeated calls are no-ops
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
