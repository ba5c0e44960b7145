//! Block storage common library
//!
//! Shared data model, errors, the service API trait and an in-process
//! simulated block storage service.

pub mod api;
pub mod db;
pub mod error;
pub mod simulator;
pub mod types;

// Re-export commonly used types
pub use api::BlockstorageApi;
pub use db::Database;
pub use error::{Error, ErrorKind, Result};
pub use simulator::{SimulatedBlockstorage, SimulatorConfig};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
