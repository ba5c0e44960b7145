//! Blockstore Provider
//!
//! Declarative resource provider for block volumes and volume backups.
//! Resources and data sources are driven through [`BlockstorageProvider`],
//! which mirrors the plugin operations of a Terraform-style provider.

pub mod client;
pub mod config;
pub mod data_sources;
pub mod provider;
pub mod resources;
pub mod retry;
pub mod schema;
pub mod state;

pub use client::BlockstorageClient;
pub use config::ProviderConfig;
pub use provider::{BlockstorageProvider, Diagnostic, Severity};
pub use state::DynamicValue;
