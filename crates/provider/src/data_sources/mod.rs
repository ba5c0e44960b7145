//! Data Source Implementations
//!
//! Read-only queries over the block storage service.

pub mod filter;
pub mod volume_backups;

use anyhow::Result;

use crate::client::BlockstorageClient;
use crate::state::DynamicValue;

/// Trait for data source reads
#[async_trait::async_trait]
pub trait DataSource {
    /// Data source type name
    fn type_name() -> &'static str;

    /// Evaluate the query described by `config`, returning the full state
    async fn read(client: &BlockstorageClient, config: &DynamicValue) -> Result<DynamicValue>;
}
