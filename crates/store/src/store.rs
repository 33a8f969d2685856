use async_trait::async_trait;

use crate::{
    error::Result,
    record::{InstancePatch, InstanceRecord},
};

/// Durable instance metadata.
///
/// `read` accepts an instance id, account number or name. When the same
/// string matches several rows the id match wins, then the number match,
/// then the (case-insensitive) name match.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn create(&self, record: &InstanceRecord) -> Result<()>;
    async fn read(&self, identifier: &str) -> Result<Option<InstanceRecord>>;
    async fn read_all(&self) -> Result<Vec<InstanceRecord>>;
    /// Sparse patch; see [`InstancePatch`].
    async fn update(&self, id: &str, patch: &InstancePatch) -> Result<()>;
    /// Removes the row.
    async fn delete(&self, id: &str) -> Result<()>;
}
